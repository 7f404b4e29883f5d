//! The request guard: accept or reject each request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, trace};

use super::request::RequestInfo;
use super::response::{CookieOptions, ResponseCookie, ResponseSink};
use crate::config::GuardConfig;
use crate::error::{BlockError, Result};
use crate::ratelimit::{fingerprint, AttemptStore, Clock, MemoryStore, SystemClock};

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The client's block cookie reached the configured ceiling
    CookieCeiling,
    /// The fingerprint used up its attempts for the current window
    AttemptsExceeded,
}

/// A rejection, ready to be written to a [`ResponseSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub reason: RejectReason,
    pub status: u16,
    /// `{"error": <configured payload>}`
    pub body: Value,
    /// Updated block counter, absent for cookie-ceiling rejections
    pub cookie: Option<ResponseCookie>,
}

impl Rejection {
    /// Write the cookie, status and body to `response`.
    pub fn apply<R: ResponseSink + ?Sized>(&self, response: &mut R) {
        if let Some(cookie) = &self.cookie {
            response.set_cookie(&cookie.name, &cookie.value, &cookie.options);
        }
        response.set_status(self.status);
        response.send_json(self.body.clone());
    }
}

/// The outcome of checking one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Hand the request to the next stage
    Accept,
    /// Answer the request with the rejection and stop
    Reject(Rejection),
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accept)
    }
}

/// Middleware that blocks repeated requests to the same route from the same
/// client within a sliding window.
///
/// Each guard owns a validated [`GuardConfig`] and a handle to its store.
/// Guards built with [`BlockGuard::new`] get a private [`MemoryStore`]; to
/// share counts between guards, build the store once and pass it to
/// [`BlockGuard::with_store`].
pub struct BlockGuard<S: AttemptStore = MemoryStore> {
    /// Validated options
    config: GuardConfig,
    /// Attempt records shared with any other guard using the same store
    store: Arc<S>,
    /// Time source for cookie expiry
    clock: Arc<dyn Clock>,
}

impl BlockGuard<MemoryStore> {
    /// Create a guard with its own in-memory store.
    pub fn new(config: GuardConfig) -> Result<Self> {
        config.validate()?;
        let store = MemoryStore::from_config(&config);

        debug!(
            window_ms = config.window_ms,
            max_attempts = config.max_attempts,
            "Block guard created"
        );

        Ok(Self {
            config,
            store,
            clock: Arc::new(SystemClock),
        })
    }
}

impl<S: AttemptStore> BlockGuard<S> {
    /// Create a guard over an existing store.
    ///
    /// Fails if the store was built for a different attempt ceiling.
    pub fn with_store(config: GuardConfig, store: Arc<S>) -> Result<Self> {
        config.validate()?;

        if store.max_attempts() != config.max_attempts {
            return Err(BlockError::StoreMismatch {
                store: store.max_attempts(),
                requested: config.max_attempts,
            });
        }

        Ok(Self {
            config,
            store,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source used for cookie expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Decide whether a request may proceed, recording it if so.
    pub fn check(&self, request: &RequestInfo) -> Decision {
        let blocked_times = request
            .cookie(&self.config.cookie_name)
            .and_then(|value| parse_counter(&value));

        if let Some(count) = blocked_times {
            if count >= f64::from(self.config.cookie_ceiling) {
                info!(
                    blocked_times = count,
                    ceiling = self.config.cookie_ceiling,
                    "Request rejected by block cookie"
                );
                return Decision::Reject(self.rejection(RejectReason::CookieCeiling, None));
            }
        }

        let key = fingerprint(request);
        trace!(key = %key, "Checking attempts");

        if self.store.try_acquire(&key, self.config.window()) {
            return Decision::Accept;
        }

        // Below the ceiling here, so the count fits in a u32
        let tries = blocked_times.map_or(1, |count| (count.trunc() as u32).saturating_add(1));
        info!(blocked_times = tries, "Request rejected, attempts exhausted");

        let cookie = self.block_cookie(request, tries);
        Decision::Reject(self.rejection(RejectReason::AttemptsExceeded, Some(cookie)))
    }

    /// Run the guard as middleware.
    ///
    /// Calls `next` and returns its output when the request is accepted.
    /// Otherwise writes the rejection to `response`, never calls `next`, and
    /// returns `None`.
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub fn handle<R, F, T>(&self, request: &RequestInfo, response: &mut R, next: F) -> Option<T>
    where
        R: ResponseSink + ?Sized,
        F: FnOnce() -> T,
    {
        match self.check(request) {
            Decision::Accept => Some(next()),
            Decision::Reject(rejection) => {
                rejection.apply(response);
                None
            }
        }
    }

    fn rejection(&self, reason: RejectReason, cookie: Option<ResponseCookie>) -> Rejection {
        Rejection {
            reason,
            status: self.config.block_status,
            body: json!({ "error": self.config.error_payload }),
            cookie,
        }
    }

    fn block_cookie(&self, request: &RequestInfo, tries: u32) -> ResponseCookie {
        let expires_ms = self
            .clock
            .now_millis()
            .saturating_add(self.config.cookie_ttl().as_millis() as u64);
        let expires = i64::try_from(expires_ms)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let domain = if request.hostname.is_empty() {
            None
        } else {
            Some(request.hostname.clone())
        };

        ResponseCookie {
            name: self.config.cookie_name.clone(),
            value: tries.to_string(),
            options: CookieOptions {
                expires,
                http_only: true,
                domain,
                secure: request.is_secure(),
                path: request.path.clone(),
            },
        }
    }
}

impl<S: AttemptStore> std::fmt::Debug for BlockGuard<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockGuard")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Parse a block counter cookie.
///
/// Any finite, non-negative number counts, including fractions and values
/// past `u32::MAX`. Anything else is ignored.
fn parse_counter(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|count| count.is_finite() && *count >= 0.0)
}
