//! block-ddos - Sliding-Window Request Blocking Middleware
//!
//! This crate blocks repeated requests to the same route from the same client.
//! Each request is fingerprinted by client address, method and path; an
//! in-memory store counts accepted requests per fingerprint in a sliding
//! window, and a client-held cookie counter short-circuits clients that keep
//! getting blocked.

pub mod config;
pub mod error;
pub mod middleware;
pub mod ratelimit;

pub use config::GuardConfig;
pub use error::{BlockError, Result};
pub use middleware::{BlockGuard, Decision, RequestInfo, ResponseSink};
pub use ratelimit::MemoryStore;
