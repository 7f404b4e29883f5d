//! Configuration management for block-ddos.
//!
//! Options can be supplied as a typed [`GuardConfig`] or as an untyped
//! mapping (JSON, YAML, environment). Untyped input is type-checked before
//! it is deserialized so that a string window or a fractional attempt count
//! is reported the same way regardless of where it came from. Nothing is
//! ever clamped into range: invalid options abort construction.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{BlockError, Result};

/// Default sliding window length.
pub const DEFAULT_WINDOW_MS: u64 = 10_000;
/// Smallest accepted sliding window.
pub const MIN_WINDOW_MS: u64 = 10_000;
/// Default number of accepted requests per window.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
/// Inclusive lower bound for `max_attempts`.
pub const MIN_ATTEMPTS: u32 = 1;
/// Inclusive upper bound for `max_attempts`.
pub const MAX_ATTEMPTS: u32 = 7;
/// Message used by the default rejection payload.
pub const DEFAULT_ERROR_MESSAGE: &str = "Blocked by proxy. Try again in a moment!";
/// Name of the client-held block counter cookie.
pub const DEFAULT_COOKIE_NAME: &str = "ddos-blocked-times";

/// Prefix for environment overrides, e.g. `BLOCK_DDOS_WINDOW_MS`.
const ENV_PREFIX: &str = "BLOCK_DDOS";

/// Option names, with the extra spellings accepted for each.
///
/// Keys are matched ignoring case, `_` and `-`, so `windowMs`, `WINDOW_MS`
/// and `windowms` (as produced by case-folding sources) all name `window_ms`.
const OPTIONS: &[(&str, &[&str])] = &[
    ("window_ms", &["interval"]),
    ("max_attempts", &["attempts"]),
    ("error_payload", &["error"]),
    ("cookie_name", &[]),
    ("cookie_ceiling", &[]),
    ("cookie_ttl_secs", &[]),
    ("sweep_interval_ms", &[]),
    ("block_status", &[]),
];

/// Options for a [`crate::middleware::BlockGuard`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    /// Sliding window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Accepted requests per fingerprint before the next one is rejected
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Value echoed under `error` in every rejection body
    #[serde(default = "default_error_payload")]
    pub error_payload: Value,

    /// Name of the block counter cookie
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Cookie counter value at which requests are rejected without consulting the store
    #[serde(default = "default_cookie_ceiling")]
    pub cookie_ceiling: u32,

    /// Lifetime of the block counter cookie in seconds
    #[serde(default = "default_cookie_ttl_secs")]
    pub cookie_ttl_secs: u64,

    /// Period of the background sweep in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Status code sent with every rejection
    #[serde(default = "default_block_status")]
    pub block_status: u16,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_attempts: default_max_attempts(),
            error_payload: default_error_payload(),
            cookie_name: default_cookie_name(),
            cookie_ceiling: default_cookie_ceiling(),
            cookie_ttl_secs: default_cookie_ttl_secs(),
            sweep_interval_ms: default_sweep_interval_ms(),
            block_status: default_block_status(),
        }
    }
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_error_payload() -> Value {
    json!({ "message": DEFAULT_ERROR_MESSAGE })
}

fn default_cookie_name() -> String {
    DEFAULT_COOKIE_NAME.to_string()
}

fn default_cookie_ceiling() -> u32 {
    7
}

fn default_cookie_ttl_secs() -> u64 {
    600
}

fn default_sweep_interval_ms() -> u64 {
    10_000
}

fn default_block_status() -> u16 {
    403
}

impl GuardConfig {
    /// Set the sliding window length.
    pub fn with_window_ms(mut self, window_ms: u64) -> Self {
        self.window_ms = window_ms;
        self
    }

    /// Set the attempt ceiling.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the payload echoed in rejection bodies.
    pub fn with_error_payload(mut self, payload: impl Into<Value>) -> Self {
        self.error_payload = payload.into();
        self
    }

    /// Set the background sweep period.
    pub fn with_sweep_interval_ms(mut self, sweep_interval_ms: u64) -> Self {
        self.sweep_interval_ms = sweep_interval_ms;
        self
    }

    /// The sliding window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// The sweep period as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// The block cookie lifetime as a [`Duration`].
    pub fn cookie_ttl(&self) -> Duration {
        Duration::from_secs(self.cookie_ttl_secs)
    }

    /// Check every option against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if self.window_ms < MIN_WINDOW_MS {
            return Err(BlockError::WindowBelowFloor {
                actual: self.window_ms,
                floor: MIN_WINDOW_MS,
            });
        }

        if !(MIN_ATTEMPTS..=MAX_ATTEMPTS).contains(&self.max_attempts) {
            return Err(BlockError::AttemptsOutOfRange {
                actual: i64::from(self.max_attempts),
                min: MIN_ATTEMPTS,
                max: MAX_ATTEMPTS,
            });
        }

        if self.cookie_name.is_empty()
            || self
                .cookie_name
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || matches!(c, ';' | '=' | ','))
        {
            return Err(BlockError::Config(format!(
                "cookie_name {:?} is not a valid cookie name",
                self.cookie_name
            )));
        }

        if self.cookie_ceiling == 0 {
            return Err(BlockError::Config("cookie_ceiling must be at least 1".into()));
        }

        if self.cookie_ttl_secs == 0 {
            return Err(BlockError::Config("cookie_ttl_secs must be at least 1".into()));
        }

        if self.sweep_interval_ms == 0 {
            return Err(BlockError::Config("sweep_interval_ms must be at least 1".into()));
        }

        if !(400..=499).contains(&self.block_status) {
            return Err(BlockError::Config(format!(
                "block_status must be a client error status (400-499), got {}",
                self.block_status
            )));
        }

        Ok(())
    }

    /// Build a validated configuration from an untyped mapping.
    ///
    /// `null` entries are treated as absent and unknown options are
    /// rejected. The window and attempt options are type-checked first so
    /// that their dedicated errors are reported instead of a generic
    /// deserialization failure.
    pub fn from_value(value: Value) -> Result<Self> {
        let map = canonicalize(into_mapping(value)?)?;

        if let Some(window) = map.get("window_ms") {
            check_window(window)?;
        }
        if let Some(attempts) = map.get("max_attempts") {
            check_attempts(attempts)?;
        }

        let config: GuardConfig = serde_json::from_value(Value::Object(map))
            .map_err(|e| BlockError::Config(format!("Failed to parse guard config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_value(parse_yaml(yaml)?)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_value(read_yaml_file(path.as_ref())?)
    }

    /// Load configuration from an optional YAML file overlaid with
    /// `BLOCK_DDOS_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_layered(path, environment())
    }

    fn load_layered(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        // The file is read directly so that key case survives; only the
        // environment goes through `config`, whose keys are already folded.
        let mut options = match path {
            Some(path) => canonicalize(into_mapping(read_yaml_file(path)?)?)?,
            None => Map::new(),
        };

        let overrides: Value = config::Config::builder()
            .add_source(env)
            .build()
            .and_then(|layered| layered.try_deserialize())
            .map_err(|e| BlockError::Config(e.to_string()))?;
        let overrides = canonicalize(into_mapping(overrides)?)?;

        if !overrides.is_empty() {
            debug!(
                options = ?overrides.keys().collect::<Vec<_>>(),
                "Applying environment overrides"
            );
        }
        options.extend(overrides);

        Self::from_value(Value::Object(options))
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .try_parsing(true)
}

fn parse_yaml(yaml: &str) -> Result<Value> {
    serde_yaml::from_str(yaml)
        .map_err(|e| BlockError::Config(format!("Failed to parse guard config: {}", e)))
}

fn read_yaml_file(path: &Path) -> Result<Value> {
    info!(path = %path.display(), "Loading guard configuration");
    let contents = std::fs::read_to_string(path)?;
    parse_yaml(&contents)
}

fn into_mapping(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(BlockError::Config(format!(
            "expected a mapping of options, got {}",
            other
        ))),
    }
}

/// The canonical name for an option key, if it names one.
fn canonical_key(key: &str) -> Option<&'static str> {
    let folded: String = key
        .chars()
        .filter(|c| !matches!(c, '_' | '-'))
        .map(|c| c.to_ascii_lowercase())
        .collect();

    OPTIONS
        .iter()
        .find(|(name, aliases)| name.replace('_', "") == folded || aliases.contains(&folded.as_str()))
        .map(|(name, _)| *name)
}

/// Re-key a mapping by canonical option name, dropping `null`s.
fn canonicalize(map: Map<String, Value>) -> Result<Map<String, Value>> {
    let mut options = Map::new();
    for (key, value) in map {
        if value.is_null() {
            continue;
        }
        let Some(name) = canonical_key(&key) else {
            return Err(BlockError::Config(format!("unknown option {:?}", key)));
        };
        if options.insert(name.to_string(), value).is_some() {
            return Err(BlockError::Config(format!("option {} given more than once", name)));
        }
    }
    Ok(options)
}

fn check_window(value: &Value) -> Result<()> {
    let Some(ms) = value.as_f64() else {
        return Err(BlockError::InvalidWindowType);
    };

    if ms < MIN_WINDOW_MS as f64 {
        return Err(BlockError::WindowBelowFloor {
            actual: ms.max(0.0) as u64,
            floor: MIN_WINDOW_MS,
        });
    }

    if value.as_u64().is_none() {
        return Err(BlockError::Config(format!(
            "window_ms must be a whole number of milliseconds, got {}",
            value
        )));
    }

    Ok(())
}

fn check_attempts(value: &Value) -> Result<()> {
    let Some(attempts) = value.as_i64() else {
        return Err(BlockError::InvalidAttemptsType);
    };

    if attempts < i64::from(MIN_ATTEMPTS) || attempts > i64::from(MAX_ATTEMPTS) {
        return Err(BlockError::AttemptsOutOfRange {
            actual: attempts,
            min: MIN_ATTEMPTS,
            max: MAX_ATTEMPTS,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GuardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window_ms, 10_000);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.cookie_name, "ddos-blocked-times");
        assert_eq!(config.cookie_ceiling, 7);
        assert_eq!(config.block_status, 403);
        assert_eq!(
            config.error_payload,
            json!({ "message": "Blocked by proxy. Try again in a moment!" })
        );
    }

    #[test]
    fn test_window_below_floor_rejected() {
        let config = GuardConfig::default().with_window_ms(1000);
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            BlockError::WindowBelowFloor { actual: 1000, floor: 10_000 }
        ));
    }

    #[test]
    fn test_attempts_range_is_inclusive() {
        assert!(GuardConfig::default().with_max_attempts(1).validate().is_ok());
        assert!(GuardConfig::default().with_max_attempts(7).validate().is_ok());
        assert!(matches!(
            GuardConfig::default().with_max_attempts(0).validate(),
            Err(BlockError::AttemptsOutOfRange { actual: 0, .. })
        ));
        assert!(matches!(
            GuardConfig::default().with_max_attempts(8).validate(),
            Err(BlockError::AttemptsOutOfRange { actual: 8, .. })
        ));
    }

    #[test]
    fn test_from_value_string_window_rejected() {
        let err = GuardConfig::from_value(json!({ "window_ms": "9000" })).unwrap_err();
        assert!(matches!(err, BlockError::InvalidWindowType));
        assert_eq!(err.to_string(), "The time interval must be a number");
    }

    #[test]
    fn test_from_value_string_attempts_rejected() {
        let err = GuardConfig::from_value(json!({ "attempts": "3" })).unwrap_err();
        assert!(matches!(err, BlockError::InvalidAttemptsType));

        let err = GuardConfig::from_value(json!({ "attempts": 2.5 })).unwrap_err();
        assert!(matches!(err, BlockError::InvalidAttemptsType));
    }

    #[test]
    fn test_from_value_negative_attempts_out_of_range() {
        let err = GuardConfig::from_value(json!({ "maxAttempts": -1 })).unwrap_err();
        assert!(matches!(err, BlockError::AttemptsOutOfRange { actual: -1, .. }));
    }

    #[test]
    fn test_from_value_accepts_aliases() {
        let config = GuardConfig::from_value(json!({
            "interval": 20000,
            "attempts": 5,
            "error": { "msg": "custom", "isFail": true },
        }))
        .unwrap();

        assert_eq!(config.window_ms, 20_000);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.error_payload, json!({ "msg": "custom", "isFail": true }));
    }

    #[test]
    fn test_from_value_null_means_default() {
        let config = GuardConfig::from_value(json!({ "window_ms": null })).unwrap();
        assert_eq!(config.window_ms, DEFAULT_WINDOW_MS);

        let config = GuardConfig::from_value(Value::Null).unwrap();
        assert_eq!(config, GuardConfig::default());
    }

    #[test]
    fn test_from_value_rejects_non_mapping() {
        assert!(matches!(
            GuardConfig::from_value(json!(4000)),
            Err(BlockError::Config(_))
        ));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
window_ms: 15000
max_attempts: 3
error_payload: "slow down"
sweep_interval_ms: 2500
"#;
        let config = GuardConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.window(), Duration::from_millis(15_000));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.error_payload, json!("slow down"));
        assert_eq!(config.sweep_interval(), Duration::from_millis(2500));
    }

    #[test]
    fn test_from_yaml_below_floor() {
        let err = GuardConfig::from_yaml("window_ms: 1000").unwrap_err();
        assert!(matches!(err, BlockError::WindowBelowFloor { actual: 1000, .. }));
    }

    #[test]
    fn test_invalid_cookie_name_rejected() {
        let config = GuardConfig {
            cookie_name: "bad name".to_string(),
            ..GuardConfig::default()
        };
        assert!(matches!(config.validate(), Err(BlockError::Config(_))));
    }

    #[test]
    fn test_block_status_must_be_client_error() {
        let config = GuardConfig {
            block_status: 503,
            ..GuardConfig::default()
        };
        assert!(matches!(config.validate(), Err(BlockError::Config(_))));
    }

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(source))
    }

    fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        std::io::Write::write_all(&mut file, contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = GuardConfig::from_value(json!({ "windw_ms": 20000 })).unwrap_err();
        assert!(matches!(err, BlockError::Config(ref msg) if msg.contains("windw_ms")));
    }

    #[test]
    fn test_option_given_twice_rejected() {
        let err = GuardConfig::from_value(json!({ "window_ms": 20000, "windowMs": 30000 })).unwrap_err();
        assert!(matches!(err, BlockError::Config(ref msg) if msg.contains("more than once")));
    }

    #[test]
    fn test_case_folded_keys_recognized() {
        let config = GuardConfig::from_value(json!({ "windowms": 20000, "MAX_ATTEMPTS": 4 })).unwrap();
        assert_eq!(config.window_ms, 20_000);
        assert_eq!(config.max_attempts, 4);
    }

    #[test]
    fn test_from_file_camel_case() {
        let file = yaml_file("windowMs: 15000\nmaxAttempts: 5\nerrorPayload: slow down\n");
        let config = GuardConfig::from_file(file.path()).unwrap();

        assert_eq!(config.window_ms, 15_000);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.error_payload, json!("slow down"));
    }

    #[test]
    fn test_from_file_invalid_window() {
        let file = yaml_file("windowMs: 1000\n");
        let err = GuardConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, BlockError::WindowBelowFloor { actual: 1000, .. }));
    }

    #[test]
    fn test_from_file_missing() {
        let err = GuardConfig::from_file("/nonexistent/block-ddos.yaml").unwrap_err();
        assert!(matches!(err, BlockError::Io(_)));
    }

    #[test]
    fn test_load_file_keeps_camel_case() {
        let file = yaml_file("windowMs: 1000\nmaxAttempts: 5\n");
        let err = GuardConfig::load_layered(Some(file.path()), env(&[])).unwrap_err();
        assert!(matches!(err, BlockError::WindowBelowFloor { actual: 1000, .. }));

        let file = yaml_file("windowMs: 20000\nmaxAttempts: 5\ncookieName: blocked\n");
        let config = GuardConfig::load_layered(Some(file.path()), env(&[])).unwrap();
        assert_eq!(config.window_ms, 20_000);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.cookie_name, "blocked");
    }

    #[test]
    fn test_load_env_overrides_file() {
        let file = yaml_file("windowMs: 20000\nmaxAttempts: 5\n");
        let config = GuardConfig::load_layered(
            Some(file.path()),
            env(&[("BLOCK_DDOS_WINDOW_MS", "30000"), ("BLOCK_DDOS_COOKIE_CEILING", "3")]),
        )
        .unwrap();

        assert_eq!(config.window_ms, 30_000);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.cookie_ceiling, 3);
    }

    #[test]
    fn test_load_env_only() {
        let config = GuardConfig::load_layered(None, env(&[])).unwrap();
        assert_eq!(config, GuardConfig::default());

        let err = GuardConfig::load_layered(None, env(&[("BLOCK_DDOS_WINDOW_MS", "1000")])).unwrap_err();
        assert!(matches!(err, BlockError::WindowBelowFloor { actual: 1000, .. }));

        let err = GuardConfig::load_layered(None, env(&[("BLOCK_DDOS_MAX_ATTEMPTS", "many")])).unwrap_err();
        assert!(matches!(err, BlockError::InvalidAttemptsType));
    }

    #[test]
    fn test_load_unknown_option_in_file() {
        let file = yaml_file("windowMillis: 20000\n");
        let err = GuardConfig::load_layered(Some(file.path()), env(&[])).unwrap_err();
        assert!(matches!(err, BlockError::Config(_)));
    }
}
