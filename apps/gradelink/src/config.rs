use crate::initiator::InitiatorSettings;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SESSION_STORE: &str = "http://127.0.0.1:8000";
pub const SESSION_STORE_ENV: &str = "GRADELINK_SESSION_STORE";
pub const ACCESS_TOKEN_ENV: &str = "GRADELINK_ACCESS_TOKEN";
pub const POLL_INTERVAL_ENV: &str = "GRADELINK_POLL_INTERVAL_MS";
pub const CONNECTION_LOST_ENV: &str = "GRADELINK_CONNECTION_LOST_AFTER";
pub const EXPIRY_GRACE_ENV: &str = "GRADELINK_EXPIRY_GRACE_SECS";

const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const DEFAULT_CONNECTION_LOST_AFTER: u32 = 3;
const DEFAULT_EXPIRY_GRACE_SECS: u64 = 60;
const DEFAULT_CREATE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    NotPositive { var: &'static str, value: String },
    #[error("{var} is not a valid integer: {value:?}")]
    NotInteger { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub session_store: String,
    pub access_token: Option<String>,
    pub poll_interval: Duration,
    pub connection_lost_after: u32,
    pub expiry_grace: Duration,
    pub create_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_store: DEFAULT_SESSION_STORE.to_string(),
            access_token: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            connection_lost_after: DEFAULT_CONNECTION_LOST_AFTER,
            expiry_grace: Duration::from_secs(DEFAULT_EXPIRY_GRACE_SECS),
            create_timeout: Duration::from_secs(DEFAULT_CREATE_TIMEOUT_SECS),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(store) = env_opt(SESSION_STORE_ENV) {
            config.session_store = store;
        }
        config.access_token = env_opt(ACCESS_TOKEN_ENV);
        if let Some(ms) = env_positive(POLL_INTERVAL_ENV)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(count) = env_positive(CONNECTION_LOST_ENV)? {
            config.connection_lost_after = u32::try_from(count).unwrap_or(u32::MAX);
        }
        // Zero grace is allowed: an unscanned code then stops polling with the countdown.
        if let Some(raw) = env_opt(EXPIRY_GRACE_ENV) {
            let secs = raw.parse::<u64>().map_err(|_| ConfigError::NotInteger {
                var: EXPIRY_GRACE_ENV,
                value: raw.clone(),
            })?;
            config.expiry_grace = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_session_store(mut self, store: Option<String>) -> Self {
        if let Some(store) = normalize(store) {
            self.session_store = store;
        }
        self
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        if let Some(token) = normalize(token) {
            self.access_token = Some(token);
        }
        self
    }

    pub fn initiator_settings(&self) -> InitiatorSettings {
        InitiatorSettings {
            poll_interval: self.poll_interval,
            connection_lost_after: self.connection_lost_after,
            expiry_grace: self.expiry_grace,
            create_timeout: self.create_timeout,
            ..InitiatorSettings::default()
        }
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_opt(var: &str) -> Option<String> {
    normalize(std::env::var(var).ok())
}

fn env_positive(var: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = env_opt(var) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::NotPositive { var, value: raw }),
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(ConfigError::NotInteger { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        SESSION_STORE_ENV,
        ACCESS_TOKEN_ENV,
        POLL_INTERVAL_ENV,
        CONNECTION_LOST_ENV,
        EXPIRY_GRACE_ENV,
    ];

    fn clear() {
        for var in VARS {
            // SAFETY: env tests are serialized.
            unsafe { std::env::remove_var(var) };
        }
    }

    fn set(var: &str, value: &str) {
        unsafe { std::env::set_var(var, value) };
    }

    #[test]
    #[serial]
    fn defaults_apply_without_environment() {
        clear();
        let config = Config::from_env().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.connection_lost_after, 3);
        assert_eq!(config.expiry_grace, Duration::from_secs(60));
        assert!(config.access_token.is_none());
    }

    #[test]
    #[serial]
    fn environment_overrides_defaults() {
        clear();
        set(SESSION_STORE_ENV, " grading.example.com ");
        set(ACCESS_TOKEN_ENV, "desk-token");
        set(POLL_INTERVAL_ENV, "250");
        set(CONNECTION_LOST_ENV, "5");
        set(EXPIRY_GRACE_ENV, "0");
        let config = Config::from_env().unwrap();
        clear();
        assert_eq!(config.session_store, "grading.example.com");
        assert_eq!(config.access_token.as_deref(), Some("desk-token"));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.connection_lost_after, 5);
        assert_eq!(config.expiry_grace, Duration::ZERO);

        let settings = config.initiator_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.connection_lost_after, 5);
    }

    #[test]
    #[serial]
    fn invalid_numbers_are_reported() {
        clear();
        set(POLL_INTERVAL_ENV, "0");
        assert_eq!(
            Config::from_env(),
            Err(ConfigError::NotPositive {
                var: POLL_INTERVAL_ENV,
                value: "0".into()
            })
        );
        set(POLL_INTERVAL_ENV, "soon");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::NotInteger { .. })
        ));
        clear();
    }

    #[test]
    fn flag_overrides_ignore_blank_values() {
        let config = Config::default()
            .with_session_store(Some("  ".into()))
            .with_access_token(Some(" tok ".into()));
        assert_eq!(config.session_store, DEFAULT_SESSION_STORE);
        assert_eq!(config.access_token.as_deref(), Some("tok"));
    }
}
