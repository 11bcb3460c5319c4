use std::{env, path::PathBuf, time::Duration};
use tracing::warn;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_API_PREFIX: &str = "/api";
pub const DEFAULT_SESSION_PATH: &str = "data/session.json";

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_RETRY_BASE_MS: u64 = 1_000;
pub const DEFAULT_RETRY_MAX_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_prefix: String,
    pub session_path: PathBuf,
    pub counter: CounterSettings,
    pub request_timeout: Duration,
}

/// Timing knobs for the optimistic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSettings {
    pub debounce: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub max_retries: u32,
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            retry_base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            retry_max: Duration::from_millis(DEFAULT_RETRY_MAX_MS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl CounterSettings {
    /// Delay before retry number `attempt` (1-based): doubles from
    /// `retry_base`, capped at `retry_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.retry_base
            .saturating_mul(1u32 << shift)
            .min(self.retry_max)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            session_path: PathBuf::from(DEFAULT_SESSION_PATH),
            counter: CounterSettings::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `var` knows about. Numbers that do
    /// not parse leave the default in place.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = var("JAPA_API_URL") {
            config.base_url = url;
        }
        if let Some(path) = var("JAPA_SESSION_PATH") {
            config.session_path = PathBuf::from(path);
        }
        match var("JAPA_DEBOUNCE_MS").map(|value| value.parse::<u64>()) {
            Some(Ok(ms)) => config.counter.debounce = Duration::from_millis(ms),
            Some(Err(err)) => warn!("ignoring JAPA_DEBOUNCE_MS: {err}"),
            None => {}
        }
        config
    }

    pub fn api_base(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.api_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_base_joins_prefix() {
        let mut config = ClientConfig::default();
        assert_eq!(config.api_base(), "http://localhost:8080/api");

        config.base_url = "https://japa.example.org/".into();
        assert_eq!(config.api_base(), "https://japa.example.org/api");
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    #[test]
    fn env_overrides_defaults() {
        let config = ClientConfig::from_vars(vars(&[
            ("JAPA_API_URL", "https://japa.example.org"),
            ("JAPA_SESSION_PATH", "/tmp/japa.json"),
            ("JAPA_DEBOUNCE_MS", "250"),
        ]));
        assert_eq!(config.base_url, "https://japa.example.org");
        assert_eq!(config.session_path, PathBuf::from("/tmp/japa.json"));
        assert_eq!(config.counter.debounce, Duration::from_millis(250));
    }

    #[test]
    fn unparseable_debounce_keeps_default() {
        let config = ClientConfig::from_vars(vars(&[("JAPA_DEBOUNCE_MS", "abc")]));
        assert_eq!(config.counter.debounce, Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let settings = CounterSettings::default();
        assert_eq!(settings.backoff(1), Duration::from_secs(1));
        assert_eq!(settings.backoff(2), Duration::from_secs(2));
        assert_eq!(settings.backoff(4), Duration::from_secs(8));
        assert_eq!(settings.backoff(6), Duration::from_secs(30));
        assert_eq!(settings.backoff(40), Duration::from_secs(30));
    }
}
