use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors raised while building a [`ClientConfig`] from the environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is unset or blank.
    #[error("missing {0}")]
    Missing(&'static str),
    /// A variable is set but could not be parsed.
    #[error("invalid {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Configuration for the transport client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL every request path is joined onto (for example
    /// `https://vault.example.com/api`).
    pub base_url: String,
    /// Deadline for a whole JSON exchange. Streams are not bound by it.
    pub timeout: Duration,
    /// Limit on establishing the connection, for every request.
    pub connect_timeout: Duration,
    /// Longest silence tolerated between two reads of a response body.
    pub idle_timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl ClientConfig {
    /// Creates a config with default timeout and user agent.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            user_agent: concat!("vault-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Builds a config from `VAULT_API_URL`, with optional
    /// `VAULT_API_TIMEOUT_SECS` and `VAULT_API_IDLE_TIMEOUT_SECS` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("VAULT_API_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(ConfigError::Missing("VAULT_API_URL"));
        }
        let mut config = Self::new(base_url.trim());
        if let Ok(raw) = std::env::var("VAULT_API_TIMEOUT_SECS") {
            config.timeout = parse_timeout_secs("VAULT_API_TIMEOUT_SECS", &raw)?;
        }
        if let Ok(raw) = std::env::var("VAULT_API_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = parse_timeout_secs("VAULT_API_IDLE_TIMEOUT_SECS", &raw)?;
        }
        Ok(config)
    }

    /// Overrides the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the JSON exchange deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overrides the body read idle limit.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Overrides the `User-Agent` header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Joins `path` onto the base URL with exactly one separating slash.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn parse_timeout_secs(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::Invalid {
            var,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_for_normalizes_slashes() {
        let config = ClientConfig::new("http://localhost:8000/api/");
        assert_eq!(
            config.url_for("/chat/completions"),
            "http://localhost:8000/api/chat/completions"
        );
        assert_eq!(config.url_for("health"), "http://localhost:8000/api/health");
    }

    #[test]
    fn defaults_are_applied() {
        let config = ClientConfig::new("http://x");
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert!(config.user_agent.starts_with("vault-client/"));
    }

    #[test]
    fn timeout_parsing_rejects_zero_and_garbage() {
        assert_eq!(parse_timeout_secs("VAULT_API_IDLE_TIMEOUT_SECS", " 30 "), Ok(Duration::from_secs(30)));
        assert!(matches!(
            parse_timeout_secs("VAULT_API_IDLE_TIMEOUT_SECS", "0"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            parse_timeout_secs("VAULT_API_IDLE_TIMEOUT_SECS", "soon"),
            Err(ConfigError::Invalid { var: "VAULT_API_IDLE_TIMEOUT_SECS", .. })
        ));
    }
}
