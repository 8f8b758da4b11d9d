use reqwest::Client;
use std::time::Duration;

/// Outbound HTTP client settings shared by the model and database clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        // Model completions routinely take tens of seconds.
        Self {
            timeout_secs: 60,
            connect_timeout_secs: 5,
        }
    }
}

impl HttpSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout_secs: secs_from_env("HTTP_TIMEOUT_SECS").unwrap_or(defaults.timeout_secs),
            connect_timeout_secs: secs_from_env("HTTP_CONNECT_TIMEOUT_SECS")
                .unwrap_or(defaults.connect_timeout_secs),
        }
    }
}

fn secs_from_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

pub fn build_client(settings: &HttpSettings) -> Client {
    Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(settings.timeout_secs))
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .build()
        .unwrap_or_else(|_| Client::new())
}
