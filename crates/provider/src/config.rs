use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the provisioning API.
#[derive(Clone)]
pub struct ProviderConfig {
    /// Scheme and host, e.g. `https://api.esimaccess.com`.
    pub base_url: String,
    pub access_code: String,
    pub secret_key: String,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(
        base_url: impl Into<String>,
        access_code: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_code: access_code.into(),
            secret_key: secret_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("access_code", &self.access_code)
            .field("secret_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}
