use thiserror::Error;

/// Errors returned by the provisioning API client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Credentials were refused, or the request could not be signed.
    #[error("Provider authentication failed: {0}")]
    Auth(String),

    /// The provider answered but rejected the request (`success: false`).
    #[error("Provider rejected request [{code}]: {message}")]
    Rejected { code: String, message: String },

    /// Network failure, timeout, unexpected HTTP status or undecodable body.
    #[error("Provider transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Application-level error code, for rejections.
    pub fn code(&self) -> Option<&str> {
        match self {
            ProviderError::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Returns true if repeating the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transport(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Transport(format!("request timed out: {err}"))
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Result type for provider calls.
pub type Result<T> = std::result::Result<T, ProviderError>;
