use fg_core::TranslateError;

/// Failure reported by the browser host or one of its APIs.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum HostError {
    #[error("{api} failed: {message}")]
    Api { api: &'static str, message: String },
    #[error("{0} is not available")]
    Unavailable(&'static str),
    #[error("Rule {id} is not in the format this backend installs")]
    RuleFormat { id: u32 },
}

impl HostError {
    pub fn api(api: &'static str, message: impl Into<String>) -> Self {
        Self::Api {
            api,
            message: message.into(),
        }
    }
}

/// Error type for grant handling and rule synchronization.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error("Grant duration must be at least one minute")]
    InvalidDuration,
    #[error("Failed to encode unlock grant: {0}")]
    Encode(#[from] serde_json::Error),
}
