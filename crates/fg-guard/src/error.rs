/// Error type for guard checks and status transports.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Check failed: {0}")]
    Check(String),
}
