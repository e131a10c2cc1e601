pub type Result<T, E = DelayError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum DelayError {
    /// Malformed control topic, message is dropped and logged
    #[error("malformed control topic, {0}")]
    Parse(String),
    /// Publish/subscribe call against the broker failed
    #[error("transport error, {0}")]
    Transport(#[from] anyhow::Error),
}
