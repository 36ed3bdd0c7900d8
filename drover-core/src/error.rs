pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed scenario document. Raised at load time, never during a run.
    #[error("invalid scenario spec ({scope}): {reason}")]
    InvalidSpec { scope: String, reason: String },

    #[error("scenario not found: `{0}`")]
    ConfigurationNotFound(String),

    /// Internal invariant violation; terminates the run.
    #[error("engine failure: {0}")]
    EngineFatal(String),

    #[error("failed to parse scenario document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn invalid_spec(scope: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            scope: scope.into(),
            reason: reason.into(),
        }
    }
}
