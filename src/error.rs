#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("Data not found: {0}")]
    DataNotFound(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Notification error: {0}")]
    Notification(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Errors that abandon a single watcher cycle and are retried on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::RemoteUnavailable(_) | AppError::DataNotFound(_)
        )
    }
}
