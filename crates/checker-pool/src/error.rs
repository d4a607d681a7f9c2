use thiserror::Error;

pub type Result<T> = std::result::Result<T, CheckerError>;

#[derive(Error, Debug)]
pub enum CheckerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to spawn checker worker: {0}")]
    Spawn(String),

    #[error("checker request timed out after {0} ms")]
    Timeout(u64),

    #[error("checker worker exited while handling the request")]
    WorkerExited,

    #[error("checker pool is shutting down")]
    ShuttingDown,

    #[error("checker reported an error: {0}")]
    Analyzer(String),

    #[error("checker protocol error: {0}")]
    Protocol(String),
}
