use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinterError>;

#[derive(Error, Debug)]
pub enum LinterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to spawn linter: {0}")]
    Spawn(String),

    #[error("lint request timed out after {0} ms")]
    Timeout(u64),

    #[error("lint request waited more than {0} ms for a slot")]
    QueueTimeout(u64),

    #[error("linter pool is shutting down")]
    ShuttingDown,

    #[error("linter exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("linter output was not parseable: {0}")]
    Parse(String),
}
