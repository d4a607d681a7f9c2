use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to estimate entry size: {0}")]
    SizeEstimate(#[from] serde_json::Error),
}
