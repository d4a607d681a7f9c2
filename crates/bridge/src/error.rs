use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("request superseded by a newer request for the same uri")]
    Superseded,

    #[error("bridge is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Checker(#[from] turbo_checker_pool::CheckerError),

    #[error(transparent)]
    Linter(#[from] turbo_linter_pool::LinterError),
}
