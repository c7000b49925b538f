use crate::acceptor::{CaptureError, ValidationFailure};
use crate::config::ConfigError;
use crate::encoder::EncodingError;
use crate::initiator::SessionCreationError;
use crate::store::StoreError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{} ({0})", .0.user_message())]
    Creation(#[from] SessionCreationError),
    #[error("{} ({0})", .0.user_message())]
    Validation(#[from] ValidationFailure),
    #[error("{} ({0})", .0.user_message())]
    Capture(#[from] CaptureError),
    #[error("could not render QR code: {0}")]
    Encoding(#[from] EncodingError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("logging initialization failed: {0}")]
    Logging(String),
    #[error("pairing code expired before a result arrived; generate a new code and try again")]
    Expired,
    #[error("grading failed; generate a new code and try again")]
    GradingFailed,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("background task failed: {0}")]
    Task(String),
}
