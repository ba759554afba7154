//! Book-layer error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BookError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed REST payload: {0}")]
    MalformedPayload(String),
}

pub type BookResult<T> = Result<T, BookError>;
