//! Decoder error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Truncated varint")]
    TruncatedVarint,

    #[error("Truncated field at tag {0}")]
    TruncatedField(u32),

    #[error("Unsupported wire type {0}")]
    UnsupportedWireType(u8),

    #[error("Invalid tag")]
    InvalidTag,

    #[error("Gzip error: {0}")]
    Gzip(#[from] std::io::Error),

    #[error("Prost decode error: {0}")]
    Prost(#[from] prost::DecodeError),
}

pub type ProtoResult<T> = Result<T, ProtoError>;
