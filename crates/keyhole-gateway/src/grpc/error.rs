use keyhole_core::{CoreError, ShortenerError, StorageError};
use keyhole_proto_schema::v1::ConversionError;
use thiserror::Error;
use tonic::{Code, Status};
use tracing::error;

#[derive(Debug, Error)]
pub enum GrpcError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("short code not found")]
    NotFound,
    #[error("missing user id")]
    Unauthenticated,
    #[error("client is not trusted")]
    PermissionDenied,
    #[error(transparent)]
    Shortener(#[from] ShortenerError),
}

impl From<ConversionError> for GrpcError {
    fn from(error: ConversionError) -> Self {
        GrpcError::InvalidArgument(error.to_string())
    }
}

impl From<CoreError> for GrpcError {
    fn from(error: CoreError) -> Self {
        GrpcError::Shortener(error.into())
    }
}

impl From<StorageError> for GrpcError {
    fn from(error: StorageError) -> Self {
        GrpcError::Shortener(error.into())
    }
}

impl From<GrpcError> for Status {
    fn from(error: GrpcError) -> Self {
        match error {
            GrpcError::InvalidArgument(message) => Status::new(Code::InvalidArgument, message),
            GrpcError::NotFound => Status::new(Code::NotFound, "short code not found"),
            GrpcError::Unauthenticated => Status::new(Code::Unauthenticated, "missing user id"),
            GrpcError::PermissionDenied => {
                Status::new(Code::PermissionDenied, "client is not trusted")
            }
            GrpcError::Shortener(
                e @ (ShortenerError::InvalidUrl(_) | ShortenerError::InvalidShortCode(_)),
            ) => Status::new(Code::InvalidArgument, e.to_string()),
            GrpcError::Shortener(ShortenerError::Storage(e)) => storage_status(e),
        }
    }
}

fn storage_status(error: StorageError) -> Status {
    error!(error = %error, "rpc failed on storage");
    match error {
        StorageError::Unavailable(_) | StorageError::Timeout(_) | StorageError::Closed => {
            Status::new(Code::Unavailable, "storage unavailable")
        }
        _ => Status::new(Code::Internal, "internal server error"),
    }
}
