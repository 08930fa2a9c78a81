use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced at the consumer boundary
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("{0} already exists")]
    DuplicateKey(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type GeoResult<T> = Result<T, GeoError>;

impl From<StorageError> for GeoError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateKey(cidr) => GeoError::DuplicateKey(cidr),
            StorageError::NotFound(cidr) => GeoError::NotFound(cidr),
            // Partial composites look the same as absent ones to callers
            StorageError::IncompleteComposite { cidr, .. } => GeoError::NotFound(cidr),
            e @ StorageError::MissingTable(_) => GeoError::Storage(e.into()),
            StorageError::Other(e) => GeoError::Storage(e),
        }
    }
}
