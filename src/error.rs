use thiserror::Error;

/// Errors reported by a [`StorageArea`](crate::storage::StorageArea).
///
/// None of these ever reach the caller of a synced state. The facade turns
/// them into empty reads or in-memory fallbacks.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The storage object cannot be accessed at all (security policy,
    /// restrictive browsing mode).
    #[error("storage is not accessible")]
    Unavailable,
    /// The write would push the area over its quota.
    #[error("quota exceeded writing `{key}`: {needed} units needed, {quota} allowed")]
    QuotaExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },
    /// The platform rejected the write for another reason.
    #[error("storage rejected the write: {0}")]
    Rejected(String),
}

/// Errors reported by a [`Serializer`](crate::serializer::Serializer).
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid stored value: {0}")]
    Invalid(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
