use crate::model::{BucketAddress, CollectionId};
use eyre::Report;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    // Remote calls, retried on the next cycle
    #[error("directory fetch failed: {0}")]
    Directory(Report),
    #[error("bucket lookup for {collection} failed: {reason}")]
    BucketLookup { collection: CollectionId, reason: Report },
    #[error("transaction fetch from bucket {bucket} failed: {reason}")]
    TransactionFetch { bucket: BucketAddress, reason: Report },

    // State store
    #[error("state store io: {0}")]
    Persistence(#[from] std::io::Error),
    #[error("state serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Remote failures are never fatal; the owning loop retries them.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Directory(_) | Self::BucketLookup { .. } | Self::TransactionFetch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = SyncError::BucketLookup { collection: CollectionId::new("abc"), reason: eyre::eyre!("timeout") };
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "bucket lookup for abc failed: timeout");

        let err = SyncError::Config("feed_limit must be positive".to_string());
        assert!(!err.is_transient());
    }
}
