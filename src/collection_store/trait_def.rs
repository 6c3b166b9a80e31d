//! CollectionStore trait definition.

use super::models::{TokenMetadata, TokenScore};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A batch insert hit a token that is already stored. The pipeline
    /// pre-filters against the missing set, so this is a data-integrity
    /// fault, not a condition to skip over.
    #[error("token {0} is already stored")]
    DuplicateToken(u32),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Trait for collection storage backends.
///
/// The store is the only component that touches SQL. Batch inserts commit
/// atomically; readers only ever observe fully committed batches.
pub trait CollectionStore: Send + Sync {
    // === Token metadata ===

    fn metadata_count(&self) -> Result<usize, StoreError>;

    /// Drop and recreate the records table (refresh).
    fn reset_metadata(&self) -> Result<(), StoreError>;

    /// Insert a batch of records in a single transaction, all or nothing.
    fn insert_metadata_batch(&self, records: &[TokenMetadata]) -> Result<(), StoreError>;

    /// Tokens in `[0, collection_size)` that have no stored record yet.
    fn missing_tokens(&self, collection_size: u32) -> Result<Vec<u32>, StoreError>;

    fn all_metadata(&self) -> Result<Vec<TokenMetadata>, StoreError>;

    /// Records that have no row in the scores table yet.
    fn unscored_metadata(&self) -> Result<Vec<TokenMetadata>, StoreError>;

    // === Token scores ===

    fn score_count(&self) -> Result<usize, StoreError>;

    /// Drop and recreate the scores table (refresh).
    fn reset_scores(&self) -> Result<(), StoreError>;

    /// Insert a batch of scores in a single transaction, all or nothing.
    fn insert_score_batch(&self, scores: &[TokenScore]) -> Result<(), StoreError>;

    fn all_scores(&self) -> Result<Vec<TokenScore>, StoreError>;

    fn score_for_token(&self, token: u32) -> Result<Option<TokenScore>, StoreError>;
}
