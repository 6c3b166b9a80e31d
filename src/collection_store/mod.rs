mod models;
mod schema;
mod store;
mod trait_def;

pub use models::{TokenMetadata, TokenScore, TRAIT_DIMENSIONS, TRAIT_DIMENSION_COUNT};
pub use store::SqliteCollectionStore;
pub use trait_def::{CollectionStore, StoreError};
