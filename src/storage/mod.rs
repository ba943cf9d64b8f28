//! Storage backends for codebooks
//!
//! Codebooks persist through the `CodebookStore` trait. `SqliteStore` is the
//! primary implementation; `JsonFileStore` keeps the whole state in one
//! human-readable file.

mod json;
mod sqlite;
mod traits;

pub use json::JsonFileStore;
pub use sqlite::SqliteStore;
pub use traits::{
    CachedEmbedding, CodebookState, CodebookStore, OpenStore, StorageError, StorageResult,
    StoredState, FORMAT_VERSION,
};
