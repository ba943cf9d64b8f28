//! Core codebook data structures

mod book;
mod entry;
mod export;


pub use book::{Codebook, CodebookError, CodebookResult};
pub use entry::{CanonicalCode, CodeId, RelabelPolicy, SynonymCount, SynonymLabels};
pub use export::{CodebookExport, ExportedCode};
