//! The full-text mirror of the parts set, backed by an embedded tantivy
//! index. The mirror is best-effort: indexing failures never fail a sync
//! whose primary write succeeded, and readers fall back to the primary
//! store while the index is empty.

mod index;
mod query;

pub use index::{PartIndex, SearchError};
