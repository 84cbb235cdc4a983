//! Precomputed icon embeddings: identity records, persistence and offline build.

mod build;
mod record;
mod store;

pub use build::{IndexSource, build_index, scan_icon_tree};
pub use record::IconRecord;
pub use store::{EmbeddingIndex, ICON_FEATURES_FILE, ICON_INFO_FILE, index_files, load_index};
