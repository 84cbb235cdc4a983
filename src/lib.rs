//! Sketch-to-icon retrieval: a multi-branch convolutional embedder, a
//! precomputed icon embedding index and exact nearest-neighbor ranking.

/// Application directory layout.
pub mod app_dirs;
/// Data-collection upload helpers.
pub mod collect;
/// TOML settings.
pub mod config;
/// Shared error type.
pub mod error;
/// Icon embedding index.
pub mod index;
/// Logging setup.
pub mod logging;
/// Metric-learning objectives.
pub mod loss;
/// Feature extractor network and runtime.
pub mod model;
/// Sketch preprocessing.
pub mod preprocess;
/// End-to-end retrieval and the serving resource.
pub mod retrieval;
/// Exact top-K search.
pub mod search;

pub use error::{RetrievalError, ShapeOrigin};
pub use index::{EmbeddingIndex, IconRecord};
pub use retrieval::{Retriever, build_or_reload_index, embed_and_rank};
pub use search::top_k;
