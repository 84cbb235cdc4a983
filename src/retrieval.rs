//! End-to-end sketch retrieval: embed a prepared sketch, rank the index.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::{AppSettings, IndexSettings};
use crate::error::RetrievalError;
use crate::index::{EmbeddingIndex, IconRecord, IndexSource, build_index, load_index, scan_icon_tree};
use crate::model::{SharedSketchModel, SketchEmbedder, init_sketch_model};
use crate::preprocess::SketchImage;
use crate::search::{ScoredIcon, top_k, top_k_scored};

/// A read-only embedder/index pair; safe to share across threads.
pub struct Retriever<E = SharedSketchModel> {
    embedder: E,
    index: Arc<EmbeddingIndex>,
}

impl<E: SketchEmbedder> Retriever<E> {
    /// Pair `embedder` with `index`; a non-empty index must match the embedding length.
    pub fn new(embedder: E, index: Arc<EmbeddingIndex>) -> Result<Self, RetrievalError> {
        if !index.is_empty() && index.dim() != embedder.embedding_dim() {
            return Err(RetrievalError::DimensionMismatch {
                expected: index.dim(),
                actual: embedder.embedding_dim(),
            });
        }
        Ok(Self { embedder, index })
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    /// Embedding of one prepared sketch.
    pub fn embed(&self, sketch: &SketchImage) -> Result<Vec<f32>, RetrievalError> {
        self.embedder
            .embed_batch(std::slice::from_ref(sketch))?
            .pop()
            .ok_or_else(|| RetrievalError::Inference("embedder returned no rows".into()))
    }

    /// The `k` icons closest to `sketch`, nearest first.
    pub fn embed_and_rank(
        &self,
        sketch: &SketchImage,
        k: usize,
    ) -> Result<Vec<IconRecord>, RetrievalError> {
        if k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let query = self.embed(sketch)?;
        let found = top_k(&query, &self.index, k)?;
        debug!(
            "Ranked {} icons for sketch in {:.2?}",
            self.index.len(),
            started.elapsed()
        );
        Ok(found)
    }

    /// Like [`Retriever::embed_and_rank`] with distances attached.
    pub fn embed_and_rank_scored(
        &self,
        sketch: &SketchImage,
        k: usize,
    ) -> Result<Vec<ScoredIcon>, RetrievalError> {
        if k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.embed(sketch)?;
        top_k_scored(&query, &self.index, k)
    }
}

/// Load a saved index, or build one from an icon tree and persist it.
pub fn build_or_reload_index(
    source: &IndexSource,
    embedder: &impl SketchEmbedder,
    settings: &IndexSettings,
) -> Result<EmbeddingIndex, RetrievalError> {
    match source {
        IndexSource::Saved(dir) => load_index(dir),
        IndexSource::IconTree { root } => {
            let records = scan_icon_tree(root)?;
            info!("Found {} reference icons under {}", records.len(), root.display());
            let index = build_index(embedder, root, records, settings.build_batch)?;
            index.save(&settings.resolved_dir()?)?;
            Ok(index)
        }
    }
}

static SERVING: OnceLock<Retriever> = OnceLock::new();

/// Load the shared model and the saved index once for the whole process.
///
/// Weight and index corruption errors are returned and must abort startup.
/// A missing index is served as empty with a warning.
pub fn start_serving(settings: &AppSettings) -> Result<&'static Retriever, RetrievalError> {
    if let Some(retriever) = SERVING.get() {
        return Ok(retriever);
    }
    init_sketch_model(&settings.model)?;
    let embedder = SharedSketchModel::new(settings.model.clone());
    let index = match load_index(&settings.index.resolved_dir()?) {
        Ok(index) => index,
        Err(err) if err.degrades_to_empty() => {
            warn!("{err}; serving an empty index");
            EmbeddingIndex::empty(embedder.embedding_dim())
        }
        Err(err) => return Err(err),
    };
    info!("Serving {} indexed icons", index.len());
    let retriever = Retriever::new(embedder, Arc::new(index))?;
    Ok(SERVING.get_or_init(|| retriever))
}

/// The process-wide retriever, if [`start_serving`] has run.
pub fn serving() -> Option<&'static Retriever> {
    SERVING.get()
}

/// Rank `sketch` against the process-wide index.
pub fn embed_and_rank(sketch: &SketchImage, k: usize) -> Result<Vec<IconRecord>, RetrievalError> {
    serving()
        .ok_or_else(|| RetrievalError::IndexUnavailable("serving has not started".into()))?
        .embed_and_rank(sketch, k)
}
