//! Sketch feature extractor: network definition, weights and inference runtime.

mod auxiliary;
pub mod backend;
mod inception;
mod layers;
mod mode;
mod network;
mod runtime;
pub mod weights;

pub use backend::{BACKEND_ENV, ComputeBackend, resolve_backend};
pub use mode::ForwardMode;
pub use network::{SketchNet, SketchNetConfig, SketchNetOutput, check_input_dims};
pub use runtime::{
    SharedSketchModel, SketchModel, SketchPrediction, init_sketch_model, install_sketch_model,
    reset_sketch_model, with_sketch_model,
};
pub use weights::{bundle_exists, load_weights, save_weights};

use crate::error::RetrievalError;
use crate::preprocess::SketchImage;

/// Identifier stored in weight manifests; embeddings from different ids are not comparable.
pub const SKETCH_MODEL_ID: &str = "sketchnet_inception__in224__emb256__v1";
/// Side length of the square network input.
pub const INPUT_SIZE: usize = 224;
/// Colour channels of the network input.
pub const INPUT_CHANNELS: usize = 3;
/// Length of the embedding vector.
pub const EMBEDDING_DIM: usize = 256;
/// Category count of the shipped icon set.
pub const DEFAULT_CLASS_NUM: usize = 66;

/// Anything that turns prepared sketches into embedding rows.
pub trait SketchEmbedder {
    /// Embed every image, returning one row of [`SketchEmbedder::embedding_dim`] values each.
    fn embed_batch(&self, images: &[SketchImage]) -> Result<Vec<Vec<f32>>, RetrievalError>;

    fn embedding_dim(&self) -> usize {
        EMBEDDING_DIM
    }
}
