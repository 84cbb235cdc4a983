//! Named-tensor weight bundles with an architecture manifest.
//!
//! A bundle at `<path>` is two files: `<path>.mpk` (burn named MessagePack
//! record) and `<path>.json` (class count, embedding size, dropout). The
//! manifest is checked before any tensor is read so that a bundle trained for a
//! different `class_num` fails with a shape error instead of loading garbage.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::network::{SketchNet, SketchNetConfig};
use super::{EMBEDDING_DIM, SKETCH_MODEL_ID};
use crate::error::{RetrievalError, ShapeOrigin};

/// Extension burn's named MessagePack recorder appends to bundle paths.
pub const WEIGHTS_EXTENSION: &str = "mpk";
/// Extension of the architecture manifest.
pub const MANIFEST_EXTENSION: &str = "json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct WeightsManifest {
    model_id: String,
    class_num: usize,
    embedding_dim: usize,
    dropout: f64,
}

impl WeightsManifest {
    fn for_config(config: &SketchNetConfig) -> Self {
        Self {
            model_id: SKETCH_MODEL_ID.to_string(),
            class_num: config.class_num,
            embedding_dim: EMBEDDING_DIM,
            dropout: config.dropout,
        }
    }
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

pub fn weights_file(path: &Path) -> PathBuf {
    path.with_extension(WEIGHTS_EXTENSION)
}

pub fn manifest_file(path: &Path) -> PathBuf {
    path.with_extension(MANIFEST_EXTENSION)
}

/// True when both files of the bundle exist.
pub fn bundle_exists(path: &Path) -> bool {
    weights_file(path).is_file() && manifest_file(path).is_file()
}

/// Persist `model` and its manifest, creating parent directories.
pub fn save_weights<B: Backend>(
    model: &SketchNet<B>,
    config: &SketchNetConfig,
    path: &Path,
) -> Result<(), RetrievalError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|source| RetrievalError::io("Failed to create weights directory", parent, source))?;
    }
    model
        .clone()
        .save_file(path.to_path_buf(), &recorder())
        .map_err(|err| RetrievalError::WeightLoadFailure {
            path: path.to_path_buf(),
            reason: format!("failed to write weights: {err}"),
        })?;
    let manifest_path = manifest_file(path);
    let manifest = serde_json::to_vec_pretty(&WeightsManifest::for_config(config)).map_err(|err| {
        RetrievalError::WeightLoadFailure {
            path: path.to_path_buf(),
            reason: format!("failed to encode manifest: {err}"),
        }
    })?;
    std::fs::write(&manifest_path, manifest)
        .map_err(|source| RetrievalError::io("Failed to write weights manifest", manifest_path, source))?;
    info!("Saved sketch network weights to {}", weights_file(path).display());
    Ok(())
}

/// Load a bundle into a network built from `config`.
pub fn load_weights<B: Backend>(
    config: &SketchNetConfig,
    path: &Path,
    device: &B::Device,
) -> Result<SketchNet<B>, RetrievalError> {
    let failure = |reason: String| RetrievalError::WeightLoadFailure {
        path: path.to_path_buf(),
        reason,
    };
    let manifest_path = manifest_file(path);
    let weights_path = weights_file(path);
    if !weights_path.is_file() {
        return Err(failure(format!("{} not found", weights_path.display())));
    }
    let bytes = std::fs::read(&manifest_path)
        .map_err(|err| failure(format!("cannot read {}: {err}", manifest_path.display())))?;
    let manifest: WeightsManifest = serde_json::from_slice(&bytes)
        .map_err(|err| failure(format!("invalid manifest {}: {err}", manifest_path.display())))?;
    check_manifest(&manifest, config)?;

    let model = config
        .init::<B>(device)
        .load_file(path.to_path_buf(), &recorder(), device)
        .map_err(|err| failure(format!("failed to decode weights: {err}")))?;

    let expected = [EMBEDDING_DIM, config.class_num];
    let actual = model.classifier_dims();
    if actual != expected {
        return Err(RetrievalError::shape(ShapeOrigin::Weights, "classifier", &expected, &actual));
    }
    info!(
        "Loaded sketch network weights from {} ({} classes)",
        weights_path.display(),
        config.class_num
    );
    Ok(model)
}

fn check_manifest(manifest: &WeightsManifest, config: &SketchNetConfig) -> Result<(), RetrievalError> {
    if manifest.embedding_dim != EMBEDDING_DIM {
        return Err(RetrievalError::shape(
            ShapeOrigin::Weights,
            "embedding",
            &[EMBEDDING_DIM],
            &[manifest.embedding_dim],
        ));
    }
    if manifest.class_num != config.class_num {
        return Err(RetrievalError::shape(
            ShapeOrigin::Weights,
            "classifier",
            &[EMBEDDING_DIM, config.class_num],
            &[manifest.embedding_dim, manifest.class_num],
        ));
    }
    Ok(())
}
