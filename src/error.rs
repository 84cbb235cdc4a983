//! Error type shared by the embedding, index and search layers.

use std::path::PathBuf;

use thiserror::Error;

use crate::app_dirs::AppDirError;

/// Where a mismatched shape came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeOrigin {
    /// A stored weight tensor or its manifest.
    Weights,
    /// A request image or batch.
    Input,
    /// A tensor produced by the network at inference time.
    Output,
}

/// Failures raised by the retrieval core.
///
/// Structural errors (weights, architecture, index files) abort startup.
/// Per-request errors (a bad sketch, a mismatched query) are returned to the
/// caller and leave the serving process running.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// An input image or a weight tensor does not match the declared architecture.
    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Which side of the model the shape belongs to.
        origin: ShapeOrigin,
        /// Which tensor or input was checked.
        what: String,
        /// Shape required by the architecture.
        expected: Vec<usize>,
        /// Shape that was supplied.
        actual: Vec<usize>,
    },
    /// Query embedding length differs from the index embedding length.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Embedding length stored in the index.
        expected: usize,
        /// Embedding length of the query.
        actual: usize,
    },
    /// No index is loaded for serving.
    #[error("Embedding index unavailable: {0}")]
    IndexUnavailable(String),
    /// Network weights could not be read.
    #[error("Failed to load network weights from {path}: {reason}")]
    WeightLoadFailure {
        /// Weight bundle path without extension.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },
    /// Persisted index files are inconsistent (row counts, duplicates).
    #[error("Invalid embedding index: {0}")]
    InvalidIndex(String),
    /// Pixel data outside the normalized range or otherwise unusable.
    #[error("Invalid sketch image: {0}")]
    InvalidImage(String),
    /// Image decode or encode failed.
    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),
    /// Filesystem access failed.
    #[error("{context} ({path}): {source}")]
    Io {
        /// What was being attempted.
        context: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Reading or writing the `.npy` embedding table failed.
    #[error("Embedding table error ({path}): {reason}")]
    Npy {
        /// Table path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },
    /// Application directories could not be resolved.
    #[error(transparent)]
    AppDir(#[from] AppDirError),
    /// Inference backend produced unusable output.
    #[error("Inference failed: {0}")]
    Inference(String),
}

impl RetrievalError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn shape(
        origin: ShapeOrigin,
        what: impl Into<String>,
        expected: &[usize],
        actual: &[usize],
    ) -> Self {
        Self::ShapeMismatch {
            origin,
            what: what.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// True when the error must prevent the process from serving requests.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::WeightLoadFailure { .. }
            | Self::InvalidIndex(_)
            | Self::Npy { .. }
            | Self::AppDir(_) => true,
            Self::ShapeMismatch { origin, .. } => *origin == ShapeOrigin::Weights,
            _ => false,
        }
    }

    /// True when the caller should answer with an empty result instead of failing.
    pub fn degrades_to_empty(&self) -> bool {
        matches!(self, Self::IndexUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_errors_are_fatal_request_errors_are_not() {
        let weights = RetrievalError::WeightLoadFailure {
            path: PathBuf::from("models/sketchnet"),
            reason: "missing".into(),
        };
        assert!(weights.is_fatal());
        assert!(RetrievalError::shape(ShapeOrigin::Weights, "classifier", &[256, 66], &[256, 10]).is_fatal());
        assert!(!RetrievalError::shape(ShapeOrigin::Input, "sketch", &[3, 224, 224], &[3, 100, 100]).is_fatal());
        assert!(!RetrievalError::shape(ShapeOrigin::Output, "weights-like name", &[1, 256], &[1, 2]).is_fatal());
        let dim = RetrievalError::DimensionMismatch {
            expected: 256,
            actual: 2,
        };
        assert!(!dim.is_fatal());
        assert!(!dim.degrades_to_empty());
    }

    #[test]
    fn app_dir_errors_convert_and_abort() {
        let err: RetrievalError = AppDirError::NoBaseDir.into();
        assert!(err.is_fatal());
        assert!(!err.degrades_to_empty());
    }

    #[test]
    fn unavailable_index_degrades() {
        let err = RetrievalError::IndexUnavailable("not loaded".into());
        assert!(err.degrades_to_empty());
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("not loaded"));
    }
}
