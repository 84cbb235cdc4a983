use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use ndarray_npy::{read_npy, write_npy};
use tracing::{debug, info};

use super::record::IconRecord;
use crate::error::RetrievalError;

/// Icon metadata table, row-aligned with the feature table.
pub const ICON_INFO_FILE: &str = "icon_info.json";
/// Embedding table, one `f32` row per icon.
pub const ICON_FEATURES_FILE: &str = "icon_features.npy";

/// Row-aligned icon records and embeddings.
///
/// Rows never move once built; growing the set produces a new index through
/// [`EmbeddingIndex::extended`].
#[derive(Clone, Debug)]
pub struct EmbeddingIndex {
    records: Vec<IconRecord>,
    embeddings: Array2<f32>,
    lookup: HashMap<IconRecord, usize>,
}

impl EmbeddingIndex {
    /// Pair `records[i]` with `embeddings.row(i)`.
    pub fn new(records: Vec<IconRecord>, embeddings: Array2<f32>) -> Result<Self, RetrievalError> {
        if records.len() != embeddings.nrows() {
            return Err(RetrievalError::InvalidIndex(format!(
                "{} icon records but {} embedding rows",
                records.len(),
                embeddings.nrows()
            )));
        }
        let lookup = build_lookup(&records)?;
        let embeddings = if embeddings.is_standard_layout() {
            embeddings
        } else {
            embeddings.as_standard_layout().into_owned()
        };
        Ok(Self {
            records,
            embeddings,
            lookup,
        })
    }

    /// Build from `(record, embedding)` rows that must all be `dim` long.
    pub fn from_rows(
        dim: usize,
        rows: impl IntoIterator<Item = (IconRecord, Vec<f32>)>,
    ) -> Result<Self, RetrievalError> {
        let mut records = Vec::new();
        let mut flat = Vec::new();
        for (record, embedding) in rows {
            if embedding.len() != dim {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dim,
                    actual: embedding.len(),
                });
            }
            records.push(record);
            flat.extend_from_slice(&embedding);
        }
        let embeddings = Array2::from_shape_vec((records.len(), dim), flat)
            .map_err(|err| RetrievalError::InvalidIndex(err.to_string()))?;
        Self::new(records, embeddings)
    }

    /// An index with no rows; every query against it returns nothing.
    pub fn empty(dim: usize) -> Self {
        Self {
            records: Vec::new(),
            embeddings: Array2::zeros((0, dim)),
            lookup: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Embedding length shared by every row.
    pub fn dim(&self) -> usize {
        self.embeddings.ncols()
    }

    pub fn records(&self) -> &[IconRecord] {
        &self.records
    }

    pub fn record(&self, row: usize) -> Option<&IconRecord> {
        self.records.get(row)
    }

    pub fn embedding(&self, row: usize) -> Option<ArrayView1<'_, f32>> {
        (row < self.len()).then(|| self.embeddings.row(row))
    }

    pub fn embeddings(&self) -> ArrayView2<'_, f32> {
        self.embeddings.view()
    }

    /// Row of `record`, if present.
    pub fn position(&self, record: &IconRecord) -> Option<usize> {
        self.lookup.get(record).copied()
    }

    /// New index with `rows` appended after the existing ones.
    pub fn extended(
        &self,
        rows: impl IntoIterator<Item = (IconRecord, Vec<f32>)>,
    ) -> Result<Self, RetrievalError> {
        let addition = Self::from_rows(self.dim(), rows)?;
        if let Some(duplicate) = addition
            .records
            .iter()
            .find(|record| self.lookup.contains_key(*record))
        {
            return Err(RetrievalError::InvalidIndex(format!(
                "icon {duplicate} is already indexed"
            )));
        }
        let mut records = self.records.clone();
        records.extend(addition.records);
        let embeddings = ndarray::concatenate(
            Axis(0),
            &[self.embeddings.view(), addition.embeddings.view()],
        )
        .map_err(|err| RetrievalError::InvalidIndex(err.to_string()))?;
        Self::new(records, embeddings)
    }

    /// Write `icon_info.json` and `icon_features.npy` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), RetrievalError> {
        std::fs::create_dir_all(dir)
            .map_err(|source| RetrievalError::io("Failed to create index directory", dir, source))?;
        let info_path = dir.join(ICON_INFO_FILE);
        let data = serde_json::to_vec_pretty(&self.records)
            .map_err(|err| RetrievalError::InvalidIndex(format!("failed to encode icon records: {err}")))?;
        std::fs::write(&info_path, data)
            .map_err(|source| RetrievalError::io("Failed to write icon records", &info_path, source))?;
        let features_path = dir.join(ICON_FEATURES_FILE);
        write_npy(&features_path, &self.embeddings).map_err(|err| RetrievalError::Npy {
            path: features_path.clone(),
            reason: err.to_string(),
        })?;
        info!("Saved embedding index with {} icons to {}", self.len(), dir.display());
        Ok(())
    }

    /// Read an index previously written by [`EmbeddingIndex::save`].
    pub fn load(dir: &Path) -> Result<Self, RetrievalError> {
        let (info_path, features_path) = index_files(dir);
        if !info_path.is_file() || !features_path.is_file() {
            return Err(RetrievalError::IndexUnavailable(format!(
                "no index files in {}",
                dir.display()
            )));
        }
        let bytes = std::fs::read(&info_path)
            .map_err(|source| RetrievalError::io("Failed to read icon records", &info_path, source))?;
        let records: Vec<IconRecord> = serde_json::from_slice(&bytes).map_err(|err| {
            RetrievalError::InvalidIndex(format!("{}: {err}", info_path.display()))
        })?;
        let embeddings: Array2<f32> = read_npy(&features_path).map_err(|err| RetrievalError::Npy {
            path: features_path.clone(),
            reason: err.to_string(),
        })?;
        let index = Self::new(records, embeddings)?;
        debug!(
            "Loaded embedding index from {}: {} rows x {} dims",
            dir.display(),
            index.len(),
            index.dim()
        );
        Ok(index)
    }
}

/// Load the persisted index in `dir`.
pub fn load_index(dir: &Path) -> Result<EmbeddingIndex, RetrievalError> {
    EmbeddingIndex::load(dir)
}

/// Paths of the metadata and feature tables inside `dir`.
pub fn index_files(dir: &Path) -> (PathBuf, PathBuf) {
    (dir.join(ICON_INFO_FILE), dir.join(ICON_FEATURES_FILE))
}

fn build_lookup(records: &[IconRecord]) -> Result<HashMap<IconRecord, usize>, RetrievalError> {
    let mut lookup = HashMap::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
        if lookup.insert(record.clone(), row).is_some() {
            return Err(RetrievalError::InvalidIndex(format!(
                "duplicate icon {record}"
            )));
        }
    }
    Ok(lookup)
}
