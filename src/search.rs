//! Exact top-K retrieval over the embedding index.
//!
//! Distance is the per-dimension root-mean-square difference,
//! `sqrt(mean((q - row)^2))`, not the summed Euclidean norm. Equal distances
//! keep index row order.

use ndarray::{ArrayView1, ArrayView2};
use serde::Serialize;

use crate::error::RetrievalError;
use crate::index::{EmbeddingIndex, IconRecord};

/// One ranked index row.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    pub row: usize,
    pub distance: f32,
}

/// A ranked icon with its distance, for callers that display scores.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredIcon {
    pub category: String,
    pub filename: String,
    pub distance: f32,
}

/// Root-mean-square difference of two equally long vectors.
pub fn rms_distance(a: &[f32], b: &[f32]) -> Result<f32, RetrievalError> {
    if a.len() != b.len() {
        return Err(RetrievalError::DimensionMismatch {
            expected: b.len(),
            actual: a.len(),
        });
    }
    Ok(rms(a, ArrayView1::from(b)))
}

fn rms(query: &[f32], row: ArrayView1<'_, f32>) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let sum: f32 = query
        .iter()
        .zip(row.iter())
        .map(|(q, r)| {
            let diff = q - r;
            diff * diff
        })
        .sum();
    (sum / query.len() as f32).sqrt()
}

/// Distance to every row, sorted ascending; ties stay in row order.
pub fn rank_rows(query: &[f32], rows: ArrayView2<'_, f32>) -> Result<Vec<Neighbor>, RetrievalError> {
    if rows.nrows() == 0 {
        return Ok(Vec::new());
    }
    if query.len() != rows.ncols() {
        return Err(RetrievalError::DimensionMismatch {
            expected: rows.ncols(),
            actual: query.len(),
        });
    }
    let mut ranked: Vec<Neighbor> = rows
        .outer_iter()
        .enumerate()
        .map(|(row, values)| Neighbor {
            row,
            distance: rms(query, values),
        })
        .collect();
    ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    Ok(ranked)
}

/// The `k` nearest rows with distances, at most `index.len()` of them.
pub fn nearest(
    query: &[f32],
    index: &EmbeddingIndex,
    k: usize,
) -> Result<Vec<Neighbor>, RetrievalError> {
    if k == 0 || index.is_empty() {
        return Ok(Vec::new());
    }
    let mut ranked = rank_rows(query, index.embeddings())?;
    ranked.truncate(k);
    Ok(ranked)
}

/// Identifiers of the `k` icons closest to `query`, nearest first.
pub fn top_k(
    query: &[f32],
    index: &EmbeddingIndex,
    k: usize,
) -> Result<Vec<IconRecord>, RetrievalError> {
    Ok(nearest(query, index, k)?
        .into_iter()
        .filter_map(|neighbor| index.record(neighbor.row).cloned())
        .collect())
}

/// Like [`top_k`] but keeps the distance next to each identifier.
pub fn top_k_scored(
    query: &[f32],
    index: &EmbeddingIndex,
    k: usize,
) -> Result<Vec<ScoredIcon>, RetrievalError> {
    Ok(nearest(query, index, k)?
        .into_iter()
        .filter_map(|neighbor| {
            index.record(neighbor.row).map(|record| ScoredIcon {
                category: record.category.clone(),
                filename: record.filename.clone(),
                distance: neighbor.distance,
            })
        })
        .collect())
}
