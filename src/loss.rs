//! Training objectives for a metric-meaningful embedding space.
//!
//! All distances here are per-pair sums of squared differences. These
//! functions are used by offline training only; serving never calls them.

use std::fmt;
use std::str::FromStr;

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use thiserror::Error;

/// Margin used when a loss is selected by name.
pub const DEFAULT_MARGIN: f32 = 1.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LossError {
    #[error("Unknown loss '{0}', expected contrastive, siamese or triplet")]
    Unknown(String),
    #[error("{loss} loss cannot score a {batch} batch")]
    WrongBatchKind {
        loss: &'static str,
        batch: &'static str,
    },
    #[error("Batch shape mismatch: {expected:?} vs {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// Per-row `sum((a - b)^2)`, shape `[batch]`.
pub fn squared_distance<B: Backend>(a: Tensor<B, 2>, b: Tensor<B, 2>) -> Tensor<B, 1> {
    let [batch, _] = a.dims();
    let diff = a - b;
    (diff.clone() * diff).sum_dim(1).reshape([batch])
}

/// `mean(y * d^2 + (1 - y) * max(margin - d, 0)^2) / 2`, shape `[1]`.
///
/// `labels` is 1 for same-class pairs and 0 otherwise.
pub fn contrastive_loss<B: Backend>(
    sketches: Tensor<B, 2>,
    icons: Tensor<B, 2>,
    labels: Tensor<B, 1>,
    margin: f32,
) -> Tensor<B, 1> {
    let d = squared_distance(sketches, icons);
    let similar = labels.clone() * d.clone() * d.clone();
    let gap = d.mul_scalar(-1.0).add_scalar(margin).clamp_min(0.0);
    let dissimilar = complement(labels) * gap.clone() * gap;
    (similar + dissimilar).mean().div_scalar(2.0)
}

/// Shape of the exponential siamese penalty.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SiameseParams {
    pub q: f32,
}

impl Default for SiameseParams {
    fn default() -> Self {
        Self { q: 10.0 }
    }
}

impl SiameseParams {
    pub fn alpha(&self) -> f32 {
        2.0 / self.q
    }

    pub fn beta(&self) -> f32 {
        2.0 * self.q
    }

    pub fn gamma(&self) -> f32 {
        -2.77 / self.q
    }
}

/// `y * alpha * d^2 + (1 - y) * beta * exp(gamma * d)` per pair, shape `[batch]`.
///
/// Not reduced; the caller decides how to aggregate over the batch.
pub fn siamese_loss<B: Backend>(
    sketches: Tensor<B, 2>,
    icons: Tensor<B, 2>,
    labels: Tensor<B, 1>,
    params: SiameseParams,
) -> Tensor<B, 1> {
    let d = squared_distance(sketches, icons);
    let similar = (labels.clone() * d.clone() * d.clone()).mul_scalar(params.alpha());
    let dissimilar = complement(labels) * d.mul_scalar(params.gamma()).exp().mul_scalar(params.beta());
    similar + dissimilar
}

/// `sum(max(d(s, p) - d(s, n) + margin, 0))` over the batch, shape `[1]`.
pub fn triplet_loss<B: Backend>(
    sketches: Tensor<B, 2>,
    positives: Tensor<B, 2>,
    negatives: Tensor<B, 2>,
    margin: f32,
) -> Tensor<B, 1> {
    let positive = squared_distance(sketches.clone(), positives);
    let negative = squared_distance(sketches, negatives);
    (positive - negative).add_scalar(margin).clamp_min(0.0).sum()
}

/// `-mean(sum(labels * ln(clamp(probs, 1e-10, 1))))` for softmax outputs, shape `[1]`.
pub fn cross_entropy<B: Backend>(probs: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
    let [batch, _] = probs.dims();
    let log_probs = probs.clamp(1e-10, 1.0).log();
    (labels * log_probs)
        .sum_dim(1)
        .reshape([batch])
        .mean()
        .neg()
}

fn complement<B: Backend>(labels: Tensor<B, 1>) -> Tensor<B, 1> {
    labels.mul_scalar(-1.0).add_scalar(1.0)
}

/// Embeddings for one training step.
pub enum LossBatch<B: Backend> {
    /// Sketch/icon pairs with a 1/0 same-class label each.
    Pairs {
        sketches: Tensor<B, 2>,
        icons: Tensor<B, 2>,
        labels: Tensor<B, 1>,
    },
    /// Sketch, same-class icon and other-class icon.
    Triplets {
        sketches: Tensor<B, 2>,
        positives: Tensor<B, 2>,
        negatives: Tensor<B, 2>,
    },
}

impl<B: Backend> LossBatch<B> {
    fn kind(&self) -> &'static str {
        match self {
            Self::Pairs { .. } => "pair",
            Self::Triplets { .. } => "triplet",
        }
    }

    fn check_shapes(&self) -> Result<(), LossError> {
        let mismatch = |expected: &[usize], actual: &[usize]| LossError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        };
        match self {
            Self::Pairs {
                sketches,
                icons,
                labels,
            } => {
                let dims = sketches.dims();
                if icons.dims() != dims {
                    return Err(mismatch(&dims, &icons.dims()));
                }
                if labels.dims() != [dims[0]] {
                    return Err(mismatch(&[dims[0]], &labels.dims()));
                }
            }
            Self::Triplets {
                sketches,
                positives,
                negatives,
            } => {
                let dims = sketches.dims();
                for other in [positives.dims(), negatives.dims()] {
                    if other != dims {
                        return Err(mismatch(&dims, &other));
                    }
                }
            }
        }
        Ok(())
    }
}

/// The metric objective chosen for a training run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EmbeddingLoss {
    Contrastive { margin: f32 },
    Siamese(SiameseParams),
    Triplet { margin: f32 },
}

impl EmbeddingLoss {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Contrastive { .. } => "contrastive",
            Self::Siamese(_) => "siamese",
            Self::Triplet { .. } => "triplet",
        }
    }

    /// Score `batch`; siamese returns per-pair values, the others a single value.
    pub fn compute<B: Backend>(&self, batch: LossBatch<B>) -> Result<Tensor<B, 1>, LossError> {
        batch.check_shapes()?;
        match (*self, batch) {
            (
                Self::Contrastive { margin },
                LossBatch::Pairs {
                    sketches,
                    icons,
                    labels,
                },
            ) => Ok(contrastive_loss(sketches, icons, labels, margin)),
            (
                Self::Siamese(params),
                LossBatch::Pairs {
                    sketches,
                    icons,
                    labels,
                },
            ) => Ok(siamese_loss(sketches, icons, labels, params)),
            (
                Self::Triplet { margin },
                LossBatch::Triplets {
                    sketches,
                    positives,
                    negatives,
                },
            ) => Ok(triplet_loss(sketches, positives, negatives, margin)),
            (loss, batch) => Err(LossError::WrongBatchKind {
                loss: loss.name(),
                batch: batch.kind(),
            }),
        }
    }
}

impl FromStr for EmbeddingLoss {
    type Err = LossError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "contrastive" => Ok(Self::Contrastive {
                margin: DEFAULT_MARGIN,
            }),
            "siamese" => Ok(Self::Siamese(SiameseParams::default())),
            "triplet" => Ok(Self::Triplet {
                margin: DEFAULT_MARGIN,
            }),
            _ => Err(LossError::Unknown(value.to_string())),
        }
    }
}

impl fmt::Display for EmbeddingLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{ElementConversion, TensorData};

    type B = NdArray;

    fn matrix(values: &[f32], rows: usize) -> Tensor<B, 2> {
        let cols = values.len() / rows;
        Tensor::from_data(TensorData::new(values.to_vec(), [rows, cols]), &Default::default())
    }

    fn vector(values: &[f32]) -> Tensor<B, 1> {
        Tensor::from_data(TensorData::new(values.to_vec(), [values.len()]), &Default::default())
    }

    fn scalar(tensor: Tensor<B, 1>) -> f32 {
        tensor.into_scalar().elem::<f32>()
    }

    fn values(tensor: Tensor<B, 1>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn squared_distance_sums_over_dimensions() {
        let d = squared_distance(matrix(&[0.0, 0.0, 1.0, 1.0], 2), matrix(&[1.0, 2.0, 1.0, 1.0], 2));
        assert_eq!(values(d), vec![5.0, 0.0]);
    }

    #[test]
    fn contrastive_matches_hand_computation() {
        let loss = contrastive_loss(
            matrix(&[0.0, 0.0, 0.0, 0.0], 2),
            matrix(&[1.0, 0.0, 0.5, 0.0], 2),
            vector(&[1.0, 0.0]),
            1.0,
        );
        assert!((scalar(loss) - 0.390625).abs() < 1e-6);
    }

    #[test]
    fn contrastive_boundaries_contribute_nothing() {
        let same = contrastive_loss(matrix(&[0.3, 0.7], 1), matrix(&[0.3, 0.7], 1), vector(&[1.0]), 1.0);
        assert_eq!(scalar(same), 0.0);
        let far = contrastive_loss(matrix(&[0.0, 0.0], 1), matrix(&[2.0, 0.0], 1), vector(&[0.0]), 1.0);
        assert_eq!(scalar(far), 0.0);
    }

    #[test]
    fn siamese_is_unreduced() {
        let loss = siamese_loss(
            matrix(&[0.0, 0.0, 0.0, 0.0], 2),
            matrix(&[1.0, 0.0, 0.0, 0.0], 2),
            vector(&[1.0, 0.0]),
            SiameseParams::default(),
        );
        let per_pair = values(loss);
        assert_eq!(per_pair.len(), 2);
        assert!((per_pair[0] - 0.2).abs() < 1e-6);
        assert!((per_pair[1] - 20.0).abs() < 1e-4);
    }

    #[test]
    fn triplet_is_zero_when_negatives_are_far_enough() {
        let sketches = matrix(&[0.0, 0.0, 1.0, 1.0], 2);
        let positives = matrix(&[0.1, 0.0, 1.0, 1.1], 2);
        let negatives = matrix(&[3.0, 0.0, 1.0, -2.0], 2);
        assert_eq!(scalar(triplet_loss(sketches.clone(), positives.clone(), negatives, 1.0)), 0.0);

        let close = matrix(&[0.0, 0.5, 1.0, 1.0], 2);
        let loss = scalar(triplet_loss(sketches, positives, close, 1.0));
        // Pair 0: 0.01 - 0.25 + 1; pair 1: 0.01 - 0 + 1.
        assert!((loss - 1.77).abs() < 1e-5);
        assert!(loss >= 0.0);
    }

    #[test]
    fn cross_entropy_of_confident_correct_prediction_is_zero() {
        let exact = cross_entropy(matrix(&[1.0, 0.0], 1), matrix(&[1.0, 0.0], 1));
        assert!(scalar(exact).abs() < 1e-6);
        let unsure = cross_entropy(matrix(&[0.5, 0.5], 1), matrix(&[1.0, 0.0], 1));
        assert!((scalar(unsure) - std::f32::consts::LN_2).abs() < 1e-5);
        let wrong = cross_entropy(matrix(&[0.0, 1.0], 1), matrix(&[1.0, 0.0], 1));
        assert!(scalar(wrong).is_finite());
    }

    #[test]
    fn loss_names_parse() {
        assert_eq!(
            "Triplet".parse::<EmbeddingLoss>().unwrap(),
            EmbeddingLoss::Triplet {
                margin: DEFAULT_MARGIN
            }
        );
        assert_eq!(
            "siamese".parse::<EmbeddingLoss>().unwrap(),
            EmbeddingLoss::Siamese(SiameseParams { q: 10.0 })
        );
        assert!(matches!("hinge".parse::<EmbeddingLoss>(), Err(LossError::Unknown(_))));
    }

    #[test]
    fn compute_rejects_mismatched_batches() {
        let triplet = EmbeddingLoss::Triplet { margin: 1.0 };
        let err = triplet
            .compute(LossBatch::<B>::Pairs {
                sketches: matrix(&[0.0, 0.0], 1),
                icons: matrix(&[0.0, 0.0], 1),
                labels: vector(&[1.0]),
            })
            .unwrap_err();
        assert_eq!(
            err,
            LossError::WrongBatchKind {
                loss: "triplet",
                batch: "pair"
            }
        );

        let contrastive = EmbeddingLoss::Contrastive { margin: 1.0 };
        let err = contrastive
            .compute(LossBatch::<B>::Pairs {
                sketches: matrix(&[0.0, 0.0], 1),
                icons: matrix(&[0.0, 0.0, 1.0], 1),
                labels: vector(&[1.0]),
            })
            .unwrap_err();
        assert!(matches!(err, LossError::ShapeMismatch { .. }));

        let ok = contrastive
            .compute(LossBatch::<B>::Pairs {
                sketches: matrix(&[0.0, 0.0], 1),
                icons: matrix(&[0.0, 0.0], 1),
                labels: vector(&[1.0]),
            })
            .unwrap();
        assert_eq!(scalar(ok), 0.0);
    }
}
