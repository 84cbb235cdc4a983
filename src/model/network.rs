//! Multi-branch classification network whose penultimate dense layer is the
//! sketch embedding.
//!
//! Layer graph, input 3×224×224:
//!
//! ```text
//! conv 7x7/2 (64) → maxpool 3x3/2 → batchnorm                       112 → 56
//! conv 1x1 (64) → conv 3x3 (192) → batchnorm → maxpool 3x3/2        56 → 28
//! inception 3a, 3b → maxpool 3x3/2                                  28 → 14
//! inception 4a [aux1] 4b 4c 4d [aux2] 4e → maxpool 3x3/2            14 → 7
//! inception 5a, 5b → avgpool 7x7 → flatten → dropout                7 → 1
//! dense 256 (linear, embedding) → dense CLASS_NUM (softmax)
//! ```

use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::Tensor;
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;

use super::auxiliary::AuxiliaryHead;
use super::inception::{
    INCEPTION_3A, INCEPTION_3B, INCEPTION_4A, INCEPTION_4B, INCEPTION_4C, INCEPTION_4D,
    INCEPTION_4E, INCEPTION_5A, INCEPTION_5B, Inception, InceptionFilters,
};
use super::layers::{BatchNorm2d, ConvRelu, dropout, pad_same};
use super::{EMBEDDING_DIM, ForwardMode, INPUT_CHANNELS, INPUT_SIZE};
use crate::error::{RetrievalError, ShapeOrigin};

const STEM_CHANNELS: usize = 64;
const POOL_KERNEL: usize = 3;
const POOL_STRIDE: usize = 2;
const STAGE2_CHANNELS: usize = 192;
/// Feature map side length entering stage 4 (where the auxiliary heads tap).
const STAGE4_SIZE: usize = INPUT_SIZE / 16;
/// Feature map side length entering stage 5.
const STAGE5_SIZE: usize = INPUT_SIZE / 32;

/// Architecture parameters persisted next to the weights.
#[derive(Config, Debug)]
pub struct SketchNetConfig {
    /// Number of icon categories the classification heads predict.
    pub class_num: usize,
    /// Dropout probability applied in training mode.
    #[config(default = 0.4)]
    pub dropout: f64,
}

impl SketchNetConfig {
    /// Build a freshly initialized network on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> SketchNet<B> {
        let mut channels = STAGE2_CHANNELS;
        let mut block = |filters: InceptionFilters| -> Inception<B> {
            let block = Inception::new(channels, filters, device);
            channels = block.out_channels();
            block
        };
        let inception_3a = block(INCEPTION_3A);
        let inception_3b = block(INCEPTION_3B);
        let inception_4a = block(INCEPTION_4A);
        let aux1_channels = INCEPTION_4A.out_channels();
        let inception_4b = block(INCEPTION_4B);
        let inception_4c = block(INCEPTION_4C);
        let inception_4d = block(INCEPTION_4D);
        let aux2_channels = INCEPTION_4D.out_channels();
        let inception_4e = block(INCEPTION_4E);
        let inception_5a = block(INCEPTION_5A);
        let inception_5b = block(INCEPTION_5B);
        let pooled_channels = channels;

        SketchNet {
            stem_conv: ConvRelu::strided([INPUT_CHANNELS, STEM_CHANNELS], 7, 2, device),
            stem_pool: downsample_pool(),
            stem_norm: BatchNorm2d::new(STEM_CHANNELS, device),
            reduce_conv: ConvRelu::same([STEM_CHANNELS, STEM_CHANNELS], 1, device),
            expand_conv: ConvRelu::same([STEM_CHANNELS, STAGE2_CHANNELS], 3, device),
            stage2_norm: BatchNorm2d::new(STAGE2_CHANNELS, device),
            stage2_pool: downsample_pool(),
            inception_3a,
            inception_3b,
            stage3_pool: downsample_pool(),
            inception_4a,
            aux1: AuxiliaryHead::new(aux1_channels, STAGE4_SIZE, self.class_num, self.dropout, device),
            inception_4b,
            inception_4c,
            inception_4d,
            aux2: AuxiliaryHead::new(aux2_channels, STAGE4_SIZE, self.class_num, self.dropout, device),
            inception_4e,
            stage4_pool: downsample_pool(),
            inception_5a,
            inception_5b,
            global_pool: AvgPool2dConfig::new([STAGE5_SIZE, STAGE5_SIZE])
                .with_strides([1, 1])
                .init(),
            embedding: LinearConfig::new(pooled_channels, EMBEDDING_DIM).init(device),
            classifier: LinearConfig::new(EMBEDDING_DIM, self.class_num).init(device),
            dropout: self.dropout,
        }
    }
}

fn downsample_pool() -> MaxPool2d {
    MaxPool2dConfig::new([POOL_KERNEL, POOL_KERNEL])
        .with_strides([POOL_STRIDE, POOL_STRIDE])
        .with_padding(PaddingConfig2d::Valid)
        .init()
}

/// 3x3/2 max-pool with "same" output size; padded cells never win the max.
fn downsample<B: Backend>(pool: &MaxPool2d, input: Tensor<B, 4>) -> Tensor<B, 4> {
    pool.forward(pad_same(input, POOL_KERNEL, POOL_STRIDE, f32::NEG_INFINITY))
}

/// Outputs of one forward pass.
#[derive(Debug, Clone)]
pub struct SketchNetOutput<B: Backend> {
    /// Main softmax over categories, `[batch, class_num]`.
    pub class_probs: Tensor<B, 2>,
    /// Auxiliary softmax tapped after inception 4a.
    pub aux1_probs: Tensor<B, 2>,
    /// Auxiliary softmax tapped after inception 4d.
    pub aux2_probs: Tensor<B, 2>,
    /// Linear embedding, `[batch, EMBEDDING_DIM]`.
    pub embedding: Tensor<B, 2>,
}

/// Sketch/icon feature extractor.
#[derive(Module, Debug)]
pub struct SketchNet<B: Backend> {
    stem_conv: ConvRelu<B>,
    stem_pool: MaxPool2d,
    stem_norm: BatchNorm2d<B>,
    reduce_conv: ConvRelu<B>,
    expand_conv: ConvRelu<B>,
    stage2_norm: BatchNorm2d<B>,
    stage2_pool: MaxPool2d,
    inception_3a: Inception<B>,
    inception_3b: Inception<B>,
    stage3_pool: MaxPool2d,
    inception_4a: Inception<B>,
    aux1: AuxiliaryHead<B>,
    inception_4b: Inception<B>,
    inception_4c: Inception<B>,
    inception_4d: Inception<B>,
    aux2: AuxiliaryHead<B>,
    inception_4e: Inception<B>,
    stage4_pool: MaxPool2d,
    inception_5a: Inception<B>,
    inception_5b: Inception<B>,
    global_pool: AvgPool2d,
    embedding: Linear<B>,
    classifier: Linear<B>,
    dropout: f64,
}

impl<B: Backend> SketchNet<B> {
    /// Run all heads. Input must be `[batch, 3, 224, 224]` in [0, 1].
    pub fn forward(&self, input: Tensor<B, 4>, mode: ForwardMode) -> SketchNetOutput<B> {
        let x = self.stem(input, mode);
        let x = self.inception_4a.forward(x);
        let aux1_probs = self.aux1.forward(x.clone(), mode);
        let x = self.inception_4b.forward(x);
        let x = self.inception_4c.forward(x);
        let x = self.inception_4d.forward(x);
        let aux2_probs = self.aux2.forward(x.clone(), mode);
        let embedding = self.tail(x, mode);
        let class_probs = softmax(self.classifier.forward(embedding.clone()), 1);
        SketchNetOutput {
            class_probs,
            aux1_probs,
            aux2_probs,
            embedding,
        }
    }

    /// Embedding only; skips the auxiliary and classification heads.
    pub fn forward_embedding(&self, input: Tensor<B, 4>, mode: ForwardMode) -> Tensor<B, 2> {
        let x = self.stem(input, mode);
        let x = self.inception_4a.forward(x);
        let x = self.inception_4b.forward(x);
        let x = self.inception_4c.forward(x);
        let x = self.inception_4d.forward(x);
        self.tail(x, mode)
    }

    /// Stages 1 through 3; output feeds inception 4a.
    fn stem(&self, input: Tensor<B, 4>, mode: ForwardMode) -> Tensor<B, 4> {
        let x = self.stem_conv.forward(input);
        let x = downsample(&self.stem_pool, x);
        let x = self.stem_norm.forward(x, mode);

        let x = self.reduce_conv.forward(x);
        let x = self.expand_conv.forward(x);
        let x = self.stage2_norm.forward(x, mode);
        let x = downsample(&self.stage2_pool, x);

        let x = self.inception_3a.forward(x);
        let x = self.inception_3b.forward(x);
        downsample(&self.stage3_pool, x)
    }

    /// Inception 4e through the embedding layer.
    fn tail(&self, x: Tensor<B, 4>, mode: ForwardMode) -> Tensor<B, 2> {
        let x = self.inception_4e.forward(x);
        let x = downsample(&self.stage4_pool, x);
        let x = self.inception_5a.forward(x);
        let x = self.inception_5b.forward(x);
        let x = self.global_pool.forward(x);
        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = dropout(x, self.dropout, mode);
        self.embedding.forward(x)
    }

    /// Shape of the final classifier weight, `[EMBEDDING_DIM, class_num]`.
    pub fn classifier_dims(&self) -> [usize; 2] {
        self.classifier.weight.val().dims()
    }

    /// Shape of the embedding layer weight, `[1024, EMBEDDING_DIM]`.
    pub fn embedding_dims(&self) -> [usize; 2] {
        self.embedding.weight.val().dims()
    }

    pub fn class_num(&self) -> usize {
        self.classifier_dims()[1]
    }
}

/// Reject inputs that are not `[batch >= 1, 3, 224, 224]`.
pub fn check_input_dims(dims: [usize; 4]) -> Result<(), RetrievalError> {
    let [batch, channels, height, width] = dims;
    if batch == 0 || channels != INPUT_CHANNELS || height != INPUT_SIZE || width != INPUT_SIZE {
        return Err(RetrievalError::shape(
            ShapeOrigin::Input,
            "sketch batch",
            &[batch.max(1), INPUT_CHANNELS, INPUT_SIZE, INPUT_SIZE],
            &dims,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    #[test]
    fn config_defaults_match_reference_architecture() {
        let config = SketchNetConfig::new(66);
        assert_eq!(config.class_num, 66);
        assert!((config.dropout - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn head_shapes_follow_class_num() {
        let device = Default::default();
        let net = SketchNetConfig::new(7).init::<NdArray>(&device);
        assert_eq!(net.embedding_dims(), [1024, EMBEDDING_DIM]);
        assert_eq!(net.classifier_dims(), [EMBEDDING_DIM, 7]);
        assert_eq!(net.class_num(), 7);
    }

    #[test]
    fn stage_sizes_line_up_with_input() {
        assert_eq!(STAGE4_SIZE, 14);
        assert_eq!(STAGE5_SIZE, 7);
    }

    #[test]
    fn downsampling_pads_only_after_even_maps() {
        let device = Default::default();
        let mut values = vec![0.0_f32; 16];
        values[2 * 4 + 2] = 10.0;
        let input = Tensor::<NdArray, 4>::from_data(TensorData::new(values, [1, 1, 4, 4]), &device);
        let output = downsample(&downsample_pool(), input);
        assert_eq!(output.dims(), [1, 1, 2, 2]);
        let output = output.into_data().to_vec::<f32>().unwrap();
        assert_eq!(output, vec![10.0, 10.0, 10.0, 10.0]);
    }

    #[test]
    fn downsampling_ignores_padding_on_negative_maps() {
        let device = Default::default();
        let input = Tensor::<NdArray, 4>::full([1, 2, 7, 7], -3.0, &device);
        let output = downsample(&downsample_pool(), input);
        assert_eq!(output.dims(), [1, 2, 4, 4]);
        let output = output.into_data().to_vec::<f32>().unwrap();
        assert!(output.iter().all(|value| *value == -3.0));
    }

    #[test]
    fn input_check_rejects_wrong_spatial_size() {
        assert!(check_input_dims([2, 3, 224, 224]).is_ok());
        let err = check_input_dims([1, 3, 256, 256]).unwrap_err();
        assert!(matches!(err, RetrievalError::ShapeMismatch { origin: ShapeOrigin::Input, .. }));
        assert!(check_input_dims([0, 3, 224, 224]).is_err());
        assert!(check_input_dims([1, 1, 224, 224]).is_err());
    }
}
