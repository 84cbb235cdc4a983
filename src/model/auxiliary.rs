use burn::module::Module;
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::nn::{Linear, LinearConfig};
use burn::tensor::Tensor;
use burn::tensor::activation::{relu, softmax};
use burn::tensor::backend::Backend;

use super::ForwardMode;
use super::layers::{ConvRelu, dropout};

const AUX_POOL: usize = 5;
const AUX_STRIDE: usize = 3;
const AUX_CHANNELS: usize = 128;
const AUX_HIDDEN: usize = 256;

/// Spatial side length after the auxiliary average pool (valid padding).
pub(crate) const fn aux_grid(feature_size: usize) -> usize {
    (feature_size - AUX_POOL) / AUX_STRIDE + 1
}

/// Intermediate classifier tapped from the middle of the network.
///
/// Only contributes gradient during training; serving ignores its output.
#[derive(Module, Debug)]
pub struct AuxiliaryHead<B: Backend> {
    pool: AvgPool2d,
    conv: ConvRelu<B>,
    hidden: Linear<B>,
    classifier: Linear<B>,
    dropout: f64,
}

impl<B: Backend> AuxiliaryHead<B> {
    pub fn new(
        in_channels: usize,
        feature_size: usize,
        class_num: usize,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        let grid = aux_grid(feature_size);
        Self {
            pool: AvgPool2dConfig::new([AUX_POOL, AUX_POOL])
                .with_strides([AUX_STRIDE, AUX_STRIDE])
                .init(),
            conv: ConvRelu::same([in_channels, AUX_CHANNELS], 1, device),
            hidden: LinearConfig::new(AUX_CHANNELS * grid * grid, AUX_HIDDEN).init(device),
            classifier: LinearConfig::new(AUX_HIDDEN, class_num).init(device),
            dropout,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>, mode: ForwardMode) -> Tensor<B, 2> {
        let x = self.conv.forward(self.pool.forward(input));
        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = relu(self.hidden.forward(x));
        let x = dropout(x, self.dropout, mode);
        softmax(self.classifier.forward(x), 1)
    }
}
