//! Building blocks shared by the stem, inception blocks and auxiliary heads.

use burn::module::{Module, Param, RunningState};
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};

use super::ForwardMode;

const BATCH_NORM_EPSILON: f64 = 1e-3;
const BATCH_NORM_MOMENTUM: f64 = 0.01;

/// Convolution followed by ReLU.
#[derive(Module, Debug)]
pub struct ConvRelu<B: Backend> {
    conv: Conv2d<B>,
    kernel: usize,
    stride: usize,
}

impl<B: Backend> ConvRelu<B> {
    /// Stride-1 convolution with "same" padding.
    pub fn same(channels: [usize; 2], kernel: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([1, 1])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        Self {
            conv,
            kernel,
            stride: 1,
        }
    }

    /// Strided convolution with "same" output size, `ceil(input / stride)`.
    ///
    /// Odd totals put the extra zero row/column after the map, not before.
    pub fn strided(channels: [usize; 2], kernel: usize, stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        Self {
            conv,
            kernel,
            stride,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let input = if self.stride > 1 {
            pad_same(input, self.kernel, self.stride, 0.0)
        } else {
            input
        };
        relu(self.conv.forward(input))
    }

    /// Number of output channels produced by this layer.
    pub fn out_channels(&self) -> usize {
        self.conv.weight.val().dims()[0]
    }
}

/// Channel-wise batch normalization driven by an explicit [`ForwardMode`].
#[derive(Module, Debug)]
pub struct BatchNorm2d<B: Backend> {
    gamma: Param<Tensor<B, 1>>,
    beta: Param<Tensor<B, 1>>,
    running_mean: RunningState<Tensor<B, 1>>,
    running_var: RunningState<Tensor<B, 1>>,
    momentum: f64,
    epsilon: f64,
}

impl<B: Backend> BatchNorm2d<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            gamma: Param::from_tensor(Tensor::ones([channels], device)),
            beta: Param::from_tensor(Tensor::zeros([channels], device)),
            running_mean: RunningState::new(Tensor::zeros([channels], device)),
            running_var: RunningState::new(Tensor::ones([channels], device)),
            momentum: BATCH_NORM_MOMENTUM,
            epsilon: BATCH_NORM_EPSILON,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>, mode: ForwardMode) -> Tensor<B, 4> {
        match mode {
            ForwardMode::Train => self.forward_train(input),
            ForwardMode::Inference => self.forward_inference(input),
        }
    }

    fn forward_inference(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = input.dims();
        let mean = self.running_mean.value_sync().reshape([1, channels, 1, 1]);
        let var = self.running_var.value_sync().reshape([1, channels, 1, 1]);
        self.normalize(input, mean, var)
    }

    fn forward_train(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, channels, height, width] = input.dims();
        let flat = input
            .clone()
            .swap_dims(0, 1)
            .reshape([channels, batch * height * width]);
        let mean = flat.clone().mean_dim(1);
        let var = flat.sub(mean.clone()).powf_scalar(2.0).mean_dim(1);

        let keep = 1.0 - self.momentum;
        let running_mean = self.running_mean.value_sync();
        let running_var = self.running_var.value_sync();
        self.running_mean.update(
            running_mean
                .mul_scalar(keep)
                .add(mean.clone().detach().reshape([channels]).mul_scalar(self.momentum)),
        );
        self.running_var.update(
            running_var
                .mul_scalar(keep)
                .add(var.clone().detach().reshape([channels]).mul_scalar(self.momentum)),
        );

        self.normalize(
            input,
            mean.reshape([1, channels, 1, 1]),
            var.reshape([1, channels, 1, 1]),
        )
    }

    fn normalize(&self, input: Tensor<B, 4>, mean: Tensor<B, 4>, var: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = input.dims();
        let std = var.add_scalar(self.epsilon).sqrt();
        let gamma = self.gamma.val().reshape([1, channels, 1, 1]);
        let beta = self.beta.val().reshape([1, channels, 1, 1]);
        input.sub(mean).div(std).mul(gamma).add(beta)
    }
}

/// `(before, after)` padding on one axis for a "same" window of `kernel` at `stride`.
pub fn same_padding(size: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let out = size.div_ceil(stride);
    let total = (out.saturating_sub(1) * stride + kernel).saturating_sub(size);
    (total / 2, total - total / 2)
}

/// Pad both spatial axes of an NCHW map with `value` so a strided window
/// of `kernel` yields `ceil(size / stride)` outputs.
pub fn pad_same<B: Backend>(input: Tensor<B, 4>, kernel: usize, stride: usize, value: f32) -> Tensor<B, 4> {
    let [_, _, height, width] = input.dims();
    let (top, bottom) = same_padding(height, kernel, stride);
    let (left, right) = same_padding(width, kernel, stride);
    let input = pad_axis(input, 2, top, bottom, value);
    pad_axis(input, 3, left, right, value)
}

fn pad_axis<B: Backend>(
    input: Tensor<B, 4>,
    dim: usize,
    before: usize,
    after: usize,
    value: f32,
) -> Tensor<B, 4> {
    if before == 0 && after == 0 {
        return input;
    }
    let device = input.device();
    let dims = input.dims();
    let filled = |len: usize| {
        let mut shape = dims;
        shape[dim] = len;
        Tensor::<B, 4>::full(shape, value, &device)
    };
    let mut parts = Vec::with_capacity(3);
    if before > 0 {
        parts.push(filled(before));
    }
    parts.push(input);
    if after > 0 {
        parts.push(filled(after));
    }
    Tensor::cat(parts, dim)
}

/// Inverted dropout: zeroes activations with probability `prob` in training
/// and rescales survivors; identity at inference.
pub fn dropout<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    prob: f64,
    mode: ForwardMode,
) -> Tensor<B, D> {
    if !mode.is_train() || prob <= 0.0 {
        return input;
    }
    let keep = 1.0 - prob;
    let mask = input.random_like(Distribution::Bernoulli(keep));
    input.mul(mask).div_scalar(keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray;

    fn values<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn strided_conv_halves_spatial_size() {
        let device = Default::default();
        let layer = ConvRelu::<TestBackend>::strided([3, 8], 7, 2, &device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);
        assert_eq!(layer.forward(input).dims(), [1, 8, 16, 16]);
        assert_eq!(layer.out_channels(), 8);
    }

    #[test]
    fn same_conv_keeps_spatial_size() {
        let device = Default::default();
        let layer = ConvRelu::<TestBackend>::same([4, 6], 5, &device);
        let input = Tensor::<TestBackend, 4>::ones([2, 4, 9, 9], &device);
        let output = layer.forward(input);
        assert_eq!(output.dims(), [2, 6, 9, 9]);
        assert!(values(output).iter().all(|value| *value >= 0.0));
    }

    #[test]
    fn batch_norm_inference_uses_running_statistics() {
        let device = Default::default();
        let norm = BatchNorm2d::<TestBackend>::new(2, &device);
        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0_f32, 2.0, 3.0, 4.0], [1, 2, 1, 2]),
            &device,
        );
        let output = values(norm.forward(input, ForwardMode::Inference));
        let scale = 1.0 / (1.0_f32 + 1e-3).sqrt();
        for (out, expected) in output.iter().zip([1.0_f32, 2.0, 3.0, 4.0]) {
            assert!((out - expected * scale).abs() < 1e-5);
        }
    }

    #[test]
    fn batch_norm_train_normalizes_and_updates_running_mean() {
        let device = Default::default();
        let norm = BatchNorm2d::<TestBackend>::new(1, &device);
        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![2.0_f32, 4.0, 6.0, 8.0], [2, 1, 1, 2]),
            &device,
        );
        let output = values(norm.forward(input, ForwardMode::Train));
        let mean: f32 = output.iter().sum::<f32>() / output.len() as f32;
        assert!(mean.abs() < 1e-5);

        let running_mean = values(norm.running_mean.value_sync());
        assert!((running_mean[0] - 0.05).abs() < 1e-6);
    }

    #[test]
    fn batch_norm_inference_after_train_sees_updated_statistics() {
        let device = Default::default();
        let norm = BatchNorm2d::<TestBackend>::new(1, &device);
        let batch = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![2.0_f32, 4.0, 6.0, 8.0], [2, 1, 1, 2]),
            &device,
        );
        norm.forward(batch, ForwardMode::Train);

        // mean 5, var 5 → running mean 0.05, running var 0.99 + 0.05
        let sample = Tensor::<TestBackend, 4>::from_data(TensorData::new(vec![1.05_f32], [1, 1, 1, 1]), &device);
        let output = values(norm.forward(sample, ForwardMode::Inference));
        let expected = 1.0 / (1.04_f32 + 1e-3).sqrt();
        assert!((output[0] - expected).abs() < 1e-4, "{} vs {expected}", output[0]);
    }

    #[test]
    fn same_padding_puts_the_odd_cell_after() {
        assert_eq!(same_padding(4, 3, 2), (0, 1));
        assert_eq!(same_padding(224, 7, 2), (2, 3));
        assert_eq!(same_padding(112, 3, 2), (0, 1));
        assert_eq!(same_padding(7, 3, 2), (1, 1));
        assert_eq!(same_padding(9, 5, 1), (2, 2));
    }

    #[test]
    fn strided_conv_windows_start_at_the_first_pixel() {
        let device = Default::default();
        let mut layer = ConvRelu::<TestBackend>::strided([1, 1], 3, 2, &device);
        layer.conv.weight = Param::from_tensor(Tensor::ones([1, 1, 3, 3], &device));
        layer.conv.bias = Some(Param::from_tensor(Tensor::zeros([1], &device)));
        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new((1..=16).map(|value| value as f32).collect::<Vec<_>>(), [1, 1, 4, 4]),
            &device,
        );
        // Windows cover rows/cols 0..3 and 2..4 plus one trailing zero.
        let output = values(layer.forward(input));
        assert_eq!(output, vec![54.0, 45.0, 72.0, 54.0]);
    }

    #[test]
    fn dropout_is_identity_at_inference() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 2>::ones([4, 16], &device);
        let output = values(dropout(input, 0.4, ForwardMode::Inference));
        assert!(output.iter().all(|value| *value == 1.0));
    }

    #[test]
    fn dropout_in_training_zeroes_or_rescales() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 2>::ones([8, 64], &device);
        let output = values(dropout(input, 0.4, ForwardMode::Train));
        let rescaled = 1.0 / 0.6_f32;
        assert!(
            output
                .iter()
                .all(|value| *value == 0.0 || (*value - rescaled).abs() < 1e-5)
        );
        assert!(output.iter().any(|value| *value == 0.0));
    }
}
