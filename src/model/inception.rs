//! Four-path inception block.

use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

use super::layers::ConvRelu;

/// Filter counts for the four parallel paths of an inception block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InceptionFilters {
    pub one: usize,
    pub three_reduce: usize,
    pub three: usize,
    pub five_reduce: usize,
    pub five: usize,
    pub pool_proj: usize,
}

impl InceptionFilters {
    pub const fn new(one: usize, three: (usize, usize), five: (usize, usize), pool_proj: usize) -> Self {
        Self {
            one,
            three_reduce: three.0,
            three: three.1,
            five_reduce: five.0,
            five: five.1,
            pool_proj,
        }
    }

    /// Channels of the concatenated output.
    pub const fn out_channels(&self) -> usize {
        self.one + self.three + self.five + self.pool_proj
    }
}

pub const INCEPTION_3A: InceptionFilters = InceptionFilters::new(64, (96, 128), (16, 32), 32);
pub const INCEPTION_3B: InceptionFilters = InceptionFilters::new(128, (128, 192), (32, 96), 64);
pub const INCEPTION_4A: InceptionFilters = InceptionFilters::new(192, (96, 208), (16, 48), 64);
pub const INCEPTION_4B: InceptionFilters = InceptionFilters::new(160, (112, 224), (24, 64), 64);
pub const INCEPTION_4C: InceptionFilters = InceptionFilters::new(128, (128, 256), (24, 64), 64);
pub const INCEPTION_4D: InceptionFilters = InceptionFilters::new(112, (144, 288), (32, 64), 64);
pub const INCEPTION_4E: InceptionFilters = InceptionFilters::new(256, (160, 320), (32, 128), 128);
pub const INCEPTION_5A: InceptionFilters = InceptionFilters::new(256, (160, 320), (32, 128), 128);
pub const INCEPTION_5B: InceptionFilters = InceptionFilters::new(384, (192, 384), (48, 128), 128);

/// Parallel 1x1, 1x1→3x3, 1x1→5x5 and maxpool→1x1 paths, concatenated on channels.
#[derive(Module, Debug)]
pub struct Inception<B: Backend> {
    path1: ConvRelu<B>,
    path2_reduce: ConvRelu<B>,
    path2: ConvRelu<B>,
    path3_reduce: ConvRelu<B>,
    path3: ConvRelu<B>,
    path4_pool: MaxPool2d,
    path4: ConvRelu<B>,
}

impl<B: Backend> Inception<B> {
    pub fn new(in_channels: usize, filters: InceptionFilters, device: &B::Device) -> Self {
        let path4_pool = MaxPool2dConfig::new([3, 3])
            .with_strides([1, 1])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();
        Self {
            path1: ConvRelu::same([in_channels, filters.one], 1, device),
            path2_reduce: ConvRelu::same([in_channels, filters.three_reduce], 1, device),
            path2: ConvRelu::same([filters.three_reduce, filters.three], 3, device),
            path3_reduce: ConvRelu::same([in_channels, filters.five_reduce], 1, device),
            path3: ConvRelu::same([filters.five_reduce, filters.five], 5, device),
            path4_pool,
            path4: ConvRelu::same([in_channels, filters.pool_proj], 1, device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let path1 = self.path1.forward(input.clone());
        let path2 = self.path2.forward(self.path2_reduce.forward(input.clone()));
        let path3 = self.path3.forward(self.path3_reduce.forward(input.clone()));
        let path4 = self.path4.forward(self.path4_pool.forward(input));
        Tensor::cat(vec![path1, path2, path3, path4], 1)
    }

    pub fn out_channels(&self) -> usize {
        self.path1.out_channels()
            + self.path2.out_channels()
            + self.path3.out_channels()
            + self.path4.out_channels()
    }
}
