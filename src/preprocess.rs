//! Sketch bitmap → normalized channel-first network input.

use std::path::Path;

use image::{DynamicImage, RgbImage};
use image::imageops::FilterType;

use crate::error::{RetrievalError, ShapeOrigin};
use crate::model::{INPUT_CHANNELS, INPUT_SIZE};

/// Side length sketches are resized to before embedding.
pub const SKETCH_INPUT_SIZE: usize = INPUT_SIZE;
const SKETCH_INPUT_LEN: usize = INPUT_CHANNELS * SKETCH_INPUT_SIZE * SKETCH_INPUT_SIZE;

/// A prepared 3×224×224 image with every value in [0, 1].
#[derive(Clone, Debug, PartialEq)]
pub struct SketchImage {
    values: Vec<f32>,
}

impl SketchImage {
    /// Wrap already-normalized channel-first values.
    pub fn from_chw(values: Vec<f32>, size: usize) -> Result<Self, RetrievalError> {
        let expected = [INPUT_CHANNELS, SKETCH_INPUT_SIZE, SKETCH_INPUT_SIZE];
        if size != SKETCH_INPUT_SIZE || values.len() != SKETCH_INPUT_LEN {
            let channels = if size == 0 { 0 } else { values.len() / (size * size) };
            return Err(RetrievalError::shape(ShapeOrigin::Input, "sketch image", &expected, &[channels, size, size]));
        }
        if let Some(bad) = values.iter().find(|value| !(0.0..=1.0).contains(*value)) {
            return Err(RetrievalError::InvalidImage(format!(
                "pixel value {bad} outside [0, 1]"
            )));
        }
        Ok(Self { values })
    }

    /// Build from an RGB buffer that is already 224×224.
    pub fn from_rgb(rgb: &RgbImage) -> Result<Self, RetrievalError> {
        let (width, height) = rgb.dimensions();
        if width as usize != SKETCH_INPUT_SIZE || height as usize != SKETCH_INPUT_SIZE {
            return Err(RetrievalError::shape(
                ShapeOrigin::Input,
                "sketch image",
                &[INPUT_CHANNELS, SKETCH_INPUT_SIZE, SKETCH_INPUT_SIZE],
                &[INPUT_CHANNELS, height as usize, width as usize],
            ));
        }
        Ok(Self {
            values: rgb_to_chw(rgb),
        })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// Drop alpha, resize to 224×224 with bicubic filtering and scale to [0, 1].
pub fn prepare_sketch(image: &DynamicImage) -> SketchImage {
    let side = SKETCH_INPUT_SIZE as u32;
    let rgb = image.to_rgb8();
    let rgb = if rgb.dimensions() == (side, side) {
        rgb
    } else {
        image::imageops::resize(&rgb, side, side, FilterType::CatmullRom)
    };
    SketchImage {
        values: rgb_to_chw(&rgb),
    }
}

fn rgb_to_chw(rgb: &RgbImage) -> Vec<f32> {
    let plane = SKETCH_INPUT_SIZE * SKETCH_INPUT_SIZE;
    let mut values = vec![0.0_f32; SKETCH_INPUT_LEN];
    for (idx, pixel) in rgb.pixels().enumerate() {
        for channel in 0..INPUT_CHANNELS {
            values[channel * plane + idx] = f32::from(pixel[channel]) / 255.0;
        }
    }
    values
}

/// Decode an encoded bitmap (PNG, JPEG, ...) and prepare it.
pub fn decode_sketch(bytes: &[u8]) -> Result<SketchImage, RetrievalError> {
    if bytes.is_empty() {
        return Err(RetrievalError::InvalidImage("empty image buffer".into()));
    }
    let image = image::load_from_memory(bytes)?;
    Ok(prepare_sketch(&image))
}

/// Read and prepare an image file.
pub fn load_sketch(path: &Path) -> Result<SketchImage, RetrievalError> {
    let bytes = std::fs::read(path)
        .map_err(|source| RetrievalError::io("Failed to read sketch image", path, source))?;
    decode_sketch(&bytes)
}

/// Concatenate prepared images into one `[n, 3, 224, 224]` buffer.
pub(crate) fn stack_batch(images: &[SketchImage]) -> Vec<f32> {
    let mut batch = Vec::with_capacity(images.len() * SKETCH_INPUT_LEN);
    for image in images {
        batch.extend_from_slice(&image.values);
    }
    batch
}
