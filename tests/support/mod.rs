#![allow(dead_code)]

pub mod env;

use iconsketch::IconRecord;
use iconsketch::model::SketchEmbedder;
use iconsketch::preprocess::SketchImage;
use iconsketch::RetrievalError;

/// Embeds a sketch as the mean of each colour channel.
pub struct ChannelMeans;

impl SketchEmbedder for ChannelMeans {
    fn embed_batch(&self, images: &[SketchImage]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(images
            .iter()
            .map(|image| {
                let plane = image.values().len() / 3;
                image
                    .values()
                    .chunks(plane)
                    .map(|channel| channel.iter().sum::<f32>() / plane as f32)
                    .collect()
            })
            .collect())
    }

    fn embedding_dim(&self) -> usize {
        3
    }
}

/// Writes a solid-colour icon at `<root>/<category>/<filename>`.
pub fn write_icon(root: &std::path::Path, record: &IconRecord, color: [u8; 3]) {
    let dir = root.join(&record.category);
    std::fs::create_dir_all(&dir).unwrap();
    image::RgbImage::from_pixel(24, 24, image::Rgb(color))
        .save(dir.join(&record.filename))
        .unwrap();
}
