use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, warn};

use super::record::IconRecord;
use super::store::EmbeddingIndex;
use crate::error::RetrievalError;
use crate::model::SketchEmbedder;
use crate::preprocess::load_sketch;

const ICON_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "webp"];

/// Where an index comes from at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexSource {
    /// A directory written by [`EmbeddingIndex::save`].
    Saved(PathBuf),
    /// A reference icon tree laid out as `<root>/<category>/<filename>`.
    IconTree { root: PathBuf },
}

/// List every icon image under `root`, sorted by category then filename.
pub fn scan_icon_tree(root: &Path) -> Result<Vec<IconRecord>, RetrievalError> {
    let entries = std::fs::read_dir(root)
        .map_err(|source| RetrievalError::io("Failed to read icon root", root, source))?;
    let mut records = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| RetrievalError::io("Failed to read icon root", root, source))?;
        let category_path = entry.path();
        if !category_path.is_dir() {
            continue;
        }
        let Some(category) = entry.file_name().to_str().map(str::to_string) else {
            warn!("Skipping non UTF-8 category folder {}", category_path.display());
            continue;
        };
        let files = std::fs::read_dir(&category_path).map_err(|source| {
            RetrievalError::io("Failed to read icon category", &category_path, source)
        })?;
        for file in files {
            let file = file.map_err(|source| {
                RetrievalError::io("Failed to read icon category", &category_path, source)
            })?;
            let path = file.path();
            if !path.is_file() || !is_icon_file(&path) {
                continue;
            }
            match file.file_name().to_str() {
                Some(name) => records.push(IconRecord::new(category.clone(), name)),
                None => warn!("Skipping non UTF-8 icon file {}", path.display()),
            }
        }
    }
    records.sort();
    Ok(records)
}

fn is_icon_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ICON_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Embed each record's image under `root` in inference mode, `batch` images at a time.
pub fn build_index(
    embedder: &impl SketchEmbedder,
    root: &Path,
    records: Vec<IconRecord>,
    batch: usize,
) -> Result<EmbeddingIndex, RetrievalError> {
    let started = Instant::now();
    let batch = batch.max(1);
    let mut rows = Vec::with_capacity(records.len());
    for chunk in records.chunks(batch) {
        let images = chunk
            .iter()
            .map(|record| load_sketch(&root.join(&record.category).join(&record.filename)))
            .collect::<Result<Vec<_>, _>>()?;
        let embeddings = embedder.embed_batch(&images)?;
        if embeddings.len() != chunk.len() {
            return Err(RetrievalError::Inference(format!(
                "embedder returned {} rows for {} icons",
                embeddings.len(),
                chunk.len()
            )));
        }
        rows.extend(chunk.iter().cloned().zip(embeddings));
    }
    let index = EmbeddingIndex::from_rows(embedder.embedding_dim(), rows)?;
    info!(
        "Built embedding index for {} icons in {:.2?}",
        index.len(),
        started.elapsed()
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::SketchImage;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    /// Embeds each image as its mean channel values.
    struct MeanColor;

    impl SketchEmbedder for MeanColor {
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

    fn write_icon(root: &Path, category: &str, name: &str, color: [u8; 3]) {
        let dir = root.join(category);
        std::fs::create_dir_all(&dir).unwrap();
        RgbImage::from_pixel(8, 8, Rgb(color)).save(dir.join(name)).unwrap();
    }

    #[test]
    fn scan_sorts_and_skips_non_images() {
        let dir = tempdir().unwrap();
        write_icon(dir.path(), "zebra", "b.png", [0, 0, 0]);
        write_icon(dir.path(), "apple", "c.png", [0, 0, 0]);
        write_icon(dir.path(), "apple", "a.png", [0, 0, 0]);
        std::fs::write(dir.path().join("apple").join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("stray.png"), "x").unwrap();
        let names: Vec<String> = scan_icon_tree(dir.path())
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, ["apple/a.png", "apple/c.png", "zebra/b.png"]);
    }

    #[test]
    fn build_embeds_rows_in_record_order() {
        let dir = tempdir().unwrap();
        write_icon(dir.path(), "red", "r.png", [255, 0, 0]);
        write_icon(dir.path(), "white", "w.png", [255, 255, 255]);
        write_icon(dir.path(), "black", "k.png", [0, 0, 0]);
        let records = scan_icon_tree(dir.path()).unwrap();
        let index = build_index(&MeanColor, dir.path(), records, 2).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.dim(), 3);
        let red = index.position(&IconRecord::new("red", "r.png")).unwrap();
        let row = index.embedding(red).unwrap().to_vec();
        assert!((row[0] - 1.0).abs() < 1e-4 && row[1].abs() < 1e-4);
        assert_eq!(index.record(0).unwrap().category, "black");
    }

    #[test]
    fn missing_icon_file_fails_the_build() {
        let dir = tempdir().unwrap();
        let err = build_index(&MeanColor, dir.path(), vec![IconRecord::new("x", "gone.png")], 4)
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Io { .. }));
    }
}
