//! Sketch uploads for the redraw-from-memory data collection flow.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::error::RetrievalError;
use crate::index::IconRecord;

/// Side length of stored sketch uploads.
pub const UPLOAD_SIZE: u32 = 256;

/// False for an untouched canvas (every RGB sample is white).
pub fn canvas_has_ink(canvas: &DynamicImage) -> bool {
    canvas.to_rgb8().as_raw().iter().any(|&value| value != u8::MAX)
}

/// Encode the canvas as a 256×256 RGB PNG with integer samples.
pub fn encode_upload_png(canvas: &DynamicImage) -> Result<Vec<u8>, RetrievalError> {
    let rgb = canvas.to_rgb8();
    let rgb = if rgb.dimensions() == (UPLOAD_SIZE, UPLOAD_SIZE) {
        rgb
    } else {
        image::imageops::resize(&rgb, UPLOAD_SIZE, UPLOAD_SIZE, FilterType::CatmullRom)
    };
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(rgb).write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

/// Storage key for a user's redraw of `record`; `.jpg` names are stored as `.png`.
pub fn sketch_upload_path(user_id: &str, record: &IconRecord) -> String {
    format!(
        "sketch/{user_id}/{}/{}",
        record.category,
        record.filename.replace(".jpg", ".png")
    )
}
