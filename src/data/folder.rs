//! Image folders: one sub-directory per class, sorted by name, each holding
//! PNG/JPEG/BMP/GIF files. Every image is resized to a fixed square so it can
//! be packed into an image db.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::data::image_db::ImageDbHeader;
use crate::error::{Result, TrainError};

const EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

/// Decodes image bytes, resizes to `side × side` and returns HWC pixels with
/// `channels` (1 = grayscale, 3 = RGB).
pub fn decode_resized(bytes: &[u8], side: u32, channels: usize) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).map_err(|e| TrainError::dataset(e.to_string()))?;
    let resized = img.resize_exact(side, side, image::imageops::FilterType::Lanczos3);
    match channels {
        1 => Ok(resized.to_luma8().into_raw()),
        3 => Ok(resized.to_rgb8().into_raw()),
        other => Err(TrainError::config(format!("unsupported channel count {}", other))),
    }
}

/// Class directories of `root`, sorted; the position is the class label.
pub fn class_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    if dirs.is_empty() {
        return Err(TrainError::dataset(format!("{} has no class directories", root.display())));
    }
    Ok(dirs)
}

/// Loads every image below `root` as `(label, pixels)`. Files that fail to
/// decode are skipped with a warning.
pub fn load_image_folder(root: &Path, side: usize, channels: usize) -> Result<(ImageDbHeader, Vec<(u32, Vec<u8>)>)> {
    let mut records = Vec::new();
    for (label, dir) in class_dirs(root)?.iter().enumerate() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        for file in files {
            let bytes = std::fs::read(&file)?;
            match decode_resized(&bytes, side as u32, channels) {
                Ok(pixels) => records.push((label as u32, pixels)),
                Err(e) => warn!(path = %file.display(), error = %e, "skipping undecodable image"),
            }
        }
    }
    let header = ImageDbHeader { count: records.len(), height: side, width: side, channels };
    Ok((header, records))
}
