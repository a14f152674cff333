//! Reads a pair of IDX binary files (image + label) as used by MNIST and its
//! derivatives (Fashion-MNIST, EMNIST, …) so they can be packed into an
//! image db.
//!
//! # IDX3 image file layout
//! ```text
//! bytes  0-1:   0x00 0x00   (reserved, must be zero)
//! byte   2:     0x08        (dtype = uint8)
//! byte   3:     0x03        (number of dimensions = 3)
//! bytes  4-7:   N           (number of images, big-endian u32)
//! bytes  8-11:  rows        (image height in pixels, big-endian u32)
//! bytes 12-15:  cols        (image width in pixels, big-endian u32)
//! bytes 16..:   N * rows * cols bytes, row-major, uint8
//! ```
//!
//! # IDX1 label file layout
//! ```text
//! bytes  0-1:   0x00 0x00   (reserved, must be zero)
//! byte   2:     0x08        (dtype = uint8)
//! byte   3:     0x01        (number of dimensions = 1)
//! bytes  4-7:   N           (number of labels, big-endian u32)
//! bytes  8..:   N bytes, each a class index
//! ```

use crate::data::image_db::ImageDbHeader;
use crate::error::{Result, TrainError};

/// Borrowed view of a validated IDX image/label pair (single channel).
#[derive(Debug)]
pub struct IdxPair<'a> {
    pub header: ImageDbHeader,
    labels: &'a [u8],
    pixels: &'a [u8],
}

impl<'a> IdxPair<'a> {
    /// `(label, pixels)` per sample, in file order.
    pub fn records(&self) -> impl Iterator<Item = (u32, &'a [u8])> + 'a {
        let n_pixels = self.header.pixels_per_record();
        let labels = self.labels;
        labels.iter().zip(self.pixels.chunks_exact(n_pixels)).map(|(&l, px)| (l as u32, px))
    }
}

fn be_u32(bytes: &[u8], at: usize) -> usize {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as usize
}

fn check_magic(bytes: &[u8], dims: u8, what: &str, min_len: usize) -> Result<()> {
    if bytes.len() < min_len {
        return Err(TrainError::dataset(format!(
            "IDX {} file too short: expected at least {} header bytes, got {}",
            what, min_len, bytes.len()
        )));
    }
    if bytes[0] != 0x00 || bytes[1] != 0x00 {
        return Err(TrainError::dataset(format!(
            "IDX {} file: bytes 0-1 must be 0x00 0x00, got 0x{:02X} 0x{:02X}",
            what, bytes[0], bytes[1]
        )));
    }
    if bytes[2] != 0x08 {
        return Err(TrainError::dataset(format!(
            "IDX {} file: dtype must be 0x08 (uint8), got 0x{:02X}", what, bytes[2]
        )));
    }
    if bytes[3] != dims {
        return Err(TrainError::dataset(format!(
            "IDX {} file: expected {} dimensions, got {}", what, dims, bytes[3]
        )));
    }
    Ok(())
}

pub fn parse_idx_pair<'a>(image_bytes: &'a [u8], label_bytes: &'a [u8]) -> Result<IdxPair<'a>> {
    check_magic(image_bytes, 0x03, "image", 16)?;
    check_magic(label_bytes, 0x01, "label", 8)?;

    let n_items = be_u32(image_bytes, 4);
    let rows = be_u32(image_bytes, 8);
    let cols = be_u32(image_bytes, 12);
    let label_count = be_u32(label_bytes, 4);

    if label_count != n_items {
        return Err(TrainError::dataset(format!(
            "IDX file mismatch: image file declares {} items but label file declares {}",
            n_items, label_count
        )));
    }

    let n_pixels = rows
        .checked_mul(cols)
        .ok_or_else(|| TrainError::dataset("IDX image file: rows * cols overflows"))?;
    if n_pixels == 0 {
        return Err(TrainError::dataset("IDX image file: zero-sized images"));
    }
    let image_len = n_items
        .checked_mul(n_pixels)
        .and_then(|n| n.checked_add(16))
        .ok_or_else(|| TrainError::dataset("IDX image file: data length overflows"))?;
    if image_bytes.len() < image_len {
        return Err(TrainError::dataset(format!(
            "IDX image file too short: header declares {} items of {}x{} pixels, file is {} bytes",
            n_items, rows, cols, image_bytes.len()
        )));
    }
    if label_bytes.len() < 8 + n_items {
        return Err(TrainError::dataset(format!(
            "IDX label file too short: header declares {} labels, file is {} bytes",
            n_items, label_bytes.len()
        )));
    }

    Ok(IdxPair {
        header: ImageDbHeader { count: n_items, height: rows, width: cols, channels: 1 },
        labels: &label_bytes[8..8 + n_items],
        pixels: &image_bytes[16..image_len],
    })
}
