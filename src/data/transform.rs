//! Deterministic square crop with optional shift and horizontal flip.
//!
//! The crop window is centered on the source image and moved by `(dy, dx)`;
//! samples falling outside the source replicate the nearest border pixel.

use rand::Rng;

use crate::data::image_db::ImageDbHeader;
use crate::error::{Result, TrainError};

/// Where one crop lands on its source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Placement {
    pub dy: isize,
    pub dx: isize,
    pub flip: bool,
}

impl Placement {
    /// Center crop, no flip: the evaluation placement.
    pub fn center() -> Self {
        Self::default()
    }

    /// Uniform shift in `[-shift, shift]` on both axes and a fair-coin
    /// horizontal flip.
    pub fn random<R: Rng + ?Sized>(shift: usize, rng: &mut R) -> Self {
        let shift = shift as isize;
        let (dy, dx) = if shift > 0 {
            (rng.gen_range(-shift..=shift), rng.gen_range(-shift..=shift))
        } else {
            (0, 0)
        };
        Self { dy, dx, flip: rng.gen::<bool>() }
    }
}

/// Checks that a corpus with `src_channels` can be delivered as `out_channels`.
pub fn check_channels(src_channels: usize, out_channels: usize) -> Result<()> {
    match (src_channels, out_channels) {
        (a, b) if a == b => Ok(()),
        (1, 3) | (3, 1) => Ok(()),
        _ => Err(TrainError::config(format!(
            "cannot convert {}-channel images to {} channels", src_channels, out_channels
        ))),
    }
}

/// Appends a `size x size x out_channels` crop of `src` to `out`.
pub fn crop_into(
    src: &[u8],
    header: &ImageDbHeader,
    size: usize,
    out_channels: usize,
    placement: Placement,
    out: &mut Vec<f32>,
) {
    let (h, w, c) = (header.height as isize, header.width as isize, header.channels);
    let top = (h - size as isize) / 2 + placement.dy;
    let left = (w - size as isize) / 2 + placement.dx;

    for y in 0..size as isize {
        let sy = (top + y).clamp(0, h - 1) as usize;
        for x in 0..size as isize {
            let x = if placement.flip { size as isize - 1 - x } else { x };
            let sx = (left + x).clamp(0, w - 1) as usize;
            let px = &src[(sy * header.width + sx) * c..(sy * header.width + sx + 1) * c];
            match (c, out_channels) {
                (a, b) if a == b => out.extend(px.iter().map(|&v| v as f32)),
                (1, _) => out.extend(std::iter::repeat(px[0] as f32).take(out_channels)),
                _ => out.push(px.iter().map(|&v| v as f32).sum::<f32>() / c as f32),
            }
        }
    }
}
