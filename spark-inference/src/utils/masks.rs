use crate::config::OverlayStyle;
use crate::error::{Result, SegmentError};
use bitvec::prelude::*;
use image::{imageops, RgbaImage};
use rayon::prelude::*;

/// Included pixels with at least one excluded 8-neighbour. Pixels outside the
/// grid count as excluded, so included pixels on the border are always boundary.
pub fn boundary(mask: &BitSlice, width: usize, height: usize) -> BitVec {
    if mask.len() != width * height {
        return BitVec::repeat(false, mask.len());
    }
    let included = |x: isize, y: isize| {
        x >= 0
            && y >= 0
            && (x as usize) < width
            && (y as usize) < height
            && mask[y as usize * width + x as usize]
    };

    let rows = (0..height)
        .into_par_iter()
        .map(|y| {
            (0..width)
                .map(|x| {
                    let (x, y) = (x as isize, y as isize);
                    included(x, y)
                        && (-1..=1).any(|dy| {
                            (-1..=1).any(|dx| (dx != 0 || dy != 0) && !included(x + dx, y + dy))
                        })
                })
                .collect::<Vec<bool>>()
        })
        .collect::<Vec<_>>();

    rows.into_iter().flatten().collect()
}

/// Overlay with boundary pixels (widened by `edge_width` inside the mask) in the
/// edge colour at full opacity, other included pixels in the base colour, and
/// excluded pixels transparent.
pub fn render_overlay(mask: &BitSlice, width: u32, height: u32, style: &OverlayStyle) -> RgbaImage {
    let (w, h) = (width as usize, height as usize);
    let mut overlay = RgbaImage::new(width, height);
    if mask.len() != w * h || w == 0 || h == 0 {
        return overlay;
    }

    let edges = boundary(mask, w, h);
    let radius = style.edge_width as isize;
    let near_edge = |x: usize, y: usize| {
        let (x, y) = (x as isize, y as isize);
        (-radius..=radius).any(|dy| {
            (-radius..=radius).any(|dx| {
                let (nx, ny) = (x + dx, y + dy);
                nx >= 0
                    && ny >= 0
                    && (nx as usize) < w
                    && (ny as usize) < h
                    && edges[ny as usize * w + nx as usize]
            })
        })
    };

    let [er, eg, eb] = style.edge_color;
    let [br, bg, bb] = style.base_color;
    let edge = [er, eg, eb, u8::MAX];
    let base = [br, bg, bb, style.base_alpha];

    overlay
        .par_chunks_mut(w * 4)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                if !mask[y * w + x] {
                    continue;
                }
                pixel.copy_from_slice(if near_edge(x, y) { &edge } else { &base });
            }
        });

    overlay
}

pub trait ApplyMask {
    /// Alpha-blends a same-sized overlay on top of `self`.
    fn layering_overlay(&mut self, overlay: &RgbaImage) -> Result<()>;
}

impl ApplyMask for RgbaImage {
    fn layering_overlay(&mut self, overlay: &RgbaImage) -> Result<()> {
        if self.dimensions() != overlay.dimensions() {
            let (width, height) = overlay.dimensions();
            return Err(SegmentError::InvalidImage { width, height });
        }
        imageops::overlay(self, overlay, 0, 0);
        Ok(())
    }
}
