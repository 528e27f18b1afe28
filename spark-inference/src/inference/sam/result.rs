use crate::config::OverlayStyle;
use crate::utils::graph::BoundingBox;
use crate::utils::masks::{boundary, render_overlay};
use bitvec::prelude::*;
use image::{GrayImage, RgbaImage};

/// A binary mask at source resolution, row-major, with the decoder's score for it.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentationResult {
    pub mask: BitVec,
    pub score: f32,
    pub width: u32,
    pub height: u32,
}

impl SegmentationResult {
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let index = y as usize * self.width as usize + x as usize;
        self.mask.get(index).is_some_and(|included| *included)
    }

    /// Number of included pixels.
    pub fn area(&self) -> usize {
        self.mask.count_ones()
    }

    /// Tight box around the included pixels, exclusive on the far edges.
    pub fn bbox(&self) -> Option<BoundingBox<u32>> {
        let width = self.width as usize;
        if width == 0 {
            return None;
        }
        let mut found: Option<BoundingBox<u32>> = None;
        for index in self.mask.iter_ones() {
            let (x, y) = ((index % width) as u32, (index / width) as u32);
            found = Some(match found {
                None => BoundingBox { x1: x, y1: y, x2: x + 1, y2: y + 1 },
                Some(b) => BoundingBox {
                    x1: b.x1.min(x),
                    y1: b.y1.min(y),
                    x2: b.x2.max(x + 1),
                    y2: b.y2.max(y + 1),
                },
            });
        }
        found
    }

    pub fn boundary(&self) -> BitVec {
        boundary(&self.mask, self.width as usize, self.height as usize)
    }

    /// The mask as a 0 / 255 grayscale image.
    pub fn to_gray(&self) -> GrayImage {
        let pixels = self
            .mask
            .iter()
            .map(|included| if *included { u8::MAX } else { 0 })
            .collect::<Vec<_>>();
        GrayImage::from_raw(self.width, self.height, pixels)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }

    pub fn overlay(&self, style: &OverlayStyle) -> RgbaImage {
        render_overlay(&self.mask, self.width, self.height, style)
    }
}
