use crate::error::{Result, SegmentError};
use crate::utils::graph::SamPrompt;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use ndarray::{Array2, Array3, Array4};
use num::{Num, ToPrimitive};
use rayon::prelude::*;

/// Decoder labels for the two corners of a box prompt.
const BOX_TOP_LEFT_LABEL: f32 = 2.0;
const BOX_BOTTOM_RIGHT_LABEL: f32 = 3.0;

pub trait ExtraToTensor {
    /// Planar `[1, 3, size, size]` tensor with samples mapped from [0, 255] to [-1, 1].
    fn extra_standard_image_to_tensor(&self, size: u32) -> Result<Array4<f32>>;
}

impl ExtraToTensor for DynamicImage {
    fn extra_standard_image_to_tensor(&self, size: u32) -> Result<Array4<f32>> {
        let (width, height) = self.dimensions();
        if width == 0 || height == 0 {
            return Err(SegmentError::InvalidImage { width, height });
        }

        let rgba = self.resize_exact(size, size, FilterType::Triangle).to_rgba8();
        let side = size as usize;
        let plane = side * side;

        let mut tensor = vec![0f32; plane * 3];
        tensor
            .par_chunks_mut(plane)
            .enumerate()
            .for_each(|(channel, out)| {
                out.iter_mut()
                    .zip(rgba.pixels())
                    .for_each(|(value, pixel)| *value = pixel.0[channel] as f32 / 255. * 2. - 1.);
            });

        Array4::from_shape_vec((1, 3, side, side), tensor)
            .map_err(|err| SegmentError::Config(err.to_string()))
    }
}

/// Prompt coordinates `[1, N, 2]` and labels `[1, N]` in the encoder's coordinate space.
#[derive(Clone, Debug)]
pub struct EncodedPrompt {
    pub coords: Array3<f32>,
    pub labels: Array2<f32>,
}

impl EncodedPrompt {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Scales each axis independently by `fixed_size / source_dim`, matching the
/// non-uniform resize of [`ExtraToTensor`]. A box becomes two trailing corner points.
pub fn encode_prompt<T>(
    prompt: &SamPrompt<T>,
    source_size: (u32, u32),
    fixed_size: u32,
) -> Result<EncodedPrompt>
where
    T: Num + ToPrimitive + Copy,
{
    if prompt.is_empty() {
        return Err(SegmentError::EmptyPrompt);
    }
    let (width, height) = source_size;
    if width == 0 || height == 0 {
        return Err(SegmentError::InvalidImage { width, height });
    }
    let scale_x = fixed_size as f32 / width as f32;
    let scale_y = fixed_size as f32 / height as f32;

    let mut coords = Vec::with_capacity((prompt.points.len() + 2) * 2);
    let mut labels = Vec::with_capacity(prompt.points.len() + 2);

    for point in &prompt.points {
        let x = point.point.x.to_f32().unwrap_or(f32::NAN);
        let y = point.point.y.to_f32().unwrap_or(f32::NAN);
        coords.extend([x * scale_x, y * scale_y]);
        labels.push(point.label.value());
    }

    if let Some(bbox) = &prompt.bbox {
        let bbox = bbox.normalized().ok_or_else(|| {
            let [x1, y1, x2, y2] =
                [bbox.x1, bbox.y1, bbox.x2, bbox.y2].map(|v| v.to_f32().unwrap_or(f32::NAN));
            SegmentError::MalformedBox { x1, y1, x2, y2 }
        })?;
        coords.extend([
            bbox.x1 * scale_x,
            bbox.y1 * scale_y,
            bbox.x2 * scale_x,
            bbox.y2 * scale_y,
        ]);
        labels.extend([BOX_TOP_LEFT_LABEL, BOX_BOTTOM_RIGHT_LABEL]);
    }

    let count = labels.len();
    let coords = Array3::from_shape_vec((1, count, 2), coords)
        .map_err(|err| SegmentError::Config(err.to_string()))?;
    let labels = Array2::from_shape_vec((1, count), labels)
        .map_err(|err| SegmentError::Config(err.to_string()))?;

    Ok(EncodedPrompt { coords, labels })
}
