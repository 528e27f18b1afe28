use crate::config::UpscaleConfig;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

pub mod sam;

/// Bilinear resample on pixel centres; `new_shape` is `(height, width)`.
///
/// Equal source and destination shapes reproduce the input exactly.
pub(crate) fn linear_interpolate(input: ArrayView2<f32>, new_shape: (usize, usize)) -> Array2<f32> {
    let (old_height, old_width) = input.dim();
    let (new_height, new_width) = new_shape;
    if old_height == 0 || old_width == 0 || new_height == 0 || new_width == 0 {
        return Array2::zeros(new_shape);
    }

    let scale_y = old_height as f32 / new_height as f32;
    let scale_x = old_width as f32 / new_width as f32;
    let source = |i: usize, scale: f32, old: usize| {
        let pos = ((i as f32 + 0.5) * scale - 0.5).clamp(0.0, (old - 1) as f32);
        let p0 = pos.floor() as usize;
        let p1 = (p0 + 1).min(old - 1);
        (p0, p1, pos - p0 as f32)
    };
    let columns = (0..new_width)
        .map(|j| source(j, scale_x, old_width))
        .collect::<Vec<_>>();

    let mut output = vec![0f32; new_height * new_width];
    output
        .par_chunks_mut(new_width)
        .enumerate()
        .for_each(|(i, row)| {
            let (y0, y1, dy) = source(i, scale_y, old_height);
            for (value, &(x0, x1, dx)) in row.iter_mut().zip(&columns) {
                let p00 = input[[y0, x0]];
                let p01 = input[[y0, x1]];
                let p10 = input[[y1, x0]];
                let p11 = input[[y1, x1]];

                *value = p00 * (1.0 - dx) * (1.0 - dy)
                    + p01 * dx * (1.0 - dy)
                    + p10 * (1.0 - dx) * dy
                    + p11 * dx * dy;
            }
        });

    Array2::from_shape_vec(new_shape, output).unwrap_or_else(|_| Array2::zeros(new_shape))
}

/// Positive confidences become intensities scaled by 255, everything else 0.
pub(crate) fn confidence_to_intensity(coarse: ArrayView2<f32>) -> Array2<f32> {
    coarse.mapv(|confidence| {
        if confidence > 0.0 {
            (confidence * 255.0).min(255.0)
        } else {
            0.0
        }
    })
}

/// Upscales a coarse confidence grid to `(height, width)` and re-binarizes it
/// to 0 / 255.
///
/// Large scale ratios go through an intermediate resample at
/// `intermediate_factor` times the coarse size so the smoothing is applied
/// before the final stretch.
pub fn upscale_mask(
    coarse: ArrayView2<f32>,
    destination: (usize, usize),
    config: &UpscaleConfig,
) -> Array2<u8> {
    let (height, width) = coarse.dim();
    let intensity = confidence_to_intensity(coarse);

    let ratio = if height == 0 || width == 0 {
        0.0
    } else {
        (destination.0 as f32 / height as f32).max(destination.1 as f32 / width as f32)
    };
    let factor = config.intermediate_factor as usize;
    // Clamped per axis so a short side never blocks the stage.
    let intermediate = (
        (height * factor).min(destination.0),
        (width * factor).min(destination.1),
    );

    let smoothed = if ratio > config.two_stage_ratio && factor > 1 && intermediate != destination {
        let staged = linear_interpolate(intensity.view(), intermediate);
        linear_interpolate(staged.view(), destination)
    } else {
        linear_interpolate(intensity.view(), destination)
    };

    let threshold = config.threshold as f32;
    smoothed.mapv(|value| if value > threshold { 255 } else { 0 })
}
