use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use image::{RgbaImage, imageops};
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::BBox;

/// Clips `roi` to the frame. `None` when nothing of it is inside.
pub fn clip_roi(roi: &BBox, frame_width: u32, frame_height: u32) -> Option<BBox> {
    let frame_w = i32::try_from(frame_width).unwrap_or(i32::MAX);
    let frame_h = i32::try_from(frame_height).unwrap_or(i32::MAX);
    let x0 = roi.x.clamp(0, frame_w);
    let y0 = roi.y.clamp(0, frame_h);
    let x1 = roi.right().clamp(0, frame_w);
    let y1 = roi.bottom().clamp(0, frame_h);
    let clipped = BBox::new(x0, y0, x1 - x0, y1 - y0);
    (!clipped.is_empty()).then_some(clipped)
}

/// Crops `roi` out of `frame`, resizes it to `size` x `size` and returns a
/// `(1, size, size, 3)` tensor of RGB values in `[0, 1]`.
///
/// Runs the normalisation on the current rayon pool; call it inside
/// `ThreadPool::install` to bound the worker count.
pub fn prepare_roi(frame: &RgbaImage, roi: &BBox, size: u32) -> Result<Array4<f32>> {
    if size == 0 {
        return Err(anyhow!("classifier input size must be positive"));
    }
    let (width, height) = frame.dimensions();
    let roi = clip_roi(roi, width, height)
        .ok_or_else(|| anyhow!("roi {roi:?} lies outside the {width}x{height} frame"))?;

    // Clipped values are non-negative and inside the frame.
    let crop = imageops::crop_imm(
        frame,
        roi.x as u32,
        roi.y as u32,
        roi.width as u32,
        roi.height as u32,
    )
    .to_image();

    let src_image = fir::images::Image::from_vec_u8(
        crop.width(),
        crop.height(),
        crop.into_raw(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(size, size, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let normalized: Vec<f32> = resized
        .par_chunks_exact(4)
        .flat_map_iter(|px| {
            [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ]
        })
        .collect();
    Array4::<f32>::from_shape_vec((1, size as usize, size as usize, 3), normalized)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))
}
