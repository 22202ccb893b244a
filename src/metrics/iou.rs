use super::MetricsError;
use anyhow::{Context, Result};
use image::{GrayImage, Luma};
use ndarray::{Array2, Zip};
use std::path::Path;

/// Binary segmentation mask, indexed `[row, column]`
pub type Mask = Array2<bool>;

/// Intersection over union of two binary masks of the same shape
///
/// Two empty masks agree perfectly, so an empty union scores 1.0.
pub fn calc_iou(pred: &Mask, gt: &Mask) -> Result<f64, MetricsError> {
    if pred.dim() != gt.dim() {
        return Err(MetricsError::ShapeMismatch {
            pred: pred.dim(),
            gt: gt.dim(),
        });
    }

    let mut intersection = 0usize;
    let mut union = 0usize;
    Zip::from(pred).and(gt).for_each(|&p, &g| {
        intersection += (p && g) as usize;
        union += (p || g) as usize;
    });

    if union == 0 {
        return Ok(1.0);
    }
    Ok(intersection as f64 / union as f64)
}

/// Load a mask image; any non-black pixel is foreground
///
/// Channels are read at 16 bits without luma weighting, so label images
/// with small ids and faint colored pixels count as well.
pub fn load_mask(path: &Path) -> Result<Mask> {
    let pixels = image::open(path)
        .with_context(|| format!("Failed to open mask {}", path.display()))?
        .to_rgb16();
    let (width, height) = pixels.dimensions();

    Ok(Array2::from_shape_fn(
        (height as usize, width as usize),
        |(y, x)| pixels.get_pixel(x as u32, y as u32).0.iter().any(|&c| c > 0),
    ))
}

/// Mask as a black and white image, foreground at 255
pub fn mask_to_image(mask: &Mask) -> GrayImage {
    let (height, width) = mask.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([if mask[(y as usize, x as usize)] { 255 } else { 0 }])
    })
}
