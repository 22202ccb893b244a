use super::colors::{distinct_colors, Color};
use crate::metrics::{BoxXywh, Mask};
use anyhow::{bail, Result};
use image::{Rgb, RgbImage};

/// Result of compositing masks over a frame
pub struct Overlay {
    /// Pixels covered by any mask
    pub bitmap: Mask,
    /// Masks painted in their colors on black
    pub color_layer: RgbImage,
    /// Frame with the color layer blended on top
    pub blended: RgbImage,
}

/// Paint `masks` over `img` and alpha-blend the result
///
/// Mask `i` is drawn in `colors[i]`, later masks covering earlier ones. When
/// `colors` is empty a distinct palette is generated.
pub fn visualize(img: &RgbImage, masks: &[&Mask], alpha: f32, colors: &[Color]) -> Result<Overlay> {
    let _span = tracing::debug_span!("visualize", masks = masks.len()).entered();

    let generated;
    let colors = if colors.is_empty() {
        generated = distinct_colors(masks.len());
        &generated[..]
    } else {
        colors
    };
    if colors.len() < masks.len() {
        bail!("{} masks but only {} colors", masks.len(), colors.len());
    }

    let (width, height) = img.dimensions();
    let expected = (height as usize, width as usize);
    let mut color_layer = RgbImage::new(width, height);

    for (mask, color) in masks.iter().zip(colors) {
        if mask.dim() != expected {
            bail!("mask shape {:?} does not match frame {:?}", mask.dim(), expected);
        }
        let fill = to_pixel(*color);
        for ((y, x), &set) in mask.indexed_iter() {
            if set {
                color_layer.put_pixel(x as u32, y as u32, fill);
            }
        }
    }

    let bitmap = Mask::from_shape_fn(expected, |(y, x)| {
        color_layer.get_pixel(x as u32, y as u32).0.iter().any(|&c| c > 0)
    });

    let blended = RgbImage::from_fn(width, height, |x, y| {
        let base = img.get_pixel(x, y);
        let top = if bitmap[(y as usize, x as usize)] {
            color_layer.get_pixel(x, y)
        } else {
            base
        };
        Rgb(std::array::from_fn(|c| {
            blend_channel(top[c], base[c], alpha)
        }))
    });

    Ok(Overlay {
        bitmap,
        color_layer,
        blended,
    })
}

/// `top * alpha + base * (1 - alpha)`, rounded and saturated
fn blend_channel(top: u8, base: u8, alpha: f32) -> u8 {
    (top as f32 * alpha + base as f32 * (1.0 - alpha))
        .round()
        .clamp(0.0, 255.0) as u8
}

fn to_pixel(color: Color) -> Rgb<u8> {
    Rgb(color.map(|c| (c * 255.0).clamp(0.0, 255.0) as u8))
}

/// Outline a normalized xywh box, `thickness` pixels wide, centered on its edges
pub fn draw_box(img: &mut RgbImage, [x, y, w, h]: BoxXywh, color: Rgb<u8>, thickness: u32) {
    let (width, height) = img.dimensions();
    let (fw, fh) = (width as f64, height as f64);

    let x0 = (x * fw) as i64;
    let y0 = (y * fh) as i64;
    let x1 = ((x + w) * fw) as i64;
    let y1 = ((y + h) * fh) as i64;
    let half = (thickness / 2) as i64;

    let outer_x = (x0 - half).max(0)..=(x1 + half).min(width as i64 - 1);
    let outer_y = (y0 - half).max(0)..=(y1 + half).min(height as i64 - 1);

    for py in outer_y {
        for px in outer_x.clone() {
            let inside = px > x0 + half && px < x1 - half && py > y0 + half && py < y1 - half;
            if !inside {
                img.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn blends_masked_pixels_only() {
        let img = RgbImage::from_pixel(2, 2, Rgb([100, 100, 100]));
        let mask = array![[true, false], [false, false]];

        let overlay = visualize(&img, &[&mask], 0.5, &[[1.0, 0.0, 0.0]]).unwrap();

        assert_eq!(overlay.bitmap, mask);
        assert_eq!(*overlay.color_layer.get_pixel(0, 0), Rgb([255, 0, 0]));
        assert_eq!(*overlay.color_layer.get_pixel(1, 0), Rgb([0, 0, 0]));
        // 255 * 0.5 + 100 * 0.5 = 177.5
        assert_eq!(*overlay.blended.get_pixel(0, 0), Rgb([178, 50, 50]));
        assert_eq!(*overlay.blended.get_pixel(1, 1), Rgb([100, 100, 100]));
    }

    #[test]
    fn later_masks_cover_earlier_ones() {
        let img = RgbImage::new(2, 1);
        let a = array![[true, true]];
        let b = array![[false, true]];

        let overlay = visualize(&img, &[&a, &b], 1.0, &[[0.0, 0.0, 1.0], [0.0, 1.0, 0.0]]).unwrap();

        assert_eq!(*overlay.blended.get_pixel(0, 0), Rgb([0, 0, 255]));
        assert_eq!(*overlay.blended.get_pixel(1, 0), Rgb([0, 255, 0]));
    }

    #[test]
    fn generates_palette_when_no_colors_given() {
        let img = RgbImage::new(3, 1);
        let mask = array![[false, true, false]];
        let overlay = visualize(&img, &[&mask], 0.5, &[]).unwrap();
        assert_eq!(overlay.bitmap, mask);
    }

    #[test]
    fn rejects_mismatched_mask() {
        let img = RgbImage::new(3, 2);
        let mask = Mask::from_elem((3, 2), true);
        assert!(visualize(&img, &[&mask], 0.3, &[]).is_err());
    }

    #[test]
    fn thin_box_outline() {
        let mut img = RgbImage::new(8, 8);
        let green = Rgb([0, 255, 0]);
        draw_box(&mut img, [0.25, 0.25, 0.5, 0.5], green, 1);

        assert_eq!(*img.get_pixel(2, 2), green);
        assert_eq!(*img.get_pixel(6, 6), green);
        assert_eq!(*img.get_pixel(2, 4), green);
        assert_eq!(*img.get_pixel(4, 4), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(7, 7), Rgb([0, 0, 0]));
    }

    #[test]
    fn thick_box_is_clipped_to_frame() {
        let mut img = RgbImage::new(20, 20);
        let green = Rgb([0, 255, 0]);
        draw_box(&mut img, [0.0, 0.0, 1.0, 1.0], green, 10);

        assert_eq!(*img.get_pixel(0, 0), green);
        assert_eq!(*img.get_pixel(19, 19), green);
        assert_eq!(*img.get_pixel(4, 10), green);
        assert_eq!(*img.get_pixel(10, 10), Rgb([0, 0, 0]));
    }
}
