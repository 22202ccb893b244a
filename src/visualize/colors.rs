/// RGB color with channels in [0, 1]
pub type Color = [f32; 3];

const GOLDEN_RATIO_CONJUGATE: f32 = 0.618_034;

/// `n` visually distinct colors
///
/// Hues follow a golden-ratio walk so neighbouring ids land far apart on the
/// color wheel; saturation and value alternate to separate colors whose hues
/// come close after many steps.
pub fn distinct_colors(n: usize) -> Vec<Color> {
    let mut hue = 0.0f32;
    (0..n)
        .map(|i| {
            let saturation = [0.9, 0.65, 0.8][i % 3];
            let value = [0.95, 0.8][i % 2];
            let color = hsv_to_rgb(hue, saturation, value);
            hue = (hue + GOLDEN_RATIO_CONJUGATE).fract();
            color
        })
        .collect()
}

/// Convert HSV (all components in [0, 1]) to RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Color {
    let h6 = h * 6.0;
    let sector = h6.floor() as i32 % 6;
    let f = h6 - h6.floor();
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    match sector {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_requested_count() {
        assert!(distinct_colors(0).is_empty());
        assert_eq!(distinct_colors(200).len(), 200);
    }

    #[test]
    fn colors_are_in_range_and_never_black() {
        for color in distinct_colors(50) {
            assert!(color.iter().all(|c| (0.0..=1.0).contains(c)));
            assert!(color.iter().any(|&c| c * 255.0 >= 1.0));
        }
    }

    #[test]
    fn neighbours_differ() {
        let colors = distinct_colors(20);
        for pair in colors.windows(2) {
            let dist: f32 = pair[0].iter().zip(&pair[1]).map(|(a, b)| (a - b).abs()).sum();
            assert!(dist > 0.2, "{pair:?}");
        }
    }

    #[test]
    fn primary_hues() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), [1.0, 0.0, 0.0]);
        assert_eq!(hsv_to_rgb(0.5, 1.0, 1.0), [0.0, 1.0, 1.0]);
    }
}
