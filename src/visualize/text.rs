use crate::predictor::Prompt;
use ab_glyph::{point, Font, FontArc, PxScale, ScaleFont};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use std::path::Path;

/// Longest prompt line, in characters
const LINE_MAX_CHARS: usize = 18;
/// Vertical distance between text baselines
const LINE_STEP: i32 = 100;

/// One line of prompt text and the baseline it sits on
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub baseline: i32,
}

/// Lay out a prompt caption at the bottom of a frame `height` pixels tall
///
/// Text prompts get a `Prompt:` header followed by the text wrapped at
/// word boundaries; box prompts get a single `Prompt: bbox` line.
pub fn prompt_layout(prompt: &Prompt, height: u32) -> Vec<TextLine> {
    let h = height as i32;
    let Some(text) = &prompt.text else {
        return vec![TextLine {
            text: "Prompt: bbox".into(),
            baseline: h - LINE_STEP,
        }];
    };

    let n_lines = (text.chars().count() / LINE_MAX_CHARS + 1) as i32;
    let mut lines = vec![TextLine {
        text: "Prompt:".into(),
        baseline: h - LINE_STEP * (n_lines + 1),
    }];

    let words: Vec<&str> = text.split(' ').collect();
    let mut line = String::new();
    let mut i_line = 0;
    for (i, word) in words.iter().enumerate() {
        if line.chars().count() + 1 + word.chars().count() > LINE_MAX_CHARS {
            lines.push(TextLine {
                text: std::mem::take(&mut line),
                baseline: h - LINE_STEP * (n_lines - i_line),
            });
            i_line += 1;
            line.push_str(word);
        } else {
            line.push(' ');
            line.push_str(word);
        }
        if i == words.len() - 1 {
            lines.push(TextLine {
                text: line.clone(),
                baseline: h - LINE_STEP * (n_lines - i_line),
            });
        }
    }

    lines
}

/// Rasterizes caption text with a TrueType/OpenType font
pub struct TextPainter {
    font: FontArc,
    scale: PxScale,
}

impl TextPainter {
    pub fn new(font: FontArc, px_height: f32) -> Self {
        Self {
            font,
            scale: PxScale::from(px_height),
        }
    }

    pub fn from_file(path: &Path, px_height: f32) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .with_context(|| format!("Failed to parse font {}", path.display()))?;
        Ok(Self::new(font, px_height))
    }

    /// Advance width of `text` in pixels
    pub fn text_width(&self, text: &str) -> f32 {
        let scaled = self.font.as_scaled(self.scale);
        let mut width = 0.0;
        let mut prev = None;
        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = prev {
                width += scaled.kern(prev, id);
            }
            width += scaled.h_advance(id);
            prev = Some(id);
        }
        width
    }

    /// Draw `text` with its left end at `x` and its baseline at `baseline`
    pub fn draw(&self, img: &mut RgbImage, text: &str, x: i32, baseline: i32, color: Rgb<u8>) {
        let scaled = self.font.as_scaled(self.scale);
        let (width, height) = img.dimensions();
        let mut caret = x as f32;
        let mut prev = None;

        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = prev {
                caret += scaled.kern(prev, id);
            }
            let glyph = id.with_scale_and_position(self.scale, point(caret, baseline as f32));
            caret += scaled.h_advance(id);
            prev = Some(id);

            let Some(outlined) = self.font.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let px = bounds.min.x as i32 + gx as i32;
                let py = bounds.min.y as i32 + gy as i32;
                if px < 0 || py < 0 || px >= width as i32 || py >= height as i32 {
                    return;
                }
                let pixel = img.get_pixel_mut(px as u32, py as u32);
                for (dst, &src) in pixel.0.iter_mut().zip(&color.0) {
                    *dst = (src as f32 * coverage + *dst as f32 * (1.0 - coverage)).round() as u8;
                }
            });
        }
    }

    /// Draw each line horizontally centered
    pub fn draw_centered(&self, img: &mut RgbImage, lines: &[TextLine], color: Rgb<u8>) {
        let width = img.width() as f32;
        for line in lines {
            let x = ((width - self.text_width(&line.text)) / 2.0) as i32;
            self.draw(img, &line.text, x, line.baseline, color);
        }
    }
}

/// Copy of `frame` with the prompt caption written in white
pub fn put_prompt_on_frame(prompt: &Prompt, frame: &RgbImage, painter: &TextPainter) -> RgbImage {
    let mut out = frame.clone();
    let lines = prompt_layout(prompt, out.height());
    painter.draw_centered(&mut out, &lines, Rgb([255, 255, 255]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(lines: &[TextLine]) -> Vec<(&str, i32)> {
        lines.iter().map(|l| (l.text.as_str(), l.baseline)).collect()
    }

    #[test]
    fn box_prompt_caption() {
        let prompt = Prompt::positive_boxes(vec![[0.1, 0.1, 0.2, 0.2]]);
        assert_eq!(texts(&prompt_layout(&prompt, 1080)), [("Prompt: bbox", 980)]);
    }

    #[test]
    fn short_text_fits_one_line() {
        let lines = prompt_layout(&Prompt::text("black cat"), 1000);
        assert_eq!(texts(&lines), [("Prompt:", 800), (" black cat", 900)]);
    }

    #[test]
    fn long_text_wraps_at_words() {
        // 27 characters: two caption lines below the header
        let lines = prompt_layout(&Prompt::text("small red kite over the sea"), 1000);
        assert_eq!(
            texts(&lines),
            [
                ("Prompt:", 700),
                (" small red kite", 800),
                ("over the sea", 900),
            ]
        );
    }

    /// A system font, when the machine has one of the common ones installed
    fn system_painter(px_height: f32) -> Option<TextPainter> {
        [
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/TTF/DejaVuSans.ttf",
            "/usr/share/fonts/dejavu/DejaVuSans.ttf",
            "/Library/Fonts/Arial.ttf",
            "C:\\Windows\\Fonts\\arial.ttf",
        ]
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .and_then(|p| TextPainter::from_file(p, px_height).ok())
    }

    fn lit_pixels(img: &RgbImage) -> Vec<(u32, u32)> {
        img.enumerate_pixels()
            .filter(|(_, _, p)| p.0 != [0, 0, 0])
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    #[test]
    fn draw_puts_ink_above_the_baseline() {
        let Some(painter) = system_painter(20.0) else {
            return;
        };
        let mut img = RgbImage::new(100, 40);
        painter.draw(&mut img, "Hi", 10, 30, Rgb([255, 255, 255]));

        let lit = lit_pixels(&img);
        assert!(!lit.is_empty());
        assert!(lit.iter().all(|&(x, y)| x >= 10 && y <= 30));
        assert!(painter.text_width("Hi") > 0.0);
    }

    #[test]
    fn draw_clips_text_outside_the_image() {
        let Some(painter) = system_painter(20.0) else {
            return;
        };
        let mut img = RgbImage::new(20, 20);
        painter.draw(&mut img, "Wide text", -50, 200, Rgb([255, 255, 255]));
        assert!(lit_pixels(&img).is_empty());
    }

    #[test]
    fn caption_is_centered() {
        let Some(painter) = system_painter(20.0) else {
            return;
        };
        let frame = RgbImage::new(200, 300);
        let out = put_prompt_on_frame(&Prompt::positive_boxes(vec![]), &frame, &painter);

        let lit = lit_pixels(&out);
        let min_x = lit.iter().map(|p| p.0).min().unwrap();
        let max_x = lit.iter().map(|p| p.0).max().unwrap();
        // ink is balanced around the middle column, give or take side bearings
        assert!((min_x as i32 + max_x as i32 - 200).abs() <= 6);
        // single "Prompt: bbox" line sitting on H - 100
        assert!(lit.iter().all(|p| p.1 <= 206 && p.1 > 150));
    }

    #[test]
    fn every_word_is_kept() {
        let text = "a very long prompt describing several distinct objects in a scene";
        let lines = prompt_layout(&Prompt::text(text), 2000);
        let joined: Vec<&str> = lines[1..]
            .iter()
            .flat_map(|l| l.text.split_whitespace())
            .collect();
        assert_eq!(joined.join(" "), text);
    }
}
