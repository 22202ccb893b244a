use super::colors::{distinct_colors, Color};
use super::overlay::{draw_box, visualize};
use crate::metrics::Mask;
use crate::predictor::{FrameMap, Prompt};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};

const PROMPT_BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Knobs for rendering propagated masks over a frame sequence
#[derive(Debug, Clone)]
pub struct FrameOptions {
    /// Boxes are drawn on frames closer than this to the prompt frame
    pub n_frames_to_draw: usize,
    /// Draw the prompt boxes on the video frames as well
    pub draw_on_video: bool,
    /// Palette size; object ids wrap around it
    pub max_objects: usize,
    pub alpha: f32,
    pub box_thickness: u32,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            n_frames_to_draw: 5,
            draw_on_video: false,
            max_objects: 200,
            alpha: 0.3,
            box_thickness: 10,
        }
    }
}

/// Rendered output of [`visualize_on_frames`]
#[derive(Default)]
pub struct RenderedFrames {
    /// Prompt frame with the prompt boxes drawn, if that frame was rendered
    pub prompt_image: Option<RgbImage>,
    /// Frame index and overlayed frame, in frame order
    pub frames: Vec<(usize, RgbImage)>,
}

/// Sorted files of a frame folder (`0001.jpg`, `0002.jpg`, ...)
pub fn list_frames(frame_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in fs::read_dir(frame_dir)
        .with_context(|| format!("Failed to list frames in {}", frame_dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// Overlay each frame's predicted masks, coloring objects consistently by id
pub fn visualize_on_frames(
    frame_dir: &Path,
    outputs: &FrameMap,
    prompt: &Prompt,
    prompt_idx: usize,
    options: &FrameOptions,
) -> Result<RenderedFrames> {
    let frame_paths = list_frames(frame_dir)?;
    let palette = distinct_colors(options.max_objects.max(1));
    let mut rendered = RenderedFrames::default();

    for (&i, frame_outputs) in outputs {
        let _span = tracing::debug_span!("frame", index = i).entered();

        let Some(path) = frame_paths.get(i) else {
            tracing::warn!("No frame file for index {}, skipping", i);
            continue;
        };
        let mut img = image::open(path)
            .with_context(|| format!("Failed to open frame {}", path.display()))?
            .to_rgb8();

        if i == prompt_idx {
            let mut prompt_img = img.clone();
            for &b in prompt.box_list() {
                draw_box(&mut prompt_img, b, PROMPT_BOX_COLOR, options.box_thickness);
            }
            rendered.prompt_image = Some(prompt_img);
        }

        if options.draw_on_video && i.abs_diff(prompt_idx) < options.n_frames_to_draw {
            for &b in prompt.box_list() {
                draw_box(&mut img, b, PROMPT_BOX_COLOR, options.box_thickness);
            }
        }

        let (masks, colors): (Vec<&Mask>, Vec<Color>) = frame_outputs
            .objects()
            .map(|(obj_id, mask)| (mask, palette[obj_id % palette.len()]))
            .unzip();
        if masks.len() != frame_outputs.out_binary_masks.len() {
            tracing::debug!(
                "{} masks but {} object ids",
                frame_outputs.out_binary_masks.len(),
                frame_outputs.out_obj_ids.len()
            );
        }

        let overlay = visualize(&img, &masks, options.alpha, &colors)
            .with_context(|| format!("Failed to overlay frame {i}"))?;
        rendered.frames.push((i, overlay.blended));
    }

    Ok(rendered)
}
