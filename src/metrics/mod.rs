mod boxes;
mod iou;

pub use boxes::{get_bbox_prompts, read_box_file, BoxXywh};
pub use iou::{calc_iou, load_mask, mask_to_image, Mask};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MetricsError {
    #[error("mask shapes differ: prediction {pred:?}, ground truth {gt:?}")]
    ShapeMismatch { pred: (usize, usize), gt: (usize, usize) },
}
