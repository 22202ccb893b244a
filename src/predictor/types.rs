use crate::metrics::{BoxXywh, Mask};
use ndarray::Array2;
use serde::de::{Deserializer, Error as _};
use serde::{Deserialize, Serialize};

/// Which way propagation runs from the prompted frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationDirection {
    #[default]
    Both,
    Forward,
    Backward,
}

/// Requests understood by the predictor session API
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    StartSession {
        resource_path: String,
    },
    AddPrompt {
        session_id: String,
        frame_index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bounding_boxes: Option<Vec<BoxXywh>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bounding_box_labels: Option<Vec<i64>>,
    },
    PropagateInVideo {
        session_id: String,
        propagation_direction: PropagationDirection,
        start_frame_idx: usize,
    },
    CloseSession {
        session_id: String,
    },
}

/// Reply to a non-streaming request
///
/// Only `session_id` is interpreted; everything else is kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One streamed propagation result
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FrameResponse {
    pub frame_index: usize,
    pub outputs: FrameOutputs,
}

/// Per-frame model outputs: one mask per tracked object
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FrameOutputs {
    #[serde(deserialize_with = "masks_from_rows")]
    pub out_binary_masks: Vec<Mask>,
    pub out_obj_ids: Vec<usize>,
}

impl FrameOutputs {
    /// Masks paired with their object ids
    pub fn objects(&self) -> impl Iterator<Item = (usize, &Mask)> {
        self.out_obj_ids.iter().copied().zip(&self.out_binary_masks)
    }
}

/// Prompt applied on a single frame: text, boxes, or both
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub text: Option<String>,
    pub boxes: Option<BoxPrompt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxPrompt {
    /// Normalized xywh boxes
    pub boxes: Vec<BoxXywh>,
    /// 1 for a positive box, 0 for a negative one
    pub labels: Vec<i64>,
}

impl Prompt {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            boxes: None,
        }
    }

    /// Box prompt with every box marked positive
    pub fn positive_boxes(boxes: Vec<BoxXywh>) -> Self {
        let labels = vec![1; boxes.len()];
        Self {
            text: None,
            boxes: Some(BoxPrompt { boxes, labels }),
        }
    }

    pub fn box_list(&self) -> &[BoxXywh] {
        match &self.boxes {
            Some(b) => &b.boxes,
            None => &[],
        }
    }
}

/// Mask cells may arrive as booleans or numbers
#[derive(Deserialize)]
#[serde(untagged)]
enum Cell {
    Flag(bool),
    Value(f64),
}

impl Cell {
    fn is_set(&self) -> bool {
        match *self {
            Cell::Flag(b) => b,
            Cell::Value(v) => v != 0.0,
        }
    }
}

fn masks_from_rows<'de, D>(deserializer: D) -> Result<Vec<Mask>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<Vec<Cell>>> = Vec::deserialize(deserializer)?;

    raw.into_iter()
        .map(|rows| {
            let height = rows.len();
            let width = rows.first().map_or(0, Vec::len);
            if rows.iter().any(|row| row.len() != width) {
                return Err(D::Error::custom("mask rows have different lengths"));
            }
            let cells: Vec<bool> = rows.iter().flatten().map(Cell::is_set).collect();
            Array2::from_shape_vec((height, width), cells).map_err(D::Error::custom)
        })
        .collect()
}
