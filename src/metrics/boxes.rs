use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Normalized `[x_min, y_min, width, height]` box
pub type BoxXywh = [f64; 4];

/// Convert a normalized center box `[x_c, y_c, w, h]` to `[x_min, y_min, w, h]`
///
/// The corner is clamped at 0 and the size at 1.
pub fn cxcywh_to_xywh([x_c, y_c, w, h]: [f64; 4]) -> BoxXywh {
    [
        (x_c - w / 2.0).max(0.0),
        (y_c - h / 2.0).max(0.0),
        w.min(1.0),
        h.min(1.0),
    ]
}

/// Parse a `class x_c y_c w h` label line into an xywh box
///
/// Lines without exactly five fields or with non-numeric coordinates give `None`.
pub fn parse_box_line(line: &str) -> Option<BoxXywh> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }

    let mut coords = [0.0; 4];
    for (slot, field) in coords.iter_mut().zip(&fields[1..]) {
        *slot = field.parse().ok()?;
    }
    Some(cxcywh_to_xywh(coords))
}

/// Read every well-formed box of a label file
pub fn read_box_file(path: &Path) -> Result<Vec<BoxXywh>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read labels {}", path.display()))?;

    let mut boxes = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        match parse_box_line(line) {
            Some(b) => boxes.push(b),
            None if line.trim().is_empty() => {}
            None => tracing::debug!("{}:{}: malformed box line", path.display(), line_no + 1),
        }
    }
    Ok(boxes)
}

/// Boxes from every `.txt` file in `label_dir`, keyed by file stem
pub fn get_bbox_prompts(label_dir: &Path) -> Result<BTreeMap<String, Vec<BoxXywh>>> {
    let mut prompts = BTreeMap::new();

    let entries = fs::read_dir(label_dir)
        .with_context(|| format!("Failed to list {}", label_dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        prompts.insert(stem.to_string(), read_box_file(&path)?);
    }

    tracing::debug!("Loaded box prompts for {} files", prompts.len());
    Ok(prompts)
}
