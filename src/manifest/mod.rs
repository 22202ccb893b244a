mod big;
mod dis;
mod thin;

pub use big::BigParser;
pub use dis::Dis5kParser;
pub use thin::Thin5kParser;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One manifest entry: an image, its ground-truth mask and a text prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub img: String,
    pub mask: String,
    pub prompt: String,
}

impl ManifestRecord {
    fn new(img: &Path, mask: &Path, prompt: impl Into<String>) -> Self {
        Self {
            img: img.to_string_lossy().into_owned(),
            mask: mask.to_string_lossy().into_owned(),
            prompt: prompt.into(),
        }
    }
}

/// Trait for dataset layouts that can be turned into a manifest
pub trait DatasetParser {
    /// Short dataset name used in logs and on the command line
    fn name(&self) -> &'static str;

    /// File name of the manifest written next to the dataset folders
    fn manifest_file_name(&self) -> &'static str;

    /// Scan the dataset under `data_dir` and collect every usable record.
    ///
    /// Entries with an unparseable name or without a mask are skipped.
    fn collect(&self, data_dir: &Path) -> Result<Vec<ManifestRecord>>;
}

/// Parsers for every supported dataset, in the order `manifest all` runs them
pub fn all_parsers() -> Vec<Box<dyn DatasetParser>> {
    vec![
        Box::new(BigParser),
        Box::new(Dis5kParser),
        Box::new(Thin5kParser),
    ]
}

/// Build the manifest for one dataset and write it to `<data_dir>/<manifest>`
///
/// Returns the manifest path and the number of records written.
pub fn build_manifest(parser: &dyn DatasetParser, data_dir: &Path) -> Result<(PathBuf, usize)> {
    let _span = tracing::info_span!("build_manifest", dataset = parser.name()).entered();

    let records = parser
        .collect(data_dir)
        .with_context(|| format!("Failed to scan {} dataset", parser.name()))?;

    let out_path = data_dir.join(parser.manifest_file_name());
    write_manifest(&out_path, &records)?;

    tracing::info!(
        "Wrote {} records to {}",
        records.len(),
        out_path.display()
    );

    Ok((out_path, records.len()))
}

/// Write records as a 2-space indented JSON array, non-ASCII kept literal
pub fn write_manifest(path: &Path, records: &[ManifestRecord]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create manifest {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    serde_json::to_writer_pretty(&mut writer, records)
        .with_context(|| format!("Failed to serialize manifest {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to write manifest {}", path.display()))?;

    Ok(())
}

/// File names in `dir`, sorted so manifests come out in a stable order
fn sorted_file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let entry = entry?;
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => tracing::debug!("Skipping non UTF-8 file name {:?}", raw),
        }
    }
    names.sort();
    Ok(names)
}

/// File name with its last extension removed
fn split_name(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
}
