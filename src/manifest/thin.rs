use super::{sorted_file_names, split_name, DatasetParser, ManifestRecord};
use anyhow::Result;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// ThinObject5K: `<words_with_underscores>PNG<n>` names, masks in `masks/`
pub struct Thin5kParser;

fn before_png() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("(.*)PNG").expect("static regex"))
}

/// Extract the prompt from a ThinObject5K file stem
///
/// Everything before the last `PNG` marker, underscores turned into spaces
/// and trimmed: `black_cat_PNG1` → `black cat`. No marker yields "".
pub fn extract_prompt_thin(stem: &str) -> String {
    let Some(caps) = before_png().captures(stem) else {
        return String::new();
    };
    caps[1].replace('_', " ").trim().to_string()
}

impl DatasetParser for Thin5kParser {
    fn name(&self) -> &'static str {
        "thin5k"
    }

    fn manifest_file_name(&self) -> &'static str {
        "ThinObject5K.json"
    }

    fn collect(&self, data_dir: &Path) -> Result<Vec<ManifestRecord>> {
        let root = data_dir.join("ThinObject5K");
        let im_dir = root.join("images");
        let mask_dir = root.join("masks");
        let mut records = Vec::new();

        for file_name in sorted_file_names(&im_dir)? {
            let stem = split_name(&file_name);
            let prompt = extract_prompt_thin(stem);

            let mask_path = mask_dir.join(format!("{stem}.png"));
            if !mask_path.exists() || prompt.is_empty() {
                tracing::debug!("Skipping {}", file_name);
                continue;
            }

            records.push(ManifestRecord::new(&im_dir.join(&file_name), &mask_path, prompt));
        }

        Ok(records)
    }
}
