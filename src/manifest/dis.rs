use super::{sorted_file_names, split_name, DatasetParser, ManifestRecord};
use anyhow::Result;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// DIS5K splits, scanned in this order
const SUBDIRS: [&str; 6] = ["DIS-TR", "DIS-VD", "DIS-TE1", "DIS-TE2", "DIS-TE3", "DIS-TE4"];

/// DIS5K: `<n>#<group>#<n>#<Prompt>#<id>` names, masks in a sibling `gt/`
pub struct Dis5kParser;

fn camel_word() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new("[A-Z][a-z]+").expect("static regex"))
}

/// Extract the prompt from a DIS5K file stem
///
/// The prompt is the fourth `#`-separated field (`1#Animal#4#BlackCat#17`).
/// CamelCase prompts are split into words (`BlackCat` → `Black Cat`).
/// Prompts without such words, like `UAV`, are returned as-is. Stems with
/// fewer than five `#`-separated parts yield an empty prompt.
pub fn extract_prompt_dis(stem: &str) -> String {
    let parts: Vec<&str> = stem.split('#').collect();
    if parts.len() < 5 {
        return String::new();
    }
    let raw = parts[3];

    let words: Vec<&str> = camel_word().find_iter(raw).map(|m| m.as_str()).collect();
    if words.is_empty() {
        raw.to_string()
    } else {
        words.join(" ")
    }
}

impl DatasetParser for Dis5kParser {
    fn name(&self) -> &'static str {
        "dis5k"
    }

    fn manifest_file_name(&self) -> &'static str {
        "DIS5K.json"
    }

    fn collect(&self, data_dir: &Path) -> Result<Vec<ManifestRecord>> {
        let root = data_dir.join("DIS5K");
        let mut records = Vec::new();

        for subdir in SUBDIRS {
            let im_dir = root.join(subdir).join("im");
            let gt_dir = root.join(subdir).join("gt");
            if !im_dir.is_dir() {
                tracing::warn!("Missing split {}, skipping", im_dir.display());
                continue;
            }

            let before = records.len();
            for file_name in sorted_file_names(&im_dir)? {
                let stem = split_name(&file_name);
                let prompt = extract_prompt_dis(stem);

                let mask_path = gt_dir.join(format!("{stem}.png"));
                if !mask_path.exists() || prompt.is_empty() {
                    tracing::debug!("Skipping {}", file_name);
                    continue;
                }

                records.push(ManifestRecord::new(&im_dir.join(&file_name), &mask_path, prompt));
            }
            tracing::debug!("{}: {} records", subdir, records.len() - before);
        }

        Ok(records)
    }
}
