use super::{sorted_file_names, split_name, DatasetParser, ManifestRecord};
use anyhow::Result;
use std::path::Path;

/// BIG test split: `<digits>_<digits>_o_<prompt>_im.jpg` with a `_gt.png` mask
pub struct BigParser;

/// Minimum number of `_`-separated parts in an image stem
const MIN_PARTS: usize = 5;

impl BigParser {
    /// Prompt and mask stem for an image stem, if the name follows the convention
    fn parse_stem(stem: &str) -> Option<(&str, String)> {
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() < MIN_PARTS {
            return None;
        }
        let (last, head) = parts.split_last()?;
        if *last != "im" {
            return None;
        }
        let prompt = *head.last()?;
        Some((prompt, format!("{}_gt.png", head.join("_"))))
    }
}

impl DatasetParser for BigParser {
    fn name(&self) -> &'static str {
        "big"
    }

    fn manifest_file_name(&self) -> &'static str {
        "BIG.json"
    }

    fn collect(&self, data_dir: &Path) -> Result<Vec<ManifestRecord>> {
        let dir = data_dir.join("BIG").join("test");
        let mut records = Vec::new();

        for file_name in sorted_file_names(&dir)? {
            let stem = split_name(&file_name);
            let Some((prompt, mask_name)) = Self::parse_stem(stem) else {
                continue;
            };

            let img_path = dir.join(&file_name);
            let mask_path = dir.join(&mask_name);
            if !mask_path.exists() {
                tracing::debug!("No mask for {}, skipping", img_path.display());
                continue;
            }

            records.push(ManifestRecord::new(&img_path, &mask_path, prompt));
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::touch;

    #[test]
    fn parses_prompt_and_mask_name() {
        let (prompt, mask) = BigParser::parse_stem("12_34_o_bicycle_im").unwrap();
        assert_eq!(prompt, "bicycle");
        assert_eq!(mask, "12_34_o_bicycle_gt.png");
    }

    #[test]
    fn rejects_short_or_non_image_stems() {
        assert!(BigParser::parse_stem("o_bicycle_im").is_none());
        assert!(BigParser::parse_stem("12_34_o_bicycle_gt").is_none());
        assert!(BigParser::parse_stem("").is_none());
    }

    #[test]
    fn collect_keeps_only_images_with_masks() {
        let dir = tempfile::tempdir().unwrap();
        let test_dir = dir.path().join("BIG/test");
        touch(&test_dir.join("1_1_o_cat_im.jpg"));
        touch(&test_dir.join("1_1_o_cat_gt.png"));
        touch(&test_dir.join("2_2_o_dog_im.jpg"));
        touch(&test_dir.join("readme.txt"));

        let records = BigParser.collect(dir.path()).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].prompt, "cat");
        assert!(records[0].img.ends_with("1_1_o_cat_im.jpg"));
        assert!(records[0].mask.ends_with("1_1_o_cat_gt.png"));
    }
}
