//! Output naming: every input maps deterministically to one PNG file name.
//!
//! Rename rules are applied to the stem first, then `S.png` for PNG inputs and
//! `S__E.png` for everything else (`E` lower-cased).

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Literal substring substitution applied to the input stem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRule {
    pub from: String,
    pub to: String,
}

impl RenameRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn apply(&self, stem: &str) -> String {
        if self.from.is_empty() {
            return stem.to_string();
        }
        stem.replace(&self.from, &self.to)
    }
}

impl FromStr for RenameRule {
    type Err = String;

    /// Parses `FROM=TO`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((from, _)) if from.is_empty() => {
                Err(format!("rename rule {s:?} has an empty FROM part"))
            }
            Some((from, to)) => Ok(RenameRule::new(from, to)),
            None => Err(format!("rename rule {s:?} must look like FROM=TO")),
        }
    }
}

pub fn output_name(input: &Path, rules: &[RenameRule]) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = rules.iter().fold(stem, |acc, rule| rule.apply(&acc));

    let ext = input
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if ext == "png" {
        format!("{stem}.png")
    } else {
        format!("{stem}__{ext}.png")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_keeps_its_stem_other_formats_get_suffixed() {
        assert_eq!(output_name(Path::new("imgs/foo.jpg"), &[]), "foo__jpg.png");
        assert_eq!(output_name(Path::new("imgs/bar.PNG"), &[]), "bar.png");
        assert_eq!(output_name(Path::new("imgs/baz.WebP"), &[]), "baz__webp.png");
    }

    #[test]
    fn extensionless_input() {
        assert_eq!(output_name(Path::new("imgs/raw"), &[]), "raw__.png");
    }

    #[test]
    fn rename_rules_apply_to_stem_in_order() {
        let rules = vec![RenameRule::new("猪", "猴"), RenameRule::new("猴猴", "猴")];
        assert_eq!(
            output_name(Path::new("imgs/猪猪侠.jpg"), &rules),
            "猴侠__jpg.png"
        );
        // the extension is never rewritten
        let rules = vec![RenameRule::new("jpg", "png")];
        assert_eq!(output_name(Path::new("a_jpg.jpg"), &rules), "a_png__jpg.png");
    }

    #[test]
    fn parses_rules() {
        assert_eq!("猪=猴".parse::<RenameRule>().unwrap(), RenameRule::new("猪", "猴"));
        assert_eq!("pig=".parse::<RenameRule>().unwrap(), RenameRule::new("pig", ""));
        assert!("=x".parse::<RenameRule>().is_err());
        assert!("nope".parse::<RenameRule>().is_err());
    }
}
