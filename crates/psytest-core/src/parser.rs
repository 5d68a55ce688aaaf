//! Content bundle and answer sheet loading.
//!
//! Bundles are read from JSON (the collaborator's format) or TOML (authored
//! fixtures), from single files or whole directories.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::{wire, AnswerId, QuestionId, SubmissionPayload, TestBundle};

/// Serialization format of a bundle file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    Json,
    Toml,
}

impl BundleFormat {
    /// Format implied by a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(BundleFormat::Json),
            "toml" => Some(BundleFormat::Toml),
            _ => None,
        }
    }
}

/// Parse a single bundle file.
pub fn parse_bundle(path: &Path) -> Result<TestBundle> {
    let format = BundleFormat::from_path(path)
        .with_context(|| format!("unsupported bundle extension: {}", path.display()))?;
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read bundle file: {}", path.display()))?;

    parse_bundle_str(&content, format, path)
}

/// Parse bundle text (useful for testing).
pub fn parse_bundle_str(content: &str, format: BundleFormat, source_path: &Path) -> Result<TestBundle> {
    match format {
        BundleFormat::Json => serde_json::from_str(content)
            .with_context(|| format!("failed to parse JSON: {}", source_path.display())),
        BundleFormat::Toml => toml::from_str(content)
            .with_context(|| format!("failed to parse TOML: {}", source_path.display())),
    }
}

/// Recursively load all `.json` and `.toml` bundles under a directory.
///
/// Files that fail to parse are skipped with a warning. Results are sorted by
/// path.
pub fn load_bundle_directory(dir: &Path) -> Result<Vec<(PathBuf, TestBundle)>> {
    let mut bundles = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            bundles.extend(load_bundle_directory(&path)?);
        } else if BundleFormat::from_path(&path).is_some() {
            match parse_bundle(&path) {
                Ok(bundle) => bundles.push((path, bundle)),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    bundles.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(bundles)
}

/// Load a bundle file, or every bundle under a directory.
pub fn load_bundles(path: &Path) -> Result<Vec<(PathBuf, TestBundle)>> {
    if path.is_dir() {
        load_bundle_directory(path)
    } else {
        Ok(vec![(path.to_path_buf(), parse_bundle(path)?)])
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnswerSheet {
    Payload(SubmissionPayload),
    Bare(#[serde(deserialize_with = "wire::answer_map")] BTreeMap<QuestionId, Vec<AnswerId>>),
}

/// Parse a JSON answer sheet: either a full submission payload or a bare
/// `{ questionId: [answerId, ...] }` map.
pub fn parse_answer_sheet(path: &Path) -> Result<BTreeMap<QuestionId, Vec<AnswerId>>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read answer sheet: {}", path.display()))?;
    parse_answer_sheet_str(&content)
        .with_context(|| format!("failed to parse answer sheet: {}", path.display()))
}

pub fn parse_answer_sheet_str(content: &str) -> Result<BTreeMap<QuestionId, Vec<AnswerId>>> {
    let sheet: AnswerSheet = serde_json::from_str(content)?;
    Ok(match sheet {
        AnswerSheet::Payload(payload) => payload.answers,
        AnswerSheet::Bare(answers) => answers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML_BUNDLE: &str = r#"
[test]
title = "Temperament"
description = "Short form"

[[blocks]]
id = 1
order = 1
hasTimeLimit = true
timeLimit = 2
questionsType = "single-choice"

[[scales]]
id = 10
scaleType = "unipolar"
pole1 = "Extraversion"
blockId = 1

[[questions]]
id = 100
text = "I enjoy parties"
blockId = 1

[[answers]]
id = 1000
text = "Yes"
questionId = 100

[[answers]]
id = 1001
text = "No"
questionId = 100

[[weights]]
answerId = 1000
scaleId = 10
value = 1

[[weights]]
answerId = 1001
scaleId = 10
value = 0
"#;

    const JSON_BUNDLE: &str = r#"{
        "test": {"id": 5, "title": "Temperament"},
        "blocks": [{"id": "1", "order": 1}],
        "questions": [{"id": 100, "text": "q", "blockId": 1}],
        "answers": [{"id": 1000, "text": "a", "questionId": 100}],
        "weights": [{"answerId": "1000", "scaleId": "10", "value": 2}]
    }"#;

    #[test]
    fn parse_toml_bundle() {
        let bundle =
            parse_bundle_str(TOML_BUNDLE, BundleFormat::Toml, Path::new("test.toml")).unwrap();
        assert_eq!(bundle.test.title, "Temperament");
        assert_eq!(bundle.blocks.len(), 1);
        assert!(bundle.blocks[0].has_time_limit);
        assert_eq!(bundle.blocks[0].time_limit, 2);
        assert_eq!(bundle.weights.len(), 2);
        assert_eq!(bundle.weights[0].value, 1.0);
    }

    #[test]
    fn parse_json_bundle_with_string_ids() {
        let bundle =
            parse_bundle_str(JSON_BUNDLE, BundleFormat::Json, Path::new("test.json")).unwrap();
        assert_eq!(bundle.test.id, Some(5));
        assert_eq!(bundle.blocks[0].id, 1);
        assert_eq!(bundle.weights[0].scale_id, 10);
        assert!(bundle.scales.is_empty());
    }

    #[test]
    fn parse_malformed_bundle() {
        let result = parse_bundle_str("{ not json", BundleFormat::Json, Path::new("bad.json"));
        let msg = format!("{:#}", result.unwrap_err());
        assert!(msg.contains("bad.json"));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.yaml");
        std::fs::write(&path, "test: {}").unwrap();
        assert!(parse_bundle(&path).is_err());
    }

    #[test]
    fn load_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.toml"), TOML_BUNDLE).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("b.json"), JSON_BUNDLE).unwrap();
        std::fs::write(dir.path().join("broken.json"), "[").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let bundles = load_bundle_directory(dir.path()).unwrap();
        assert_eq!(bundles.len(), 2);
        assert!(bundles[0].0.ends_with("a.toml"));

        let single = load_bundles(&dir.path().join("a.toml")).unwrap();
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn answer_sheet_payload_or_bare_map() {
        let payload = r#"{"userId": 1, "testId": 2, "token": "t", "answers": {"100": [1000]}}"#;
        assert_eq!(parse_answer_sheet_str(payload).unwrap()[&100], vec![1000]);

        let bare = r#"{"100": ["1001"], "101": []}"#;
        let answers = parse_answer_sheet_str(bare).unwrap();
        assert_eq!(answers[&100], vec![1001]);
        assert!(answers[&101].is_empty());
    }
}
