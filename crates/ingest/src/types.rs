//! Request and outcome types for the ingest engine.

use gate::GateReport;
use serde::{Deserialize, Serialize};
use store::{IngestStatus, StageTimings};
use uuid::Uuid;

/// Enumerated non-OCR parsers.
///
/// Both operate on text-native input; upstream extraction (e.g. PDF-to-text)
/// is an out-of-process concern and its output is what arrives here.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    #[default]
    Markdown,
    PlainText,
}

impl ParserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserKind::Markdown => "markdown",
            ParserKind::PlainText => "plain_text",
        }
    }
}

/// How one file should be parsed and segmented. Unset fields fall back to
/// the KB's chunking configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IngestProfile {
    #[serde(default)]
    pub parser: ParserKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentence_window: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_node_chars: Option<usize>,
}

/// One ingest request: a file entering a KB.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestRequest {
    pub kb_id: Uuid,
    /// Local path of the raw document.
    pub source_uri: String,
    pub file_name: String,
    /// Parse and segment only; persist nothing.
    #[serde(default)]
    pub dry_run: bool,
    /// Re-process even if the `(kb_id, sha256)` key already succeeded.
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub profile: IngestProfile,
}

/// What one ingest produced, including its gate report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestOutcome {
    pub file_id: Uuid,
    pub ingest_status: IngestStatus,
    pub node_count: u32,
    pub pages: u32,
    pub timings: StageTimings,
    pub gate: GateReport,
    /// True when the `(kb_id, sha256)` key matched an already-successful file
    /// and the request short-circuited without re-processing.
    pub short_circuited: bool,
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parser_kind_serde_matches_contract() {
        assert_eq!(serde_json::to_string(&ParserKind::PlainText).unwrap(), "\"plain_text\"");
        let kind: ParserKind = serde_json::from_str("\"markdown\"").unwrap();
        assert_eq!(kind, ParserKind::Markdown);
    }

    #[test]
    fn profile_defaults_are_empty() {
        let profile: IngestProfile = serde_json::from_str("{}").unwrap();
        assert_eq!(profile.parser, ParserKind::Markdown);
        assert!(profile.sentence_window.is_none());
    }
}
