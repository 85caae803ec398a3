//! Prompt builder: evidence-constrained message snapshots.
//!
//! Every snapshot has three sections: a system instruction fixing the legal
//! role, the answer-only-from-evidence constraint, and the JSON output
//! schema; an enumerated evidence block; and the user question. Templates
//! are versioned so a persisted `(prompt_name, prompt_version)` pair always
//! replays to the same wording.

use providers::ChatMessage;
use serde::Serialize;
use uuid::Uuid;

use crate::error::GenerationError;

pub const DEFAULT_PROMPT_NAME: &str = "legal_qa";
pub const DEFAULT_PROMPT_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub version: &'static str,
    pub system: &'static str,
}

const LEGAL_QA_V1: PromptTemplate = PromptTemplate {
    name: "legal_qa",
    version: "v1",
    system: "You are a careful legal assistant answering questions about statutes and contracts. \
Answer ONLY from the evidence passages provided; never rely on outside knowledge. \
If the evidence does not answer the question, return an empty answer with no citations. \
Respond with only a JSON object of the form \
{\"answer\": \"<answer text>\", \"citations\": [{\"node_id\": \"<uuid>\", \"rank\": <number>}]} \
where every node_id is copied verbatim from the evidence block.",
};

const TEMPLATES: &[PromptTemplate] = &[LEGAL_QA_V1];

/// Look up a template by `(name, version)`.
pub fn resolve(name: &str, version: &str) -> Result<&'static PromptTemplate, GenerationError> {
    TEMPLATES
        .iter()
        .find(|t| t.name == name && t.version == version)
        .ok_or_else(|| GenerationError::UnknownPrompt(format!("{name}@{version}")))
}

/// One enumerated entry of the evidence block.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EvidenceEntry {
    pub index: usize,
    pub node_id: Uuid,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_path: Option<String>,
    pub excerpt: String,
}

/// Build the three-section message snapshot.
pub fn build_messages(
    template: &PromptTemplate,
    query: &str,
    evidence: &[EvidenceEntry],
) -> Vec<ChatMessage> {
    let mut block = String::from("Evidence:\n");
    for entry in evidence {
        block.push_str(&format!(
            "[{}] (node_id={}, page={}, article={}, section={}) \"{}\"\n",
            entry.index,
            entry.node_id,
            entry.page,
            entry.article_id.as_deref().unwrap_or("-"),
            entry.section_path.as_deref().unwrap_or("-"),
            entry.excerpt.replace('"', "'"),
        ));
    }
    vec![
        ChatMessage::system(template.system),
        ChatMessage::system(block),
        ChatMessage::user(query.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: usize) -> EvidenceEntry {
        EvidenceEntry {
            index,
            node_id: Uuid::from_u128(index as u128),
            page: 3,
            article_id: Some("Article 3".into()),
            section_path: Some("Tenancy Act > Article 3".into()),
            excerpt: "The deposit may not exceed three months of rent.".into(),
        }
    }

    #[test]
    fn default_template_resolves() {
        let template = resolve(DEFAULT_PROMPT_NAME, DEFAULT_PROMPT_VERSION).unwrap();
        assert!(template.system.contains("ONLY from the evidence"));
        assert!(template.system.contains("citations"));
    }

    #[test]
    fn unknown_template_is_an_error() {
        assert!(matches!(
            resolve("freeform", "v1"),
            Err(GenerationError::UnknownPrompt(_))
        ));
    }

    #[test]
    fn snapshot_has_three_sections() {
        let template = resolve(DEFAULT_PROMPT_NAME, DEFAULT_PROMPT_VERSION).unwrap();
        let messages = build_messages(template, "What is the deposit cap?", &[entry(1), entry(2)]);

        assert_eq!(messages.len(), 3);
        assert!(messages[0].content.contains("legal assistant"));
        assert!(messages[1].content.starts_with("Evidence:"));
        assert!(messages[1].content.contains("node_id=00000000-0000-0000-0000-000000000001"));
        assert!(messages[1].content.contains("article=Article 3"));
        assert_eq!(messages[2].content, "What is the deposit cap?");
    }

    #[test]
    fn evidence_quotes_are_sanitized() {
        let template = resolve(DEFAULT_PROMPT_NAME, DEFAULT_PROMPT_VERSION).unwrap();
        let mut e = entry(1);
        e.excerpt = "the \"deposit\" clause".into();
        let messages = build_messages(template, "q", &[e]);
        assert!(messages[1].content.contains("the 'deposit' clause"));
    }
}
