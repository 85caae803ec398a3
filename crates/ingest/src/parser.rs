//! Parse stage: raw text into a Markdown representation with a page map.
//!
//! Page boundaries come from form-feed characters or `<!-- page: N -->`
//! marker lines; a document without either is a single page. Offsets are
//! char positions into the normalized markdown and stay stable for the
//! lifetime of the file, so nodes can point back into their page.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::IngestError;
use crate::types::ParserKind;

static PAGE_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*<!--\s*page:\s*(\d+)\s*-->\s*$").expect("static regex"));

/// One page of parsed markdown. `offset` is the char position of the page's
/// first character in the whole parsed document.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    pub page: u32,
    pub text: String,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub pages: Vec<ParsedPage>,
}

impl ParsedDocument {
    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.text.trim().is_empty())
    }
}

/// Parse raw document text. Both parser kinds emit markdown; `plain_text`
/// input simply carries no structural markers.
pub fn parse(raw: &str, kind: ParserKind) -> Result<ParsedDocument, IngestError> {
    let _ = kind; // both kinds share the page-splitting path today
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");

    let pages = if normalized.contains('\u{0c}') {
        split_on_form_feed(&normalized)
    } else if normalized.lines().any(|l| PAGE_MARKER_RE.is_match(l)) {
        split_on_markers(&normalized)
    } else {
        vec![ParsedPage {
            page: 1,
            text: normalized,
            offset: 0,
        }]
    };

    let pages: Vec<ParsedPage> = pages
        .into_iter()
        .filter(|p| !p.text.trim().is_empty())
        .collect();
    if pages.is_empty() {
        return Err(IngestError::Parse("document contains no text".into()));
    }
    Ok(ParsedDocument { pages })
}

fn split_on_form_feed(text: &str) -> Vec<ParsedPage> {
    let mut pages = Vec::new();
    let mut offset = 0u32;
    for (idx, chunk) in text.split('\u{0c}').enumerate() {
        pages.push(ParsedPage {
            page: idx as u32 + 1,
            text: chunk.to_string(),
            offset,
        });
        offset += chunk.chars().count() as u32 + 1;
    }
    pages
}

fn split_on_markers(text: &str) -> Vec<ParsedPage> {
    let mut pages = Vec::new();
    let mut current = String::new();
    let mut current_page = 1u32;
    let mut current_offset = 0u32;
    let mut offset = 0u32;

    for line in text.lines() {
        let line_chars = line.chars().count() as u32 + 1; // '\n'
        if let Some(caps) = PAGE_MARKER_RE.captures(line) {
            if !current.trim().is_empty() {
                pages.push(ParsedPage {
                    page: current_page,
                    text: std::mem::take(&mut current),
                    offset: current_offset,
                });
            } else {
                current.clear();
            }
            current_page = caps[1].parse().unwrap_or(current_page + 1);
            current_offset = offset + line_chars;
        } else {
            current.push_str(line);
            current.push('\n');
        }
        offset += line_chars;
    }
    if !current.trim().is_empty() {
        pages.push(ParsedPage {
            page: current_page,
            text: current,
            offset: current_offset,
        });
    }
    pages
}
