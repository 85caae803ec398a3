//! Segment stage: markdown pages into ordered node drafts.
//!
//! Two passes. The structural pass slices each page along markdown elements
//! (headings, tables, lists, paragraphs) while tracking the heading trail as
//! `section_path` and legal article markers as `article_id`. The sentence
//! -window pass then cuts paragraphs into windows of *w* consecutive
//! sentences so each node keeps local context. Fragments below the minimum
//! length are merged into a neighbor instead of being emitted.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::parser::{ParsedDocument, ParsedPage};

static ARTICLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(article|art\.?|section|§)\s*(\d+[a-z]?)").expect("static regex")
});

static LIST_ITEM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d+[.)]\s").expect("static regex"));

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub sentence_window: usize,
    pub min_node_chars: usize,
    pub segment_version: String,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sentence_window: 2,
            min_node_chars: 24,
            segment_version: "seg-v1".into(),
        }
    }
}

/// A node before it gets an identity: text plus full provenance metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDraft {
    pub text: String,
    pub page: u32,
    pub article_id: Option<String>,
    pub section_path: Option<String>,
    pub start_offset: u32,
    pub end_offset: u32,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Heading(usize),
    Table,
    List,
    Paragraph,
}

impl BlockKind {
    fn label(&self) -> &'static str {
        match self {
            BlockKind::Heading(_) => "heading",
            BlockKind::Table => "table",
            BlockKind::List => "list",
            BlockKind::Paragraph => "paragraph",
        }
    }
}

struct Block {
    kind: BlockKind,
    text: String,
    start: u32,
    end: u32,
}

/// Segment a parsed document into ordered drafts. The caller assigns
/// `node_index` by enumeration, so reading order is contiguity by
/// construction.
pub fn segment(doc: &ParsedDocument, cfg: &SegmenterConfig) -> Vec<NodeDraft> {
    let mut drafts = Vec::new();
    // Heading trail and article marker survive page breaks.
    let mut section_stack: Vec<(usize, String)> = Vec::new();
    let mut article: Option<String> = None;

    for page in &doc.pages {
        for block in blocks_of_page(page) {
            match block.kind {
                BlockKind::Heading(level) => {
                    let title = block.text.trim_start_matches('#').trim().to_string();
                    if title.is_empty() {
                        continue;
                    }
                    if let Some(found) = detect_article(&title) {
                        article = Some(found);
                    }
                    section_stack.retain(|(l, _)| *l < level);
                    section_stack.push((level, title));
                }
                BlockKind::Table | BlockKind::List => {
                    if let Some(found) = detect_article(block.text.trim()) {
                        article = Some(found);
                    }
                    drafts.push(NodeDraft {
                        text: block.text.trim().to_string(),
                        page: page.page,
                        article_id: article.clone(),
                        section_path: section_path(&section_stack),
                        start_offset: block.start,
                        end_offset: block.end,
                        meta: json!({
                            "segment_version": cfg.segment_version,
                            "block": block.kind.label(),
                        }),
                    });
                }
                BlockKind::Paragraph => {
                    if let Some(found) = detect_article(block.text.trim()) {
                        article = Some(found);
                    }
                    for (window_text, start, end) in
                        sentence_windows(&block.text, cfg.sentence_window)
                    {
                        drafts.push(NodeDraft {
                            text: window_text,
                            page: page.page,
                            article_id: article.clone(),
                            section_path: section_path(&section_stack),
                            start_offset: block.start + start,
                            end_offset: block.start + end,
                            meta: json!({
                                "segment_version": cfg.segment_version,
                                "block": "paragraph",
                                "window_size": cfg.sentence_window,
                            }),
                        });
                    }
                }
            }
        }
    }

    merge_short_drafts(drafts, cfg.min_node_chars)
}

fn section_path(stack: &[(usize, String)]) -> Option<String> {
    if stack.is_empty() {
        None
    } else {
        Some(
            stack
                .iter()
                .map(|(_, title)| title.as_str())
                .collect::<Vec<_>>()
                .join(" > "),
        )
    }
}

fn detect_article(text: &str) -> Option<String> {
    let caps = ARTICLE_RE.captures(text)?;
    let word = caps[1].to_lowercase();
    let number = &caps[2];
    Some(match word.as_str() {
        "§" => format!("§ {number}"),
        "section" => format!("Section {number}"),
        _ => format!("Article {number}"),
    })
}

fn classify_line(line: &str) -> Option<BlockKind> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() {
        return None;
    }
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if (1..=6).contains(&hashes) && trimmed.chars().nth(hashes) == Some(' ') {
        return Some(BlockKind::Heading(hashes));
    }
    if trimmed.starts_with('|') {
        return Some(BlockKind::Table);
    }
    if trimmed.starts_with("- ")
        || trimmed.starts_with("* ")
        || trimmed.starts_with("+ ")
        || LIST_ITEM_RE.is_match(line)
    {
        return Some(BlockKind::List);
    }
    Some(BlockKind::Paragraph)
}

fn blocks_of_page(page: &ParsedPage) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;
    let mut offset = page.offset;

    for line in page.text.lines() {
        let line_len = line.chars().count() as u32;
        match classify_line(line) {
            None => {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
            }
            Some(kind) => {
                let is_heading = matches!(kind, BlockKind::Heading(_));
                let extends = current
                    .as_ref()
                    .map(|b| b.kind == kind && !is_heading)
                    .unwrap_or(false);
                if let (true, Some(block)) = (extends, current.as_mut()) {
                    block.text.push('\n');
                    block.text.push_str(line);
                    block.end = offset + line_len;
                } else {
                    if let Some(block) = current.take() {
                        blocks.push(block);
                    }
                    let block = Block {
                        kind,
                        text: line.to_string(),
                        start: offset,
                        end: offset + line_len,
                    };
                    if is_heading {
                        blocks.push(block);
                    } else {
                        current = Some(block);
                    }
                }
            }
        }
        offset += line_len + 1;
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }
    blocks
}

/// Split text into sentences, returning `(char_start, char_end)` spans.
fn split_sentences(text: &str) -> Vec<(u32, u32)> {
    let chars: Vec<char> = text.chars().collect();
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        let at_terminator = matches!(c, '.' | '!' | '?');
        let next_is_break = chars
            .get(i + 1)
            .map(|n| n.is_whitespace())
            .unwrap_or(true);
        if at_terminator && next_is_break {
            spans.push((start as u32, (i + 1) as u32));
            i += 1;
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            start = i;
        } else {
            i += 1;
        }
    }
    if start < chars.len() && chars[start..].iter().any(|c| !c.is_whitespace()) {
        spans.push((start as u32, chars.len() as u32));
    }
    spans
}

/// Group sentences into consecutive windows of `w`; each window's text is a
/// verbatim slice of the source so offsets stay exact.
fn sentence_windows(text: &str, w: usize) -> Vec<(String, u32, u32)> {
    let w = w.max(1);
    let spans = split_sentences(text);
    if spans.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    spans
        .chunks(w)
        .map(|window| {
            let start = window[0].0;
            let end = window[window.len() - 1].1;
            let slice: String = chars[start as usize..end as usize].iter().collect();
            (slice, start, end)
        })
        .collect()
}

fn merge_short_drafts(drafts: Vec<NodeDraft>, min_chars: usize) -> Vec<NodeDraft> {
    let mut out: Vec<NodeDraft> = Vec::new();
    let mut pending: Option<NodeDraft> = None;

    for mut draft in drafts {
        if let Some(p) = pending.take() {
            draft.text = format!("{}\n{}", p.text.trim_end(), draft.text);
            draft.start_offset = p.start_offset;
            draft.page = p.page;
            if draft.article_id.is_none() {
                draft.article_id = p.article_id;
            }
            if draft.section_path.is_none() {
                draft.section_path = p.section_path;
            }
        }
        if draft.text.trim().chars().count() < min_chars {
            match out.last_mut() {
                Some(last) if last.page == draft.page => {
                    last.text.push('\n');
                    last.text.push_str(draft.text.trim());
                    last.end_offset = draft.end_offset;
                }
                _ => pending = Some(draft),
            }
            continue;
        }
        out.push(draft);
    }

    if let Some(p) = pending {
        if p.text.trim().chars().count() >= min_chars {
            out.push(p);
        } else if let Some(last) = out.last_mut() {
            last.text.push('\n');
            last.text.push_str(p.text.trim());
            last.end_offset = p.end_offset;
        }
        // A lone fragment below the minimum with nothing to merge into is
        // dropped; the ingest gate will then report an empty node set.
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::types::ParserKind;

    fn doc(raw: &str) -> ParsedDocument {
        parse(raw, ParserKind::Markdown).unwrap()
    }

    fn cfg() -> SegmenterConfig {
        SegmenterConfig::default()
    }

    #[test]
    fn headings_build_section_path_without_nodes() {
        let drafts = segment(
            &doc("# Tenancy Act\n\n## Article 3\n\nThe landlord must return the deposit within one month of termination."),
            &cfg(),
        );
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].section_path.as_deref(), Some("Tenancy Act > Article 3"));
        assert_eq!(drafts[0].article_id.as_deref(), Some("Article 3"));
        assert!(drafts[0].text.contains("deposit"));
    }

    #[test]
    fn deeper_heading_replaced_by_sibling() {
        let raw = "# Act\n\n## Article 1\n\nFirst article body text that is long enough to emit.\n\n## Article 2\n\nSecond article body text that is long enough to emit.";
        let drafts = segment(&doc(raw), &cfg());
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].section_path.as_deref(), Some("Act > Article 1"));
        assert_eq!(drafts[1].section_path.as_deref(), Some("Act > Article 2"));
        assert_eq!(drafts[1].article_id.as_deref(), Some("Article 2"));
    }

    #[test]
    fn paragraphs_split_into_sentence_windows() {
        let raw = "One sentence about rental deposits here. Second sentence about notice periods. Third sentence about termination grounds. Fourth sentence about renewal options.";
        let drafts = segment(&doc(raw), &cfg());
        // Window of 2 sentences -> 2 nodes.
        assert_eq!(drafts.len(), 2);
        assert!(drafts[0].text.starts_with("One sentence"));
        assert!(drafts[0].text.ends_with("notice periods."));
        assert!(drafts[1].text.starts_with("Third sentence"));
        assert_eq!(drafts[0].meta["window_size"], 2);
    }

    #[test]
    fn offsets_point_back_into_document() {
        let raw = "First clause sentence goes here. Second clause sentence goes here.";
        let drafts = segment(&doc(raw), &cfg());
        assert_eq!(drafts.len(), 1);
        let chars: Vec<char> = raw.chars().collect();
        let slice: String = chars
            [drafts[0].start_offset as usize..drafts[0].end_offset as usize]
            .iter()
            .collect();
        assert_eq!(slice, drafts[0].text);
    }

    #[test]
    fn tables_and_lists_stay_whole() {
        let raw = "| fee | amount |\n|---|---|\n| filing | 100 |\n\n- first obligation of the tenant\n- second obligation of the tenant";
        let drafts = segment(&doc(raw), &cfg());
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].meta["block"], "table");
        assert!(drafts[0].text.contains("filing"));
        assert_eq!(drafts[1].meta["block"], "list");
        assert!(drafts[1].text.contains("second obligation"));
    }

    #[test]
    fn short_fragments_merge_into_neighbor() {
        let raw = "Tiny bit.\n\nA longer paragraph that comfortably exceeds the minimum node length threshold.";
        let drafts = segment(&doc(raw), &cfg());
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].text.starts_with("Tiny bit."));
        assert!(drafts[0].text.contains("longer paragraph"));
    }

    #[test]
    fn article_marker_in_paragraph_detected() {
        let raw = "Article 12\n\nNotice must be given in writing at least three months in advance.";
        let drafts = segment(&doc(raw), &cfg());
        assert!(!drafts.is_empty());
        assert_eq!(drafts.last().unwrap().article_id.as_deref(), Some("Article 12"));
    }

    #[test]
    fn article_carries_across_pages() {
        let raw = "## Article 7\n\nBody on the first page that is long enough to emit a node.\u{0c}Continuation on the second page that is also long enough to emit.";
        let drafts = segment(&doc(raw), &cfg());
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].page, 1);
        assert_eq!(drafts[1].page, 2);
        assert_eq!(drafts[1].article_id.as_deref(), Some("Article 7"));
    }

    #[test]
    fn all_drafts_meet_minimum_length() {
        let raw = "# H\n\nShort. Also short. Another tiny one. And more fragments here. Plus a final longer sentence that carries real content about deposits.";
        let drafts = segment(&doc(raw), &cfg());
        for draft in &drafts {
            assert!(draft.text.trim().chars().count() >= cfg().min_node_chars);
        }
    }
}
