//! In-memory BM25 inverted index over node text.
//!
//! The index is an auxiliary structure next to the persistent tables: it is
//! rebuilt from the `nodes` table on open and updated after each committed
//! ingest, so it always reflects durable state. Raw BM25 scores are
//! higher-is-better; [`crate::DocStore::search_nodes_by_keyword`] min-max
//! normalizes them over the result set before they leave the store.

use std::sync::RwLock;

use hashbrown::HashMap;
use uuid::Uuid;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Pinned normalizer identity recorded in `score_details.normalizer`.
pub const BM25_NORMALIZER: &str = "bm25_minmax_v1";

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "if",
    "in", "into", "is", "it", "its", "no", "not", "of", "on", "or", "our", "shall", "such", "that",
    "the", "their", "then", "there", "these", "they", "this", "to", "was", "were", "will", "with",
];

/// Lowercase alphanumeric tokenization with stopword removal.
///
/// A query made only of stopwords tokenizes to nothing; retrieval treats that
/// as a weak query.
pub fn query_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

#[derive(Default)]
struct KbPostings {
    /// term -> node -> term frequency
    postings: HashMap<String, HashMap<Uuid, u32>>,
    /// node -> token count
    doc_len: HashMap<Uuid, u32>,
}

impl KbPostings {
    fn index_node(&mut self, node_id: Uuid, text: &str) {
        let terms = query_terms(text);
        self.doc_len.insert(node_id, terms.len() as u32);
        for term in terms {
            *self
                .postings
                .entry(term)
                .or_default()
                .entry(node_id)
                .or_insert(0) += 1;
        }
    }

    fn remove_node(&mut self, node_id: &Uuid) {
        self.doc_len.remove(node_id);
        self.postings.retain(|_, nodes| {
            nodes.remove(node_id);
            !nodes.is_empty()
        });
    }

    fn search(&self, query: &str, top_k: usize) -> Vec<(Uuid, f32)> {
        let terms = query_terms(query);
        if terms.is_empty() || self.doc_len.is_empty() {
            return Vec::new();
        }

        let n = self.doc_len.len() as f32;
        let avg_len =
            self.doc_len.values().map(|&l| l as f32).sum::<f32>() / self.doc_len.len() as f32;

        let mut scores: HashMap<Uuid, f32> = HashMap::new();
        for term in &terms {
            let Some(nodes) = self.postings.get(term) else {
                continue;
            };
            let df = nodes.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (&node_id, &tf) in nodes {
                let len = self.doc_len.get(&node_id).copied().unwrap_or(0) as f32;
                let tf = tf as f32;
                let denom = tf + K1 * (1.0 - B + B * len / avg_len.max(1.0));
                *scores.entry(node_id).or_insert(0.0) += idf * tf * (K1 + 1.0) / denom;
            }
        }

        let mut ranked: Vec<(Uuid, f32)> = scores.into_iter().collect();
        // Deterministic order: score desc, node id as tie-breaker.
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);
        ranked
    }
}

pub(crate) struct FullTextIndex {
    kbs: RwLock<HashMap<Uuid, KbPostings>>,
}

impl FullTextIndex {
    pub(crate) fn new() -> Self {
        Self {
            kbs: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn index_node(&self, kb_id: Uuid, node_id: Uuid, text: &str) {
        let mut kbs = self.kbs.write().unwrap_or_else(|p| p.into_inner());
        kbs.entry(kb_id).or_default().index_node(node_id, text);
    }

    pub(crate) fn remove_nodes(&self, kb_id: Uuid, node_ids: &[Uuid]) {
        let mut kbs = self.kbs.write().unwrap_or_else(|p| p.into_inner());
        if let Some(postings) = kbs.get_mut(&kb_id) {
            for node_id in node_ids {
                postings.remove_node(node_id);
            }
        }
    }

    /// Raw BM25 search (higher is better, unbounded range).
    pub(crate) fn search(&self, kb_id: Uuid, query: &str, top_k: usize) -> Vec<(Uuid, f32)> {
        let kbs = self.kbs.read().unwrap_or_else(|p| p.into_inner());
        match kbs.get(&kb_id) {
            Some(postings) => postings.search(query, top_k),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn query_terms_drop_stopwords_and_short_tokens() {
        assert_eq!(
            query_terms("The rental of a property"),
            vec!["rental", "property"]
        );
        assert!(query_terms("the of and a").is_empty());
        assert!(query_terms("").is_empty());
    }

    #[test]
    fn matching_node_ranks_first() {
        let idx = FullTextIndex::new();
        let kb = node(1);
        idx.index_node(kb, node(10), "rental agreements must be registered with the land office");
        idx.index_node(kb, node(11), "penalties apply for late registration of deeds");
        idx.index_node(kb, node(12), "the court may reduce excessive rental payments");

        let hits = idx.search(kb, "rental registration", 10);
        assert!(!hits.is_empty());
        // node 10 contains both query terms.
        assert_eq!(hits[0].0, node(10));
        assert!(hits[0].1 > 0.0);
    }

    #[test]
    fn search_scoped_by_kb() {
        let idx = FullTextIndex::new();
        idx.index_node(node(1), node(10), "rental rules");
        assert!(idx.search(node(2), "rental", 10).is_empty());
    }

    #[test]
    fn removed_nodes_stop_matching() {
        let idx = FullTextIndex::new();
        let kb = node(1);
        idx.index_node(kb, node(10), "rental rules for apartments");
        idx.remove_nodes(kb, &[node(10)]);
        assert!(idx.search(kb, "rental", 10).is_empty());
    }

    #[test]
    fn top_k_truncates() {
        let idx = FullTextIndex::new();
        let kb = node(1);
        for i in 0..20u128 {
            idx.index_node(kb, node(100 + i), "rental clause text");
        }
        assert_eq!(idx.search(kb, "rental", 5).len(), 5);
    }

    #[test]
    fn deterministic_ordering_on_score_ties() {
        let idx = FullTextIndex::new();
        let kb = node(1);
        idx.index_node(kb, node(30), "identical rental text");
        idx.index_node(kb, node(20), "identical rental text");
        let a = idx.search(kb, "rental", 10);
        let b = idx.search(kb, "rental", 10);
        assert_eq!(a, b);
        assert_eq!(a[0].0, node(20));
    }
}
