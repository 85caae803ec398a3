//! Payload-bearing vector store for the lexrag pipeline.
//!
//! Vectors live in redb for durability and in a flat in-memory list for
//! search. Brute-force cosine over the KB-scoped slice is deliberate: at the
//! corpus sizes a curated legal KB reaches, a linear scan stays well under a
//! millisecond and keeps the store free of index-maintenance failure modes.
//! The in-memory list is rebuilt from redb on open.
//!
//! Every search is scoped by `kb_id` at minimum; hits carry their full
//! payload plus the metric identity so downstream stages can normalize.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

const VECTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("vectors");

/// Similarity metric attached to every hit's provenance.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricType {
    #[default]
    Cosine,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricType::Cosine => f.write_str("COSINE"),
        }
    }
}

/// A stored vector with everything downstream stages need to build
/// provenance without another lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorPayload {
    pub vector_id: Uuid,
    pub embedding: Vec<f32>,
    pub node_id: Uuid,
    pub kb_id: Uuid,
    pub file_id: Uuid,
    pub document_id: Uuid,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_path: Option<String>,
}

/// Search scope: always at least a KB, optionally narrowed to one file or
/// document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KbScope {
    pub kb_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<Uuid>,
}

impl KbScope {
    pub fn kb(kb_id: Uuid) -> Self {
        Self {
            kb_id,
            file_id: None,
            document_id: None,
        }
    }

    fn matches(&self, payload: &VectorPayload) -> bool {
        payload.kb_id == self.kb_id
            && self.file_id.is_none_or(|f| payload.file_id == f)
            && self.document_id.is_none_or(|d| payload.document_id == d)
    }
}

/// One k-NN result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorHit {
    pub vector_id: Uuid,
    pub score: f32,
    pub metric: MetricType,
    pub payload: VectorPayload,
}

#[derive(Debug, Error, Clone)]
pub enum VectorError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("dimension mismatch: query has {got}, collection expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("empty query vector")]
    EmptyQuery,
}

impl VectorError {
    fn backend<E: fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Vector store handle. Long-lived per process; share behind `Arc`.
pub struct VectorStore {
    db: Arc<Database>,
    entries: RwLock<Vec<VectorPayload>>,
}

impl VectorStore {
    /// Open or create the store at `path` and rebuild the in-memory list.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VectorError> {
        let db = Database::create(path).map_err(VectorError::backend)?;
        let txn = db.begin_write().map_err(VectorError::backend)?;
        {
            txn.open_table(VECTORS).map_err(VectorError::backend)?;
        }
        txn.commit().map_err(VectorError::backend)?;

        let mut entries = Vec::new();
        {
            let read = db.begin_read().map_err(VectorError::backend)?;
            let table = read.open_table(VECTORS).map_err(VectorError::backend)?;
            for item in table.iter().map_err(VectorError::backend)? {
                let (_, value) = item.map_err(VectorError::backend)?;
                let payload: VectorPayload = serde_json::from_slice(value.value())
                    .map_err(|e| VectorError::Decode(e.to_string()))?;
                entries.push(payload);
            }
        }
        info!(vectors = entries.len(), "vector store opened");
        Ok(Self {
            db: Arc::new(db),
            entries: RwLock::new(entries),
        })
    }

    /// Batch-insert one file's vectors. The redb write is a single
    /// transaction; the in-memory list is extended only after commit.
    pub fn insert_batch(&self, payloads: Vec<VectorPayload>) -> Result<(), VectorError> {
        if payloads.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write().map_err(VectorError::backend)?;
        {
            let mut table = txn.open_table(VECTORS).map_err(VectorError::backend)?;
            for payload in &payloads {
                let raw = serde_json::to_vec(payload)
                    .map_err(|e| VectorError::Encode(e.to_string()))?;
                table
                    .insert(payload.vector_id.to_string().as_str(), raw.as_slice())
                    .map_err(VectorError::backend)?;
            }
        }
        txn.commit().map_err(VectorError::backend)?;

        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        debug!(added = payloads.len(), "vector batch committed");
        entries.extend(payloads);
        Ok(())
    }

    /// k-NN search within a scope. Cosine similarity, higher is better; ties
    /// broken by `vector_id` so results are deterministic.
    pub fn search(
        &self,
        scope: KbScope,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>, VectorError> {
        if query.is_empty() {
            return Err(VectorError::EmptyQuery);
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let mut hits = Vec::new();
        for payload in entries.iter().filter(|p| scope.matches(p)) {
            if payload.embedding.len() != query.len() {
                return Err(VectorError::DimensionMismatch {
                    expected: payload.embedding.len(),
                    got: query.len(),
                });
            }
            let score = cosine(query, &payload.embedding);
            hits.push(VectorHit {
                vector_id: payload.vector_id,
                score,
                metric: MetricType::Cosine,
                payload: payload.clone(),
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.vector_id.cmp(&b.vector_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Reap all vectors of one file, e.g. after the relational half of an
    /// ingest failed and the batch became orphaned.
    pub fn delete_file(&self, kb_id: Uuid, file_id: Uuid) -> Result<usize, VectorError> {
        let doomed: Vec<Uuid> = {
            let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
            entries
                .iter()
                .filter(|p| p.kb_id == kb_id && p.file_id == file_id)
                .map(|p| p.vector_id)
                .collect()
        };
        if doomed.is_empty() {
            return Ok(0);
        }

        let txn = self.db.begin_write().map_err(VectorError::backend)?;
        {
            let mut table = txn.open_table(VECTORS).map_err(VectorError::backend)?;
            for vector_id in &doomed {
                table
                    .remove(vector_id.to_string().as_str())
                    .map_err(VectorError::backend)?;
            }
        }
        txn.commit().map_err(VectorError::backend)?;

        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.retain(|p| !(p.kb_id == kb_id && p.file_id == file_id));
        debug!(reaped = doomed.len(), %file_id, "orphan vectors reaped");
        Ok(doomed.len())
    }

    /// Number of live vectors in one KB.
    pub fn count_for_kb(&self, kb_id: Uuid) -> usize {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.iter().filter(|p| p.kb_id == kb_id).count()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn open_store() -> (VectorStore, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let store = VectorStore::open(file.path()).unwrap();
        (store, file)
    }

    fn payload(kb: Uuid, file: Uuid, embedding: Vec<f32>) -> VectorPayload {
        VectorPayload {
            vector_id: Uuid::new_v4(),
            embedding,
            node_id: Uuid::new_v4(),
            kb_id: kb,
            file_id: file,
            document_id: Uuid::new_v4(),
            page: 1,
            article_id: None,
            section_path: None,
        }
    }

    #[test]
    fn nearest_neighbor_first() {
        let (store, _guard) = open_store();
        let kb = Uuid::new_v4();
        let file = Uuid::new_v4();
        let near = payload(kb, file, vec![1.0, 0.0, 0.0]);
        let far = payload(kb, file, vec![0.0, 1.0, 0.0]);
        store.insert_batch(vec![near.clone(), far]).unwrap();

        let hits = store.search(KbScope::kb(kb), &[0.9, 0.1, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload.vector_id, near.vector_id);
        assert!(hits[0].score > hits[1].score);
        assert_eq!(hits[0].metric, MetricType::Cosine);
    }

    #[test]
    fn scope_filters_by_kb_and_file() {
        let (store, _guard) = open_store();
        let kb_a = Uuid::new_v4();
        let kb_b = Uuid::new_v4();
        let file_a = Uuid::new_v4();
        let file_b = Uuid::new_v4();
        store
            .insert_batch(vec![
                payload(kb_a, file_a, vec![1.0, 0.0]),
                payload(kb_a, file_b, vec![1.0, 0.0]),
                payload(kb_b, file_a, vec![1.0, 0.0]),
            ])
            .unwrap();

        assert_eq!(store.search(KbScope::kb(kb_a), &[1.0, 0.0], 10).unwrap().len(), 2);
        let scoped = KbScope {
            kb_id: kb_a,
            file_id: Some(file_a),
            document_id: None,
        };
        assert_eq!(store.search(scoped, &[1.0, 0.0], 10).unwrap().len(), 1);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let (store, _guard) = open_store();
        let kb = Uuid::new_v4();
        store
            .insert_batch(vec![payload(kb, Uuid::new_v4(), vec![1.0, 0.0, 0.0])])
            .unwrap();
        let res = store.search(KbScope::kb(kb), &[1.0, 0.0], 5);
        assert!(matches!(
            res,
            Err(VectorError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn top_k_zero_returns_empty() {
        let (store, _guard) = open_store();
        let kb = Uuid::new_v4();
        store
            .insert_batch(vec![payload(kb, Uuid::new_v4(), vec![1.0])])
            .unwrap();
        assert!(store.search(KbScope::kb(kb), &[1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn delete_file_reaps_orphans() {
        let (store, _guard) = open_store();
        let kb = Uuid::new_v4();
        let file = Uuid::new_v4();
        let keep_file = Uuid::new_v4();
        store
            .insert_batch(vec![
                payload(kb, file, vec![1.0, 0.0]),
                payload(kb, file, vec![0.5, 0.5]),
                payload(kb, keep_file, vec![0.0, 1.0]),
            ])
            .unwrap();

        assert_eq!(store.delete_file(kb, file).unwrap(), 2);
        assert_eq!(store.count_for_kb(kb), 1);
        assert_eq!(store.search(KbScope::kb(kb), &[1.0, 0.0], 10).unwrap().len(), 1);
    }

    #[test]
    fn entries_survive_reopen() {
        let guard = NamedTempFile::new().unwrap();
        let kb = Uuid::new_v4();
        {
            let store = VectorStore::open(guard.path()).unwrap();
            store
                .insert_batch(vec![payload(kb, Uuid::new_v4(), vec![0.2, 0.8])])
                .unwrap();
        }
        let store = VectorStore::open(guard.path()).unwrap();
        assert_eq!(store.count_for_kb(kb), 1);
        let hits = store.search(KbScope::kb(kb), &[0.2, 0.8], 1).unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_norm_vectors_score_zero() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
