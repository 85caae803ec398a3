//! Document store for the lexrag pipeline.
//!
//! Durable, ordered storage for knowledge bases, files, documents, nodes, and
//! every pipeline record (retrieval, generation, evaluation), backed by redb.
//! Redb gives us ACID transactions without external dependencies, which keeps
//! the all-or-nothing-per-file ingest contract simple: one write transaction
//! per ingested file.
//!
//! Keyword search runs over an in-memory BM25 inverted index that is rebuilt
//! from the `nodes` table on open and updated after each committed ingest, so
//! it always mirrors durable state. Raw BM25 scores are min-max normalized to
//! higher-is-better before they leave this crate; the normalizer identity is
//! pinned as [`BM25_NORMALIZER`].

mod error;
mod fulltext;
mod types;

pub use error::StoreError;
pub use fulltext::{query_terms, BM25_NORMALIZER};
pub use types::{
    ChunkingConfig, Citation, Conversation, Document, EvaluationRecord, GenerationRecord,
    GenerationStatus, HitSource, IngestStatus, KnowledgeBase, KnowledgeFile, Message,
    MessageStatus, Node, NodeVectorMap, PageText, RetrievalHit, RetrievalRecord, StageTimings,
};

use fulltext::FullTextIndex;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const KBS: TableDefinition<&str, &[u8]> = TableDefinition::new("kbs");
const KB_NAMES: TableDefinition<&str, &str> = TableDefinition::new("kb_names");
const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("files");
const FILE_SHAS: TableDefinition<&str, &str> = TableDefinition::new("file_shas");
const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");
const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");
const FILE_NODES: TableDefinition<&str, &str> = TableDefinition::new("file_nodes");
const NODE_VECTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("node_vectors");
const CONVERSATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("conversations");
const MESSAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("messages");
const RETRIEVAL_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("retrieval_records");
const RETRIEVAL_HITS: TableDefinition<&str, &[u8]> = TableDefinition::new("retrieval_hits");
const GENERATION_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("generation_records");
const EVALUATION_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("evaluation_records");

/// A keyword-recall hit leaving the store: `score` is min-max normalized to
/// higher-is-better, `raw_score` is the untouched BM25 value.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub node_id: Uuid,
    pub score: f32,
    pub raw_score: f32,
}

/// Document store handle. Cheap to clone behind `Arc`; redb handles its own
/// internal locking and MVCC.
pub struct DocStore {
    db: Arc<Database>,
    fulltext: FullTextIndex,
}

impl DocStore {
    /// Open or create the store at `path`, then rebuild the BM25 index from
    /// the persisted nodes.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(StoreError::backend)?;

        // Touch every table up front so read transactions never race table
        // creation.
        let txn = db.begin_write().map_err(StoreError::backend)?;
        {
            txn.open_table(KBS).map_err(StoreError::backend)?;
            txn.open_table(KB_NAMES).map_err(StoreError::backend)?;
            txn.open_table(FILES).map_err(StoreError::backend)?;
            txn.open_table(FILE_SHAS).map_err(StoreError::backend)?;
            txn.open_table(DOCUMENTS).map_err(StoreError::backend)?;
            txn.open_table(NODES).map_err(StoreError::backend)?;
            txn.open_table(FILE_NODES).map_err(StoreError::backend)?;
            txn.open_table(NODE_VECTORS).map_err(StoreError::backend)?;
            txn.open_table(CONVERSATIONS).map_err(StoreError::backend)?;
            txn.open_table(MESSAGES).map_err(StoreError::backend)?;
            txn.open_table(RETRIEVAL_RECORDS).map_err(StoreError::backend)?;
            txn.open_table(RETRIEVAL_HITS).map_err(StoreError::backend)?;
            txn.open_table(GENERATION_RECORDS).map_err(StoreError::backend)?;
            txn.open_table(EVALUATION_RECORDS).map_err(StoreError::backend)?;
        }
        txn.commit().map_err(StoreError::backend)?;

        let store = Self {
            db: Arc::new(db),
            fulltext: FullTextIndex::new(),
        };
        let indexed = store.rebuild_fulltext()?;
        info!(indexed, "document store opened");
        Ok(store)
    }

    fn rebuild_fulltext(&self) -> Result<usize, StoreError> {
        let txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = txn.open_table(NODES).map_err(StoreError::backend)?;
        let mut count = 0usize;
        for item in table.iter().map_err(StoreError::backend)? {
            let (_, value) = item.map_err(StoreError::backend)?;
            let node: Node = decode(value.value())?;
            self.fulltext.index_node(node.kb_id, node.id, &node.text);
            count += 1;
        }
        Ok(count)
    }

    // ── Knowledge bases ────────────────────────────────────────────────

    pub fn create_kb(&self, kb: &KnowledgeBase) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let names = txn.open_table(KB_NAMES).map_err(StoreError::backend)?;
            if names
                .get(kb.name.as_str())
                .map_err(StoreError::backend)?
                .is_some()
            {
                return Err(StoreError::Conflict(format!(
                    "knowledge base '{}' already exists",
                    kb.name
                )));
            }
        }
        {
            let mut kbs = txn.open_table(KBS).map_err(StoreError::backend)?;
            kbs.insert(key(&kb.id).as_str(), encode(kb)?.as_slice())
                .map_err(StoreError::backend)?;
            let mut names = txn.open_table(KB_NAMES).map_err(StoreError::backend)?;
            names
                .insert(kb.name.as_str(), key(&kb.id).as_str())
                .map_err(StoreError::backend)?;
        }
        txn.commit().map_err(StoreError::backend)?;
        info!(kb_id = %kb.id, name = %kb.name, "knowledge base created");
        Ok(())
    }

    pub fn get_kb(&self, id: Uuid) -> Result<Option<KnowledgeBase>, StoreError> {
        self.get_json(KBS, &key(&id))
    }

    pub fn get_kb_by_name(&self, name: &str) -> Result<Option<KnowledgeBase>, StoreError> {
        let txn = self.db.begin_read().map_err(StoreError::backend)?;
        let names = txn.open_table(KB_NAMES).map_err(StoreError::backend)?;
        let Some(id) = names.get(name).map_err(StoreError::backend)? else {
            return Ok(None);
        };
        let id = id.value().to_string();
        drop(names);
        self.get_json(KBS, &id)
    }

    pub fn list_kbs(&self) -> Result<Vec<KnowledgeBase>, StoreError> {
        self.scan_json(KBS)
    }

    // ── Files and ingest persistence ───────────────────────────────────

    pub fn find_file_by_sha(
        &self,
        kb_id: Uuid,
        sha256: &str,
    ) -> Result<Option<KnowledgeFile>, StoreError> {
        let txn = self.db.begin_read().map_err(StoreError::backend)?;
        let shas = txn.open_table(FILE_SHAS).map_err(StoreError::backend)?;
        let sha_key = format!("{}/{sha256}", key(&kb_id));
        let Some(file_id) = shas.get(sha_key.as_str()).map_err(StoreError::backend)? else {
            return Ok(None);
        };
        let file_id = file_id.value().to_string();
        drop(shas);
        self.get_json(FILES, &file_id)
    }

    /// Register a file in state `pending` and claim its `(kb_id, sha256)` key.
    pub fn insert_file(&self, file: &KnowledgeFile) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let mut files = txn.open_table(FILES).map_err(StoreError::backend)?;
            files
                .insert(key(&file.id).as_str(), encode(file)?.as_slice())
                .map_err(StoreError::backend)?;
            let mut shas = txn.open_table(FILE_SHAS).map_err(StoreError::backend)?;
            let sha_key = format!("{}/{}", key(&file.kb_id), file.sha256);
            shas.insert(sha_key.as_str(), key(&file.id).as_str())
                .map_err(StoreError::backend)?;
        }
        txn.commit().map_err(StoreError::backend)?;
        Ok(())
    }

    pub fn update_file(&self, file: &KnowledgeFile) -> Result<(), StoreError> {
        self.put_json(FILES, &key(&file.id), file)
    }

    pub fn get_file(&self, id: Uuid) -> Result<Option<KnowledgeFile>, StoreError> {
        self.get_json(FILES, &key(&id))
    }

    /// Persist a fully ingested file in one transaction: document, nodes in
    /// reading order, node→vector mappings, and the file's final state.
    ///
    /// Either everything lands or nothing does; the BM25 index is updated
    /// only after the transaction commits.
    pub fn persist_ingest(
        &self,
        file: &KnowledgeFile,
        document: &Document,
        nodes: &[Node],
        maps: &[NodeVectorMap],
    ) -> Result<(), StoreError> {
        validate_node_order(file.id, nodes)?;
        if nodes.len() != maps.len() {
            return Err(StoreError::Conflict(format!(
                "node/vector-map count mismatch: {} nodes vs {} maps",
                nodes.len(),
                maps.len()
            )));
        }

        let txn = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let mut documents = txn.open_table(DOCUMENTS).map_err(StoreError::backend)?;
            documents
                .insert(key(&document.id).as_str(), encode(document)?.as_slice())
                .map_err(StoreError::backend)?;

            let mut node_table = txn.open_table(NODES).map_err(StoreError::backend)?;
            let mut file_nodes = txn.open_table(FILE_NODES).map_err(StoreError::backend)?;
            for node in nodes {
                node_table
                    .insert(key(&node.id).as_str(), encode(node)?.as_slice())
                    .map_err(StoreError::backend)?;
                let order_key = file_node_key(file.id, node.node_index);
                file_nodes
                    .insert(order_key.as_str(), key(&node.id).as_str())
                    .map_err(StoreError::backend)?;
            }

            let mut vectors = txn.open_table(NODE_VECTORS).map_err(StoreError::backend)?;
            for map in maps {
                vectors
                    .insert(key(&map.node_id).as_str(), encode(map)?.as_slice())
                    .map_err(StoreError::backend)?;
            }

            let mut files = txn.open_table(FILES).map_err(StoreError::backend)?;
            files
                .insert(key(&file.id).as_str(), encode(file)?.as_slice())
                .map_err(StoreError::backend)?;
        }
        txn.commit().map_err(StoreError::backend)?;

        for node in nodes {
            self.fulltext.index_node(node.kb_id, node.id, &node.text);
        }
        debug!(file_id = %file.id, nodes = nodes.len(), "ingest persisted");
        Ok(())
    }

    /// Remove everything a previous ingest of `file_id` produced (nodes,
    /// order keys, vector mappings, documents). Used by forced re-ingest.
    pub fn delete_file_contents(&self, file_id: Uuid) -> Result<(), StoreError> {
        let Some(file) = self.get_file(file_id)? else {
            return Ok(());
        };
        let nodes = self.nodes_for_file(file_id)?;
        let node_ids: Vec<Uuid> = nodes.iter().map(|n| n.id).collect();
        let documents: Vec<Document> = self
            .scan_json::<Document>(DOCUMENTS)?
            .into_iter()
            .filter(|d| d.file_id == file_id)
            .collect();

        let txn = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let mut node_table = txn.open_table(NODES).map_err(StoreError::backend)?;
            let mut file_nodes = txn.open_table(FILE_NODES).map_err(StoreError::backend)?;
            let mut vectors = txn.open_table(NODE_VECTORS).map_err(StoreError::backend)?;
            for node in &nodes {
                node_table
                    .remove(key(&node.id).as_str())
                    .map_err(StoreError::backend)?;
                file_nodes
                    .remove(file_node_key(file_id, node.node_index).as_str())
                    .map_err(StoreError::backend)?;
                vectors
                    .remove(key(&node.id).as_str())
                    .map_err(StoreError::backend)?;
            }
            let mut doc_table = txn.open_table(DOCUMENTS).map_err(StoreError::backend)?;
            for doc in &documents {
                doc_table
                    .remove(key(&doc.id).as_str())
                    .map_err(StoreError::backend)?;
            }
        }
        txn.commit().map_err(StoreError::backend)?;

        self.fulltext.remove_nodes(file.kb_id, &node_ids);
        Ok(())
    }

    // ── Nodes and evidence previews ────────────────────────────────────

    pub fn get_node(&self, id: Uuid) -> Result<Option<Node>, StoreError> {
        self.get_json(NODES, &key(&id))
    }

    /// Fetch nodes by id, skipping ids that no longer exist.
    pub fn get_nodes(&self, ids: &[Uuid]) -> Result<Vec<Node>, StoreError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = self.get_node(*id)? {
                out.push(node);
            }
        }
        Ok(out)
    }

    /// All nodes of a file in `node_index` order.
    pub fn nodes_for_file(&self, file_id: Uuid) -> Result<Vec<Node>, StoreError> {
        let txn = self.db.begin_read().map_err(StoreError::backend)?;
        let file_nodes = txn.open_table(FILE_NODES).map_err(StoreError::backend)?;
        let node_table = txn.open_table(NODES).map_err(StoreError::backend)?;

        let lower = format!("{}/", key(&file_id));
        // '0' is the successor of '/' in ASCII, so this bounds the prefix.
        let upper = format!("{}0", key(&file_id));
        let mut out = Vec::new();
        for item in file_nodes
            .range(lower.as_str()..upper.as_str())
            .map_err(StoreError::backend)?
        {
            let (_, node_id) = item.map_err(StoreError::backend)?;
            let Some(raw) = node_table
                .get(node_id.value())
                .map_err(StoreError::backend)?
            else {
                return Err(StoreError::NotFound(format!(
                    "node {} listed for file {file_id} but missing",
                    node_id.value()
                )));
            };
            out.push(decode::<Node>(raw.value())?);
        }
        Ok(out)
    }

    pub fn get_document(&self, id: Uuid) -> Result<Option<Document>, StoreError> {
        self.get_json(DOCUMENTS, &key(&id))
    }

    /// Concatenate a page's node texts in reading order, truncated to
    /// `max_chars` on a char boundary.
    pub fn get_page(
        &self,
        document_id: Uuid,
        page: u32,
        max_chars: usize,
    ) -> Result<Option<PageText>, StoreError> {
        let Some(document) = self.get_document(document_id)? else {
            return Ok(None);
        };
        let nodes = self.nodes_for_file(document.file_id)?;
        let mut text = String::new();
        let mut node_ids = Vec::new();
        for node in nodes.iter().filter(|n| n.page == page) {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&node.text);
            node_ids.push(node.id);
        }
        let truncated = text.chars().count() > max_chars;
        if truncated {
            text = text.chars().take(max_chars).collect();
        }
        Ok(Some(PageText {
            document_id,
            page,
            text,
            node_ids,
            truncated,
        }))
    }

    /// BM25 keyword search scoped to one KB. Scores are min-max normalized
    /// over the result set (higher is better, in `[0, 1]`); the raw BM25
    /// value rides along for `score_details`.
    pub fn search_nodes_by_keyword(
        &self,
        kb_id: Uuid,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<KeywordHit>, StoreError> {
        let raw = self.fulltext.search(kb_id, query, top_k);
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let max = raw.iter().map(|(_, s)| *s).fold(f32::MIN, f32::max);
        let min = raw.iter().map(|(_, s)| *s).fold(f32::MAX, f32::min);
        let span = max - min;
        Ok(raw
            .into_iter()
            .map(|(node_id, raw_score)| KeywordHit {
                node_id,
                score: if span > f32::EPSILON {
                    (raw_score - min) / span
                } else {
                    1.0
                },
                raw_score,
            })
            .collect())
    }

    // ── Conversations and messages ─────────────────────────────────────

    pub fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.put_json(CONVERSATIONS, &key(&conversation.id), conversation)
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        self.get_json(CONVERSATIONS, &key(&id))
    }

    pub fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        self.put_json(MESSAGES, &key(&message.id), message)
    }

    pub fn update_message(&self, message: &Message) -> Result<(), StoreError> {
        self.put_json(MESSAGES, &key(&message.id), message)
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        self.get_json(MESSAGES, &key(&id))
    }

    // ── Pipeline records ───────────────────────────────────────────────

    /// Write a retrieval record and its hits atomically.
    pub fn insert_retrieval_record(
        &self,
        record: &RetrievalRecord,
        hits: &[RetrievalHit],
    ) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let mut records = txn
                .open_table(RETRIEVAL_RECORDS)
                .map_err(StoreError::backend)?;
            records
                .insert(key(&record.id).as_str(), encode(record)?.as_slice())
                .map_err(StoreError::backend)?;
            let mut hit_table = txn.open_table(RETRIEVAL_HITS).map_err(StoreError::backend)?;
            hit_table
                .insert(key(&record.id).as_str(), encode(&hits)?.as_slice())
                .map_err(StoreError::backend)?;
        }
        txn.commit().map_err(StoreError::backend)?;
        Ok(())
    }

    pub fn get_retrieval_record(
        &self,
        id: Uuid,
    ) -> Result<Option<(RetrievalRecord, Vec<RetrievalHit>)>, StoreError> {
        let Some(record) = self.get_json::<RetrievalRecord>(RETRIEVAL_RECORDS, &key(&id))? else {
            return Ok(None);
        };
        let hits = self
            .get_json::<Vec<RetrievalHit>>(RETRIEVAL_HITS, &key(&id))?
            .unwrap_or_default();
        Ok(Some((record, hits)))
    }

    pub fn insert_generation_record(&self, record: &GenerationRecord) -> Result<(), StoreError> {
        self.put_json(GENERATION_RECORDS, &key(&record.id), record)
    }

    pub fn get_generation_record(&self, id: Uuid) -> Result<Option<GenerationRecord>, StoreError> {
        self.get_json(GENERATION_RECORDS, &key(&id))
    }

    pub fn insert_evaluation_record(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        self.put_json(EVALUATION_RECORDS, &key(&record.id), record)
    }

    pub fn get_evaluation_record(&self, id: Uuid) -> Result<Option<EvaluationRecord>, StoreError> {
        self.get_json(EVALUATION_RECORDS, &key(&id))
    }

    // ── Generic helpers ────────────────────────────────────────────────

    fn put_json<T: Serialize>(
        &self,
        def: TableDefinition<&str, &[u8]>,
        id: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let mut table = txn.open_table(def).map_err(StoreError::backend)?;
            table
                .insert(id, encode(value)?.as_slice())
                .map_err(StoreError::backend)?;
        }
        txn.commit().map_err(StoreError::backend)?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        def: TableDefinition<&str, &[u8]>,
        id: &str,
    ) -> Result<Option<T>, StoreError> {
        let txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = txn.open_table(def).map_err(StoreError::backend)?;
        match table.get(id).map_err(StoreError::backend)? {
            Some(raw) => Ok(Some(decode(raw.value())?)),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(
        &self,
        def: TableDefinition<&str, &[u8]>,
    ) -> Result<Vec<T>, StoreError> {
        let txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = txn.open_table(def).map_err(StoreError::backend)?;
        let mut out = Vec::new();
        for item in table.iter().map_err(StoreError::backend)? {
            let (_, value) = item.map_err(StoreError::backend)?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }
}

fn key(id: &Uuid) -> String {
    id.to_string()
}

fn file_node_key(file_id: Uuid, node_index: u32) -> String {
    format!("{file_id}/{node_index:08}")
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(raw).map_err(|e| StoreError::Decode(e.to_string()))
}

/// Reading-order invariant: node_index must cover `0..N-1` without gaps.
fn validate_node_order(file_id: Uuid, nodes: &[Node]) -> Result<(), StoreError> {
    for (expected, node) in nodes.iter().enumerate() {
        if node.node_index as usize != expected {
            return Err(StoreError::Conflict(format!(
                "file {file_id}: node_index {} at position {expected} breaks contiguity",
                node.node_index
            )));
        }
        if node.text.trim().is_empty() {
            return Err(StoreError::Conflict(format!(
                "file {file_id}: node {} has empty text",
                node.id
            )));
        }
    }
    Ok(())
}
