//! 临时向量记忆（单次运行内有效）
//!
//! TempRagStore 在内存中保存 (文本, 向量, 元数据, 时间戳)，按余弦相似度检索：
//! 过滤掉低于阈值的条目，按相似度降序返回前 k 条。超过容量时淘汰最旧条目。
//!
//! 可选镜像后端（SQLite）：首次写入失败即永久停用，之后只用内存存储。

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm::EmbeddingProvider;

/// 默认容量
pub const MAX_TEMP_RAG_ENTRIES: usize = 1_000;

/// 默认相似度阈值
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.75;

/// 一条记忆
#[derive(Debug, Clone, Serialize)]
pub struct RagEntry {
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// 检索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagMatch {
    pub text: String,
    pub metadata: Map<String, Value>,
    pub similarity: f32,
}

#[derive(Error, Debug)]
pub enum RagBackendError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 镜像后端
pub trait RagBackend: Send {
    fn kind(&self) -> &'static str;

    fn insert(&mut self, entry: &RagEntry) -> Result<(), RagBackendError>;

    fn reset(&mut self) -> Result<(), RagBackendError>;
}

/// SQLite 镜像：表 explore_findings，向量以 f32 小端字节存为 BLOB
pub struct SqliteRagBackend {
    conn: Connection,
}

impl SqliteRagBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RagBackendError> {
        Self::with_connection(Connection::open(path)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RagBackendError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS explore_findings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                vector BLOB NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    pub fn count(&self) -> Result<usize, RagBackendError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM explore_findings", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

impl RagBackend for SqliteRagBackend {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn insert(&mut self, entry: &RagEntry) -> Result<(), RagBackendError> {
        let metadata = serde_json::to_string(&entry.metadata)?;
        self.conn.execute(
            "INSERT INTO explore_findings (text, vector, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.text,
                vector_to_blob(&entry.vector),
                metadata,
                entry.timestamp,
            ],
        )?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), RagBackendError> {
        self.conn.execute("DELETE FROM explore_findings", [])?;
        Ok(())
    }
}

/// 余弦相似度；按较短向量对齐，零范数按 1 处理
pub fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> f32 {
    let dot: f32 = lhs.iter().zip(rhs).map(|(x, y)| x * y).sum();
    let norm = |v: &[f32]| {
        let n = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if n == 0.0 {
            1.0
        } else {
            n
        }
    };
    dot / (norm(lhs) * norm(rhs))
}

/// 临时向量记忆
pub struct TempRagStore {
    embedder: Arc<dyn EmbeddingProvider>,
    entries: VecDeque<RagEntry>,
    threshold: f32,
    max_entries: usize,
    backend: Option<Box<dyn RagBackend>>,
}

impl TempRagStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, threshold: f32, max_entries: usize) -> Self {
        Self {
            embedder,
            entries: VecDeque::new(),
            threshold,
            max_entries: max_entries.max(1),
            backend: None,
        }
    }

    pub fn with_backend(mut self, backend: Box<dyn RagBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// "fallback"（仅内存）或镜像后端名
    pub fn backend_kind(&self) -> &'static str {
        self.backend.as_ref().map(|b| b.kind()).unwrap_or("fallback")
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RagEntry> {
        self.entries.iter()
    }

    /// 清空内存条目与镜像后端
    pub fn reset(&mut self) {
        self.entries.clear();
        if let Some(backend) = self.backend.as_mut() {
            if let Err(e) = backend.reset() {
                tracing::warn!(error = %e, "RAG backend reset failed, falling back to memory");
                self.backend = None;
            }
        }
    }

    /// 添加一条记忆；空白文本忽略，嵌入失败则跳过
    pub fn add(&mut self, text: &str, metadata: Map<String, Value>) {
        if text.trim().is_empty() {
            return;
        }
        let vector = match self.embedder.embed_sync(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "Embedding failed, finding not recorded");
                return;
            }
        };
        let entry = RagEntry {
            text: text.to_string(),
            vector,
            metadata,
            timestamp: Utc::now(),
        };

        if let Some(backend) = self.backend.as_mut() {
            if let Err(e) = backend.insert(&entry) {
                tracing::warn!(backend = backend.kind(), error = %e, "RAG backend write failed, falling back to memory");
                self.backend = None;
            }
        }

        self.entries.push_back(entry);
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    /// 检索相似度 ≥ 阈值的条目，按相似度降序，最多 k 条
    pub fn query(&self, text: &str, k: usize) -> Vec<RagMatch> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let vector = match self.embedder.embed_sync(text) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };

        let mut matches: Vec<RagMatch> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let similarity = cosine_similarity(&vector, &entry.vector);
                (similarity >= self.threshold).then(|| RagMatch {
                    text: entry.text.clone(),
                    metadata: entry.metadata.clone(),
                    similarity,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashEmbedder;
    use serde_json::json;

    /// 文本即向量："1 0 0" → [1, 0, 0]；"fail" 报错
    struct LiteralEmbedder;

    impl EmbeddingProvider for LiteralEmbedder {
        fn embed_sync(&self, text: &str) -> Result<Vec<f32>, String> {
            text.split_whitespace()
                .map(|t| t.parse::<f32>().map_err(|e| e.to_string()))
                .collect()
        }

        fn kind(&self) -> &'static str {
            "literal"
        }
    }

    struct BrokenBackend;

    impl RagBackend for BrokenBackend {
        fn kind(&self) -> &'static str {
            "broken"
        }

        fn insert(&mut self, _entry: &RagEntry) -> Result<(), RagBackendError> {
            Err(RagBackendError::Sqlite(rusqlite::Error::InvalidQuery))
        }

        fn reset(&mut self) -> Result<(), RagBackendError> {
            Ok(())
        }
    }

    fn meta(tag: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("tag".into(), json!(tag));
        m
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut store = TempRagStore::new(Arc::new(HashEmbedder), 0.0, 2);
        store.add("first", meta("1"));
        store.add("second", meta("2"));
        store.add("third", meta("3"));
        assert_eq!(store.len(), 2);
        let texts: Vec<&str> = store.entries().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "third"]);
    }

    #[test]
    fn test_query_threshold_and_order() {
        let mut store = TempRagStore::new(Arc::new(LiteralEmbedder), 0.5, 10);
        store.add("1 0 0", meta("x"));
        store.add("0 1 0", meta("y"));
        store.add("1 1 0", meta("xy"));

        let matches = store.query("1 0.1 0", 5);
        let tags: Vec<&Value> = matches.iter().map(|m| &m.metadata["tag"]).collect();
        assert_eq!(tags, vec![&json!("x"), &json!("xy")]);
        assert!(matches[0].similarity >= matches[1].similarity);

        assert_eq!(store.query("1 0.1 0", 1).len(), 1);
    }

    #[test]
    fn test_blank_and_failed_embeddings() {
        let mut store = TempRagStore::new(Arc::new(LiteralEmbedder), 0.0, 10);
        store.add("   ", Map::new());
        store.add("fail", Map::new());
        assert!(store.is_empty());
        assert!(store.query("  ", 3).is_empty());
        assert!(store.query("fail", 3).is_empty());
    }

    #[test]
    fn test_max_entries_floor_is_one() {
        let mut store = TempRagStore::new(Arc::new(HashEmbedder), 0.0, 0);
        store.add("a", Map::new());
        store.add("b", Map::new());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_backend_degrades_once() {
        let mut store =
            TempRagStore::new(Arc::new(HashEmbedder), 0.0, 10).with_backend(Box::new(BrokenBackend));
        assert_eq!(store.backend_kind(), "broken");
        store.add("finding", Map::new());
        assert_eq!(store.backend_kind(), "fallback");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sqlite_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("findings.db");
        let store_backend = SqliteRagBackend::open(&path).unwrap();
        let mut store = TempRagStore::new(Arc::new(HashEmbedder), 0.0, 10)
            .with_backend(Box::new(store_backend));
        store.add("one", meta("1"));
        store.add("two", meta("2"));
        assert_eq!(store.backend_kind(), "sqlite");

        let check = SqliteRagBackend::open(&path).unwrap();
        assert_eq!(check.count().unwrap(), 2);

        store.reset();
        assert!(store.is_empty());
        assert_eq!(check.count().unwrap(), 0);
    }
}
