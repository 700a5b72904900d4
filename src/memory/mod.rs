//! 记忆层：单次运行内的临时向量记忆

pub mod rag;

pub use rag::{
    cosine_similarity, RagBackend, RagBackendError, RagEntry, RagMatch, SqliteRagBackend,
    TempRagStore, DEFAULT_SIMILARITY_THRESHOLD, MAX_TEMP_RAG_ENTRIES,
};
