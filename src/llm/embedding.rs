//! 嵌入提供方：供临时向量记忆使用
//!
//! - OpenAiEmbedder：调用 OpenAI 兼容的 /embeddings 端点
//! - HashEmbedder：SHA-256 摘要切成 16 段的确定性嵌入，无外部依赖
//!
//! `select_embedder` 在构造时选定一次：外部模型启用且探测成功才使用，否则回退到哈希嵌入。

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use sha2::{Digest, Sha256};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::config::EmbeddingSection;

/// 哈希嵌入维度
pub const HASH_EMBEDDING_DIMS: usize = 16;

/// 可从 sync 上下文调用的嵌入提供方
pub trait EmbeddingProvider: Send + Sync {
    /// 将文本编码为向量；失败时返回错误字符串
    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, String>;

    /// 日志中使用的名字
    fn kind(&self) -> &'static str;
}

/// 归一化为单位向量（零向量保持不变）
pub fn normalize_vector(values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm = if norm == 0.0 { 1.0 } else { norm };
    values.into_iter().map(|v| v / norm).collect()
}

/// 确定性哈希嵌入
#[derive(Debug, Clone, Copy, Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let chunk_size = (digest.len() / HASH_EMBEDDING_DIMS).max(1);
        let values = (0..HASH_EMBEDDING_DIMS)
            .map(|idx| {
                let start = idx * chunk_size;
                let chunk = digest.get(start..start + chunk_size).unwrap_or(&digest[..]);
                chunk.iter().fold(0f64, |acc, b| acc * 256.0 + f64::from(*b)) as f32
            })
            .collect();
        normalize_vector(values)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, String> {
        Ok(self.embed(text))
    }

    fn kind(&self) -> &'static str {
        "hash"
    }
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url)
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    pub async fn embed_async(&self, text: &str) -> Result<Vec<f32>, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(vec![]);
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| e.to_string())?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;
        let vec = response
            .data
            .first()
            .map(|e| e.embedding.clone())
            .ok_or_else(|| "embedding response has no data".to_string())?;
        Ok(normalize_vector(vec))
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    /// 仅能在多线程 runtime 中阻塞等待（block_in_place）
    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, String> {
        let handle = Handle::try_current().map_err(|e| e.to_string())?;
        if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
            return Err("embedding model requires a multi-thread runtime".to_string());
        }
        let text = text.to_string();
        let this = self.clone();
        tokio::task::block_in_place(|| handle.block_on(this.embed_async(&text)))
    }

    fn kind(&self) -> &'static str {
        "openai"
    }
}

/// 选定嵌入策略：外部模型启用、有 key 且探测成功时使用，否则哈希嵌入
pub fn select_embedder(settings: &EmbeddingSection) -> Arc<dyn EmbeddingProvider> {
    if !settings.enabled {
        return Arc::new(HashEmbedder);
    }
    let key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty());
    let Some(key) = key else {
        tracing::debug!("embedding model skipped: no OPENAI_API_KEY");
        return Arc::new(HashEmbedder);
    };

    let embedder = OpenAiEmbedder::new(settings.base_url.as_deref(), &settings.model, Some(&key));
    match embedder.embed_sync("embedding probe") {
        Ok(v) if !v.is_empty() => {
            tracing::info!(model = %settings.model, dims = v.len(), "Using embedding model");
            Arc::new(embedder)
        }
        Ok(_) => {
            tracing::warn!(model = %settings.model, "Embedding probe returned empty vector, using hash embedding");
            Arc::new(HashEmbedder)
        }
        Err(e) => {
            tracing::warn!(model = %settings.model, error = %e, "Embedding probe failed, using hash embedding");
            Arc::new(HashEmbedder)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedding_is_deterministic_unit_vector() {
        let a = HashEmbedder.embed("alpha");
        let b = HashEmbedder.embed("alpha");
        assert_eq!(a, b);
        assert_eq!(a.len(), HASH_EMBEDDING_DIMS);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_ne!(a, HashEmbedder.embed("beta"));
    }

    #[test]
    fn test_disabled_model_uses_hash() {
        let settings = EmbeddingSection::default();
        assert!(!settings.enabled);
        assert_eq!(select_embedder(&settings).kind(), "hash");
    }

    #[tokio::test]
    async fn test_model_needs_multi_thread_runtime() {
        let embedder = OpenAiEmbedder::new(Some("http://127.0.0.1:9"), "m", Some("k"));
        assert!(embedder.embed_sync("text").is_err());
    }
}
