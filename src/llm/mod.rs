//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）与嵌入提供方

pub mod deepseek;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use deepseek::{create_deepseek_client, deepseek_api_key, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use embedding::{
    normalize_vector, select_embedder, EmbeddingProvider, HashEmbedder, OpenAiEmbedder,
    HASH_EMBEDDING_DIMS,
};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, Message, Role};
