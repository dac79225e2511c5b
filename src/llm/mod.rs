//! LLM 层：生成与嵌入后端抽象及实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod deepseek;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod timed;
pub mod traits;

use std::sync::Arc;

use crate::config::LlmSection;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use embedding::{create_embedder_from_config, EmbeddingProvider, HashEmbedder, OpenAiEmbedder};
pub use mock::MockLlmClient;
pub use openai::{CumulativeUsage, OpenAiClient};
pub use timed::TimedLlm;
pub use traits::{complete_with_timeout, Completion, LlmClient, LlmError, TextStream, TokenUsage};

/// 按 [llm] 配置创建生成后端
pub fn create_llm_client(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    match cfg.provider.as_str() {
        "mock" => Arc::new(MockLlmClient::default()),
        "deepseek" => Arc::new(create_deepseek_client(
            cfg.model.as_deref(),
            cfg.base_url.as_deref(),
            cfg.api_key.as_deref(),
        )),
        other => {
            if other != "openai" {
                tracing::warn!(provider = other, "unknown provider, using openai-compatible client");
            }
            let model = cfg.model.as_deref().unwrap_or("gpt-4o-mini");
            Arc::new(OpenAiClient::new(
                cfg.base_url.as_deref(),
                model,
                cfg.api_key.as_deref(),
            ))
        }
    }
}
