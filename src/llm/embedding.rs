//! 嵌入 API：供长期记忆使用
//!
//! - OpenAiEmbedder：调用 OpenAI 兼容的 /embeddings 端点（批量输入）
//! - HashEmbedder：离线确定性向量（词与汉字哈希到固定维度），用于测试与未配置 Key 的环境

use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::{EmbeddingSection, LlmSection};
use crate::llm::LlmError;

/// 嵌入提供方：批量文本 -> 固定维度向量
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 按输入顺序返回向量；失败时整批失败
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    fn dimensions(&self) -> usize;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Embedding("empty embedding response".to_string()))
    }
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: usize,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, dimensions: usize) -> Self {
        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            dimensions,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(texts.to_vec()))
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.embeddings().create(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| LlmError::Embedding(e.to_string()))?;

        let mut data = response.data;
        data.sort_by_key(|e| e.index);
        if data.len() != texts.len() {
            return Err(LlmError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }
        tracing::debug!(count = data.len(), model = %self.model, "generated embeddings");
        Ok(data.into_iter().map(|e| e.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// 离线确定性嵌入：ASCII 词与单个非 ASCII 字符各自哈希到一个维度，最后 L2 归一化
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn tokens(text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut word = String::new();
        for c in text.chars() {
            if c.is_ascii_alphanumeric() {
                word.push(c.to_ascii_lowercase());
                continue;
            }
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            if !c.is_ascii() && c.is_alphanumeric() {
                tokens.push(c.to_string());
            }
        }
        if !word.is_empty() {
            tokens.push(word);
        }
        tokens
    }

    /// FNV-1a
    fn bucket(&self, token: &str) -> usize {
        let mut hash: u64 = 0xcbf29ce484222325;
        for b in token.as_bytes() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dimensions as u64) as usize
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for token in Self::tokens(text) {
            v[self.bucket(&token)] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// 从应用配置创建嵌入提供方；未启用或无 API Key 时退化为 HashEmbedder
pub fn create_embedder_from_config(
    embedding: &EmbeddingSection,
    llm: &LlmSection,
) -> Arc<dyn EmbeddingProvider> {
    let key = llm
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .filter(|k| !k.is_empty() && k != "sk-placeholder");

    match key {
        Some(key) if embedding.enabled && llm.provider != "mock" => Arc::new(
            OpenAiEmbedder::new(
                llm.base_url.as_deref(),
                &embedding.model,
                &key,
                embedding.dimensions,
            )
            .with_timeout(embedding.timeout_secs),
        ),
        _ => {
            tracing::warn!("embedding API not configured, falling back to hash embedder");
            Arc::new(HashEmbedder::new(embedding.dimensions))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::vector::cosine_similarity;

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic() {
        let e = HashEmbedder::new(64);
        let a = e.embed_one("跑步 训练 RPE 7").await.unwrap();
        let b = e.embed_one("跑步 训练 RPE 7").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_hash_embedder_similarity_ordering() {
        let e = HashEmbedder::new(256);
        let vs = e
            .embed(&[
                "第2周 周三 休息".to_string(),
                "第2周 周三 改为休息日".to_string(),
                "deadlift squat bench".to_string(),
            ])
            .await
            .unwrap();
        let near = cosine_similarity(&vs[0], &vs[1]);
        let far = cosine_similarity(&vs[0], &vs[2]);
        assert!(near > far);
    }

    #[test]
    fn test_fallback_when_mock_provider() {
        let llm = LlmSection {
            provider: "mock".into(),
            ..LlmSection::default()
        };
        let e = create_embedder_from_config(&EmbeddingSection::default(), &llm);
        assert_eq!(e.dimensions(), 1536);
    }
}
