//! 文本生成后端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：complete（非流式，返回内容与 token 用量）、
//! complete_stream（流式文本片段）。complete_with_timeout 为每次调用加超时并输出审计日志。

use std::pin::Pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;
use thiserror::Error;
use tokio::time::timeout;

use crate::memory::Message;

/// 生成/嵌入后端错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Request build failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Timeout after {0}s")]
    Timeout(u64),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Embedding error: {0}")]
    Embedding(String),
}

/// 单次调用的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// 非流式完成结果
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

/// 流式文本片段
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// 生成后端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 后端名（openai / deepseek / mock），用于日志
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    /// 非流式完成
    async fn complete(&self, messages: &[Message], temperature: f32) -> Result<Completion, LlmError>;

    /// 流式完成，返回文本片段流
    async fn complete_stream(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> Result<TextStream, LlmError>;
}

/// 带超时的非流式调用：超时转为 LlmError::Timeout，成功/失败都输出 llm_call 审计日志
pub async fn complete_with_timeout(
    client: &dyn LlmClient,
    endpoint: &str,
    messages: &[Message],
    temperature: f32,
    timeout_secs: u64,
) -> Result<Completion, LlmError> {
    let start = Instant::now();
    let result = match timeout(
        Duration::from_secs(timeout_secs),
        client.complete(messages, temperature),
    )
    .await
    {
        Ok(r) => r,
        Err(_) => Err(LlmError::Timeout(timeout_secs)),
    };
    let latency_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok(completion) => {
            let audit = serde_json::json!({
                "event": "llm_call",
                "endpoint": endpoint,
                "provider": client.provider(),
                "model": client.model(),
                "messages": messages.len(),
                "latency_ms": latency_ms,
                "usage": completion.usage,
            });
            tracing::info!(audit = %audit.to_string(), "llm");
        }
        Err(e) => {
            tracing::error!(
                endpoint,
                provider = client.provider(),
                model = client.model(),
                latency_ms,
                category = "provider",
                error = %e,
                "llm call failed"
            );
        }
    }
    result
}
