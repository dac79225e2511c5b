//! Mock 生成后端（用于测试与离线运行，无需 API）
//!
//! 按顺序弹出预设回复；回复用尽后回显最后一条 User 消息。记录每次收到的消息，便于断言 prompt 内容。

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::traits::{Completion, LlmClient, LlmError, TextStream, TokenUsage};
use crate::memory::{Message, Role};

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<Message>>>,
    fail_with: Option<String>,
    delay: Option<Duration>,
}

impl MockLlmClient {
    pub fn with_replies(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    /// 每次调用都返回 Api 错误
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    /// 调用前等待一段时间（用于超时测试）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply.into());
    }

    /// 已收到的调用次数
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// 所有调用收到的消息
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn next_reply(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());
        if let Some(msg) = &self.fail_with {
            return Err(LlmError::Api(msg.clone()));
        }
        let scripted = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        Ok(scripted.unwrap_or_else(|| {
            let last_user = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
                .unwrap_or("(no input)");
            format!("Echo from Mock: {}", last_user)
        }))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock"
    }

    async fn complete(&self, messages: &[Message], _temperature: f32) -> Result<Completion, LlmError> {
        let content = self.next_reply(messages).await?;
        let prompt_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        let usage = TokenUsage::new(prompt_chars as u64 / 4, content.chars().count() as u64 / 4);
        Ok(Completion { content, usage })
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        _temperature: f32,
    ) -> Result<TextStream, LlmError> {
        let content = self.next_reply(messages).await?;
        // 每 16 个字符切一片，模拟增量输出
        let chars: Vec<char> = content.chars().collect();
        let chunks: Vec<Result<String, LlmError>> = chars
            .chunks(16)
            .map(|c| Ok(c.iter().collect::<String>()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}
