//! 带超时与审计的生成后端句柄，供动作处理器共享

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::config::LlmSection;
use crate::llm::{complete_with_timeout, LlmClient, LlmError, TextStream};
use crate::memory::Message;

/// 生成后端 + 温度 + 超时
#[derive(Clone)]
pub struct TimedLlm {
    client: Arc<dyn LlmClient>,
    temperature: f32,
    timeout_secs: u64,
    stream_timeout_secs: u64,
}

impl TimedLlm {
    pub fn new(client: Arc<dyn LlmClient>, temperature: f32, timeout_secs: u64) -> Self {
        Self {
            client,
            temperature,
            timeout_secs,
            stream_timeout_secs: timeout_secs,
        }
    }

    pub fn from_config(client: Arc<dyn LlmClient>, cfg: &LlmSection) -> Self {
        Self {
            client,
            temperature: cfg.temperature,
            timeout_secs: cfg.request_timeout_secs,
            stream_timeout_secs: cfg.stream_timeout_secs,
        }
    }

    pub fn with_stream_timeout(mut self, secs: u64) -> Self {
        self.stream_timeout_secs = secs;
        self
    }

    pub fn client(&self) -> &Arc<dyn LlmClient> {
        &self.client
    }

    /// 非流式调用，返回文本内容
    pub async fn complete(&self, endpoint: &str, messages: &[Message]) -> Result<String, LlmError> {
        let completion = complete_with_timeout(
            self.client.as_ref(),
            endpoint,
            messages,
            self.temperature,
            self.timeout_secs,
        )
        .await?;
        Ok(completion.content)
    }

    /// 打开流；超时只约束建立连接，不约束整个流
    pub async fn stream(&self, endpoint: &str, messages: &[Message]) -> Result<TextStream, LlmError> {
        tracing::debug!(
            endpoint,
            provider = self.client.provider(),
            model = self.client.model(),
            "opening completion stream"
        );
        match timeout(
            Duration::from_secs(self.stream_timeout_secs),
            self.client.complete_stream(messages, self.temperature),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(endpoint, category = "provider", timeout_secs = self.stream_timeout_secs, "stream open timed out");
                Err(LlmError::Timeout(self.stream_timeout_secs))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_complete_and_stream() {
        let mock = Arc::new(MockLlmClient::with_replies(vec!["第一次".into(), "第二次回复".into()]));
        let llm = TimedLlm::new(mock.clone(), 0.5, 5);

        assert_eq!(llm.complete("test", &[Message::user("hi")]).await.unwrap(), "第一次");

        let chunks: Vec<String> = llm
            .stream("test", &[Message::user("hi")])
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), "第二次回复");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_error() {
        let mock = Arc::new(MockLlmClient::with_replies(vec!["slow".into()]).with_delay(Duration::from_secs(3)));
        let llm = TimedLlm::new(mock, 0.5, 1);
        let err = llm.complete("test", &[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout(1)));
    }
}
