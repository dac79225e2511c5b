//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时，execute(tool_name, ctx) 在超时内调用工具，
//! 未注册 / 失败 / 超时分别转为 ToolNotFound / ToolExecutionFailed / ToolTimeout；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::{AgentContext, AgentError};
use crate::tools::{Tool, ToolRegistry};

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 执行指定工具并输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, ctx: &AgentContext) -> Result<Value, AgentError> {
        let start = Instant::now();
        let result = match self.registry.get(tool_name) {
            None => Err(AgentError::ToolNotFound(tool_name.to_string())),
            Some(tool) => match timeout(self.timeout, tool.execute(ctx)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(format!("{}: {}", tool_name, e))),
                Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
            },
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(AgentError::ToolNotFound(_)) => "not_found",
            Err(AgentError::ToolTimeout(_)) => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "plan_id": ctx.plan_id(),
            "session_id": ctx.session_id(),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 已注册工具数（即工具循环迭代上限）
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Request;
    use async_trait::async_trait;

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _ctx: &AgentContext) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _ctx: &AgentContext) -> Result<Value, String> {
            Err("database unavailable".into())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Slow);
        registry.register(Broken);
        ToolExecutor::with_timeout(registry, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let exec = executor();
        let ctx = AgentContext::new(Request::default());
        assert!(matches!(
            exec.execute("nope", &ctx).await,
            Err(AgentError::ToolNotFound(_))
        ));
        assert!(matches!(
            exec.execute("slow", &ctx).await,
            Err(AgentError::ToolTimeout(_))
        ));
        let err = exec.execute("broken", &ctx).await.unwrap_err();
        assert!(err.to_string().contains("database unavailable"));
        assert_eq!(err.category(), "tool");
        assert_eq!(exec.len(), 2);
    }
}
