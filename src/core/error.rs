//! 编排引擎错误类型
//!
//! 按错误类别决定传播方式：校验/路由错误直接返回调用方，其余错误降级为 success=false 的响应。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::MemoryError;

/// 编排过程中可能出现的错误
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    /// 请求缺少该动作所需的字段
    #[error("Validation error: {0}")]
    Validation(String),

    /// 无法从请求推断动作类型
    #[error("Routing error: {0}")]
    Routing(String),

    /// 动作已解析但未注册处理器（编程错误）
    #[error("Action not registered: {0}")]
    ActionNotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider timeout after {0}s")]
    ProviderTimeout(u64),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 工具循环超过迭代上限
    #[error("Tool loop exceeded {0} iterations")]
    ToolLoopExceeded(usize),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 错误所属类别（用于日志字段）
    pub fn category(&self) -> &'static str {
        match self {
            AgentError::Validation(_) => "validation",
            AgentError::Routing(_) | AgentError::ActionNotFound(_) => "routing",
            AgentError::Provider(_) | AgentError::ProviderTimeout(_) => "provider",
            AgentError::Parse(_) => "parse",
            AgentError::ToolNotFound(_)
            | AgentError::ToolExecutionFailed(_)
            | AgentError::ToolTimeout(_)
            | AgentError::ToolLoopExceeded(_) => "tool",
            AgentError::Memory(_) => "memory",
            AgentError::Config(_) => "config",
        }
    }

    /// 是否在产出响应之前中止请求
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::Validation(_) | AgentError::Routing(_) | AgentError::ActionNotFound(_)
        )
    }
}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout(secs) => AgentError::ProviderTimeout(secs),
            other => AgentError::Provider(other.to_string()),
        }
    }
}

impl From<MemoryError> for AgentError {
    fn from(e: MemoryError) -> Self {
        AgentError::Memory(e.to_string())
    }
}
