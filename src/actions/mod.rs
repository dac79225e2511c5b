//! 动作处理器：生成计划、修改计划、分析记录
//!
//! 每个处理器实现 ActionHandler：声明所需工具、非流式执行（返回 ActionOutcome）、流式执行（文本片段流）。
//! 处理器只读 AgentContext，结果由编排器写回上下文。

pub mod analyze;
pub mod generate;
pub mod modify;
pub mod prompt;

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::{AgentContext, AgentError};
use crate::llm::TextStream;

pub use analyze::AnalyzeRecordAction;
pub use generate::GeneratePlanAction;
pub use modify::ModifyPlanAction;

/// 动作类型（封闭枚举，路由处穷尽匹配）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    #[serde(alias = "generate")]
    GeneratePlan,
    #[serde(alias = "modify")]
    ModifyPlan,
    #[serde(alias = "analyze")]
    AnalyzeRecord,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [
        ActionKind::GeneratePlan,
        ActionKind::ModifyPlan,
        ActionKind::AnalyzeRecord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::GeneratePlan => "generate_plan",
            ActionKind::ModifyPlan => "modify_plan",
            ActionKind::AnalyzeRecord => "analyze_record",
        }
    }

    /// 接受完整名与短名（generate / modify / analyze）
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generate_plan" | "generate" => Some(ActionKind::GeneratePlan),
            "modify_plan" | "modify" => Some(ActionKind::ModifyPlan),
            "analyze_record" | "analyze" => Some(ActionKind::AnalyzeRecord),
            _ => None,
        }
    }

    /// 是否进入工具循环
    pub fn uses_tools(&self) -> bool {
        matches!(self, ActionKind::GeneratePlan | ActionKind::AnalyzeRecord)
    }

    /// 执行失败时返回给用户的兜底回复
    pub fn fallback_message(&self) -> &'static str {
        match self {
            ActionKind::GeneratePlan => "抱歉，计划生成失败。请稍后重试。",
            ActionKind::ModifyPlan => "抱歉，处理您的请求时出现了错误。请稍后重试。",
            ActionKind::AnalyzeRecord => "抱歉，分析过程中出现了错误。请稍后重试。",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| AgentError::Routing(format!("Unknown action type: {}", s)))
    }
}

/// 处理器执行结果，由编排器写回 AgentContext
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    pub message: String,
    /// 完整计划（生成时）
    pub plan: Option<Value>,
    /// 合并后的周列表（生成/修改时）
    pub updated_weeks: Option<Vec<Value>>,
    pub analysis: Option<String>,
    pub suggest_update: bool,
    pub update_suggestion: Option<String>,
    /// 结构化载荷解析失败：message 照常返回，不应用任何更新
    pub parse_error: Option<AgentError>,
}

impl ActionOutcome {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// 流式输出：文本片段，错误以 `错误: ...` 文本内联
pub type ChunkStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// 把 mpsc 接收端包装成 ChunkStream
pub(crate) fn channel_stream(rx: mpsc::Receiver<String>) -> ChunkStream {
    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }))
}

/// 把后端文本流逐片转发到 channel；出错时发送 `{prefix}错误: ...` 后结束。
/// 接收端已关闭时提前返回
pub(crate) async fn forward_chunks(mut chunks: TextStream, tx: &mpsc::Sender<String>, error_prefix: &str) {
    while let Some(item) = chunks.next().await {
        let (chunk, done) = match item {
            Ok(text) => (text, false),
            Err(e) => {
                tracing::warn!(category = "provider", error = %e, "stream interrupted");
                (format!("{}错误: {}", error_prefix, e), true)
            }
        };
        if tx.send(chunk).await.is_err() || done {
            return;
        }
    }
}

/// 动作处理器
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn kind(&self) -> ActionKind;

    /// 执行前需要的工具名；纯函数，可依赖上下文
    fn required_tools(&self, _ctx: &AgentContext) -> Vec<String> {
        Vec::new()
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<ActionOutcome, AgentError>;

    /// 流式执行：不经过工具循环与记忆更新
    fn execute_stream(self: Arc<Self>, ctx: AgentContext) -> ChunkStream;
}
