//! 通过对话修改训练计划
//!
//! 回复中的 `---PLAN_UPDATE---` 块解析为修改周并与当前计划合并，块本身从回复文本中去掉。
//! 不需要工具：计划数据随请求传入。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::actions::prompt::build_modify_plan_prompt;
use crate::actions::{channel_stream, forward_chunks, ActionHandler, ActionKind, ActionOutcome, ChunkStream};
use crate::core::{AgentContext, AgentError, Request};
use crate::llm::TimedLlm;
use crate::memory::Message;
use crate::parser::parse_plan_update;

/// 确认分析建议时拼出的修改请求
pub fn confirmation_message(suggestion: &str) -> String {
    format!("根据之前的训练分析建议，请帮我调整训练计划：\n\n{}", suggestion)
}

/// 把 update_suggestion 转成一次普通的修改请求；缺少建议时为校验错误
pub fn confirmation_request(request: Request) -> Result<Request, AgentError> {
    let suggestion = request
        .update_suggestion
        .clone()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AgentError::Validation("update_suggestion is required to confirm an update".into()))?;
    Ok(Request {
        action: Some(ActionKind::ModifyPlan.as_str().to_string()),
        user_message: Some(confirmation_message(&suggestion)),
        ..request
    })
}

pub struct ModifyPlanAction {
    llm: TimedLlm,
}

impl ModifyPlanAction {
    pub fn new(llm: TimedLlm) -> Self {
        Self { llm }
    }

    fn messages(ctx: &AgentContext) -> Vec<Message> {
        build_modify_plan_prompt(&ctx.plan_weeks(), ctx.user_message(), &ctx.memory_text())
            .into_messages_with_history(&ctx.request.conversation_history)
    }
}

#[async_trait]
impl ActionHandler for ModifyPlanAction {
    fn kind(&self) -> ActionKind {
        ActionKind::ModifyPlan
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<ActionOutcome, AgentError> {
        let current_weeks = ctx.plan_weeks();
        tracing::info!(
            plan_id = ctx.plan_id(),
            weeks = current_weeks.len(),
            history = ctx.request.conversation_history.len(),
            "modifying plan"
        );

        let content = self.llm.complete("modify_plan", &Self::messages(ctx)).await?;
        let parsed = parse_plan_update(&content, &current_weeks);
        tracing::info!(
            has_update = parsed.has_update(),
            parse_failed = parsed.error.is_some(),
            "plan modification parsed"
        );

        Ok(ActionOutcome {
            message: parsed.message,
            updated_weeks: parsed.updated_weeks,
            parse_error: parsed.error.map(AgentError::from),
            ..ActionOutcome::default()
        })
    }

    fn execute_stream(self: Arc<Self>, ctx: AgentContext) -> ChunkStream {
        let (tx, rx) = mpsc::channel::<String>(64);
        tokio::spawn(async move {
            match self.llm.stream("modify_plan_stream", &Self::messages(&ctx)).await {
                Ok(chunks) => forward_chunks(chunks, &tx, "\n\n").await,
                Err(e) => {
                    let _ = tx.send(format!("\n\n错误: {}", e)).await;
                }
            }
        });
        channel_stream(rx)
    }
}
