//! 分析单条运动记录，必要时给出计划调整建议

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::actions::prompt::build_analyze_record_prompt;
use crate::actions::{channel_stream, forward_chunks, ActionHandler, ActionKind, ActionOutcome, ChunkStream};
use crate::core::{AgentContext, AgentError};
use crate::llm::TimedLlm;
use crate::parser::parse_analysis;
use crate::tools::{CURRENT_PLAN, RECENT_RECORDS};

pub struct AnalyzeRecordAction {
    llm: TimedLlm,
}

impl AnalyzeRecordAction {
    pub fn new(llm: TimedLlm) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ActionHandler for AnalyzeRecordAction {
    fn kind(&self) -> ActionKind {
        ActionKind::AnalyzeRecord
    }

    fn required_tools(&self, ctx: &AgentContext) -> Vec<String> {
        let mut tools = vec![RECENT_RECORDS.to_string()];
        if ctx.plan_id().is_some() {
            tools.push(CURRENT_PLAN.to_string());
        }
        tools
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<ActionOutcome, AgentError> {
        tracing::info!(
            record_id = ctx.request.record_id.as_deref(),
            record_type = ctx.record_data().get("type").and_then(|v| v.as_str()),
            tools = ctx.tool_results.len(),
            "analyzing record"
        );
        let messages =
            build_analyze_record_prompt(ctx.record_data(), &ctx.memory_text(), &ctx.tool_results).into_messages();
        let content = self.llm.complete("analyze_record", &messages).await?;
        let parsed = parse_analysis(&content);
        tracing::info!(suggest_update = parsed.suggest_update, "record analyzed");

        Ok(ActionOutcome {
            message: parsed.analysis.clone(),
            analysis: Some(parsed.analysis),
            suggest_update: parsed.suggest_update,
            update_suggestion: parsed.update_suggestion,
            ..ActionOutcome::default()
        })
    }

    /// 流式分析不做标记解析，原样转发
    fn execute_stream(self: Arc<Self>, ctx: AgentContext) -> ChunkStream {
        let (tx, rx) = mpsc::channel::<String>(64);
        tokio::spawn(async move {
            let messages =
                build_analyze_record_prompt(ctx.record_data(), &ctx.memory_text(), &ctx.tool_results).into_messages();
            match self.llm.stream("analyze_record_stream", &messages).await {
                Ok(chunks) => forward_chunks(chunks, &tx, "").await,
                Err(e) => {
                    let _ = tx.send(format!("错误: {}", e)).await;
                }
            }
        });
        channel_stream(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Request;
    use crate::llm::MockLlmClient;
    use futures_util::StreamExt;
    use serde_json::json;

    fn ctx(plan_id: Option<&str>) -> AgentContext {
        let mut req = Request::new(ActionKind::AnalyzeRecord)
            .with_record("r1", json!({"type": "跑步", "duration": 45, "rpe": 9}));
        if let Some(id) = plan_id {
            req = req.with_plan_id(id);
        }
        AgentContext::new(req)
    }

    fn analyzer(reply: &str) -> AnalyzeRecordAction {
        AnalyzeRecordAction::new(TimedLlm::new(Arc::new(MockLlmClient::with_replies(vec![reply.into()])), 0.7, 5))
    }

    #[test]
    fn test_required_tools() {
        let a = analyzer("");
        assert_eq!(a.required_tools(&ctx(None)), vec![RECENT_RECORDS.to_string()]);
        assert_eq!(
            a.required_tools(&ctx(Some("p1"))),
            vec![RECENT_RECORDS.to_string(), CURRENT_PLAN.to_string()]
        );
    }

    #[tokio::test]
    async fn test_suggestion_marker_extracted() {
        let reply = "本次训练强度偏高，注意恢复。\n---SUGGEST_UPDATE---\n下周安排一次减载。\n---END_SUGGEST_UPDATE---";
        let out = analyzer(reply).execute(&ctx(Some("p1"))).await.unwrap();
        assert!(out.suggest_update);
        assert_eq!(out.update_suggestion.as_deref(), Some("下周安排一次减载。"));
        assert_eq!(out.analysis.as_deref(), Some("本次训练强度偏高，注意恢复。"));
        assert_eq!(out.message, "本次训练强度偏高，注意恢复。");
    }

    #[tokio::test]
    async fn test_plain_analysis() {
        let out = analyzer("完成得很好。").execute(&ctx(None)).await.unwrap();
        assert!(!out.suggest_update);
        assert!(out.update_suggestion.is_none());
    }

    #[tokio::test]
    async fn test_stream_passthrough() {
        let text = "心率控制得不错，RPE 偏高，建议下次降低配速。";
        let out: Vec<String> = Arc::new(analyzer(text)).execute_stream(ctx(None)).collect().await;
        assert_eq!(out.concat(), text);
    }
}
