//! 生成训练计划：两阶段
//!
//! 1. 宏观大纲（macroWeeks，覆盖整个周期）
//! 2. 细化第一个周期（前 cycle_weeks 周，得到 weeks）
//!
//! 后续周期由 generate_next_cycle 按需细化。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use crate::actions::prompt::{build_cycle_detail_prompt, build_macro_plan_prompt};
use crate::actions::{channel_stream, ActionHandler, ActionKind, ActionOutcome, ChunkStream};
use crate::core::{AgentContext, AgentError};
use crate::llm::TimedLlm;
use crate::parser::{parse_cycle_detail, parse_macro_plan};
use crate::tools::TRAINING_HISTORY;

pub struct GeneratePlanAction {
    llm: TimedLlm,
    cycle_weeks: usize,
}

impl GeneratePlanAction {
    pub fn new(llm: TimedLlm, cycle_weeks: usize) -> Self {
        Self {
            llm,
            cycle_weeks: cycle_weeks.max(1),
        }
    }

    async fn macro_plan(
        &self,
        profile: &Map<String, Value>,
        context: &str,
        tool_results: &Map<String, Value>,
    ) -> Result<Value, AgentError> {
        let messages = build_macro_plan_prompt(profile, context, tool_results).into_messages();
        let content = self.llm.complete("generate_macro_plan", &messages).await?;
        Ok(parse_macro_plan(&content)?)
    }

    async fn cycle_detail(
        &self,
        profile: &Map<String, Value>,
        macro_weeks: &[Value],
        context: &str,
    ) -> Result<Vec<Value>, AgentError> {
        let messages = build_cycle_detail_prompt(profile, macro_weeks, context).into_messages();
        let content = self.llm.complete("generate_cycle_detail", &messages).await?;
        let detail = parse_cycle_detail(&content)?;
        Ok(detail
            .get("weeks")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// 细化下一个周期；所有周都已细化时返回空列表
    pub async fn generate_next_cycle(
        &self,
        profile: &Map<String, Value>,
        macro_plan: &Value,
        current_weeks: usize,
        context: &str,
    ) -> Result<Vec<Value>, AgentError> {
        let macro_weeks = macro_weeks(macro_plan);
        if current_weeks >= macro_weeks.len() {
            tracing::debug!(current_weeks, total = macro_weeks.len(), "all weeks already detailed");
            return Ok(Vec::new());
        }
        let end = (current_weeks + self.cycle_weeks).min(macro_weeks.len());
        self.cycle_detail(profile, &macro_weeks[current_weeks..end], context).await
    }
}

fn macro_weeks(macro_plan: &Value) -> &[Value] {
    macro_plan
        .get("macroWeeks")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[async_trait]
impl ActionHandler for GeneratePlanAction {
    fn kind(&self) -> ActionKind {
        ActionKind::GeneratePlan
    }

    /// 已有计划时参考历史训练记录
    fn required_tools(&self, ctx: &AgentContext) -> Vec<String> {
        if ctx.plan_id().is_some() {
            vec![TRAINING_HISTORY.to_string()]
        } else {
            Vec::new()
        }
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<ActionOutcome, AgentError> {
        let profile = ctx.request.profile();
        let context = ctx.memory_text();
        tracing::info!(
            session_id = ctx.session_id(),
            has_context = !context.is_empty(),
            "generating plan"
        );

        let macro_plan = self.macro_plan(&profile, &context, &ctx.tool_results).await?;
        let all_weeks = macro_weeks(&macro_plan);
        let total = all_weeks.len();
        let first_cycle = &all_weeks[..total.min(self.cycle_weeks)];
        let weeks = self.cycle_detail(&profile, first_cycle, &context).await?;

        tracing::info!(total_weeks = total, detailed_weeks = weeks.len(), "plan generated");
        Ok(ActionOutcome {
            message: format!("已为您生成{}周的训练计划，前{}周已细化。", total, weeks.len()),
            plan: Some(json!({
                "macroPlan": macro_plan,
                "totalWeeks": total,
                "weeks": weeks,
            })),
            updated_weeks: Some(weeks),
            ..ActionOutcome::default()
        })
    }

    /// 进度文本流：不转发后端原始输出；接收端关闭后不再调用后端
    fn execute_stream(self: Arc<Self>, ctx: AgentContext) -> ChunkStream {
        let (tx, rx) = mpsc::channel::<String>(16);
        tokio::spawn(async move {
            let profile = ctx.request.profile();
            let context = ctx.memory_text();
            for line in ["正在分析您的训练需求...\n", "正在生成宏观训练大纲...\n"] {
                if tx.send(line.to_string()).await.is_err() {
                    return;
                }
            }

            let macro_plan = match self.macro_plan(&profile, &context, &ctx.tool_results).await {
                Ok(p) => p,
                Err(e) => {
                    let _ = tx.send(format!("错误: {}", e)).await;
                    return;
                }
            };
            let all_weeks = macro_weeks(&macro_plan);
            let total = all_weeks.len();
            let progress = format!("已生成{}周宏观大纲，正在细化前{}周训练内容...\n", total, self.cycle_weeks);
            if tx.send(progress).await.is_err() {
                tracing::debug!("stream receiver dropped, skipping cycle detail");
                return;
            }

            let line = match self
                .cycle_detail(&profile, &all_weeks[..total.min(self.cycle_weeks)], &context)
                .await
            {
                Ok(weeks) => format!("\n✅ 计划生成完成！共{}周，前{}周已细化。\n", total, weeks.len()),
                Err(e) => format!("错误: {}", e),
            };
            let _ = tx.send(line).await;
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

    fn macro_plan(n: usize) -> Value {
        let weeks: Vec<Value> = (1..=n).map(|i| json!({"weekNumber": i, "focus": "基础"})).collect();
        json!({"totalWeeks": n, "macroWeeks": weeks})
    }

    fn macro_reply(n: usize) -> String {
        format!("```json\n{}\n```", macro_plan(n))
    }

    fn detail_reply(range: std::ops::RangeInclusive<usize>) -> String {
        let weeks: Vec<Value> = range.map(|i| json!({"weekNumber": i, "days": []})).collect();
        json!({ "weeks": weeks }).to_string()
    }

    fn action(replies: Vec<String>) -> (Arc<MockLlmClient>, GeneratePlanAction) {
        let mock = Arc::new(MockLlmClient::with_replies(replies));
        let llm = TimedLlm::new(mock.clone(), 0.7, 5);
        (mock, GeneratePlanAction::new(llm, 4))
    }

    fn ctx() -> AgentContext {
        AgentContext::new(Request::new(ActionKind::GeneratePlan).with_profile(json!({"goal": "10公里跑进50分钟"})))
    }

    #[tokio::test]
    async fn test_two_stage_generation() {
        let (mock, action) = action(vec![macro_reply(8), detail_reply(1..=4)]);
        let out = action.execute(&ctx()).await.unwrap();
        assert_eq!(out.message, "已为您生成8周的训练计划，前4周已细化。");
        assert_eq!(out.updated_weeks.as_ref().unwrap().len(), 4);
        let plan = out.plan.unwrap();
        assert_eq!(plan["totalWeeks"], 8);
        assert_eq!(plan["macroPlan"]["macroWeeks"].as_array().unwrap().len(), 8);

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        // 第二阶段只带前 4 周大纲
        assert!(calls[1][1].content.contains("\"weekNumber\": 4"));
        assert!(!calls[1][1].content.contains("\"weekNumber\": 5"));
    }

    #[tokio::test]
    async fn test_macro_without_field_is_parse_error() {
        let (_, action) = action(vec!["{\"weeks\": []}".into()]);
        let err = action.execute(&ctx()).await.unwrap_err();
        assert!(matches!(err, AgentError::Parse(_)));
    }

    #[tokio::test]
    async fn test_required_tools_depend_on_plan_id() {
        let (_, action) = action(vec![]);
        assert!(action.required_tools(&ctx()).is_empty());
        let with_plan = AgentContext::new(Request::new(ActionKind::GeneratePlan).with_plan_id("p1"));
        assert_eq!(action.required_tools(&with_plan), vec![TRAINING_HISTORY.to_string()]);
    }

    #[tokio::test]
    async fn test_next_cycle() {
        let (mock, action) = action(vec![detail_reply(5..=6)]);
        let macro_plan = macro_plan(6);
        let profile = Map::new();

        let next = action.generate_next_cycle(&profile, &macro_plan, 4, "").await.unwrap();
        assert_eq!(next.len(), 2);
        let done = action.generate_next_cycle(&profile, &macro_plan, 6, "").await.unwrap();
        assert!(done.is_empty());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_progress_lines() {
        let (_, action) = action(vec![macro_reply(6), detail_reply(1..=4)]);
        let chunks: Vec<String> = Arc::new(action).execute_stream(ctx()).collect().await;
        assert_eq!(chunks[0], "正在分析您的训练需求...\n");
        assert_eq!(chunks[2], "已生成6周宏观大纲，正在细化前4周训练内容...\n");
        assert_eq!(chunks.last().unwrap(), "\n✅ 计划生成完成！共6周，前4周已细化。\n");
    }

    #[tokio::test]
    async fn test_stream_error_inline() {
        let mock = Arc::new(MockLlmClient::failing("down"));
        let action = Arc::new(GeneratePlanAction::new(TimedLlm::new(mock, 0.7, 5), 4));
        let chunks: Vec<String> = action.execute_stream(ctx()).collect().await;
        assert_eq!(chunks.len(), 3);
        assert!(chunks[2].starts_with("错误: "));
    }

    #[tokio::test]
    async fn test_stream_dropped_before_backend_call() {
        let (mock, action) = action(vec![macro_reply(6), detail_reply(1..=4)]);
        let stream = Arc::new(action).execute_stream(ctx());
        drop(stream);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(mock.call_count(), 0);
    }
}
