//! 编排器集成测试：Mock 生成后端 + HashEmbedder + 内存仓库，无网络

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use coach::config::AppConfig;
use coach::core::{CoachAgent, CoachBuilder, DecisionKind, Request};
use coach::llm::{HashEmbedder, MockLlmClient};
use coach::memory::Message;
use coach::store::{InMemoryRepository, PlanRepository, RecordQuery, RecordRepository, StoreError, WorkoutRecord};
use coach::{ActionKind, AgentError};
use futures_util::StreamExt;
use serde_json::{json, Value};

fn day(label: &str, focus: &str) -> Value {
    json!({"day": label, "focus": focus, "exercises": [{"name": format!("{}训练", focus), "sets": 3}]})
}

fn four_week_plan() -> Value {
    let weeks: Vec<Value> = (1..=4)
        .map(|n| {
            json!({
                "weekNumber": n,
                "summary": format!("第{}周", n),
                "days": [day("Mon", "力量"), day("Wed", "有氧"), day("Fri", "核心")]
            })
        })
        .collect();
    json!({"goal": "减脂", "item": "跑步", "level": "初级", "weeks": weeks})
}

async fn seeded_repo() -> Arc<InMemoryRepository> {
    let repo = Arc::new(InMemoryRepository::new());
    repo.insert_plan("p1", four_week_plan()).await;
    for (id, days_ago) in [("r1", 1), ("r2", 3)] {
        repo.insert_record(WorkoutRecord {
            id: id.into(),
            plan_id: Some("p1".into()),
            created_at: Utc::now() - Duration::days(days_ago),
            data: json!({"type": "跑步", "duration": 40, "rpe": 7}),
            analysis: None,
        })
        .await;
    }
    repo
}

fn agent_with<R>(mock: Arc<MockLlmClient>, repo: Arc<R>) -> CoachAgent
where
    R: PlanRepository + RecordRepository + 'static,
{
    CoachBuilder::new(AppConfig::default())
        .with_llm(mock)
        .with_embedder(Arc::new(HashEmbedder::new(128)))
        .with_repository(repo)
        .build()
        .unwrap()
}

fn scripted(replies: &[&str]) -> Arc<MockLlmClient> {
    Arc::new(MockLlmClient::with_replies(replies.iter().map(|s| s.to_string()).collect()))
}

/// 所有读取都失败的仓库
struct BrokenRepo;

#[async_trait]
impl PlanRepository for BrokenRepo {
    async fn get_plan(&self, _plan_id: &str) -> Result<Option<Value>, StoreError> {
        Err(StoreError::LockPoisoned)
    }
}

#[async_trait]
impl RecordRepository for BrokenRepo {
    async fn list_records(&self, _query: &RecordQuery) -> Result<Vec<WorkoutRecord>, StoreError> {
        Err(StoreError::LockPoisoned)
    }
}

#[tokio::test]
async fn test_analyze_calls_both_tools_once() {
    let mock = scripted(&["配速稳定，RPE 偏高。\n---SUGGEST_UPDATE---\n下周减量 10%。\n---END_SUGGEST_UPDATE---"]);
    let agent = agent_with(mock.clone(), seeded_repo().await);

    let resp = agent
        .analyze_record(Some("p1"), "r9", json!({"type": "跑步", "duration": 50, "rpe": 9}), None)
        .await
        .unwrap();

    assert!(resp.success);
    assert_eq!(resp.tool_calls, 2);
    assert!(resp.suggest_update);
    assert_eq!(resp.update_suggestion.as_deref(), Some("下周减量 10%。"));
    assert_eq!(resp.analysis.as_deref(), Some("配速稳定，RPE 偏高。"));

    let trace = resp.trace.unwrap();
    let tool_calls: Vec<_> = trace.iter().filter(|r| r.kind == DecisionKind::ToolCall).collect();
    assert_eq!(tool_calls.len(), 2);
    assert_eq!(trace.last().unwrap().kind, DecisionKind::ResponseGenerated);

    // 工具结果进入 prompt
    let user_prompt = &mock.calls()[0][1].content;
    assert!(user_prompt.contains("### 近期训练记录（2 条）"));
    assert!(user_prompt.contains("### 当前训练计划概览"));
}

#[tokio::test]
async fn test_analyze_without_plan_uses_recent_records_only() {
    let mock = scripted(&["不错。"]);
    let agent = agent_with(mock, seeded_repo().await);
    let resp = agent
        .analyze_record(None, "r9", json!({"type": "骑行", "duration": 60}), None)
        .await
        .unwrap();
    assert_eq!(resp.tool_calls, 1);
    assert!(!resp.suggest_update);
}

#[tokio::test]
async fn test_tool_failures_degrade_without_retry() {
    let agent = agent_with(scripted(&["分析完成。"]), Arc::new(BrokenRepo));
    let resp = agent
        .analyze_record(Some("p1"), "r1", json!({"type": "跑步", "rpe": 6}), None)
        .await
        .unwrap();
    assert!(resp.success);
    assert_eq!(resp.tool_calls, 2);
    assert_eq!(resp.message, "分析完成。");
}

#[tokio::test]
async fn test_generate_tool_usage_depends_on_plan_id() {
    let macro_plan = json!({"macroWeeks": [{"weekNumber": 1}, {"weekNumber": 2}]}).to_string();
    let detail = json!({"weeks": [{"weekNumber": 1, "days": []}, {"weekNumber": 2, "days": []}]}).to_string();
    let mock = scripted(&[&macro_plan, &detail, &macro_plan, &detail]);
    let agent = agent_with(mock, seeded_repo().await);

    let fresh = agent
        .generate_plan(json!({"goal": "完成首个半马"}), Some("2026-11-02"), None)
        .await
        .unwrap();
    assert!(fresh.success);
    assert_eq!(fresh.tool_calls, 0);
    assert_eq!(fresh.message, "已为您生成2周的训练计划，前2周已细化。");
    assert_eq!(fresh.plan.as_ref().unwrap()["totalWeeks"], 2);

    let request = Request::new(ActionKind::GeneratePlan)
        .with_plan_id("p1")
        .with_session("s-gen")
        .with_profile(json!({"goal": "完成首个半马"}));
    let regenerated = agent.execute(request).await.unwrap();
    assert_eq!(regenerated.tool_calls, 1);

    let pending = agent.memory().working().get_context_value("s-gen", "plan_pending").await;
    assert_eq!(pending, Some(json!("p1")));
}

#[tokio::test]
async fn test_modify_end_to_end_wednesday_rest() {
    let reply = "已将第二周周三改为休息日。\n---PLAN_UPDATE---\n```json\n{\"modifiedWeeks\": [{\"weekNumber\": 2, \"days\": [{\"day\": \"Wed\", \"focus\": \"休息\", \"exercises\": []}]}]}\n```\n---END_PLAN_UPDATE---";
    let mock = scripted(&[reply]);
    let agent = agent_with(mock, seeded_repo().await);
    let plan = four_week_plan();

    let resp = agent
        .modify_plan("p1", plan.clone(), "第二周周三想休息", vec![Message::user("你好")], Some("s-mod"))
        .await
        .unwrap();

    assert!(resp.success);
    assert_eq!(resp.tool_calls, 0);
    assert_eq!(resp.message, "已将第二周周三改为休息日。");
    let weeks = resp.updated_weeks.unwrap();
    let original = plan["weeks"].as_array().unwrap();
    assert_eq!(weeks.len(), 4);
    for i in [0, 2, 3] {
        assert_eq!(weeks[i], original[i]);
    }
    assert_eq!(weeks[1]["days"][0], original[1]["days"][0]);
    assert_eq!(weeks[1]["days"][1]["focus"], "休息");
    assert_eq!(weeks[1]["days"][2], original[1]["days"][2]);
    assert_eq!(weeks[1]["summary"], "第2周");

    // 对话写入工作记忆
    let history = agent.memory().get_conversation_history("s-mod", None).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "第二周周三想休息");
}

#[tokio::test]
async fn test_modify_malformed_payload_returns_text_without_update() {
    let mock = scripted(&["调整好了。\n---PLAN_UPDATE---\n{\"modifiedWeeks\": [\n---END_PLAN_UPDATE---"]);
    let agent = agent_with(mock, seeded_repo().await);
    let resp = agent
        .modify_plan("p1", four_week_plan(), "改一下", Vec::new(), Some("s-bad"))
        .await
        .unwrap();
    assert!(!resp.success);
    assert_eq!(resp.message, "调整好了。");
    assert!(resp.updated_weeks.is_none());
    assert!(resp.error.unwrap().starts_with("Parse error"));
    // 失败时不写记忆
    assert!(agent.memory().get_conversation_history("s-bad", None).await.is_empty());
}

#[tokio::test]
async fn test_provider_failure_degrades_to_fallback() {
    let agent = agent_with(Arc::new(MockLlmClient::failing("upstream 503")), seeded_repo().await);
    let resp = agent
        .modify_plan("p1", four_week_plan(), "周五加一组核心", Vec::new(), None)
        .await
        .unwrap();
    assert!(!resp.success);
    assert_eq!(resp.message, "抱歉，处理您的请求时出现了错误。请稍后重试。");
    assert!(resp.error.unwrap().contains("upstream 503"));

    let analyze = agent
        .analyze_record(None, "r1", json!({"type": "跑步"}), None)
        .await
        .unwrap();
    assert_eq!(analyze.message, "抱歉，分析过程中出现了错误。请稍后重试。");
}

#[tokio::test]
async fn test_validation_and_routing_errors_are_returned() {
    let agent = agent_with(scripted(&[]), seeded_repo().await);

    let missing_message = Request::new(ActionKind::ModifyPlan).with_plan_data(four_week_plan());
    let err = agent.execute(missing_message).await.unwrap_err();
    assert!(matches!(err, AgentError::Validation(_)));

    let err = agent.execute(Request::default()).await.unwrap_err();
    assert!(matches!(err, AgentError::Routing(_)));
}

#[tokio::test]
async fn test_inferred_action_from_content() {
    let mock = scripted(&["好的。"]);
    let agent = agent_with(mock, seeded_repo().await);
    let mut request = Request::default()
        .with_plan_id("p1")
        .with_plan_data(four_week_plan())
        .with_message("强度可以吗");
    request.action = Some("chat".into());
    let resp = agent.execute(request).await.unwrap();
    let trace = resp.trace.unwrap();
    let routed = trace.iter().find(|r| r.kind == DecisionKind::ActionRouted).unwrap();
    assert_eq!(routed.decision, "modify_plan");
}

#[tokio::test]
async fn test_streaming_skips_tools_and_memory() {
    let text = "把周三换成了休息，其它保持不变。";
    let mock = scripted(&[text]);
    let agent = agent_with(mock.clone(), seeded_repo().await);

    let request = Request::new(ActionKind::ModifyPlan)
        .with_plan_id("p1")
        .with_session("s-stream")
        .with_plan_data(four_week_plan())
        .with_message("周三休息");
    let chunks: Vec<String> = agent.execute_streaming(request).await.collect().await;
    assert_eq!(chunks.concat(), text);
    assert_eq!(mock.call_count(), 1);
    assert!(agent.memory().get_conversation_history("s-stream", None).await.is_empty());

    let rejected: Vec<String> = agent.execute_streaming(Request::default()).await.collect().await;
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].starts_with("错误: "));
}

#[tokio::test]
async fn test_stored_plan_context_reaches_prompt() {
    let mock = scripted(&["状态不错。"]);
    let agent = agent_with(mock.clone(), seeded_repo().await);
    agent.store_initial_plan_context("p1", &four_week_plan()).await.unwrap();

    agent
        .analyze_record(Some("p1"), "r3", json!({"type": "跑步", "rpe": 6}), None)
        .await
        .unwrap();
    let system = &mock.calls()[0][0].content;
    assert!(system.contains("### 相关训练历史"));
    assert!(system.contains("[训练计划]"));
}

#[tokio::test]
async fn test_confirm_update_runs_modify() {
    let mock = scripted(&["已按建议减量。"]);
    let agent = agent_with(mock.clone(), seeded_repo().await);
    let request = Request::default()
        .with_plan_id("p1")
        .with_plan_data(four_week_plan())
        .with_update_suggestion("下周减量 10%。");
    let resp = agent.confirm_update(request).await.unwrap();
    assert!(resp.success);
    let calls = mock.calls();
    let user = &calls[0].last().unwrap().content;
    assert!(user.contains("根据之前的训练分析建议，请帮我调整训练计划：\n\n下周减量 10%。"));
}

#[tokio::test]
async fn test_confirm_update_requires_suggestion() {
    let mock = scripted(&[]);
    let agent = agent_with(mock.clone(), seeded_repo().await);
    let request = Request::default().with_plan_id("p1").with_plan_data(four_week_plan());
    let err = agent.confirm_update(request).await.unwrap_err();
    assert!(matches!(err, AgentError::Validation(_)));
    assert_eq!(mock.call_count(), 0);
}
