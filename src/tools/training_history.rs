//! get_training_history：计划下的历史训练记录摘要（新到旧），用于个性化生成

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::AgentContext;
use crate::store::{RecordQuery, RecordRepository, WorkoutRecord};
use crate::tools::Tool;

pub const TRAINING_HISTORY: &str = "get_training_history";

/// 记录摘要的公共字段：id、date、type、duration、rpe
pub(crate) fn base_summary(record: &WorkoutRecord) -> Value {
    let data = &record.data;
    json!({
        "id": record.id,
        "date": record.created_at.to_rfc3339(),
        "type": data.get("type").cloned().unwrap_or_else(|| json!("unknown")),
        "duration": data.get("duration").cloned().unwrap_or_else(|| json!(0)),
        "rpe": data.get("rpe").cloned().unwrap_or(Value::Null),
    })
}

pub struct TrainingHistoryTool {
    records: Arc<dyn RecordRepository>,
    limit: usize,
}

impl TrainingHistoryTool {
    pub fn new(records: Arc<dyn RecordRepository>, limit: usize) -> Self {
        Self { records, limit }
    }
}

#[async_trait]
impl Tool for TrainingHistoryTool {
    fn name(&self) -> &str {
        TRAINING_HISTORY
    }

    fn description(&self) -> &str {
        "获取用户历史训练数据，用于个性化计划生成"
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<Value, String> {
        let Some(plan_id) = ctx.plan_id() else {
            tracing::debug!("no plan_id for get_training_history");
            return Ok(json!([]));
        };
        let records = self
            .records
            .list_records(&RecordQuery::for_plan(plan_id, self.limit))
            .await
            .map_err(|e| e.to_string())?;

        let summaries: Vec<Value> = records
            .iter()
            .map(|r| {
                let mut s = base_summary(r);
                s["hasAnalysis"] = json!(r.analysis.as_deref().is_some_and(|a| !a.is_empty()));
                s
            })
            .collect();
        tracing::debug!(plan_id, count = summaries.len(), "fetched training history");
        Ok(Value::Array(summaries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AgentContext, Request};
    use crate::store::InMemoryRepository;
    use chrono::{Duration, Utc};

    fn record(id: &str, plan: &str, days_ago: i64, analysis: Option<&str>) -> WorkoutRecord {
        WorkoutRecord {
            id: id.into(),
            plan_id: Some(plan.into()),
            created_at: Utc::now() - Duration::days(days_ago),
            data: json!({"type": "跑步", "duration": 30, "rpe": 6}),
            analysis: analysis.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_history_newest_first_with_limit() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_record(record("old", "p1", 10, None)).await;
        repo.insert_record(record("new", "p1", 1, Some("不错"))).await;
        repo.insert_record(record("mid", "p1", 5, None)).await;
        repo.insert_record(record("other", "p2", 0, None)).await;

        let tool = TrainingHistoryTool::new(repo, 2);
        let ctx = AgentContext::new(Request::default().with_plan_id("p1"));
        let out = tool.execute(&ctx).await.unwrap();
        let items = out.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["id"], "new");
        assert_eq!(items[0]["hasAnalysis"], true);
        assert_eq!(items[1]["id"], "mid");
        assert_eq!(items[1]["type"], "跑步");
    }

    #[tokio::test]
    async fn test_history_empty_without_plan() {
        let tool = TrainingHistoryTool::new(Arc::new(InMemoryRepository::new()), 20);
        let ctx = AgentContext::new(Request::default());
        assert_eq!(tool.execute(&ctx).await.unwrap(), json!([]));
    }
}
