//! get_recent_records：最近若干天的训练记录，分析时提供近期训练背景

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use crate::core::AgentContext;
use crate::store::{RecordQuery, RecordRepository};
use crate::tools::training_history::base_summary;
use crate::tools::Tool;

pub const RECENT_RECORDS: &str = "get_recent_records";

const ANALYSIS_PREVIEW_CHARS: usize = 100;

pub struct RecentRecordsTool {
    records: Arc<dyn RecordRepository>,
    days: i64,
    limit: usize,
}

impl RecentRecordsTool {
    pub fn new(records: Arc<dyn RecordRepository>, days: i64, limit: usize) -> Self {
        Self {
            records,
            days,
            limit,
        }
    }
}

fn truncate_analysis(text: &str) -> String {
    if text.chars().count() > ANALYSIS_PREVIEW_CHARS {
        format!("{}...", text.chars().take(ANALYSIS_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

#[async_trait]
impl Tool for RecentRecordsTool {
    fn name(&self) -> &str {
        RECENT_RECORDS
    }

    fn description(&self) -> &str {
        "获取最近的运动记录，用于分析时提供上下文"
    }

    /// 有 plan_id 时只取该计划的记录
    async fn execute(&self, ctx: &AgentContext) -> Result<Value, String> {
        let query = RecordQuery {
            plan_id: ctx.plan_id().map(String::from),
            since: Some(Utc::now() - Duration::days(self.days)),
            limit: self.limit,
        };
        let records = self
            .records
            .list_records(&query)
            .await
            .map_err(|e| e.to_string())?;

        let summaries: Vec<Value> = records
            .iter()
            .map(|r| {
                let mut s = base_summary(r);
                if let Some(hr) = r.data.get("heartRate").filter(|v| !v.is_null()) {
                    s["heartRate"] = hr.clone();
                }
                if let Some(analysis) = r.analysis.as_deref().filter(|a| !a.is_empty()) {
                    s["analysisSummary"] = json!(truncate_analysis(analysis));
                }
                s
            })
            .collect();
        tracing::debug!(plan_id = ctx.plan_id(), days = self.days, count = summaries.len(), "fetched recent records");
        Ok(Value::Array(summaries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Request;
    use crate::store::{InMemoryRepository, WorkoutRecord};

    #[tokio::test]
    async fn test_recent_window_and_truncation() {
        let repo = Arc::new(InMemoryRepository::new());
        let long_analysis = "很".repeat(150);
        repo.insert_record(WorkoutRecord {
            id: "r1".into(),
            plan_id: Some("p1".into()),
            created_at: Utc::now() - Duration::days(2),
            data: json!({"type": "骑行", "duration": 60, "rpe": 7, "heartRate": {"avg": 150}}),
            analysis: Some(long_analysis),
        })
        .await;
        repo.insert_record(WorkoutRecord {
            id: "stale".into(),
            plan_id: Some("p1".into()),
            created_at: Utc::now() - Duration::days(30),
            data: json!({"type": "跑步"}),
            analysis: None,
        })
        .await;

        let tool = RecentRecordsTool::new(repo, 14, 10);
        let out = tool
            .execute(&AgentContext::new(Request::default().with_plan_id("p1")))
            .await
            .unwrap();
        let items = out.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["heartRate"]["avg"], 150);
        let summary = items[0]["analysisSummary"].as_str().unwrap();
        assert_eq!(summary.chars().count(), 103);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_short_analysis_kept() {
        assert_eq!(truncate_analysis("状态良好"), "状态良好");
    }
}
