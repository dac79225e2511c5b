//! 计划与训练记录仓库接口
//!
//! 编排核心只需要按 id 读取计划、按条件列出记录；具体实现有内存版（测试/fixture）与 SQLite 版。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::store::StoreError;

/// 一条训练记录（data 为前端提交的原始 JSON：type、duration、rpe、heartRate、notes…）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutRecord {
    pub id: String,
    pub plan_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub data: Value,
    #[serde(default)]
    pub analysis: Option<String>,
}

/// 记录查询条件：按计划过滤、按时间下限过滤，按创建时间倒序取前 limit 条
#[derive(Debug, Clone)]
pub struct RecordQuery {
    pub plan_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl RecordQuery {
    pub fn for_plan(plan_id: impl Into<String>, limit: usize) -> Self {
        Self {
            plan_id: Some(plan_id.into()),
            since: None,
            limit,
        }
    }

    fn matches(&self, record: &WorkoutRecord) -> bool {
        if let Some(pid) = &self.plan_id {
            if record.plan_id.as_deref() != Some(pid.as_str()) {
                return false;
            }
        }
        match self.since {
            Some(since) => record.created_at >= since,
            None => true,
        }
    }
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// 返回计划文档（含 weeks、userProfile 等），不存在时 None
    async fn get_plan(&self, plan_id: &str) -> Result<Option<Value>, StoreError>;
}

#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn list_records(&self, query: &RecordQuery) -> Result<Vec<WorkoutRecord>, StoreError>;
}

/// fixture 文件格式：{"plans": {"<id>": {...}}, "records": [...]}
#[derive(Debug, Default, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub plans: HashMap<String, Value>,
    #[serde(default)]
    pub records: Vec<WorkoutRecord>,
}

/// 内存仓库
#[derive(Default)]
pub struct InMemoryRepository {
    plans: RwLock<HashMap<String, Value>>,
    records: RwLock<Vec<WorkoutRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixtures(fixtures: Fixtures) -> Self {
        Self {
            plans: RwLock::new(fixtures.plans),
            records: RwLock::new(fixtures.records),
        }
    }

    pub async fn insert_plan(&self, plan_id: impl Into<String>, plan: Value) {
        self.plans.write().await.insert(plan_id.into(), plan);
    }

    pub async fn insert_record(&self, record: WorkoutRecord) {
        self.records.write().await.push(record);
    }
}

#[async_trait]
impl PlanRepository for InMemoryRepository {
    async fn get_plan(&self, plan_id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.plans.read().await.get(plan_id).cloned())
    }
}

#[async_trait]
impl RecordRepository for InMemoryRepository {
    async fn list_records(&self, query: &RecordQuery) -> Result<Vec<WorkoutRecord>, StoreError> {
        let records = self.records.read().await;
        let mut matched: Vec<WorkoutRecord> =
            records.iter().filter(|r| query.matches(r)).cloned().collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(query.limit);
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, plan: Option<&str>, days_ago: i64) -> WorkoutRecord {
        WorkoutRecord {
            id: id.to_string(),
            plan_id: plan.map(String::from),
            created_at: Utc::now() - Duration::days(days_ago),
            data: serde_json::json!({"type": "跑步", "duration": 30}),
            analysis: None,
        }
    }

    #[tokio::test]
    async fn test_list_records_filters_and_orders() {
        let repo = InMemoryRepository::new();
        repo.insert_record(record("old", Some("p1"), 30)).await;
        repo.insert_record(record("mid", Some("p1"), 3)).await;
        repo.insert_record(record("new", Some("p1"), 1)).await;
        repo.insert_record(record("other", Some("p2"), 1)).await;

        let all = repo.list_records(&RecordQuery::for_plan("p1", 10)).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        let recent = repo
            .list_records(&RecordQuery {
                plan_id: Some("p1".into()),
                since: Some(Utc::now() - Duration::days(14)),
                limit: 1,
            })
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "new");
    }
}
