//! SQLite 计划/记录仓库
//!
//! 删除计划时在同一事务中级联删除该计划的偏好与长期记忆向量。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::store::{Database, PlanRepository, RecordQuery, RecordRepository, StoreError, WorkoutRecord};

pub struct SqliteRepository {
    db: Database,
}

impl SqliteRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// 插入或覆盖计划文档
    pub async fn save_plan(&self, plan_id: &str, plan: &Value) -> Result<(), StoreError> {
        let id = plan_id.to_string();
        let data = serde_json::to_string(plan)?;
        let now = Utc::now();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO plans (id, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
                     ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                    params![id, data, now],
                )
            })
            .await?;
        Ok(())
    }

    /// 删除计划及其偏好、长期记忆；返回是否存在该计划
    pub async fn delete_plan(&self, plan_id: &str) -> Result<bool, StoreError> {
        let id = plan_id.to_string();
        let removed = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM user_preferences WHERE plan_id = ?1", params![id])?;
                tx.execute("DELETE FROM context_embeddings WHERE plan_id = ?1", params![id])?;
                let n = tx.execute("DELETE FROM plans WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok(n)
            })
            .await?;
        tracing::info!(plan_id, existed = removed > 0, "deleted plan");
        Ok(removed > 0)
    }

    pub async fn insert_record(&self, record: &WorkoutRecord) -> Result<(), StoreError> {
        let data = serde_json::to_string(&record.data)?;
        let r = record.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO workout_records (id, plan_id, created_at, data, analysis)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![r.id, r.plan_id, r.created_at, data, r.analysis],
                )
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PlanRepository for SqliteRepository {
    async fn get_plan(&self, plan_id: &str) -> Result<Option<Value>, StoreError> {
        let id = plan_id.to_string();
        let raw: Option<String> = self
            .db
            .call(move |conn| {
                conn.query_row("SELECT data FROM plans WHERE id = ?1", params![id], |r| r.get(0))
                    .optional()
            })
            .await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }
}

type RawRecord = (String, Option<String>, DateTime<Utc>, String, Option<String>);

#[async_trait]
impl RecordRepository for SqliteRepository {
    async fn list_records(&self, query: &RecordQuery) -> Result<Vec<WorkoutRecord>, StoreError> {
        let plan_id = query.plan_id.clone();
        let since = query.since;
        let limit = query.limit as i64;
        let rows: Vec<RawRecord> = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, plan_id, created_at, data, analysis FROM workout_records
                     WHERE (?1 IS NULL OR plan_id = ?1) AND (?2 IS NULL OR created_at >= ?2)
                     ORDER BY created_at DESC LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(params![plan_id, since, limit], |r| {
                        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, plan_id, created_at, data, analysis)| -> Result<WorkoutRecord, StoreError> {
                Ok(WorkoutRecord {
                    id,
                    plan_id,
                    created_at,
                    data: serde_json::from_str(&data)?,
                    analysis,
                })
            })
            .collect()
    }
}
