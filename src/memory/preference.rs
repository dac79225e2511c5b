//! 用户偏好记忆：按 plan_id 持久化的键值对（值为 JSON）
//!
//! 表 user_preferences 以 (plan_id, preference_key) 唯一；写入为 upsert。
//! 除通用读写外，提供洞察列表、训练风格、动作偏好几个便捷操作，以及拼入 prompt 的格式化输出。

use rusqlite::types::Type;
use rusqlite::{OptionalExtension, TransactionBehavior};
use serde_json::{json, Map, Value};

use crate::memory::MemoryError;
use crate::store::Database;

/// 常用偏好键
pub mod keys {
    pub const TRAINING_STYLE: &str = "training_style";
    pub const PREFERRED_EXERCISES: &str = "preferred_exercises";
    pub const AVOIDED_EXERCISES: &str = "avoided_exercises";
    pub const BEST_TRAINING_DAYS: &str = "best_training_days";
    pub const RECOVERY_SPEED: &str = "recovery_speed";
    pub const FEEDBACK_PREFERENCES: &str = "feedback_preferences";
    pub const ACCUMULATED_INSIGHTS: &str = "accumulated_insights";
}

pub struct PreferenceStore {
    db: Database,
    max_insights: usize,
}

impl PreferenceStore {
    pub fn new(db: Database, max_insights: usize) -> Self {
        Self { db, max_insights }
    }

    /// 读取单个偏好值
    pub async fn get(&self, plan_id: &str, key: &str) -> Result<Option<Value>, MemoryError> {
        let plan_id = plan_id.to_string();
        let key = key.to_string();
        let raw: Option<String> = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT preference_value FROM user_preferences WHERE plan_id = ?1 AND preference_key = ?2",
                )?;
                let mut rows = stmt.query_map(rusqlite::params![plan_id, key], |r| r.get::<_, String>(0))?;
                rows.next().transpose()
            })
            .await?;
        raw.map(|s| serde_json::from_str(&s)).transpose().map_err(MemoryError::from)
    }

    /// 读取计划下全部偏好
    pub async fn get_all(&self, plan_id: &str) -> Result<Map<String, Value>, MemoryError> {
        let plan_id = plan_id.to_string();
        let rows: Vec<(String, String)> = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT preference_key, preference_value FROM user_preferences WHERE plan_id = ?1",
                )?;
                let rows = stmt
                    .query_map([plan_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut map = Map::new();
        for (key, raw) in rows {
            map.insert(key, serde_json::from_str(&raw)?);
        }
        Ok(map)
    }

    pub async fn set(&self, plan_id: &str, key: &str, value: &Value) -> Result<(), MemoryError> {
        let mut map = Map::new();
        map.insert(key.to_string(), value.clone());
        self.upsert(plan_id, &map).await
    }

    /// 批量 upsert，单个事务内完成
    pub async fn upsert(&self, plan_id: &str, preferences: &Map<String, Value>) -> Result<(), MemoryError> {
        if preferences.is_empty() {
            return Ok(());
        }
        let plan_id = plan_id.to_string();
        let entries = preferences
            .iter()
            .map(|(k, v)| Ok((k.clone(), serde_json::to_string(v)?)))
            .collect::<Result<Vec<_>, serde_json::Error>>()?;
        let count = entries.len();
        let now = chrono::Utc::now().to_rfc3339();

        let pid = plan_id.clone();
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (key, value) in &entries {
                    tx.execute(
                        "INSERT INTO user_preferences (plan_id, preference_key, preference_value, updated_at)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(plan_id, preference_key)
                         DO UPDATE SET preference_value = excluded.preference_value, updated_at = excluded.updated_at",
                        rusqlite::params![pid, key, value, now],
                    )?;
                }
                tx.commit()
            })
            .await?;
        tracing::debug!(plan_id = %plan_id, count, "upserted preferences");
        Ok(())
    }

    /// 删除单个键或（key 为 None 时）计划下全部偏好，返回删除行数
    pub async fn delete(&self, plan_id: &str, key: Option<&str>) -> Result<usize, MemoryError> {
        let plan_id = plan_id.to_string();
        let key = key.map(String::from);
        let removed = self
            .db
            .call(move |conn| match key {
                Some(k) => conn.execute(
                    "DELETE FROM user_preferences WHERE plan_id = ?1 AND preference_key = ?2",
                    rusqlite::params![plan_id, k],
                ),
                None => conn.execute("DELETE FROM user_preferences WHERE plan_id = ?1", [plan_id]),
            })
            .await?;
        Ok(removed)
    }

    /// 表内总行数
    pub async fn row_count(&self) -> Result<usize, MemoryError> {
        let n: i64 = self
            .db
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM user_preferences", [], |r| r.get(0)))
            .await?;
        Ok(n.max(0) as usize)
    }

    /// 追加一条洞察；超过上限时丢弃最旧的
    pub async fn add_insight(&self, plan_id: &str, text: &str, category: &str) -> Result<(), MemoryError> {
        let insight = json!({
            "text": text,
            "category": category,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        let max = self.max_insights;
        self.update_list(plan_id, keys::ACCUMULATED_INSIGHTS, move |insights| {
            insights.push(insight);
            if insights.len() > max {
                let excess = insights.len() - max;
                insights.drain(..excess);
            }
        })
        .await
    }

    /// 列表型偏好的读-改-写，在同一个写事务内完成
    async fn update_list<F>(&self, plan_id: &str, key: &str, edit: F) -> Result<(), MemoryError>
    where
        F: FnOnce(&mut Vec<Value>) + Send + 'static,
    {
        let pid = plan_id.to_string();
        let k = key.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let len = self
            .db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let raw: Option<String> = tx
                    .query_row(
                        "SELECT preference_value FROM user_preferences WHERE plan_id = ?1 AND preference_key = ?2",
                        rusqlite::params![pid, k],
                        |r| r.get(0),
                    )
                    .optional()?;
                let mut list = match raw.map(|s| serde_json::from_str::<Value>(&s)).transpose() {
                    Ok(Some(Value::Array(items))) => items,
                    Ok(_) => Vec::new(),
                    Err(e) => return Err(rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))),
                };
                edit(&mut list);
                let len = list.len();
                let value = serde_json::to_string(&Value::Array(list))
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                tx.execute(
                    "INSERT INTO user_preferences (plan_id, preference_key, preference_value, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(plan_id, preference_key)
                     DO UPDATE SET preference_value = excluded.preference_value, updated_at = excluded.updated_at",
                    rusqlite::params![pid, k, value, now],
                )?;
                tx.commit()?;
                Ok(len)
            })
            .await?;
        tracing::debug!(plan_id, key, len, "updated preference list");
        Ok(())
    }

    /// 洞察列表，可按类别过滤
    pub async fn get_insights(&self, plan_id: &str, category: Option<&str>) -> Result<Vec<Value>, MemoryError> {
        let insights = self.insight_list(plan_id).await?;
        Ok(match category {
            Some(c) => insights
                .into_iter()
                .filter(|i| i.get("category").and_then(Value::as_str) == Some(c))
                .collect(),
            None => insights,
        })
    }

    async fn insight_list(&self, plan_id: &str) -> Result<Vec<Value>, MemoryError> {
        Ok(match self.get(plan_id, keys::ACCUMULATED_INSIGHTS).await? {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        })
    }

    pub async fn update_training_style(
        &self,
        plan_id: &str,
        style: &str,
        confidence: f64,
    ) -> Result<(), MemoryError> {
        self.set(
            plan_id,
            keys::TRAINING_STYLE,
            &json!({"style": style, "confidence": confidence}),
        )
        .await
    }

    /// 记录喜欢/避免的动作；同名动作只保留一条，reason 非空时覆盖
    pub async fn add_exercise_preference(
        &self,
        plan_id: &str,
        exercise: &str,
        preferred: bool,
        reason: Option<&str>,
    ) -> Result<(), MemoryError> {
        let key = if preferred {
            keys::PREFERRED_EXERCISES
        } else {
            keys::AVOIDED_EXERCISES
        };
        let exercise = exercise.to_string();
        let reason = reason.map(String::from);
        self.update_list(plan_id, key, move |list| {
            match list
                .iter_mut()
                .find(|e| e.get("name").and_then(Value::as_str) == Some(exercise.as_str()))
            {
                Some(existing) => {
                    if let (Some(r), Some(obj)) = (reason, existing.as_object_mut()) {
                        obj.insert("reason".into(), json!(r));
                    }
                }
                None => list.push(json!({"name": exercise, "reason": reason.unwrap_or_default()})),
            }
        })
        .await
    }

    /// 格式化为 prompt 段落；没有可展示的偏好时为空串
    pub async fn format_for_context(&self, plan_id: &str) -> Result<String, MemoryError> {
        Ok(format_preferences(&self.get_all(plan_id).await?))
    }
}

fn exercise_names(list: Option<&Value>) -> Vec<&str> {
    list.and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .take(5)
                .filter_map(|e| e.get("name").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

/// 把偏好 map 渲染为 "### 用户偏好记忆" 段落
pub fn format_preferences(prefs: &Map<String, Value>) -> String {
    if prefs.is_empty() {
        return String::new();
    }
    let mut lines = vec!["### 用户偏好记忆".to_string()];

    if let Some(style) = prefs
        .get(keys::TRAINING_STYLE)
        .and_then(|s| s.get("style"))
        .and_then(Value::as_str)
    {
        lines.push(format!("- 训练风格: {}", style));
    }

    let preferred = exercise_names(prefs.get(keys::PREFERRED_EXERCISES));
    if !preferred.is_empty() {
        lines.push(format!("- 偏好动作: {}", preferred.join(", ")));
    }
    let avoided = exercise_names(prefs.get(keys::AVOIDED_EXERCISES));
    if !avoided.is_empty() {
        lines.push(format!("- 避免动作: {}", avoided.join(", ")));
    }

    match prefs.get(keys::RECOVERY_SPEED) {
        Some(Value::String(s)) => lines.push(format!("- 恢复速度: {}", s)),
        Some(Value::Null) | None => {}
        Some(other) => lines.push(format!("- 恢复速度: {}", other)),
    }

    if let Some(insights) = prefs.get(keys::ACCUMULATED_INSIGHTS).and_then(Value::as_array) {
        if !insights.is_empty() {
            lines.push("- 近期观察:".to_string());
            let start = insights.len().saturating_sub(3);
            for insight in &insights[start..] {
                if let Some(text) = insight.get("text").and_then(Value::as_str) {
                    lines.push(format!("  • {}", text));
                }
            }
        }
    }

    if lines.len() == 1 {
        return String::new();
    }
    lines.join("\n")
}
