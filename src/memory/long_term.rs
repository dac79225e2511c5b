//! 长期记忆：语义检索的训练计划、分析与对话
//!
//! 写入时先向量化再存入 VectorStore；检索时向量化 query，按余弦相似度取最近的若干条。
//! 重新生成/修改计划时，先删除该计划旧的 plan 类记录，避免过期快照在检索中排到前面。

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::llm::EmbeddingProvider;
use crate::memory::vector::{ContentCategory, MemoryRecord, ScoredRecord, VectorFilter, VectorStore};
use crate::memory::MemoryError;

pub struct LongTermStore {
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl LongTermStore {
    pub fn new(vectors: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { vectors, embedder }
    }

    /// 向量化并存入一条记忆，返回记录 id
    pub async fn store(
        &self,
        text: &str,
        category: ContentCategory,
        plan_id: Option<&str>,
        metadata: Value,
    ) -> Result<String, MemoryError> {
        let embedding = self.embedder.embed_one(text).await?;
        let expected = self.embedder.dimensions();
        if embedding.len() != expected {
            return Err(MemoryError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.vectors
            .insert(MemoryRecord {
                id: id.clone(),
                text: text.to_string(),
                category,
                plan_id: plan_id.map(String::from),
                embedding,
                metadata,
                created_at: Utc::now(),
            })
            .await?;
        tracing::debug!(id = %id, category = category.as_str(), plan_id, "stored long-term memory");
        Ok(id)
    }

    /// 语义检索；categories 为空时检索全部类别
    pub async fn search(
        &self,
        query: &str,
        plan_id: Option<&str>,
        categories: &[ContentCategory],
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        let embedding = self.embedder.embed_one(query).await?;
        let filter = VectorFilter {
            plan_id: plan_id.map(String::from),
            categories: categories.to_vec(),
        };
        self.vectors.nearest(&embedding, &filter, limit).await
    }

    /// 删除计划下指定类别的记忆（categories 为空时删除全部）
    pub async fn delete(
        &self,
        plan_id: &str,
        categories: &[ContentCategory],
    ) -> Result<usize, MemoryError> {
        self.vectors
            .delete(&VectorFilter::plan(plan_id).with_categories(categories))
            .await
    }

    pub async fn get_by_plan(
        &self,
        plan_id: &str,
        categories: &[ContentCategory],
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.vectors
            .list(&VectorFilter::plan(plan_id).with_categories(categories))
            .await
    }

    /// 以计划概览 + 每周摘要替换该计划的 plan 类记忆
    pub async fn store_plan_context(&self, plan_id: &str, plan: &Value) -> Result<(), MemoryError> {
        let removed = self.delete(plan_id, &[ContentCategory::Plan]).await?;

        let weeks = plan
            .get("weeks")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let goal = plan
            .pointer("/userProfile/goal")
            .and_then(Value::as_str)
            .unwrap_or("");

        self.store(
            &plan_summary(plan),
            ContentCategory::Plan,
            Some(plan_id),
            json!({"type": "plan_summary", "totalWeeks": weeks.len(), "goal": goal}),
        )
        .await?;

        for week in &weeks {
            self.store(
                &week_summary(week),
                ContentCategory::Plan,
                Some(plan_id),
                json!({"type": "week_detail", "weekNumber": week.get("weekNumber")}),
            )
            .await?;
        }

        tracing::info!(plan_id, weeks_count = weeks.len(), superseded = removed, "stored plan context");
        Ok(())
    }

    pub async fn store_analysis_context(
        &self,
        plan_id: &str,
        analysis: &str,
        record: Option<&Value>,
    ) -> Result<(), MemoryError> {
        let mut metadata = json!({"type": "workout_analysis"});
        if let (Some(record), Some(obj)) = (record, metadata.as_object_mut()) {
            for (src, dst) in [("type", "workoutType"), ("duration", "duration"), ("rpe", "rpe")] {
                obj.insert(dst.to_string(), record.get(src).cloned().unwrap_or(Value::Null));
            }
        }
        self.store(analysis, ContentCategory::Analysis, Some(plan_id), metadata)
            .await?;
        tracing::debug!(plan_id, "stored analysis context");
        Ok(())
    }

    pub async fn store_conversation_context(
        &self,
        plan_id: &str,
        user_message: &str,
        assistant_response: &str,
    ) -> Result<(), MemoryError> {
        let text = format!("用户: {}\n\n教练回复: {}", user_message, assistant_response);
        self.store(
            &text,
            ContentCategory::Conversation,
            Some(plan_id),
            json!({"type": "conversation"}),
        )
        .await?;
        tracing::debug!(plan_id, "stored conversation context");
        Ok(())
    }

    /// 检索并格式化为可拼入 prompt 的文本；无结果时为空串
    pub async fn retrieve_context(
        &self,
        query: &str,
        plan_id: Option<&str>,
        limit: usize,
    ) -> Result<String, MemoryError> {
        let hits = self.search(query, plan_id, &ContentCategory::ALL, limit).await?;
        Ok(hits
            .iter()
            .map(|h| format!("[{}]\n{}", h.record.category.label(), h.record.text))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n"))
    }

    /// 最近的对话记录文本
    pub async fn get_plan_history(&self, plan_id: &str, limit: usize) -> Result<Vec<String>, MemoryError> {
        let records = self
            .get_by_plan(plan_id, &[ContentCategory::Conversation])
            .await?;
        Ok(records.into_iter().take(limit).map(|r| r.text).collect())
    }
}

fn str_field<'a>(v: &'a Value, key: &str, default: &'a str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn week_number_label(week: &Value) -> String {
    week.get("weekNumber")
        .map(|n| match n {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "?".to_string())
}

/// 计划概览文本
pub fn plan_summary(plan: &Value) -> String {
    let empty = json!({});
    let profile = plan.get("userProfile").unwrap_or(&empty);
    let weeks = plan
        .get("weeks")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut parts = vec![
        "训练计划概览".to_string(),
        format!("目标: {}", str_field(profile, "goal", "未指定")),
        format!("运动项目: {}", str_field(profile, "item", "未指定")),
        format!("训练周期: {} 周", weeks.len()),
        format!("运动水平: {}", str_field(profile, "level", "未指定")),
    ];
    if !weeks.is_empty() {
        parts.push("\n每周重点:".to_string());
        for week in weeks {
            parts.push(format!(
                "- 第{}周: {}",
                week_number_label(week),
                str_field(week, "summary", "")
            ));
        }
    }
    parts.join("\n")
}

/// 单周摘要文本：每天的重点与前三个动作
pub fn week_summary(week: &Value) -> String {
    let mut parts = vec![
        format!("第{}周训练计划", week_number_label(week)),
        format!("周目标: {}", str_field(week, "summary", "")),
    ];
    let days = week
        .get("days")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    if !days.is_empty() {
        parts.push("\n训练安排:".to_string());
        for day in days {
            let names: Vec<&str> = day
                .get("exercises")
                .and_then(Value::as_array)
                .map(|ex| ex.iter().take(3).map(|e| str_field(e, "name", "")).collect())
                .unwrap_or_default();
            parts.push(format!(
                "- {}: {} ({}...)",
                str_field(day, "day", ""),
                str_field(day, "focus", ""),
                names.join(", ")
            ));
        }
    }
    parts.join("\n")
}
