//! 向量存储：余弦相似度最近邻检索，可按计划与内容类别过滤
//!
//! InMemoryVectorStore 用于测试；SqliteVectorStore 将向量以 JSON 存入 context_embeddings 表，
//! 检索时在进程内计算相似度。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::memory::MemoryError;
use crate::store::Database;

/// 长期记忆内容类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    Plan,
    Analysis,
    Conversation,
}

impl ContentCategory {
    pub const ALL: [ContentCategory; 3] = [
        ContentCategory::Plan,
        ContentCategory::Analysis,
        ContentCategory::Conversation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::Plan => "plan",
            ContentCategory::Analysis => "analysis",
            ContentCategory::Conversation => "conversation",
        }
    }

    /// 拼入 prompt 时的中文标签
    pub fn label(&self) -> &'static str {
        match self {
            ContentCategory::Plan => "训练计划",
            ContentCategory::Analysis => "训练分析",
            ContentCategory::Conversation => "对话记录",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(ContentCategory::Plan),
            "analysis" => Some(ContentCategory::Analysis),
            "conversation" | "history" => Some(ContentCategory::Conversation),
            _ => None,
        }
    }
}

/// 一条长期记忆
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub id: String,
    pub text: String,
    pub category: ContentCategory,
    pub plan_id: Option<String>,
    pub embedding: Vec<f32>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// 检索结果
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub score: f32,
}

/// 过滤条件；categories 为空表示不过滤类别
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub plan_id: Option<String>,
    pub categories: Vec<ContentCategory>,
}

impl VectorFilter {
    pub fn plan(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: Some(plan_id.into()),
            categories: Vec::new(),
        }
    }

    pub fn with_categories(mut self, categories: &[ContentCategory]) -> Self {
        self.categories = categories.to_vec();
        self
    }

    fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(pid) = &self.plan_id {
            if record.plan_id.as_deref() != Some(pid.as_str()) {
                return false;
            }
        }
        self.categories.is_empty() || self.categories.contains(&record.category)
    }
}

/// 余弦相似度；长度不同或任一为零向量时返回 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn rank(records: impl Iterator<Item = MemoryRecord>, query: &[f32], limit: usize) -> Vec<ScoredRecord> {
    let mut scored: Vec<ScoredRecord> = records
        .map(|record| ScoredRecord {
            score: cosine_similarity(query, &record.embedding),
            record,
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

/// 向量检索后端
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn insert(&self, record: MemoryRecord) -> Result<(), MemoryError>;

    /// 按余弦相似度降序返回至多 limit 条
    async fn nearest(
        &self,
        query: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, MemoryError>;

    /// 按创建时间倒序列出
    async fn list(&self, filter: &VectorFilter) -> Result<Vec<MemoryRecord>, MemoryError>;

    /// 删除匹配的记录，返回删除条数
    async fn delete(&self, filter: &VectorFilter) -> Result<usize, MemoryError>;
}

/// 内存向量存储
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<Vec<MemoryRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        self.entries.write().await.push(record);
        Ok(())
    }

    async fn nearest(
        &self,
        query: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        let entries = self.entries.read().await;
        Ok(rank(
            entries.iter().filter(|r| filter.matches(r)).cloned(),
            query,
            limit,
        ))
    }

    async fn list(&self, filter: &VectorFilter) -> Result<Vec<MemoryRecord>, MemoryError> {
        let entries = self.entries.read().await;
        let mut out: Vec<MemoryRecord> = entries.iter().filter(|r| filter.matches(r)).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn delete(&self, filter: &VectorFilter) -> Result<usize, MemoryError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|r| !filter.matches(r));
        Ok(before - entries.len())
    }
}

/// SQLite 向量存储
pub struct SqliteVectorStore {
    db: Database,
}

type RawEmbedding = (String, String, String, Option<String>, String, String, DateTime<Utc>);

impl SqliteVectorStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// 类别条件：固定枚举字符串拼成 IN 列表
    fn category_clause(categories: &[ContentCategory]) -> String {
        if categories.is_empty() {
            return String::new();
        }
        let list: Vec<String> = categories.iter().map(|c| format!("'{}'", c.as_str())).collect();
        format!(" AND content_type IN ({})", list.join(", "))
    }

    async fn load(&self, filter: &VectorFilter) -> Result<Vec<MemoryRecord>, MemoryError> {
        let plan_id = filter.plan_id.clone();
        let sql = format!(
            "SELECT id, content_text, content_type, plan_id, embedding, metadata, created_at
             FROM context_embeddings WHERE (?1 IS NULL OR plan_id = ?1){}
             ORDER BY created_at DESC",
            Self::category_clause(&filter.categories)
        );
        let rows: Vec<RawEmbedding> = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![plan_id], |r| {
                        Ok((
                            r.get(0)?,
                            r.get(1)?,
                            r.get(2)?,
                            r.get(3)?,
                            r.get(4)?,
                            r.get(5)?,
                            r.get(6)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, text, ctype, plan_id, embedding, metadata, created_at) in rows {
            let Some(category) = ContentCategory::parse(&ctype) else {
                tracing::warn!(id = %id, content_type = %ctype, "skipping record with unknown category");
                continue;
            };
            out.push(MemoryRecord {
                id,
                text,
                category,
                plan_id,
                embedding: serde_json::from_str(&embedding)?,
                metadata: serde_json::from_str(&metadata)?,
                created_at,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn insert(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        let embedding = serde_json::to_string(&record.embedding)?;
        let metadata = serde_json::to_string(&record.metadata)?;
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO context_embeddings
                     (id, plan_id, content_type, content_text, embedding, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        record.id,
                        record.plan_id,
                        record.category.as_str(),
                        record.text,
                        embedding,
                        metadata,
                        record.created_at
                    ],
                )
            })
            .await?;
        Ok(())
    }

    async fn nearest(
        &self,
        query: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        let records = self.load(filter).await?;
        Ok(rank(records.into_iter(), query, limit))
    }

    async fn list(&self, filter: &VectorFilter) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.load(filter).await
    }

    async fn delete(&self, filter: &VectorFilter) -> Result<usize, MemoryError> {
        let plan_id = filter.plan_id.clone();
        let sql = format!(
            "DELETE FROM context_embeddings WHERE (?1 IS NULL OR plan_id = ?1){}",
            Self::category_clause(&filter.categories)
        );
        let n = self
            .db
            .call(move |conn| conn.execute(&sql, params![plan_id]))
            .await?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, plan: &str, category: ContentCategory, v: Vec<f32>) -> MemoryRecord {
        MemoryRecord {
            id: id.into(),
            text: format!("text {}", id),
            category,
            plan_id: Some(plan.into()),
            embedding: v,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    async fn exercise(store: &dyn VectorStore) {
        store.insert(rec("a", "p1", ContentCategory::Plan, vec![1.0, 0.0])).await.unwrap();
        store.insert(rec("b", "p1", ContentCategory::Analysis, vec![0.9, 0.1])).await.unwrap();
        store.insert(rec("c", "p1", ContentCategory::Conversation, vec![0.0, 1.0])).await.unwrap();
        store.insert(rec("d", "p2", ContentCategory::Plan, vec![1.0, 0.0])).await.unwrap();

        let hits = store.nearest(&[1.0, 0.0], &VectorFilter::plan("p1"), 2).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let only_conv = store
            .nearest(
                &[1.0, 0.0],
                &VectorFilter::plan("p1").with_categories(&[ContentCategory::Conversation]),
                5,
            )
            .await
            .unwrap();
        assert_eq!(only_conv.len(), 1);
        assert_eq!(only_conv[0].record.id, "c");

        let removed = store
            .delete(&VectorFilter::plan("p1").with_categories(&[ContentCategory::Plan]))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.list(&VectorFilter::plan("p1")).await.unwrap().len(), 2);
        assert_eq!(store.list(&VectorFilter::plan("p2")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        exercise(&InMemoryVectorStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        exercise(&SqliteVectorStore::new(Database::open_in_memory().unwrap())).await;
    }
}
