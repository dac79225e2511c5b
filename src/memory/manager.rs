//! 记忆管理器：组合长期记忆、工作记忆、偏好三层
//!
//! 三层各自独立失败：任何一层出错只记日志并降级为"无该层上下文"，不影响请求继续。
//! WorkingStore 由启动代码创建后注入（进程内共享），不在此处构造。

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::MemorySection;
use crate::llm::EmbeddingProvider;
use crate::memory::long_term::LongTermStore;
use crate::memory::preference::{format_preferences, PreferenceStore};
use crate::memory::vector::SqliteVectorStore;
use crate::memory::working::{SessionSnapshot, WorkingStore};
use crate::memory::{MemoryError, Message};
use crate::store::Database;

/// 一次检索得到的组合上下文
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievedContext {
    /// 长期记忆检索结果（已格式化）
    pub long_term: String,
    pub working: Option<SessionSnapshot>,
    pub preferences: Map<String, Value>,
}

impl RetrievedContext {
    /// 拼入 prompt 的文本：长期记忆在前，偏好在后
    pub fn format_for_prompt(&self) -> String {
        let mut parts = Vec::new();
        if !self.long_term.is_empty() {
            parts.push(self.long_term.clone());
        }
        let prefs = format_preferences(&self.preferences);
        if !prefs.is_empty() {
            parts.push(prefs);
        }
        parts.join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.long_term.is_empty() && self.working.is_none() && self.preferences.is_empty()
    }
}

pub struct MemoryManager {
    long_term: LongTermStore,
    working: Arc<WorkingStore>,
    preferences: PreferenceStore,
    search_limit: usize,
}

impl MemoryManager {
    pub fn new(
        long_term: LongTermStore,
        working: Arc<WorkingStore>,
        preferences: PreferenceStore,
        search_limit: usize,
    ) -> Self {
        Self {
            long_term,
            working,
            preferences,
            search_limit,
        }
    }

    /// 长期记忆与偏好共用同一个 SQLite 数据库
    pub fn from_config(
        cfg: &MemorySection,
        db: Database,
        embedder: Arc<dyn EmbeddingProvider>,
        working: Arc<WorkingStore>,
    ) -> Self {
        let vectors = Arc::new(SqliteVectorStore::new(db.clone()));
        Self::new(
            LongTermStore::new(vectors, embedder),
            working,
            PreferenceStore::new(db, cfg.max_insights),
            cfg.search_limit,
        )
    }

    pub fn working(&self) -> &Arc<WorkingStore> {
        &self.working
    }

    pub fn long_term(&self) -> &LongTermStore {
        &self.long_term
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    /// 组合检索：长期记忆（需 plan_id 与非空 query）、会话快照、偏好全集
    pub async fn get_context(
        &self,
        plan_id: Option<&str>,
        query: &str,
        session_id: Option<&str>,
    ) -> RetrievedContext {
        let mut ctx = RetrievedContext::default();

        if let Some(pid) = plan_id {
            if !query.trim().is_empty() {
                match self
                    .long_term
                    .retrieve_context(query, Some(pid), self.search_limit)
                    .await
                {
                    Ok(text) => ctx.long_term = text,
                    Err(e) => {
                        tracing::warn!(plan_id = pid, category = "memory", error = %e, "long-term retrieval failed")
                    }
                }
            }
        }

        if let Some(sid) = session_id {
            ctx.working = Some(self.working.get_or_create(sid, plan_id).await.snapshot());
        }

        if let Some(pid) = plan_id {
            match self.preferences.get_all(pid).await {
                Ok(prefs) => ctx.preferences = prefs,
                Err(e) => {
                    tracing::warn!(plan_id = pid, category = "memory", error = %e, "preference lookup failed")
                }
            }
        }

        tracing::debug!(
            plan_id,
            long_term_chars = ctx.long_term.chars().count(),
            has_working = ctx.working.is_some(),
            preferences = ctx.preferences.len(),
            "retrieved memory context"
        );
        ctx
    }

    pub async fn store_plan_context(&self, plan_id: &str, plan: &Value) -> Result<(), MemoryError> {
        self.long_term.store_plan_context(plan_id, plan).await
    }

    /// 一轮对话写入工作记忆（有 session 时）和长期记忆
    pub async fn store_conversation(
        &self,
        plan_id: &str,
        session_id: Option<&str>,
        user_message: &str,
        assistant_response: &str,
    ) -> Result<(), MemoryError> {
        if let Some(sid) = session_id {
            self.working.add_message(sid, Message::user(user_message)).await;
            self.working
                .add_message(sid, Message::assistant(assistant_response))
                .await;
        }
        self.long_term
            .store_conversation_context(plan_id, user_message, assistant_response)
            .await
    }

    pub async fn store_analysis(
        &self,
        plan_id: &str,
        analysis: &str,
        record: Option<&Value>,
    ) -> Result<(), MemoryError> {
        self.long_term
            .store_analysis_context(plan_id, analysis, record)
            .await
    }

    pub async fn add_insight(&self, plan_id: &str, text: &str, category: &str) -> Result<(), MemoryError> {
        self.preferences.add_insight(plan_id, text, category).await
    }

    /// 标记会话中有一份待保存的新计划
    pub async fn mark_plan_pending(&self, session_id: &str, plan_id: &str) {
        self.working
            .set_context_value(session_id, "plan_pending", json!(plan_id))
            .await;
    }

    pub async fn get_conversation_history(&self, session_id: &str, limit: Option<usize>) -> Vec<Message> {
        self.working.get_conversation_history(session_id, limit).await
    }

    pub async fn clear_session(&self, session_id: &str) -> bool {
        self.working.clear(session_id).await
    }

    /// 清理过期会话
    pub async fn cleanup(&self) -> usize {
        self.working.cleanup_expired().await
    }
}
