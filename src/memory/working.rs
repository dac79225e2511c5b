//! 工作记忆：按 session_id 保存的会话状态（对话历史 + 键值草稿区）
//!
//! 首次访问时创建，每次访问刷新空闲计时，空闲超过 TTL 即过期（get 不可见，cleanup_expired 时移除）。
//! 同一进程内所有请求共享一个实例，所有状态在一把锁下读写。
//! 生命周期：启动时创建并注入 MemoryManager，spawn_cleanup_task 周期清理，关闭时取消令牌并最后清理一次。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MemorySection;
use crate::memory::conversation::prune_history;
use crate::memory::Message;

/// 单个会话的状态
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: String,
    pub plan_id: Option<String>,
    pub conversation_history: Vec<Message>,
    pub context: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    last_accessed: Instant,
}

impl SessionState {
    fn new(session_id: &str, plan_id: Option<&str>) -> Self {
        Self {
            session_id: session_id.to_string(),
            plan_id: plan_id.map(String::from),
            conversation_history: Vec::new(),
            context: Map::new(),
            created_at: Utc::now(),
            last_accessed: Instant::now(),
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.last_accessed.elapsed() > ttl
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }

    pub fn idle(&self) -> Duration {
        self.last_accessed.elapsed()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            plan_id: self.plan_id.clone(),
            conversation_history: self.conversation_history.clone(),
            context: self.context.clone(),
            created_at: self.created_at,
            idle_secs: self.idle().as_secs(),
        }
    }
}

/// 会话状态的可序列化视图
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub plan_id: Option<String>,
    pub conversation_history: Vec<Message>,
    pub context: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
}

/// 批量更新；None 表示不修改，context 与已有键合并
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub plan_id: Option<String>,
    pub conversation_history: Option<Vec<Message>>,
    pub context: Map<String, Value>,
}

/// 会话级 TTL 缓存
pub struct WorkingStore {
    sessions: Mutex<HashMap<String, SessionState>>,
    ttl: Duration,
    max_messages: usize,
}

impl WorkingStore {
    pub fn new(ttl: Duration, max_messages: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
            max_messages,
        }
    }

    pub fn from_config(cfg: &MemorySection) -> Self {
        Self::new(
            Duration::from_secs(cfg.working_ttl_minutes * 60),
            cfg.max_session_messages,
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 取未过期的会话并刷新计时；已过期的会话在此处被移除
    pub async fn get(&self, session_id: &str) -> Option<SessionState> {
        let mut sessions = self.sessions.lock().await;
        let expired = sessions.get(session_id)?.is_expired(self.ttl);
        if expired {
            sessions.remove(session_id);
            tracing::debug!(session_id, "working session expired on access");
            return None;
        }
        let session = sessions.get_mut(session_id)?;
        session.touch();
        Some(session.clone())
    }

    /// 取未过期会话，否则新建（过期会话被替换）
    pub async fn get_or_create(&self, session_id: &str, plan_id: Option<&str>) -> SessionState {
        let mut sessions = self.sessions.lock().await;
        Self::live_entry(&mut sessions, session_id, plan_id, self.ttl).clone()
    }

    fn live_entry<'a>(
        sessions: &'a mut HashMap<String, SessionState>,
        session_id: &str,
        plan_id: Option<&str>,
        ttl: Duration,
    ) -> &'a mut SessionState {
        let stale = sessions
            .get(session_id)
            .map(|s| s.is_expired(ttl))
            .unwrap_or(true);
        if stale {
            sessions.insert(session_id.to_string(), SessionState::new(session_id, plan_id));
            tracing::debug!(session_id, "created working session");
        }
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(session_id, plan_id));
        session.touch();
        session
    }

    pub async fn update(&self, session_id: &str, update: SessionUpdate) {
        let mut sessions = self.sessions.lock().await;
        let session = Self::live_entry(&mut sessions, session_id, None, self.ttl);
        if let Some(plan_id) = update.plan_id {
            session.plan_id = Some(plan_id);
        }
        if let Some(history) = update.conversation_history {
            session.conversation_history = history;
            prune_history(&mut session.conversation_history, self.max_messages);
        }
        session.context.extend(update.context);
    }

    pub async fn add_message(&self, session_id: &str, message: Message) {
        let mut sessions = self.sessions.lock().await;
        let session = Self::live_entry(&mut sessions, session_id, None, self.ttl);
        session.conversation_history.push(message);
        prune_history(&mut session.conversation_history, self.max_messages);
    }

    /// 最近 limit 条消息（None 为全部）；会话不存在或已过期时为空
    pub async fn get_conversation_history(&self, session_id: &str, limit: Option<usize>) -> Vec<Message> {
        let Some(session) = self.get(session_id).await else {
            return Vec::new();
        };
        let history = session.conversation_history;
        match limit {
            Some(n) if n < history.len() => history[history.len() - n..].to_vec(),
            _ => history,
        }
    }

    pub async fn set_context_value(&self, session_id: &str, key: &str, value: Value) {
        let mut sessions = self.sessions.lock().await;
        let session = Self::live_entry(&mut sessions, session_id, None, self.ttl);
        session.context.insert(key.to_string(), value);
    }

    pub async fn get_context_value(&self, session_id: &str, key: &str) -> Option<Value> {
        self.get(session_id).await?.context.get(key).cloned()
    }

    /// 删除会话，返回是否存在
    pub async fn clear(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(session_id).is_some();
        if removed {
            tracing::debug!(session_id, "cleared working session");
        }
        removed
    }

    /// 移除所有过期会话，返回移除数量
    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(self.ttl));
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(count = removed, "cleaned up expired sessions");
        }
        removed
    }

    /// 可序列化视图；不存在时 None（不会创建会话）
    pub async fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.get(session_id).await.map(|s| s.snapshot())
    }

    /// 当前条目数（含尚未清理的过期条目）
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 后台周期清理，令牌取消后执行最后一次清理并退出
    pub fn spawn_cleanup_task(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        let removed = self.cleanup_expired().await;
                        tracing::info!(removed, "working store sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.cleanup_expired().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_or_create_and_messages() {
        let store = WorkingStore::new(Duration::from_secs(60), 3);
        let s = store.get_or_create("s1", Some("p1")).await;
        assert_eq!(s.plan_id.as_deref(), Some("p1"));

        for i in 0..5 {
            store.add_message("s1", Message::user(format!("m{}", i))).await;
        }
        let history = store.get_conversation_history("s1", None).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "m2");

        let last_two = store.get_conversation_history("s1", Some(2)).await;
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1].content, "m4");
    }

    #[tokio::test]
    async fn test_context_values_and_update() {
        let store = WorkingStore::new(Duration::from_secs(60), 10);
        store.set_context_value("s1", "last_action", json!("modify")).await;
        let mut ctx = Map::new();
        ctx.insert("draft".into(), json!({"week": 2}));
        store
            .update(
                "s1",
                SessionUpdate {
                    plan_id: Some("p9".into()),
                    context: ctx,
                    ..SessionUpdate::default()
                },
            )
            .await;
        assert_eq!(store.get_context_value("s1", "last_action").await, Some(json!("modify")));
        let snap = store.snapshot("s1").await.unwrap();
        assert_eq!(snap.plan_id.as_deref(), Some("p9"));
        assert_eq!(snap.context["draft"]["week"], 2);
        assert!(store.snapshot("missing").await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_unreachable_and_swept() {
        let store = WorkingStore::new(Duration::from_millis(50), 10);
        store.get_or_create("stale", None).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        store.get_or_create("fresh", None).await;

        assert_eq!(store.len().await, 2);
        assert_eq!(store.cleanup_expired().await, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.get("stale").await.is_none());
        assert!(store.get("fresh").await.is_some());
    }

    #[tokio::test]
    async fn test_get_drops_expired() {
        let store = WorkingStore::new(Duration::from_millis(30), 10);
        store.add_message("s1", Message::user("hi")).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get("s1").await.is_none());
        assert_eq!(store.len().await, 0);
        assert!(store.get_conversation_history("s1", None).await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_to_same_session() {
        let store = Arc::new(WorkingStore::new(Duration::from_secs(60), 1000));
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.add_message("shared", Message::user(format!("{}", i))).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get_conversation_history("shared", None).await.len(), 20);
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_cancel() {
        let store = Arc::new(WorkingStore::new(Duration::from_millis(10), 10));
        store.get_or_create("s1", None).await;
        let token = CancellationToken::new();
        let handle = Arc::clone(&store).spawn_cleanup_task(Duration::from_secs(3600), token.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        handle.await.unwrap();
        assert_eq!(store.len().await, 0);
    }
}
