//! SQLite 连接与表结构
//!
//! 所有持久化组件（偏好、长期记忆向量、计划/记录）共享同一个 Database：
//! 单连接 + 互斥锁，查询在 spawn_blocking 中执行，不阻塞异步运行时。

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use thiserror::Error;

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Connection lock poisoned")]
    LockPoisoned,

    #[error("Blocking task failed: {0}")]
    Join(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS plans (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workout_records (
    id TEXT PRIMARY KEY,
    plan_id TEXT,
    created_at TEXT NOT NULL,
    data TEXT NOT NULL,
    analysis TEXT
);

CREATE INDEX IF NOT EXISTS idx_records_plan ON workout_records(plan_id, created_at);

CREATE TABLE IF NOT EXISTS user_preferences (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plan_id TEXT NOT NULL,
    preference_key TEXT NOT NULL,
    preference_value TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(plan_id, preference_key)
);

CREATE TABLE IF NOT EXISTS context_embeddings (
    id TEXT PRIMARY KEY,
    plan_id TEXT,
    content_type TEXT NOT NULL,
    content_text TEXT NOT NULL,
    embedding TEXT NOT NULL,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_embeddings_plan ON context_embeddings(plan_id, content_type);
";

/// 共享 SQLite 句柄（Clone 只复制 Arc）
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// 打开文件数据库（父目录不存在时创建）并建表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// 内存数据库（测试与未配置路径时）
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// 按可选路径打开
    pub fn open_optional(path: Option<&Path>) -> Result<Self, StoreError> {
        match path {
            Some(p) => Self::open(p),
            None => Self::open_in_memory(),
        }
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 在阻塞线程中对连接执行 f
    pub async fn call<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut guard).map_err(StoreError::from)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}
