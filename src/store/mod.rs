//! 持久化层：SQLite 连接、计划/训练记录仓库

pub mod db;
pub mod repository;
pub mod sqlite;

pub use db::{Database, StoreError};
pub use repository::{
    Fixtures, InMemoryRepository, PlanRepository, RecordQuery, RecordRepository, WorkoutRecord,
};
pub use sqlite::SqliteRepository;
