//! 记忆层：长期（语义检索）、工作（会话 TTL 缓存）、偏好（按计划持久化）三层，由 MemoryManager 组合

pub mod conversation;
pub mod error;
pub mod long_term;
pub mod manager;
pub mod preference;
pub mod vector;
pub mod working;

pub use conversation::{prune_history, Message, Role};
pub use error::MemoryError;
pub use long_term::LongTermStore;
pub use manager::{MemoryManager, RetrievedContext};
pub use preference::PreferenceStore;
pub use vector::{
    ContentCategory, InMemoryVectorStore, MemoryRecord, ScoredRecord, SqliteVectorStore, VectorFilter,
    VectorStore,
};
pub use working::{SessionSnapshot, SessionState, SessionUpdate, WorkingStore};
