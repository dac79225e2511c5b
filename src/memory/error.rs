//! 记忆层错误：任何一层失败都只降级，不中断请求

use thiserror::Error;

use crate::llm::LlmError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("embedding: {0}")]
    Embedding(#[from] LlmError),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}
