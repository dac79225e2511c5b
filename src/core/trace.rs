//! 决策追踪：记录一次请求中每个决策点，仅用于观察，不影响控制流

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 决策类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    RequestReceived,
    MemoryRetrieved,
    ActionRouted,
    ToolCheck,
    ToolCall,
    ActionExecuted,
    MemoryUpdated,
    ResponseGenerated,
}

/// 单条决策记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub step: usize,
    pub kind: DecisionKind,
    pub decision: String,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
    /// 距请求开始的毫秒数
    pub elapsed_ms: u64,
}

/// 一次请求的追踪器；disabled 时所有记录调用为空操作
pub struct DecisionTracer {
    enabled: bool,
    started: Instant,
    records: Vec<DecisionRecord>,
}

impl DecisionTracer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            started: Instant::now(),
            records: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(
        &mut self,
        kind: DecisionKind,
        decision: impl Into<String>,
        reasoning: impl Into<String>,
        details: Value,
    ) {
        if !self.enabled {
            return;
        }
        self.records.push(DecisionRecord {
            step: self.records.len() + 1,
            kind,
            decision: decision.into(),
            reasoning: reasoning.into(),
            details,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
    }

    pub fn records(&self) -> &[DecisionRecord] {
        &self.records
    }

    pub fn count(&self, kind: DecisionKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }

    /// 结束追踪：输出一条汇总日志并返回记录（disabled 时为 None）
    pub fn finish(self, session_id: &str) -> Option<Vec<DecisionRecord>> {
        if !self.enabled {
            return None;
        }
        let steps: Vec<&str> = self.records.iter().map(|r| r.decision.as_str()).collect();
        tracing::info!(
            session_id,
            decisions = self.records.len(),
            total_ms = self.started.elapsed().as_millis() as u64,
            path = %steps.join(" -> "),
            "decision trace"
        );
        Some(self.records)
    }
}
