//! 动作路由：动作类型 -> 处理器
//!
//! 请求显式给出且可识别的动作优先；否则按内容推断：
//! 有记录数据 -> 分析；有消息且有计划 -> 修改；有用户档案 -> 生成。

use std::collections::HashMap;
use std::sync::Arc;

use crate::actions::{ActionHandler, ActionKind};
use crate::core::{AgentError, Request};

/// 按请求内容推断动作
pub fn infer_action(request: &Request) -> Result<ActionKind, AgentError> {
    if !request.record_data.is_empty() {
        return Ok(ActionKind::AnalyzeRecord);
    }
    if !request.message().trim().is_empty() && !request.plan_data.is_empty() {
        return Ok(ActionKind::ModifyPlan);
    }
    if !request.user_profile.is_empty() {
        return Ok(ActionKind::GeneratePlan);
    }
    Err(AgentError::Routing(match request.action.as_deref() {
        Some(raw) => format!("Unknown action type: {}", raw),
        None => "Cannot infer action from request".to_string(),
    }))
}

/// 路由理由（写入决策轨迹）
pub fn routing_reason(request: &Request, kind: ActionKind) -> &'static str {
    if request.explicit_action().is_some() {
        return "explicit action in request";
    }
    match kind {
        ActionKind::AnalyzeRecord => "record data present -> analyze single record",
        ActionKind::ModifyPlan => "user message with existing plan -> modify plan through chat",
        ActionKind::GeneratePlan => "user profile present -> generate new plan",
    }
}

/// 处理器注册表
#[derive(Default, Clone)]
pub struct ActionRouter {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl ActionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器；同一动作重复注册时后者覆盖
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        let kind = handler.kind();
        if self.handlers.insert(kind, handler).is_some() {
            tracing::warn!(action = %kind, "replacing registered action handler");
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get_action(&self, kind: ActionKind) -> Result<Arc<dyn ActionHandler>, AgentError> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| AgentError::ActionNotFound(kind.to_string()))
    }

    /// 已注册的动作（固定顺序）
    pub fn actions(&self) -> Vec<ActionKind> {
        ActionKind::ALL
            .into_iter()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }

    /// 决定请求的动作：显式优先，否则推断
    pub fn resolve(&self, request: &Request) -> Result<ActionKind, AgentError> {
        match request.explicit_action() {
            Some(kind) => Ok(kind),
            None => {
                if let Some(raw) = request.action.as_deref().filter(|s| !s.trim().is_empty()) {
                    tracing::debug!(action = raw, "unrecognized action, inferring from content");
                }
                infer_action(request)
            }
        }
    }

    /// resolve 并取出处理器
    pub fn route(&self, request: &Request) -> Result<(ActionKind, Arc<dyn ActionHandler>), AgentError> {
        let kind = self.resolve(request)?;
        Ok((kind, self.get_action(kind)?))
    }
}
