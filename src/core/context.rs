//! 请求、执行上下文与响应
//!
//! Request 是调用方输入；AgentContext 是在状态机各节点间传递的可变上下文；AgentResponse 是最终输出。
//! 上下文不变式：error 一旦设置，response / 更新类字段不再被覆盖，之后只做收尾记录。

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::actions::{ActionKind, ActionOutcome};
use crate::core::trace::DecisionRecord;
use crate::core::AgentError;
use crate::memory::{Message, RetrievedContext};

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 编排请求
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// generate_plan / modify_plan / analyze_record（也接受 generate / modify / analyze）；
    /// 缺失或无法识别时按内容推断
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default = "new_session_id")]
    pub session_id: String,
    #[serde(default)]
    pub plan_id: Option<String>,
    /// 生成计划：用户档案（goal、item、level、weeks…）
    #[serde(default)]
    pub user_profile: Map<String, Value>,
    #[serde(default)]
    pub start_date: Option<String>,
    /// 修改计划：当前计划文档（含 weeks）
    #[serde(default)]
    pub plan_data: Map<String, Value>,
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<Message>,
    /// 分析记录：记录 id 与原始数据
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub record_data: Map<String, Value>,
    /// 确认分析建议时携带
    #[serde(default)]
    pub update_suggestion: Option<String>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            action: None,
            session_id: new_session_id(),
            plan_id: None,
            user_profile: Map::new(),
            start_date: None,
            plan_data: Map::new(),
            user_message: None,
            conversation_history: Vec::new(),
            record_id: None,
            record_data: Map::new(),
            update_suggestion: None,
        }
    }
}

fn object_or_empty(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl Request {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            action: Some(kind.as_str().to_string()),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_plan_id(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    pub fn with_profile(mut self, profile: Value) -> Self {
        self.user_profile = object_or_empty(profile);
        self
    }

    pub fn with_start_date(mut self, start_date: impl Into<String>) -> Self {
        self.start_date = Some(start_date.into());
        self
    }

    pub fn with_plan_data(mut self, plan: Value) -> Self {
        self.plan_data = object_or_empty(plan);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_record(mut self, record_id: impl Into<String>, data: Value) -> Self {
        self.record_id = Some(record_id.into());
        self.record_data = object_or_empty(data);
        self
    }

    pub fn with_update_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.update_suggestion = Some(suggestion.into());
        self
    }

    /// 显式给出且可识别的动作
    pub fn explicit_action(&self) -> Option<ActionKind> {
        self.action.as_deref().and_then(ActionKind::parse)
    }

    pub fn message(&self) -> &str {
        self.user_message.as_deref().unwrap_or("")
    }

    /// 用户档案；请求未带时回退到 plan_data.userProfile。start_date 在档案缺少 startDate 时补入
    pub fn profile(&self) -> Map<String, Value> {
        let mut profile = if !self.user_profile.is_empty() {
            self.user_profile.clone()
        } else {
            self.plan_data
                .get("userProfile")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default()
        };
        if let Some(start) = self.start_date.as_deref().filter(|s| !s.is_empty()) {
            if !profile.is_empty() {
                profile
                    .entry("startDate")
                    .or_insert_with(|| Value::String(start.to_string()));
            }
        }
        profile
    }

    /// 校验动作所需字段非空
    pub fn validate(&self, kind: ActionKind) -> Result<(), AgentError> {
        match kind {
            ActionKind::GeneratePlan => {
                if self.profile().is_empty() {
                    return Err(AgentError::Validation(
                        "user_profile is required for generate_plan".into(),
                    ));
                }
            }
            ActionKind::ModifyPlan => {
                if self.plan_data.is_empty() {
                    return Err(AgentError::Validation(
                        "plan_data is required for modify_plan".into(),
                    ));
                }
                if self.message().trim().is_empty() {
                    return Err(AgentError::Validation(
                        "user_message is required for modify_plan".into(),
                    ));
                }
            }
            ActionKind::AnalyzeRecord => {
                if self.record_data.is_empty() {
                    return Err(AgentError::Validation(
                        "record_data is required for analyze_record".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// 状态机上下文
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub request: Request,
    /// RouteAction 之后确定
    pub action: Option<ActionKind>,
    pub memory: RetrievedContext,
    pub pending_tools: Vec<String>,
    /// 工具名 -> 结果，每个工具至多一项
    pub tool_results: Map<String, Value>,
    /// 未注册或执行失败的工具（不写入结果，但不再重试）
    pub tool_failures: BTreeMap<String, String>,
    response: Option<String>,
    plan: Option<Value>,
    update: Option<Vec<Value>>,
    analysis: Option<String>,
    suggest_update: bool,
    update_suggestion: Option<String>,
    error: Option<AgentError>,
}

impl AgentContext {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            action: None,
            memory: RetrievedContext::default(),
            pending_tools: Vec::new(),
            tool_results: Map::new(),
            tool_failures: BTreeMap::new(),
            response: None,
            plan: None,
            update: None,
            analysis: None,
            suggest_update: false,
            update_suggestion: None,
            error: None,
        }
    }

    pub fn plan_id(&self) -> Option<&str> {
        self.request.plan_id.as_deref().filter(|s| !s.is_empty())
    }

    pub fn session_id(&self) -> &str {
        &self.request.session_id
    }

    pub fn user_message(&self) -> &str {
        self.request.message()
    }

    pub fn record_data(&self) -> &Map<String, Value> {
        &self.request.record_data
    }

    /// 当前计划的周列表
    pub fn plan_weeks(&self) -> Vec<Value> {
        self.request
            .plan_data
            .get("weeks")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// 拼入 prompt 的记忆文本
    pub fn memory_text(&self) -> String {
        self.memory.format_for_prompt()
    }

    pub fn tool_result(&self, name: &str) -> Option<&Value> {
        self.tool_results.get(name)
    }

    /// 已尝试过的工具（成功或失败）
    pub fn has_attempted(&self, name: &str) -> bool {
        self.tool_results.contains_key(name) || self.tool_failures.contains_key(name)
    }

    pub fn record_tool_result(&mut self, name: &str, value: Value) {
        self.tool_results.insert(name.to_string(), value);
    }

    pub fn record_tool_failure(&mut self, name: &str, reason: impl Into<String>) {
        self.tool_failures.insert(name.to_string(), reason.into());
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&AgentError> {
        self.error.as_ref()
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn update(&self) -> Option<&[Value]> {
        self.update.as_deref()
    }

    pub fn plan(&self) -> Option<&Value> {
        self.plan.as_ref()
    }

    pub fn analysis(&self) -> Option<&str> {
        self.analysis.as_deref()
    }

    /// 写入处理器结果；已有 error 时忽略。解析失败在写入文本后记为 error
    pub fn apply_outcome(&mut self, outcome: ActionOutcome) {
        if self.error.is_some() {
            tracing::debug!("context already failed, ignoring action outcome");
            return;
        }
        self.response = Some(outcome.message);
        self.plan = outcome.plan;
        self.update = outcome.updated_weeks;
        self.analysis = outcome.analysis;
        self.suggest_update = outcome.suggest_update;
        self.update_suggestion = outcome.update_suggestion;
        if let Some(e) = outcome.parse_error {
            self.update = None;
            self.error = Some(e);
        }
    }

    /// 标记失败并给出兜底回复；已失败时保持第一次的错误与回复
    pub fn fail(&mut self, error: AgentError, fallback: &str) {
        if self.error.is_some() {
            return;
        }
        self.error = Some(error);
        self.response = Some(fallback.to_string());
        self.update = None;
    }

    pub fn into_response(self, tool_calls: usize, trace: Option<Vec<DecisionRecord>>) -> AgentResponse {
        AgentResponse {
            success: self.error.is_none(),
            message: self.response.unwrap_or_default(),
            plan: self.plan,
            updated_weeks: self.update,
            analysis: self.analysis,
            suggest_update: self.suggest_update,
            update_suggestion: self.update_suggestion,
            error: self.error.map(|e| e.to_string()),
            tool_calls,
            trace,
        }
    }
}

/// 编排结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_weeks: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub suggest_update: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tool_calls: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<DecisionRecord>>,
}
