//! 编排器：单次请求的状态机
//!
//! RetrieveMemory -> RouteAction -> [CheckTools <-> CallTool]* -> ExecuteAction -> UpdateMemory -> 响应
//!
//! - 校验、路由错误在进入状态机前直接返回 Err
//! - 其余错误（后端、解析、工具、记忆）降级：success=false + 兜底回复，仍返回 Ok
//! - 工具循环只用于 generate / analyze，迭代上限为已注册工具数；每个工具每次请求至多尝试一次
//! - 流式是快捷路径：检索记忆、路由后直接走处理器流，不经过工具循环与记忆更新

use std::sync::Arc;

use serde_json::{json, Value};

use crate::actions::modify::confirmation_request;
use crate::actions::{ActionHandler, ActionKind, ChunkStream};
use crate::core::router::routing_reason;
use crate::core::trace::{DecisionKind, DecisionTracer};
use crate::core::{ActionRouter, AgentContext, AgentError, AgentResponse, Request};
use crate::memory::{MemoryManager, Message};
use crate::tools::ToolExecutor;

/// 训练教练编排器；可在多个请求间共享（&self 调用）
pub struct CoachAgent {
    memory: Arc<MemoryManager>,
    router: ActionRouter,
    tools: ToolExecutor,
    trace_enabled: bool,
}

/// 记忆检索的查询文本：用户消息 > 记录摘要 > 动作名
fn retrieval_query(request: &Request, kind: ActionKind) -> String {
    let message = request.message().trim();
    if !message.is_empty() {
        return message.to_string();
    }
    let record = &request.record_data;
    if !record.is_empty() {
        let text = |key: &str| match record.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(v) => v.to_string(),
        };
        return format!("{} 训练 RPE {}", text("type"), text("rpe"));
    }
    kind.as_str().to_string()
}

/// 工具结果摘要（写入决策轨迹）
fn summarize_tool_result(value: &Value) -> String {
    match value {
        Value::Null => "no result".to_string(),
        Value::Array(items) => format!("returned {} items", items.len()),
        Value::Object(obj) => {
            let keys: Vec<&str> = obj.keys().take(3).map(String::as_str).collect();
            format!("object with keys: {}", keys.join(", "))
        }
        _ => "scalar result".to_string(),
    }
}

impl CoachAgent {
    pub fn new(memory: Arc<MemoryManager>, router: ActionRouter, tools: ToolExecutor) -> Self {
        Self {
            memory,
            router,
            tools,
            trace_enabled: true,
        }
    }

    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace_enabled = enabled;
        self
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn router(&self) -> &ActionRouter {
        &self.router
    }

    /// 路由 + 校验 + 取处理器；失败即请求级错误
    fn prepare(&self, request: &Request) -> Result<(ActionKind, Arc<dyn ActionHandler>), AgentError> {
        let kind = self.router.resolve(request)?;
        request.validate(kind)?;
        let handler = self.router.get_action(kind)?;
        Ok((kind, handler))
    }

    /// 执行一次请求
    pub async fn execute(&self, request: Request) -> Result<AgentResponse, AgentError> {
        let mut tracer = DecisionTracer::new(self.trace_enabled);
        tracer.record(
            DecisionKind::RequestReceived,
            "entry",
            format!("action={}", request.action.as_deref().unwrap_or("(infer)")),
            json!({
                "hasUserMessage": !request.message().is_empty(),
                "hasRecordData": !request.record_data.is_empty(),
                "hasPlanData": !request.plan_data.is_empty(),
            }),
        );

        let (kind, handler) = match self.prepare(&request) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(
                    session_id = %request.session_id,
                    category = e.category(),
                    error = %e,
                    "request rejected"
                );
                return Err(e);
            }
        };
        tracing::info!(
            action = %kind,
            plan_id = request.plan_id.as_deref(),
            session_id = %request.session_id,
            "executing request"
        );

        let mut ctx = AgentContext::new(request);

        // RetrieveMemory
        let query = retrieval_query(&ctx.request, kind);
        ctx.memory = self
            .memory
            .get_context(ctx.plan_id(), &query, Some(ctx.session_id()))
            .await;
        tracer.record(
            DecisionKind::MemoryRetrieved,
            "retrieve_memory",
            if ctx.memory.is_empty() { "no prior context" } else { "context found" },
            json!({
                "query": query,
                "hasLongTerm": !ctx.memory.long_term.is_empty(),
                "hasPreferences": !ctx.memory.preferences.is_empty(),
                "contextLength": ctx.memory_text().chars().count(),
            }),
        );

        // RouteAction
        ctx.action = Some(kind);
        tracer.record(
            DecisionKind::ActionRouted,
            kind.as_str(),
            routing_reason(&ctx.request, kind),
            json!({ "alternatives": self.router.actions() }),
        );

        // CheckTools / CallTool
        let tool_calls = if kind.uses_tools() {
            self.run_tool_loop(handler.as_ref(), &mut ctx, &mut tracer).await
        } else {
            0
        };

        // ExecuteAction
        match handler.execute(&ctx).await {
            Ok(outcome) => ctx.apply_outcome(outcome),
            Err(e) => {
                tracing::error!(action = %kind, category = e.category(), error = %e, "action execution failed");
                ctx.fail(e, kind.fallback_message());
            }
        }
        if let Some(e) = ctx.error() {
            if e.category() == "parse" {
                tracing::warn!(action = %kind, error = %e, "structured output rejected, returning text only");
            }
        }
        tracer.record(
            DecisionKind::ActionExecuted,
            kind.as_str(),
            match ctx.error() {
                Some(e) => format!("failed: {}", e),
                None => "completed".to_string(),
            },
            json!({
                "hasPlanUpdate": ctx.update().is_some(),
                "responseChars": ctx.response().map(|r| r.chars().count()).unwrap_or(0),
            }),
        );

        // UpdateMemory
        let updated = self.update_memory(kind, &ctx).await;
        tracer.record(
            DecisionKind::MemoryUpdated,
            "update_memory",
            if updated.is_empty() { "nothing stored".to_string() } else { updated.join(", ") },
            Value::Null,
        );

        let success = !ctx.has_error();
        tracer.record(
            DecisionKind::ResponseGenerated,
            "exit",
            if success { "success" } else { "failed" },
            Value::Null,
        );
        let session_id = ctx.session_id().to_string();
        let trace = tracer.finish(&session_id);
        tracing::info!(action = %kind, session_id = %session_id, success, tool_calls, "request finished");
        Ok(ctx.into_response(tool_calls, trace))
    }

    /// 工具循环，返回实际调用次数
    async fn run_tool_loop(
        &self,
        handler: &dyn ActionHandler,
        ctx: &mut AgentContext,
        tracer: &mut DecisionTracer,
    ) -> usize {
        let ceiling = self.tools.len();
        let mut calls = 0;
        loop {
            let required = handler.required_tools(ctx);
            ctx.pending_tools = required
                .iter()
                .filter(|name| !ctx.has_attempted(name))
                .cloned()
                .collect();
            tracer.record(
                DecisionKind::ToolCheck,
                "check_tools",
                if ctx.pending_tools.is_empty() { "no pending tools" } else { "tools pending" },
                json!({ "required": required, "pending": ctx.pending_tools }),
            );

            let Some(name) = ctx.pending_tools.first().cloned() else {
                break;
            };
            if calls >= ceiling {
                let e = AgentError::ToolLoopExceeded(ceiling);
                tracing::warn!(category = e.category(), pending = ?ctx.pending_tools, error = %e, "stopping tool loop");
                ctx.pending_tools.clear();
                break;
            }
            calls += 1;

            match self.tools.execute(&name, ctx).await {
                Ok(value) => {
                    tracer.record(
                        DecisionKind::ToolCall,
                        name.as_str(),
                        summarize_tool_result(&value),
                        json!({ "success": true }),
                    );
                    ctx.record_tool_result(&name, value);
                }
                Err(e) => {
                    tracing::warn!(tool = %name, category = e.category(), error = %e, "tool call failed, continuing without it");
                    tracer.record(
                        DecisionKind::ToolCall,
                        name.as_str(),
                        e.to_string(),
                        json!({ "success": false }),
                    );
                    ctx.record_tool_failure(&name, e.to_string());
                }
            }
        }
        calls
    }

    /// 成功且有 plan_id 时写回记忆；失败只记日志
    async fn update_memory(&self, kind: ActionKind, ctx: &AgentContext) -> Vec<&'static str> {
        let mut updated = Vec::new();
        if ctx.has_error() {
            return updated;
        }
        let Some(plan_id) = ctx.plan_id() else {
            return updated;
        };

        let result = match kind {
            ActionKind::ModifyPlan => {
                let mut result = Ok(());
                if let Some(reply) = ctx.response().filter(|r| !r.is_empty()) {
                    result = self
                        .memory
                        .store_conversation(plan_id, Some(ctx.session_id()), ctx.user_message(), reply)
                        .await;
                    if result.is_ok() {
                        updated.push("conversation");
                    }
                }
                if let Some(weeks) = ctx.update().filter(|_| result.is_ok()) {
                    let mut plan = ctx.request.plan_data.clone();
                    plan.insert("weeks".to_string(), Value::Array(weeks.to_vec()));
                    result = self.memory.store_plan_context(plan_id, &Value::Object(plan)).await;
                    if result.is_ok() {
                        updated.push("plan_context");
                    }
                }
                result
            }
            ActionKind::AnalyzeRecord => match ctx.analysis().filter(|a| !a.is_empty()) {
                Some(analysis) => {
                    let record = Value::Object(ctx.record_data().clone());
                    let result = self.memory.store_analysis(plan_id, analysis, Some(&record)).await;
                    if result.is_ok() {
                        updated.push("analysis");
                    }
                    result
                }
                None => Ok(()),
            },
            ActionKind::GeneratePlan => {
                if ctx.plan().is_some() {
                    self.memory.mark_plan_pending(ctx.session_id(), plan_id).await;
                    updated.push("plan_pending");
                }
                Ok(())
            }
        };

        if let Err(e) = result {
            let e = AgentError::from(e);
            tracing::warn!(action = %kind, plan_id, category = e.category(), error = %e, "memory update failed");
        }
        updated
    }

    /// 流式执行：错误以 `错误: ...` 单条文本返回
    pub async fn execute_streaming(&self, request: Request) -> ChunkStream {
        let (kind, handler) = match self.prepare(&request) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(category = e.category(), error = %e, "stream request rejected");
                return Box::pin(futures_util::stream::once(async move { format!("错误: {}", e) }));
            }
        };
        tracing::info!(action = %kind, session_id = %request.session_id, "executing streaming request");

        let mut ctx = AgentContext::new(request);
        let query = retrieval_query(&ctx.request, kind);
        ctx.memory = self
            .memory
            .get_context(ctx.plan_id(), &query, Some(ctx.session_id()))
            .await;
        ctx.action = Some(kind);
        handler.execute_stream(ctx)
    }

    /// 用户确认分析建议后调整计划
    pub async fn confirm_update(&self, request: Request) -> Result<AgentResponse, AgentError> {
        self.execute(confirmation_request(request)?).await
    }

    pub async fn generate_plan(
        &self,
        profile: Value,
        start_date: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<AgentResponse, AgentError> {
        let mut request = Request::new(ActionKind::GeneratePlan).with_profile(profile);
        if let Some(date) = start_date {
            request = request.with_start_date(date);
        }
        if let Some(sid) = session_id {
            request = request.with_session(sid);
        }
        self.execute(request).await
    }

    pub async fn modify_plan(
        &self,
        plan_id: &str,
        plan_data: Value,
        message: &str,
        history: Vec<Message>,
        session_id: Option<&str>,
    ) -> Result<AgentResponse, AgentError> {
        let mut request = Request::new(ActionKind::ModifyPlan)
            .with_plan_id(plan_id)
            .with_plan_data(plan_data)
            .with_message(message)
            .with_history(history);
        if let Some(sid) = session_id {
            request = request.with_session(sid);
        }
        self.execute(request).await
    }

    pub async fn analyze_record(
        &self,
        plan_id: Option<&str>,
        record_id: &str,
        record_data: Value,
        session_id: Option<&str>,
    ) -> Result<AgentResponse, AgentError> {
        let mut request = Request::new(ActionKind::AnalyzeRecord).with_record(record_id, record_data);
        if let Some(pid) = plan_id {
            request = request.with_plan_id(pid);
        }
        if let Some(sid) = session_id {
            request = request.with_session(sid);
        }
        self.execute(request).await
    }

    /// 新计划保存后写入长期记忆
    pub async fn store_initial_plan_context(&self, plan_id: &str, plan: &Value) -> Result<(), AgentError> {
        self.memory.store_plan_context(plan_id, plan).await?;
        tracing::info!(plan_id, "stored initial plan context");
        Ok(())
    }
}
