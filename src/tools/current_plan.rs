//! get_current_plan：按 plan_id 读取最新计划文档

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentContext;
use crate::store::PlanRepository;
use crate::tools::Tool;

pub const CURRENT_PLAN: &str = "get_current_plan";

pub struct CurrentPlanTool {
    plans: Arc<dyn PlanRepository>,
}

impl CurrentPlanTool {
    pub fn new(plans: Arc<dyn PlanRepository>) -> Self {
        Self { plans }
    }
}

#[async_trait]
impl Tool for CurrentPlanTool {
    fn name(&self) -> &str {
        CURRENT_PLAN
    }

    fn description(&self) -> &str {
        "获取当前训练计划的最新数据"
    }

    /// 计划不存在或无 plan_id 时返回 null
    async fn execute(&self, ctx: &AgentContext) -> Result<Value, String> {
        let Some(plan_id) = ctx.plan_id() else {
            return Ok(Value::Null);
        };
        match self.plans.get_plan(plan_id).await.map_err(|e| e.to_string())? {
            Some(plan) => Ok(plan),
            None => {
                tracing::warn!(plan_id, "plan not found");
                Ok(Value::Null)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Request;
    use crate::store::InMemoryRepository;
    use serde_json::json;

    #[tokio::test]
    async fn test_current_plan_lookup() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_plan("p1", json!({"totalWeeks": 4, "weeks": []})).await;
        let tool = CurrentPlanTool::new(repo);

        let found = tool
            .execute(&AgentContext::new(Request::default().with_plan_id("p1")))
            .await
            .unwrap();
        assert_eq!(found["totalWeeks"], 4);

        let missing = tool
            .execute(&AgentContext::new(Request::default().with_plan_id("nope")))
            .await
            .unwrap();
        assert!(missing.is_null());
    }
}
