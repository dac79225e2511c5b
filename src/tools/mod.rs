//! 工具层：只读数据获取工具（训练历史、当前计划、近期记录）与注册、执行、Schema

pub mod current_plan;
pub mod executor;
pub mod recent_records;
pub mod registry;
pub mod schema;
pub mod training_history;

use std::sync::Arc;

use crate::config::ToolsSection;
use crate::store::{PlanRepository, RecordRepository};

pub use current_plan::{CurrentPlanTool, CURRENT_PLAN};
pub use executor::ToolExecutor;
pub use recent_records::{RecentRecordsTool, RECENT_RECORDS};
pub use registry::{Tool, ToolRegistry};
pub use schema::{plan_update_schema_json, request_schema_json};
pub use training_history::{TrainingHistoryTool, TRAINING_HISTORY};

/// 注册三个默认工具
pub fn default_registry(
    cfg: &ToolsSection,
    plans: Arc<dyn PlanRepository>,
    records: Arc<dyn RecordRepository>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(TrainingHistoryTool::new(Arc::clone(&records), cfg.history_limit));
    registry.register(CurrentPlanTool::new(plans));
    registry.register(RecentRecordsTool::new(records, cfg.recent_days, cfg.recent_limit));
    registry
}
