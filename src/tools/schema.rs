//! JSON Schema 生成（schemars）
//!
//! plan_update_schema_json：修改计划时 `---PLAN_UPDATE---` 块的载荷格式，拼入 modify prompt，减少格式错误。
//! request_schema_json：编排请求格式，供 `coach schema` 输出。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

use crate::core::Request;

/// 一天的训练安排（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct DayFormat {
    /// 星期标签，与原计划一致（如 Mon / 周三）；同名的天会被整体替换
    day: String,
    /// 当天训练重点，休息日写"休息"
    focus: String,
    /// 动作列表（name、sets、reps、duration、notes…）
    exercises: Vec<Value>,
}

/// 被修改的一周
#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ModifiedWeekFormat {
    /// 从 1 开始的周序号；等于现有周数 + 1 时追加新周
    week_number: u32,
    /// 周目标（可选，提供则替换）
    summary: Option<String>,
    /// 只列出修改过的天
    days: Option<Vec<DayFormat>>,
}

/// `---PLAN_UPDATE---` 块的载荷
#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(rename_all = "camelCase")]
struct PlanUpdateFormat {
    modified_weeks: Vec<ModifiedWeekFormat>,
}

/// 返回计划更新载荷的 JSON Schema 字符串，可拼入 system prompt
pub fn plan_update_schema_json() -> String {
    let schema = schema_for!(PlanUpdateFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

pub fn request_schema_json() -> String {
    let schema = schema_for!(Request);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_update_schema_mentions_fields() {
        let s = plan_update_schema_json();
        assert!(s.contains("modifiedWeeks"));
        assert!(s.contains("weekNumber"));
        let v: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(v["required"][0], "modifiedWeeks");
    }

    #[test]
    fn test_request_schema_is_camel_case() {
        let s = request_schema_json();
        assert!(s.contains("recordData"));
        assert!(s.contains("conversationHistory"));
    }
}
