//! 各动作的生成结果解析
//!
//! - 修改计划：`---PLAN_UPDATE---` 块中的修改周合并进当前计划，块从回复中删除
//! - 分析记录：`---SUGGEST_UPDATE---` 块变为调整建议，块从分析中删除
//! - 生成计划：宏观大纲需 `macroWeeks`，周期细化需 `weeks`

use serde_json::Value;

use crate::parser::extract::{extract_json, find_marker, parse_marker_body, strip_marker, PLAN_UPDATE, SUGGEST_UPDATE};
use crate::parser::merge::merge_weeks;
use crate::parser::ParseError;

/// 修改计划的解析结果；error 为 Some 时 updated_weeks 必为 None
#[derive(Debug, Clone, Default)]
pub struct ParsedPlanUpdate {
    pub message: String,
    pub updated_weeks: Option<Vec<Value>>,
    pub error: Option<ParseError>,
}

impl ParsedPlanUpdate {
    pub fn has_update(&self) -> bool {
        self.updated_weeks.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedAnalysis {
    pub analysis: String,
    pub suggest_update: bool,
    pub update_suggestion: Option<String>,
}

/// 载荷可以是裸列表、`{modifiedWeeks: [...]}` 或 `{weeks: [...]}`
pub fn extract_modified_weeks(payload: &Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items.clone(),
        Value::Object(obj) => obj
            .get("modifiedWeeks")
            .or_else(|| obj.get("weeks"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// 解析修改回复并与当前周合并；无标记或修改为空时只返回文本
pub fn parse_plan_update(content: &str, current_weeks: &[Value]) -> ParsedPlanUpdate {
    let Some(body) = find_marker(content, &PLAN_UPDATE) else {
        return ParsedPlanUpdate {
            message: content.trim().to_string(),
            ..ParsedPlanUpdate::default()
        };
    };
    let message = strip_marker(content, &PLAN_UPDATE);

    let payload = match parse_marker_body(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(category = "parse", error = %e, "failed to parse plan update payload");
            return ParsedPlanUpdate {
                message,
                updated_weeks: None,
                error: Some(e),
            };
        }
    };

    let modified = extract_modified_weeks(&payload);
    if modified.is_empty() {
        return ParsedPlanUpdate {
            message,
            ..ParsedPlanUpdate::default()
        };
    }

    ParsedPlanUpdate {
        message,
        updated_weeks: Some(merge_weeks(current_weeks, &modified)),
        error: None,
    }
}

pub fn parse_analysis(content: &str) -> ParsedAnalysis {
    match find_marker(content, &SUGGEST_UPDATE) {
        Some(suggestion) => ParsedAnalysis {
            analysis: strip_marker(content, &SUGGEST_UPDATE),
            suggest_update: true,
            update_suggestion: Some(suggestion.to_string()),
        },
        None => ParsedAnalysis {
            analysis: content.trim().to_string(),
            ..ParsedAnalysis::default()
        },
    }
}

fn parse_with_field(content: &str, field: &'static str) -> Result<Value, ParseError> {
    let data = extract_json(content)?;
    if data.get(field).is_none() {
        return Err(ParseError::MissingField(field));
    }
    Ok(data)
}

/// 宏观大纲，必须含 macroWeeks
pub fn parse_macro_plan(content: &str) -> Result<Value, ParseError> {
    parse_with_field(content, "macroWeeks")
}

/// 周期细化，必须含 weeks
pub fn parse_cycle_detail(content: &str) -> Result<Value, ParseError> {
    parse_with_field(content, "weeks")
}
