//! 结构化输出解析：载荷定位文法、计划合并、各动作的回复解析

pub mod extract;
pub mod merge;
pub mod response;

use thiserror::Error;

use crate::core::AgentError;

pub use extract::{extract_json, extract_payload, Extracted, Marker, PayloadSource, PLAN_UPDATE, SUGGEST_UPDATE};
pub use merge::{merge_single_week, merge_weeks};
pub use response::{
    extract_modified_weeks, parse_analysis, parse_cycle_detail, parse_macro_plan, parse_plan_update,
    ParsedAnalysis, ParsedPlanUpdate,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no structured payload found")]
    NoPayload,

    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("payload missing '{0}' field")]
    MissingField(&'static str),
}

impl From<ParseError> for AgentError {
    fn from(e: ParseError) -> Self {
        AgentError::Parse(e.to_string())
    }
}
