//! 从生成文本中定位结构化载荷
//!
//! 文法（按优先级）：
//! 1. `` ```json `` 围栏块
//! 2. 任意 `` ``` `` 围栏块
//! 3. 标记块 `---NAME---` … `---END_NAME---`
//! 4. 第一个平衡的 `{ … }` 子串（跳过字符串字面量中的括号）
//!
//! 找到的载荷必须是合法 JSON，否则返回 ParseError，不做部分解析。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::parser::ParseError;

/// 一对起止标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    pub begin: &'static str,
    pub end: &'static str,
}

pub const PLAN_UPDATE: Marker = Marker {
    begin: "---PLAN_UPDATE---",
    end: "---END_PLAN_UPDATE---",
};

pub const SUGGEST_UPDATE: Marker = Marker {
    begin: "---SUGGEST_UPDATE---",
    end: "---END_SUGGEST_UPDATE---",
};

const KNOWN_MARKERS: [Marker; 2] = [PLAN_UPDATE, SUGGEST_UPDATE];

/// 载荷来自哪条规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    FencedJson,
    Fenced,
    Marker,
    Braces,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted<'a> {
    pub source: PayloadSource,
    pub body: &'a str,
}

static FENCED_JSON_RE: OnceLock<Regex> = OnceLock::new();
static FENCED_ANY_RE: OnceLock<Regex> = OnceLock::new();

fn fenced_json_re() -> &'static Regex {
    FENCED_JSON_RE.get_or_init(|| {
        Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("fenced json pattern is a constant")
    })
}

fn fenced_any_re() -> &'static Regex {
    FENCED_ANY_RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)\s*```").expect("fenced block pattern is a constant")
    })
}

/// `` ```json `` 块内容
pub fn find_fenced_json(text: &str) -> Option<&str> {
    fenced_json_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// 任意围栏块内容（语言标签被跳过）
pub fn find_fenced(text: &str) -> Option<&str> {
    fenced_any_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// 标记块内容（已去首尾空白）；缺少结束标记时视为不存在
pub fn find_marker<'a>(text: &'a str, marker: &Marker) -> Option<&'a str> {
    let start = text.find(marker.begin)? + marker.begin.len();
    let len = text[start..].find(marker.end)?;
    Some(text[start..start + len].trim())
}

/// 删除所有完整的标记块，返回去首尾空白后的文本
pub fn strip_marker(text: &str, marker: &Marker) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(begin) = rest.find(marker.begin) {
        let after = begin + marker.begin.len();
        match rest[after..].find(marker.end) {
            Some(end) => {
                out.push_str(&rest[..begin]);
                rest = &rest[after + end + marker.end.len()..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// 第一个 `{` 到与之匹配的 `}`；字符串内的括号与转义不计入深度
pub fn find_balanced_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 按文法优先级定位载荷
pub fn extract_payload(text: &str) -> Option<Extracted<'_>> {
    if let Some(body) = find_fenced_json(text) {
        return Some(Extracted {
            source: PayloadSource::FencedJson,
            body,
        });
    }
    if let Some(body) = find_fenced(text) {
        return Some(Extracted {
            source: PayloadSource::Fenced,
            body,
        });
    }
    if let Some(body) = KNOWN_MARKERS.iter().find_map(|m| find_marker(text, m)) {
        return Some(Extracted {
            source: PayloadSource::Marker,
            body,
        });
    }
    find_balanced_braces(text).map(|body| Extracted {
        source: PayloadSource::Braces,
        body,
    })
}

/// 定位并解析 JSON 载荷
pub fn extract_json(text: &str) -> Result<Value, ParseError> {
    let extracted = extract_payload(text).ok_or(ParseError::NoPayload)?;
    parse_body(extracted.body)
}

/// 标记块内的载荷：可以是围栏块、裸 JSON（对象或列表）、或夹杂说明文字的对象
pub fn parse_marker_body(body: &str) -> Result<Value, ParseError> {
    if let Some(inner) = find_fenced_json(body).or_else(|| find_fenced(body)) {
        return parse_body(inner);
    }
    match serde_json::from_str(body.trim()) {
        Ok(value) => Ok(value),
        Err(e) => match find_balanced_braces(body) {
            Some(inner) => parse_body(inner),
            None => Err(ParseError::InvalidJson(e.to_string())),
        },
    }
}

fn parse_body(body: &str) -> Result<Value, ParseError> {
    serde_json::from_str(body.trim()).map_err(|e| ParseError::InvalidJson(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_fenced_json_first() {
        let text = "前言 {\"a\": 0}\n```\n{\"a\": 1}\n```\n```json\n{\"a\": 2}\n```";
        let e = extract_payload(text).unwrap();
        assert_eq!(e.source, PayloadSource::FencedJson);
        assert_eq!(extract_json(text).unwrap(), json!({"a": 2}));
    }

    #[test]
    fn test_plain_fence_skips_language_tag() {
        let text = "```javascript\n{\"a\": 1}\n```";
        assert_eq!(extract_payload(text).unwrap().source, PayloadSource::Fenced);
        assert_eq!(extract_json(text).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_marker_before_braces() {
        let text = "说明 {不是json}\n---PLAN_UPDATE---\n[{\"weekNumber\": 1}]\n---END_PLAN_UPDATE---";
        let e = extract_payload(text).unwrap();
        assert_eq!(e.source, PayloadSource::Marker);
        assert_eq!(extract_json(text).unwrap(), json!([{"weekNumber": 1}]));
    }

    #[test]
    fn test_balanced_braces_ignores_string_contents() {
        let text = r#"结果如下：{"note": "包含 } 和 { 的文本", "n": {"x": 1}} 之后还有 {"y": 2}"#;
        let body = find_balanced_braces(text).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(body).unwrap(),
            json!({"note": "包含 } 和 { 的文本", "n": {"x": 1}})
        );
    }

    #[test]
    fn test_unbalanced_and_missing() {
        assert!(find_balanced_braces("{\"a\": 1").is_none());
        assert!(matches!(extract_json("纯文本回复"), Err(ParseError::NoPayload)));
        assert!(matches!(
            extract_json("```json\n{bad json}\n```"),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_marker_requires_end() {
        assert!(find_marker("---PLAN_UPDATE--- {}", &PLAN_UPDATE).is_none());
        assert_eq!(
            find_marker("a ---SUGGEST_UPDATE---\n减量\n---END_SUGGEST_UPDATE--- b", &SUGGEST_UPDATE),
            Some("减量")
        );
    }

    #[test]
    fn test_strip_marker() {
        let text = "好的，已调整。\n---PLAN_UPDATE---\n[]\n---END_PLAN_UPDATE---\n祝训练顺利";
        assert_eq!(strip_marker(text, &PLAN_UPDATE), "好的，已调整。\n\n祝训练顺利");
    }

    #[test]
    fn test_marker_body_forms() {
        assert_eq!(parse_marker_body("[1, 2]").unwrap(), json!([1, 2]));
        assert_eq!(
            parse_marker_body("```json\n{\"weeks\": []}\n```").unwrap(),
            json!({"weeks": []})
        );
        assert_eq!(
            parse_marker_body("修改如下 {\"modifiedWeeks\": []}").unwrap(),
            json!({"modifiedWeeks": []})
        );
        assert!(parse_marker_body("没有结构").is_err());
    }
}
