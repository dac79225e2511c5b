//! Prompt 组装
//!
//! 每个动作的 system prompt = 教练人设 + 任务说明 + 记忆上下文；user prompt 由请求数据格式化而来。
//! 修改计划的任务说明里嵌入 `---PLAN_UPDATE---` 载荷的 JSON Schema。

use serde_json::{json, Map, Value};

use crate::memory::{Message, Role};
use crate::tools::{plan_update_schema_json, CURRENT_PLAN, RECENT_RECORDS, TRAINING_HISTORY};

/// 对话历史最多带入的条数
pub const HISTORY_WINDOW: usize = 6;

pub const SYSTEM_PROMPT: &str = "你是一名经验丰富的专业运动教练，擅长耐力项目与力量训练的周期化设计。\
你会根据用户的身体状况、目标与可用时间制定科学、可执行的训练安排，\
回答专业、具体、语气亲切，全部使用中文。";

pub const MACRO_PLAN_PROMPT: &str = r#"### 任务：生成宏观训练大纲
请为用户规划整个训练周期的宏观大纲，每周给出训练重点与强度安排，不需要细化到具体动作。

只输出一个 JSON 代码块，格式如下：
```json
{
  "totalWeeks": 12,
  "macroWeeks": [
    {"weekNumber": 1, "phase": "基础期", "focus": "有氧基础与动作模式", "intensity": "低"}
  ]
}
```"#;

pub const CYCLE_DETAIL_PROMPT: &str = r#"### 任务：细化训练周期
请把下面给出的宏观大纲逐周细化为每天的训练安排，训练日与可用时长必须与问卷一致，休息日 focus 写"休息"。

只输出一个 JSON 代码块，格式如下：
```json
{
  "weeks": [
    {
      "weekNumber": 1,
      "summary": "本周目标",
      "days": [
        {"day": "周一", "focus": "力量", "exercises": [{"name": "深蹲", "sets": 3, "reps": "10", "notes": ""}]}
      ]
    }
  ]
}
```"#;

const MODIFY_PROMPT_HEAD: &str = r#"### 任务：通过对话调整训练计划
用户会用自然语言提出调整需求。请先用简洁的文字说明你做了哪些调整以及原因。
如果需要修改计划，在回复末尾附上修改内容，只包含被修改的周，每周只列出修改过的天：

---PLAN_UPDATE---
```json
{"modifiedWeeks": [{"weekNumber": 2, "days": [{"day": "周三", "focus": "休息", "exercises": []}]}]}
```
---END_PLAN_UPDATE---

如果用户只是咨询、不需要修改计划，不要输出 PLAN_UPDATE 块。
新增一周时 weekNumber 取现有周数 + 1。"#;

pub const ANALYSIS_PROMPT: &str = r#"### 任务：训练记录分析
请根据用户本次运动记录以及近期训练情况进行专业分析，回复包含：
1. 训练评估：完成情况与强度是否合适
2. 身体反馈解读：根据 RPE 和心率判断恢复状态
3. 专业建议：下一次训练的调整方向，以及恢复与营养建议
4. 一句鼓励的话

如果你认为训练计划需要调整，在回复末尾添加：

---SUGGEST_UPDATE---
简要说明为什么建议调整计划，以及建议的调整方向。
---END_SUGGEST_UPDATE---"#;

/// 一次调用的 system + user prompt
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// 无历史的两条消息
    pub fn into_messages(self) -> Vec<Message> {
        vec![Message::system(self.system), Message::user(self.user)]
    }

    /// system、最近 HISTORY_WINDOW 条历史、user
    pub fn into_messages_with_history(self, history: &[Message]) -> Vec<Message> {
        build_conversation_messages(&self.system, &self.user, history)
    }
}

pub fn build_conversation_messages(system: &str, user: &str, history: &[Message]) -> Vec<Message> {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let mut messages = Vec::with_capacity(history.len() - start + 2);
    messages.push(Message::system(system));
    for msg in &history[start..] {
        // 历史中的 system 消息按 assistant 处理
        messages.push(match msg.role {
            Role::User => Message::user(msg.content.clone()),
            _ => Message::assistant(msg.content.clone()),
        });
    }
    messages.push(Message::user(user));
    messages
}

fn system_with_context(task: &str, heading: &str, context: &str) -> String {
    let mut system = format!("{}\n\n{}", SYSTEM_PROMPT, task);
    if !context.trim().is_empty() {
        system.push_str(&format!("\n\n### {}\n{}", heading, context));
    }
    system
}

/// 字符串原样输出，其余 JSON 值按紧凑格式；缺失或空时用默认值
fn field(map: &Map<String, Value>, key: &str, default: &str) -> String {
    match map.get(key) {
        None | Some(Value::Null) => default.to_string(),
        Some(Value::String(s)) if s.trim().is_empty() => default.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

fn pretty(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "[]".to_string())
}

/// 训练日：`[{day, duration}]` 或 `["周一", ...]`
fn format_training_days(raw: Option<&Value>) -> String {
    let Some(items) = raw.and_then(Value::as_array).filter(|a| !a.is_empty()) else {
        return String::new();
    };
    if items[0].get("day").is_some() {
        items
            .iter()
            .map(|item| {
                let day = item.get("day").and_then(Value::as_str).unwrap_or("");
                let duration = item.get("duration").and_then(Value::as_i64).unwrap_or(30);
                format!("{}（可用时长：{}分钟）", day, duration)
            })
            .collect::<Vec<_>>()
            .join("\n  ")
    } else {
        items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("、")
    }
}

fn format_equipment(raw: Option<&Value>) -> String {
    match raw {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("、"),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn or_unfilled(s: String) -> String {
    if s.is_empty() {
        "未填写".to_string()
    } else {
        s
    }
}

/// 用户问卷格式化为 prompt 文本
pub fn format_user_profile(profile: &Map<String, Value>) -> String {
    let target_date = field(profile, "targetDate", "未填写");
    let training_weeks = field(profile, "trainingWeeks", "4");
    format!(
        "### 用户问卷数据\n\n\
**基本信息：**\n\
- 性别: {gender}\n\
- 年龄: {age}岁\n\
- 身高: {height}cm\n\
- 体重: {weight}kg\n\n\
**训练目标：**\n\
- 主要训练项目: {item}\n\
- 主要目标: {goal}\n\
- 目标完成日期: {target_date}\n\
- 当前水平: {level}\n\n\
**训练时间规划：**\n\
- 计划开始日期: {start_date}\n\
- 训练周期: {training_weeks} 周\n\n\
**训练安排：**\n\
- 训练日及可用时长:\n  {days}\n\
- 可用器材: {equipment}\n\n\
**重要约束：请根据每天的可用训练时长来安排训练内容，确保当天的训练总时长不超过用户指定的可用时间。**\n\n\
**健康状况：**\n\
- 伤病史/身体限制: {injuries}\n\n\
**其他需求：**\n{additional}\n\n\
---\n\n\
请根据以上信息，为该用户生成一份科学、个性化的 **{training_weeks} 周** 训练计划，\
帮助用户在目标日期（{target_date}）前达成训练目标。",
        gender = field(profile, "gender", "未填写"),
        age = field(profile, "age", "未填写"),
        height = field(profile, "height", "未填写"),
        weight = field(profile, "weight", "未填写"),
        item = field(profile, "item", "未填写"),
        goal = field(profile, "goal", "未填写"),
        level = field(profile, "level", "未填写"),
        start_date = field(profile, "startDate", "未填写"),
        days = or_unfilled(format_training_days(profile.get("frequency"))),
        equipment = or_unfilled(format_equipment(profile.get("equipment"))),
        injuries = field(profile, "injuries", "无"),
        additional = field(profile, "additional", "无特殊需求"),
        target_date = target_date,
        training_weeks = training_weeks,
    )
}

/// 已拉取的训练历史；为空时返回空串
fn format_training_history(tool_results: &Map<String, Value>) -> String {
    match tool_results.get(TRAINING_HISTORY).and_then(Value::as_array) {
        Some(items) if !items.is_empty() => format!(
            "\n\n### 历史训练记录（最近 {} 次）\n```json\n{}\n```",
            items.len(),
            pretty(items)
        ),
        _ => String::new(),
    }
}

pub fn build_macro_plan_prompt(
    profile: &Map<String, Value>,
    context: &str,
    tool_results: &Map<String, Value>,
) -> Prompt {
    Prompt {
        system: system_with_context(MACRO_PLAN_PROMPT, "相关上下文", context),
        user: format!("{}{}", format_user_profile(profile), format_training_history(tool_results)),
    }
}

pub fn build_cycle_detail_prompt(
    profile: &Map<String, Value>,
    macro_weeks: &[Value],
    context: &str,
) -> Prompt {
    Prompt {
        system: system_with_context(CYCLE_DETAIL_PROMPT, "相关上下文", context),
        user: format!(
            "{}\n\n### 需要细化的宏观大纲\n```json\n{}\n```",
            format_user_profile(profile),
            pretty(&macro_weeks)
        ),
    }
}

/// 计划概览：每周的 weekNumber、summary 与每天的 focus、动作数
fn plan_overview(weeks: &[Value]) -> Vec<Value> {
    weeks
        .iter()
        .map(|week| {
            let days: Vec<Value> = week
                .get("days")
                .and_then(Value::as_array)
                .map(|days| {
                    days.iter()
                        .map(|day| {
                            json!({
                                "day": day.get("day").cloned().unwrap_or(Value::Null),
                                "focus": day.get("focus").cloned().unwrap_or(Value::Null),
                                "exerciseCount": day
                                    .get("exercises")
                                    .and_then(Value::as_array)
                                    .map_or(0, Vec::len),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            json!({
                "weekNumber": week.get("weekNumber").cloned().unwrap_or(Value::Null),
                "summary": week.get("summary").cloned().unwrap_or(Value::Null),
                "days": days,
            })
        })
        .collect()
}

pub fn build_modify_plan_prompt(weeks: &[Value], user_message: &str, context: &str) -> Prompt {
    let task = format!(
        "{}\n\n载荷的 JSON Schema：\n```json\n{}\n```",
        MODIFY_PROMPT_HEAD,
        plan_update_schema_json()
    );
    Prompt {
        system: system_with_context(&task, "相关上下文", context),
        user: format!(
            "### 当前训练计划概览\n```json\n{}\n```\n\n### 完整计划数据（用于修改）\n```json\n{}\n```\n\n### 用户请求\n{}",
            pretty(&plan_overview(weeks)),
            pretty(&weeks),
            user_message
        ),
    }
}

pub fn build_analyze_record_prompt(
    record: &Map<String, Value>,
    context: &str,
    tool_results: &Map<String, Value>,
) -> Prompt {
    let mut lines = vec![
        "### 用户本次运动记录".to_string(),
        format!("**运动类型：** {}", field(record, "type", "未知")),
        format!("**训练时长：** {}分钟", field(record, "duration", "0")),
        format!("**自感疲劳度（RPE 1-10）：** {}", field(record, "rpe", "5")),
    ];
    if let Some(hr) = record.get("heartRate").filter(|v| !v.is_null()) {
        let avg = hr.get("avg").cloned().unwrap_or_else(|| hr.clone());
        let avg = avg.as_str().map(String::from).unwrap_or_else(|| avg.to_string());
        lines.push(format!("**平均心率：** {} bpm", avg));
    }
    if let Some(notes) = record.get("notes").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        lines.push(format!("**用户备注：** \"{}\"", notes));
    }

    if let Some(recent) = tool_results
        .get(RECENT_RECORDS)
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty())
    {
        lines.push(String::new());
        lines.push(format!("### 近期训练记录（{} 条）", recent.len()));
        lines.push(format!("```json\n{}\n```", pretty(recent)));
    }
    if let Some(plan) = tool_results.get(CURRENT_PLAN).filter(|v| !v.is_null()) {
        let weeks = plan.get("weeks").and_then(Value::as_array).cloned().unwrap_or_default();
        lines.push(String::new());
        lines.push("### 当前训练计划概览".to_string());
        lines.push(format!("```json\n{}\n```", pretty(&plan_overview(&weeks))));
    }

    lines.push("\n---\n".to_string());
    lines.push("请根据以上数据，提供专业的训练分析和建议。".to_string());
    lines.push("如果根据分析结果，你认为用户的训练计划需要调整，请在回复中包含调整建议。".to_string());

    Prompt {
        system: system_with_context(ANALYSIS_PROMPT, "相关训练历史", context),
        user: lines.join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_profile_formatting_defaults_and_days() {
        let text = format_user_profile(&obj(json!({
            "goal": "半马破二",
            "age": 30,
            "frequency": [{"day": "周一", "duration": 45}, {"day": "周四"}],
            "equipment": ["哑铃", "跑步机"]
        })));
        assert!(text.contains("- 主要目标: 半马破二"));
        assert!(text.contains("- 年龄: 30岁"));
        assert!(text.contains("周一（可用时长：45分钟）\n  周四（可用时长：30分钟）"));
        assert!(text.contains("哑铃、跑步机"));
        assert!(text.contains("- 性别: 未填写"));
        assert!(text.contains("**4 周**"));
    }

    #[test]
    fn test_context_block_only_when_present() {
        let empty = build_macro_plan_prompt(&Map::new(), "", &Map::new());
        assert!(!empty.system.contains("### 相关上下文"));
        let with = build_macro_plan_prompt(&Map::new(), "上次训练膝盖不适", &Map::new());
        assert!(with.system.ends_with("### 相关上下文\n上次训练膝盖不适"));
    }

    #[test]
    fn test_history_window_keeps_last_six() {
        let history: Vec<Message> = (0..10)
            .map(|i| if i % 2 == 0 { Message::user(format!("u{i}")) } else { Message::assistant(format!("a{i}")) })
            .collect();
        let messages = build_conversation_messages("sys", "now", &history);
        assert_eq!(messages.len(), 8);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "u4");
        assert_eq!(messages[7].content, "now");
    }

    #[test]
    fn test_modify_prompt_sections() {
        let weeks = vec![json!({"weekNumber": 1, "summary": "适应", "days": [
            {"day": "周三", "focus": "跑步", "exercises": [{"name": "慢跑"}, {"name": "拉伸"}]}
        ]})];
        let p = build_modify_plan_prompt(&weeks, "周三改成休息", "");
        assert!(p.system.contains("---PLAN_UPDATE---"));
        assert!(p.system.contains("modifiedWeeks"));
        assert!(p.user.contains("\"exerciseCount\": 2"));
        assert!(p.user.contains("### 完整计划数据（用于修改）"));
        assert!(p.user.ends_with("### 用户请求\n周三改成休息"));
    }

    #[test]
    fn test_analyze_prompt_uses_record_and_tools() {
        let record = obj(json!({"type": "跑步", "duration": 40, "heartRate": {"avg": 152}, "notes": "最后5公里很累"}));
        let mut tools = Map::new();
        tools.insert(RECENT_RECORDS.to_string(), json!([{"id": "r0", "type": "骑行"}]));
        tools.insert(CURRENT_PLAN.to_string(), Value::Null);
        let p = build_analyze_record_prompt(&record, "记忆", &tools);
        assert!(p.system.contains("### 相关训练历史\n记忆"));
        assert!(p.user.contains("**运动类型：** 跑步"));
        assert!(p.user.contains("**自感疲劳度（RPE 1-10）：** 5"));
        assert!(p.user.contains("**平均心率：** 152 bpm"));
        assert!(p.user.contains("\"最后5公里很累\""));
        assert!(p.user.contains("### 近期训练记录（1 条）"));
        assert!(!p.user.contains("### 当前训练计划概览"));
    }
}
