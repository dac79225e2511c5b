//! 计划局部更新合并
//!
//! 对每个被修改的周：idx = weekNumber - 1
//! - idx 在现有范围内：有 summary 则替换；days 中每一天按 `day` 标签替换同名天，找不到则追加，未提及的天保持不变
//! - idx 恰好等于现有周数：作为新周追加
//! - 更靠后：丢弃（只允许连续追加），记 warn
//!
//! 不修改输入，返回新的周列表。

use serde_json::Value;

fn week_number(week: &Value) -> Option<i64> {
    week.get("weekNumber").and_then(Value::as_i64)
}

/// 把 modified 合并进 current，返回新的周列表
pub fn merge_weeks(current: &[Value], modified: &[Value]) -> Vec<Value> {
    let mut result = current.to_vec();

    for m_week in modified {
        let Some(number) = week_number(m_week) else {
            tracing::debug!("skipping modified week without integer weekNumber");
            continue;
        };
        let idx = number - 1;
        let len = result.len() as i64;

        if (0..len).contains(&idx) {
            let slot = idx as usize;
            result[slot] = merge_single_week(&result[slot], m_week);
        } else if idx == len {
            result.push(m_week.clone());
        } else {
            tracing::warn!(
                week_number = number,
                current_weeks = len,
                "dropping modified week beyond plan end"
            );
        }
    }
    result
}

/// 合并单周：summary 覆盖，days 按标签替换或追加
pub fn merge_single_week(existing: &Value, modified: &Value) -> Value {
    let mut merged = existing.clone();
    let Some(obj) = merged.as_object_mut() else {
        return modified.clone();
    };

    if let Some(summary) = modified.get("summary") {
        obj.insert("summary".to_string(), summary.clone());
    }

    if let Some(m_days) = modified.get("days").and_then(Value::as_array) {
        let mut days = obj
            .get("days")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for m_day in m_days {
            let label = m_day.get("day");
            match days.iter().position(|d| label.is_some() && d.get("day") == label) {
                Some(i) => days[i] = m_day.clone(),
                None => days.push(m_day.clone()),
            }
        }
        obj.insert("days".to_string(), Value::Array(days));
    }
    merged
}
