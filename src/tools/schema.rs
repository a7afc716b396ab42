//! 决策格式 JSON Schema（schemars 自动生成）
//!
//! 拼入提示词，减少推理方输出格式错误。

use schemars::schema_for;

use crate::react::decision::DecisionWire;

/// 决策对象的 JSON Schema 字符串
pub fn decision_schema_json() -> String {
    let schema = schema_for!(DecisionWire);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
