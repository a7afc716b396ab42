//! 推理决策：ToolCall / FinalAnswer / Malformed 三选一
//!
//! 线格式为单个 JSON 对象（可包在 ```json 代码块中）：
//! `{"thought": "...", "tool": "...", "args": {...}, "final_answer": "...", "done": false}`

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 一次工具调用请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCallRequest {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// 推理方单轮输出
#[derive(Debug, Clone, PartialEq)]
pub enum ReasoningDecision {
    ToolCall {
        rationale: String,
        call: ToolCallRequest,
    },
    /// 同时给出工具调用时，最终答案优先；被丢弃的调用保留用于日志
    FinalAnswer {
        rationale: String,
        answer: String,
        discarded_tool_call: Option<ToolCallRequest>,
    },
    Malformed {
        raw: String,
        reason: String,
    },
}

impl ReasoningDecision {
    pub fn tool_call(tool: impl Into<String>, args: Value) -> Self {
        Self::ToolCall {
            rationale: String::new(),
            call: ToolCallRequest::new(tool, args),
        }
    }

    pub fn final_answer(answer: impl Into<String>) -> Self {
        Self::FinalAnswer {
            rationale: String::new(),
            answer: answer.into(),
            discarded_tool_call: None,
        }
    }

    pub fn malformed(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            raw: raw.into(),
            reason: reason.into(),
        }
    }

    /// 从可选字段构造：最终答案优先；terminal 但没有答案视为 Malformed
    pub fn from_parts(
        rationale: String,
        tool_call: Option<ToolCallRequest>,
        final_answer: Option<String>,
        terminal: bool,
        raw: &str,
    ) -> Self {
        let tool_call = tool_call.filter(|c| !c.tool.trim().is_empty());
        let final_answer = final_answer.filter(|a| !a.trim().is_empty());
        match (tool_call, final_answer) {
            (call, Some(answer)) => {
                if let Some(c) = &call {
                    tracing::debug!(tool = %c.tool, "final answer takes precedence over tool call");
                }
                Self::FinalAnswer {
                    rationale,
                    answer,
                    discarded_tool_call: call,
                }
            }
            (_, None) if terminal => {
                Self::malformed(raw, "decision marked done without a final answer")
            }
            (Some(call), None) => Self::ToolCall { rationale, call },
            (None, None) => Self::malformed(raw, "decision has neither a tool call nor a final answer"),
        }
    }

    pub fn rationale(&self) -> &str {
        match self {
            Self::ToolCall { rationale, .. } | Self::FinalAnswer { rationale, .. } => rationale,
            Self::Malformed { .. } => "",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::FinalAnswer { .. })
    }
}

/// 决策线格式（同时用于生成 JSON Schema）
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct DecisionWire {
    /// 本轮推理过程（简短）
    #[serde(default, alias = "rationale")]
    pub thought: Option<String>,
    /// 要调用的工具名；给出最终答案时省略
    #[serde(default)]
    pub tool: Option<String>,
    /// 工具参数对象
    #[serde(default)]
    pub args: Option<Value>,
    /// 任务完成时的最终答案
    #[serde(default, alias = "answer")]
    pub final_answer: Option<String>,
    /// 是否结束；为 true 时必须提供 final_answer
    #[serde(default)]
    pub done: Option<bool>,
}

/// 提取 JSON 块（```json ... ``` 或首个 `{` 到末个 `}`）
fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析 LLM 回复；没有可解析 JSON 时为 Malformed
pub fn parse_decision(text: &str) -> ReasoningDecision {
    let Some(json) = extract_json(text) else {
        return ReasoningDecision::malformed(text, "reply contains no JSON decision object");
    };
    let wire: DecisionWire = match serde_json::from_str(json) {
        Ok(w) => w,
        Err(e) => return ReasoningDecision::malformed(text, format!("invalid decision JSON: {e}")),
    };
    let call = wire.tool.map(|tool| ToolCallRequest {
        tool: tool.trim().to_string(),
        args: wire.args.unwrap_or_else(|| Value::Object(Default::default())),
    });
    ReasoningDecision::from_parts(
        wire.thought.unwrap_or_default(),
        call,
        wire.final_answer,
        wire.done.unwrap_or(false),
        text,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tool_call_in_fence() {
        let text = "Let me look.\n```json\n{\"thought\": \"list\", \"tool\": \"ls\", \"args\": {\"path\": \".\"}}\n```";
        match parse_decision(text) {
            ReasoningDecision::ToolCall { rationale, call } => {
                assert_eq!(rationale, "list");
                assert_eq!(call.tool, "ls");
                assert_eq!(call.args, json!({"path": "."}));
            }
            other => panic!("Expected ToolCall, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_final_answer() {
        let d = parse_decision(r#"{"thought":"done","final_answer":"42","done":true}"#);
        assert_eq!(
            d,
            ReasoningDecision::FinalAnswer {
                rationale: "done".into(),
                answer: "42".into(),
                discarded_tool_call: None
            }
        );
    }

    #[test]
    fn test_final_answer_wins_over_tool_call() {
        let d = parse_decision(r#"{"tool":"cat","args":{"path":"a"},"final_answer":"ok"}"#);
        match d {
            ReasoningDecision::FinalAnswer {
                answer,
                discarded_tool_call,
                ..
            } => {
                assert_eq!(answer, "ok");
                assert_eq!(discarded_tool_call.unwrap().tool, "cat");
            }
            other => panic!("Expected FinalAnswer, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_cases() {
        assert!(matches!(parse_decision("I think we are done."), ReasoningDecision::Malformed { .. }));
        assert!(matches!(parse_decision(r#"{"thought":"hmm"}"#), ReasoningDecision::Malformed { .. }));
        assert!(matches!(parse_decision(r#"{"done":true,"tool":"ls"}"#), ReasoningDecision::Malformed { .. }));
        assert!(matches!(parse_decision("{not json}"), ReasoningDecision::Malformed { .. }));
        assert!(matches!(parse_decision(r#"{"tool":"  "}"#), ReasoningDecision::Malformed { .. }));
    }

    #[test]
    fn test_missing_args_default_to_empty_object() {
        match parse_decision(r#"{"tool":"echo"}"#) {
            ReasoningDecision::ToolCall { call, .. } => assert_eq!(call.args, json!({})),
            other => panic!("Expected ToolCall, got {other:?}"),
        }
    }
}
