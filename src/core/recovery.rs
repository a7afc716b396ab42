//! 错误恢复策略
//!
//! 以「工具名 + 规范化参数摘要」为指纹统计失败次数：未到上限返回 Retry，到达上限返回 Abandon 并标记耗尽；
//! 循环未得到最终回答而终止时，合成部分结果报告，避免调用方只看到一个空失败。

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::{ExecutionState, RecoveryDirective};

/// 有用输出在部分结果中最多列出条数
const MAX_LISTED_OUTPUTS: usize = 5;

/// 失败方案指纹：工具名 + 参数 SHA-256 前 16 位十六进制
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// serde_json::Map 按键排序序列化，同一组参数无论键顺序如何都得到同一摘要
    pub fn new(tool: &str, args: &Value) -> Self {
        let canonical = args.to_string();
        let digest = Sha256::digest(canonical.as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        Self(format!("{tool}:{hex}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn tool(&self) -> &str {
        self.0.split(':').next().unwrap_or("")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 错误恢复策略：只持有上限，计数存放在 ExecutionState 中
#[derive(Debug, Clone)]
pub struct ErrorRecoveryPolicy {
    max_retries_per_tool: u32,
}

impl ErrorRecoveryPolicy {
    pub fn new(max_retries_per_tool: u32) -> Self {
        Self {
            max_retries_per_tool,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries_per_tool
    }

    /// 该指纹是否已被放弃（放弃后不再派发）
    pub fn is_exhausted(&self, state: &ExecutionState, fingerprint: &Fingerprint) -> bool {
        state
            .failed_approaches
            .get(fingerprint)
            .map(|r| r.exhausted)
            .unwrap_or(false)
    }

    /// 记录一次工具失败并返回恢复指令
    pub fn on_tool_failure(
        &self,
        state: &mut ExecutionState,
        fingerprint: &Fingerprint,
        error: &str,
    ) -> RecoveryDirective {
        let record = state.failed_approaches.entry(fingerprint.clone()).or_default();
        record.last_error = error.to_string();
        let tool = fingerprint.tool();

        if record.exhausted {
            return RecoveryDirective::Abandon {
                attempts: record.attempts,
                already_exhausted: true,
                prompt: format!(
                    "The approach '{tool}' with these arguments was already abandoned. \
                     Do not repeat it; choose a different tool or a different strategy."
                ),
            };
        }

        record.attempts += 1;
        let attempt = record.attempts;
        if attempt <= self.max_retries_per_tool {
            state.retry_count += 1;
            let remaining = self.max_retries_per_tool - attempt;
            RecoveryDirective::Retry {
                attempt,
                remaining,
                prompt: format!(
                    "Tool '{tool}' failed (attempt {attempt}): {error}. \
                     Retry, or adjust the arguments. {remaining} retries left for this exact call."
                ),
            }
        } else {
            record.exhausted = true;
            tracing::info!(fingerprint = %fingerprint, attempts = attempt, "approach abandoned");
            RecoveryDirective::Abandon {
                attempts: attempt,
                already_exhausted: false,
                prompt: format!(
                    "Tool '{tool}' failed {attempt} times with the same arguments: {error}. \
                     Abandon this approach and try something else."
                ),
            }
        }
    }

    /// 合成部分结果报告：已部分完成的目标数、有用输出列表、错误数
    pub fn synthesize_partial(&self, state: &ExecutionState, reason: &str) -> String {
        let mut s = format!(
            "Task did not reach a final answer ({reason}) after {} iteration(s).\n",
            state.iteration
        );
        s.push_str(&format!(
            "Objectives partially completed: {}\n",
            state.successful_calls
        ));
        if state.fragments.is_empty() {
            s.push_str("Useful outputs: none\n");
        } else {
            s.push_str("Useful outputs:\n");
            let skip = state.fragments.len().saturating_sub(MAX_LISTED_OUTPUTS);
            for fragment in state.fragments.iter().skip(skip) {
                s.push_str(&format!("- [{}] {}\n", fragment.tool, fragment.preview));
            }
        }
        s.push_str(&format!("Errors encountered: {}", state.error_count));
        s
    }
}

/// 推理输出既无工具调用也无最终回答时，反馈给下一轮的提示
pub fn malformed_decision_prompt(reason: &str) -> String {
    format!(
        "Your previous reply could not be used ({reason}). \
         Reply with exactly one JSON object: either {{\"thought\": \"...\", \"tool\": \"<name>\", \"args\": {{...}}}} \
         to use a tool, or {{\"thought\": \"...\", \"final_answer\": \"...\", \"done\": true}} when finished. \
         Please use a tool or give the final answer."
    )
}

/// 推理调用失败（可恢复）时写入对话的提示
pub fn provider_failure_prompt(error: &str, consecutive: u32, limit: u32) -> String {
    format!(
        "The reasoning step failed ({error}); consecutive failures {consecutive}/{limit}. Continue from the last observation."
    )
}
