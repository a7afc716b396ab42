//! 循环状态：ExecutionState 与阶段定义
//!
//! ExecutionState 由单个循环实例独占：循环开始时创建，只被循环和恢复策略修改，循环结束即丢弃
//! （最终 ExecutionResult 是唯一持久的产出）。

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::recovery::Fingerprint;

/// 部分结果片段最多保留条数
const MAX_FRAGMENTS: usize = 8;
/// 单个片段预览字符数
const FRAGMENT_PREVIEW_CHARS: usize = 300;

/// ReAct 状态机阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Thinking,
    Acting,
    Observing,
    Completed,
    Exhausted,
    Failed,
}

impl LoopPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopPhase::Completed | LoopPhase::Exhausted | LoopPhase::Failed
        )
    }
}

/// 观察记录的来源
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObservationKind {
    ToolResult { tool: String, success: bool },
    ProviderError,
    Malformed,
    Recovery,
}

/// 一轮观察
#[derive(Clone, Debug, Serialize)]
pub struct Observation {
    pub iteration: usize,
    pub kind: ObservationKind,
    pub content: String,
}

/// 单个失败指纹的记录
#[derive(Clone, Debug, Default)]
pub struct FailureRecord {
    pub attempts: u32,
    pub exhausted: bool,
    pub last_error: String,
}

/// 成功工具调用留下的有用输出
#[derive(Clone, Debug)]
pub struct OutputFragment {
    pub tool: String,
    pub preview: String,
}

/// 单次循环的可变状态
#[derive(Debug)]
pub struct ExecutionState {
    pub iteration: usize,
    pub phase: LoopPhase,
    pub observations: Vec<Observation>,
    pub failed_approaches: HashMap<Fingerprint, FailureRecord>,
    pub loaded_references: HashSet<String>,
    pub fragments: Vec<OutputFragment>,
    pub successful_calls: usize,
    pub tool_calls: usize,
    pub error_count: usize,
    pub retry_count: u32,
    pub consecutive_provider_failures: u32,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            iteration: 0,
            phase: LoopPhase::Thinking,
            observations: Vec::new(),
            failed_approaches: HashMap::new(),
            loaded_references: HashSet::new(),
            fragments: Vec::new(),
            successful_calls: 0,
            tool_calls: 0,
            error_count: 0,
            retry_count: 0,
            consecutive_provider_failures: 0,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn observe(&mut self, kind: ObservationKind, content: impl Into<String>) {
        self.observations.push(Observation {
            iteration: self.iteration,
            kind,
            content: content.into(),
        });
    }

    /// 记录一次成功工具调用，并保留其输出预览作为部分结果素材
    pub fn record_success(&mut self, tool: &str, output: &str) {
        self.successful_calls += 1;
        let trimmed = output.trim();
        if trimmed.is_empty() {
            return;
        }
        let mut preview: String = trimmed.chars().take(FRAGMENT_PREVIEW_CHARS).collect();
        if trimmed.chars().count() > FRAGMENT_PREVIEW_CHARS {
            preview.push_str("...");
        }
        if self.fragments.len() >= MAX_FRAGMENTS {
            self.fragments.remove(0);
        }
        self.fragments.push(OutputFragment {
            tool: tool.to_string(),
            preview,
        });
    }

    pub fn record_error(&mut self) {
        self.error_count += 1;
    }
}
