//! 单次运行的不可变配置与最终结果
//!
//! ExecutionConfig 在运行开始前校验（ValidationError 是唯一允许越过编排器边界的错误）；
//! ExecutionResult 每次运行只产出一次，之后不再修改。

use std::time::Duration;

use serde::Serialize;

use crate::core::ValidationError;
use crate::sandbox::SandboxMode;

/// 单次运行的配置（委派出的子任务使用同一份配置，但各自独立计数 max_iterations）
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// 单个上下文内最多 THINKING 轮数
    pub max_iterations: usize,
    /// 同一失败指纹允许的重试次数
    pub max_retries_per_tool: u32,
    /// 每轮推理调用 / 工具调用的超时
    pub iteration_timeout: Duration,
    /// 内联命令超时
    pub command_timeout: Duration,
    /// 内联命令输出上限（字符）
    pub max_command_output_chars: usize,
    /// 子任务委派最大深度（根为 0）
    pub max_depth: usize,
    /// 整棵委派树共享的迭代上限
    pub global_iteration_ceiling: usize,
    /// 连续多少次推理失败后升级为 FAILED
    pub max_consecutive_provider_failures: u32,
    pub sandbox_mode: SandboxMode,
    /// 内联命令白名单；None 表示未配置（默认全部拒绝）
    pub command_allowlist: Option<Vec<String>>,
    /// 未配置白名单时是否放行（显式开启，高风险）
    pub permissive_commands: bool,
    /// 推理模型提示（覆盖指令自带的 model）
    pub model_hint: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_retries_per_tool: 3,
            iteration_timeout: Duration::from_secs(120),
            command_timeout: Duration::from_secs(5),
            max_command_output_chars: 10_000,
            max_depth: 2,
            global_iteration_ceiling: 100,
            max_consecutive_provider_failures: 3,
            sandbox_mode: SandboxMode::Process,
            command_allowlist: None,
            permissive_commands: false,
            model_hint: None,
        }
    }
}

impl ExecutionConfig {
    /// 校验配置；任何不合法的字段都在执行开始前失败
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_iterations == 0 {
            return Err(ValidationError::config("max_iterations", "must be at least 1"));
        }
        if self.global_iteration_ceiling == 0 {
            return Err(ValidationError::config(
                "global_iteration_ceiling",
                "must be at least 1",
            ));
        }
        if self.iteration_timeout.is_zero() {
            return Err(ValidationError::config("iteration_timeout", "must be non-zero"));
        }
        if self.command_timeout.is_zero() {
            return Err(ValidationError::config("command_timeout", "must be non-zero"));
        }
        if self.max_command_output_chars == 0 {
            return Err(ValidationError::config(
                "max_command_output_chars",
                "must be at least 1",
            ));
        }
        if self.max_consecutive_provider_failures == 0 {
            return Err(ValidationError::config(
                "max_consecutive_provider_failures",
                "must be at least 1",
            ));
        }
        if let Some(list) = &self.command_allowlist {
            if list.iter().any(|entry| entry.trim().is_empty()) {
                return Err(ValidationError::config(
                    "command_allowlist",
                    "entries must not be blank",
                ));
            }
        }
        Ok(())
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_max_retries_per_tool(mut self, n: u32) -> Self {
        self.max_retries_per_tool = n;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_global_iteration_ceiling(mut self, ceiling: usize) -> Self {
        self.global_iteration_ceiling = ceiling;
        self
    }

    pub fn with_sandbox_mode(mut self, mode: SandboxMode) -> Self {
        self.sandbox_mode = mode;
        self
    }

    pub fn with_command_allowlist<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command_allowlist = Some(entries.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_iteration_timeout(mut self, timeout: Duration) -> Self {
        self.iteration_timeout = timeout;
        self
    }
}

/// 循环终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Completed,
    Exhausted,
    Failed,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Completed => "completed",
            TerminalState::Exhausted => "exhausted",
            TerminalState::Failed => "failed",
        }
    }
}

/// 运行指标
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionMetrics {
    pub duration_ms: u64,
    pub retry_count: u32,
    pub injected_commands: usize,
    pub tool_calls: usize,
    pub errors: usize,
    pub subtasks: usize,
    /// 本次运行及其子任务到达的最深委派深度
    pub max_depth_reached: usize,
}

/// 运行最终结果：成功标志、最终文本、迭代数、指标、部分结果与错误描述
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub run_id: String,
    pub task: String,
    pub success: bool,
    pub terminal: TerminalState,
    pub final_text: Option<String>,
    pub iterations_used: usize,
    pub metrics: ExecutionMetrics,
    pub partial_result: Option<String>,
    pub error: Option<String>,
}

impl ExecutionResult {
    /// 未执行任何工作就被拒绝的运行（深度 / 预算 / 指令缺失等）
    pub fn rejected(run_id: impl Into<String>, task: impl Into<String>, error: impl ToString) -> Self {
        let error = error.to_string();
        Self {
            run_id: run_id.into(),
            task: task.into(),
            success: false,
            terminal: TerminalState::Failed,
            final_text: None,
            iterations_used: 0,
            metrics: ExecutionMetrics::default(),
            partial_result: Some(format!("No work was performed: {error}")),
            error: Some(error),
        }
    }

    /// 调用方看到的文本：成功时为最终回答，否则为部分结果
    pub fn text(&self) -> &str {
        self.final_text
            .as_deref()
            .or(self.partial_result.as_deref())
            .unwrap_or("")
    }
}
