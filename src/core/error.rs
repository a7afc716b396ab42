//! 引擎错误类型与恢复指令
//!
//! 与 ErrorRecoveryPolicy 配合：工具失败映射为 Retry / Abandon；
//! 编排器边界只放行 ValidationError，其余错误一律折叠进 ExecutionResult。

use std::time::Duration;

use thiserror::Error;

use crate::preprocess::policy::PolicyRejection;
use crate::sandbox::SandboxError;

/// 配置或请求本身不合法：在分配任何资源之前失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid config: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("invalid task name: {0}")]
    InvalidTaskName(String),

    #[error("unknown sandbox mode: {0}")]
    UnknownSandboxMode(String),

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
}

impl ValidationError {
    pub fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

/// 推理提供方调用失败（网络、超时、不可达）
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("reasoning provider unavailable: {0}")]
    Unavailable(String),

    #[error("reasoning provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("reasoning provider rejected request: {0}")]
    Rejected(String),
}

/// 引擎运行过程中可能出现的错误（深度、预算、工具、沙箱、取消等）
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("delegation depth exceeded: child depth {depth} > max depth {max_depth}")]
    DepthExceeded { depth: usize, max_depth: usize },

    #[error("global iteration budget exhausted ({consumed}/{ceiling})")]
    BudgetExceeded { consumed: usize, ceiling: usize },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("command rejected by {rule}: {command}")]
    SecurityRejection { command: String, rule: String },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("instructions not found for task '{0}'")]
    InstructionsNotFound(String),

    #[error("instructions for task '{task}' are invalid: {reason}")]
    InvalidInstructions { task: String, reason: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PolicyRejection> for EngineError {
    fn from(rejection: PolicyRejection) -> Self {
        EngineError::SecurityRejection {
            command: rejection.command,
            rule: rejection.rule.to_string(),
        }
    }
}

impl EngineError {
    /// 深度或预算上限：不视为错误，而是产出部分结果
    pub fn is_budget_limit(&self) -> bool {
        matches!(
            self,
            EngineError::DepthExceeded { .. } | EngineError::BudgetExceeded { .. }
        )
    }
}

/// 恢复策略针对一次工具失败给出的指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryDirective {
    /// 尚未达到上限：重试或换一组参数
    Retry {
        attempt: u32,
        remaining: u32,
        prompt: String,
    },
    /// 达到上限（或此前已放弃）：放弃该方案，换别的做法
    Abandon {
        attempts: u32,
        already_exhausted: bool,
        prompt: String,
    },
}

impl RecoveryDirective {
    pub fn prompt(&self) -> &str {
        match self {
            RecoveryDirective::Retry { prompt, .. } | RecoveryDirective::Abandon { prompt, .. } => {
                prompt
            }
        }
    }

    pub fn is_abandon(&self) -> bool {
        matches!(self, RecoveryDirective::Abandon { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_limit_classification() {
        assert!(EngineError::DepthExceeded { depth: 3, max_depth: 2 }.is_budget_limit());
        assert!(EngineError::BudgetExceeded { consumed: 100, ceiling: 100 }.is_budget_limit());
        assert!(!EngineError::Cancelled.is_budget_limit());
    }

    #[test]
    fn test_depth_error_message() {
        let err = EngineError::DepthExceeded { depth: 3, max_depth: 2 };
        assert!(err.to_string().contains("depth 3"));
    }
}
