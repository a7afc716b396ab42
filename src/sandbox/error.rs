//! 沙箱执行错误

use std::time::Duration;

/// 沙箱执行中可能出现的错误
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// 执行路径不在指令目录内
    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("Executable not found: {0}")]
    NotFound(String),

    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    /// 超时后已强制终止
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Container error: {reason}")]
    Container { reason: String },

    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    pub fn container(reason: impl Into<String>) -> Self {
        Self::Container {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
