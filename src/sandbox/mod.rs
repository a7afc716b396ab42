//! 沙箱执行层：在可配置的隔离策略下运行内联命令与脚本
//!
//! - **none**: 直接在宿主上执行（开发用）
//! - **process**: 子进程 + rlimit + 临时工作区
//! - **container**: 每次调用一个短生命周期 Docker 容器
//!
//! 所有策略共享：路径约束、超时即杀、输出截断、取消传播。

mod child;
pub mod container;
pub mod direct;
pub mod error;
pub mod limits;
pub mod paths;
pub mod process;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::ValidationError;

pub use container::ContainerExecutor;
pub use direct::DirectExecutor;
pub use error::SandboxError;
pub use limits::{truncate_output, ResourceLimits, SandboxOutput, SandboxRequest};
pub use paths::{has_parent_segment, resolve_program, resolve_within, ResolvedProgram};
pub use process::ProcessExecutor;

/// 隔离策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    None,
    #[default]
    Process,
    Container,
}

impl fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SandboxMode::None => "none",
            SandboxMode::Process => "process",
            SandboxMode::Container => "container",
        };
        f.write_str(s)
    }
}

impl FromStr for SandboxMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(SandboxMode::None),
            "process" => Ok(SandboxMode::Process),
            "container" => Ok(SandboxMode::Container),
            other => Err(ValidationError::UnknownSandboxMode(other.to_string())),
        }
    }
}

/// 沙箱执行器：按隔离策略运行一个程序
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    fn mode(&self) -> SandboxMode;

    /// 执行请求；超时或取消时进程 / 容器被强制终止
    async fn execute(
        &self,
        request: SandboxRequest,
        cancel: &CancellationToken,
    ) -> Result<SandboxOutput, SandboxError>;
}

/// 按策略创建执行器；container 模式会连接本地 Docker
pub fn create_executor(
    mode: SandboxMode,
    image: &str,
) -> Result<Arc<dyn SandboxExecutor>, SandboxError> {
    let executor: Arc<dyn SandboxExecutor> = match mode {
        SandboxMode::None => {
            tracing::warn!("sandbox mode 'none': commands run directly on the host");
            Arc::new(DirectExecutor)
        }
        SandboxMode::Process => Arc::new(ProcessExecutor::new()),
        SandboxMode::Container => Arc::new(ContainerExecutor::connect(image)?),
    };
    tracing::info!(mode = %mode, "sandbox executor ready");
    Ok(executor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_case_insensitive() {
        assert_eq!("Process".parse::<SandboxMode>().unwrap(), SandboxMode::Process);
        assert_eq!(" container ".parse::<SandboxMode>().unwrap(), SandboxMode::Container);
        assert_eq!("none".parse::<SandboxMode>().unwrap(), SandboxMode::None);
    }

    #[test]
    fn test_mode_parse_unknown() {
        let err = "vm".parse::<SandboxMode>().unwrap_err();
        assert_eq!(err, ValidationError::UnknownSandboxMode("vm".into()));
    }

    #[test]
    fn test_create_process_executor() {
        let exec = create_executor(SandboxMode::Process, "alpine:3.20").unwrap();
        assert_eq!(exec.mode(), SandboxMode::Process);
    }
}
