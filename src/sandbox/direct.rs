//! none 策略：直接在宿主上执行（仅限单租户开发环境）
//!
//! 工作目录为指令来源目录，不限制资源；仍然执行路径约束与超时即杀。

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::sandbox::{
    resolve_program, ResolvedProgram, SandboxError, SandboxExecutor, SandboxMode, SandboxOutput,
    SandboxRequest,
};

/// 直接执行器
#[derive(Debug, Default, Clone)]
pub struct DirectExecutor;

#[async_trait]
impl SandboxExecutor for DirectExecutor {
    fn mode(&self) -> SandboxMode {
        SandboxMode::None
    }

    async fn execute(
        &self,
        request: SandboxRequest,
        cancel: &CancellationToken,
    ) -> Result<SandboxOutput, SandboxError> {
        let program = match resolve_program(&request.program, &request.source_dir)? {
            ResolvedProgram::Bare(name) => name.into(),
            ResolvedProgram::Script { host_path, .. } => host_path,
        };
        tracing::debug!(command = %request.display(), "direct execute");

        let mut cmd = Command::new(program);
        cmd.args(&request.args)
            .current_dir(&request.source_dir)
            .envs(&request.env);
        super::child::run_child(cmd, &request.display(), &request.limits, cancel).await
    }
}
