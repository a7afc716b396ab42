//! process 策略：子进程 + CPU 时间 / 内存上限 + 临时工作区
//!
//! 每次调用分配唯一的临时目录作为工作目录（TempDir 在所有退出路径上删除，包括超时与取消）；
//! 环境变量清空后只保留 PATH，Linux 上额外设置 no_new_privs 禁止提权。

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::sandbox::{
    resolve_program, ResolvedProgram, SandboxError, SandboxExecutor, SandboxMode, SandboxOutput,
    SandboxRequest,
};

/// 进程级隔离执行器
#[derive(Debug, Default, Clone)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SandboxExecutor for ProcessExecutor {
    fn mode(&self) -> SandboxMode {
        SandboxMode::Process
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

        let scratch = tempfile::Builder::new().prefix("bee-sandbox-").tempdir()?;
        tracing::debug!(
            command = %request.display(),
            scratch = %scratch.path().display(),
            "process sandbox execute"
        );

        let mut cmd = Command::new(program);
        cmd.args(&request.args)
            .current_dir(scratch.path())
            .env_clear()
            .env("HOME", scratch.path())
            .env("TMPDIR", scratch.path())
            .env("BEE_SOURCE_DIR", &request.source_dir);
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
        cmd.envs(&request.env);

        #[cfg(unix)]
        apply_rlimits(
            &mut cmd,
            request.limits.cpu_time_secs,
            request.limits.memory_bytes,
        );
        #[cfg(not(unix))]
        tracing::warn!("process resource limits are not enforced on this platform");

        let result =
            super::child::run_child(cmd, &request.display(), &request.limits, cancel).await;
        drop(scratch);
        result
    }
}

#[cfg(unix)]
fn apply_rlimits(cmd: &mut Command, cpu_time_secs: u64, memory_bytes: u64) {
    // SAFETY: 闭包在 fork 之后、exec 之前运行，只调用 async-signal-safe 的 setrlimit / prctl，不分配内存
    unsafe {
        cmd.pre_exec(move || {
            let cpu = libc::rlimit {
                rlim_cur: cpu_time_secs as libc::rlim_t,
                rlim_max: cpu_time_secs as libc::rlim_t,
            };
            if libc::setrlimit(libc::RLIMIT_CPU, &cpu) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            let mem = libc::rlimit {
                rlim_cur: memory_bytes as libc::rlim_t,
                rlim_max: memory_bytes as libc::rlim_t,
            };
            if libc::setrlimit(libc::RLIMIT_AS, &mem) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1 as libc::c_ulong, 0, 0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}
