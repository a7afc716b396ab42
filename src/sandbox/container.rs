//! container 策略：每次调用一个短生命周期 Docker 容器
//!
//! ```text
//! /workspace  ─▶ 指令来源目录（只读）
//! /scratch    ─▶ 本次调用的临时目录（读写，工作目录）
//! network     ─▶ none（除非显式允许）
//! limits      ─▶ memory / RLIMIT_CPU / pids，cap_drop ALL，no-new-privileges，只读根文件系统
//! ```
//!
//! 无论成功、失败、超时还是取消，容器都会被强制删除。

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::models::{HostConfig, ResourcesUlimits};
use bollard::Docker;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::sandbox::{
    resolve_program, truncate_output, ResolvedProgram, ResourceLimits, SandboxError,
    SandboxExecutor, SandboxMode, SandboxOutput, SandboxRequest,
};

const WORKSPACE_MOUNT: &str = "/workspace";
const SCRATCH_MOUNT: &str = "/scratch";

/// 容器执行器
pub struct ContainerExecutor {
    docker: Docker,
    image: String,
}

impl ContainerExecutor {
    pub fn new(docker: Docker, image: impl Into<String>) -> Self {
        Self {
            docker,
            image: image.into(),
        }
    }

    /// 连接本地 Docker daemon
    pub fn connect(image: impl Into<String>) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::new(docker, image))
    }

    pub async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn create(
        &self,
        cmd: Vec<String>,
        request: &SandboxRequest,
        scratch: &std::path::Path,
    ) -> Result<String, SandboxError> {
        let limits = &request.limits;
        let source = request.source_dir.canonicalize()?;
        let binds = vec![
            format!("{}:{WORKSPACE_MOUNT}:ro", source.display()),
            format!("{}:{SCRATCH_MOUNT}:rw", scratch.display()),
        ];
        let cpu = limits.cpu_time_secs as i64;

        let host_config = HostConfig {
            binds: Some(binds),
            memory: Some(limits.memory_bytes as i64),
            pids_limit: Some(128),
            network_mode: Some(if limits.allow_network { "bridge" } else { "none" }.to_string()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            readonly_rootfs: Some(true),
            tmpfs: Some(HashMap::from([("/tmp".to_string(), "size=64M".to_string())])),
            ulimits: Some(vec![ResourcesUlimits {
                name: Some("cpu".to_string()),
                soft: Some(cpu),
                hard: Some(cpu),
            }]),
            ..Default::default()
        };

        let env: Vec<String> = request
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .chain(std::iter::once(format!("BEE_SOURCE_DIR={WORKSPACE_MOUNT}")))
            .collect();

        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(cmd),
            working_dir: Some(SCRATCH_MOUNT.to_string()),
            env: Some(env),
            host_config: Some(host_config),
            network_disabled: Some(!limits.allow_network),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: format!("bee-sandbox-{}", uuid::Uuid::new_v4()),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| SandboxError::container(format!("create failed: {e}")))?;
        Ok(response.id)
    }

    async fn wait_and_collect(
        &self,
        id: &str,
        limits: &ResourceLimits,
    ) -> Result<(Option<i64>, String, String), SandboxError> {
        let mut wait = self.docker.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        let exit_code = match wait.next().await {
            Some(Ok(response)) => Some(response.status_code),
            // 非零退出码在 bollard 中以错误形式返回
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
            Some(Err(e)) => return Err(SandboxError::container(format!("wait failed: {e}"))),
            None => None,
        };

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };
        let mut logs = self.docker.logs(id, Some(options));
        let byte_cap = limits.max_output_chars.saturating_mul(4).saturating_add(4);
        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Some(item) = logs.next().await {
            match item {
                Ok(LogOutput::StdOut { message }) if stdout.len() < byte_cap => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdErr { message }) if stderr.len() < byte_cap => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => return Err(SandboxError::container(format!("logs failed: {e}"))),
            }
        }
        Ok((exit_code, stdout, stderr))
    }
}

/// 容器删除守卫：即使调用方丢弃 future 也会在后台强制删除
struct RemoveOnDrop {
    docker: Docker,
    id: String,
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        let docker = self.docker.clone();
        let id = std::mem::take(&mut self.id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let options = RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                };
                if let Err(e) = docker.remove_container(&id, Some(options)).await {
                    tracing::warn!(container = %id, error = %e, "failed to remove sandbox container");
                }
            });
        } else {
            tracing::warn!(container = %id, "no runtime available to remove sandbox container");
        }
    }
}

#[async_trait]
impl SandboxExecutor for ContainerExecutor {
    fn mode(&self) -> SandboxMode {
        SandboxMode::Container
    }

    async fn execute(
        &self,
        request: SandboxRequest,
        cancel: &CancellationToken,
    ) -> Result<SandboxOutput, SandboxError> {
        let start = Instant::now();
        let mut cmd = match resolve_program(&request.program, &request.source_dir)? {
            ResolvedProgram::Bare(name) => vec![name],
            ResolvedProgram::Script { relative, .. } => {
                vec![format!("{WORKSPACE_MOUNT}/{}", relative.display())]
            }
        };
        cmd.extend(request.args.iter().cloned());

        let scratch = tempfile::Builder::new().prefix("bee-sandbox-").tempdir()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(scratch.path(), std::fs::Permissions::from_mode(0o777))?;
        }

        let id = self.create(cmd, &request, scratch.path()).await?;
        let _guard = RemoveOnDrop {
            docker: self.docker.clone(),
            id: id.clone(),
        };
        tracing::debug!(container = %id, command = %request.display(), image = %self.image, "container sandbox execute");

        self.docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::container(format!("start failed: {e}")))?;

        let limits = &request.limits;
        let (exit_code, stdout, stderr) = tokio::select! {
            res = tokio::time::timeout(limits.timeout, self.wait_and_collect(&id, limits)) => match res {
                Ok(collected) => collected?,
                Err(_) => {
                    tracing::warn!(container = %id, timeout_ms = limits.timeout.as_millis() as u64, "sandbox container killed after timeout");
                    return Err(SandboxError::Timeout(limits.timeout));
                }
            },
            _ = cancel.cancelled() => {
                tracing::info!(container = %id, "sandbox container killed on cancellation");
                return Err(SandboxError::Cancelled);
            }
        };

        let (stdout, truncated) = truncate_output(&stdout, limits.max_output_chars);
        let (stderr, _) = truncate_output(&stderr, limits.max_output_chars);
        Ok(SandboxOutput {
            exit_code,
            stdout,
            stderr,
            duration: start.elapsed(),
            truncated,
        })
    }
}
