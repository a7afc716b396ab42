//! 子进程运行：none / process 两种策略共用的「超时即杀」逻辑
//!
//! 子进程在独立的进程组中启动（unix）。直接子进程退出、超时、取消或调用方放弃 future 时，
//! 整个进程组被 SIGKILL，脚本派生的后台进程不会比调用活得更久。
//! stdout / stderr 边读边截断，内存占用上限约为 `max_output_chars * 4` 字节。

use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::sandbox::{truncate_output, ResourceLimits, SandboxError, SandboxOutput};

/// 子进程所在的进程组；drop 时整组强制终止
#[cfg_attr(not(unix), allow(dead_code))]
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn kill(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.0.filter(|&id| id > 0) {
            // SAFETY: killpg 只发送信号；pgid 来自本进程刚创建的子进程，且不为 0（0 表示调用者自己的进程组）
            unsafe {
                libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// 读到 EOF，但最多保留 cap 字节；超出部分继续读走丢弃，避免子进程阻塞在写满的管道上
async fn read_capped<R: AsyncRead + Unpin>(
    pipe: Option<R>,
    cap: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let Some(mut pipe) = pipe else {
        return Ok((Vec::new(), false));
    };
    let mut kept = Vec::new();
    let mut overflow = false;
    let mut buf = [0u8; 8192];
    loop {
        let n = pipe.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        if n > room {
            overflow = true;
        }
        kept.extend_from_slice(&buf[..n.min(room)]);
    }
    Ok((kept, overflow))
}

pub(crate) async fn run_child(
    mut cmd: Command,
    label: &str,
    limits: &ResourceLimits,
    cancel: &CancellationToken,
) -> Result<SandboxOutput, SandboxError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SandboxError::NotFound(label.to_string()),
        _ => SandboxError::SpawnFailed(format!("{label}: {e}")),
    })?;
    let group = ProcessGroup(child.id());
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let cap = limits.max_output_chars.saturating_mul(4).saturating_add(4);

    let collect = async {
        let (out, err, status) = tokio::join!(
            read_capped(stdout, cap),
            read_capped(stderr, cap),
            async {
                let status = child.wait().await;
                // 直接子进程已退出：清理遗留的后台进程，它们持有的管道随之关闭
                group.kill();
                status
            }
        );
        Ok::<_, std::io::Error>((out?, err?, status?))
    };

    let ((stdout, stdout_overflow), (stderr, _), status) = tokio::select! {
        res = tokio::time::timeout(limits.timeout, collect) => match res {
            Ok(Ok(collected)) => collected,
            Ok(Err(e)) => return Err(SandboxError::Io(e)),
            Err(_) => {
                tracing::warn!(
                    command = %label,
                    timeout_ms = limits.timeout.as_millis() as u64,
                    "sandboxed process group killed after timeout"
                );
                return Err(SandboxError::Timeout(limits.timeout));
            }
        },
        _ = cancel.cancelled() => {
            tracing::info!(command = %label, "sandboxed process group killed on cancellation");
            return Err(SandboxError::Cancelled);
        }
    };

    let stdout = String::from_utf8_lossy(&stdout);
    let stderr = String::from_utf8_lossy(&stderr);
    let (stdout, truncated) = truncate_output(&stdout, limits.max_output_chars);
    let (stderr, _) = truncate_output(&stderr, limits.max_output_chars);
    Ok(SandboxOutput {
        exit_code: status.code().map(i64::from),
        stdout,
        stderr,
        duration: start.elapsed(),
        truncated: truncated || stdout_overflow,
    })
}
