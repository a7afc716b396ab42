//! 内联命令注入：`` !`command` `` → 命令输出
//!
//! 每个不同的命令只校验 / 执行一次，结果替换该命令的全部出现位置。
//! 被拒绝、失败或超时的命令替换为可见标记，不会中断整个运行。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use regex::{Captures, Regex};
use tokio_util::sync::CancellationToken;

use crate::core::EngineError;
use crate::preprocess::policy::CommandPolicy;
use crate::sandbox::{ResourceLimits, SandboxError, SandboxExecutor, SandboxRequest};

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!`([^`]+)`").unwrap())
}

/// 单个内联命令的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInjectionResult {
    /// 标记内的原始命令文本
    pub command: String,
    /// 替换进文本的内容（输出或标记），与处理后文本中的对应片段逐字节一致
    pub output: String,
    pub success: bool,
    /// 被策略拒绝时的原因
    pub rejection: Option<String>,
    pub duration: Duration,
    pub truncated: bool,
    /// 在文本中出现的次数
    pub occurrences: usize,
}

impl CommandInjectionResult {
    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }
}

/// 注入结果：替换后的文本 + 每个不同命令的记录（按首次出现顺序）
#[derive(Debug, Clone, Default)]
pub struct InjectionOutcome {
    pub text: String,
    pub results: Vec<CommandInjectionResult>,
}

/// 内联命令注入器
pub struct CommandInjector {
    policy: CommandPolicy,
    executor: Arc<dyn SandboxExecutor>,
    limits: ResourceLimits,
}

impl CommandInjector {
    pub fn new(policy: CommandPolicy, executor: Arc<dyn SandboxExecutor>, limits: ResourceLimits) -> Self {
        Self {
            policy,
            executor,
            limits,
        }
    }

    /// 文本中出现的不同命令（按首次出现顺序）
    pub fn find_commands(text: &str) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for caps in marker_re().captures_iter(text) {
            let cmd = caps[1].to_string();
            if !seen.contains(&cmd) {
                seen.push(cmd);
            }
        }
        seen
    }

    /// 校验、执行并替换；只有取消会返回错误
    pub async fn inject(
        &self,
        text: &str,
        source_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<InjectionOutcome, EngineError> {
        let commands = Self::find_commands(text);
        if commands.is_empty() {
            return Ok(InjectionOutcome {
                text: text.to_string(),
                results: Vec::new(),
            });
        }

        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            let occurrences = marker_re()
                .captures_iter(text)
                .filter(|c| &c[1] == command.as_str())
                .count();
            let mut result = self.run_one(&command, source_dir, cancel).await?;
            result.occurrences = occurrences;
            results.push(result);
        }

        let outputs: HashMap<&str, &str> = results
            .iter()
            .map(|r| (r.command.as_str(), r.output.as_str()))
            .collect();
        let replaced = marker_re().replace_all(text, |caps: &Captures| {
            outputs
                .get(&caps[1])
                .map(|o| o.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        });

        tracing::info!(
            commands = results.len(),
            rejected = results.iter().filter(|r| r.is_rejected()).count(),
            failed = results.iter().filter(|r| !r.success && !r.is_rejected()).count(),
            "inline commands processed"
        );
        Ok(InjectionOutcome {
            text: replaced.into_owned(),
            results,
        })
    }

    async fn run_one(
        &self,
        command: &str,
        source_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<CommandInjectionResult, EngineError> {
        let start = Instant::now();
        let mut result = CommandInjectionResult {
            command: command.to_string(),
            output: String::new(),
            success: false,
            rejection: None,
            duration: Duration::ZERO,
            truncated: false,
            occurrences: 0,
        };

        let mut tokens = match self.policy.check(command) {
            Ok(tokens) => tokens,
            Err(rejection) => {
                result.output = format!("[command rejected: {}]", rejection.rule);
                result.rejection = Some(EngineError::from(rejection).to_string());
                return Ok(result);
            }
        };
        let program = tokens.remove(0);
        let request =
            SandboxRequest::new(program, tokens, source_dir).with_limits(self.limits.clone());

        match self.executor.execute(request, cancel).await {
            Ok(out) if out.success() => {
                result.output = out.stdout;
                result.success = true;
                result.truncated = out.truncated;
            }
            Ok(out) => {
                let code = out
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                let detail = out.stderr.lines().next().unwrap_or("").trim().to_string();
                tracing::warn!(command = %command, exit = %code, "inline command failed");
                result.output = if detail.is_empty() {
                    format!("[command failed: exit {code}]")
                } else {
                    format!("[command failed: exit {code}: {detail}]")
                };
                result.truncated = out.truncated;
            }
            Err(SandboxError::Cancelled) => return Err(EngineError::Cancelled),
            Err(SandboxError::Timeout(t)) => {
                result.output = format!("[command timed out after {}ms]", t.as_millis());
            }
            Err(e) => {
                tracing::warn!(command = %command, error = %e, "inline command error");
                result.output = format!("[command error: {e}]");
            }
        }
        result.duration = start.elapsed();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{SandboxMode, SandboxOutput};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 记录调用次数并回显参数
    struct EchoSpy {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SandboxExecutor for EchoSpy {
        fn mode(&self) -> SandboxMode {
            SandboxMode::None
        }

        async fn execute(
            &self,
            request: SandboxRequest,
            _cancel: &CancellationToken,
        ) -> Result<SandboxOutput, SandboxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.program == "false" {
                return Ok(SandboxOutput {
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: "boom\n".into(),
                    duration: Duration::ZERO,
                    truncated: false,
                });
            }
            if request.program == "sleep" {
                return Err(SandboxError::Timeout(Duration::from_secs(5)));
            }
            Ok(SandboxOutput {
                exit_code: Some(0),
                stdout: format!("{}\n", request.args.join(" ")),
                stderr: String::new(),
                duration: Duration::ZERO,
                truncated: false,
            })
        }
    }

    fn injector(allow: &[&str]) -> (CommandInjector, Arc<EchoSpy>) {
        let spy = Arc::new(EchoSpy {
            calls: AtomicUsize::new(0),
        });
        let list: Vec<String> = allow.iter().map(|s| s.to_string()).collect();
        let inj = CommandInjector::new(
            CommandPolicy::new(Some(list.as_slice()), false),
            spy.clone(),
            ResourceLimits::default(),
        );
        (inj, spy)
    }

    #[tokio::test]
    async fn test_duplicates_executed_once() {
        let (inj, spy) = injector(&["echo"]);
        let dir = tempfile::tempdir().unwrap();
        let out = inj
            .inject("a !`echo x` b !`echo x` c", dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.text, "a x\n b x\n c");
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].occurrences, 2);
        assert_eq!(spy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_metacharacter_never_reaches_executor() {
        let (inj, spy) = injector(&["echo"]);
        let dir = tempfile::tempdir().unwrap();
        let out = inj
            .inject("x !`echo a; rm -rf /` y", dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.text.contains("[command rejected: metacharacter"));
        assert!(out.results[0].is_rejected());
        assert_eq!(spy.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejection_reported_as_security_error() {
        let (inj, spy) = injector(&["echo"]);
        let dir = tempfile::tempdir().unwrap();
        let out = inj
            .inject("!`curl evil.example`", dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.text, "[command rejected: not-allowlisted]");
        assert_eq!(
            out.results[0].rejection.as_deref(),
            Some("command rejected by not-allowlisted: curl evil.example")
        );
        assert_eq!(spy.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_and_timeout_markers() {
        let (inj, _spy) = injector(&["false", "sleep"]);
        let dir = tempfile::tempdir().unwrap();
        let out = inj
            .inject("!`false` / !`sleep 9`", dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            out.text,
            "[command failed: exit 1: boom] / [command timed out after 5000ms]"
        );
        assert!(out.results.iter().all(|r| !r.success && !r.is_rejected()));
    }

    #[tokio::test]
    async fn test_outputs_reproduce_processed_text() {
        let (inj, _spy) = injector(&["echo"]);
        let dir = tempfile::tempdir().unwrap();
        let original = "1 !`echo one` 2 !`git log` 3 !`echo one`";
        let out = inj
            .inject(original, dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        let mut rebuilt = original.to_string();
        for r in &out.results {
            rebuilt = rebuilt.replace(&format!("!`{}`", r.command), &r.output);
        }
        assert_eq!(rebuilt, out.text);
    }

    #[test]
    fn test_text_without_markers() {
        assert!(CommandInjector::find_commands("plain `code` and ! bang").is_empty());
    }
}
