//! 资源上限、执行请求与输出
//!
//! 三种隔离策略共用同一套请求 / 输出结构；输出按字符截断并附带可见截断标记。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// 单次沙箱执行的资源上限
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// 超时后强制终止
    pub timeout: Duration,
    /// stdout 保留的最大字符数
    pub max_output_chars: usize,
    /// CPU 时间上限（秒）
    pub cpu_time_secs: u64,
    /// 内存上限（字节）
    pub memory_bytes: u64,
    /// 仅容器模式生效：是否允许网络
    pub allow_network: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_output_chars: 10_000,
            cpu_time_secs: 10,
            memory_bytes: 512 * 1024 * 1024,
            allow_network: false,
        }
    }
}

impl ResourceLimits {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_chars(mut self, chars: usize) -> Self {
        self.max_output_chars = chars;
        self
    }
}

/// 一次执行请求：程序 + 参数（不经过 shell）
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    /// 裸命令名（按 PATH 查找）或相对指令目录的脚本路径
    pub program: String,
    pub args: Vec<String>,
    /// 指令来源目录：脚本路径必须落在其中；容器模式下只读挂载
    pub source_dir: PathBuf,
    pub env: HashMap<String, String>,
    pub limits: ResourceLimits,
}

impl SandboxRequest {
    pub fn new(program: impl Into<String>, args: Vec<String>, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            source_dir: source_dir.into(),
            env: HashMap::new(),
            limits: ResourceLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// 用于日志的命令行预览
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// 执行输出
#[derive(Debug, Clone)]
pub struct SandboxOutput {
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub truncated: bool,
}

impl SandboxOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// 按字符截断，超出部分替换为可见标记；返回 (文本, 是否截断)
pub fn truncate_output(text: &str, max_chars: usize) -> (String, bool) {
    let total = text.chars().count();
    if total <= max_chars {
        return (text.to_string(), false);
    }
    let kept: String = text.chars().take(max_chars).collect();
    (
        format!("{kept}\n[output truncated: {max_chars} of {total} chars shown]"),
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_keeps_short_output() {
        let (out, truncated) = truncate_output("hello\n", 10);
        assert_eq!(out, "hello\n");
        assert!(!truncated);
    }

    #[test]
    fn test_truncate_adds_marker() {
        let (out, truncated) = truncate_output("abcdefghij", 4);
        assert!(truncated);
        assert!(out.starts_with("abcd\n"));
        assert!(out.contains("[output truncated: 4 of 10 chars shown]"));
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let (out, truncated) = truncate_output("蜜蜂蜜蜂", 4);
        assert_eq!(out, "蜜蜂蜜蜂");
        assert!(!truncated);
    }

    #[test]
    fn test_request_display() {
        let req = SandboxRequest::new("echo", vec!["hi".into()], "/tmp");
        assert_eq!(req.display(), "echo hi");
    }
}
