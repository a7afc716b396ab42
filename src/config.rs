//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__ENGINE__MAX_ITERATIONS=30`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{ExecutionConfig, ValidationError};
use crate::llm::RetryConfig;
use crate::sandbox::{ResourceLimits, SandboxMode};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub sandbox: SandboxSection,
    pub instructions: InstructionsSection,
    pub sessions: SessionsSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
}

/// [engine] 段：迭代、重试、超时、委派与内联命令白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_iterations: usize,
    pub max_retries_per_tool: u32,
    pub iteration_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub max_command_output_chars: usize,
    pub max_depth: usize,
    pub global_iteration_ceiling: usize,
    pub max_consecutive_provider_failures: u32,
    /// 不设置 = 拒绝所有内联命令
    pub command_allowlist: Option<Vec<String>>,
    /// 未设置白名单时放行（高风险，需显式开启）
    pub permissive_commands: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        let d = ExecutionConfig::default();
        Self {
            max_iterations: d.max_iterations,
            max_retries_per_tool: d.max_retries_per_tool,
            iteration_timeout_secs: d.iteration_timeout.as_secs(),
            command_timeout_secs: d.command_timeout.as_secs(),
            max_command_output_chars: d.max_command_output_chars,
            max_depth: d.max_depth,
            global_iteration_ceiling: d.global_iteration_ceiling,
            max_consecutive_provider_failures: d.max_consecutive_provider_failures,
            command_allowlist: None,
            permissive_commands: false,
        }
    }
}

/// [sandbox] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    /// none / process / container（大小写不敏感）
    pub mode: String,
    /// 容器模式使用的镜像
    pub image: String,
    pub memory_limit_mb: u64,
    pub cpu_time_secs: u64,
    pub allow_network: bool,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            mode: "process".to_string(),
            image: "alpine:3.20".to_string(),
            memory_limit_mb: 512,
            cpu_time_secs: 10,
            allow_network: false,
        }
    }
}

impl SandboxSection {
    pub fn mode(&self) -> Result<SandboxMode, ValidationError> {
        self.mode.parse()
    }

    /// 超时与输出上限由 ExecutionConfig 按运行覆盖
    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_time_secs: self.cpu_time_secs,
            memory_bytes: self.memory_limit_mb.saturating_mul(1024 * 1024),
            allow_network: self.allow_network,
            ..ResourceLimits::default()
        }
    }
}

/// [instructions] 段：任务目录根
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstructionsSection {
    pub root: PathBuf,
}

impl Default for InstructionsSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("tasks"),
        }
    }
}

/// [sessions] 段：会话历史与变量目录；enabled = false 时不持久化
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".bee/sessions"),
        }
    }
}

/// [llm] 段：后端选择、模型与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// deepseek / openai / mock；实际选择还取决于 API Key 是否存在
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub retry: RetryConfig,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            retry: RetryConfig::default(),
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// 转为单次运行配置并校验
    pub fn to_execution_config(&self) -> Result<ExecutionConfig, ValidationError> {
        let e = &self.engine;
        let config = ExecutionConfig {
            max_iterations: e.max_iterations,
            max_retries_per_tool: e.max_retries_per_tool,
            iteration_timeout: Duration::from_secs(e.iteration_timeout_secs),
            command_timeout: Duration::from_secs(e.command_timeout_secs),
            max_command_output_chars: e.max_command_output_chars,
            max_depth: e.max_depth,
            global_iteration_ceiling: e.global_iteration_ceiling,
            max_consecutive_provider_failures: e.max_consecutive_provider_failures,
            sandbox_mode: self.sandbox.mode()?,
            command_allowlist: e.command_allowlist.clone(),
            permissive_commands: e.permissive_commands,
            model_hint: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.tool_timeout_secs.max(1))
    }
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("engine.command_allowlist")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 从字符串解析（测试与嵌入使用，不读取环境变量）
pub fn parse_config(toml_text: &str) -> Result<AppConfig, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from_str(toml_text, config::FileFormat::Toml))
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_execution_config() {
        let cfg = AppConfig::default();
        let exec = cfg.to_execution_config().unwrap();
        assert_eq!(exec, ExecutionConfig::default());
    }

    #[test]
    fn test_parse_sections() {
        let cfg = parse_config(
            r#"
[engine]
max_iterations = 7
command_allowlist = ["echo", "git status"]

[sandbox]
mode = "Container"
memory_limit_mb = 256

[instructions]
root = "my-tasks"
"#,
        )
        .unwrap();
        let exec = cfg.to_execution_config().unwrap();
        assert_eq!(exec.max_iterations, 7);
        assert_eq!(exec.sandbox_mode, SandboxMode::Container);
        assert_eq!(
            exec.command_allowlist,
            Some(vec!["echo".to_string(), "git status".to_string()])
        );
        assert_eq!(cfg.sandbox.resource_limits().memory_bytes, 256 * 1024 * 1024);
        assert_eq!(cfg.instructions.root, PathBuf::from("my-tasks"));
        // 未出现的段保持默认
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
    }

    #[test]
    fn test_unknown_sandbox_mode_rejected() {
        let cfg = parse_config("[sandbox]\nmode = \"vm\"\n").unwrap();
        assert!(matches!(
            cfg.to_execution_config(),
            Err(ValidationError::UnknownSandboxMode(_))
        ));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let cfg = parse_config("[engine]\nmax_iterations = 0\n").unwrap();
        assert!(cfg.to_execution_config().is_err());
    }
}
