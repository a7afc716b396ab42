//! 指令来源：按任务名提供指令文本、允许的工具与工作目录

pub mod directory;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::{EngineError, ValidationError};

pub use directory::{DirectoryInstructionSource, TaskMeta, TaskSummary};

/// 一个任务的指令
#[derive(Debug, Clone, PartialEq)]
pub struct Instructions {
    pub name: String,
    pub description: Option<String>,
    /// 原始指令文本（尚未预处理）
    pub text: String,
    /// 允许的工具名；空表示全部
    pub allowed_tools: Vec<String>,
    /// 文件工具与引用解析的根目录
    pub working_directory: PathBuf,
    /// 指令所在目录（run_script 与内联命令的来源目录）
    pub source_dir: PathBuf,
    pub model_hint: Option<String>,
    /// 任务声明的内联命令白名单（只能收窄引擎配置，不能放宽）
    pub allowed_commands: Option<Vec<String>>,
}

impl Instructions {
    pub fn new(name: impl Into<String>, text: impl Into<String>, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self {
            name: name.into(),
            description: None,
            text: text.into(),
            allowed_tools: Vec::new(),
            working_directory: dir.clone(),
            source_dir: dir,
            model_hint: None,
            allowed_commands: None,
        }
    }

    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_allowed_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_commands = Some(commands.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_working_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_directory = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_model_hint(mut self, model: impl Into<String>) -> Self {
        self.model_hint = Some(model.into());
        self
    }
}

/// 指令来源 trait
#[async_trait]
pub trait InstructionSource: Send + Sync {
    async fn load_instructions(&self, task: &str) -> Result<Instructions, EngineError>;
}

/// 任务名只允许字母、数字、`-`、`_`、`.`，且不能是 `.` / `..`
pub fn validate_task_name(task: &str) -> Result<(), ValidationError> {
    let valid = !task.is_empty()
        && task.len() <= 128
        && task != "."
        && task != ".."
        && task
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidTaskName(task.to_string()))
    }
}

/// 内存中的固定指令表（测试与嵌入使用）
#[derive(Debug, Clone, Default)]
pub struct StaticInstructionSource {
    tasks: HashMap<String, Instructions>,
}

impl StaticInstructionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, instructions: Instructions) -> Self {
        self.insert(instructions);
        self
    }

    pub fn insert(&mut self, instructions: Instructions) {
        self.tasks.insert(instructions.name.clone(), instructions);
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl InstructionSource for StaticInstructionSource {
    async fn load_instructions(&self, task: &str) -> Result<Instructions, EngineError> {
        self.tasks
            .get(task)
            .cloned()
            .ok_or_else(|| EngineError::InstructionsNotFound(task.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_name_validation() {
        assert!(validate_task_name("code-review").is_ok());
        assert!(validate_task_name("v1.2_task").is_ok());
        assert!(validate_task_name("").is_err());
        assert!(validate_task_name("..").is_err());
        assert!(validate_task_name("a/b").is_err());
        assert!(validate_task_name("rm -rf").is_err());
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticInstructionSource::new()
            .with_task(Instructions::new("greet", "Say hi.", ".").with_allowed_tools(["echo"]));
        let loaded = source.load_instructions("greet").await.unwrap();
        assert_eq!(loaded.allowed_tools, vec!["echo".to_string()]);
        assert!(matches!(
            source.load_instructions("missing").await,
            Err(EngineError::InstructionsNotFound(_))
        ));
    }
}
