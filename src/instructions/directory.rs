//! 目录形式的指令来源
//!
//! ```text
//! <root>/<task>/task.toml        元数据（可选）
//! <root>/<task>/instructions.md  指令文本
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::EngineError;
use crate::instructions::{validate_task_name, InstructionSource, Instructions};
use crate::sandbox::has_parent_segment;

const META_FILE: &str = "task.toml";
const TEXT_FILE: &str = "instructions.md";

/// task.toml 中的 [task] 表
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskMeta {
    pub description: Option<String>,
    pub allowed_tools: Vec<String>,
    /// 相对任务目录；默认任务目录本身
    pub working_directory: Option<String>,
    pub model: Option<String>,
    pub allowed_commands: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskToml {
    #[serde(default)]
    task: TaskMeta,
}

/// 任务列表中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub name: String,
    pub description: Option<String>,
}

pub struct DirectoryInstructionSource {
    root: PathBuf,
}

impl DirectoryInstructionSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 列出 root 下所有含 instructions.md 的任务目录（按名称排序）
    pub async fn list_tasks(&self) -> anyhow::Result<Vec<TaskSummary>> {
        let mut tasks = Vec::new();
        if !self.root.exists() {
            return Ok(tasks);
        }
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() || !path.join(TEXT_FILE).exists() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if validate_task_name(&name).is_err() {
                continue;
            }
            let description = match read_meta(&path).await {
                Ok(meta) => meta.description,
                Err(e) => {
                    tracing::warn!(task = %name, error = %e, "skipping unreadable task metadata");
                    None
                }
            };
            tasks.push(TaskSummary { name, description });
        }
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tasks)
    }
}

async fn read_meta(dir: &Path) -> Result<TaskMeta, EngineError> {
    let path = dir.join(META_FILE);
    if !path.exists() {
        return Ok(TaskMeta::default());
    }
    let content = tokio::fs::read_to_string(&path).await?;
    let parsed: TaskToml = toml::from_str(&content).map_err(|e| EngineError::InvalidInstructions {
        task: dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        reason: e.to_string(),
    })?;
    Ok(parsed.task)
}

#[async_trait]
impl InstructionSource for DirectoryInstructionSource {
    async fn load_instructions(&self, task: &str) -> Result<Instructions, EngineError> {
        validate_task_name(task)?;
        let dir = self.root.join(task);
        let text_path = dir.join(TEXT_FILE);
        if !text_path.is_file() {
            return Err(EngineError::InstructionsNotFound(task.to_string()));
        }
        let text = tokio::fs::read_to_string(&text_path).await?;
        let meta = read_meta(&dir).await?;

        let working_directory = match meta.working_directory.as_deref() {
            None | Some("") | Some(".") => dir.clone(),
            Some(wd) if Path::new(wd).is_absolute() || has_parent_segment(wd) => {
                return Err(EngineError::InvalidInstructions {
                    task: task.to_string(),
                    reason: format!("working_directory must stay inside the task directory: {wd}"),
                });
            }
            Some(wd) => dir.join(wd),
        };

        tracing::debug!(task, dir = %dir.display(), "instructions loaded");
        Ok(Instructions {
            name: task.to_string(),
            description: meta.description,
            text,
            allowed_tools: meta.allowed_tools,
            working_directory,
            source_dir: dir,
            model_hint: meta.model,
            allowed_commands: meta.allowed_commands,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_task(root: &Path, name: &str, toml: Option<&str>, text: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(TEXT_FILE), text).unwrap();
        if let Some(t) = toml {
            std::fs::write(dir.join(META_FILE), t).unwrap();
        }
    }

    #[tokio::test]
    async fn test_load_with_metadata() {
        let root = tempfile::tempdir().unwrap();
        write_task(
            root.path(),
            "review",
            Some(
                r#"
[task]
description = "Review the change"
allowed_tools = ["cat", "ls"]
working_directory = "src"
model = "deepseek-reasoner"
allowed_commands = ["git status"]
"#,
            ),
            "Review ${ARGUMENTS}.",
        );
        let source = DirectoryInstructionSource::new(root.path());
        let ins = source.load_instructions("review").await.unwrap();
        assert_eq!(ins.text, "Review ${ARGUMENTS}.");
        assert_eq!(ins.allowed_tools, vec!["cat".to_string(), "ls".to_string()]);
        assert_eq!(ins.working_directory, root.path().join("review").join("src"));
        assert_eq!(ins.source_dir, root.path().join("review"));
        assert_eq!(ins.model_hint.as_deref(), Some("deepseek-reasoner"));
        assert_eq!(ins.allowed_commands, Some(vec!["git status".to_string()]));
    }

    #[tokio::test]
    async fn test_load_without_metadata() {
        let root = tempfile::tempdir().unwrap();
        write_task(root.path(), "plain", None, "Just do it.");
        let ins = DirectoryInstructionSource::new(root.path())
            .load_instructions("plain")
            .await
            .unwrap();
        assert!(ins.allowed_tools.is_empty());
        assert_eq!(ins.working_directory, root.path().join("plain"));
    }

    #[tokio::test]
    async fn test_missing_and_invalid() {
        let root = tempfile::tempdir().unwrap();
        let source = DirectoryInstructionSource::new(root.path());
        assert!(matches!(
            source.load_instructions("nope").await,
            Err(EngineError::InstructionsNotFound(_))
        ));
        assert!(matches!(
            source.load_instructions("../etc").await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_working_directory_escape_rejected() {
        let root = tempfile::tempdir().unwrap();
        write_task(
            root.path(),
            "bad",
            Some("[task]\nworking_directory = \"../..\"\n"),
            "x",
        );
        let err = DirectoryInstructionSource::new(root.path())
            .load_instructions("bad")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInstructions { .. }));
    }

    #[tokio::test]
    async fn test_list_tasks_sorted() {
        let root = tempfile::tempdir().unwrap();
        write_task(root.path(), "b-task", Some("[task]\ndescription = \"second\"\n"), "x");
        write_task(root.path(), "a-task", None, "x");
        std::fs::create_dir_all(root.path().join("not-a-task")).unwrap();
        let tasks = DirectoryInstructionSource::new(root.path()).list_tasks().await.unwrap();
        let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a-task", "b-task"]);
        assert_eq!(tasks[1].description.as_deref(), Some("second"));
    }
}
