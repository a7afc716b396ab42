//! 受限文件系统工具
//!
//! SafeFs 绑定工作目录，所有路径经 resolve 校验必须在根下（禁止 ../ 与符号链接逃逸）；
//! CatTool / LsTool 基于 SafeFs 提供 cat / ls 能力。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::core::EngineError;
use crate::sandbox::{resolve_within, truncate_output};
use crate::tools::Tool;

/// 受限文件系统：绑定根目录
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析并校验路径在根下
    pub fn resolve(&self, path: &str) -> Result<PathBuf, EngineError> {
        if path.is_empty() || path == "." {
            return Ok(self.root_dir.clone());
        }
        Ok(resolve_within(&self.root_dir, path)?)
    }

    pub fn read_file(&self, path: &str) -> Result<String, EngineError> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved)
            .map_err(|e| EngineError::ToolExecutionFailed(format!("Read failed: {e}")))
    }

    /// 列出目录（隐藏文件除外），目录名以 `/` 结尾
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, EngineError> {
        let base = self.resolve(path)?;
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base)
            .map_err(|e| EngineError::ToolExecutionFailed(format!("List failed: {e}")))?
        {
            let e = e.map_err(|e| EngineError::ToolExecutionFailed(e.to_string()))?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let suffix = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{name}{suffix}"));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

fn path_arg<'a>(args: &'a Value, default: &'a str) -> &'a str {
    args.get("path").and_then(|v| v.as_str()).unwrap_or(default)
}

/// 读取文件内容（按字符截断）
pub struct CatTool {
    fs: SafeFs,
    max_chars: usize,
}

impl CatTool {
    pub fn new(root_dir: impl AsRef<Path>, max_chars: usize) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
            max_chars,
        }
    }
}

#[async_trait]
impl Tool for CatTool {
    fn name(&self) -> &str {
        "cat"
    }

    fn description(&self) -> &str {
        "Read a file inside the working directory."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"path": {"type": "string", "description": "file path relative to the working directory"}},
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = path_arg(&args, "");
        if path.is_empty() {
            return Err("missing required argument 'path'".to_string());
        }
        tracing::debug!(path = %path, "cat tool execute");
        let content = self.fs.read_file(path).map_err(|e| e.to_string())?;
        Ok(truncate_output(&content, self.max_chars).0)
    }
}

/// 列出目录
pub struct LsTool {
    fs: SafeFs,
}

impl LsTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List a directory inside the working directory."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"path": {"type": "string", "description": "directory path, default '.'"}},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = path_arg(&args, ".");
        tracing::debug!(path = %path, "ls tool execute");
        let entries = self.fs.list_dir(path).map_err(|e| e.to_string())?;
        Ok(entries.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_cat_and_ls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();

        let cat = CatTool::new(dir.path(), 100);
        assert_eq!(cat.execute(json!({"path": "notes.txt"})).await.unwrap(), "hello");

        let ls = LsTool::new(dir.path());
        assert_eq!(ls.execute(json!({})).await.unwrap(), "notes.txt\nsub/");
    }

    #[tokio::test]
    async fn test_escape_rejected() {
        let outer = tempfile::tempdir().unwrap();
        std::fs::write(outer.path().join("secret"), "s").unwrap();
        let inner = outer.path().join("ws");
        std::fs::create_dir(&inner).unwrap();
        let cat = CatTool::new(&inner, 100);
        let err = cat.execute(json!({"path": "../secret"})).await.unwrap_err();
        assert!(err.contains("escape"), "{err}");
    }

    #[tokio::test]
    async fn test_cat_truncates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "a".repeat(50)).unwrap();
        let cat = CatTool::new(dir.path(), 10);
        let out = cat.execute(json!({"path": "big.txt"})).await.unwrap();
        assert!(out.contains("[output truncated: 10 of 50 chars shown]"));
    }
}
