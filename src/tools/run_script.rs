//! 脚本执行工具：通过 SandboxExecutor 运行指令目录内的脚本
//!
//! 路径在派发前校验，越界直接拒绝；非零退出码视为工具失败。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::sandbox::{ResourceLimits, SandboxError, SandboxExecutor, SandboxRequest};
use crate::tools::Tool;

pub struct RunScriptTool {
    sandbox: Arc<dyn SandboxExecutor>,
    source_dir: PathBuf,
    limits: ResourceLimits,
    cancel: CancellationToken,
}

impl RunScriptTool {
    pub fn new(
        sandbox: Arc<dyn SandboxExecutor>,
        source_dir: impl Into<PathBuf>,
        limits: ResourceLimits,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sandbox,
            source_dir: source_dir.into(),
            limits,
            cancel,
        }
    }
}

/// 裸文件名补成 `./name`，保证按脚本路径解析而不是 PATH 查找
fn script_path(raw: &str) -> String {
    if raw.contains('/') || raw.contains(std::path::MAIN_SEPARATOR) {
        raw.to_string()
    } else {
        format!("./{raw}")
    }
}

#[async_trait]
impl Tool for RunScriptTool {
    fn name(&self) -> &str {
        "run_script"
    }

    fn description(&self) -> &str {
        "Run a script from the task directory inside the sandbox."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "script path relative to the task directory"},
                "args": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| "missing required argument 'path'".to_string())?;
        let script_args: Vec<String> = match args.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Some(_) => return Err("'args' must be an array of strings".to_string()),
        };

        let request = SandboxRequest::new(script_path(path), script_args, &self.source_dir)
            .with_limits(self.limits.clone());
        tracing::info!(script = %request.display(), mode = %self.sandbox.mode(), "run_script");

        match self.sandbox.execute(request, &self.cancel).await {
            Ok(out) if out.success() => {
                if out.stderr.trim().is_empty() {
                    Ok(out.stdout)
                } else {
                    Ok(format!("{}\n[stderr]\n{}", out.stdout, out.stderr))
                }
            }
            Ok(out) => Err(format!(
                "script exited with {}: {}",
                out.exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                out.stderr.trim()
            )),
            Err(SandboxError::PathEscape(p)) => Err(format!("script path escapes the task directory: {p}")),
            Err(e) => Err(e.to_string()),
        }
    }
}
