//! 子任务委派工具：delegate_task / delegate_tasks
//!
//! 子任务拥有独立的 max_iterations，但与整棵树共享全局迭代计数；兄弟子任务并发执行。
//! 只在当前上下文还能向下委派时提供。

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::core::orchestrator::{ExecutionOrchestrator, RunRequest, RunScope};
use crate::core::{EngineError, ExecutionConfig, ExecutionContext, ExecutionResult};
use crate::react::{ToolCallRequest, ToolInvoker};
use crate::tools::{ToolDescriptor, ToolExecutor};

pub const DELEGATE_TASK: &str = "delegate_task";
pub const DELEGATE_TASKS: &str = "delegate_tasks";

#[derive(Debug, Deserialize)]
struct SubTaskArgs {
    task: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct SubTasksArgs {
    tasks: Vec<SubTaskArgs>,
}

/// 委派所需的父运行信息
pub(crate) struct Delegation {
    pub(crate) orchestrator: ExecutionOrchestrator,
    pub(crate) parent: ExecutionContext,
    pub(crate) config: ExecutionConfig,
    pub(crate) cancel: CancellationToken,
    pub(crate) scope: RunScope,
    pub(crate) session_id: Option<String>,
}

impl Delegation {
    async fn run_one(&self, sub: SubTaskArgs) -> ExecutionResult {
        let mut request = RunRequest::new(sub.task).with_arguments(sub.arguments);
        request.session_id = self.session_id.clone();
        tracing::info!(parent = %self.parent.lineage(), task = %request.task, "delegating sub-task");
        self.orchestrator
            .run_child(
                &self.parent,
                request,
                self.config.clone(),
                self.cancel.child_token(),
                self.scope.clone(),
            )
            .await
    }
}

/// 本次运行的工具入口：注册表工具 + 委派工具
pub(crate) struct DelegatingInvoker {
    executor: ToolExecutor,
    delegation: Option<Delegation>,
    offer_single: bool,
    offer_batch: bool,
}

impl DelegatingInvoker {
    /// allowed_tools 非空时，委派工具也必须在其中
    pub(crate) fn new(
        executor: ToolExecutor,
        delegation: Option<Delegation>,
        allowed_tools: &[String],
    ) -> Self {
        let allowed = |name: &str| allowed_tools.is_empty() || allowed_tools.iter().any(|t| t == name);
        let can = delegation.is_some();
        Self {
            executor,
            delegation,
            offer_single: can && allowed(DELEGATE_TASK),
            offer_batch: can && allowed(DELEGATE_TASKS),
        }
    }

    fn delegation(&self) -> Result<&Delegation, EngineError> {
        self.delegation
            .as_ref()
            .ok_or_else(|| EngineError::HallucinatedTool(DELEGATE_TASK.to_string()))
    }
}

fn summarize(result: &ExecutionResult) -> String {
    if result.success {
        format!(
            "Sub-task '{}' completed in {} iteration(s):\n{}",
            result.task,
            result.iterations_used,
            result.text()
        )
    } else {
        format!(
            "Sub-task '{}' {}: {}\n{}",
            result.task,
            result.terminal.as_str(),
            result.error.as_deref().unwrap_or("unknown error"),
            result.partial_result.as_deref().unwrap_or("")
        )
    }
}

fn invalid_args(tool: &str, e: serde_json::Error) -> EngineError {
    EngineError::ToolExecutionFailed(format!("invalid arguments for {tool}: {e}"))
}

#[async_trait]
impl ToolInvoker for DelegatingInvoker {
    fn catalog(&self) -> Vec<ToolDescriptor> {
        let mut tools = self.executor.descriptors();
        if self.offer_single {
            tools.push(ToolDescriptor::new(
                DELEGATE_TASK,
                "Delegate a named sub-task and wait for its result.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "task": {"type": "string", "description": "Sub-task name"},
                        "arguments": {"type": "string"}
                    },
                    "required": ["task"]
                }),
            ));
        }
        if self.offer_batch {
            tools.push(ToolDescriptor::new(
                DELEGATE_TASKS,
                "Run several independent sub-tasks concurrently.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "tasks": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "task": {"type": "string"},
                                    "arguments": {"type": "string"}
                                },
                                "required": ["task"]
                            }
                        }
                    },
                    "required": ["tasks"]
                }),
            ));
        }
        tools
    }

    async fn invoke(&self, call: &ToolCallRequest) -> Result<String, EngineError> {
        match call.tool.as_str() {
            DELEGATE_TASK if self.offer_single => {
                let delegation = self.delegation()?;
                let sub: SubTaskArgs = serde_json::from_value(call.args.clone())
                    .map_err(|e| invalid_args(DELEGATE_TASK, e))?;
                let result = delegation.run_one(sub).await;
                if delegation.cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                if result.success {
                    Ok(summarize(&result))
                } else {
                    Err(EngineError::ToolExecutionFailed(summarize(&result)))
                }
            }
            DELEGATE_TASKS if self.offer_batch => {
                let delegation = self.delegation()?;
                let batch: SubTasksArgs = serde_json::from_value(call.args.clone())
                    .map_err(|e| invalid_args(DELEGATE_TASKS, e))?;
                if batch.tasks.is_empty() {
                    return Err(EngineError::ToolExecutionFailed(
                        "delegate_tasks needs at least one task".into(),
                    ));
                }
                let results = join_all(batch.tasks.into_iter().map(|sub| delegation.run_one(sub))).await;
                if delegation.cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                let report = results.iter().map(summarize).collect::<Vec<_>>().join("\n\n");
                if results.iter().any(|r| r.success) {
                    Ok(report)
                } else {
                    Err(EngineError::ToolExecutionFailed(report))
                }
            }
            _ => self.executor.execute(&call.tool, call.args.clone()).await,
        }
    }

    fn is_self_limiting(&self, tool: &str) -> bool {
        (tool == DELEGATE_TASK && self.offer_single) || (tool == DELEGATE_TASKS && self.offer_batch)
    }
}
