//! 执行编排器：引擎入口
//!
//! 负责：校验配置 → 构造（或派生）ExecutionContext → 加载指令 → 预处理一次 → 组装本次运行的工具集
//! → 驱动 ReasonActObserveLoop 到终态 → 保存会话历史 → 发出生命周期事件。
//! 子任务委派通过 delegate_task / delegate_tasks 工具递归进入同一流程，整棵树共享一个全局迭代计数。
//! 边界上只有 ValidationError 会返回给调用方，其余错误都折叠进 ExecutionResult。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::core::delegation::{DelegatingInvoker, Delegation};
use crate::core::{
    ContextArena, EngineError, ErrorRecoveryPolicy, ExecutionConfig, ExecutionContext,
    ExecutionMetrics, ExecutionResult, TerminalState, ValidationError,
};
use crate::instructions::{validate_task_name, InstructionSource, Instructions};
use crate::memory::{validate_session_key, HistoryStore, ValueStore};
use crate::preprocess::{CommandInjector, CommandPolicy, Preprocessor, VariableValues};
use crate::react::{
    ChannelEventSink, EngineEvent, EventSink, FanoutEventSink, LoopConfig, LoopSession,
    NoopEventSink, ReasonActObserveLoop, ReasoningProvider,
};
use crate::sandbox::{ResourceLimits, SandboxExecutor};
use crate::tools::{standard_registry, ToolExecutor};

/// 一次运行请求
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub task: String,
    /// 原始参数字符串（`${ARGUMENTS}`，按 shell 规则拆分为 `${ARG_n}`）
    pub arguments: String,
    /// 会话 id：用于会话变量与历史持久化
    pub session_id: Option<String>,
    /// 调用方提供的变量（覆盖会话变量）
    pub values: HashMap<String, String>,
}

impl RunRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = arguments.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_task_name(&self.task)?;
        if let Some(session) = &self.session_id {
            validate_session_key(session)
                .map_err(|_| ValidationError::InvalidSessionId(session.clone()))?;
        }
        Ok(())
    }
}

/// 流式运行的输出：若干事件，最后恰好一个 Finished
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(EngineEvent),
    Finished(ExecutionResult),
}

/// 单棵委派树共享的运行范围：上下文树与事件出口
#[derive(Clone)]
pub(crate) struct RunScope {
    pub(crate) arena: Arc<Mutex<ContextArena>>,
    pub(crate) node: usize,
    pub(crate) events: Arc<dyn EventSink>,
}

impl RunScope {
    fn root(ctx: &ExecutionContext, events: Arc<dyn EventSink>) -> Self {
        let mut arena = ContextArena::new();
        let node = arena.insert_root(ctx);
        Self {
            arena: Arc::new(Mutex::new(arena)),
            node,
            events,
        }
    }

    /// 在当前节点下登记子上下文，返回子范围
    pub(crate) fn child(&self, ctx: &ExecutionContext) -> Self {
        let node = match self.arena.lock() {
            Ok(mut arena) => arena.insert_child(self.node, ctx),
            Err(poisoned) => poisoned.into_inner().insert_child(self.node, ctx),
        };
        Self {
            arena: Arc::clone(&self.arena),
            node,
            events: Arc::clone(&self.events),
        }
    }

    fn descendants(&self) -> usize {
        match self.arena.lock() {
            Ok(arena) => arena.descendant_count(self.node),
            Err(poisoned) => poisoned.into_inner().descendant_count(self.node),
        }
    }

    fn deepest(&self) -> usize {
        match self.arena.lock() {
            Ok(arena) => arena.max_depth_reached(self.node),
            Err(poisoned) => poisoned.into_inner().max_depth_reached(self.node),
        }
    }
}

#[derive(Clone)]
struct Inner {
    provider: Arc<dyn ReasoningProvider>,
    instructions: Arc<dyn InstructionSource>,
    sandbox: Arc<dyn SandboxExecutor>,
    events: Arc<dyn EventSink>,
    history: Option<Arc<dyn HistoryStore>>,
    values: Option<Arc<dyn ValueStore>>,
    /// CPU / 内存 / 网络上限；超时与输出上限按 ExecutionConfig 每次运行覆盖
    limits: ResourceLimits,
    tool_timeout: Duration,
}

/// 执行编排器（Clone 廉价，内部共享）
#[derive(Clone)]
pub struct ExecutionOrchestrator {
    inner: Arc<Inner>,
}

impl ExecutionOrchestrator {
    pub fn new(
        provider: Arc<dyn ReasoningProvider>,
        instructions: Arc<dyn InstructionSource>,
        sandbox: Arc<dyn SandboxExecutor>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                instructions,
                sandbox,
                events: Arc::new(NoopEventSink),
                history: None,
                values: None,
                limits: ResourceLimits::default(),
                tool_timeout: Duration::from_secs(30),
            }),
        }
    }

    /// 构建阶段调用：尚未被克隆时原地修改
    fn inner_mut(&mut self) -> &mut Inner {
        Arc::make_mut(&mut self.inner)
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.inner_mut().events = events;
        self
    }

    pub fn with_history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.inner_mut().history = Some(store);
        self
    }

    pub fn with_value_store(mut self, store: Arc<dyn ValueStore>) -> Self {
        self.inner_mut().values = Some(store);
        self
    }

    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.inner_mut().limits = limits;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.inner_mut().tool_timeout = timeout;
        self
    }

    /// 运行一个根任务直到终态
    pub async fn run(
        &self,
        request: RunRequest,
        config: &ExecutionConfig,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ValidationError> {
        config.validate()?;
        request.validate()?;
        let ctx = ExecutionContext::root(
            request.task.clone(),
            config.max_depth,
            config.global_iteration_ceiling,
        );
        let scope = RunScope::root(&ctx, Arc::clone(&self.inner.events));
        Ok(self.execute(ctx, request, config.clone(), cancel, scope).await)
    }

    /// 在已有上下文之下运行子任务；深度或全局预算超限时不做任何工作，直接返回失败结果
    pub async fn run_delegated(
        &self,
        parent: &ExecutionContext,
        request: RunRequest,
        config: &ExecutionConfig,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ValidationError> {
        config.validate()?;
        request.validate()?;
        let mut arena = ContextArena::new();
        let node = arena.insert_root(parent);
        let scope = RunScope {
            arena: Arc::new(Mutex::new(arena)),
            node,
            events: Arc::clone(&self.inner.events),
        };
        Ok(self.run_child(parent, request, config.clone(), cancel, scope).await)
    }

    /// 流式运行：先产出生命周期事件，最后产出一个 Finished
    pub fn run_stream(
        &self,
        request: RunRequest,
        config: &ExecutionConfig,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, StreamItem>, ValidationError> {
        config.validate()?;
        request.validate()?;
        let ctx = ExecutionContext::root(
            request.task.clone(),
            config.max_depth,
            config.global_iteration_ceiling,
        );
        let run_id = ctx.id.to_string();
        let task = request.task.clone();

        let (channel, rx) = ChannelEventSink::new();
        let events: Arc<dyn EventSink> = Arc::new(FanoutEventSink::new(vec![
            Arc::clone(&self.inner.events),
            Arc::new(channel),
        ]));
        let scope = RunScope::root(&ctx, events);

        let this = self.clone();
        let config = config.clone();
        let handle = tokio::spawn(async move { this.execute(ctx, request, config, cancel, scope).await });

        // 运行结束时所有发送端随任务一起释放，rx 收到 None 后再取最终结果
        let stream = stream::unfold(Some((rx, handle)), move |state| {
            let run_id = run_id.clone();
            let task = task.clone();
            async move {
                let (mut rx, handle) = state?;
                match rx.recv().await {
                    Some(event) => Some((StreamItem::Event(event), Some((rx, handle)))),
                    None => {
                        let result = match handle.await {
                            Ok(result) => result,
                            Err(e) => {
                                tracing::error!(run_id = %run_id, error = %e, "run task aborted");
                                ExecutionResult::rejected(run_id, task, format!("run aborted: {e}"))
                            }
                        };
                        Some((StreamItem::Finished(result), None))
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    /// 派生子上下文并运行；派生失败时发出 Failed 事件并返回拒绝结果
    pub(crate) fn run_child<'a>(
        &'a self,
        parent: &'a ExecutionContext,
        request: RunRequest,
        config: ExecutionConfig,
        cancel: CancellationToken,
        scope: RunScope,
    ) -> BoxFuture<'a, ExecutionResult> {
        Box::pin(async move {
            if let Err(e) = request.validate() {
                return self.reject(parent, &request.task, EngineError::Validation(e), &scope);
            }
            let child = match parent.child(request.task.clone()) {
                Ok(child) => child,
                Err(e) => {
                    tracing::warn!(
                        parent = %parent.lineage(),
                        task = %request.task,
                        error = %e,
                        "sub-task rejected before any work"
                    );
                    return self.reject(parent, &request.task, e, &scope);
                }
            };
            let scope = scope.child(&child);
            self.execute(child, request, config, cancel, scope).await
        })
    }

    /// 派生失败：子上下文从未创建，以新的 run_id 报告
    fn reject(
        &self,
        parent: &ExecutionContext,
        task: &str,
        error: EngineError,
        scope: &RunScope,
    ) -> ExecutionResult {
        let run_id = uuid::Uuid::new_v4().to_string();
        scope.events.emit(EngineEvent::Failed {
            run_id: run_id.clone(),
            terminal: TerminalState::Failed,
            error: error.to_string(),
            iterations: 0,
        });
        tracing::debug!(parent_run_id = %parent.id, task, "rejected sub-task reported");
        ExecutionResult::rejected(run_id, task, error)
    }

    fn execute(
        &self,
        ctx: ExecutionContext,
        request: RunRequest,
        config: ExecutionConfig,
        cancel: CancellationToken,
        scope: RunScope,
    ) -> BoxFuture<'_, ExecutionResult> {
        Box::pin(async move {
            let started = Instant::now();
            let run_id = ctx.id.to_string();
            scope.events.emit(EngineEvent::Started {
                run_id: run_id.clone(),
                task: ctx.task.clone(),
                depth: ctx.depth,
                parent_run_id: ctx.parent_id.map(|id| id.to_string()),
            });
            tracing::info!(run_id = %run_id, task = %ctx.task, depth = ctx.depth, "run started");

            let instructions = match self.inner.instructions.load_instructions(&ctx.task).await {
                Ok(ins) => ins,
                Err(e) => return self.fail_early(&ctx, &scope, started, e),
            };

            // 变量：内置 > 调用方 > 会话
            let session_values = match (&self.inner.values, &request.session_id) {
                (Some(store), Some(session)) => store.get(session).await.unwrap_or_else(|e| {
                    tracing::warn!(session = %session, error = %e, "session values unavailable");
                    HashMap::new()
                }),
                _ => HashMap::new(),
            };
            let values = VariableValues::new(request.arguments.clone())
                .with_session_id(request.session_id.clone().unwrap_or_else(|| run_id.clone()))
                .with_working_dir(instructions.working_directory.clone())
                .with_custom(request.values.clone())
                .with_session_values(session_values);

            let command_limits = self
                .inner
                .limits
                .clone()
                .with_timeout(config.command_timeout)
                .with_max_output_chars(config.max_command_output_chars);
            let injector = CommandInjector::new(
                effective_policy(&config, &instructions),
                Arc::clone(&self.inner.sandbox),
                command_limits.clone(),
            );
            let processed = match Preprocessor::new(injector)
                .process(
                    &instructions.text,
                    &values,
                    &instructions.working_directory,
                    &instructions.source_dir,
                    &cancel,
                )
                .await
            {
                Ok(p) => p,
                Err(e) => return self.fail_early(&ctx, &scope, started, e),
            };
            for warning in &processed.warnings {
                tracing::warn!(run_id = %run_id, warning = %warning, "instruction preprocessing");
            }

            let registry = standard_registry(
                &instructions.working_directory,
                &instructions.source_dir,
                Arc::clone(&self.inner.sandbox),
                command_limits.with_timeout(config.iteration_timeout),
                cancel.clone(),
            )
            .restricted_to(&instructions.allowed_tools);
            let delegation = ctx.can_delegate().then(|| Delegation {
                orchestrator: self.clone(),
                parent: ctx.clone(),
                config: config.clone(),
                cancel: cancel.clone(),
                scope: scope.clone(),
                session_id: request.session_id.clone(),
            });
            let invoker = DelegatingInvoker::new(
                ToolExecutor::new(registry, self.inner.tool_timeout),
                delegation,
                &instructions.allowed_tools,
            );

            let history = match (&self.inner.history, &request.session_id) {
                (Some(store), Some(session)) if ctx.is_root() => {
                    store.load(session).await.unwrap_or_else(|e| {
                        tracing::warn!(session = %session, error = %e, "conversation history unavailable");
                        Vec::new()
                    })
                }
                _ => Vec::new(),
            };

            let recovery = ErrorRecoveryPolicy::new(config.max_retries_per_tool);
            let react = ReasonActObserveLoop::new(LoopConfig {
                max_iterations: config.max_iterations,
                iteration_timeout: config.iteration_timeout,
                max_consecutive_provider_failures: config.max_consecutive_provider_failures,
                max_reference_chars: config.max_command_output_chars.saturating_mul(5),
            });
            let model_hint = config
                .model_hint
                .as_deref()
                .or(instructions.model_hint.as_deref());
            let outcome = react
                .run(
                    LoopSession {
                        run_id: &run_id,
                        task: &ctx.task,
                        lineage: &ctx.chain,
                        instructions: &processed.text,
                        references: &processed.references,
                        provider: self.inner.provider.as_ref(),
                        tools: &invoker,
                        recovery: &recovery,
                        budget: ctx.budget(),
                        events: scope.events.as_ref(),
                        cancel: &cancel,
                        model_hint,
                    },
                    history,
                )
                .await;

            if let (Some(store), Some(session)) = (&self.inner.history, &request.session_id) {
                if ctx.is_root() {
                    if let Err(e) = store.save(session, &outcome.history).await {
                        tracing::warn!(session = %session, error = %e, "failed to save conversation history");
                    }
                }
            }

            let iterations = outcome.iterations();
            let metrics = ExecutionMetrics {
                duration_ms: started.elapsed().as_millis() as u64,
                retry_count: outcome.state.retry_count,
                injected_commands: processed.injected_count(),
                tool_calls: outcome.state.tool_calls,
                errors: outcome.state.error_count,
                subtasks: scope.descendants(),
                max_depth_reached: scope.deepest(),
            };
            let success = outcome.terminal == TerminalState::Completed;
            let event = if success {
                EngineEvent::Completed {
                    run_id: run_id.clone(),
                    iterations,
                }
            } else {
                EngineEvent::Failed {
                    run_id: run_id.clone(),
                    terminal: outcome.terminal,
                    error: outcome.error.clone().unwrap_or_default(),
                    iterations,
                }
            };
            scope.events.emit(event);
            tracing::info!(
                run_id = %run_id,
                task = %ctx.task,
                depth = ctx.depth,
                terminal = ?outcome.terminal,
                iterations,
                duration_ms = metrics.duration_ms,
                "run finished"
            );

            ExecutionResult {
                run_id,
                task: ctx.task,
                success,
                terminal: outcome.terminal,
                final_text: outcome.final_answer,
                iterations_used: iterations,
                metrics,
                partial_result: outcome.partial_result,
                error: outcome.error,
            }
        })
    }

    /// 循环开始前失败（指令缺失、预处理被取消等）
    fn fail_early(
        &self,
        ctx: &ExecutionContext,
        scope: &RunScope,
        started: Instant,
        error: EngineError,
    ) -> ExecutionResult {
        let run_id = ctx.id.to_string();
        let error = match error {
            EngineError::Cancelled => "cancelled".to_string(),
            other => other.to_string(),
        };
        tracing::warn!(run_id = %run_id, task = %ctx.task, error = %error, "run failed before the loop started");
        scope.events.emit(EngineEvent::Failed {
            run_id: run_id.clone(),
            terminal: TerminalState::Failed,
            error: error.clone(),
            iterations: 0,
        });
        let mut result = ExecutionResult::rejected(run_id, ctx.task.clone(), error);
        result.metrics.duration_ms = started.elapsed().as_millis() as u64;
        result
    }
}

/// 合并引擎白名单与任务声明：任务只能收窄引擎白名单；引擎未配置白名单时，
/// 仅在显式 permissive 下采用任务声明
fn effective_policy(config: &ExecutionConfig, instructions: &Instructions) -> CommandPolicy {
    match (&config.command_allowlist, &instructions.allowed_commands) {
        (Some(global), Some(task)) => {
            let global_policy = CommandPolicy::new(Some(global.as_slice()), false);
            let narrowed: Vec<String> = task
                .iter()
                .filter(|entry| {
                    let bare = entry.trim().trim_end_matches('*').trim_end_matches(':');
                    global_policy.check(bare).is_ok()
                })
                .cloned()
                .collect();
            CommandPolicy::new(Some(narrowed.as_slice()), false)
        }
        (Some(global), None) => CommandPolicy::new(Some(global.as_slice()), config.permissive_commands),
        (None, Some(task)) if config.permissive_commands => {
            CommandPolicy::new(Some(task.as_slice()), false)
        }
        (None, _) => CommandPolicy::new(None, config.permissive_commands),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instructions(commands: Option<&[&str]>) -> Instructions {
        let ins = Instructions::new("t", "", ".");
        match commands {
            Some(c) => ins.with_allowed_commands(c.iter().copied()),
            None => ins,
        }
    }

    #[test]
    fn test_task_commands_only_narrow() {
        let config = ExecutionConfig::default().with_command_allowlist(["git status", "echo"]);
        let policy = effective_policy(&config, &instructions(Some(&["echo", "rm"])));
        assert!(policy.check("echo hi").is_ok());
        assert!(policy.check("rm -r x").is_err());
        assert!(policy.check("git status").is_err());
    }

    #[test]
    fn test_no_global_allowlist_denies_task_commands() {
        let config = ExecutionConfig::default();
        let policy = effective_policy(&config, &instructions(Some(&["echo"])));
        assert!(policy.check("echo hi").is_err());
    }

    #[test]
    fn test_permissive_uses_task_commands() {
        let mut config = ExecutionConfig::default();
        config.permissive_commands = true;
        let policy = effective_policy(&config, &instructions(Some(&["echo:*"])));
        assert!(policy.check("echo hi").is_ok());
        assert!(policy.check("ls").is_err());
    }

    #[test]
    fn test_request_validation() {
        assert!(RunRequest::new("ok-task").validate().is_ok());
        assert!(matches!(
            RunRequest::new("../x").validate(),
            Err(ValidationError::InvalidTaskName(_))
        ));
        assert!(matches!(
            RunRequest::new("t").with_session("bad/id").validate(),
            Err(ValidationError::InvalidSessionId(_))
        ));
    }
}
