//! Reason-Act-Observe 主循环
//!
//! THINKING → (ACTING → OBSERVING → THINKING)* → {COMPLETED | EXHAUSTED | FAILED}
//!
//! - 每轮 THINKING 先从全局预算扣一次，再计入本上下文的 iteration
//! - 推理调用与工具调用都受 iteration_timeout 与取消信号约束
//! - 推理失败可恢复，连续失败达到上限升级为 FAILED
//! - 已放弃的失败指纹不再派发
//! - 未得到最终回答的终态都会合成部分结果

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::recovery::{malformed_decision_prompt, provider_failure_prompt};
use crate::core::{
    EngineError, ErrorRecoveryPolicy, ExecutionState, Fingerprint, IterationBudget, LoopPhase,
    ObservationKind, ProviderError, TerminalState,
};
use crate::memory::{ConversationMemory, Message};
use crate::preprocess::ReferenceCatalog;
use crate::react::decision::{ReasoningDecision, ToolCallRequest};
use crate::react::events::{EngineEvent, EventSink};
use crate::react::prompt::{PromptAssembler, PromptInput};
use crate::react::provider::ReasoningProvider;
use crate::sandbox::truncate_output;
use crate::tools::{ToolDescriptor, ToolExecutor};

/// 渐进式披露：按需加载引用的内置工具名
pub const LOAD_REFERENCE_TOOL: &str = "load_reference";
/// 对话历史最多保留轮数
const MAX_HISTORY_TURNS: usize = 50;
/// 事件中工具输出预览字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 工具调用入口（循环不关心工具来自注册表还是子任务委派）
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    fn catalog(&self) -> Vec<ToolDescriptor>;

    async fn invoke(&self, call: &ToolCallRequest) -> Result<String, EngineError>;

    /// 自带超时 / 预算控制的工具（如子任务委派）不受单轮超时约束
    fn is_self_limiting(&self, _tool: &str) -> bool {
        false
    }
}

#[async_trait]
impl ToolInvoker for ToolExecutor {
    fn catalog(&self) -> Vec<ToolDescriptor> {
        self.descriptors()
    }

    async fn invoke(&self, call: &ToolCallRequest) -> Result<String, EngineError> {
        self.execute(&call.tool, call.args.clone()).await
    }
}

/// 循环参数（来自 ExecutionConfig）
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: usize,
    pub iteration_timeout: Duration,
    pub max_consecutive_provider_failures: u32,
    /// load_reference 单次返回的最大字符数
    pub max_reference_chars: usize,
}

/// 单次运行所需的协作者
pub struct LoopSession<'a> {
    pub run_id: &'a str,
    pub task: &'a str,
    pub lineage: &'a [String],
    pub instructions: &'a str,
    pub references: &'a ReferenceCatalog,
    pub provider: &'a dyn ReasoningProvider,
    pub tools: &'a dyn ToolInvoker,
    pub recovery: &'a ErrorRecoveryPolicy,
    pub budget: &'a IterationBudget,
    pub events: &'a dyn EventSink,
    pub cancel: &'a CancellationToken,
    pub model_hint: Option<&'a str>,
}

/// 循环终态与运行痕迹
#[derive(Debug)]
pub struct LoopOutcome {
    pub terminal: TerminalState,
    pub final_answer: Option<String>,
    pub partial_result: Option<String>,
    pub error: Option<String>,
    pub state: ExecutionState,
    /// 更新后的对话历史（供会话持久化）
    pub history: Vec<Message>,
}

impl LoopOutcome {
    pub fn iterations(&self) -> usize {
        self.state.iteration
    }
}

/// 单轮工具调用失败时的处理方式
enum Interrupt {
    Cancelled,
}

pub struct ReasonActObserveLoop {
    config: LoopConfig,
    assembler: PromptAssembler,
}

impl ReasonActObserveLoop {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            assembler: PromptAssembler::new(),
        }
    }

    pub async fn run(&self, session: LoopSession<'_>, history: Vec<Message>) -> LoopOutcome {
        let mut state = ExecutionState::new();
        let mut conversation = ConversationMemory::with_history(MAX_HISTORY_TURNS, history);
        conversation.push(Message::user(format!("Begin task: {}", session.task)));

        let mut catalog = session.tools.catalog();
        if !session.references.is_empty() && !catalog.iter().any(|t| t.name == LOAD_REFERENCE_TOOL) {
            catalog.push(load_reference_descriptor());
        }

        tracing::info!(
            run_id = %session.run_id,
            task = %session.task,
            max_iterations = self.config.max_iterations,
            tools = catalog.len(),
            "react loop started"
        );

        loop {
            if session.cancel.is_cancelled() {
                return self.finish_failed(&session, state, conversation, EngineError::Cancelled);
            }
            if state.iteration >= self.config.max_iterations {
                let reason = format!("iteration limit {} reached", self.config.max_iterations);
                return self.finish_exhausted(&session, state, conversation, reason);
            }
            if !session.budget.try_consume() {
                let err = EngineError::BudgetExceeded {
                    consumed: session.budget.consumed(),
                    ceiling: session.budget.ceiling(),
                };
                return self.finish_exhausted(&session, state, conversation, err.to_string());
            }

            // THINKING
            state.iteration += 1;
            state.phase = LoopPhase::Thinking;
            session.events.emit(EngineEvent::IterationProgress {
                run_id: session.run_id.to_string(),
                iteration: state.iteration,
                max_iterations: self.config.max_iterations,
            });

            let payload = self.assembler.assemble(&PromptInput {
                task: session.task,
                lineage: session.lineage,
                instructions: session.instructions,
                references: session.references,
                tools: &catalog,
                iteration: state.iteration,
                max_iterations: self.config.max_iterations,
            });

            let decision = tokio::select! {
                res = tokio::time::timeout(
                    self.config.iteration_timeout,
                    session.provider.complete(&payload, conversation.messages(), session.model_hint),
                ) => match res {
                    Ok(r) => r,
                    Err(_) => Err(ProviderError::Timeout(self.config.iteration_timeout)),
                },
                _ = session.cancel.cancelled() => {
                    return self.finish_failed(&session, state, conversation, EngineError::Cancelled);
                }
            };

            let decision = match decision {
                Ok(d) => {
                    state.consecutive_provider_failures = 0;
                    d
                }
                Err(e) => {
                    state.consecutive_provider_failures += 1;
                    state.record_error();
                    state.observe(ObservationKind::ProviderError, e.to_string());
                    let limit = self.config.max_consecutive_provider_failures;
                    tracing::warn!(
                        run_id = %session.run_id,
                        iteration = state.iteration,
                        consecutive = state.consecutive_provider_failures,
                        error = %e,
                        "reasoning provider call failed"
                    );
                    if state.consecutive_provider_failures >= limit {
                        return self.finish_failed(&session, state, conversation, EngineError::Provider(e));
                    }
                    conversation.push(Message::user(provider_failure_prompt(
                        &e.to_string(),
                        state.consecutive_provider_failures,
                        limit,
                    )));
                    continue;
                }
            };

            match decision {
                ReasoningDecision::FinalAnswer {
                    rationale,
                    answer,
                    discarded_tool_call,
                } => {
                    if let Some(call) = discarded_tool_call {
                        tracing::debug!(tool = %call.tool, "tool call ignored, final answer given");
                    }
                    conversation.push(Message::assistant(
                        serde_json::json!({"thought": rationale, "final_answer": answer, "done": true})
                            .to_string(),
                    ));
                    state.phase = LoopPhase::Completed;
                    return self.finish_completed(&session, state, conversation, answer);
                }
                ReasoningDecision::Malformed { raw, reason } => {
                    state.record_error();
                    state.observe(ObservationKind::Malformed, reason.clone());
                    tracing::debug!(run_id = %session.run_id, iteration = state.iteration, reason = %reason, "malformed decision");
                    if !raw.trim().is_empty() {
                        conversation.push(Message::assistant(raw));
                    }
                    state.phase = LoopPhase::Observing;
                    conversation.push(Message::user(malformed_decision_prompt(&reason)));
                }
                ReasoningDecision::ToolCall { rationale, call } => {
                    conversation.push(Message::assistant(
                        serde_json::json!({"thought": rationale, "tool": call.tool, "args": call.args})
                            .to_string(),
                    ));
                    if let Err(Interrupt::Cancelled) =
                        self.act(&session, &mut state, &mut conversation, call).await
                    {
                        return self.finish_failed(&session, state, conversation, EngineError::Cancelled);
                    }
                }
            }
        }
    }

    /// ACTING + OBSERVING
    async fn act(
        &self,
        session: &LoopSession<'_>,
        state: &mut ExecutionState,
        conversation: &mut ConversationMemory,
        call: ToolCallRequest,
    ) -> Result<(), Interrupt> {
        state.phase = LoopPhase::Acting;
        let fingerprint = Fingerprint::new(&call.tool, &call.args);

        if session.recovery.is_exhausted(state, &fingerprint) {
            let directive =
                session
                    .recovery
                    .on_tool_failure(state, &fingerprint, "approach previously abandoned");
            state.observe(ObservationKind::Recovery, directive.prompt().to_string());
            state.phase = LoopPhase::Observing;
            conversation.push(Message::user(format!(
                "Observation ({}, skipped):\n{}",
                call.tool,
                directive.prompt()
            )));
            tracing::info!(fingerprint = %fingerprint, "abandoned approach not dispatched");
            return Ok(());
        }

        state.tool_calls += 1;
        session.events.emit(EngineEvent::ToolCallIssued {
            run_id: session.run_id.to_string(),
            iteration: state.iteration,
            tool: call.tool.clone(),
            args: call.args.clone(),
        });

        let start = Instant::now();
        let result = if call.tool == LOAD_REFERENCE_TOOL && !session.references.is_empty() {
            self.load_reference(state, session.references, &call.args).await
        } else if session.tools.is_self_limiting(&call.tool) {
            tokio::select! {
                r = session.tools.invoke(&call) => r,
                _ = session.cancel.cancelled() => Err(EngineError::Cancelled),
            }
        } else {
            tokio::select! {
                r = tokio::time::timeout(self.config.iteration_timeout, session.tools.invoke(&call)) => {
                    r.unwrap_or_else(|_| Err(EngineError::ToolTimeout(call.tool.clone())))
                }
                _ = session.cancel.cancelled() => Err(EngineError::Cancelled),
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        state.phase = LoopPhase::Observing;

        match result {
            Ok(output) => {
                state.record_success(&call.tool, &output);
                state.observe(
                    ObservationKind::ToolResult {
                        tool: call.tool.clone(),
                        success: true,
                    },
                    output.clone(),
                );
                session.events.emit(EngineEvent::ToolResultReceived {
                    run_id: session.run_id.to_string(),
                    iteration: state.iteration,
                    tool: call.tool.clone(),
                    success: true,
                    preview: preview(&output),
                    duration_ms,
                });
                conversation.push(Message::user(format!(
                    "Observation ({}, ok):\n{}",
                    call.tool, output
                )));
                Ok(())
            }
            Err(EngineError::Cancelled) => Err(Interrupt::Cancelled),
            Err(e) => {
                let error = e.to_string();
                state.record_error();
                let directive = session.recovery.on_tool_failure(state, &fingerprint, &error);
                state.observe(
                    ObservationKind::ToolResult {
                        tool: call.tool.clone(),
                        success: false,
                    },
                    error.clone(),
                );
                session.events.emit(EngineEvent::ToolResultReceived {
                    run_id: session.run_id.to_string(),
                    iteration: state.iteration,
                    tool: call.tool.clone(),
                    success: false,
                    preview: preview(&error),
                    duration_ms,
                });
                tracing::debug!(
                    tool = %call.tool,
                    abandon = directive.is_abandon(),
                    error = %error,
                    "tool call failed"
                );
                conversation.push(Message::user(format!(
                    "Observation ({}, error):\n{}\n{}",
                    call.tool,
                    error,
                    directive.prompt()
                )));
                Ok(())
            }
        }
    }

    /// 按需加载目录中的引用；同一引用只读取一次
    async fn load_reference(
        &self,
        state: &mut ExecutionState,
        references: &ReferenceCatalog,
        args: &Value,
    ) -> Result<String, EngineError> {
        let name = args
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::ToolExecutionFailed("missing required argument 'name'".into()))?;
        let entry = references.get(name).ok_or_else(|| {
            let available: Vec<&str> = references.entries().iter().map(|e| e.name.as_str()).collect();
            EngineError::ToolExecutionFailed(format!(
                "unknown reference '{name}'; available: {}",
                available.join(", ")
            ))
        })?;
        if state.loaded_references.contains(&entry.name) {
            return Ok(format!(
                "Reference '{}' was already loaded earlier in this conversation.",
                entry.name
            ));
        }
        let content = tokio::fs::read_to_string(&entry.path).await?;
        let (content, _) = truncate_output(&content, self.config.max_reference_chars);
        state.loaded_references.insert(entry.name.clone());
        tracing::debug!(reference = %entry.name, "reference loaded");
        Ok(format!("Contents of {}:\n{}", entry.name, content))
    }

    fn finish_completed(
        &self,
        session: &LoopSession<'_>,
        state: ExecutionState,
        conversation: ConversationMemory,
        answer: String,
    ) -> LoopOutcome {
        tracing::info!(run_id = %session.run_id, iterations = state.iteration, "react loop completed");
        LoopOutcome {
            terminal: TerminalState::Completed,
            final_answer: Some(answer),
            partial_result: None,
            error: None,
            state,
            history: conversation.into_messages(),
        }
    }

    fn finish_exhausted(
        &self,
        session: &LoopSession<'_>,
        mut state: ExecutionState,
        conversation: ConversationMemory,
        reason: String,
    ) -> LoopOutcome {
        state.phase = LoopPhase::Exhausted;
        tracing::info!(run_id = %session.run_id, iterations = state.iteration, reason = %reason, "react loop exhausted");
        let partial = session.recovery.synthesize_partial(&state, &reason);
        LoopOutcome {
            terminal: TerminalState::Exhausted,
            final_answer: None,
            partial_result: Some(partial),
            error: Some(reason),
            state,
            history: conversation.into_messages(),
        }
    }

    fn finish_failed(
        &self,
        session: &LoopSession<'_>,
        mut state: ExecutionState,
        conversation: ConversationMemory,
        error: EngineError,
    ) -> LoopOutcome {
        state.phase = LoopPhase::Failed;
        let reason = match &error {
            EngineError::Cancelled => "cancelled".to_string(),
            other => other.to_string(),
        };
        tracing::warn!(run_id = %session.run_id, iterations = state.iteration, error = %reason, "react loop failed");
        let partial = session.recovery.synthesize_partial(&state, &reason);
        LoopOutcome {
            terminal: TerminalState::Failed,
            final_answer: None,
            partial_result: Some(partial),
            error: Some(reason),
            state,
            history: conversation.into_messages(),
        }
    }
}

fn load_reference_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        LOAD_REFERENCE_TOOL,
        "Load one of the available references by name.",
        serde_json::json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        }),
    )
}

fn preview(text: &str) -> String {
    let mut p: String = text.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        p.push_str("...");
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::ContextReferenceScanner;
    use crate::react::events::NoopEventSink;
    use crate::tools::{EchoTool, ToolRegistry};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// 按脚本返回决策，用完后重复最后一个
    struct Scripted {
        script: Mutex<Vec<Result<ReasoningDecision, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(script: Vec<Result<ReasoningDecision, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ReasoningProvider for Scripted {
        async fn complete(
            &self,
            _payload: &str,
            _history: &[Message],
            _hint: Option<&str>,
        ) -> Result<ReasoningDecision, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    struct Failing {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolInvoker for Failing {
        fn catalog(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor::new("flaky", "always fails", json!({}))]
        }

        async fn invoke(&self, _call: &ToolCallRequest) -> Result<String, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::ToolExecutionFailed("boom".into()))
        }
    }

    fn config(max_iterations: usize) -> LoopConfig {
        LoopConfig {
            max_iterations,
            iteration_timeout: Duration::from_secs(5),
            max_consecutive_provider_failures: 3,
            max_reference_chars: 1000,
        }
    }

    fn echo_tools() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        ToolExecutor::new(registry, Duration::from_secs(5))
    }

    struct Fixture {
        references: ReferenceCatalog,
        recovery: ErrorRecoveryPolicy,
        budget: IterationBudget,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new(ceiling: usize) -> Self {
            Self {
                references: ReferenceCatalog::default(),
                recovery: ErrorRecoveryPolicy::new(3),
                budget: IterationBudget::new(ceiling),
                cancel: CancellationToken::new(),
            }
        }

        fn session<'a>(
            &'a self,
            provider: &'a dyn ReasoningProvider,
            tools: &'a dyn ToolInvoker,
        ) -> LoopSession<'a> {
            LoopSession {
                run_id: "run",
                task: "demo",
                lineage: &[],
                instructions: "Do the demo.",
                references: &self.references,
                provider,
                tools,
                recovery: &self.recovery,
                budget: &self.budget,
                events: &NoopEventSink,
                cancel: &self.cancel,
                model_hint: None,
            }
        }
    }

    #[tokio::test]
    async fn test_completes_after_tool_call() {
        let fx = Fixture::new(100);
        let provider = Scripted::new(vec![
            Ok(ReasoningDecision::tool_call("echo", json!({"text": "hi"}))),
            Ok(ReasoningDecision::final_answer("said hi")),
        ]);
        let tools = echo_tools();
        let out = ReasonActObserveLoop::new(config(5))
            .run(fx.session(&provider, &tools), Vec::new())
            .await;
        assert_eq!(out.terminal, TerminalState::Completed);
        assert_eq!(out.final_answer.as_deref(), Some("said hi"));
        assert_eq!(out.iterations(), 2);
        assert_eq!(out.state.successful_calls, 1);
        assert!(out.history.iter().any(|m| m.content.contains("Observation (echo, ok):\nhi")));
    }

    #[tokio::test]
    async fn test_exhausts_after_max_iterations() {
        let fx = Fixture::new(100);
        let provider = Scripted::new(vec![Ok(ReasoningDecision::tool_call("echo", json!({"text": "again"})))]);
        let tools = echo_tools();
        let out = ReasonActObserveLoop::new(config(3))
            .run(fx.session(&provider, &tools), Vec::new())
            .await;
        assert_eq!(out.terminal, TerminalState::Exhausted);
        assert_eq!(out.iterations(), 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        let partial = out.partial_result.unwrap();
        assert!(partial.contains("Objectives partially completed: 3"));
    }

    #[tokio::test]
    async fn test_abandoned_fingerprint_not_dispatched() {
        let fx = Fixture::new(100);
        let provider = Scripted::new(vec![Ok(ReasoningDecision::tool_call("flaky", json!({"x": 1})))]);
        let tools = Failing {
            calls: AtomicUsize::new(0),
        };
        let out = ReasonActObserveLoop::new(config(6))
            .run(fx.session(&provider, &tools), Vec::new())
            .await;
        assert_eq!(out.terminal, TerminalState::Exhausted);
        // 3 次重试 + 第 4 次放弃；之后的迭代不再派发
        assert_eq!(tools.calls.load(Ordering::SeqCst), 4);
        assert_eq!(out.state.retry_count, 3);
    }

    #[tokio::test]
    async fn test_malformed_is_fed_back() {
        let fx = Fixture::new(100);
        let provider = Scripted::new(vec![
            Ok(ReasoningDecision::malformed("hmm", "no JSON")),
            Ok(ReasoningDecision::final_answer("ok")),
        ]);
        let tools = echo_tools();
        let out = ReasonActObserveLoop::new(config(5))
            .run(fx.session(&provider, &tools), Vec::new())
            .await;
        assert_eq!(out.terminal, TerminalState::Completed);
        assert_eq!(out.state.error_count, 1);
        assert!(out.history.iter().any(|m| m.content.contains("Please use a tool")));
    }

    #[tokio::test]
    async fn test_provider_failures_escalate() {
        let fx = Fixture::new(100);
        let provider = Scripted::new(vec![Err(ProviderError::Unavailable("down".into()))]);
        let tools = echo_tools();
        let out = ReasonActObserveLoop::new(config(10))
            .run(fx.session(&provider, &tools), Vec::new())
            .await;
        assert_eq!(out.terminal, TerminalState::Failed);
        assert_eq!(out.iterations(), 3);
        assert!(out.error.unwrap().contains("unavailable"));
        assert!(out.partial_result.is_some());
    }

    #[tokio::test]
    async fn test_provider_recovers_before_limit() {
        let fx = Fixture::new(100);
        let provider = Scripted::new(vec![
            Err(ProviderError::Unavailable("blip".into())),
            Err(ProviderError::Unavailable("blip".into())),
            Ok(ReasoningDecision::final_answer("fine")),
        ]);
        let tools = echo_tools();
        let out = ReasonActObserveLoop::new(config(10))
            .run(fx.session(&provider, &tools), Vec::new())
            .await;
        assert_eq!(out.terminal, TerminalState::Completed);
    }

    #[tokio::test]
    async fn test_global_budget_caps_loop() {
        let fx = Fixture::new(2);
        let provider = Scripted::new(vec![Ok(ReasoningDecision::tool_call("echo", json!({"text": "x"})))]);
        let tools = echo_tools();
        let out = ReasonActObserveLoop::new(config(10))
            .run(fx.session(&provider, &tools), Vec::new())
            .await;
        assert_eq!(out.terminal, TerminalState::Exhausted);
        assert_eq!(out.iterations(), 2);
        assert!(out.error.unwrap().contains("global iteration budget"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fx = Fixture::new(100);
        fx.cancel.cancel();
        let provider = Scripted::new(vec![Ok(ReasoningDecision::final_answer("never"))]);
        let tools = echo_tools();
        let out = ReasonActObserveLoop::new(config(5))
            .run(fx.session(&provider, &tools), Vec::new())
            .await;
        assert_eq!(out.terminal, TerminalState::Failed);
        assert_eq!(out.error.as_deref(), Some("cancelled"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_load_reference_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("guide.md"), "GUIDE BODY").unwrap();
        let mut fx = Fixture::new(100);
        fx.references = ContextReferenceScanner.scan("See guide.md for details.", dir.path());
        let provider = Scripted::new(vec![
            Ok(ReasoningDecision::tool_call(LOAD_REFERENCE_TOOL, json!({"name": "guide.md"}))),
            Ok(ReasoningDecision::tool_call(LOAD_REFERENCE_TOOL, json!({"name": "guide.md"}))),
            Ok(ReasoningDecision::final_answer("read")),
        ]);
        let tools = echo_tools();
        let out = ReasonActObserveLoop::new(config(5))
            .run(fx.session(&provider, &tools), Vec::new())
            .await;
        assert_eq!(out.terminal, TerminalState::Completed);
        assert!(out.state.loaded_references.contains("guide.md"));
        let bodies = out.history.iter().filter(|m| m.content.contains("GUIDE BODY")).count();
        assert_eq!(bodies, 1);
        assert!(out.history.iter().any(|m| m.content.contains("already loaded")));
    }
}
