//! 编排器构建器：由 AppConfig 统一装配推理后端、指令来源、沙箱、会话存储与事件出口
//!
//! CLI 与嵌入方共用同一套装配逻辑；任一组件都可以在 build 前替换（测试常用）。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{EngineError, ExecutionConfig, ExecutionOrchestrator};
use crate::instructions::{DirectoryInstructionSource, InstructionSource};
use crate::llm::{
    create_deepseek_client, deepseek_api_key, LlmClient, MockLlmClient, OpenAiClient,
    RetryingLlmClient,
};
use crate::memory::{HistoryStore, JsonFileStore, ValueStore};
use crate::react::{EventSink, LlmReasoningProvider, ReasoningProvider};
use crate::sandbox::{create_executor, SandboxExecutor};

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock），并包上重试
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let retry = cfg.llm.retry.clone();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
        "openai" if openai_key.is_some() => {
            tracing::info!(model = %cfg.llm.model, "Using OpenAI-compatible LLM");
            let client = OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                openai_key.as_deref(),
            );
            Arc::new(RetryingLlmClient::new(client, retry))
        }
        "deepseek" if deepseek_api_key().is_some() => {
            tracing::info!(model = %cfg.llm.model, "Using DeepSeek LLM");
            let client = create_deepseek_client(Some(&cfg.llm.model), cfg.llm.base_url.as_deref());
            Arc::new(RetryingLlmClient::new(client, retry))
        }
        other => {
            tracing::warn!(provider = other, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    provider: Option<Arc<dyn ReasoningProvider>>,
    instructions: Option<Arc<dyn InstructionSource>>,
    sandbox: Option<Arc<dyn SandboxExecutor>>,
    events: Option<Arc<dyn EventSink>>,
    history: Option<Arc<dyn HistoryStore>>,
    values: Option<Arc<dyn ValueStore>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            provider: None,
            instructions: None,
            sandbox: None,
            events: None,
            history: None,
            values: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 单次运行配置（已校验）
    pub fn execution_config(&self) -> Result<ExecutionConfig, EngineError> {
        Ok(self.config.to_execution_config()?)
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 直接指定推理提供方（优先于 with_llm）
    pub fn with_provider(mut self, provider: Arc<dyn ReasoningProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_instruction_source(mut self, source: Arc<dyn InstructionSource>) -> Self {
        self.instructions = Some(source);
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn SandboxExecutor>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    pub fn with_value_store(mut self, store: Arc<dyn ValueStore>) -> Self {
        self.values = Some(store);
        self
    }

    pub fn build(self) -> Result<ExecutionOrchestrator, EngineError> {
        let cfg = &self.config;
        let mode = cfg.sandbox.mode()?;

        let provider = match self.provider {
            Some(p) => p,
            None => {
                let llm = self.llm.unwrap_or_else(|| create_llm_from_config(cfg));
                Arc::new(LlmReasoningProvider::new(llm)) as Arc<dyn ReasoningProvider>
            }
        };
        let instructions = self.instructions.unwrap_or_else(|| {
            Arc::new(DirectoryInstructionSource::new(&cfg.instructions.root)) as Arc<dyn InstructionSource>
        });
        let sandbox = match self.sandbox {
            Some(s) => s,
            None => create_executor(mode, &cfg.sandbox.image)?,
        };

        let mut orchestrator = ExecutionOrchestrator::new(provider, instructions, sandbox)
            .with_resource_limits(cfg.sandbox.resource_limits())
            .with_tool_timeout(cfg.tool_timeout());

        // 会话存储：未显式指定时按 [sessions] 使用 JSON 文件
        let file_store = cfg
            .sessions
            .enabled
            .then(|| Arc::new(JsonFileStore::new(cfg.sessions.dir.clone())));
        let history = self
            .history
            .or_else(|| file_store.clone().map(|s| s as Arc<dyn HistoryStore>));
        let values = self
            .values
            .or_else(|| file_store.map(|s| s as Arc<dyn ValueStore>));
        if let Some(store) = history {
            orchestrator = orchestrator.with_history_store(store);
        }
        if let Some(store) = values {
            orchestrator = orchestrator.with_value_store(store);
        }
        if let Some(events) = self.events {
            orchestrator = orchestrator.with_event_sink(events);
        }

        tracing::info!(
            sandbox = %mode,
            instructions_root = %cfg.instructions.root.display(),
            sessions = cfg.sessions.enabled,
            "orchestrator ready"
        );
        Ok(orchestrator)
    }
}
