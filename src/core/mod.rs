//! 核心编排层：错误与恢复、预算与委派树、运行状态、编排器入口

pub mod budget;
pub mod builder;
pub mod context;
pub mod delegation;
pub mod error;
pub mod execution;
pub mod orchestrator;
pub mod recovery;
pub mod state;

pub use budget::IterationBudget;
pub use builder::{create_llm_from_config, OrchestratorBuilder};
pub use context::{ContextArena, ContextNode, ExecutionContext};
pub use delegation::{DELEGATE_TASK, DELEGATE_TASKS};
pub use error::{EngineError, ProviderError, RecoveryDirective, ValidationError};
pub use execution::{ExecutionConfig, ExecutionMetrics, ExecutionResult, TerminalState};
pub use orchestrator::{ExecutionOrchestrator, RunRequest, StreamItem};
pub use recovery::{ErrorRecoveryPolicy, Fingerprint};
pub use state::{ExecutionState, LoopPhase, Observation, ObservationKind};
