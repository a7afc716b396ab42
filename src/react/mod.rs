//! 认知层：推理决策、提示词组装、事件出口、Reason-Act-Observe 主循环

pub mod decision;
pub mod events;
pub mod loop_;
pub mod prompt;
pub mod provider;

pub use decision::{parse_decision, DecisionWire, ReasoningDecision, ToolCallRequest};
pub use events::{
    BroadcastEventSink, ChannelEventSink, EngineEvent, EventSink, FanoutEventSink, NoopEventSink,
};
pub use loop_::{
    LoopConfig, LoopOutcome, LoopSession, ReasonActObserveLoop, ToolInvoker, LOAD_REFERENCE_TOOL,
};
pub use prompt::{PromptAssembler, PromptInput};
pub use provider::{LlmReasoningProvider, ReasoningProvider};
