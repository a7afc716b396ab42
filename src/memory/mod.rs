//! 记忆层：对话历史与会话持久化

pub mod conversation;
pub mod persistence;

pub use conversation::{ConversationMemory, Message, Role};
pub use persistence::{
    validate_session_key, ConversationPersistence, HistoryStore, InMemoryStore, JsonFileStore,
    ValueStore,
};
