//! 会话历史与会话变量的持久化
//!
//! - `HistoryStore`：按会话 key 加载 / 保存对话历史
//! - `ValueStore`：按会话 id 读取变量表，供变量替换使用
//!
//! 文件实现为每个会话一个 JSON 文件；保留 / 清理策略不在此处理。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::memory::Message;

/// 会话 key 只允许字母、数字、`-`、`_`，防止路径穿越
pub fn validate_session_key(key: &str) -> anyhow::Result<()> {
    if key.is_empty()
        || key.len() > 128
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        anyhow::bail!("invalid session key: {key:?}");
    }
    Ok(())
}

/// 对话历史存储
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 不存在时返回空
    async fn load(&self, session: &str) -> anyhow::Result<Vec<Message>>;
    async fn save(&self, session: &str, messages: &[Message]) -> anyhow::Result<()>;
}

/// 会话变量存储
#[async_trait]
pub trait ValueStore: Send + Sync {
    /// 不存在时返回空表
    async fn get(&self, session: &str) -> anyhow::Result<HashMap<String, String>>;
}

/// 单文件 JSON 持久化：一个会话一个文件
#[derive(Debug)]
pub struct ConversationPersistence {
    path: PathBuf,
}

impl ConversationPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 文件不存在时返回空 Vec
    pub async fn load(&self) -> anyhow::Result<Vec<Message>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&data)?)
    }

    /// 先写临时文件再 rename，父目录不存在时自动创建
    pub async fn save(&self, messages: &[Message]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(messages)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// 目录下按会话分文件：`<dir>/<session>.json`（历史）与 `<dir>/<session>.values.json`（变量）
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn history_file(&self, session: &str) -> anyhow::Result<ConversationPersistence> {
        validate_session_key(session)?;
        Ok(ConversationPersistence::new(
            self.dir.join(format!("{session}.json")),
        ))
    }
}

#[async_trait]
impl HistoryStore for JsonFileStore {
    async fn load(&self, session: &str) -> anyhow::Result<Vec<Message>> {
        self.history_file(session)?.load().await
    }

    async fn save(&self, session: &str, messages: &[Message]) -> anyhow::Result<()> {
        self.history_file(session)?.save(messages).await
    }
}

#[async_trait]
impl ValueStore for JsonFileStore {
    async fn get(&self, session: &str) -> anyhow::Result<HashMap<String, String>> {
        validate_session_key(session)?;
        let path = self.dir.join(format!("{session}.values.json"));
        if !tokio::fs::try_exists(&path).await? {
            return Ok(HashMap::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// 内存实现（测试与嵌入式使用）
#[derive(Debug, Default)]
pub struct InMemoryStore {
    histories: RwLock<HashMap<String, Vec<Message>>>,
    values: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_values(&self, session: &str, values: HashMap<String, String>) {
        self.values.write().await.insert(session.to_string(), values);
    }
}

#[async_trait]
impl HistoryStore for InMemoryStore {
    async fn load(&self, session: &str) -> anyhow::Result<Vec<Message>> {
        Ok(self
            .histories
            .read()
            .await
            .get(session)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, session: &str, messages: &[Message]) -> anyhow::Result<()> {
        self.histories
            .write()
            .await
            .insert(session.to_string(), messages.to_vec());
        Ok(())
    }
}

#[async_trait]
impl ValueStore for InMemoryStore {
    async fn get(&self, session: &str) -> anyhow::Result<HashMap<String, String>> {
        Ok(self
            .values
            .read()
            .await
            .get(session)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_history_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("sessions"));
        assert!(store.load("s1").await.unwrap().is_empty());
        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        store.save("s1", &messages).await.unwrap();
        assert_eq!(store.load("s1").await.unwrap(), messages);
    }

    #[tokio::test]
    async fn test_json_values() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("s2.values.json"), r#"{"TEAM":"core"}"#).unwrap();
        let store = JsonFileStore::new(dir.path());
        let values = store.get("s2").await.unwrap();
        assert_eq!(values.get("TEAM").map(String::as_str), Some("core"));
        assert!(store.get("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_key_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.load("../etc/passwd").await.is_err());
        assert!(store.get("a/b").await.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryStore::new();
        store.save("s", &[Message::user("x")]).await.unwrap();
        assert_eq!(store.load("s").await.unwrap().len(), 1);
        store
            .set_values("s", HashMap::from([("K".into(), "V".into())]))
            .await;
        assert_eq!(store.get("s").await.unwrap()["K"], "V");
    }
}
