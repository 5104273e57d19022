//! 会话存储抽象层
//!
//! 统一的会话接口，支持内存与 JSON 文件两种实现。
//! 存储是外部协作者：调度引擎只做 get / create / append_event，全部尽力而为。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// 事件作者
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    Orchestrator,
}

/// 一条会话事件（追加式，不可变）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub author: Author,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            author: Author::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn orchestrator(text: impl Into<String>) -> Self {
        Self {
            author: Author::Orchestrator,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// 一个会话：id + 有序事件列表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub events: Vec<SessionEvent>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            events: Vec::new(),
        }
    }
}

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 取会话，不存在时 None
    async fn get(&self, conversation_id: &str) -> anyhow::Result<Option<Session>>;

    /// 创建空会话（已存在时返回现有会话）
    async fn create(&self, conversation_id: &str) -> anyhow::Result<Session>;

    /// 追加一条事件；会话不存在则创建
    async fn append_event(&self, conversation_id: &str, event: SessionEvent) -> anyhow::Result<()>;
}

/// 内存会话存储
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, conversation_id: &str) -> anyhow::Result<Option<Session>> {
        Ok(self.sessions.read().await.get(conversation_id).cloned())
    }

    async fn create(&self, conversation_id: &str) -> anyhow::Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| Session::new(conversation_id));
        Ok(session.clone())
    }

    async fn append_event(&self, conversation_id: &str, event: SessionEvent) -> anyhow::Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| Session::new(conversation_id))
            .events
            .push(event);
        Ok(())
    }
}

/// JSON 文件会话存储：每个会话一个文件，重启后恢复
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 会话 id 落盘前归一为安全文件名
    fn path_for(&self, conversation_id: &str) -> PathBuf {
        let safe: String = conversation_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    async fn load(&self, conversation_id: &str) -> anyhow::Result<Option<Session>> {
        let path = self.path_for(conversation_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    async fn save(&self, session: &Session) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let data = serde_json::to_string_pretty(session)?;
        tokio::fs::write(self.path_for(&session.id), data).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, conversation_id: &str) -> anyhow::Result<Option<Session>> {
        self.load(conversation_id).await
    }

    async fn create(&self, conversation_id: &str) -> anyhow::Result<Session> {
        if let Some(existing) = self.load(conversation_id).await? {
            return Ok(existing);
        }
        let session = Session::new(conversation_id);
        self.save(&session).await?;
        Ok(session)
    }

    async fn append_event(&self, conversation_id: &str, event: SessionEvent) -> anyhow::Result<()> {
        let mut session = self
            .load(conversation_id)
            .await?
            .unwrap_or_else(|| Session::new(conversation_id));
        session.events.push(event);
        self.save(&session).await
    }
}

/// 创建会话存储：配置了目录则用文件存储，否则内存
pub fn create_session_store(dir: Option<&std::path::Path>) -> Arc<dyn SessionStore> {
    match dir {
        Some(dir) => {
            tracing::info!("Using file session store: {:?}", dir);
            Arc::new(FileSessionStore::new(dir))
        }
        None => {
            tracing::info!("Using in-memory session store");
            Arc::new(InMemorySessionStore::new())
        }
    }
}
