//! 记忆层挂钩
//!
//! 每轮结束后把会话交给记忆层（外部协作者，fire-and-forget）。
//! 失败只记日志，对话连续性是质量增强而非本轮正确性的一部分。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::session::store::Session;

/// 记忆层接口
#[async_trait]
pub trait MemoryService: Send + Sync {
    async fn add_session_to_memory(&self, session: &Session) -> anyhow::Result<()>;
}

/// 空实现：未配置记忆层时使用
#[derive(Debug, Default)]
pub struct NoopMemory;

#[async_trait]
impl MemoryService for NoopMemory {
    async fn add_session_to_memory(&self, _session: &Session) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 内存实现：保留最近 max_sessions 个会话快照
#[derive(Debug)]
pub struct InMemoryMemory {
    sessions: Arc<RwLock<Vec<Session>>>,
    max_sessions: usize,
}

impl InMemoryMemory {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(Vec::new())),
            max_sessions,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for InMemoryMemory {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl MemoryService for InMemoryMemory {
    async fn add_session_to_memory(&self, session: &Session) -> anyhow::Result<()> {
        let mut sessions = self.sessions.write().await;
        // 同一会话只保留最新快照
        sessions.retain(|s| s.id != session.id);
        sessions.push(session.clone());
        let n = sessions.len();
        if n > self.max_sessions {
            sessions.drain(0..n - self.max_sessions);
        }
        Ok(())
    }
}
