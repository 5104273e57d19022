//! 上下文拼装
//!
//! 从会话存储读最近 N 条事件，过滤掉失败/空噪声（避免历史失败污染后续专家 Prompt），
//! 逐条截断后带角色标签拼进定界标记。纯读取，不改动会话存储。

use std::sync::Arc;

use crate::session::{Author, SessionStore};

/// 命中即整条丢弃的失败模式
const FAILURE_PATTERNS: &[&str] = &[
    "no data available",
    "i am sorry",
    "encountered an error",
    "cannot find",
    "error while",
    "failed to",
];

/// 短于此长度的事件视为空噪声
const MIN_EVENT_CHARS: usize = 10;

/// 上下文拼装器
pub struct ContextAssembler {
    store: Arc<dyn SessionStore>,
    max_events: usize,
    max_chars_per_event: usize,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn SessionStore>, max_events: usize, max_chars_per_event: usize) -> Self {
        Self {
            store,
            max_events,
            max_chars_per_event,
        }
    }

    /// 拼装会话前情；没有可用历史时返回空串
    pub async fn build(&self, conversation_id: &str) -> String {
        let session = match self.store.get(conversation_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return String::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Error retrieving conversation history");
                return String::new();
            }
        };

        let start = session.events.len().saturating_sub(self.max_events);
        let mut lines = Vec::new();

        for event in &session.events[start..] {
            let text = event.text.trim();
            if text.chars().count() < MIN_EVENT_CHARS {
                continue;
            }
            let lower = text.to_lowercase();
            if FAILURE_PATTERNS.iter().any(|p| lower.contains(p)) {
                continue;
            }

            let role = match event.author {
                Author::User => "User",
                Author::Orchestrator => "Assistant",
            };
            lines.push(format!("{}: {}", role, clip(text, self.max_chars_per_event)));
        }

        if lines.is_empty() {
            return String::new();
        }

        format!(
            "\n\n[Previous conversation context:]\n{}\n[End of context]\n\n",
            lines.join("\n")
        )
    }
}

/// 按字符数截断，超长时加省略号
fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    format!("{}...", clipped)
}
