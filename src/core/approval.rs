//! 审批台账（Human-in-the-Loop）
//!
//! 存放各会话的未决审批请求。不变式：每个会话至多一条未决审批，创建时替换旧条目，
//! 因此 peek/approve/reject 不存在多候选歧义。approve/reject 是破坏性读取，
//! DashMap 按 key 隔离并发；台账本身不做审批请求识别（那是调度引擎的纯文本规则）。

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::workers::WorkerId;

/// 审批动作类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    EmailSend,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailSend => "email_send",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条未决审批：CREATED 后仅有 APPROVED / REJECTED 两个终态，均移除条目
#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub conversation_id: String,
    pub worker: WorkerId,
    pub action_kind: ActionKind,
    pub draft_content: String,
    pub created_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// 审批台账：conversation_id -> 未决审批
#[derive(Debug, Default)]
pub struct ApprovalLedger {
    pending: DashMap<String, PendingApproval>,
}

impl ApprovalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一条未决审批，返回审批 id；同会话已有未决审批时替换之
    pub fn create(
        &self,
        conversation_id: &str,
        worker: WorkerId,
        action_kind: ActionKind,
        draft_content: &str,
        metadata: HashMap<String, String>,
    ) -> String {
        let approval = PendingApproval {
            conversation_id: conversation_id.to_string(),
            worker,
            action_kind,
            draft_content: draft_content.to_string(),
            created_at: Utc::now(),
            metadata,
        };
        let approval_id = format!("{}_{}_{}", conversation_id, action_kind, uuid::Uuid::new_v4());

        if self
            .pending
            .insert(conversation_id.to_string(), approval)
            .is_some()
        {
            tracing::warn!(
                conversation_id,
                "Replacing an unresolved approval with a newer one"
            );
        }

        approval_id
    }

    /// 查看会话的未决审批（不消费）
    pub fn peek(&self, conversation_id: &str) -> Option<PendingApproval> {
        self.pending.get(conversation_id).map(|e| e.value().clone())
    }

    /// 批准并移除；无未决审批时为空操作
    pub fn approve(&self, conversation_id: &str) -> Option<PendingApproval> {
        self.pending.remove(conversation_id).map(|(_, a)| a)
    }

    /// 拒绝并移除；无未决审批时为空操作
    pub fn reject(&self, conversation_id: &str) -> Option<PendingApproval> {
        self.pending.remove(conversation_id).map(|(_, a)| a)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// 清除创建时间早于 now - ttl 的条目，返回清除数
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let before = self.pending.len();
        self.pending.retain(|_, approval| approval.created_at > cutoff);
        before - self.pending.len()
    }

    /// 后台清扫循环：每 interval 清一次过期审批，cancel 触发后退出
    pub async fn run_sweeper(&self, ttl: Duration, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = self.sweep_expired(ttl);
                    if swept > 0 {
                        tracing::info!(swept, "Expired unresolved approvals");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with_pending(conversation_id: &str) -> ApprovalLedger {
        let ledger = ApprovalLedger::new();
        ledger.create(
            conversation_id,
            WorkerId::Notification,
            ActionKind::EmailSend,
            "To: a@b.com\nSubject: Hi\n\nBody",
            HashMap::new(),
        );
        ledger
    }

    #[test]
    fn test_create_then_peek() {
        let ledger = ledger_with_pending("s1");
        let approval = ledger.peek("s1").unwrap();
        assert_eq!(approval.action_kind, ActionKind::EmailSend);
        assert_eq!(approval.worker, WorkerId::Notification);
        // peek 不消费
        assert!(ledger.peek("s1").is_some());
    }

    #[test]
    fn test_approve_removes_entry() {
        let ledger = ledger_with_pending("s1");
        let approval = ledger.approve("s1");
        assert!(approval.is_some());
        assert!(ledger.peek("s1").is_none());
        // 台账不一致：再次批准是空操作
        assert!(ledger.approve("s1").is_none());
    }

    #[test]
    fn test_reject_removes_entry() {
        let ledger = ledger_with_pending("s1");
        assert!(ledger.reject("s1").is_some());
        assert!(ledger.peek("s1").is_none());
    }

    #[test]
    fn test_create_replaces_existing() {
        let ledger = ledger_with_pending("s1");
        ledger.create(
            "s1",
            WorkerId::Notification,
            ActionKind::EmailSend,
            "newer draft",
            HashMap::new(),
        );
        assert_eq!(ledger.pending_count(), 1);
        assert_eq!(ledger.peek("s1").unwrap().draft_content, "newer draft");
    }

    #[test]
    fn test_conversations_are_isolated() {
        let ledger = ledger_with_pending("s1");
        assert!(ledger.peek("s2").is_none());
        ledger.create(
            "s2",
            WorkerId::Notification,
            ActionKind::EmailSend,
            "other",
            HashMap::new(),
        );
        ledger.approve("s1");
        assert!(ledger.peek("s2").is_some());
    }

    #[test]
    fn test_sweep_expired() {
        let ledger = ledger_with_pending("s1");
        // TTL 为 0：所有条目立即过期
        assert_eq!(ledger.sweep_expired(Duration::ZERO), 1);
        assert_eq!(ledger.pending_count(), 0);

        let ledger = ledger_with_pending("s1");
        // 一小时 TTL：刚创建的条目保留
        assert_eq!(ledger.sweep_expired(Duration::from_secs(3600)), 0);
        assert_eq!(ledger.pending_count(), 1);
    }
}
