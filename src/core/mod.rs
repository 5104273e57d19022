//! 核心层：退避策略、审批台账、调用指标

pub mod approval;
pub mod backoff;
pub mod metrics;

pub use approval::{ActionKind, ApprovalLedger, PendingApproval};
pub use backoff::{backoff_delay, is_retryable_error, retry_async, RetryConfig};
pub use metrics::{AgentCallStats, WorkerStatSnapshot};
