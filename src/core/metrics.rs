//! 专家调用指标
//!
//! 按专家累计：调用数、成功率、延迟、最近错误。注入式实例（非模块级单例），
//! 测试可各自实例化；DashMap 提供按 key 的并发隔离。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::workers::WorkerId;

/// 错误历史条目（截断存储，按专家至多保留 MAX_ERROR_HISTORY 条）
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub conversation_id: String,
    pub error: String,
}

const MAX_ERROR_HISTORY: usize = 10;
const MAX_ERROR_CHARS: usize = 200;

#[derive(Debug, Default)]
struct CallStat {
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    total_latency_ms: f64,
    errors: Vec<ErrorRecord>,
}

/// 单个专家的聚合快照（含派生指标）
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatSnapshot {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub errors: Vec<ErrorRecord>,
}

/// 专家调用指标累加器，进程生命周期内只增不减
#[derive(Debug, Default)]
pub struct AgentCallStats {
    stats: DashMap<WorkerId, CallStat>,
}

impl AgentCallStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次专家调用
    pub fn record(
        &self,
        worker: WorkerId,
        conversation_id: &str,
        success: bool,
        latency_ms: f64,
        error: Option<&str>,
    ) {
        let mut entry = self.stats.entry(worker).or_default();
        entry.total_calls += 1;
        entry.total_latency_ms += latency_ms;

        if success {
            entry.successful_calls += 1;
        } else {
            entry.failed_calls += 1;
            if let Some(err) = error {
                if entry.errors.len() < MAX_ERROR_HISTORY {
                    let truncated: String = err.chars().take(MAX_ERROR_CHARS).collect();
                    entry.errors.push(ErrorRecord {
                        timestamp: Utc::now(),
                        conversation_id: conversation_id.to_string(),
                        error: truncated,
                    });
                }
            }
        }
    }

    /// 单个专家的快照；从未被调用过的专家返回 None
    pub fn worker_snapshot(&self, worker: WorkerId) -> Option<WorkerStatSnapshot> {
        self.stats.get(&worker).map(|stat| aggregate(&stat))
    }

    /// 全部专家的快照，按规范名输出（供 /api/metrics）
    pub fn snapshot(&self) -> HashMap<String, WorkerStatSnapshot> {
        self.stats
            .iter()
            .map(|entry| {
                (
                    entry.key().canonical_name().to_string(),
                    aggregate(entry.value()),
                )
            })
            .collect()
    }
}

/// 累计值 → 含派生比率的快照
fn aggregate(stat: &CallStat) -> WorkerStatSnapshot {
    let total = stat.total_calls.max(1) as f64;
    WorkerStatSnapshot {
        total_calls: stat.total_calls,
        successful_calls: stat.successful_calls,
        failed_calls: stat.failed_calls,
        success_rate: stat.successful_calls as f64 / total,
        avg_latency_ms: stat.total_latency_ms / total,
        errors: stat.errors.clone(),
    }
}
