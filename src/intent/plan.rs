//! 调度计划类型
//!
//! RawIntentClassification 是分类器的线格式（schemars 渲染进 Prompt 的 schema 即此结构）；
//! DispatchPlan 是别名解析与校验之后的计划，agent 标识只会是封闭集合成员。
//! 计划按轮创建、轮结束即弃，从不持久化。

use schemars::JsonSchema;
use serde::Deserialize;

use crate::workers::WorkerId;

/// 分类器原始输出中的单个 agent 意图
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RawAgentIntent {
    /// 目标 agent 名（允许别名拼写）
    pub agent_name: String,
    /// 只含该 agent 份内事的定向 Prompt
    pub targeted_prompt: String,
    /// 选择该 agent 的理由
    #[serde(default)]
    pub reason: String,
}

/// 分类器原始输出
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RawIntentClassification {
    pub agents_needed: Vec<RawAgentIntent>,
    /// true 表示任务间有依赖，必须顺序执行
    #[serde(default)]
    pub requires_coordination: bool,
    #[serde(default)]
    pub user_intent_summary: String,
}

/// 协调模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationMode {
    /// 后续任务可能依赖前序输出，按计划顺序执行
    Sequential,
    /// 数据任务相互独立，可并发
    Independent,
}

/// 校验后的单个任务
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub worker: WorkerId,
    pub prompt: String,
    pub rationale: String,
}

/// 一轮的调度计划
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    /// 计划顺序即合并顺序
    pub tasks: Vec<AgentTask>,
    pub coordination: CoordinationMode,
    pub summary: String,
}

impl DispatchPlan {
    /// 从原始分类结果构建：未知 agent 名丢弃；一个有效任务都不剩时视为分类失败
    pub fn from_raw(raw: RawIntentClassification) -> Option<Self> {
        let mut tasks = Vec::with_capacity(raw.agents_needed.len());
        for intent in raw.agents_needed {
            match WorkerId::resolve(&intent.agent_name) {
                Some(worker) => tasks.push(AgentTask {
                    worker,
                    prompt: intent.targeted_prompt,
                    rationale: intent.reason,
                }),
                None => {
                    tracing::warn!(agent = %intent.agent_name, "Dropping task for unknown agent");
                }
            }
        }

        if tasks.is_empty() {
            return None;
        }

        Some(Self {
            tasks,
            coordination: if raw.requires_coordination {
                CoordinationMode::Sequential
            } else {
                CoordinationMode::Independent
            },
            summary: raw.user_intent_summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_intent(agent: &str) -> RawAgentIntent {
        RawAgentIntent {
            agent_name: agent.to_string(),
            targeted_prompt: format!("task for {}", agent),
            reason: "test".to_string(),
        }
    }

    #[test]
    fn test_unknown_agent_dropped() {
        let raw = RawIntentClassification {
            agents_needed: vec![raw_intent("inventory_specialist"), raw_intent("shipping_bot")],
            requires_coordination: false,
            user_intent_summary: "mixed".to_string(),
        };
        let plan = DispatchPlan::from_raw(raw).unwrap();
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].worker, WorkerId::Inventory);
    }

    #[test]
    fn test_all_unknown_agents_invalidates_plan() {
        let raw = RawIntentClassification {
            agents_needed: vec![raw_intent("shipping_bot"), raw_intent("weather")],
            requires_coordination: false,
            user_intent_summary: "invalid".to_string(),
        };
        assert!(DispatchPlan::from_raw(raw).is_none());
    }

    #[test]
    fn test_empty_plan_is_invalid() {
        let raw = RawIntentClassification {
            agents_needed: vec![],
            requires_coordination: false,
            user_intent_summary: String::new(),
        };
        assert!(DispatchPlan::from_raw(raw).is_none());
    }

    #[test]
    fn test_coordination_flag_mapping() {
        let sequential = DispatchPlan::from_raw(RawIntentClassification {
            agents_needed: vec![raw_intent("analytics")],
            requires_coordination: true,
            user_intent_summary: String::new(),
        })
        .unwrap();
        assert_eq!(sequential.coordination, CoordinationMode::Sequential);

        let independent = DispatchPlan::from_raw(RawIntentClassification {
            agents_needed: vec![raw_intent("analytics")],
            requires_coordination: false,
            user_intent_summary: String::new(),
        })
        .unwrap();
        assert_eq!(independent.coordination, CoordinationMode::Independent);
    }

    #[test]
    fn test_alias_spellings_resolve_to_same_worker() {
        let plan = DispatchPlan::from_raw(RawIntentClassification {
            agents_needed: vec![raw_intent("notification"), raw_intent("notification_specialist")],
            requires_coordination: true,
            user_intent_summary: String::new(),
        })
        .unwrap();
        assert!(plan.tasks.iter().all(|t| t.worker == WorkerId::Notification));
    }
}
