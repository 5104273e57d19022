//! 专家注册表
//!
//! WorkerId 是封闭集合：调度计划里的字符串拼写（含历史别名）统一经 resolve 归一，
//! 未知拼写由调用方丢弃而不执行。端点由 base_url 推导，可按专家覆盖。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::WorkersSection;

/// 专家标识（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerId {
    Inventory,
    Policy,
    Analytics,
    Orders,
    Notification,
}

impl WorkerId {
    pub const ALL: [WorkerId; 5] = [
        Self::Inventory,
        Self::Policy,
        Self::Analytics,
        Self::Orders,
        Self::Notification,
    ];

    /// 别名解析表：多种拼写映射到同一专家
    pub fn resolve(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "inventory" | "inventory_specialist" => Some(Self::Inventory),
            "policy" | "policy_expert" => Some(Self::Policy),
            "analytics" | "analytics_specialist" => Some(Self::Analytics),
            "orders" | "order_specialist" => Some(Self::Orders),
            "notification" | "notification_specialist" => Some(Self::Notification),
            _ => None,
        }
    }

    /// 端点路径段与配置 key
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Inventory => "inventory",
            Self::Policy => "policy",
            Self::Analytics => "analytics",
            Self::Orders => "orders",
            Self::Notification => "notification",
        }
    }

    /// 分类 Prompt 与指标输出使用的规范名
    pub fn canonical_name(&self) -> &'static str {
        match self {
            Self::Inventory => "inventory_specialist",
            Self::Policy => "policy_expert",
            Self::Analytics => "analytics_specialist",
            Self::Orders => "order_specialist",
            Self::Notification => "notification_specialist",
        }
    }

    /// 数据块标签（给下游 Prompt 与回复用的显示名）
    pub fn display_label(&self) -> &'static str {
        match self {
            Self::Inventory => "Inventory Specialist",
            Self::Policy => "Policy Expert",
            Self::Analytics => "Analytics Specialist",
            Self::Orders => "Order Specialist",
            Self::Notification => "Notification Specialist",
        }
    }

    /// 分类 Prompt 中的职责描述
    pub fn description(&self) -> &'static str {
        match self {
            Self::Inventory => {
                "Queries product inventory database by name, SKU, or category (NOT price filtering)"
            }
            Self::Policy => {
                "Searches company policy documents (returns, HR policies, compliance, regulations)"
            }
            Self::Analytics => {
                "Business intelligence, analytics, AND PRICE FILTERING (trends, forecasts, reports, products under/over/between price ranges)"
            }
            Self::Orders => {
                "Order management and procurement (purchase orders, suppliers, reorders, tracking)"
            }
            Self::Notification => "Drafts and sends emails with human approval workflow",
        }
    }

    /// 通知类专家永远排在数据任务之后执行
    pub fn is_notification(&self) -> bool {
        matches!(self, Self::Notification)
    }
}

/// 专家端点注册表
#[derive(Debug, Clone)]
pub struct WorkerRegistry {
    base_url: String,
    overrides: HashMap<WorkerId, String>,
}

impl WorkerRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            overrides: HashMap::new(),
        }
    }

    /// 从配置构建：endpoints 的 key 允许任意别名，未知 key 记 warn 并忽略
    pub fn from_config(cfg: &WorkersSection) -> Self {
        let mut registry = Self::new(cfg.base_url.trim_end_matches('/'));
        for (name, url) in &cfg.endpoints {
            match WorkerId::resolve(name) {
                Some(worker) => {
                    registry.overrides.insert(worker, url.clone());
                }
                None => {
                    tracing::warn!(%name, "Ignoring endpoint override for unknown worker");
                }
            }
        }
        registry
    }

    /// 专家的 RPC 端点
    pub fn endpoint(&self, worker: WorkerId) -> String {
        self.overrides
            .get(&worker)
            .cloned()
            .unwrap_or_else(|| format!("{}/{}/a2a/interact", self.base_url, worker.slug()))
    }
}
