//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=openai`）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::backoff::RetryConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub workers: WorkersSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub routing: RoutingSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub approval: ApprovalSection,
    #[serde(default)]
    pub session: SessionSection,
}

/// [server] 段：监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
        }
    }
}

/// [llm] 段：后端选择与分类超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 单次意图分类调用的超时（秒）
    #[serde(default = "default_classify_timeout_secs")]
    pub classify_timeout_secs: u64,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_classify_timeout_secs() -> u64 {
    15
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            classify_timeout_secs: default_classify_timeout_secs(),
        }
    }
}

/// [workers] 段：专家端点、并发上限、单次调用超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersSection {
    /// 所有专家共用的基础 URL（端点为 {base_url}/{worker}/a2a/interact）
    pub base_url: String,
    /// 按别名覆盖单个专家端点（如 endpoints.analytics = "http://..."）
    pub endpoints: HashMap<String, String>,
    /// 同一轮内并发调用专家的上限
    pub max_concurrent: usize,
    /// 单次专家调用超时（秒）
    pub call_timeout_secs: u64,
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            endpoints: HashMap::new(),
            max_concurrent: 5,
            call_timeout_secs: 30,
        }
    }
}

/// [retry] 段：专家调用与意图分类各一套退避参数
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "RetryProfile::worker_default")]
    pub worker: RetryProfile,
    #[serde(default = "RetryProfile::classifier_default")]
    pub classifier: RetryProfile,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            worker: RetryProfile::worker_default(),
            classifier: RetryProfile::classifier_default(),
        }
    }
}

/// 单套退避参数（秒为单位，运行时转为 Duration）
#[derive(Debug, Clone, Deserialize)]
pub struct RetryProfile {
    pub max_retries: u32,
    pub initial_delay_secs: f64,
    pub max_delay_secs: f64,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl RetryProfile {
    fn worker_default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_secs: 2.0,
            max_delay_secs: 30.0,
            exponential_base: 2.0,
            jitter: true,
        }
    }

    fn classifier_default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_secs: 1.0,
            max_delay_secs: 10.0,
            exponential_base: 2.0,
            jitter: true,
        }
    }

    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_delay: Duration::from_secs_f64(self.initial_delay_secs),
            max_delay: Duration::from_secs_f64(self.max_delay_secs),
            exponential_base: self.exponential_base,
            jitter: self.jitter,
        }
    }
}

impl Default for RetryProfile {
    fn default() -> Self {
        Self::worker_default()
    }
}

/// [routing] 段：注入意图分类 Prompt 的路由规则（领域配置，可整体替换）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    pub rules: Vec<String>,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            rules: default_routing_rules(),
        }
    }
}

/// 默认路由规则：价格筛选归 analytics、供应商合规归 orders 等均为领域知识而非引擎逻辑
fn default_routing_rules() -> Vec<String> {
    [
        "If user asks about inventory by name/SKU/category, use inventory_specialist",
        "If user asks about PRICE filtering (\"under $X\", \"over $Y\", \"between $A-$B\"), use analytics_specialist, NEVER inventory_specialist",
        "If user asks about QUANTITY filtering (\"below X units\", \"less than Y\", \"under Z stock\"), use analytics_specialist",
        "If user asks about policies/rules/compliance (EXCEPT supplier compliance), use policy_expert",
        "If user asks about orders/purchase/suppliers/reorder/procurement OR supplier compliance, use order_specialist, NOT policy_expert",
        "If user asks to draft/send/email/notify, use notification_specialist",
        "If user asks multiple things (e.g. \"analyze trends AND email results\"), use multiple agents with coordination",
        "If tasks are INDEPENDENT (e.g. \"Stock of X and Policy for Y\"), set \"requires_coordination\": false",
        "Create targeted, specific prompts for each agent (don't pass the full user query if it contains tasks for other agents)",
        "For follow-up questions with pronouns (it, them, that, which), maintain the domain from previous context",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// [context] 段：上下文窗口与截断
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// 取会话最近 N 条事件
    pub max_events: usize,
    /// 每条保留的最大字符数
    pub max_chars_per_event: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            max_events: 8,
            max_chars_per_event: 1500,
        }
    }
}

/// [approval] 段：未决审批的过期策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    /// 未决审批的存活时间（秒）；0 表示不过期
    pub ttl_secs: u64,
    /// 后台清扫间隔（秒）
    pub sweep_interval_secs: u64,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            ttl_secs: 1800,
            sweep_interval_secs: 60,
        }
    }
}

/// [session] 段：会话持久化目录（未设置时用内存存储）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionSection {
    pub dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            llm: LlmSection::default(),
            workers: WorkersSection::default(),
            retry: RetrySection::default(),
            routing: RoutingSection::default(),
            context: ContextSection::default(),
            approval: ApprovalSection::default(),
            session: SessionSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
