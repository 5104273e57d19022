//! Intent Planner
//!
//! 每轮恰好一次外部补全调用，把用户自由文本转成结构化调度计划。
//! 指令模板在构建时固定：专家花名册来自封闭集合，路由规则来自配置（领域知识可整体替换），
//! 输出 schema 由 schemars 从 RawIntentClassification 渲染，Prompt 与解析器不会漂移。
//! 超时或产出不可解析时返回 None，调用方落入降级路由。

use std::sync::Arc;
use std::time::Duration;

use crate::core::backoff::{retry_async, RetryConfig};
use crate::intent::parse::parse_dispatch_plan;
use crate::intent::plan::{CoordinationMode, DispatchPlan, RawIntentClassification};
use crate::llm::{LlmClient, Message};
use crate::workers::WorkerId;

/// 意图分类器
pub struct IntentPlanner {
    llm: Arc<dyn LlmClient>,
    retry: RetryConfig,
    timeout: Duration,
    /// 含 {user_prompt} 占位符的完整指令模板
    template: String,
}

impl IntentPlanner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        retry: RetryConfig,
        timeout: Duration,
        routing_rules: &[String],
    ) -> Self {
        Self {
            llm,
            retry,
            timeout,
            template: build_template(routing_rules),
        }
    }

    /// 分类一条用户请求；失败一律 None（由调用方降级）
    pub async fn classify(&self, user_prompt: &str) -> Option<DispatchPlan> {
        let prompt = self.template.replace("{user_prompt}", user_prompt);
        let messages = [Message::user(prompt)];

        let completion = tokio::time::timeout(
            self.timeout,
            retry_async(&self.retry, "intent_classify", || {
                let messages = messages.clone();
                async move { self.llm.complete(&messages).await }
            }),
        )
        .await;

        let text = match completion {
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "Intent classification timed out, falling back"
                );
                return None;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Intent classification failed, falling back");
                return None;
            }
            Ok(Ok(text)) => text,
        };

        let plan = parse_dispatch_plan(&text)?;
        tracing::info!(
            summary = %plan.summary,
            agents = ?plan.tasks.iter().map(|t| t.worker.canonical_name()).collect::<Vec<_>>(),
            sequential = plan.coordination == CoordinationMode::Sequential,
            "Intent classified"
        );
        Some(plan)
    }
}

/// 组装指令模板：花名册 + 路由规则 + 输出 schema + 少样本示例
fn build_template(routing_rules: &[String]) -> String {
    let roster = WorkerId::ALL
        .iter()
        .enumerate()
        .map(|(i, w)| format!("{}. **{}** - {}", i + 1, w.canonical_name(), w.description()))
        .collect::<Vec<_>>()
        .join("\n");

    let rules = routing_rules
        .iter()
        .map(|r| format!("- {}", r))
        .collect::<Vec<_>>()
        .join("\n");

    let schema = serde_json::to_string_pretty(&schemars::schema_for!(RawIntentClassification))
        .unwrap_or_default();

    format!(
        r#"You are an intent classifier for an enterprise agent orchestration system.

Available agents:
{roster}

Analyze the user's request and determine:
1. Which agent(s) need to be involved
2. What specific question/task each agent should handle
3. Whether coordination between agents is needed

Rules:
{rules}

USER REQUEST: {{user_prompt}}

Respond with a single JSON object matching this schema:
{schema}

Examples:

User: "How many pumps do we have?"
Response:
{{"agents_needed": [{{"agent_name": "inventory_specialist", "targeted_prompt": "How many pumps are in stock?", "reason": "User needs inventory data"}}], "requires_coordination": false, "user_intent_summary": "Check pump inventory quantity"}}

User: "Check pump inventory and draft an email to sales about it"
Response:
{{"agents_needed": [{{"agent_name": "inventory_specialist", "targeted_prompt": "What pumps do we have in stock? Include quantities, SKUs, and prices.", "reason": "Need inventory data for email"}}, {{"agent_name": "notification_specialist", "targeted_prompt": "Draft an email to sales@company.com summarizing the pump inventory data", "reason": "User wants to email the results"}}], "requires_coordination": true, "user_intent_summary": "Get pump inventory and email summary to sales"}}

User: "What's our return policy for electronics and how many valves are in warehouse B?"
Response:
{{"agents_needed": [{{"agent_name": "policy_expert", "targeted_prompt": "What is the return policy for electronics?", "reason": "User needs policy information"}}, {{"agent_name": "inventory_specialist", "targeted_prompt": "How many valves are in warehouse B?", "reason": "User needs inventory data"}}], "requires_coordination": false, "user_intent_summary": "Get electronics return policy and valve inventory from warehouse B"}}

User: "Show me products under $50 and send me a notification"
Response:
{{"agents_needed": [{{"agent_name": "analytics_specialist", "targeted_prompt": "Filter and show all products under $50. Include product name, SKU, price, stock quantity, and category.", "reason": "User needs price-based filtering which only analytics can do"}}, {{"agent_name": "notification_specialist", "targeted_prompt": "Draft an email notification with the list of products under $50", "reason": "User wants email notification with the results"}}], "requires_coordination": true, "user_intent_summary": "Filter products by price (under $50) and send email notification"}}

Now classify this request and respond with ONLY the JSON object (no other text before or after):"#
    )
}
