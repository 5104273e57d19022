//! 调度引擎集成测试
//!
//! 用脚本化的 LLM 与传输层穿过生产 trait 注入，端到端覆盖单轮状态机：
//! 并发计划的顺序合并、通知收尾、审批门控与短路、分类超时降级。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use hive::context::ContextAssembler;
use hive::core::approval::{ActionKind, ApprovalLedger};
use hive::core::backoff::RetryConfig;
use hive::core::metrics::AgentCallStats;
use hive::dispatch::DispatchEngine;
use hive::intent::IntentPlanner;
use hive::llm::{LlmClient, LlmError, Message};
use hive::session::{InMemoryMemory, InMemorySessionStore, SessionStore};
use hive::workers::{WorkerClient, WorkerError, WorkerRegistry, WorkerTransport};

/// 脚本化 LLM：每次调用按序消费一个动作
enum LlmScript {
    Text(&'static str),
    SleepThen(&'static str, Duration),
}

struct ScriptedLlm {
    script: Mutex<VecDeque<LlmScript>>,
}

impl ScriptedLlm {
    fn new(script: Vec<LlmScript>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
        let action = self.script.lock().unwrap().pop_front();
        match action {
            Some(LlmScript::Text(text)) => Ok(text.to_string()),
            Some(LlmScript::SleepThen(text, delay)) => {
                tokio::time::sleep(delay).await;
                Ok(text.to_string())
            }
            None => Err(LlmError::Api("llm script exhausted".to_string())),
        }
    }
}

/// 脚本化传输：按专家 slug 排队响应，并记录 (slug, prompt) 调用序列
#[derive(Default)]
struct RecordingTransport {
    responses: Mutex<HashMap<String, VecDeque<Result<Value, WorkerError>>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    fn queue_text(&self, slug: &str, text: &str) {
        self.queue(slug, Ok(text_result(text)));
    }

    fn queue(&self, slug: &str, response: Result<Value, WorkerError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(slug.to_string())
            .or_default()
            .push_back(response);
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn call_order(&self) -> Vec<String> {
        self.calls().into_iter().map(|(slug, _)| slug).collect()
    }
}

#[async_trait]
impl WorkerTransport for RecordingTransport {
    async fn exchange(&self, endpoint: &str, payload: Value) -> Result<Value, WorkerError> {
        // 端点形如 http://localhost:8000/{slug}/a2a/interact
        let slug = endpoint
            .trim_end_matches("/a2a/interact")
            .rsplit('/')
            .next()
            .unwrap_or("unknown")
            .to_string();
        let prompt = payload["params"]["message"]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        self.calls.lock().unwrap().push((slug.clone(), prompt));

        match self.responses.lock().unwrap().get_mut(&slug) {
            Some(queue) if !queue.is_empty() => queue.pop_front().unwrap(),
            _ => Ok(text_result(&format!("default reply from {}", slug))),
        }
    }
}

fn text_result(text: &str) -> Value {
    serde_json::json!({
        "id": "1",
        "jsonrpc": "2.0",
        "result": { "parts": [{ "kind": "text", "text": text }] }
    })
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 1,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        exponential_base: 2.0,
        jitter: false,
    }
}

struct Harness {
    engine: DispatchEngine,
    ledger: Arc<ApprovalLedger>,
    sessions: Arc<InMemorySessionStore>,
    transport: Arc<RecordingTransport>,
}

fn build_harness(llm_script: Vec<LlmScript>, classify_timeout: Duration) -> Harness {
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::new(llm_script));
    let transport = Arc::new(RecordingTransport::default());
    let stats = Arc::new(AgentCallStats::new());
    let ledger = Arc::new(ApprovalLedger::new());
    let sessions = Arc::new(InMemorySessionStore::new());

    let workers = Arc::new(WorkerClient::new(
        WorkerRegistry::new("http://localhost:8000"),
        transport.clone(),
        fast_retry(),
        stats,
    ));
    let assembler = ContextAssembler::new(sessions.clone(), 8, 1500);
    let planner = IntentPlanner::new(llm.clone(), fast_retry(), classify_timeout, &[]);

    let engine = DispatchEngine::new(
        planner,
        workers,
        ledger.clone(),
        sessions.clone(),
        Some(Arc::new(InMemoryMemory::default())),
        assembler,
        llm,
        5,
    );

    Harness {
        engine,
        ledger,
        sessions,
        transport,
    }
}

const THREE_DATA_TASKS_PLAN: &str = r#"{
  "agents_needed": [
    {"agent_name": "inventory_specialist", "targeted_prompt": "List pump stock", "reason": "inventory data"},
    {"agent_name": "policy_expert", "targeted_prompt": "Electronics return policy", "reason": "policy data"},
    {"agent_name": "analytics_specialist", "targeted_prompt": "Pump sales trend", "reason": "analytics data"}
  ],
  "requires_coordination": false,
  "user_intent_summary": "three independent lookups"
}"#;

const ANALYTICS_THEN_NOTIFY_PLAN: &str = r#"{
  "agents_needed": [
    {"agent_name": "analytics_specialist", "targeted_prompt": "Filter and show all products under $50.", "reason": "price filtering"},
    {"agent_name": "notification_specialist", "targeted_prompt": "Draft an email notification with the list of products under $50", "reason": "email notification"}
  ],
  "requires_coordination": false,
  "user_intent_summary": "price filter and notify"
}"#;

const NOTIFY_ONLY_PLAN: &str = r#"{
  "agents_needed": [
    {"agent_name": "notification_specialist", "targeted_prompt": "Draft an email to sales@company.com with the pump report", "reason": "user asked for email"}
  ],
  "requires_coordination": false,
  "user_intent_summary": "draft email"
}"#;

const EMAIL_DRAFT_WITH_GATE: &str = "Here is the draft:\n\nTo: sales@company.com\nSubject: Pump report\n\nWe have 42 pumps in stock.\n\n---\nDo you approve sending this email? Reply 'yes' to approve or 'no' to cancel.";

#[tokio::test]
async fn test_partial_failure_keeps_plan_order() {
    let harness = build_harness(
        vec![LlmScript::Text(THREE_DATA_TASKS_PLAN)],
        Duration::from_secs(5),
    );
    harness.transport.queue_text("inventory", "inventory block");
    harness.transport.queue(
        "policy",
        Err(WorkerError::Transport("access denied by remote host".to_string())),
    );
    harness.transport.queue_text("analytics", "analytics block");

    let outcome = harness
        .engine
        .run_turn("conv-1", "stock, policy and trends")
        .await;

    // 恰好一个错误块、两个成功块，保持计划顺序
    assert_eq!(outcome.reply.matches("Error:").count(), 1);
    let inventory_pos = outcome.reply.find("inventory block").unwrap();
    let error_pos = outcome.reply.find("Error: Transport error").unwrap();
    let analytics_pos = outcome.reply.find("analytics block").unwrap();
    assert!(inventory_pos < error_pos && error_pos < analytics_pos);
    assert!(!outcome.pending_approval);
}

#[tokio::test]
async fn test_notification_runs_last_with_labeled_data_blocks() {
    let harness = build_harness(
        vec![LlmScript::Text(ANALYTICS_THEN_NOTIFY_PLAN)],
        Duration::from_secs(5),
    );
    harness
        .transport
        .queue_text("analytics", "12 products under $50: ...");
    harness
        .transport
        .queue_text("notification", "Notification email drafted and queued.");

    let outcome = harness
        .engine
        .run_turn("conv-1", "products under $50 and send a notification")
        .await;

    // 通知在分析之后执行，即便计划是 independent
    assert_eq!(harness.transport.call_order(), vec!["analytics", "notification"]);

    // 分析结果以显示名标签逐字嵌入通知 Prompt
    let calls = harness.transport.calls();
    let notification_prompt = &calls[1].1;
    assert!(notification_prompt.contains("[Analytics Specialist:]\n12 products under $50: ..."));
    assert!(notification_prompt.contains("[Context from other agents:]"));

    assert_eq!(outcome.reply, "Notification email drafted and queued.");
}

#[tokio::test]
async fn test_approval_roundtrip_approve() {
    let harness = build_harness(
        vec![LlmScript::Text(NOTIFY_ONLY_PLAN)],
        Duration::from_secs(5),
    );
    harness.transport.queue_text("notification", EMAIL_DRAFT_WITH_GATE);
    harness
        .transport
        .queue_text("notification", "Email sent successfully to sales@company.com");

    // 第一轮：草稿带审批门控
    let outcome = harness.engine.run_turn("conv-1", "email the pump report").await;
    assert!(outcome.pending_approval);
    assert_eq!(outcome.approval_kind, Some(ActionKind::EmailSend));
    assert!(harness.ledger.peek("conv-1").is_some());

    // 第二轮："yes" 短路：执行发送并确认，台账清空
    let outcome = harness.engine.run_turn("conv-1", "yes").await;
    assert!(outcome.reply.starts_with("Approved! Email sent."));
    assert!(outcome.reply.contains("Email sent successfully to sales@company.com"));
    assert!(outcome.reply.contains("To: sales@company.com"));
    assert!(!outcome.pending_approval);
    assert!(harness.ledger.peek("conv-1").is_none());

    // 发送调用确实带上了草稿字段
    let calls = harness.transport.calls();
    let send_prompt = &calls.last().unwrap().1;
    assert!(send_prompt.contains("Send the approved email now"));
    assert!(send_prompt.contains("Subject: Pump report"));

    // 第三轮：无未决审批的 "yes" 只得到罐头寒暄回复，不触发任何专家
    let calls_before = harness.transport.calls().len();
    let outcome = harness.engine.run_turn("conv-1", "yes").await;
    assert_eq!(outcome.reply, "Great! How can I help you today?");
    assert_eq!(harness.transport.calls().len(), calls_before);
}

#[tokio::test]
async fn test_approval_roundtrip_reject() {
    let harness = build_harness(
        vec![LlmScript::Text(NOTIFY_ONLY_PLAN)],
        Duration::from_secs(5),
    );
    harness.transport.queue_text("notification", EMAIL_DRAFT_WITH_GATE);

    harness.engine.run_turn("conv-1", "email the pump report").await;
    let outcome = harness.engine.run_turn("conv-1", "no").await;

    assert_eq!(outcome.reply, "Cancelled. The email_send was not executed.");
    assert!(harness.ledger.peek("conv-1").is_none());
    // 拒绝不触发发送
    assert_eq!(harness.transport.call_order(), vec!["notification"]);
}

#[tokio::test]
async fn test_approval_gate_requires_email_structure() {
    let harness = build_harness(
        vec![LlmScript::Text(NOTIFY_ONLY_PLAN)],
        Duration::from_secs(5),
    );
    // 只有审批短语、没有 To:/Subject: 工件 → 不得登记审批
    harness.transport.queue_text(
        "notification",
        "I can draft that. Do you approve? Reply 'yes' to approve or 'no' to cancel.",
    );

    let outcome = harness.engine.run_turn("conv-1", "email the pump report").await;
    assert!(!outcome.pending_approval);
    assert!(harness.ledger.peek("conv-1").is_none());
}

#[tokio::test]
async fn test_classifier_timeout_falls_back_nonempty() {
    let harness = build_harness(
        vec![
            LlmScript::SleepThen("too late", Duration::from_millis(500)),
            LlmScript::Text("Direct answer: we stock 42 pumps."),
        ],
        Duration::from_millis(30),
    );

    let outcome = harness.engine.run_turn("conv-1", "how many pumps?").await;

    assert_eq!(outcome.reply, "Direct answer: we stock 42 pumps.");
    // 降级路径不触发任何专家调用
    assert!(harness.transport.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_agents_dropped_from_plan() {
    let plan = r#"{
      "agents_needed": [
        {"agent_name": "shipping_bot", "targeted_prompt": "track the truck", "reason": "unknown"},
        {"agent_name": "inventory_specialist", "targeted_prompt": "List pump stock", "reason": "inventory"}
      ],
      "requires_coordination": false,
      "user_intent_summary": "mixed"
    }"#;
    let harness = build_harness(
        vec![LlmScript::Text(plan)],
        Duration::from_secs(5),
    );
    harness.transport.queue_text("inventory", "42 pumps in stock today");

    let outcome = harness.engine.run_turn("conv-1", "stock and shipping").await;

    assert_eq!(outcome.reply, "42 pumps in stock today");
    assert_eq!(harness.transport.call_order(), vec!["inventory"]);
}

#[tokio::test]
async fn test_turn_persists_session_and_feeds_context() {
    let harness = build_harness(
        vec![
            LlmScript::Text(THREE_DATA_TASKS_PLAN),
            LlmScript::Text(THREE_DATA_TASKS_PLAN),
        ],
        Duration::from_secs(5),
    );
    harness.transport.queue_text("inventory", "first turn inventory answer");
    harness.transport.queue_text("policy", "first turn policy answer");
    harness.transport.queue_text("analytics", "first turn analytics answer");

    harness.engine.run_turn("conv-1", "tell me everything about pumps").await;

    // 一轮落两条事件：用户消息 + 最终回复
    let session = harness.sessions.get("conv-1").await.unwrap().unwrap();
    assert_eq!(session.events.len(), 2);

    // 第二轮的专家 Prompt 带上了定界的前情块
    harness.engine.run_turn("conv-1", "and what about valves?").await;
    let calls = harness.transport.calls();
    let second_turn_prompt = &calls[3].1;
    assert!(second_turn_prompt.contains("[Previous conversation context:]"));
    assert!(second_turn_prompt.contains("User: tell me everything about pumps"));
    assert!(second_turn_prompt.contains("[End of context]"));
}

#[tokio::test]
async fn test_sequential_plan_runs_in_order() {
    let plan = r#"{
      "agents_needed": [
        {"agent_name": "inventory_specialist", "targeted_prompt": "Check stock of PUMP-001", "reason": "stock first"},
        {"agent_name": "order_specialist", "targeted_prompt": "Reorder if below threshold", "reason": "depends on stock"}
      ],
      "requires_coordination": true,
      "user_intent_summary": "stock then reorder"
    }"#;
    let harness = build_harness(vec![LlmScript::Text(plan)], Duration::from_secs(5));
    harness.transport.queue_text("inventory", "PUMP-001: 3 units left");
    harness.transport.queue_text("orders", "Reorder of 100 units suggested");

    let outcome = harness
        .engine
        .run_turn("conv-1", "check pump stock and reorder if low")
        .await;

    assert_eq!(harness.transport.call_order(), vec!["inventory", "orders"]);
    assert_eq!(
        outcome.reply,
        "PUMP-001: 3 units left\n\nReorder of 100 units suggested"
    );
}
