//! 调度引擎：单轮状态机
//!
//! run_turn 的阶段顺序：
//! 1. 未决审批 + 决断令牌 → 短路执行/取消被门控的动作（完全跳过分类）
//! 2. 无未决审批的寒暄确认 → 罐头回复（不浪费专家调用）
//! 3. 意图分类 → 有效计划走智能路由；无计划走单次补全的降级路径
//! 4. 数据任务与通知任务分离；independent 且 ≥2 个数据任务才并发，结果按任务下标
//!    重新对位（完成顺序不确定，合并输出必须保持计划顺序）；通知永远最后
//! 5. 单点失败降级为带标签的错误块，不中断整轮
//! 6. 回复再过一遍审批门控，命中则登记台账
//! 7. 会话与记忆落盘尽力而为，失败只记日志
//!
//! 引擎在任何外部调用期间都不持有锁（台账与指标由 DashMap 按 key 自理）。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::Semaphore;

use crate::context::ContextAssembler;
use crate::core::approval::{ActionKind, ApprovalLedger};
use crate::dispatch::gate;
use crate::intent::{AgentTask, CoordinationMode, DispatchPlan, IntentPlanner};
use crate::llm::{LlmClient, Message};
use crate::session::{MemoryService, SessionEvent, SessionStore};
use crate::workers::{sanitize_reply, WorkerClient, WorkerId};

/// 零数据块时的兜底回复（调用方永远不会收到空串）
const NO_DATA_FALLBACK: &str = "No data available.";

/// 降级路径也失败时的兜底回复
const DEGRADED_FALLBACK: &str = "I could not process that request right now. Please try again.";

/// 降级路径的系统 Prompt
const FALLBACK_SYSTEM_PROMPT: &str = "You are an enterprise operations assistant coordinating \
inventory, policy, analytics, order, and notification specialists. Answer the user's request \
directly and concisely. Never fabricate data you do not have access to.";

/// 一次专家任务的结果，整轮内由引擎独占
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub worker: WorkerId,
    pub content: String,
    pub rationale: String,
    pub succeeded: bool,
    pub timestamp: DateTime<Utc>,
}

/// 一轮的产出
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub pending_approval: bool,
    pub approval_kind: Option<ActionKind>,
}

impl TurnOutcome {
    fn plain(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            pending_approval: false,
            approval_kind: None,
        }
    }
}

/// 调度引擎
pub struct DispatchEngine {
    planner: IntentPlanner,
    workers: Arc<WorkerClient>,
    ledger: Arc<ApprovalLedger>,
    sessions: Arc<dyn SessionStore>,
    memory: Option<Arc<dyn MemoryService>>,
    assembler: ContextAssembler,
    /// 降级路径使用的通用补全
    llm: Arc<dyn LlmClient>,
    /// 同轮并发专家调用的上限（至多专家总数）
    fanout: Arc<Semaphore>,
}

impl DispatchEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        planner: IntentPlanner,
        workers: Arc<WorkerClient>,
        ledger: Arc<ApprovalLedger>,
        sessions: Arc<dyn SessionStore>,
        memory: Option<Arc<dyn MemoryService>>,
        assembler: ContextAssembler,
        llm: Arc<dyn LlmClient>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            planner,
            workers,
            ledger,
            sessions,
            memory,
            assembler,
            llm,
            fanout: Arc::new(Semaphore::new(max_concurrent.clamp(1, WorkerId::ALL.len()))),
        }
    }

    /// 处理一条用户消息，返回回复与审批状态
    pub async fn run_turn(&self, conversation_id: &str, user_prompt: &str) -> TurnOutcome {
        let normalized = user_prompt.trim().to_lowercase();

        if self.ledger.peek(conversation_id).is_some() {
            if gate::is_affirmative(&normalized) {
                return self.execute_approved(conversation_id).await;
            }
            if gate::is_negative(&normalized) {
                return self.execute_rejected(conversation_id);
            }
            // 非决断消息：审批保持未决，按普通请求继续
        } else if let Some(reply) = gate::conversational_reply(&normalized) {
            return TurnOutcome::plain(reply);
        }

        tracing::info!(
            conversation_id,
            prompt_chars = user_prompt.len(),
            "Classifying intent"
        );
        let plan = self.planner.classify(user_prompt).await;

        // 会话不存在则建好（上下文拼装与落盘都依赖它）
        if let Ok(None) = self.sessions.get(conversation_id).await {
            if let Err(e) = self.sessions.create(conversation_id).await {
                tracing::warn!(error = %e, "Session create failed");
            }
        }
        let context = self.assembler.build(conversation_id).await;
        if !context.is_empty() {
            tracing::debug!(chars = context.len(), "Retrieved conversation context");
        }

        let reply = match &plan {
            Some(plan) => {
                self.execute_plan(conversation_id, user_prompt, plan, &context)
                    .await
            }
            None => self.degraded_reply(user_prompt, &context).await,
        };

        // 回复再过一遍审批门控
        let (pending_approval, approval_kind) = if gate::detect_email_approval(&reply) {
            self.ledger.create(
                conversation_id,
                WorkerId::Notification,
                ActionKind::EmailSend,
                &reply,
                HashMap::new(),
            );
            tracing::info!(conversation_id, "Registered pending email approval");
            (true, Some(ActionKind::EmailSend))
        } else {
            (false, None)
        };

        self.persist_turn(conversation_id, user_prompt, &reply).await;

        TurnOutcome {
            reply,
            pending_approval,
            approval_kind,
        }
    }

    /// 批准短路：执行被门控的动作并确认
    async fn execute_approved(&self, conversation_id: &str) -> TurnOutcome {
        let Some(approval) = self.ledger.approve(conversation_id) else {
            // 台账不一致（并发轮已消费）：空操作
            return TurnOutcome::plain("Nothing to approve.");
        };

        match approval.action_kind {
            ActionKind::EmailSend => {
                if let Some(draft) = gate::parse_email_draft(&approval.draft_content) {
                    let send_prompt = format!(
                        "Send the approved email now. Do not ask for further confirmation.\nTo: {}\nSubject: {}\nBody:\n{}",
                        draft.to, draft.subject, draft.body
                    );
                    let send_result = match self
                        .workers
                        .call(WorkerId::Notification, conversation_id, &send_prompt)
                        .await
                    {
                        Ok(text) if !text.trim().is_empty() => text,
                        Ok(_) => "Email handed to notification specialist.".to_string(),
                        Err(e) => format!("Failed to send email: {}", e),
                    };
                    TurnOutcome::plain(format!(
                        "Approved! Email sent.\n\n{}\n\n{}",
                        send_result, approval.draft_content
                    ))
                } else {
                    // 草稿字段解析不出来也要确认批准本身
                    TurnOutcome::plain(format!(
                        "Approved! {} has been executed.\n\n{}",
                        approval.action_kind, approval.draft_content
                    ))
                }
            }
        }
    }

    /// 拒绝短路
    fn execute_rejected(&self, conversation_id: &str) -> TurnOutcome {
        match self.ledger.reject(conversation_id) {
            Some(approval) => TurnOutcome::plain(format!(
                "Cancelled. The {} was not executed.",
                approval.action_kind
            )),
            None => TurnOutcome::plain("Nothing to cancel."),
        }
    }

    /// 智能路由：数据任务（并发或顺序）→ 通知任务 → 按计划顺序合并
    async fn execute_plan(
        &self,
        conversation_id: &str,
        user_prompt: &str,
        plan: &DispatchPlan,
        context: &str,
    ) -> String {
        let mut data_tasks: Vec<&AgentTask> = Vec::new();
        let mut notification_task: Option<&AgentTask> = None;

        for task in &plan.tasks {
            if task.worker.is_notification() {
                if notification_task.is_none() {
                    notification_task = Some(task);
                } else {
                    tracing::warn!("Dropping duplicate notification task");
                }
            } else {
                data_tasks.push(task);
            }
        }

        let concurrent =
            plan.coordination == CoordinationMode::Independent && data_tasks.len() >= 2;
        tracing::info!(
            data_tasks = data_tasks.len(),
            has_notification = notification_task.is_some(),
            concurrent,
            "Executing dispatch plan"
        );

        let data_blocks: Vec<WorkerResult> = if concurrent {
            // join_all 的结果与任务下标对齐，与完成顺序无关
            join_all(
                data_tasks
                    .iter()
                    .map(|task| self.run_data_task(conversation_id, task, context)),
            )
            .await
        } else {
            let mut blocks = Vec::with_capacity(data_tasks.len());
            for task in &data_tasks {
                blocks.push(self.run_data_task(conversation_id, task, context).await);
            }
            blocks
        };

        if let Some(task) = notification_task {
            self.run_notification(conversation_id, user_prompt, task, &data_blocks, context)
                .await
        } else if !data_blocks.is_empty() {
            data_blocks
                .iter()
                .map(|b| b.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
                .trim()
                .to_string()
        } else {
            NO_DATA_FALLBACK.to_string()
        }
    }

    /// 执行一个数据任务；失败与空响应都降级为错误块
    async fn run_data_task(
        &self,
        conversation_id: &str,
        task: &AgentTask,
        context: &str,
    ) -> WorkerResult {
        let prompt = format!("{}{}", context, task.prompt);

        let _permit = self
            .fanout
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed");

        let (content, succeeded) = match self
            .workers
            .call(task.worker, conversation_id, &prompt)
            .await
        {
            Ok(text) if !text.trim().is_empty() => (text.trim().to_string(), true),
            Ok(_) => (
                format!("Error: empty response from {}", task.worker.display_label()),
                false,
            ),
            Err(e) => {
                tracing::warn!(
                    worker = task.worker.canonical_name(),
                    error = %e,
                    "Data task failed"
                );
                (format!("Error: {}", e), false)
            }
        };

        WorkerResult {
            worker: task.worker,
            content,
            rationale: task.rationale.clone(),
            succeeded,
            timestamp: Utc::now(),
        }
    }

    /// 通知任务：前序数据块逐个带显示名标签嵌入 Prompt
    async fn run_notification(
        &self,
        conversation_id: &str,
        user_prompt: &str,
        task: &AgentTask,
        data_blocks: &[WorkerResult],
        context: &str,
    ) -> String {
        // 有历史上下文的跟进轮以用户原话为基底，避免定向 Prompt 丢失所指
        let base_prompt = if context.is_empty() {
            task.prompt.as_str()
        } else {
            user_prompt
        };

        let enriched = if data_blocks.is_empty() {
            format!("{}{}", context, base_prompt)
        } else {
            let labeled: Vec<String> = data_blocks
                .iter()
                .map(|b| format!("[{}:]\n{}", b.worker.display_label(), b.content))
                .collect();
            format!(
                "{}{}\n\n[Context from other agents:]\n{}",
                context,
                base_prompt,
                labeled.join("\n\n")
            )
        };
        tracing::debug!(chars = enriched.len(), "Calling notification with enriched context");

        let joined_blocks = || {
            data_blocks
                .iter()
                .map(|b| b.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
                .trim()
                .to_string()
        };

        match self
            .workers
            .call(WorkerId::Notification, conversation_id, &enriched)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                // 通知专家没话说：退回原始数据块而不是空手而归
                if data_blocks.is_empty() {
                    "No response from notification agent.".to_string()
                } else {
                    joined_blocks()
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Notification task failed");
                if data_blocks.is_empty() {
                    format!("Error: {}", e)
                } else {
                    joined_blocks()
                }
            }
        }
    }

    /// 降级路径：无有效计划时的单次通用补全（仍带上下文与净化）
    async fn degraded_reply(&self, user_prompt: &str, context: &str) -> String {
        tracing::info!("No valid dispatch plan, using degraded single-completion path");
        let messages = [
            Message::system(FALLBACK_SYSTEM_PROMPT),
            Message::user(format!("{}{}", context, user_prompt)),
        ];

        match self.llm.complete(&messages).await {
            Ok(text) => {
                let cleaned = sanitize_reply(&text);
                if cleaned.is_empty() {
                    DEGRADED_FALLBACK.to_string()
                } else {
                    cleaned
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Degraded path completion failed");
                DEGRADED_FALLBACK.to_string()
            }
        }
    }

    /// 会话与记忆落盘：尽力而为，失败不上抛
    async fn persist_turn(&self, conversation_id: &str, user_prompt: &str, reply: &str) {
        if let Err(e) = self
            .sessions
            .append_event(conversation_id, SessionEvent::user(user_prompt))
            .await
        {
            tracing::warn!(error = %e, "Error storing user event");
        }
        if let Err(e) = self
            .sessions
            .append_event(conversation_id, SessionEvent::orchestrator(reply))
            .await
        {
            tracing::warn!(error = %e, "Error storing orchestrator event");
        }

        if let Some(memory) = &self.memory {
            match self.sessions.get(conversation_id).await {
                Ok(Some(session)) => {
                    if let Err(e) = memory.add_session_to_memory(&session).await {
                        tracing::warn!(error = %e, "Error saving session to memory");
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Error loading session for memory"),
            }
        }
    }
}
