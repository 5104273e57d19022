//! Turn Handler HTTP 入口
//!
//! POST /chat 是唯一对外操作：只有请求形状不合法才硬失败（400 通用消息），
//! 引擎内部的一切失败都被吸收进回复文本。另有指标与健康检查两个辅助路由。

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::context::ContextAssembler;
use crate::core::approval::ApprovalLedger;
use crate::core::metrics::AgentCallStats;
use crate::dispatch::DispatchEngine;
use crate::intent::IntentPlanner;
use crate::llm::create_llm_from_config;
use crate::session::{create_session_store, InMemoryMemory, MemoryService};
use crate::workers::{HttpWorkerTransport, WorkerClient, WorkerRegistry};

/// 服务状态：调度引擎与两个进程级存储
pub struct AppState {
    pub engine: DispatchEngine,
    pub stats: Arc<AgentCallStats>,
    pub ledger: Arc<ApprovalLedger>,
}

/// POST /chat 请求体
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    pub conversation_id: String,
}

/// POST /chat 响应体
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: String,
    pub pending_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_type: Option<String>,
}

/// 装配依赖图：配置 → LLM / 注册表 / 传输 / 台账 / 会话 → 引擎
pub fn build_state(cfg: &AppConfig) -> anyhow::Result<Arc<AppState>> {
    let llm = create_llm_from_config(&cfg.llm);
    let stats = Arc::new(AgentCallStats::new());
    let ledger = Arc::new(ApprovalLedger::new());

    let transport = Arc::new(HttpWorkerTransport::new(Duration::from_secs(
        cfg.workers.call_timeout_secs,
    ))?);
    let workers = Arc::new(WorkerClient::new(
        WorkerRegistry::from_config(&cfg.workers),
        transport,
        cfg.retry.worker.to_retry_config(),
        stats.clone(),
    ));

    let sessions = create_session_store(cfg.session.dir.as_deref());
    let memory: Arc<dyn MemoryService> = Arc::new(InMemoryMemory::default());
    let assembler = ContextAssembler::new(
        sessions.clone(),
        cfg.context.max_events,
        cfg.context.max_chars_per_event,
    );

    let planner = IntentPlanner::new(
        llm.clone(),
        cfg.retry.classifier.to_retry_config(),
        Duration::from_secs(cfg.llm.classify_timeout_secs),
        &cfg.routing.rules,
    );

    let engine = DispatchEngine::new(
        planner,
        workers,
        ledger.clone(),
        sessions,
        Some(memory),
        assembler,
        llm,
        cfg.workers.max_concurrent,
    );

    Ok(Arc::new(AppState {
        engine,
        stats,
        ledger,
    }))
}

/// 创建路由
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat", post(api_chat))
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/metrics", get(api_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// POST /chat - 处理一轮用户消息
async fn api_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    if request.prompt.trim().is_empty() || request.conversation_id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "prompt and conversation_id are required".to_string(),
        ));
    }

    let outcome = state
        .engine
        .run_turn(&request.conversation_id, &request.prompt)
        .await;

    Ok(Json(ChatResponse {
        response: outcome.reply,
        conversation_id: request.conversation_id,
        pending_approval: outcome.pending_approval,
        approval_type: outcome.approval_kind.map(|k| k.as_str().to_string()),
    }))
}

/// GET /api/metrics - 各专家的调用统计
async fn api_metrics(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "agents": state.stats.snapshot(),
    }))
}
