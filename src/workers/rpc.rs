//! 专家 RPC 客户端
//!
//! 每个任务一次同步式请求/响应交换（JSON-RPC 2.0 形态，blocking、唯一关联 id）。
//! 限流/超时类失败按退避策略重试；其余远端业务错误降级为文本内容返回，
//! 单个专家失败不会中断整轮。每次调用计入指标。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::core::backoff::{is_retryable_error, retry_async, RetryConfig};
use crate::core::metrics::AgentCallStats;
use crate::workers::registry::{WorkerId, WorkerRegistry};
use crate::workers::sanitize::sanitize_reply;

/// 专家调用错误
#[derive(Error, Debug)]
pub enum WorkerError {
    /// 传输层失败（连接、超时、HTTP 状态码）
    #[error("Transport error: {0}")]
    Transport(String),

    /// 远端返回的限流类错误（可重试）
    #[error("Rate limit error: {0}")]
    RateLimited(String),

    /// 响应体不是合法 JSON
    #[error("Invalid response payload: {0}")]
    InvalidPayload(String),
}

/// 传输层接口：发送一个 JSON 请求体并返回解析后的响应
///
/// 生产实现走 HTTP；测试注入脚本化实现
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn exchange(&self, endpoint: &str, payload: Value) -> Result<Value, WorkerError>;
}

/// reqwest 实现：固定单次调用超时
pub struct HttpWorkerTransport {
    client: reqwest::Client,
}

impl HttpWorkerTransport {
    pub fn new(call_timeout: Duration) -> Result<Self, WorkerError> {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| WorkerError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WorkerTransport for HttpWorkerTransport {
    async fn exchange(&self, endpoint: &str, payload: Value) -> Result<Value, WorkerError> {
        let response = self
            .client
            .post(endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                // 超时要能被退避策略的文本标记命中
                if e.is_timeout() {
                    WorkerError::Transport(format!("request timeout: {}", e))
                } else {
                    WorkerError::Transport(e.to_string())
                }
            })?;

        let response = response
            .error_for_status()
            .map_err(|e| WorkerError::Transport(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| WorkerError::InvalidPayload(e.to_string()))
    }
}

/// 组装 message/send 请求体：唯一关联 id、单条文本消息、blocking（无流式）
fn build_payload(prompt: &str) -> Value {
    serde_json::json!({
        "id": Uuid::new_v4().to_string(),
        "jsonrpc": "2.0",
        "method": "message/send",
        "params": {
            "configuration": { "acceptedOutputModes": [], "blocking": true },
            "message": {
                "kind": "message",
                "messageId": Uuid::new_v4().to_string(),
                "role": "user",
                "parts": [{ "kind": "text", "text": prompt }],
            },
        },
    })
}

/// 专家 RPC 客户端
pub struct WorkerClient {
    registry: WorkerRegistry,
    transport: Arc<dyn WorkerTransport>,
    retry: RetryConfig,
    stats: Arc<AgentCallStats>,
}

impl WorkerClient {
    pub fn new(
        registry: WorkerRegistry,
        transport: Arc<dyn WorkerTransport>,
        retry: RetryConfig,
        stats: Arc<AgentCallStats>,
    ) -> Self {
        Self {
            registry,
            transport,
            retry,
            stats,
        }
    }

    /// 调用一个专家并返回净化后的文本
    ///
    /// 空响应与失败都计入指标；限流类错误经退避重试后仍失败才向上返回
    pub async fn call(
        &self,
        worker: WorkerId,
        conversation_id: &str,
        prompt: &str,
    ) -> Result<String, WorkerError> {
        let endpoint = self.registry.endpoint(worker);
        let started = Instant::now();

        let result = retry_async(&self.retry, worker.canonical_name(), || {
            let endpoint = endpoint.clone();
            // 每次尝试都是新的关联 id
            let payload = build_payload(prompt);
            async move { self.call_once(&endpoint, payload).await }
        })
        .await;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(text) if !text.trim().is_empty() => {
                tracing::debug!(
                    worker = worker.canonical_name(),
                    chars = text.len(),
                    latency_ms = latency_ms as u64,
                    "Worker call succeeded"
                );
                self.stats
                    .record(worker, conversation_id, true, latency_ms, None);
            }
            Ok(_) => {
                self.stats.record(
                    worker,
                    conversation_id,
                    false,
                    latency_ms,
                    Some("Empty response"),
                );
            }
            Err(e) => {
                self.stats
                    .record(worker, conversation_id, false, latency_ms, Some(&e.to_string()));
            }
        }

        result
    }

    async fn call_once(&self, endpoint: &str, payload: Value) -> Result<String, WorkerError> {
        let data = self.transport.exchange(endpoint, payload).await?;

        if let Some(error) = data.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string();
            if is_retryable_error(&message) {
                return Err(WorkerError::RateLimited(message));
            }
            // 永久性远端错误：降级为文本，让本轮其余任务继续
            tracing::warn!(error = %message, "Worker returned error payload");
            return Ok(format!("Error from agent: {}", message));
        }

        let texts: Vec<&str> = data
            .get("result")
            .and_then(|r| r.get("parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter(|p| p.get("kind").and_then(Value::as_str) == Some("text"))
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if texts.is_empty() {
            // 结构不符时兜底整包文本
            return Ok(sanitize_reply(&data.to_string()));
        }

        Ok(sanitize_reply(&texts.join("\n")))
    }
}
