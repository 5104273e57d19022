//! Hive - 企业智能体编排网关
//!
//! 入口：初始化日志、加载配置、装配调度引擎，启动 HTTP 服务与审批清扫任务。

use std::time::Duration;

use anyhow::Context;
use hive::config::{load_config, AppConfig};
use hive::server::{build_state, create_router};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let state = build_state(&cfg).context("Failed to build server state")?;

    let shutdown = CancellationToken::new();

    // 未决审批的 TTL 清扫（ttl_secs = 0 表示不过期）
    if cfg.approval.ttl_secs > 0 {
        let ledger = state.ledger.clone();
        let ttl = Duration::from_secs(cfg.approval.ttl_secs);
        let interval = Duration::from_secs(cfg.approval.sweep_interval_secs.max(1));
        let sweeper_cancel = shutdown.child_token();
        tokio::spawn(async move {
            ledger.run_sweeper(ttl, interval, sweeper_cancel).await;
        });
    }

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.bind_addr))?;

    tracing::info!("Starting Hive orchestrator on http://{}", cfg.server.bind_addr);
    tracing::info!("Press Ctrl+C to stop");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down...");
            shutdown.cancel();
        })
        .await
        .context("Server run failed")?;

    Ok(())
}
