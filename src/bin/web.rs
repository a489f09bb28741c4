//! scout HTTP 服务
//!
//! 启动: cargo run --bin scout-web --features web
//! POST /scrape {"source_url": "..."}；POST /scrape/stream 以 SSE 推送循环事件与最终结果；GET /health。

#![cfg(feature = "web")]

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::Instrument;

use scout::agent::{
    analyze, create_agent_components, extract_product_snapshot_stream, AgentComponents,
    ExtractionMode,
};
use scout::config::load_config;
use scout::schema::ProductSnapshot;

struct AppState {
    components: AgentComponents,
}

#[derive(Debug, Deserialize)]
struct ScrapeRequest {
    source_url: String,
    /// 预先抓取页面、单次模型调用
    #[serde(default)]
    single_pass: bool,
}

#[derive(Debug, Serialize)]
struct ScrapeResponse {
    success: bool,
    data: Option<ProductSnapshot>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    detail: String,
}

fn failure_detail(e: impl std::fmt::Display) -> String {
    format!("Failed to scrape and analyze product: {}", e)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_config(None).context("Failed to load config")?;
    scout::observability::init(&cfg.log.level);

    let components = create_agent_components(&cfg).context("Failed to create agent")?;
    let state = Arc::new(AppState { components });

    let app = Router::new()
        .route("/health", get(health))
        .route("/scrape", post(scrape))
        .route("/scrape/stream", post(scrape_stream))
        .with_state(state);

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    tracing::info!("scout web: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "Product Scraper Engine",
    }))
}

/// POST /scrape：同步返回结果
async fn scrape(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScrapeRequest>,
) -> Result<Json<ScrapeResponse>, (StatusCode, Json<ErrorDetail>)> {
    let mode = if req.single_pass {
        ExtractionMode::SinglePass
    } else {
        ExtractionMode::Agentic
    };
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("scrape", %request_id, url = %req.source_url);

    match analyze(&state.components, &req.source_url, mode)
        .instrument(span)
        .await
    {
        Ok(snapshot) => Ok(Json(ScrapeResponse {
            success: true,
            data: Some(snapshot),
            error: None,
        })),
        Err(e) => {
            tracing::error!(%request_id, error = %e, "scrape failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorDetail {
                    detail: failure_detail(e),
                }),
            ))
        }
    }
}

/// POST /scrape/stream：SSE 推送 LoopEvent，最后一条为 {"type": "result", ...}
async fn scrape_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScrapeRequest>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Value>();
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("scrape_stream", %request_id, url = %req.source_url);

    tokio::spawn(
        async move {
            let (event_tx, mut event_rx) = mpsc::unbounded_channel();
            let forward_tx = out_tx.clone();
            let forward = async move {
                while let Some(event) = event_rx.recv().await {
                    if let Ok(v) = serde_json::to_value(&event) {
                        let _ = forward_tx.send(v);
                    }
                }
            };
            let run = extract_product_snapshot_stream(&state.components, &req.source_url, event_tx);
            let (outcome, _) = tokio::join!(run, forward);

            let result = match outcome {
                Ok(outcome) => json!({
                    "type": "result",
                    "success": true,
                    "data": outcome.payload,
                    "error": null,
                }),
                Err(e) => json!({
                    "type": "result",
                    "success": false,
                    "data": null,
                    "error": failure_detail(e),
                }),
            };
            let _ = out_tx.send(result);
        }
        .instrument(span),
    );

    let event_stream = stream::unfold(out_rx, |mut rx| async move {
        let msg = rx.recv().await?;
        Some((Ok(Event::default().data(msg.to_string())), rx))
    });
    Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}
