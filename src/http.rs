//! Read-only HTTP API
//!
//! - `GET /config`: home coordinates and zoom for map clients
//! - `GET /units`: live units and contacts
//! - `GET /stats`: router and listener counters

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use takrelay_core::HomeConfig;
use takrelay_router::{EntityRegistry, HandlerRegistry, Item, MetricsSnapshot, RelayMetrics};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::server_listener::{ListenerState, ListenerStats};

#[derive(Clone)]
pub struct ApiState {
    pub home: HomeConfig,
    pub entities: Arc<EntityRegistry>,
    pub handlers: Arc<HandlerRegistry>,
    pub metrics: Arc<RelayMetrics>,
    pub listener: Arc<ListenerState>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub router: MetricsSnapshot,
    pub tcp: ListenerStats,
    pub clients: usize,
    pub entities: usize,
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/config", get(get_config))
        .route("/units", get(list_units))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_config(State(state): State<ApiState>) -> Json<HomeConfig> {
    Json(state.home)
}

async fn list_units(State(state): State<ApiState>) -> Json<Vec<Item>> {
    Json(state.entities.snapshot())
}

async fn get_stats(State(state): State<ApiState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        router: state.metrics.snapshot(),
        tcp: state.listener.stats(),
        clients: state.handlers.len(),
        entities: state.entities.len(),
    })
}

/// Bind and serve until shutdown
pub async fn serve(
    bind_addr: &str,
    state: ApiState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<JoinHandle<()>> {
    let addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("Invalid web bind address: {}", bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP API on {}", addr))?;

    info!(bind_addr = %addr, "HTTP API started");

    let app = create_router(state);
    let task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "HTTP API error");
        }
    });

    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use takrelay_cot::Event;

    #[tokio::test]
    async fn test_handlers_serialize_state() {
        let entities = Arc::new(EntityRegistry::new());
        let event = Event::new("marker-1", "b-m-p-s-m", chrono::Duration::minutes(5));
        entities.upsert(
            "marker-1",
            Item::new(takrelay_router::ItemKind::Unit, &event, chrono::Utc::now()),
        );

        let state = ApiState {
            home: HomeConfig::default(),
            entities,
            handlers: Arc::new(HandlerRegistry::new()),
            metrics: Arc::new(RelayMetrics::new()),
            listener: Arc::new(ListenerState::default()),
        };

        let Json(home) = get_config(State(state.clone())).await;
        assert_eq!(home.zoom, 5);

        let Json(units) = list_units(State(state.clone())).await;
        let json = serde_json::to_value(&units).unwrap();
        assert_eq!(json[0]["kind"], "unit");
        assert_eq!(json[0]["uid"], "marker-1");
        assert_eq!(json[0]["type"], "b-m-p-s-m");

        let Json(stats) = get_stats(State(state)).await;
        assert_eq!(stats.entities, 1);
        assert_eq!(stats.clients, 0);
    }
}
