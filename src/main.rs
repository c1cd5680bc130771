mod config;
mod events;
mod gif;
mod grace;
mod handlers;
mod limiter;
mod lobby;
mod merge;
mod rooms;
mod server;
mod store;
mod types;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::events::{DISCONNECT_PLAYER, Dispatcher};
use crate::limiter::RateLimiter;
use crate::server::Server;
use crate::store::MemoryStore;
use crate::types::Envelope;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct AppState {
    server: Arc<Server>,
    dispatcher: Arc<Dispatcher>,
    limiter: Arc<RateLimiter>,
}

// ─── Routes ───────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    if let Err(retry) = state.limiter.consume(addr.ip()) {
        tracing::warn!("Rate limited connection from {}", addr);
        let retry_after = retry.as_secs().max(1).to_string();
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after)],
            "Too Many Requests",
        )
            .into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: AppState, addr: SocketAddr) {
    let conn = uuid::Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let mut outbound = state.server.rooms.register(conn, addr.ip());
    tracing::info!("WebSocket connected: {} from {}", conn, addr);

    // Single writer per socket; handlers only ever queue.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to encode outbound message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Invalid message from {}: {}", conn, e);
                continue;
            }
        };

        if envelope.kind == DISCONNECT_PLAYER {
            tracing::warn!("Client {} sent a reserved event type", conn);
            continue;
        }

        state
            .dispatcher
            .dispatch(&state.server, conn, &envelope.kind, envelope.data)
            .await;
    }

    tracing::info!("WebSocket disconnected: {}", conn);
    state
        .dispatcher
        .dispatch(
            &state.server,
            conn,
            DISCONNECT_PLAYER,
            json!({ "reason": "transport close" }),
        )
        .await;
    state.server.rooms.unregister(conn);
    writer.abort();
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if origins.iter().any(|origin| origin == "*") {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(allowed))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}

// ─── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("opengarlic=info")),
        )
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;

    let store = Arc::new(MemoryStore::new());
    let server = Server::new(config.clone(), store.clone());
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_points,
        config.rate_limit_window,
    ));

    let sweeper = {
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticks.tick().await;
                let expired = store.sweep();
                if expired > 0 {
                    tracing::debug!("Swept {} expired documents", expired);
                }
                limiter.sweep();
            }
        })
    };

    let dispatcher = Dispatcher::standard();
    tracing::debug!("Registered events: {:?}", dispatcher.event_names());

    let state = AppState {
        server: Arc::clone(&server),
        dispatcher: Arc::new(dispatcher),
        limiter,
    };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(cors_layer(&config.cors_origins))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;

    tracing::info!("OpenGarlic server running on port {}", config.port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    sweeper.abort();
    server.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}
