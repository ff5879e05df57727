use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use lobby_relay::bus::Bus;
use lobby_relay::registry::Registry;
use lobby_relay::{handler, AppState};

/// WebSocket signaling relay for named WebRTC lobbies.
#[derive(Parser, Debug)]
#[command(name = "lobby-relay", about, version)]
struct Args {
    /// Address to bind the HTTP/WebSocket listener on.
    #[arg(long, env = "LOBBY_RELAY_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Maximum number of concurrently live lobbies.
    #[arg(long, env = "LOBBY_RELAY_MAX_LOBBIES", default_value_t = 1024)]
    max_lobbies: usize,

    /// Maximum number of peers in a single lobby.
    #[arg(long, env = "LOBBY_RELAY_MAX_PEERS", default_value_t = 4096)]
    max_peers: usize,

    /// Grace period between SEAL and automatic lobby destruction, in
    /// milliseconds.
    #[arg(long, env = "LOBBY_RELAY_SEAL_GRACE_MS", default_value_t = 10_000)]
    seal_grace_ms: u64,

    /// How often the defense-in-depth sweep scans for lobbies whose
    /// destruction timer should have already fired.
    #[arg(long, env = "LOBBY_RELAY_SWEEP_INTERVAL_MS", default_value_t = 5_000)]
    sweep_interval_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let bus = Arc::new(Bus::new());
    let registry = Arc::new(Registry::new(
        bus.clone(),
        args.max_lobbies,
        args.max_peers,
        Duration::from_millis(args.seal_grace_ms),
    ));
    let state = Arc::new(AppState {
        registry: registry.clone(),
        bus,
    });

    spawn_sweep(registry, Duration::from_millis(args.sweep_interval_ms));

    let app = Router::new()
        .route("/socket/websocket", get(websocket_upgrade))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    info!(bind = %args.bind, "starting lobby-relay");
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .expect("failed to bind listener");
    axum::serve(listener, app.into_make_service())
        .await
        .expect("server error");
}

fn spawn_sweep(registry: Arc<Registry>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let destroyed = registry.sweep_expired();
            if !destroyed.is_empty() {
                info!(count = destroyed.len(), "sweep destroyed expired lobbies");
            }
        }
    });
}

async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_socket(socket, state))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "lobbies": state.registry.lobby_count(),
        "sealed_lobbies": state.registry.sealed_count(),
        "connected_peers": state.bus.connected_count(),
    }))
}
