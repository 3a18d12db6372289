use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_gateway::config::Config;
use chat_gateway::gateway::call::CallCoordinator;
use chat_gateway::gateway::fanout::GatewayBroadcast;
use chat_gateway::gateway::registry::PresenceRegistry;
use chat_gateway::store::{DirectoryStore, MemoryDirectory};
use chat_gateway::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    // In-memory directory for now. Swap in the SQL-backed store once the
    // message service exposes membership lookups.
    let store: Arc<dyn DirectoryStore> = Arc::new(MemoryDirectory::new());

    let broadcast = GatewayBroadcast::new();
    let presence = Arc::new(PresenceRegistry::new());
    let calls = CallCoordinator::spawn(store.clone(), broadcast.clone());

    let state = AppState {
        config: Arc::new(config),
        store,
        presence,
        broadcast,
        calls,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = chat_gateway::routes::router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "chat-gateway listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
