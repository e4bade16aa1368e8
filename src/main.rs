use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rdvboard::{
    abuse, api, auth,
    config::{Rules, ServerConfig},
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rdvboard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting rdvboard...");

    let server_config = ServerConfig::from_env();
    let rules = Rules::from_env();

    let admin_auth = Arc::new(auth::AdminAuth::new(auth::AuthConfig::from_env()));
    let abuse_config = Arc::new(abuse::AbuseConfig::from_env());

    let mut state = AppState::with_rules(rules);
    if let Some(ref path) = server_config.snapshot_path {
        state = state.with_snapshot_path(path);
    }
    // A corrupt snapshot must not be silently overwritten by an empty ledger
    if let Err(e) = state.load_snapshot().await {
        tracing::error!("Failed to load snapshot: {}", e);
        return Err(e.into());
    }
    let state = Arc::new(state);

    let app = api::router(state, admin_auth, abuse_config)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = server_config.bind_addr;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
