use http::{Method, header};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use authcore::{config::Config, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    // The key manager self-heals, but surfacing a broken store or master
    // key at startup beats surfacing it on the first login.
    match state.keys.get_active_key().await {
        Ok((key_id, _)) => {
            tracing::info!("✅ Current encryption key available: {}", key_id);
        }
        Err(e) => {
            tracing::error!("❌ Failed to ensure an encryption key exists: {}", e);
            return Err(e.into());
        }
    }

    let cors = CorsLayer::new()
        .allow_origin([
            "http://localhost:3000".parse().unwrap(),
            "http://127.0.0.1:3000".parse().unwrap(),
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::COOKIE,
            "x-csrf-token".parse().unwrap(),
        ])
        .allow_credentials(true)
        .expose_headers(["x-csrf-token".parse().unwrap()])
        .max_age(Duration::from_secs(86400));

    let app = routes::router(state.clone())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(cors);

    // Scheduled maintenance: hourly expired-token and expired-session
    // sweeps, key rotation on its own configured cadence. Never runs on
    // the request path.
    let maintenance_state = state.clone();
    let rotation_interval = state
        .config
        .rotation_interval
        .to_std()
        .unwrap_or(Duration::from_secs(86400));
    tokio::spawn(async move {
        let mut last_rotation = std::time::Instant::now();
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            tracing::info!("🧹 Running scheduled maintenance sweep...");

            if last_rotation.elapsed() >= rotation_interval {
                match maintenance_state.keys.rotate_keys().await {
                    Ok(()) => last_rotation = std::time::Instant::now(),
                    Err(e) => tracing::error!("❌ Key rotation failed: {}", e),
                }
            }
            if let Err(e) = maintenance_state.tokens.cleanup_tokens().await {
                tracing::error!("❌ Refresh token sweep failed: {}", e);
            }
            if let Err(e) = maintenance_state.sessions.cleanup_expired_sessions().await {
                tracing::error!("❌ Session sweep failed: {}", e);
            }
            if let Err(e) = maintenance_state
                .sessions
                .cleanup_expired_oauth_sessions()
                .await
            {
                tracing::error!("❌ OAuth state sweep failed: {}", e);
            }

            tracing::info!("✅ Maintenance sweep completed");
        }
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!("✅ Background maintenance job started (runs every hour)");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
