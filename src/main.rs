use anyhow::Result;
use std::sync::Arc;

mod auth;
mod config;
mod error;
mod middleware;
mod proxy;
mod routes;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = config::Config::load()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    tracing::info!("🚀 Relay gateway starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    // Select the token store backend
    let token_store: Arc<dyn store::TokenStore> = match &config.token_db_file {
        Some(path) => {
            tracing::info!("Using SQLite token store: {}", path.display());
            Arc::new(store::SqliteTokenStore::open(path)?)
        }
        None => {
            tracing::info!("No token database configured, using in-memory token store");
            Arc::new(store::MemoryTokenStore::new())
        }
    };

    // Initialize the token cache manager
    let token_manager = Arc::new(auth::TokenManager::new(
        token_store,
        config.oauth_token_url.clone(),
        config.oauth_client_id.clone(),
        config.oauth_client_secret.clone(),
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);

    // Probe the issuer once so credential problems surface at startup
    match token_manager.get_valid_token().await {
        Ok(token) => {
            tracing::info!(
                "✅ Token acquisition successful (token: {}...)",
                &token[..12.min(token.len())]
            );
        }
        Err(e) => {
            tracing::error!("❌ Token acquisition failed: {}", e);
            tracing::warn!(
                "Server will start but relayed requests will fail until credentials are valid"
            );
        }
    }

    // Initialize the upstream proxy
    let upstream_proxy = Arc::new(proxy::UpstreamProxy::new(
        token_manager.clone(),
        config.upstream_api_url.clone(),
        config.oauth_client_id.clone(),
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);
    tracing::info!("✅ Upstream proxy initialized");

    if config.shared_secret.is_none() {
        tracing::warn!("⚠️ No shared secret configured, running in open mode");
    }

    let app_state = routes::AppState {
        shared_secret: config.shared_secret.clone(),
        token_manager,
        proxy: upstream_proxy,
    };

    // Build the application with routes and middleware
    let app = build_app(app_state, config.allowed_origins.clone());

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    print_startup_banner(&config);

    // Start server with graceful shutdown
    tracing::info!("🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 Server shutdown complete");

    Ok(())
}

/// Build the application with all routes and middleware
fn build_app(state: routes::AppState, allowed_origins: Option<Vec<String>>) -> axum::Router {
    use axum::Router;

    // Health check routes (no auth required)
    let health_routes = routes::health_routes();

    // Relay and token routes (with auth)
    let relay_routes = routes::relay_routes(state.clone());
    let token_routes = routes::token_routes(state);

    Router::new()
        .merge(health_routes)
        .merge(relay_routes)
        .merge(token_routes)
        // Middleware stack: CORS → request tracing → (auth is per-route)
        .layer(middleware::cors_layer(allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Print startup banner
fn print_startup_banner(config: &config::Config) {
    println!();
    println!("  Relay Gateway");
    println!("  Version:     {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:      http://{}:{}",
        config.server_host, config.server_port
    );
    println!("  Upstream:    {}", config.upstream_api_url);
    println!(
        "  Auth:        {}",
        if config.shared_secret.is_some() {
            "shared secret"
        } else {
            "open mode"
        }
    );
    println!(
        "  Origins:     {}",
        match &config.allowed_origins {
            Some(origins) => origins.join(", "),
            None => "all".to_string(),
        }
    );
    println!("  Log Level:   {}", config.log_level);
    println!();
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
