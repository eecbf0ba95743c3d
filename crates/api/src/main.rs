use api::{
    build_app, init_credential_store, init_session_engine, init_tracing,
    spawn_client_session_cleanup, AppState,
};
use config::ApiConfig;
use services::auth::ExpirySweeper;
use std::time::Duration;

#[tokio::main]
async fn main() {
    // Load configuration first to get logging settings
    let config = ApiConfig::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Application cannot start without a valid configuration file.");
        std::process::exit(1);
    });

    // Initialize tracing with configuration from config.yaml
    init_tracing(&config.logging);

    let store = init_credential_store(&config).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to initialize credential store");
        std::process::exit(1);
    });

    let engine = init_session_engine(&config.auth, &store).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to configure login providers");
        std::process::exit(1);
    });

    // Daily removal of sessions past the retention window
    let sweep_interval = Duration::from_secs(config.auth.sweeper_interval_secs.max(1));
    let _sweeper = ExpirySweeper::spawn(engine.clone(), config.auth.login_expiry, sweep_interval);
    let _cookie_cleanup = spawn_client_session_cleanup(store.client_sessions.clone(), sweep_interval);

    let mount_path = config.auth.mount_path();
    let app = build_app(AppState::new(
        engine,
        config.auth.clone(),
        store.client_sessions,
    ));

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, address = %bind_address, "Failed to bind");
            std::process::exit(1);
        });

    tracing::info!(address = %bind_address, "Server started successfully");
    tracing::info!("Login Endpoints:");
    tracing::info!("  - GET {}/login?provider=<name>", mount_path);
    tracing::info!("  - GET|POST {}/endpoint?provider=<name>", mount_path);
    tracing::info!("  - GET {}/logout", mount_path);
    tracing::info!("  - GET {}/status", mount_path);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
