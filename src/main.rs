//! # Live Video Agent - Server Entry Point
//!
//! Serves the HTTP/WebSocket control surface for one realtime Session with a
//! remote multimodal agent.
//!
//! ## Startup:
//! 1. Load `.env`, configure tracing
//! 2. Load and validate `AppConfig`
//! 3. Wire demo media devices (WAV microphone/speaker, test-pattern camera)
//! 4. Serve routes until SIGINT/SIGTERM, then disconnect the Session and stop

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use live_video_agent::config::AppConfig;
use live_video_agent::media::{DemoDevices, TestPatternSource};
use live_video_agent::state::AppState;
use live_video_agent::{handlers, health, websocket};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    debug!("Effective configuration:\n{}", config.to_redacted_toml()?);
    if config.agent.api_key.is_empty() {
        warn!("No agent API key configured; set GEMINI_API_KEY before connecting");
    }

    let devices = DemoDevices::new(config.media.clone(), config.audio.output_sample_rate);
    let camera = TestPatternSource::new(config.video.max_width, config.video.max_height);
    let app_state = AppState::new(config.clone(), Arc::new(devices), Arc::new(camera));
    let controller = app_state.controller.clone();
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/session", web::get().to(handlers::get_session))
                    .route("/session/connect", web::post().to(handlers::connect_session))
                    .route("/session/disconnect", web::post().to(handlers::disconnect_session)),
            )
            .route("/ws/session", web::get().to(websocket::session_websocket))
            .route("/health", web::get().to(health::health_check))
            .default_service(web::route().to(handlers::not_found))
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, ending session...");
            controller.disconnect().await;
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` overrides the default `live_video_agent=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_video_agent=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolve on SIGINT (Ctrl+C) or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT"),
        Err(e) => {
            error!("Failed to listen for shutdown signals: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
