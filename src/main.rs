use anyhow::{Context, Result};
use log::{error, info, warn};
use rubhub_security::api::{AppState, RestApi};
use rubhub_security::capture::recorder::ensure_writable;
use rubhub_security::capture::{CaptureDesk, DeviceRelay};
use rubhub_security::config;
use rubhub_security::messaging::{self, AlertEvents, EventType};
use rubhub_security::notifications::{
    BrokerDispatcher, Dispatcher, LogDispatcher, NotificationGateway,
};
use rubhub_security::{AlertStore, EscalationController, UrgencyTicker};
use std::path::PathBuf;
use std::sync::Arc;

async fn run_app() -> Result<()> {
    // Load configuration; the first argument is an optional config file
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = config::load_config(config_path.as_deref())?;
    config.validate()?;

    // Initialize logging, RUST_LOG wins over the configured level
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.api.log_level.as_str()),
    )
    .init();
    info!("Starting RubHub security console");
    match &config_path {
        Some(path) => info!("Configuration loaded from {:?}", path),
        None => info!("Using default configuration"),
    }

    ensure_writable(&config.capture.storage_path)?;

    // Create the event publisher (RabbitMQ or log only)
    let publisher = messaging::create_publisher(config.message_broker.clone()).await?;
    let events = AlertEvents::new(publisher.clone());
    info!("Event publisher initialized");

    events
        .system(
            EventType::SystemStartup,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }),
        )
        .await;

    let dispatcher: Arc<dyn Dispatcher> = if config.message_broker.enabled {
        Arc::new(BrokerDispatcher::new(publisher.clone()))
    } else {
        Arc::new(LogDispatcher)
    };

    let store = Arc::new(AlertStore::new());
    let gateway = Arc::new(NotificationGateway::new(
        dispatcher,
        config.escalation.clone(),
    ));
    let relay = DeviceRelay::new(
        events.clone(),
        &config.api.public_url,
        config.capture.frame_buffer,
    );
    let capture = Arc::new(CaptureDesk::new(
        Arc::new(relay.clone()),
        config.capture.clone(),
        events.clone(),
    ));
    let controller = Arc::new(EscalationController::new(
        store.clone(),
        gateway,
        capture.clone(),
        events.clone(),
    ));

    let ticker = Arc::new(UrgencyTicker::new(store.clone(), config.urgency.clone()));
    let ticker_task = ticker.clone().start();

    let api = RestApi::new(
        &config.api,
        AppState {
            store,
            controller,
            capture: capture.clone(),
            relay,
            ticker: ticker.clone(),
            events: events.clone(),
        },
    );

    // Serve until ctrl-c
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down...");
    };
    api.run(shutdown).await.context("API server failed")?;

    ticker.stop();
    if let Err(e) = ticker_task.await {
        warn!("Urgency ticker ended abnormally: {}", e);
    }

    // Flush any live recording before exit
    match capture.stop_any().await {
        Ok(Some(teardown)) => info!(
            "Capture session {} closed, recording: {:?}",
            teardown.session_id,
            teardown.artifact.map(|a| a.path)
        ),
        Ok(None) => {}
        Err(e) => error!("Failed to close capture session: {}", e),
    }

    events
        .system(
            EventType::SystemShutdown,
            serde_json::json!({"reason": "Normal shutdown"}),
        )
        .await;

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
