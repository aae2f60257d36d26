//! Application entry point for the `greenfield-advisor` service.
//!
//! Startup sequence:
//! - Loading `.env`, then initializing structured logging/tracing
//! - Loading configuration from environment variables
//! - Training the statistical models from the historical dataset, if any
//! - Spawning the analyzer and alert aggregator on the in-process bus
//! - Starting the optional dataset replay
//! - Binding the Axum HTTP ingress and serving until Ctrl-C
//!
//! # Environment Variables
//! See [`greenfield_advisor::config::load_from_env`] for service settings.
//! - `ADVISOR_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `ADVISOR_SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use greenfield_advisor::alerts::AlertAggregator;
use greenfield_advisor::analyzer::Analyzer;
use greenfield_advisor::bus::{MessageBus, SENSOR_DATA, SYSTEM_ADVICE, SYSTEM_SETTINGS};
use greenfield_advisor::features::Pipeline;
use greenfield_advisor::models::TargetSet;
use greenfield_advisor::notify::{LogSink, NotificationSink, WebhookSink};
use greenfield_advisor::routes::{self, AppState};
use greenfield_advisor::settings::SettingsStore;
use greenfield_advisor::source::{self, ReplaySource};
use greenfield_advisor::strategy::ModelStrategy;
use greenfield_advisor::{config, dataset, training};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let settings = Arc::new(SettingsStore::default());
    let pipeline = Pipeline::default();
    tracing::debug!(stages = ?pipeline.stage_names(), "Feature pipeline ready");

    let models = match &cfg.training_data_path {
        Some(path) => match dataset::load_jsonl(path) {
            Ok(ds) => {
                let (models, report) =
                    training::train_models(&pipeline, &ds.readings, &settings.get().thresholds);
                tracing::info!(
                    rows = report.rows,
                    dropped = report.dropped.total(),
                    "Startup training finished"
                );
                models
            }
            Err(e) => {
                tracing::error!("Training skipped, serving rules only: {:#}", e);
                TargetSet::from_fn(ModelStrategy::new)
            }
        },
        None => {
            tracing::warn!("TRAINING_DATA_PATH not set, serving rules only");
            TargetSet::from_fn(ModelStrategy::new)
        }
    };

    let analyzer = Analyzer::new(Arc::clone(&settings), pipeline, models);
    let models_trained = Arc::new(analyzer.trained_targets());

    let sink: Arc<dyn NotificationSink> = match &cfg.notify_webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.clone())?),
        None => Arc::new(LogSink),
    };

    // Subscribe before any producer starts so nothing is missed.
    let bus = MessageBus::new();
    let inbound = bus.subscribe(&[SENSOR_DATA, SYSTEM_SETTINGS]);
    let advice = bus.subscribe(&[SYSTEM_ADVICE]);

    tokio::spawn(analyzer.run(inbound, bus.clone(), cfg.bus_poll));
    tokio::spawn(AlertAggregator::new().run(advice, sink, cfg.bus_poll));

    if let Some(path) = &cfg.replay_data_path {
        let replay = ReplaySource::from_path(path, cfg.replay_interval)
            .context("Failed to prepare dataset replay")?;
        tokio::spawn(source::forward(replay, bus.clone()));
    }

    let app = routes::router(AppState {
        bus,
        settings,
        models_trained,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down");
    Ok(())
}

// ---

async fn shutdown_signal() {
    // ---
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
        Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
    }
}

/// Initialize the global tracing subscriber for structured logging.
///
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `ADVISOR_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level from `RUST_LOG`, else `ADVISOR_LOG_LEVEL`
///
/// Call once at startup, before any logging macros run.
fn init_tracing() {
    // ---
    let span_events = match env::var("ADVISOR_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("ADVISOR_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
