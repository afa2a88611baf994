//! Greenhouse Service - acquisition engine behind an HTTP API.
//!
//! Run with: `cargo run -p greenhouse-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use greenhouse_core::{Engine, TelemetrySink, spawn_supervisor};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use greenhouse_service::{AppState, Collector, Config, InfluxSink, api, ws};

/// Greenhouse Service - sensor acquisition, device control and HTTP REST API.
#[derive(Parser, Debug)]
#[command(name = "greenhouse-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Do not look for a controller; simulate every value.
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("greenhouse_service=info".parse()?)
                .add_directive("greenhouse_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!("{}; using defaults", e);
            Config::default()
        }),
    };
    config.apply_env();
    if let Err(e) = config.validate() {
        warn!("{}\nContinuing with the default configuration", e);
        config = Config::default();
        config.apply_env();
    }

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if args.simulate {
        config.serial.enabled = false;
    }

    let provider = Arc::new(config.serial_provider());
    let options = config.engine_options();

    // A sink that cannot be built is reported once; the engine runs without it.
    let (engine, storage) = if config.influxdb.enabled {
        match InfluxSink::new(&config.influxdb) {
            Ok((sink, writer)) => {
                let stats = sink.stats();
                let sink: Arc<dyn TelemetrySink> = Arc::new(sink);
                let engine = Engine::with_sink(provider, options, sink);
                writer.spawn(engine.shutdown_token());
                (engine, Some(stats))
            }
            Err(e) => {
                warn!("InfluxDB sink disabled: {}", e);
                (Engine::new(provider, options), None)
            }
        }
    } else {
        (Engine::new(provider, options), None)
    };

    if engine.attempt_connect().await {
        info!("Controller attached; serving hardware readings");
    } else {
        info!("No controller attached; serving simulated readings");
    }

    if config.reconnect.auto {
        spawn_supervisor(engine.clone(), config.reconnect.options());
    }

    let bind = config.server.bind.clone();
    let state = AppState::new(engine.clone(), config, storage);
    Collector::new(Arc::clone(&state)).start();

    let app = Router::new()
        .merge(api::router())
        .merge(ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr: SocketAddr = bind.parse()?;
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
