use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use klinik_bulk::infrastructure::AppState;
use klinik_bulk::services::run_worker;
use klinik_bulk::{config, db, seed, server};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "klinik_bulk=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    // Initialize database
    let db = match db::init_db(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    if config.seed_demo {
        tracing::info!("Seeding demo data...");
        if let Err(e) = seed::seed_demo_data(&db).await {
            tracing::error!("Failed to seed data: {}", e);
        } else {
            tracing::info!("Demo data seeded successfully.");
        }
    }

    let state = AppState::new(db, &config);
    let shutdown = CancellationToken::new();

    // Start bulk operation worker
    let worker = tokio::spawn(run_worker(
        Arc::clone(&state.bulk_service),
        config.worker_poll_interval,
        shutdown.clone(),
    ));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        signal_token.cancel();
    });

    let Some(port) = server::find_available_port(config.port) else {
        tracing::error!("Failed to find available port near {}", config.port);
        std::process::exit(1);
    };
    if port != config.port {
        tracing::warn!(
            "Preferred port {} was not available, using port {} instead",
            config.port,
            port
        );
    }

    let app = server::build_router(state, &config.cors_allowed_origins);
    if let Err(e) = server::serve(app, port, shutdown.clone()).await {
        tracing::error!("{}", e);
        shutdown.cancel();
    }

    if let Err(e) = worker.await {
        tracing::error!("Bulk worker task failed: {}", e);
    }
}
