//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use reservation_store::{
    ExpirySweeper, InMemoryReservationStore, PgReservationStore, ProductId, ReservationStore,
};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let registry = tracing_subscriber::registry().with(EnvFilter::new(&config.log_level));
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn open_store(config: &Config) -> (Arc<dyn ReservationStore>, &'static str) {
    match &config.database_url {
        Some(url) => {
            let store = PgReservationStore::connect(url, config.database_max_connections)
                .await
                .expect("failed to connect to PostgreSQL");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL reservation store");
            let store: Arc<dyn ReservationStore> = Arc::new(store);
            (store, "postgres")
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory reservation store");
            let memory = InMemoryReservationStore::new();
            for &(product_id, stock) in &config.seed_products {
                memory
                    .upsert_product(ProductId::new(product_id), stock, true)
                    .await;
            }
            tracing::info!(products = config.seed_products.len(), "seeded in-memory products");
            let store: Arc<dyn ReservationStore> = Arc::new(memory);
            (store, "memory")
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Open the reservation store and start the expiry sweeper
    let (store, backend) = open_store(&config).await;
    let sweeper = config
        .sweep_interval()
        .map(|period| ExpirySweeper::new(store.clone(), period).spawn());

    // 4. Build the application
    let state = api::create_state(store, config.reservation_ttl_minutes, backend);
    let app = api::create_app(state, metrics_handle);

    // 5. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }

    tracing::info!("server shut down gracefully");
}
