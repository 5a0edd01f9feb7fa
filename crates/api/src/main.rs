//! API server entry point.

use std::sync::Arc;
use std::time::Duration;

use api::config::Config;
use api::{AppState, Backends};
use domain::FreightQuoter;
use fulfillment::{
    EmailClientConfig, HttpNotifier, HttpSupplierClient, InMemoryNotifier, InMemorySupplier,
    Notifier, RetryPolicy, SupplierApi, SupplierClientConfig,
};
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use sqlx::postgres::PgPoolOptions;
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

async fn connect_store(config: &Config) -> Arc<dyn OrderStore> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, orders are kept in memory");
        return Arc::new(InMemoryOrderStore::new());
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .expect("failed to connect to database");
    let store = PostgresOrderStore::new(pool);
    store
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("connected to PostgreSQL");
    Arc::new(store)
}

fn supplier_backends(config: &Config) -> (Arc<dyn SupplierApi>, Arc<dyn FreightQuoter>) {
    let settings = &config.supplier;
    match settings.base_url.clone() {
        Some(base_url) => {
            let client = HttpSupplierClient::new(SupplierClientConfig {
                base_url,
                access_token: settings.access_token.clone(),
                timeout: settings.timeout,
                requests_per_sec: settings.requests_per_sec,
                retry: RetryPolicy::default(),
            })
            .expect("failed to build supplier client");
            (Arc::new(client.clone()), Arc::new(client))
        }
        None => {
            tracing::warn!("SUPPLIER_API_BASE_URL not set, using the in-memory supplier");
            let supplier = InMemorySupplier::new();
            (Arc::new(supplier.clone()), Arc::new(supplier))
        }
    }
}

fn notifier_backend(config: &Config) -> Arc<dyn Notifier> {
    let settings = &config.email;
    match settings.base_url.clone() {
        Some(base_url) => Arc::new(
            HttpNotifier::new(EmailClientConfig {
                base_url,
                api_key: settings.api_key.clone(),
                from: settings.from.clone(),
                timeout: Duration::from_secs(10),
                retry: RetryPolicy::default(),
            })
            .expect("failed to build email client"),
        ),
        None => {
            tracing::warn!("EMAIL_API_BASE_URL not set, emails are not sent");
            Arc::new(InMemoryNotifier::new())
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration
    let config = Config::from_env().expect("invalid configuration");

    // 2. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if config.payment_webhook_secret.is_empty() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET not set, every webhook will be rejected");
    }

    // 4. Wire backends and application state
    let store = connect_store(&config).await;
    let (supplier, quoter) = supplier_backends(&config);
    let notifier = notifier_backend(&config);
    let state = AppState::new(
        &config,
        Backends {
            store,
            supplier,
            quoter,
            notifier,
        },
    );

    // 5. Build the application
    let app = api::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}
