//! HTTP API server with observability for the fulfillment system.
//!
//! Exposes the payment webhook, the admin-triggered jobs and the storefront
//! checkout endpoints, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::FreightQuoter;
use fulfillment::{
    CheckoutService, InMemoryNotifier, InMemorySupplier, NotificationRelay, Notifier,
    PaymentEventProcessor, SupplierApi, SupplierDispatcher, TrackingReconciler,
};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, OrderStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::admin::AdminAuth;

/// External dependencies the pipeline runs against.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn OrderStore>,
    pub supplier: Arc<dyn SupplierApi>,
    pub quoter: Arc<dyn FreightQuoter>,
    pub notifier: Arc<dyn Notifier>,
}

impl Backends {
    /// In-memory store, supplier and notifier.
    pub fn in_memory(
        store: InMemoryOrderStore,
        supplier: InMemorySupplier,
        notifier: InMemoryNotifier,
    ) -> Self {
        Self {
            store: Arc::new(store),
            supplier: Arc::new(supplier.clone()),
            quoter: Arc::new(supplier),
            notifier: Arc::new(notifier),
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub supplier: Arc<dyn SupplierApi>,
    pub processor: PaymentEventProcessor,
    pub dispatcher: Arc<SupplierDispatcher>,
    pub relay: Arc<NotificationRelay>,
    pub reconciler: TrackingReconciler,
    pub checkout: CheckoutService,
    pub auth: AdminAuth,
}

impl AppState {
    /// Wires the pipeline components over `backends`.
    pub fn new(config: &Config, backends: Backends) -> Arc<Self> {
        let Backends {
            store,
            supplier,
            quoter,
            notifier,
        } = backends;

        let relay = Arc::new(NotificationRelay::new(
            store.clone(),
            notifier,
            config.site_url.clone(),
        ));
        let dispatcher = Arc::new(
            SupplierDispatcher::new(store.clone(), supplier.clone())
                .with_address_policy(config.address_policy),
        );
        let processor = PaymentEventProcessor::new(
            store.clone(),
            dispatcher.clone(),
            relay.clone(),
            config.payment_webhook_secret.clone(),
        );
        let reconciler = TrackingReconciler::new(store.clone(), supplier.clone(), relay.clone());
        let checkout = CheckoutService::new(store.clone(), quoter, config.shipping.clone());

        Arc::new(Self {
            store,
            supplier,
            processor,
            dispatcher,
            relay,
            reconciler,
            checkout,
            auth: AdminAuth {
                cron_secret: config.cron_secret.clone(),
                admin_api_token: config.admin_api_token.clone(),
            },
        })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/webhooks/payment", post(routes::webhooks::payment))
        .route("/checkout", post(routes::checkout::create))
        .route("/shipping/quote", post(routes::checkout::quote))
        .route("/orders/{id}", get(routes::orders::get))
        .route(
            "/admin/tracking/reconcile",
            get(routes::admin::reconcile).post(routes::admin::reconcile),
        )
        .route("/admin/orders/{id}/dispatch", post(routes::admin::dispatch))
        .route(
            "/admin/notifications/flush",
            post(routes::admin::flush_notifications),
        )
        .route("/admin/supplier/stock/{pid}", get(routes::admin::stock))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state on in-memory backends.
pub fn create_default_state(config: &Config) -> Arc<AppState> {
    AppState::new(
        config,
        Backends::in_memory(
            InMemoryOrderStore::new(),
            InMemorySupplier::new(),
            InMemoryNotifier::new(),
        ),
    )
}
