//! # Server Configuration
//!
//! Router, shared state and OpenAPI document for the sync service.

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::engine::{ChangeDetector, DryRunRecorder, PricingSyncEngine};
use crate::handlers;
use crate::queue::SyncQueue;
use crate::repositories::{
    CatalogStore, ChangeLogRepository, DryRunRepository, ItemSyncStatusRepository,
    JobLogRepository, SyncJobRepository,
};
use crate::telemetry::trace_id_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub queue: Arc<dyn SyncQueue>,
    pub pricing: PricingSyncEngine,
    pub change_detector: ChangeDetector,
    pub dry_runs: DryRunRecorder,
    pub jobs: SyncJobRepository,
    pub job_logs: JobLogRepository,
    pub item_statuses: ItemSyncStatusRepository,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        queue: Arc<dyn SyncQueue>,
        catalog: Arc<dyn CatalogStore>,
    ) -> Self {
        let item_statuses = ItemSyncStatusRepository::new(db.clone());
        let change_detector = ChangeDetector::new(
            ChangeLogRepository::new(db.clone()),
            item_statuses.clone(),
            queue.clone(),
            config.dispatcher.default_max_retries,
        );

        Self {
            pricing: PricingSyncEngine::new(db.clone(), catalog),
            change_detector,
            dry_runs: DryRunRecorder::new(DryRunRepository::new(db.clone())),
            jobs: SyncJobRepository::new(db.clone()),
            job_logs: JobLogRepository::new(db.clone()),
            item_statuses,
            queue,
            config,
            db,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let webhook_limit = state.config.webhook_max_body_kb.saturating_mul(1024);

    let operator_routes = Router::new()
        .route("/sync/jobs", get(handlers::jobs::list_jobs))
        .route("/sync/jobs/{id}", get(handlers::jobs::get_job))
        .route("/sync/jobs/{id}/logs", get(handlers::jobs::get_job_logs))
        .route("/sync/changes", post(handlers::queue::record_change))
        .route("/sync/queue/stats", get(handlers::queue::queue_stats))
        .route("/sync/queue/{id}", delete(handlers::queue::cancel_entry))
        .route(
            "/sync/items/{item_id}/status",
            get(handlers::items::item_status),
        )
        .route(
            "/sync/dry-runs",
            get(handlers::dry_runs::list_dry_runs).delete(handlers::dry_runs::delete_dry_runs),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let webhook_routes = Router::new()
        .route("/sync/webhook", post(handlers::webhook::pricing_webhook))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(webhook_limit));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(operator_routes)
        .merge(webhook_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id_middleware))
}

/// Serves HTTP until `shutdown` fires.
pub async fn run_server(
    config: Arc<AppConfig>,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_app(state);

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

struct BearerAuthAddon;

impl Modify for BearerAuthAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::webhook::pricing_webhook,
        crate::handlers::jobs::list_jobs,
        crate::handlers::jobs::get_job,
        crate::handlers::jobs::get_job_logs,
        crate::handlers::queue::record_change,
        crate::handlers::queue::queue_stats,
        crate::handlers::queue::cancel_entry,
        crate::handlers::items::item_status,
        crate::handlers::dry_runs::list_dry_runs,
        crate::handlers::dry_runs::delete_dry_runs,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::webhook::WebhookEnvelope,
            crate::handlers::webhook::WebhookItemData,
            crate::handlers::webhook::WebhookResponse,
            crate::handlers::webhook::WebhookResult,
            crate::handlers::jobs::JobInfo,
            crate::handlers::jobs::JobItemInfo,
            crate::handlers::jobs::JobsResponse,
            crate::handlers::jobs::JobDetailResponse,
            crate::handlers::jobs::JobLogInfo,
            crate::handlers::queue::EnqueueResponse,
            crate::handlers::items::ItemStatusResponse,
            crate::handlers::dry_runs::DryRunInfo,
            crate::handlers::dry_runs::DeleteDryRunsResponse,
            crate::engine::ChangeNotification,
            crate::queue::QueueItem,
            crate::queue::QueueStats,
            crate::models::types::QueueEventData,
            crate::models::types::PricingSyncRequest,
            crate::models::types::RawPricingFields,
            crate::models::types::PricingSnapshot,
            crate::models::types::Priority,
            crate::models::types::QueueStatus,
            crate::models::types::JobStatus,
            crate::models::types::JobType,
        )
    ),
    modifiers(&BearerAuthAddon),
    info(
        title = "OPMS Sync API",
        description = "Synchronization between the OPMS catalog and NetSuite",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
