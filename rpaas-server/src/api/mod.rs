//! HTTP API: router, shared state and the resource endpoints
//!
//! Every handler is thin: bind, validate, call the [`Manager`] picked by the
//! target resolver, and let [`error::ApiError`] map failures.
//!
//! [`Manager`]: rpaas_operator::Manager

use std::sync::Arc;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::middleware;
use axum::routing::{any, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use rpaas_operator::ManagerFactory;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::config::Config;
use crate::streaming;

pub mod acl;
pub mod auth;
pub mod autoscale;
pub mod binder;
pub mod blocks;
pub mod certificates;
pub mod error;
pub mod files;
pub mod form;
pub mod instances;
pub mod metrics;
pub mod purge;
pub mod resolver;

/// Upper bound for any request body; extra files may be uploaded in bulk.
const MAX_BODY_SIZE: usize = 32 * 1024 * 1024;

/// Shared API state
#[derive(Clone)]
pub struct AppState {
    pub factory: Arc<dyn ManagerFactory>,
    pub config: Arc<Config>,
    /// Cancelled when the server starts shutting down
    pub shutdown: CancellationToken,
    /// Streaming sessions still running; drained on shutdown
    pub sessions: TaskTracker,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(factory: Arc<dyn ManagerFactory>, config: Config) -> Self {
        Self {
            factory,
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

fn make_span(req: &Request<Body>) -> Span {
    let cluster = resolver::header_value(req.headers(), resolver::CLUSTER_HEADER).unwrap_or("");
    let pool = resolver::header_value(req.headers(), resolver::POOL_HEADER).unwrap_or("");
    tracing::info_span!(
        "request",
        method = %req.method(),
        uri = %req.uri(),
        version = ?req.version(),
        cluster = %cluster,
        pool = %pool,
    )
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let resources = Router::new()
        // ====================================================================
        // Instances
        // ====================================================================
        .route("/resources", post(instances::create))
        .route("/resources/plans", get(instances::plans))
        .route("/resources/flavors", get(instances::flavors))
        .route(
            "/resources/:instance",
            get(instances::service_info)
                .put(instances::update)
                .delete(instances::remove),
        )
        .route("/resources/:instance/info", get(instances::info))
        .route("/resources/:instance/status", get(instances::status))
        .route("/resources/:instance/plans", get(instances::plans))
        .route("/resources/:instance/flavors", get(instances::flavors))
        .route("/resources/:instance/scale", post(instances::scale))
        .route("/resources/:instance/start", post(instances::start))
        .route("/resources/:instance/stop", post(instances::stop))
        .route("/resources/:instance/restart", post(instances::restart))
        .route(
            "/resources/:instance/bind-app",
            post(instances::bind_app).delete(instances::unbind_app),
        )
        .route(
            "/resources/:instance/bind",
            post(instances::bind_unit).delete(instances::unbind_unit),
        )
        .route(
            "/resources/:instance/metadata",
            get(instances::get_metadata)
                .post(instances::set_metadata)
                .delete(instances::unset_metadata),
        )
        // ====================================================================
        // Configuration
        // ====================================================================
        .route(
            "/resources/:instance/autoscale",
            get(autoscale::get)
                .post(autoscale::create)
                .patch(autoscale::update)
                .delete(autoscale::remove),
        )
        .route(
            "/resources/:instance/certificate",
            get(certificates::list)
                .post(certificates::update)
                .delete(certificates::remove),
        )
        .route(
            "/resources/:instance/certificate/:name",
            axum::routing::delete(certificates::remove_named),
        )
        .route(
            "/resources/:instance/block",
            get(blocks::list).post(blocks::update),
        )
        .route(
            "/resources/:instance/block/:block",
            axum::routing::delete(blocks::remove),
        )
        .route(
            "/resources/:instance/route",
            get(blocks::list_routes)
                .post(blocks::update_route)
                .delete(blocks::remove_route),
        )
        .route(
            "/resources/:instance/files",
            get(files::list).post(files::add).put(files::update),
        )
        .route(
            "/resources/:instance/files/*name",
            get(files::get).delete(files::remove),
        )
        .route(
            "/resources/:instance/acl",
            get(acl::list).post(acl::add).delete(acl::remove),
        )
        // ====================================================================
        // Cache purge
        // ====================================================================
        .route("/resources/:instance/purge", post(purge::purge))
        .route("/resources/:instance/purge/bulk", post(purge::purge_bulk))
        // ====================================================================
        // Streaming
        // ====================================================================
        .route("/resources/:instance/exec", any(streaming::handlers::exec))
        .route("/resources/:instance/debug", any(streaming::handlers::debug))
        .route("/resources/:instance/log", get(streaming::handlers::log))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::basic_auth,
        ));

    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics::render))
        .merge(resources)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(middleware::from_fn(metrics::track_requests))
        .layer(TraceLayer::new_for_http().make_span_with(make_span))
        .layer(CatchPanicLayer::custom(error::handle_panic))
        .with_state(state)
}

// ============================================================================
// Health Check
// ============================================================================

async fn healthcheck() -> &'static str {
    "OK"
}
