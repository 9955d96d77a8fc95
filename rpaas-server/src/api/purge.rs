//! Cache purge endpoints
//!
//! The single endpoint delegates to the manager's fan-out; the bulk one runs
//! it once per item through [`rpaas_operator::purge::purge_bulk`].

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rpaas_models::purge::purged_message;
use rpaas_models::{PurgeArgs, RpaasError};
use rpaas_operator::purge::purge_bulk as run_bulk;
use tracing::{info, warn};

use super::binder::Bind;
use super::error::ApiResult;
use super::resolver::Target;
use super::AppState;

pub async fn purge(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(args): Bind<PurgeArgs>,
) -> ApiResult<String> {
    args.validate()?;
    let path = args.path.clone();
    let count = manager.purge_cache(&instance, args).await?;
    info!(instance = %instance, path = %path, count, "Cache purged");
    Ok(purged_message(count))
}

/// Answers 200 when every item succeeded and 500 otherwise. Partial results
/// are always in the body, in request order.
pub async fn purge_bulk(
    State(state): State<AppState>,
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(items): Bind<Vec<PurgeArgs>>,
) -> ApiResult<Response> {
    if items.is_empty() {
        return Err(RpaasError::validation("at least one purge item is required").into());
    }
    let total = items.len();
    let results = run_bulk(&*manager, &instance, items, state.config.purge_bulk_concurrency).await;

    let failed = results.iter().filter(|r| r.is_error()).count();
    if failed > 0 {
        warn!(instance = %instance, failed, total, "Bulk purge finished with errors");
        return Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(results)).into_response());
    }
    info!(instance = %instance, total, "Bulk purge finished");
    Ok(Json(results).into_response())
}
