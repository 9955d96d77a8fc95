//! Access control list (allowed upstreams)

use axum::extract::Path;
use axum::http::StatusCode;
use axum::Json;
use rpaas_models::AllowedUpstream;

use super::binder::Bind;
use super::error::ApiResult;
use super::resolver::Target;

pub async fn list(
    Target(manager): Target,
    Path(instance): Path<String>,
) -> ApiResult<Json<Vec<AllowedUpstream>>> {
    Ok(Json(manager.get_access_control_list(&instance).await?))
}

pub async fn add(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(upstream): Bind<AllowedUpstream>,
) -> ApiResult<StatusCode> {
    let upstream = upstream.normalized();
    upstream.validate()?;
    manager.add_allowed_upstream(&instance, upstream).await?;
    Ok(StatusCode::CREATED)
}

/// `host` and `port` usually come in the query string.
pub async fn remove(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(upstream): Bind<AllowedUpstream>,
) -> ApiResult<StatusCode> {
    let upstream = upstream.normalized();
    upstream.validate()?;
    manager.delete_allowed_upstream(&instance, upstream).await?;
    Ok(StatusCode::OK)
}
