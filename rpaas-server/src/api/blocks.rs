//! NGINX configuration blocks and routes

use axum::extract::Path;
use axum::http::StatusCode;
use axum::Json;
use rpaas_models::{
    BlockContext, BlockList, DeleteBlockArgs, DeleteRouteArgs, Route, RouteList, UpdateBlockArgs,
};
use tracing::info;

use super::binder::Bind;
use super::error::ApiResult;
use super::resolver::Target;

// ============================================================================
// Blocks
// ============================================================================

pub async fn list(Target(manager): Target, Path(instance): Path<String>) -> ApiResult<Json<BlockList>> {
    let blocks = manager.list_blocks(&instance).await?;
    Ok(Json(BlockList { blocks }))
}

pub async fn update(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(args): Bind<UpdateBlockArgs>,
) -> ApiResult<StatusCode> {
    let block = args.into_block()?;
    let context = block.context;
    manager.update_block(&instance, block).await?;
    info!(instance = %instance, block = %context, "Block updated");
    Ok(StatusCode::OK)
}

pub async fn remove(
    Target(manager): Target,
    Path((instance, block)): Path<(String, String)>,
    Bind(args): Bind<DeleteBlockArgs>,
) -> ApiResult<StatusCode> {
    let context = block.parse::<BlockContext>()?;
    let server_name = args.server_name(context)?;
    manager.delete_block(&instance, context, server_name).await?;
    Ok(StatusCode::OK)
}

// ============================================================================
// Routes
// ============================================================================

pub async fn list_routes(
    Target(manager): Target,
    Path(instance): Path<String>,
) -> ApiResult<Json<RouteList>> {
    let paths = manager.get_routes(&instance).await?;
    Ok(Json(RouteList { paths }))
}

pub async fn update_route(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(route): Bind<Route>,
) -> ApiResult<StatusCode> {
    let route = route.normalized();
    route.validate()?;
    manager.update_route(&instance, route).await?;
    Ok(StatusCode::CREATED)
}

/// `path` travels in the body even on DELETE; older clients send it that way.
pub async fn remove_route(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(args): Bind<DeleteRouteArgs>,
) -> ApiResult<StatusCode> {
    args.validate()?;
    manager
        .delete_route(&instance, args.server_name(), &args.path)
        .await?;
    Ok(StatusCode::OK)
}
