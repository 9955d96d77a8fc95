//! Instance lifecycle, binds and metadata

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rpaas_models::{
    BindAppArgs, CreateArgs, Flavor, InstanceInfo, Metadata, Plan, PodStatus, ScaleArgs,
    ServiceInfoItem, UnbindAppArgs, UpdateArgs,
};
use tracing::info;

use super::binder::Bind;
use super::error::ApiResult;
use super::resolver::Target;

// ============================================================================
// Instances
// ============================================================================

pub async fn create(
    Target(manager): Target,
    Bind(args): Bind<CreateArgs>,
) -> ApiResult<StatusCode> {
    args.validate()?;
    let name = args.name.clone();
    manager.create_instance(args).await?;
    info!(instance = %name, "Instance created");
    Ok(StatusCode::CREATED)
}

pub async fn update(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(args): Bind<UpdateArgs>,
) -> ApiResult<StatusCode> {
    args.validate()?;
    manager.update_instance(&instance, args).await?;
    Ok(StatusCode::OK)
}

pub async fn remove(Target(manager): Target, Path(instance): Path<String>) -> ApiResult<StatusCode> {
    manager.delete_instance(&instance).await?;
    info!(instance = %instance, "Instance deleted");
    Ok(StatusCode::OK)
}

pub async fn plans(Target(manager): Target) -> ApiResult<Json<Vec<Plan>>> {
    Ok(Json(manager.get_plans().await?))
}

pub async fn flavors(Target(manager): Target) -> ApiResult<Json<Vec<Flavor>>> {
    Ok(Json(manager.get_flavors().await?))
}

/// Label/value pairs shown by the platform for `service-instance-info`
pub async fn service_info(
    Target(manager): Target,
    Path(instance): Path<String>,
) -> ApiResult<Json<Vec<ServiceInfoItem>>> {
    let rpaas = manager.get_instance(&instance).await?;
    let address = manager.get_instance_address(&instance).await?;
    let routes = manager.get_routes(&instance).await?;

    let mut items = vec![
        ServiceInfoItem {
            label: "Address".to_string(),
            value: if address.is_empty() {
                "pending".into()
            } else {
                address.into()
            },
        },
        ServiceInfoItem {
            label: "Instances".to_string(),
            value: rpaas.replicas.unwrap_or_default().into(),
        },
    ];
    if !routes.is_empty() {
        let paths: Vec<String> = routes
            .iter()
            .map(|r| match (&r.destination, &r.content) {
                (Some(destination), _) => format!("{} => {}", r.path, destination),
                _ => format!("{} => <custom content>", r.path),
            })
            .collect();
        items.push(ServiceInfoItem {
            label: "Routes".to_string(),
            value: paths.join("\n").into(),
        });
    }
    Ok(Json(items))
}

pub async fn info(
    Target(manager): Target,
    Path(instance): Path<String>,
) -> ApiResult<Json<InstanceInfo>> {
    Ok(Json(manager.get_instance_info(&instance).await?))
}

pub async fn status(
    Target(manager): Target,
    Path(instance): Path<String>,
) -> ApiResult<Json<Vec<PodStatus>>> {
    Ok(Json(manager.get_instance_status(&instance).await?))
}

// ============================================================================
// Scale and lifecycle
// ============================================================================

pub async fn scale(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(args): Bind<ScaleArgs>,
) -> ApiResult<StatusCode> {
    args.validate()?;
    manager.scale(&instance, args.quantity).await?;
    info!(instance = %instance, replicas = args.quantity, "Instance scaled");
    Ok(StatusCode::CREATED)
}

pub async fn start(Target(manager): Target, Path(instance): Path<String>) -> ApiResult<StatusCode> {
    manager.start(&instance).await?;
    Ok(StatusCode::OK)
}

pub async fn stop(Target(manager): Target, Path(instance): Path<String>) -> ApiResult<StatusCode> {
    manager.stop(&instance).await?;
    Ok(StatusCode::OK)
}

pub async fn restart(Target(manager): Target, Path(instance): Path<String>) -> ApiResult<StatusCode> {
    manager.restart(&instance).await?;
    Ok(StatusCode::OK)
}

// ============================================================================
// Binds
// ============================================================================

pub async fn bind_app(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(args): Bind<BindAppArgs>,
) -> ApiResult<StatusCode> {
    args.validate()?;
    manager.bind_app(&instance, args).await?;
    Ok(StatusCode::CREATED)
}

pub async fn unbind_app(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(args): Bind<UnbindAppArgs>,
) -> ApiResult<StatusCode> {
    if args.app_name.is_empty() {
        return Err(rpaas_models::RpaasError::validation("app-name is required").into());
    }
    manager.unbind_app(&instance, &args.app_name).await?;
    Ok(StatusCode::OK)
}

/// Unit binds carry nothing the proxy needs; accepted for platform compatibility.
pub async fn bind_unit() -> impl IntoResponse {
    StatusCode::OK
}

pub async fn unbind_unit() -> impl IntoResponse {
    StatusCode::OK
}

// ============================================================================
// Metadata
// ============================================================================

pub async fn get_metadata(
    Target(manager): Target,
    Path(instance): Path<String>,
) -> ApiResult<Json<Metadata>> {
    Ok(Json(manager.get_metadata(&instance).await?))
}

pub async fn set_metadata(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(metadata): Bind<Metadata>,
) -> ApiResult<StatusCode> {
    metadata.validate()?;
    manager.set_metadata(&instance, metadata).await?;
    Ok(StatusCode::OK)
}

pub async fn unset_metadata(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(metadata): Bind<Metadata>,
) -> ApiResult<StatusCode> {
    metadata.validate()?;
    manager.unset_metadata(&instance, metadata).await?;
    Ok(StatusCode::OK)
}
