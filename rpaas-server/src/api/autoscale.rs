use axum::extract::Path;
use axum::http::StatusCode;
use axum::Json;
use rpaas_models::{Autoscale, RpaasError};

use super::binder::Bind;
use super::error::ApiResult;
use super::resolver::Target;

pub async fn get(Target(manager): Target, Path(instance): Path<String>) -> ApiResult<Json<Autoscale>> {
    Ok(Json(manager.get_autoscale(&instance).await?))
}

pub async fn create(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(policy): Bind<Autoscale>,
) -> ApiResult<StatusCode> {
    policy.validate()?;
    manager.create_autoscale(&instance, policy).await?;
    Ok(StatusCode::CREATED)
}

/// Merges the given fields into the current policy.
pub async fn update(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(patch): Bind<Autoscale>,
) -> ApiResult<StatusCode> {
    if patch.is_empty() {
        return Err(RpaasError::validation("autoscale patch cannot be empty").into());
    }
    manager.update_autoscale(&instance, patch).await?;
    Ok(StatusCode::CREATED)
}

pub async fn remove(Target(manager): Target, Path(instance): Path<String>) -> ApiResult<StatusCode> {
    manager.delete_autoscale(&instance).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::test_support::*;
    use axum::http::StatusCode;
    use rpaas_models::Autoscale;
    use rpaas_operator::fake::FakeManager;
    use serde_json::json;

    #[tokio::test]
    async fn create_without_max_is_rejected() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (status, _, body) = send(
            app(manager.clone()),
            form("POST", "/resources/my-instance/autoscale", "min=10"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_of(&body), json!({ "Msg": "max replicas is required" }));
        assert!(!manager.was_called("create_autoscale"));
    }

    #[tokio::test]
    async fn create_then_patch() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (status, _, _) = send(
            app(manager.clone()),
            form("POST", "/resources/my-instance/autoscale", "min=2&max=5&cpu=70"),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _, _) = send(
            app(manager.clone()),
            json("PATCH", "/resources/my-instance/autoscale", json!({ "maxReplicas": 8 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(
            manager.autoscale_of("my-instance"),
            Some(Autoscale {
                min_replicas: Some(2),
                max_replicas: Some(8),
                cpu: Some(70),
                ..Default::default()
            })
        );

        let (status, _, body) =
            send(app(manager), empty("GET", "/resources/my-instance/autoscale")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json_of(&body),
            json!({ "minReplicas": 2, "maxReplicas": 8, "cpu": 70 })
        );
    }

    #[tokio::test]
    async fn missing_policy_is_404() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (status, _, body) =
            send(app(manager), empty("GET", "/resources/my-instance/autoscale")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json_of(&body), json!({ "Msg": "autoscale not found" }));
    }
}
