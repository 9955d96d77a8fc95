//! Picks the [`Manager`] a request targets

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use rpaas_operator::Manager;

use super::error::ApiError;
use super::AppState;

pub const CLUSTER_HEADER: &str = "x-tsuru-cluster-name";
pub const POOL_HEADER: &str = "x-tsuru-pool-name";

pub fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Manager resolved from `X-Tsuru-Cluster-Name`, or the default one.
pub struct Target(pub Arc<dyn Manager>);

#[async_trait]
impl FromRequestParts<AppState> for Target {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let cluster = header_value(&parts.headers, CLUSTER_HEADER);
        let manager = state.factory.manager(cluster).await?;
        Ok(Target(manager))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::state_with;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;
    use rpaas_operator::fake::FakeManager;
    use rpaas_operator::{ClusterConfig, ClusterFactory};
    use rpaas_operator::kubernetes::KubernetesSettings;
    use rpaas_operator::purge::PurgeSettings;

    #[tokio::test]
    async fn static_factory_ignores_header() {
        let state = state_with(Arc::new(FakeManager::new().with_instance("x")));
        let (mut parts, _) = Request::builder()
            .header(CLUSTER_HEADER, "anything")
            .body(())
            .unwrap()
            .into_parts();
        let Target(manager) = Target::from_request_parts(&mut parts, &state).await.unwrap();
        assert!(manager.get_instance("x").await.is_ok());
    }

    #[tokio::test]
    async fn unknown_cluster_is_bad_gateway() {
        let mut state = state_with(Arc::new(FakeManager::new()));
        state.factory = Arc::new(ClusterFactory::new(
            vec![ClusterConfig {
                name: "east".to_string(),
                default: true,
                ..Default::default()
            }],
            KubernetesSettings::default(),
            PurgeSettings::default(),
        ));
        let (mut parts, _) = Request::builder()
            .header(CLUSTER_HEADER, "west")
            .body(())
            .unwrap()
            .into_parts();
        let err = Target::from_request_parts(&mut parts, &state)
            .await
            .err()
            .unwrap();
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn blank_headers_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(CLUSTER_HEADER, "  ".parse().unwrap());
        assert_eq!(header_value(&headers, CLUSTER_HEADER), None);
    }
}
