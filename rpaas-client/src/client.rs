//! Typed client for the rpaas HTTP API
//!
//! One method per endpoint. Bodies go out as JSON, except certificate and
//! extra-file uploads which are multipart like the server expects.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response};
use rpaas_models::{
    AllowedUpstream, Autoscale, BindAppArgs, BlockList, CertificateInfo, ConfigurationBlock,
    CreateArgs, DeleteRouteArgs, ExtraFile, Flavor, InstanceInfo, Metadata, Plan, PodStatus,
    PurgeArgs, PurgeBulkResult, Route, RouteList, ServiceInfoItem, UpdateArgs, UpdateBlockArgs,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::target::{encode_path, encode_segment, Addressing};

pub const CLUSTER_HEADER: &str = "x-tsuru-cluster-name";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RpaasClient {
    pub(crate) http: reqwest::Client,
    pub(crate) addressing: Addressing,
    pub(crate) cluster: Option<String>,
}

impl RpaasClient {
    pub fn new(addressing: Addressing) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            addressing,
            cluster: None,
        })
    }

    /// Sends every request to the named target cluster.
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into()).filter(|c| !c.is_empty());
        self
    }

    pub fn addressing(&self) -> &Addressing {
        &self.addressing
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    pub(crate) fn request(
        &self,
        method: Method,
        instance: Option<&str>,
        path: &str,
        query: Option<&str>,
    ) -> Result<RequestBuilder> {
        let url = self.addressing.url(instance, path, query)?;
        debug!(method = %method, url = %url, "rpaas request");
        let mut request = self.addressing.authorize(self.http.request(method, url));
        if let Some(cluster) = &self.cluster {
            request = request.header(CLUSTER_HEADER, cluster);
        }
        Ok(request)
    }

    pub(crate) async fn send(request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(ClientError::from_response(status.as_u16(), &body))
    }

    async fn call(
        &self,
        method: Method,
        instance: &str,
        path: &str,
        query: Option<&str>,
    ) -> Result<Response> {
        Self::send(self.request(method, Some(instance), path, query)?).await
    }

    async fn call_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        instance: &str,
        path: &str,
        body: &B,
    ) -> Result<Response> {
        Self::send(self.request(method, Some(instance), path, None)?.json(body)).await
    }

    async fn get<T: DeserializeOwned>(&self, instance: &str, path: &str) -> Result<T> {
        let response = self.call(Method::GET, instance, path, None).await?;
        Ok(response.json().await?)
    }
}

fn resource(instance: &str, suffix: &str) -> String {
    format!("/resources/{}{}", encode_segment(instance), suffix)
}

fn query_of(pairs: &[(&str, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

// ============================================================================
// Instances
// ============================================================================

impl RpaasClient {
    /// Direct addressing only: Tsuru creates instances through its own API.
    pub async fn create_instance(&self, args: &CreateArgs) -> Result<()> {
        let request = self.request(Method::POST, None, "/resources", None)?.json(args);
        Self::send(request).await?;
        Ok(())
    }

    pub async fn update_instance(&self, instance: &str, args: &UpdateArgs) -> Result<()> {
        self.call_json(Method::PUT, instance, &resource(instance, ""), args)
            .await?;
        Ok(())
    }

    pub async fn delete_instance(&self, instance: &str) -> Result<()> {
        self.call(Method::DELETE, instance, &resource(instance, ""), None)
            .await?;
        Ok(())
    }

    /// Plans of `instance`, or of the whole service when `None`.
    pub async fn plans(&self, instance: Option<&str>) -> Result<Vec<Plan>> {
        self.catalog(instance, "/plans").await
    }

    pub async fn flavors(&self, instance: Option<&str>) -> Result<Vec<Flavor>> {
        self.catalog(instance, "/flavors").await
    }

    async fn catalog<T: DeserializeOwned>(&self, instance: Option<&str>, suffix: &str) -> Result<T> {
        let path = match instance {
            Some(instance) => resource(instance, suffix),
            None => format!("/resources{}", suffix),
        };
        let response = Self::send(self.request(Method::GET, instance, &path, None)?).await?;
        Ok(response.json().await?)
    }

    pub async fn service_info(&self, instance: &str) -> Result<Vec<ServiceInfoItem>> {
        self.get(instance, &resource(instance, "")).await
    }

    pub async fn info(&self, instance: &str) -> Result<InstanceInfo> {
        self.get(instance, &resource(instance, "/info")).await
    }

    pub async fn status(&self, instance: &str) -> Result<Vec<PodStatus>> {
        self.get(instance, &resource(instance, "/status")).await
    }

    pub async fn scale(&self, instance: &str, replicas: i32) -> Result<()> {
        let body = serde_json::json!({ "quantity": replicas });
        self.call_json(Method::POST, instance, &resource(instance, "/scale"), &body)
            .await?;
        Ok(())
    }

    pub async fn start(&self, instance: &str) -> Result<()> {
        self.lifecycle(instance, "/start").await
    }

    pub async fn stop(&self, instance: &str) -> Result<()> {
        self.lifecycle(instance, "/stop").await
    }

    pub async fn restart(&self, instance: &str) -> Result<()> {
        self.lifecycle(instance, "/restart").await
    }

    async fn lifecycle(&self, instance: &str, suffix: &str) -> Result<()> {
        self.call(Method::POST, instance, &resource(instance, suffix), None)
            .await?;
        Ok(())
    }

    pub async fn bind_app(&self, instance: &str, args: &BindAppArgs) -> Result<()> {
        self.call_json(Method::POST, instance, &resource(instance, "/bind-app"), args)
            .await?;
        Ok(())
    }

    pub async fn unbind_app(&self, instance: &str, app_name: &str) -> Result<()> {
        let body = serde_json::json!({ "app-name": app_name });
        self.call_json(Method::DELETE, instance, &resource(instance, "/bind-app"), &body)
            .await?;
        Ok(())
    }

    pub async fn get_metadata(&self, instance: &str) -> Result<Metadata> {
        self.get(instance, &resource(instance, "/metadata")).await
    }

    pub async fn set_metadata(&self, instance: &str, metadata: &Metadata) -> Result<()> {
        self.call_json(Method::POST, instance, &resource(instance, "/metadata"), metadata)
            .await?;
        Ok(())
    }

    pub async fn unset_metadata(&self, instance: &str, metadata: &Metadata) -> Result<()> {
        self.call_json(Method::DELETE, instance, &resource(instance, "/metadata"), metadata)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Autoscale
// ============================================================================

impl RpaasClient {
    pub async fn get_autoscale(&self, instance: &str) -> Result<Autoscale> {
        self.get(instance, &resource(instance, "/autoscale")).await
    }

    pub async fn create_autoscale(&self, instance: &str, policy: &Autoscale) -> Result<()> {
        self.call_json(Method::POST, instance, &resource(instance, "/autoscale"), policy)
            .await?;
        Ok(())
    }

    pub async fn update_autoscale(&self, instance: &str, patch: &Autoscale) -> Result<()> {
        self.call_json(Method::PATCH, instance, &resource(instance, "/autoscale"), patch)
            .await?;
        Ok(())
    }

    pub async fn remove_autoscale(&self, instance: &str) -> Result<()> {
        self.call(Method::DELETE, instance, &resource(instance, "/autoscale"), None)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Certificates, blocks and routes
// ============================================================================

impl RpaasClient {
    pub async fn list_certificates(&self, instance: &str) -> Result<Vec<CertificateInfo>> {
        self.get(instance, &resource(instance, "/certificate")).await
    }

    /// Uploads a PEM pair. An empty `name` stores it as the default certificate.
    pub async fn update_certificate(
        &self,
        instance: &str,
        name: &str,
        certificate_pem: &str,
        key_pem: &str,
    ) -> Result<()> {
        let mut form = Form::new()
            .part("cert", Part::text(certificate_pem.to_string()).file_name("cert.pem"))
            .part("key", Part::text(key_pem.to_string()).file_name("key.pem"));
        if !name.is_empty() {
            form = form.text("name", name.to_string());
        }
        let path = resource(instance, "/certificate");
        Self::send(self.request(Method::POST, Some(instance), &path, None)?.multipart(form)).await?;
        Ok(())
    }

    pub async fn delete_certificate(&self, instance: &str, name: &str) -> Result<()> {
        let path = match name {
            "" => resource(instance, "/certificate"),
            name => resource(instance, &format!("/certificate/{}", encode_segment(name))),
        };
        self.call(Method::DELETE, instance, &path, None).await?;
        Ok(())
    }

    pub async fn list_blocks(&self, instance: &str) -> Result<Vec<ConfigurationBlock>> {
        let list: BlockList = self.get(instance, &resource(instance, "/block")).await?;
        Ok(list.blocks)
    }

    pub async fn update_block(&self, instance: &str, args: &UpdateBlockArgs) -> Result<()> {
        self.call_json(Method::POST, instance, &resource(instance, "/block"), args)
            .await?;
        Ok(())
    }

    pub async fn delete_block(
        &self,
        instance: &str,
        block: &str,
        server_name: Option<&str>,
    ) -> Result<()> {
        let path = resource(instance, &format!("/block/{}", encode_segment(block)));
        let query = server_name.map(|name| query_of(&[("server_name", name.to_string())]));
        self.call(Method::DELETE, instance, &path, query.as_deref())
            .await?;
        Ok(())
    }

    pub async fn list_routes(&self, instance: &str) -> Result<Vec<Route>> {
        let list: RouteList = self.get(instance, &resource(instance, "/route")).await?;
        Ok(list.paths)
    }

    pub async fn update_route(&self, instance: &str, route: &Route) -> Result<()> {
        self.call_json(Method::POST, instance, &resource(instance, "/route"), route)
            .await?;
        Ok(())
    }

    pub async fn delete_route(&self, instance: &str, args: &DeleteRouteArgs) -> Result<()> {
        self.call_json(Method::DELETE, instance, &resource(instance, "/route"), args)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Extra files and ACL
// ============================================================================

impl RpaasClient {
    pub async fn list_extra_files(&self, instance: &str) -> Result<Vec<String>> {
        self.get(instance, &resource(instance, "/files")).await
    }

    pub async fn get_extra_file(&self, instance: &str, name: &str) -> Result<ExtraFile> {
        let path = resource(instance, &format!("/files/{}", encode_path(name)));
        self.get(instance, &path).await
    }

    pub async fn add_extra_files(&self, instance: &str, files: &[ExtraFile]) -> Result<()> {
        self.upload_files(Method::POST, instance, files).await
    }

    pub async fn update_extra_files(&self, instance: &str, files: &[ExtraFile]) -> Result<()> {
        self.upload_files(Method::PUT, instance, files).await
    }

    async fn upload_files(&self, method: Method, instance: &str, files: &[ExtraFile]) -> Result<()> {
        let form = files.iter().fold(Form::new(), |form, file| {
            form.part(
                "files",
                Part::bytes(file.content.clone()).file_name(file.name.clone()),
            )
        });
        let path = resource(instance, "/files");
        Self::send(self.request(method, Some(instance), &path, None)?.multipart(form)).await?;
        Ok(())
    }

    pub async fn delete_extra_file(&self, instance: &str, name: &str) -> Result<()> {
        let path = resource(instance, &format!("/files/{}", encode_path(name)));
        self.call(Method::DELETE, instance, &path, None).await?;
        Ok(())
    }

    pub async fn list_acl(&self, instance: &str) -> Result<Vec<AllowedUpstream>> {
        self.get(instance, &resource(instance, "/acl")).await
    }

    pub async fn add_acl(&self, instance: &str, upstream: &AllowedUpstream) -> Result<()> {
        self.call_json(Method::POST, instance, &resource(instance, "/acl"), upstream)
            .await?;
        Ok(())
    }

    pub async fn remove_acl(&self, instance: &str, upstream: &AllowedUpstream) -> Result<()> {
        let mut pairs = vec![("host", upstream.host.clone())];
        if let Some(port) = upstream.port {
            pairs.push(("port", port.to_string()));
        }
        let query = query_of(&pairs);
        self.call(Method::DELETE, instance, &resource(instance, "/acl"), Some(&query))
            .await?;
        Ok(())
    }
}

// ============================================================================
// Cache purge
// ============================================================================

impl RpaasClient {
    /// Purges one path and returns the server's summary line.
    pub async fn purge(&self, instance: &str, args: &PurgeArgs) -> Result<String> {
        let response = self
            .call_json(Method::POST, instance, &resource(instance, "/purge"), args)
            .await?;
        Ok(response.text().await?.trim().to_string())
    }

    /// Purges every item. A partial failure still yields the per-item
    /// results, so callers check [`PurgeBulkResult::is_error`].
    pub async fn purge_bulk(&self, instance: &str, items: &[PurgeArgs]) -> Result<Vec<PurgeBulkResult>> {
        let path = resource(instance, "/purge/bulk");
        let response = self
            .request(Method::POST, Some(instance), &path, None)?
            .json(items)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status.is_success() {
            return Ok(serde_json::from_slice(&body)?);
        }
        // a 500 carrying the result array is a partial failure, not an error
        if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR {
            if let Ok(results) = serde_json::from_slice::<Vec<PurgeBulkResult>>(&body) {
                return Ok(results);
            }
        }
        Err(ClientError::from_response(status.as_u16(), &body))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::target::Credentials;
    use axum::body::Bytes;
    use axum::extract::{Multipart, Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use rpaas_models::ErrorKind;
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    /// Serves `router` on an ephemeral port and returns its base URL.
    pub(crate) async fn spawn(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    pub(crate) fn direct(base: &str) -> RpaasClient {
        let credentials = Credentials {
            username: "admin".into(),
            password: "secret".into(),
        };
        RpaasClient::new(Addressing::direct(base, Some(credentials)).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn sends_basic_auth_and_decodes_json() {
        let router = Router::new().route(
            "/resources/my-nginx/block",
            get(|headers: HeaderMap| async move {
                assert_eq!(headers["authorization"], "Basic YWRtaW46c2VjcmV0");
                Json(serde_json::json!({
                    "blocks": [{"block_name": "http", "content": "gzip on;"}]
                }))
            }),
        );
        let client = direct(&spawn(router).await);

        let blocks = client.list_blocks("my-nginx").await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].content, "gzip on;");
    }

    #[tokio::test]
    async fn error_bodies_become_typed_errors() {
        let router = Router::new().route(
            "/resources/missing/info",
            get(|| async {
                (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({"Msg": "rpaas instance \"missing\" not found"})),
                )
            }),
        );
        let client = direct(&spawn(router).await);

        let err = client.info("missing").await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
        assert_eq!(err.to_string(), "rpaas instance \"missing\" not found");
    }

    #[tokio::test]
    async fn goes_through_the_tsuru_proxy() {
        let router = Router::new().route(
            "/services/rpaasv2/proxy/my-nginx",
            post(
                |headers: HeaderMap, Query(q): Query<HashMap<String, String>>, body: Bytes| async move {
                    assert_eq!(headers["authorization"], "Bearer t0k3n");
                    assert_eq!(headers[CLUSTER_HEADER], "prod");
                    assert_eq!(q["callback"], "/resources/my-nginx/scale");
                    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
                    assert_eq!(body["quantity"], 3);
                    StatusCode::CREATED
                },
            ),
        );
        let base = spawn(router).await;
        let client = RpaasClient::new(Addressing::tsuru(&base, "t0k3n", "rpaasv2").unwrap())
            .unwrap()
            .with_cluster("prod");

        client.scale("my-nginx", 3).await.unwrap();
    }

    #[tokio::test]
    async fn certificate_upload_is_multipart() {
        let router = Router::new().route(
            "/resources/my-nginx/certificate",
            post(|mut multipart: Multipart| async move {
                let mut seen = Vec::new();
                while let Some(field) = multipart.next_field().await.unwrap() {
                    let name = field.name().unwrap().to_string();
                    let text = field.text().await.unwrap();
                    seen.push((name, text));
                }
                assert_eq!(
                    seen,
                    vec![
                        ("cert".to_string(), "CERT".to_string()),
                        ("key".to_string(), "KEY".to_string()),
                        ("name".to_string(), "www".to_string()),
                    ]
                );
                StatusCode::OK
            }),
        );
        let client = direct(&spawn(router).await);
        client
            .update_certificate("my-nginx", "www", "CERT", "KEY")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn extra_files_are_uploaded_as_file_parts() {
        let router = Router::new().route(
            "/resources/my-nginx/files",
            post(|mut multipart: Multipart| async move {
                let mut names = Vec::new();
                while let Some(field) = multipart.next_field().await.unwrap() {
                    assert_eq!(field.name(), Some("files"));
                    names.push(field.file_name().unwrap().to_string());
                }
                assert_eq!(names, vec!["index.html", "www/robots.txt"]);
                StatusCode::CREATED
            }),
        );
        let client = direct(&spawn(router).await);
        let files = vec![
            ExtraFile {
                name: "index.html".into(),
                content: b"<h1>hi</h1>".to_vec(),
            },
            ExtraFile {
                name: "www/robots.txt".into(),
                content: b"User-agent: *".to_vec(),
            },
        ];
        client.add_extra_files("my-nginx", &files).await.unwrap();
    }

    #[tokio::test]
    async fn nested_file_names_keep_their_slashes() {
        let router = Router::new().route(
            "/resources/my-nginx/files/*name",
            delete(|Path(name): Path<String>| async move {
                assert_eq!(name.trim_start_matches('/'), "www/robots.txt");
                StatusCode::OK
            }),
        );
        let client = direct(&spawn(router).await);
        client
            .delete_extra_file("my-nginx", "www/robots.txt")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn acl_removal_uses_the_query_string() {
        let router = Router::new().route(
            "/resources/my-nginx/acl",
            delete(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q["host"], "10.0.0.1");
                assert_eq!(q["port"], "8080");
                StatusCode::OK
            }),
        );
        let client = direct(&spawn(router).await);
        let upstream = AllowedUpstream {
            host: "10.0.0.1".into(),
            port: Some(8080),
        };
        client.remove_acl("my-nginx", &upstream).await.unwrap();
    }

    #[tokio::test]
    async fn bulk_purge_returns_partial_results() {
        let router = Router::new().route(
            "/resources/my-nginx/purge/bulk",
            post(|Json(items): Json<Vec<PurgeArgs>>| async move {
                let results: Vec<PurgeBulkResult> = items
                    .iter()
                    .map(|item| match item.path.as_str() {
                        "/bad" => PurgeBulkResult::failed(&item.path, "replica 10.0.0.2 timed out"),
                        path => PurgeBulkResult::purged(path, 2),
                    })
                    .collect();
                (StatusCode::INTERNAL_SERVER_ERROR, Json(results)).into_response()
            }),
        );
        let client = direct(&spawn(router).await);
        let items = vec![
            PurgeArgs {
                path: "/a".into(),
                ..Default::default()
            },
            PurgeArgs {
                path: "/bad".into(),
                ..Default::default()
            },
        ];

        let results = client.purge_bulk("my-nginx", &items).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].instances_purged, Some(2));
        assert!(results[1].is_error());
    }

    #[tokio::test]
    async fn bulk_purge_validation_errors_are_errors() {
        let router = Router::new().route(
            "/resources/my-nginx/purge/bulk",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"Msg": "at least one item is required"})),
                )
            }),
        );
        let client = direct(&spawn(router).await);
        let err = client.purge_bulk("my-nginx", &[]).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn purge_returns_the_summary() {
        let router = Router::new().route(
            "/resources/my-nginx/purge",
            post(|| async { "Object purged on 3 servers" }),
        );
        let client = direct(&spawn(router).await);
        let args = PurgeArgs {
            path: "/index.html".into(),
            ..Default::default()
        };
        assert_eq!(
            client.purge("my-nginx", &args).await.unwrap(),
            "Object purged on 3 servers"
        );
    }
}
