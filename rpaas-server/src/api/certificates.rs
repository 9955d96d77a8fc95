//! TLS certificates
//!
//! Uploads are parsed and matched against their private key here, so a bad
//! pair is a 400 before the manager is ever called.

use axum::extract::Path;
use axum::http::StatusCode;
use axum::Json;
use rpaas_models::certificate::{certificate_name_or_default, validate_certificate_name};
use rpaas_models::{CertificateInfo, KeyPair, RpaasError};
use serde::Deserialize;
use tracing::info;

use super::binder::{Bind, Uploads};
use super::error::ApiResult;
use super::resolver::Target;

fn pem_part(uploads: &Uploads, name: &str) -> ApiResult<String> {
    let content = uploads
        .value(name)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| RpaasError::validation(format!("{} is required", name)))?;
    String::from_utf8(content.to_vec())
        .map_err(|_| RpaasError::validation(format!("{} must be PEM encoded", name)).into())
}

pub async fn update(
    Target(manager): Target,
    Path(instance): Path<String>,
    uploads: Uploads,
) -> ApiResult<StatusCode> {
    let certificate = pem_part(&uploads, "cert")?;
    let key = pem_part(&uploads, "key")?;
    let name = uploads.text("name").unwrap_or_default();
    let name = certificate_name_or_default(&name).to_string();
    validate_certificate_name(&name)?;

    let pair = KeyPair::from_pem(&certificate, &key)?;
    manager.update_certificate(&instance, &name, pair).await?;
    info!(instance = %instance, certificate = %name, "Certificate updated");
    Ok(StatusCode::OK)
}

pub async fn list(
    Target(manager): Target,
    Path(instance): Path<String>,
) -> ApiResult<Json<Vec<CertificateInfo>>> {
    Ok(Json(manager.get_certificates(&instance).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteCertificateArgs {
    #[serde(default)]
    pub name: String,
}

pub async fn remove(
    Target(manager): Target,
    Path(instance): Path<String>,
    Bind(args): Bind<DeleteCertificateArgs>,
) -> ApiResult<StatusCode> {
    delete(manager, &instance, &args.name).await
}

pub async fn remove_named(
    Target(manager): Target,
    Path((instance, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    delete(manager, &instance, &name).await
}

async fn delete(
    manager: std::sync::Arc<dyn rpaas_operator::Manager>,
    instance: &str,
    name: &str,
) -> ApiResult<StatusCode> {
    let name = certificate_name_or_default(name);
    validate_certificate_name(name)?;
    manager.delete_certificate(instance, name).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::test_support::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use rpaas_models::certificate::INVALID_KEY_PAIR_PREFIX;
    use rpaas_operator::fake::FakeManager;

    fn generate(host: &str) -> (String, String) {
        let cert = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
        (cert.cert.pem(), cert.key_pair.serialize_pem())
    }

    fn upload(uri: &str, parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, file_name, content) in parts {
            body.push_str("--BOUNDARY\r\n");
            match file_name {
                Some(file_name) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\r\n",
                    name, file_name
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    name
                )),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str("--BOUNDARY--\r\n");
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn valid_pair_is_stored_by_name() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (cert, key) = generate("www.example.com");
        let (status, _, _) = send(
            app(manager.clone()),
            upload(
                "/resources/my-instance/certificate",
                &[
                    ("cert", Some("cert.pem"), &cert),
                    ("key", Some("key.pem"), &key),
                    ("name", None, "www"),
                ],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(manager.certificate_of("my-instance", "www").as_deref(), Some(cert.as_str()));
    }

    #[tokio::test]
    async fn name_defaults() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (cert, key) = generate("www.example.com");
        let (status, _, _) = send(
            app(manager.clone()),
            upload(
                "/resources/my-instance/certificate",
                &[("cert", Some("cert.pem"), &cert), ("key", Some("key.pem"), &key)],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(manager.certificate_of("my-instance", "default").is_some());
    }

    #[tokio::test]
    async fn mismatched_pair_never_reaches_manager() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (cert, _) = generate("www.example.com");
        let (_, other_key) = generate("other.example.com");
        let (status, _, body) = send(
            app(manager.clone()),
            upload(
                "/resources/my-instance/certificate",
                &[("cert", Some("cert.pem"), &cert), ("key", Some("key.pem"), &other_key)],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let msg = json_of(&body)["Msg"].as_str().unwrap().to_string();
        assert!(msg.starts_with(&format!("{}:", INVALID_KEY_PAIR_PREFIX)), "{}", msg);
        assert!(!manager.was_called("update_certificate"));
    }

    #[tokio::test]
    async fn form_upload_is_415() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (status, headers, _) = send(
            app(manager),
            form("POST", "/resources/my-instance/certificate", "cert=x&key=y"),
        )
        .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(headers.get("accept").unwrap(), "multipart/form-data");
    }

    #[tokio::test]
    async fn delete_by_path_or_body() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (cert, key) = generate("www.example.com");
        for name in ["www", "api"] {
            let (status, _, _) = send(
                app(manager.clone()),
                upload(
                    "/resources/my-instance/certificate",
                    &[
                        ("cert", Some("cert.pem"), &cert),
                        ("key", Some("key.pem"), &key),
                        ("name", None, name),
                    ],
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, _, _) = send(
            app(manager.clone()),
            empty("DELETE", "/resources/my-instance/certificate/www"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, _) = send(
            app(manager.clone()),
            form("DELETE", "/resources/my-instance/certificate", "name=api"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) = send(
            app(manager),
            empty("DELETE", "/resources/my-instance/certificate/www"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json_of(&body)["Msg"], "certificate \"www\" does not exist");
    }
}
