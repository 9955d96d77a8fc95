//! Request binding
//!
//! [`Bind`] fills a typed value from JSON, form-urlencoded or multipart
//! bodies, falling back to the query string when there is no body (plain
//! `GET`/`DELETE` requests). [`Uploads`] keeps the parts of a multipart body,
//! file parts included, for the certificate and extra-files endpoints.

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::{header, HeaderMap};
use rpaas_models::RpaasError;
use serde::de::DeserializeOwned;

use super::error::{ApiError, ACCEPTED_MEDIA_TYPES};
use super::form;

const JSON: &str = "application/json";
const FORM: &str = "application/x-www-form-urlencoded";
const MULTIPART: &str = "multipart/form-data";

/// Lower-cased media type without parameters.
pub fn media_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

fn query_pairs(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn bind_pairs<T: DeserializeOwned>(pairs: Vec<(String, String)>) -> Result<T, ApiError> {
    form::from_pairs(pairs).map_err(|e| RpaasError::validation(e.to_string()).into())
}

/// Binds the query string alone; streaming handlers keep the body for
/// themselves.
pub fn bind_query<T: DeserializeOwned>(query: Option<&str>) -> Result<T, ApiError> {
    bind_pairs(query_pairs(query.unwrap_or_default()))
}

#[derive(Debug, Clone, Default)]
pub struct Bind<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for Bind<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mut pairs = query_pairs(req.uri().query().unwrap_or_default());
        let media = media_type(req.headers());

        if media.as_deref() == Some(MULTIPART) {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| RpaasError::validation(e.body_text()))?;
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| RpaasError::validation(e.body_text()))?
            {
                // file parts are skipped here; next_field drains them
                if field.file_name().is_some() {
                    continue;
                }
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                let value = field
                    .text()
                    .await
                    .map_err(|e| RpaasError::validation(e.body_text()))?;
                pairs.push((name, value));
            }
            return bind_pairs(pairs).map(Bind);
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| RpaasError::validation(e.body_text()))?;

        if body.is_empty() {
            return bind_pairs(pairs).map(Bind);
        }

        match media.as_deref() {
            Some(JSON) => serde_json::from_slice(&body)
                .map(Bind)
                .map_err(|e| RpaasError::validation(format!("invalid JSON body: {}", e)).into()),
            Some(FORM) => {
                pairs.extend(url::form_urlencoded::parse(&body).into_owned());
                bind_pairs(pairs).map(Bind)
            }
            _ => Err(ApiError::unsupported_media_type(ACCEPTED_MEDIA_TYPES)),
        }
    }
}

// ============================================================================
// Multipart uploads
// ============================================================================

#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub file_name: Option<String>,
    pub content: Bytes,
}

/// Every part of a `multipart/form-data` body, in order.
#[derive(Debug, Clone, Default)]
pub struct Uploads(pub Vec<Upload>);

impl Uploads {
    /// Content of the first part called `name`, file or plain field.
    pub fn value(&self, name: &str) -> Option<&Bytes> {
        self.0
            .iter()
            .find(|u| u.name == name)
            .map(|u| &u.content)
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.value(name)
            .map(|content| String::from_utf8_lossy(content).trim().to_string())
    }

    /// File parts called `name`
    pub fn files<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Upload> + 'a {
        self.0
            .iter()
            .filter(move |u| u.name == name && u.file_name.is_some())
    }
}

#[async_trait]
impl<S> FromRequest<S> for Uploads
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if media_type(req.headers()).as_deref() != Some(MULTIPART) {
            return Err(ApiError::unsupported_media_type(MULTIPART));
        }
        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| RpaasError::validation(e.body_text()))?;

        let mut uploads = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| RpaasError::validation(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let content = field
                .bytes()
                .await
                .map_err(|e| RpaasError::validation(e.body_text()))?;
            uploads.push(Upload {
                name,
                file_name,
                content,
            });
        }
        Ok(Uploads(uploads))
    }
}
