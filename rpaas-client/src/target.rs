//! Addressing
//!
//! A request for `/resources/<instance>/...` goes either straight to the
//! control plane (HTTP Basic) or through the Tsuru service proxy (bearer
//! token), which wraps the original path in a `callback` parameter.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use url::Url;

use crate::error::{ClientError, Result};

pub const TSURU_TARGET_ENV: &str = "TSURU_TARGET";
pub const TSURU_TOKEN_ENV: &str = "TSURU_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    Direct {
        base_url: Url,
        credentials: Option<Credentials>,
    },
    Tsuru {
        target: Url,
        token: String,
        service: String,
    },
}

fn parse_base(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    // bare hosts are common in TSURU_TARGET
    let raw = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };
    let url = Url::parse(raw.trim_end_matches('/'))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ClientError::Config(format!(
            "unsupported scheme {:?} in {}",
            other, url
        ))),
    }
}

impl Addressing {
    pub fn direct(base_url: &str, credentials: Option<Credentials>) -> Result<Self> {
        Ok(Addressing::Direct {
            base_url: parse_base(base_url)?,
            credentials: credentials.filter(|c| !c.username.is_empty()),
        })
    }

    pub fn tsuru(target: &str, token: impl Into<String>, service: impl Into<String>) -> Result<Self> {
        let service = service.into();
        if service.is_empty() {
            return Err(ClientError::Config(
                "a service name is required to go through Tsuru".to_string(),
            ));
        }
        Ok(Addressing::Tsuru {
            target: parse_base(target)?,
            token: token.into(),
            service,
        })
    }

    /// Tsuru addressing from `TSURU_TARGET` / `TSURU_TOKEN`.
    pub fn tsuru_from_env(service: impl Into<String>) -> Result<Self> {
        let target = std::env::var(TSURU_TARGET_ENV)
            .map_err(|_| ClientError::Config(format!("{} is not set", TSURU_TARGET_ENV)))?;
        let token = std::env::var(TSURU_TOKEN_ENV)
            .map_err(|_| ClientError::Config(format!("{} is not set", TSURU_TOKEN_ENV)))?;
        Self::tsuru(&target, token, service)
    }

    /// URL for `path` (which starts with `/resources`), optionally scoped
    /// to `instance`. Requests with no instance only exist on the direct API.
    pub fn url(&self, instance: Option<&str>, path: &str, query: Option<&str>) -> Result<Url> {
        let path_and_query = match query.filter(|q| !q.is_empty()) {
            Some(query) => format!("{}?{}", path, query),
            None => path.to_string(),
        };
        match self {
            Addressing::Direct { base_url, .. } => {
                Ok(Url::parse(&format!("{}{}", base_url.as_str().trim_end_matches('/'), path_and_query))?)
            }
            Addressing::Tsuru {
                target, service, ..
            } => {
                let instance = instance.ok_or_else(|| {
                    ClientError::Config(format!("{} is not reachable through Tsuru", path))
                })?;
                let mut url = Url::parse(&format!(
                    "{}/services/{}/proxy/{}",
                    target.as_str().trim_end_matches('/'),
                    encode_segment(service),
                    encode_segment(instance)
                ))?;
                url.query_pairs_mut().append_pair("callback", &path_and_query);
                Ok(url)
            }
        }
    }

    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Addressing::Direct {
                credentials: Some(c),
                ..
            } => request.basic_auth(&c.username, Some(&c.password)),
            Addressing::Direct { .. } => request,
            Addressing::Tsuru { token, .. } => request.bearer_auth(token),
        }
    }

    /// Value for a hand-built `Authorization` header (WebSocket handshakes).
    pub fn authorization(&self) -> Option<String> {
        match self {
            Addressing::Direct {
                credentials: Some(c),
                ..
            } => {
                let pair = format!("{}:{}", c.username, c.password);
                Some(format!("Basic {}", STANDARD.encode(pair)))
            }
            Addressing::Direct { .. } => None,
            Addressing::Tsuru { token, .. } => Some(format!("Bearer {}", token)),
        }
    }
}

/// Percent-encodes one path segment. `form_urlencoded` writes spaces as `+`,
/// which is only right in a query string.
pub fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Encodes every segment of a relative path, keeping the slashes.
pub fn encode_path(path: &str) -> String {
    path.split('/').map(encode_segment).collect::<Vec<_>>().join("/")
}

/// http(s) URL to its ws(s) twin.
pub fn websocket_url(mut url: Url) -> Result<Url> {
    let scheme = match url.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Config(format!("cannot use {} for websockets", url)))?;
    Ok(url)
}
