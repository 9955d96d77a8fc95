//! Cache purge fan-out
//!
//! A logical purge is sent to every live replica concurrently. A replica is
//! either counted as purged or not counted at all; one failure never aborts
//! its siblings. Dropping the returned future cancels every outstanding
//! replica request.

use std::time::Duration;

use anyhow::Context;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rpaas_models::{PurgeArgs, PurgeBulkResult, Result, RpaasError};
use tracing::{debug, warn};

use crate::manager::{Manager, Replica};

/// Port of the nginx purge location in every data plane pod
pub const DEFAULT_PURGE_PORT: u16 = 8800;
pub const DEFAULT_PURGE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PURGE_CONCURRENCY: usize = 16;
pub const DEFAULT_BULK_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct PurgeSettings {
    pub port: u16,
    /// Per replica, covering every request sent to it
    pub timeout: Duration,
    /// Max replica requests in flight for a single path
    pub concurrency: usize,
}

impl Default for PurgeSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PURGE_PORT,
            timeout: DEFAULT_PURGE_TIMEOUT,
            concurrency: DEFAULT_PURGE_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachePurger {
    client: reqwest::Client,
    settings: PurgeSettings,
}

impl CachePurger {
    pub fn new(settings: PurgeSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to build purge HTTP client")?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &PurgeSettings {
        &self.settings
    }

    /// Purges `args.path` on every replica and returns how many acknowledged.
    ///
    /// Any failed replica turns the whole call into an error carrying the
    /// first failure reason.
    pub async fn purge(&self, instance: &str, replicas: &[Replica], args: &PurgeArgs) -> Result<usize> {
        args.validate()?;
        let headers = extra_headers(args)?;

        let results: Vec<(String, std::result::Result<(), String>)> = stream::iter(replicas.to_vec())
            .map(|replica| {
                let headers = headers.clone();
                async move {
                    let outcome =
                        tokio::time::timeout(self.settings.timeout, self.purge_replica(&replica, args, headers))
                            .await
                            .unwrap_or_else(|_| Err("timeout".to_string()));
                    (replica.name, outcome)
                }
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut purged = 0;
        let mut failures = Vec::new();
        for (pod, outcome) in results {
            match outcome {
                Ok(()) => {
                    purged += 1;
                    metrics::counter!("rpaas_purge_replicas_total", "result" => "success").increment(1);
                }
                Err(reason) => {
                    warn!(instance, pod = %pod, path = %args.path, reason = %reason, "Replica purge failed");
                    metrics::counter!("rpaas_purge_replicas_total", "result" => "failure").increment(1);
                    failures.push(format!("{}: {}", pod, reason));
                }
            }
        }

        debug!(instance, path = %args.path, purged, failed = failures.len(), "Purge finished");

        if !failures.is_empty() {
            return Err(RpaasError::Internal(anyhow::anyhow!(
                "failed to purge {} on {} of {} servers: {}",
                args.path,
                failures.len(),
                replicas.len(),
                failures.join("; ")
            )));
        }
        Ok(purged)
    }

    async fn purge_replica(
        &self,
        replica: &Replica,
        args: &PurgeArgs,
        headers: HeaderMap,
    ) -> std::result::Result<(), String> {
        for url in purge_urls(&replica.ip, self.settings.port, args) {
            let response = self
                .client
                .get(&url)
                .headers(headers.clone())
                .send()
                .await
                .map_err(|e| e.to_string())?;
            let status = response.status();
            // 404 means the object was not cached on that replica
            if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
                return Err(format!("unexpected status {} from {}", status.as_u16(), url));
            }
        }
        Ok(())
    }
}

/// Without `preserve_path` the cache key includes the scheme, so both
/// variants are purged.
pub fn purge_urls(ip: &str, port: u16, args: &PurgeArgs) -> Vec<String> {
    let path = if args.path.starts_with('/') {
        args.path.clone()
    } else {
        format!("/{}", args.path)
    };
    if args.preserve_path {
        return vec![format!("http://{}:{}/purge{}", ip, port, path)];
    }
    ["http", "https"]
        .iter()
        .map(|scheme| format!("http://{}:{}/purge/{}{}", ip, port, scheme, path))
        .collect()
}

fn extra_headers(args: &PurgeArgs) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, values) in &args.extra_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| RpaasError::validation(format!("invalid header name {:?}", name)))?;
        for value in values {
            let value = HeaderValue::from_str(value)
                .map_err(|_| RpaasError::validation(format!("invalid value for header {}", name)))?;
            headers.append(name.clone(), value);
        }
    }
    Ok(headers)
}

/// Runs the single path purge once per item with bounded parallelism.
/// Results come back in input order regardless of completion order.
pub async fn purge_bulk(
    manager: &dyn Manager,
    instance: &str,
    items: Vec<PurgeArgs>,
    concurrency: usize,
) -> Vec<PurgeBulkResult> {
    stream::iter(items)
        .map(|item| async move {
            let path = item.path.clone();
            let outcome = match item.validate() {
                Ok(()) => manager.purge_cache(instance, item).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(count) => PurgeBulkResult::purged(path, count),
                Err(e) => PurgeBulkResult::failed(path, e.to_string()),
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode, Uri};
    use axum::Router;

    type Seen = Arc<Mutex<Vec<(String, Vec<String>)>>>;

    /// Starts a fake replica answering every request with `status`.
    async fn fake_replica(status: StatusCode, seen: Seen) -> SocketAddr {
        async fn handler(
            State((status, seen)): State<(StatusCode, Seen)>,
            uri: Uri,
            headers: AxumHeaders,
        ) -> StatusCode {
            let values = headers
                .get_all("x-purge")
                .iter()
                .filter_map(|v| v.to_str().ok().map(String::from))
                .collect();
            seen.lock().unwrap().push((uri.path().to_string(), values));
            status
        }

        let app = Router::new().fallback(handler).with_state((status, seen));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn purger(port: u16) -> CachePurger {
        CachePurger::new(PurgeSettings {
            port,
            timeout: Duration::from_secs(2),
            concurrency: 2,
        })
        .unwrap()
    }

    #[test]
    fn urls_depend_on_preserve_path() {
        let mut args = PurgeArgs {
            path: "/index.html".to_string(),
            ..Default::default()
        };
        assert_eq!(
            purge_urls("10.0.0.1", 8800, &args),
            vec![
                "http://10.0.0.1:8800/purge/http/index.html",
                "http://10.0.0.1:8800/purge/https/index.html"
            ]
        );
        args.preserve_path = true;
        assert_eq!(
            purge_urls("10.0.0.1", 8800, &args),
            vec!["http://10.0.0.1:8800/purge/index.html"]
        );
    }

    #[tokio::test]
    async fn counts_every_acknowledging_replica() {
        let seen: Seen = Arc::default();
        let addr = fake_replica(StatusCode::OK, seen.clone()).await;
        let replicas: Vec<Replica> = (0..3)
            .map(|i| Replica {
                name: format!("pod-{}", i),
                ip: addr.ip().to_string(),
            })
            .collect();

        let mut extra_headers = BTreeMap::new();
        extra_headers.insert("X-Purge".to_string(), vec!["a".to_string(), "b".to_string()]);
        let args = PurgeArgs {
            path: "/a".to_string(),
            preserve_path: true,
            extra_headers,
        };

        let count = purger(addr.port()).purge("my-instance", &replicas, &args).await.unwrap();
        assert_eq!(count, 3);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(path, _)| path == "/purge/a"));
        assert!(seen.iter().all(|(_, values)| values == &vec!["a".to_string(), "b".to_string()]));
    }

    #[tokio::test]
    async fn replica_requests_stay_within_concurrency() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Clone, Default)]
        struct InFlight {
            current: Arc<AtomicUsize>,
            peak: Arc<AtomicUsize>,
        }

        async fn slow(State(in_flight): State<InFlight>) -> StatusCode {
            let now = in_flight.current.fetch_add(1, Ordering::SeqCst) + 1;
            in_flight.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            in_flight.current.fetch_sub(1, Ordering::SeqCst);
            StatusCode::OK
        }

        let in_flight = InFlight::default();
        let app = Router::new().fallback(slow).with_state(in_flight.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let replicas: Vec<Replica> = (0..6)
            .map(|i| Replica {
                name: format!("pod-{}", i),
                ip: addr.ip().to_string(),
            })
            .collect();
        let args = PurgeArgs {
            path: "/a".to_string(),
            preserve_path: true,
            ..Default::default()
        };

        let count = purger(addr.port()).purge("my-instance", &replicas, &args).await.unwrap();
        assert_eq!(count, 6);
        assert_eq!(in_flight.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn not_cached_is_not_a_failure() {
        let addr = fake_replica(StatusCode::NOT_FOUND, Arc::default()).await;
        let replicas = vec![Replica {
            name: "pod-0".to_string(),
            ip: addr.ip().to_string(),
        }];
        let args = PurgeArgs {
            path: "/a".to_string(),
            ..Default::default()
        };
        assert_eq!(purger(addr.port()).purge("i", &replicas, &args).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn a_failing_replica_fails_the_item() {
        let addr = fake_replica(StatusCode::INTERNAL_SERVER_ERROR, Arc::default()).await;
        let replicas = vec![Replica {
            name: "pod-0".to_string(),
            ip: addr.ip().to_string(),
        }];
        let args = PurgeArgs {
            path: "/a".to_string(),
            ..Default::default()
        };
        let err = purger(addr.port()).purge("i", &replicas, &args).await.unwrap_err();
        assert!(err.to_string().contains("pod-0"));
    }

    #[tokio::test]
    async fn invalid_header_is_a_validation_error() {
        let mut extra_headers = BTreeMap::new();
        extra_headers.insert("bad header".to_string(), vec!["x".to_string()]);
        let args = PurgeArgs {
            path: "/a".to_string(),
            preserve_path: false,
            extra_headers,
        };
        let err = purger(1).purge("i", &[], &args).await.unwrap_err();
        assert_eq!(err.kind(), rpaas_models::ErrorKind::Validation);
    }
}
