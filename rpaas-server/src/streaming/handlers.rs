//! `/exec`, `/debug` and `/log` endpoints

use std::convert::Infallible;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Path, Request, State};
use axum::http::request::Parts;
use axum::http::{header, Method, StatusCode, Version};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use rpaas_models::{ExecOptions, LogOptions};
use rpaas_operator::LogArgs;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{h2, ws, ChannelWriter, Session, SessionKind};
use crate::api::binder::bind_query;
use crate::api::error::{ApiError, ApiResult};
use crate::api::metrics::SessionGauge;
use crate::api::resolver::Target;
use crate::api::AppState;

const HTTP2_ONLY: &str = "this endpoint only works over HTTP/2";
const LOG_BUFFER: usize = 64;
/// A followed log with no output yet starts streaming after this long.
const FIRST_CHUNK_WAIT: Duration = Duration::from_millis(500);

fn is_websocket_upgrade(parts: &Parts) -> bool {
    parts
        .headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

fn origin_allowed(parts: &Parts, allowed: &[String]) -> bool {
    match parts.headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        None | Some("") => true,
        Some(origin) => allowed.iter().any(|a| a == origin),
    }
}

pub async fn exec(
    State(state): State<AppState>,
    Target(manager): Target,
    Path(instance): Path<String>,
    req: Request,
) -> Response {
    stream_command(SessionKind::Exec, state, manager, instance, req).await
}

/// Like exec, but in an ephemeral container running `image`.
pub async fn debug(
    State(state): State<AppState>,
    Target(manager): Target,
    Path(instance): Path<String>,
    req: Request,
) -> Response {
    stream_command(SessionKind::Debug, state, manager, instance, req).await
}

async fn stream_command(
    kind: SessionKind,
    state: AppState,
    manager: std::sync::Arc<dyn rpaas_operator::Manager>,
    instance: String,
    req: Request,
) -> Response {
    let (mut parts, body) = req.into_parts();
    let mut options: ExecOptions = match bind_query(parts.uri.query()) {
        Ok(options) => options,
        Err(e) => return e.into_response(),
    };
    // `ws=true` insists on WebSocket; a bare upgrade gets it too
    let websocket = options.ws || is_websocket_upgrade(&parts);

    if !websocket {
        if parts.version != Version::HTTP_2 {
            return (StatusCode::HTTP_VERSION_NOT_SUPPORTED, HTTP2_ONLY).into_response();
        }
        if parts.method != Method::POST {
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }
    }
    if kind == SessionKind::Debug && options.image.is_none() {
        options.image = Some(state.config.debug_image.clone());
    }
    if let Err(e) = options.validate() {
        return ApiError::from(e).into_response();
    }

    let session = Session {
        kind,
        manager,
        instance,
        options,
        shutdown: state.shutdown.clone(),
    };

    if websocket {
        if !origin_allowed(&parts, &state.config.websocket_allowed_origins) {
            debug!(origin = ?parts.headers.get(header::ORIGIN), "Rejected WebSocket origin");
            return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
        }
        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => return rejection.into_response(),
        };
        let sessions = state.sessions.clone();
        return upgrade.on_upgrade(move |socket| {
            let (source, sink) = ws::split(socket);
            sessions.track_future(session.run(source, sink))
        });
    }

    let (sink, response) = h2::response();
    state
        .sessions
        .spawn(session.run(h2::H2Source::new(body), sink));
    response
}

pub async fn log(
    State(state): State<AppState>,
    Target(manager): Target,
    Path(instance): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let options: LogOptions = bind_query(req.uri().query())?;
    options.validate()?;

    let cancel = state.shutdown.child_token();
    let (tx, mut rx) = mpsc::channel::<Bytes>(LOG_BUFFER);
    let args = LogArgs {
        options,
        sink: Box::new(ChannelWriter::new(tx)),
        cancel: cancel.clone(),
    };
    let task = state.sessions.spawn(async move {
        let _gauge = SessionGauge::start("log");
        let result = manager.log(&instance, args).await;
        if let Err(e) = &result {
            warn!(instance = %instance, error = %e, "Log stream ended with error");
        }
        result
    });

    // dropping the handler or, later, the body (client gone) cancels the reader
    let guard = cancel.drop_guard();
    let first = tokio::select! {
        chunk = rx.recv() => match chunk {
            Some(chunk) => Some(chunk),
            None => {
                // the reader finished without output; report how it went
                task.await.map_err(anyhow::Error::from)??;
                return Ok(StatusCode::OK.into_response());
            }
        },
        _ = tokio::time::sleep(FIRST_CHUNK_WAIT) => None,
    };

    let rest = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), (rx, guard)))
    });
    let body = futures::stream::iter(first.map(Ok::<_, Infallible>)).chain(rest);
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::api::test_support::*;
    use axum::http::{HeaderMap, HeaderValue};
    use http_body_util::BodyExt;
    use rpaas_operator::fake::FakeManager;
    use tower::ServiceExt;

    fn h2_request(method: &str, uri: &str, body: Body) -> Request {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .version(Version::HTTP_2)
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn http1_without_upgrade_is_refused() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (status, _, body) = send(
            app(manager.clone()),
            empty("POST", "/resources/my-instance/exec?command=x"),
        )
        .await;
        assert_eq!(status, StatusCode::HTTP_VERSION_NOT_SUPPORTED);
        assert_eq!(&body[..], HTTP2_ONLY.as_bytes());
        assert!(!manager.was_called("exec"));
    }

    #[tokio::test]
    async fn h2_requires_post() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (status, _, _) = send(
            app(manager),
            h2_request("GET", "/resources/my-instance/exec?command=x", Body::empty()),
        )
        .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn exec_requires_command() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (status, _, body) = send(
            app(manager),
            h2_request("POST", "/resources/my-instance/exec?tty=true", Body::empty()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_of(&body)["Msg"], "command is required");
    }

    #[tokio::test]
    async fn foreign_websocket_origin_is_forbidden() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let request = axum::http::Request::builder()
            .method("GET")
            .uri("/resources/my-instance/exec?ws=true&command=bash")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .header("origin", "https://evil.example.com")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(app(manager.clone()), request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!manager.was_called("exec"));
    }

    #[tokio::test]
    async fn ws_flag_without_upgrade_is_rejected() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (status, _, _) = send(
            app(manager.clone()),
            empty("GET", "/resources/my-instance/exec?ws=true&command=ls"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(
            app(manager.clone()),
            h2_request("POST", "/resources/my-instance/exec?ws=true&command=ls", Body::empty()),
        )
        .await;
        // WebSocket handshakes are GET only
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert!(!manager.was_called("exec"));
    }

    #[test]
    fn empty_origin_is_allowed() {
        let (parts, _) = axum::http::Request::builder()
            .body(())
            .unwrap()
            .into_parts();
        assert!(origin_allowed(&parts, &[]));

        let (mut parts, _) = axum::http::Request::builder()
            .body(())
            .unwrap()
            .into_parts();
        parts
            .headers
            .insert(header::ORIGIN, HeaderValue::from_static("https://tsuru.io"));
        assert!(!origin_allowed(&parts, &[]));
        assert!(origin_allowed(&parts, &["https://tsuru.io".to_string()]));
    }

    #[tokio::test]
    async fn h2_exec_streams_output_and_exit_code() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let response = app(manager.clone())
            .oneshot(h2_request(
                "POST",
                "/resources/my-instance/exec?command=echo&command=hello",
                Body::empty(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let collected = response.into_body().collect().await.unwrap();
        let trailers: HeaderMap = collected.trailers().cloned().unwrap();
        assert_eq!(trailers[h2::EXIT_CODE_TRAILER], "0");
        assert_eq!(&collected.to_bytes()[..], b"echo hello\n");
        assert!(manager.was_called("exec"));
    }

    #[tokio::test]
    async fn debug_defaults_the_image() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        manager.on_exec(move |args| {
            let _ = seen_tx.send(args.options.image.clone());
            futures::FutureExt::boxed(async {
                Ok::<_, rpaas_models::RpaasError>(rpaas_operator::ExecOutcome::success())
            })
        });
        let state = state_with(manager.clone());
        let debug_image = state.config.debug_image.clone();
        let response = crate::api::create_router(state)
            .oneshot(h2_request(
                "POST",
                "/resources/my-instance/debug?command=sh",
                Body::empty(),
            ))
            .await
            .unwrap();
        let _ = response.into_body().collect().await.unwrap();
        assert_eq!(seen_rx.recv().await.unwrap(), Some(debug_image));
        assert!(manager.was_called("debug"));
    }

    #[tokio::test]
    async fn log_streams_lines() {
        let manager = Arc::new(
            FakeManager::new()
                .with_instance("my-instance")
                .with_log_lines(&["line one", "line two"]),
        );
        let (status, _, body) = send(
            app(manager),
            empty("GET", "/resources/my-instance/log?lines=10"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"line one\nline two\n");
    }

    #[tokio::test]
    async fn log_errors_before_output_keep_their_status() {
        let manager = Arc::new(FakeManager::new());
        let (status, _, body) =
            send(app(manager), empty("GET", "/resources/my-instance/log")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json_of(&body)["Msg"], "rpaas instance \"my-instance\" not found");
    }

    #[tokio::test]
    async fn negative_lines_are_rejected() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (status, _, _) = send(
            app(manager.clone()),
            empty("GET", "/resources/my-instance/log?lines=-1"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!manager.was_called("log"));
    }

    #[tokio::test]
    async fn dropping_a_followed_log_cancels_the_reader() {
        let manager = Arc::new(
            FakeManager::new()
                .with_instance("my-instance")
                .with_log_lines(&["first"]),
        );
        let state = state_with(manager);
        let sessions = state.sessions.clone();
        let response = crate::api::create_router(state)
            .oneshot(
                axum::http::Request::builder()
                    .uri("/resources/my-instance/log?follow=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let mut body = response.into_body().into_data_stream();
        assert_eq!(&body.next().await.unwrap().unwrap()[..], b"first\n");
        drop(body);

        sessions.close();
        tokio::time::timeout(Duration::from_secs(2), sessions.wait())
            .await
            .expect("log reader cancelled");
    }

    #[tokio::test]
    async fn leaving_before_the_first_chunk_cancels_the_reader() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let state = state_with(manager.clone());
        let sessions = state.sessions.clone();
        let request = crate::api::create_router(state).oneshot(
            axum::http::Request::builder()
                .uri("/resources/my-instance/log?follow=true")
                .body(Body::empty())
                .unwrap(),
        );
        // a silent log keeps the handler waiting for its first chunk
        let abandoned = tokio::time::timeout(FIRST_CHUNK_WAIT / 5, request).await;
        assert!(abandoned.is_err());
        assert!(manager.was_called("log"));

        sessions.close();
        tokio::time::timeout(Duration::from_secs(2), sessions.wait())
            .await
            .expect("log reader cancelled");
    }
}
