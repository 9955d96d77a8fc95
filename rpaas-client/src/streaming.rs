//! Exec, debug and log
//!
//! Exec and debug sessions run over a WebSocket. Output arrives as text or
//! binary frames; the close frame tells how the command ended. Logs are a
//! plain chunked response body.

use bytes::Bytes;
use futures::stream::{BoxStream, SplitSink, SplitStream};
use futures::{SinkExt, StreamExt, TryStreamExt};
use reqwest::Method;
use rpaas_models::{ExecOptions, LogOptions, TerminalSize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::client::{RpaasClient, CLUSTER_HEADER};
use crate::error::{ClientError, Result};
use crate::target::{encode_segment, websocket_url};

pub type WebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a remote command ended, read from the close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Exited(i32),
    Failed(String),
    /// The control plane is shutting down
    Shutdown,
}

impl SessionEnd {
    pub fn from_close(frame: Option<&CloseFrame<'_>>) -> Self {
        let Some(frame) = frame else {
            return SessionEnd::Exited(0);
        };
        match frame.code {
            CloseCode::Normal => SessionEnd::Exited(
                frame
                    .reason
                    .strip_prefix("exit code ")
                    .and_then(|code| code.trim().parse().ok())
                    .unwrap_or(0),
            ),
            CloseCode::Away => SessionEnd::Shutdown,
            code => SessionEnd::Failed(if frame.reason.is_empty() {
                format!("session closed with code {}", u16::from(code))
            } else {
                frame.reason.to_string()
            }),
        }
    }

    /// Process exit code for a CLI wrapping the session.
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionEnd::Exited(code) => *code,
            SessionEnd::Failed(_) | SessionEnd::Shutdown => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Output(Bytes),
    Closed(SessionEnd),
}

/// xterm window-manipulation sequence understood as a resize.
pub fn resize_sequence(size: TerminalSize) -> String {
    format!("\x1b[8;{};{}t", size.height, size.width)
}

pub fn exec_query(options: &ExecOptions) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for part in &options.command {
        query.append_pair("command", part);
    }
    if let Some(pod) = &options.pod {
        query.append_pair("pod", pod);
    }
    if let Some(container) = &options.container {
        query.append_pair("container", container);
    }
    query.append_pair("tty", bool_str(options.tty));
    query.append_pair("interactive", bool_str(options.interactive));
    if let (Some(width), Some(height)) = (options.width, options.height) {
        query.append_pair("width", &width.to_string());
        query.append_pair("height", &height.to_string());
    }
    if let Some(image) = &options.image {
        query.append_pair("image", image);
    }
    query.append_pair("ws", "true");
    query.finish()
}

pub fn log_query(options: &LogOptions) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    if let Some(pod) = &options.pod {
        query.append_pair("pod", pod);
    }
    if let Some(container) = &options.container {
        query.append_pair("container", container);
    }
    if let Some(lines) = options.lines {
        query.append_pair("lines", &lines.to_string());
    }
    if let Some(since) = options.since {
        query.append_pair("since", &since.to_string());
    }
    query.append_pair("follow", bool_str(options.follow));
    query.append_pair("timestamp", bool_str(options.timestamp));
    query.finish()
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

// ============================================================================
// Sessions
// ============================================================================

pub struct ExecSession {
    socket: WebSocket,
}

impl ExecSession {
    pub fn into_inner(self) -> WebSocket {
        self.socket
    }

    pub async fn send(&mut self, data: impl Into<Vec<u8>>) -> Result<()> {
        Ok(self.socket.send(Message::Binary(data.into())).await?)
    }

    pub async fn resize(&mut self, size: TerminalSize) -> Result<()> {
        Ok(self.socket.send(Message::Text(resize_sequence(size))).await?)
    }

    pub async fn next(&mut self) -> Option<Result<Event>> {
        next_event(&mut self.socket).await
    }

    /// Runs to completion, collecting all output.
    pub async fn collect(mut self) -> Result<(Vec<u8>, SessionEnd)> {
        let mut output = Vec::new();
        while let Some(event) = self.next().await {
            match event? {
                Event::Output(data) => output.extend_from_slice(&data),
                Event::Closed(end) => return Ok((output, end)),
            }
        }
        Ok((output, SessionEnd::Exited(0)))
    }

    /// Separate halves so stdin and output can be pumped concurrently.
    pub fn split(self) -> (SessionWriter, SessionReader) {
        let (sink, stream) = self.socket.split();
        (SessionWriter { sink }, SessionReader { stream })
    }
}

pub struct SessionWriter {
    sink: SplitSink<WebSocket, Message>,
}

impl SessionWriter {
    pub async fn send(&mut self, data: impl Into<Vec<u8>>) -> Result<()> {
        Ok(self.sink.send(Message::Binary(data.into())).await?)
    }

    pub async fn resize(&mut self, size: TerminalSize) -> Result<()> {
        Ok(self.sink.send(Message::Text(resize_sequence(size))).await?)
    }

    /// Closing from this side cancels the remote command.
    pub async fn close(&mut self) -> Result<()> {
        Ok(self.sink.close().await?)
    }
}

pub struct SessionReader {
    stream: SplitStream<WebSocket>,
}

impl SessionReader {
    pub async fn next(&mut self) -> Option<Result<Event>> {
        next_event(&mut self.stream).await
    }
}

async fn next_event<S>(stream: &mut S) -> Option<Result<Event>>
where
    S: futures::Stream<Item = tungstenite::Result<Message>> + Unpin,
{
    loop {
        let message = match stream.next().await? {
            Ok(message) => message,
            // the server closes the TCP stream right after its close frame
            Err(tungstenite::Error::ConnectionClosed) => return None,
            Err(e) => return Some(Err(e.into())),
        };
        match message {
            Message::Text(text) => return Some(Ok(Event::Output(Bytes::from(text)))),
            Message::Binary(data) => return Some(Ok(Event::Output(Bytes::from(data)))),
            Message::Close(frame) => {
                return Some(Ok(Event::Closed(SessionEnd::from_close(frame.as_ref()))))
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        }
    }
}

/// A failed handshake carries the control plane's error response.
fn handshake_error(e: tungstenite::Error) -> ClientError {
    match e {
        tungstenite::Error::Http(response) => {
            let body = response.body().clone().unwrap_or_default();
            ClientError::from_response(response.status().as_u16(), &body)
        }
        other => other.into(),
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ClientError::Config(e.to_string()))
}

impl RpaasClient {
    pub async fn exec(&self, instance: &str, options: &ExecOptions) -> Result<ExecSession> {
        self.open_session(instance, "/exec", options).await
    }

    /// Like exec, in an ephemeral container. `options.image` may be left
    /// empty to use the server's default debug image.
    pub async fn debug(&self, instance: &str, options: &ExecOptions) -> Result<ExecSession> {
        self.open_session(instance, "/debug", options).await
    }

    async fn open_session(
        &self,
        instance: &str,
        suffix: &str,
        options: &ExecOptions,
    ) -> Result<ExecSession> {
        let path = format!("/resources/{}{}", encode_segment(instance), suffix);
        let query = exec_query(options);
        let url = websocket_url(self.addressing.url(Some(instance), &path, Some(&query))?)?;
        debug!(url = %url, "opening websocket session");

        let mut request = url.as_str().into_client_request()?;
        if let Some(authorization) = self.addressing.authorization() {
            request
                .headers_mut()
                .insert("authorization", header_value(&authorization)?);
        }
        if let Some(cluster) = &self.cluster {
            request
                .headers_mut()
                .insert(HeaderName::from_static(CLUSTER_HEADER), header_value(cluster)?);
        }

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(handshake_error)?;
        Ok(ExecSession { socket })
    }

    /// Streams raw log bytes. With `follow` the stream stays open until it
    /// is dropped.
    pub async fn log(
        &self,
        instance: &str,
        options: &LogOptions,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let path = format!("/resources/{}/log", encode_segment(instance));
        let query = log_query(options);
        let request = self.request(Method::GET, Some(instance), &path, Some(&query))?;
        let response = RpaasClient::send(request).await?;
        Ok(response.bytes_stream().map_err(ClientError::from).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{direct, spawn};
    use axum::extract::ws::{self, WebSocketUpgrade};
    use axum::extract::RawQuery;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use rpaas_models::ErrorKind;
    use std::borrow::Cow;

    #[test]
    fn close_frames_decode_to_session_ends() {
        let frame = |code, reason: &'static str| CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        };
        assert_eq!(
            SessionEnd::from_close(Some(&frame(CloseCode::Normal, ""))),
            SessionEnd::Exited(0)
        );
        assert_eq!(
            SessionEnd::from_close(Some(&frame(CloseCode::Normal, "exit code 127"))),
            SessionEnd::Exited(127)
        );
        assert_eq!(
            SessionEnd::from_close(Some(&frame(CloseCode::Error, "pod not found"))),
            SessionEnd::Failed("pod not found".into())
        );
        assert_eq!(
            SessionEnd::from_close(Some(&frame(CloseCode::Away, "server shutting down"))),
            SessionEnd::Shutdown
        );
        assert_eq!(SessionEnd::Failed("x".into()).exit_code(), 1);
    }

    #[test]
    fn exec_options_become_query_pairs() {
        let options = ExecOptions {
            command: vec!["ls".into(), "-la".into()],
            tty: true,
            interactive: true,
            width: Some(80),
            height: Some(24),
            ..Default::default()
        };
        assert_eq!(
            exec_query(&options),
            "command=ls&command=-la&tty=true&interactive=true&width=80&height=24&ws=true"
        );
    }

    #[test]
    fn log_options_become_query_pairs() {
        let options = LogOptions {
            lines: Some(10),
            follow: true,
            ..Default::default()
        };
        assert_eq!(log_query(&options), "lines=10&follow=true&timestamp=false");
    }

    async fn echo_then_exit(ws: WebSocketUpgrade, RawQuery(query): RawQuery, headers: HeaderMap) -> impl IntoResponse {
        assert_eq!(headers["authorization"], "Basic YWRtaW46c2VjcmV0");
        let query = query.unwrap_or_default();
        assert!(query.contains("command=cat"), "{}", query);
        assert!(query.contains("ws=true"), "{}", query);
        ws.on_upgrade(|mut socket| async move {
            let mut seen = Vec::new();
            while let Some(Ok(message)) = socket.recv().await {
                match message {
                    ws::Message::Text(text) if text.starts_with('\x1b') => seen.push(text),
                    ws::Message::Binary(data) => {
                        let _ = socket.send(ws::Message::Binary(data)).await;
                        break;
                    }
                    _ => {}
                }
            }
            assert_eq!(seen, vec!["\x1b[8;24;80t".to_string()]);
            let _ = socket
                .send(ws::Message::Close(Some(ws::CloseFrame {
                    code: ws::close_code::NORMAL,
                    reason: Cow::Borrowed("exit code 3"),
                })))
                .await;
        })
    }

    #[tokio::test]
    async fn exec_round_trips_over_websocket() {
        let router = Router::new().route("/resources/my-nginx/exec", get(echo_then_exit));
        let client = direct(&spawn(router).await);
        let options = ExecOptions {
            command: vec!["cat".into()],
            interactive: true,
            ..Default::default()
        };

        let mut session = client.exec("my-nginx", &options).await.unwrap();
        session
            .resize(TerminalSize {
                width: 80,
                height: 24,
            })
            .await
            .unwrap();
        session.send(b"hello".to_vec()).await.unwrap();

        let (output, end) = session.collect().await.unwrap();
        assert_eq!(output, b"hello");
        assert_eq!(end, SessionEnd::Exited(3));
    }

    #[tokio::test]
    async fn refused_handshakes_become_typed_errors() {
        let router = Router::new().route(
            "/resources/my-nginx/exec",
            get(|| async {
                (
                    StatusCode::FORBIDDEN,
                    Json(serde_json::json!({"message": "origin not allowed"})),
                )
            }),
        );
        let client = direct(&spawn(router).await);
        let options = ExecOptions {
            command: vec!["ls".into()],
            ..Default::default()
        };
        let err = client.exec("my-nginx", &options).await.err().unwrap();
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.kind(), Some(ErrorKind::Internal));
    }

    #[tokio::test]
    async fn log_streams_body_chunks() {
        let router = Router::new().route(
            "/resources/my-nginx/log",
            get(|RawQuery(query): RawQuery| async move {
                assert_eq!(query.as_deref(), Some("lines=2&follow=false&timestamp=false"));
                "line 1\nline 2\n"
            }),
        );
        let client = direct(&spawn(router).await);
        let options = LogOptions {
            lines: Some(2),
            ..Default::default()
        };

        let mut stream = client.log("my-nginx", &options).await.unwrap();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"line 1\nline 2\n");
    }
}
