//! HTTP/2 (h2c) transport
//!
//! The request body is stdin and the response body is stdout/stderr. The
//! terminal size is fixed by the query string. The exit status travels in
//! the `X-Exit-Code` and `X-Error` trailers.

use std::convert::Infallible;
use std::io;

use async_trait::async_trait;
use axum::body::{Body, BodyDataStream};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use http_body::Frame;
use http_body_util::StreamBody;
use tokio::sync::mpsc;

use super::{Ending, FrameSink, FrameSource, Inbound};
use crate::api::error::INTERNAL_SERVER_ERROR;

pub const EXIT_CODE_TRAILER: HeaderName = HeaderName::from_static("x-exit-code");
pub const ERROR_TRAILER: HeaderName = HeaderName::from_static("x-error");

const RESPONSE_BUFFER: usize = 16;

type FrameResult = Result<Frame<Bytes>, Infallible>;

pub struct H2Source {
    body: BodyDataStream,
}

impl H2Source {
    pub fn new(body: Body) -> Self {
        Self {
            body: body.into_data_stream(),
        }
    }
}

#[async_trait]
impl FrameSource for H2Source {
    async fn next_frame(&mut self) -> Option<Inbound> {
        loop {
            match self.body.next().await {
                Some(Ok(data)) if data.is_empty() => continue,
                Some(Ok(data)) => return Some(Inbound::Stdin(data)),
                None => return Some(Inbound::Eof),
                Some(Err(_)) => return None,
            }
        }
    }
}

pub struct H2Sink {
    tx: mpsc::Sender<FrameResult>,
}

/// Sink plus the streaming response it feeds.
pub fn response() -> (H2Sink, Response) {
    let (tx, rx) = mpsc::channel::<FrameResult>(RESPONSE_BUFFER);
    let frames = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    });
    let mut response = Response::new(Body::new(StreamBody::new(frames)));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response.headers_mut().insert(
        header::TRAILER,
        HeaderValue::from_static("X-Exit-Code, X-Error"),
    );
    (H2Sink { tx }, response)
}

pub fn trailers(ending: &Ending) -> HeaderMap {
    let mut map = HeaderMap::new();
    let (code, error) = match ending {
        Ending::Exited(outcome) => (outcome.exit_code.unwrap_or(0), None),
        Ending::Failed(e) => (-1, Some(e.public_message().unwrap_or(INTERNAL_SERVER_ERROR))),
        Ending::Shutdown => (-1, Some("server shutting down")),
    };
    map.insert(EXIT_CODE_TRAILER, HeaderValue::from(code));
    if let Some(error) = error.and_then(|e| HeaderValue::from_str(e).ok()) {
        map.insert(ERROR_TRAILER, error);
    }
    map
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response stream closed")
}

#[async_trait]
impl FrameSink for H2Sink {
    async fn send(&mut self, data: Bytes) -> io::Result<()> {
        self.tx.send(Ok(Frame::data(data))).await.map_err(|_| closed())
    }

    async fn close(&mut self, ending: Ending) -> io::Result<()> {
        self.tx
            .send(Ok(Frame::trailers(trailers(&ending))))
            .await
            .map_err(|_| closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use rpaas_models::RpaasError;
    use rpaas_operator::ExecOutcome;

    #[test]
    fn trailers_describe_the_ending() {
        let ok = trailers(&Ending::Exited(ExecOutcome::success()));
        assert_eq!(ok[EXIT_CODE_TRAILER], "0");
        assert!(ok.get(ERROR_TRAILER).is_none());

        let failed = trailers(&Ending::Failed(RpaasError::validation("command is required")));
        assert_eq!(failed[EXIT_CODE_TRAILER], "-1");
        assert_eq!(failed[ERROR_TRAILER], "command is required");
    }

    #[tokio::test]
    async fn source_reports_eof_then_data() {
        let mut source = H2Source::new(Body::from("ls\n"));
        assert_eq!(
            source.next_frame().await,
            Some(Inbound::Stdin(Bytes::from_static(b"ls\n")))
        );
        assert_eq!(source.next_frame().await, Some(Inbound::Eof));
    }

    #[tokio::test]
    async fn response_streams_data_then_trailers() {
        let (mut sink, response) = response();
        assert_eq!(response.headers()[header::TRAILER], "X-Exit-Code, X-Error");
        let writer = tokio::spawn(async move {
            sink.send(Bytes::from_static(b"hello ")).await.unwrap();
            sink.send(Bytes::from_static(b"world")).await.unwrap();
            sink.close(Ending::Exited(ExecOutcome { exit_code: Some(2) }))
                .await
                .unwrap();
        });
        let collected = response.into_body().collect().await.unwrap();
        writer.await.unwrap();
        let trailers = collected.trailers().cloned().unwrap();
        assert_eq!(trailers[EXIT_CODE_TRAILER], "2");
        assert_eq!(&collected.to_bytes()[..], b"hello world");
    }

    #[tokio::test]
    async fn dropped_response_fails_the_sink() {
        let (mut sink, response) = response();
        drop(response);
        assert!(sink.send(Bytes::from_static(b"x")).await.is_err());
    }
}
