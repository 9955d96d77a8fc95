//! WebSocket transport
//!
//! Each inbound text or binary message is stdin, except a message holding
//! exactly a resize sequence. Output goes out as text when it is valid UTF-8
//! and as binary otherwise. The close frame carries the outcome.

use std::borrow::Cow;
use std::io;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use super::{parse_resize, Ending, FrameSink, FrameSource, Inbound};
use crate::api::error::INTERNAL_SERVER_ERROR;

pub fn split(socket: WebSocket) -> (WsSource, WsSink) {
    let (sink, stream) = socket.split();
    (WsSource { stream }, WsSink { sink })
}

pub struct WsSource {
    stream: SplitStream<WebSocket>,
}

fn classify(data: Bytes) -> Inbound {
    match parse_resize(&data) {
        Some(size) => Inbound::Resize(size),
        None => Inbound::Stdin(data),
    }
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Inbound> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(classify(Bytes::from(text))),
                Ok(Message::Binary(data)) => return Some(classify(Bytes::from(data))),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(_)) | Err(_) => return None,
            }
        }
    }
}

pub struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

fn to_io(e: axum::Error) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, e)
}

/// Close frame announcing how the session ended.
pub fn close_frame(ending: &Ending) -> CloseFrame<'static> {
    let (code, reason) = match ending {
        Ending::Exited(outcome) => match outcome.exit_code {
            Some(code) if code != 0 => (close_code::NORMAL, format!("exit code {}", code)),
            _ => (close_code::NORMAL, String::new()),
        },
        Ending::Failed(e) => (
            close_code::ERROR,
            e.public_message().unwrap_or(INTERNAL_SERVER_ERROR).to_string(),
        ),
        Ending::Shutdown => (close_code::AWAY, "server shutting down".to_string()),
    };
    CloseFrame {
        code,
        reason: Cow::Owned(truncate_reason(reason)),
    }
}

/// Close reasons are limited to 123 bytes on the wire.
fn truncate_reason(mut reason: String) -> String {
    const MAX: usize = 123;
    if reason.len() > MAX {
        let mut end = MAX;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, data: Bytes) -> io::Result<()> {
        let message = match String::from_utf8(data.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        self.sink.send(message).await.map_err(to_io)
    }

    async fn close(&mut self, ending: Ending) -> io::Result<()> {
        self.sink
            .send(Message::Close(Some(close_frame(&ending))))
            .await
            .map_err(to_io)?;
        self.sink.close().await.map_err(to_io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpaas_models::{RpaasError, TerminalSize};
    use rpaas_operator::ExecOutcome;

    #[test]
    fn resize_frames_are_recognised() {
        assert_eq!(
            classify(Bytes::from_static(b"\x1b[8;24;80t")),
            Inbound::Resize(TerminalSize {
                width: 80,
                height: 24
            })
        );
        assert_eq!(
            classify(Bytes::from_static(b"ls\n")),
            Inbound::Stdin(Bytes::from_static(b"ls\n"))
        );
    }

    #[test]
    fn close_frames_carry_the_outcome() {
        let ok = close_frame(&Ending::Exited(ExecOutcome::success()));
        assert_eq!(ok.code, close_code::NORMAL);
        assert_eq!(ok.reason, "");

        let exited = close_frame(&Ending::Exited(ExecOutcome { exit_code: Some(127) }));
        assert_eq!(exited.code, close_code::NORMAL);
        assert_eq!(exited.reason, "exit code 127");

        let failed = close_frame(&Ending::Failed(RpaasError::not_found("pod not found")));
        assert_eq!(failed.code, close_code::ERROR);
        assert_eq!(failed.reason, "pod not found");

        let internal = close_frame(&Ending::Failed(anyhow::anyhow!("dial tcp 10.0.0.1").into()));
        assert_eq!(internal.reason, INTERNAL_SERVER_ERROR);

        assert_eq!(close_frame(&Ending::Shutdown).code, close_code::AWAY);
    }

    #[test]
    fn long_reasons_are_cut_on_char_boundaries() {
        let reason = "é".repeat(100);
        let cut = truncate_reason(reason);
        assert!(cut.len() <= 123);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
