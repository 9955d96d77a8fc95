//! Streaming sessions (exec, debug, log)
//!
//! One session runner drives both transports. A transport only has to turn
//! its wire frames into [`Inbound`] events ([`FrameSource`]) and write output
//! frames plus a final close ([`FrameSink`]); the WebSocket and h2c adapters
//! live in [`ws`] and [`h2`].
//!
//! A session moves `Upgraded -> Attached -> Closing -> Closed`: it attaches by
//! calling the manager, and closes when the command exits, the peer goes away
//! or the server shuts down. Whichever comes first cancels the token handed
//! to the manager.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rpaas_models::{ExecOptions, RpaasError, TerminalSize};
use rpaas_operator::manager::BoxedReader;
use rpaas_operator::{ExecArgs, ExecOutcome, Manager};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::{self, OwnedPermit};
use tokio_util::io::StreamReader;
use tokio_util::sync::{CancellationToken, PollSender};
use tracing::{debug, error, info};

use crate::api::metrics::SessionGauge;

pub mod h2;
pub mod handlers;
pub mod ws;

/// Output frames buffered between the manager and the transport
const OUTPUT_BUFFER: usize = 64;
const INPUT_BUFFER: usize = 64;
/// How long a cancelled manager call may take to wind down
const CANCEL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Exec,
    Debug,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Exec => "exec",
            SessionKind::Debug => "debug",
        }
    }
}

/// One event read from the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Stdin(Bytes),
    Resize(TerminalSize),
    /// The peer finished sending input but still reads output
    Eof,
}

/// How a session ended, as reported to the peer
#[derive(Debug)]
pub enum Ending {
    Exited(ExecOutcome),
    Failed(RpaasError),
    Shutdown,
}

#[async_trait]
pub trait FrameSource: Send {
    /// `None` once the peer is gone.
    async fn next_frame(&mut self) -> Option<Inbound>;
}

#[async_trait]
pub trait FrameSink: Send {
    /// Writes and flushes one output frame.
    async fn send(&mut self, data: Bytes) -> io::Result<()>;

    async fn close(&mut self, ending: Ending) -> io::Result<()>;
}

// ============================================================================
// Channel-backed IO
// ============================================================================

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "stream closed by peer")
}

/// `AsyncWrite` that turns every write into one frame on a channel.
///
/// Writes wait for channel capacity, so a slow peer slows the command down
/// instead of growing a buffer.
pub struct ChannelWriter {
    tx: PollSender<Bytes>,
}

impl ChannelWriter {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            tx: PollSender::new(tx),
        }
    }
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        ready!(self.tx.poll_reserve(cx)).map_err(|_| broken_pipe())?;
        self.tx
            .send_item(Bytes::copy_from_slice(buf))
            .map_err(|_| broken_pipe())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx.close();
        Poll::Ready(Ok(()))
    }
}

/// `AsyncRead` over the chunks received on `rx`; EOF once every sender is gone.
pub fn channel_reader(rx: mpsc::Receiver<Bytes>) -> BoxedReader {
    let chunks = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, io::Error>(chunk), rx))
    });
    Box::new(StreamReader::new(Box::pin(chunks)))
}

// ============================================================================
// Terminal resize
// ============================================================================

/// Parses the xterm window manipulation sequence `ESC [ 8 ; rows ; cols t`.
pub fn parse_resize(frame: &[u8]) -> Option<TerminalSize> {
    let body = frame.strip_prefix(b"\x1b[8;")?.strip_suffix(b"t")?;
    let body = std::str::from_utf8(body).ok()?;
    let (rows, cols) = body.split_once(';')?;
    Some(TerminalSize {
        width: cols.parse().ok()?,
        height: rows.parse().ok()?,
    })
}

pub fn resize_sequence(size: TerminalSize) -> String {
    format!("\x1b[8;{};{}t", size.height, size.width)
}

// ============================================================================
// Session runner
// ============================================================================

pub struct Session {
    pub kind: SessionKind,
    pub manager: Arc<dyn Manager>,
    pub instance: String,
    pub options: ExecOptions,
    /// Server-wide shutdown token
    pub shutdown: CancellationToken,
}

impl Session {
    /// Runs the remote command until it exits, the peer leaves or the
    /// server shuts down, then closes the sink accordingly.
    pub async fn run<S, K>(self, mut source: S, mut sink: K)
    where
        S: FrameSource,
        K: FrameSink,
    {
        let Session {
            kind,
            manager,
            instance,
            options,
            shutdown,
        } = self;
        let _gauge = SessionGauge::start(kind.as_str());
        let cancel = shutdown.child_token();

        let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(OUTPUT_BUFFER);
        let (mut stdin_tx, stdin) = if options.interactive {
            let (tx, rx) = mpsc::channel(INPUT_BUFFER);
            (Some(tx), Some(channel_reader(rx)))
        } else {
            (None, None)
        };
        let (mut resize_tx, resize) = if options.tty {
            let (tx, rx) = mpsc::channel(4);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        info!(
            kind = kind.as_str(),
            instance = %instance,
            command = ?options.command,
            tty = options.tty,
            interactive = options.interactive,
            "Streaming session attached"
        );

        let args = ExecArgs {
            options,
            stdin,
            stdout: Box::new(ChannelWriter::new(out_tx.clone())),
            stderr: Box::new(ChannelWriter::new(out_tx)),
            resize,
            cancel: cancel.clone(),
        };
        let exec = async {
            match kind {
                SessionKind::Exec => manager.exec(&instance, args).await,
                SessionKind::Debug => manager.debug(&instance, args).await,
            }
        };
        tokio::pin!(exec);

        // At most one stdin frame and one resize wait for channel capacity,
        // so output keeps draining while the command is not reading input.
        let mut pending_stdin: Option<Bytes> = None;
        let mut pending_resize: Option<TerminalSize> = None;
        let mut input_open = true;
        let mut peer_gone = false;
        let result = loop {
            tokio::select! {
                result = &mut exec => break result,
                Some(chunk) = out_rx.recv() => {
                    if let Err(e) = sink.send(chunk).await {
                        debug!(instance = %instance, error = %e, "Peer stopped reading output");
                        peer_gone = true;
                        break wind_down(&cancel, &mut exec).await;
                    }
                }
                permit = reserve(stdin_tx.clone()), if pending_stdin.is_some() => match permit {
                    Some(permit) => {
                        if let Some(data) = pending_stdin.take() {
                            permit.send(data);
                        }
                    }
                    None => {
                        stdin_tx = None;
                        pending_stdin = None;
                    }
                },
                permit = reserve(resize_tx.clone()), if pending_resize.is_some() => match permit {
                    Some(permit) => {
                        if let Some(size) = pending_resize.take() {
                            permit.send(size);
                        }
                    }
                    None => {
                        resize_tx = None;
                        pending_resize = None;
                    }
                },
                frame = source.next_frame(), if input_open && pending_stdin.is_none() => match frame {
                    Some(Inbound::Stdin(data)) => {
                        if stdin_tx.is_some() {
                            pending_stdin = Some(data);
                        }
                    }
                    Some(Inbound::Resize(size)) => {
                        if resize_tx.is_some() {
                            // only the latest size matters
                            pending_resize = Some(size);
                        }
                    }
                    Some(Inbound::Eof) => {
                        stdin_tx = None;
                        input_open = false;
                    }
                    None => {
                        debug!(instance = %instance, "Peer went away");
                        peer_gone = true;
                        break wind_down(&cancel, &mut exec).await;
                    }
                },
            }
        };

        if peer_gone {
            info!(kind = kind.as_str(), instance = %instance, "Streaming session closed by peer");
            return;
        }

        while let Ok(chunk) = out_rx.try_recv() {
            if sink.send(chunk).await.is_err() {
                return;
            }
        }

        let ending = match result {
            _ if shutdown.is_cancelled() => Ending::Shutdown,
            Ok(outcome) => Ending::Exited(outcome),
            Err(e) => {
                match &e {
                    RpaasError::Internal(inner) => {
                        error!(instance = %instance, error = ?inner, "Streaming session failed")
                    }
                    other => debug!(instance = %instance, error = %other, "Streaming session rejected"),
                }
                Ending::Failed(e)
            }
        };
        info!(kind = kind.as_str(), instance = %instance, ending = ?ending, "Streaming session closed");
        if let Err(e) = sink.close(ending).await {
            debug!(instance = %instance, error = %e, "Failed to close stream");
        }
    }
}

/// Waits for room on `tx`; `None` once the receiving side is gone.
async fn reserve<T>(tx: Option<mpsc::Sender<T>>) -> Option<OwnedPermit<T>> {
    tx?.reserve_owned().await.ok()
}

/// Cancels the manager call and gives it a bounded time to return.
async fn wind_down<F>(cancel: &CancellationToken, exec: &mut Pin<&mut F>) -> rpaas_models::Result<ExecOutcome>
where
    F: std::future::Future<Output = rpaas_models::Result<ExecOutcome>>,
{
    cancel.cancel();
    match tokio::time::timeout(CANCEL_GRACE, exec.as_mut()).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("session did not stop after cancellation").into()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Source fed by a channel; dropping the sender means the peer left.
    pub struct ChannelSource(pub mpsc::Receiver<Inbound>);

    #[async_trait]
    impl FrameSource for ChannelSource {
        async fn next_frame(&mut self) -> Option<Inbound> {
            self.0.recv().await
        }
    }

    #[derive(Debug, PartialEq, Eq)]
    pub enum Recorded {
        Data(Bytes),
        Exited(Option<i32>),
        Failed(String),
        Shutdown,
    }

    pub struct ChannelSink(pub mpsc::UnboundedSender<Recorded>);

    #[async_trait]
    impl FrameSink for ChannelSink {
        async fn send(&mut self, data: Bytes) -> io::Result<()> {
            self.0.send(Recorded::Data(data)).map_err(|_| broken_pipe())
        }

        async fn close(&mut self, ending: Ending) -> io::Result<()> {
            let recorded = match ending {
                Ending::Exited(outcome) => Recorded::Exited(outcome.exit_code),
                Ending::Failed(e) => Recorded::Failed(e.to_string()),
                Ending::Shutdown => Recorded::Shutdown,
            };
            self.0.send(recorded).map_err(|_| broken_pipe())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use futures::FutureExt;
    use rpaas_operator::fake::FakeManager;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn session(manager: Arc<FakeManager>, options: ExecOptions, shutdown: CancellationToken) -> Session {
        Session {
            kind: SessionKind::Exec,
            manager,
            instance: "my-instance".to_string(),
            options,
            shutdown,
        }
    }

    fn interactive_bash() -> ExecOptions {
        ExecOptions {
            command: vec!["bash".to_string()],
            interactive: true,
            tty: true,
            width: Some(80),
            height: Some(24),
            ..Default::default()
        }
    }

    #[test]
    fn resize_sequence_parses() {
        let size = TerminalSize {
            width: 120,
            height: 40,
        };
        assert_eq!(parse_resize(resize_sequence(size).as_bytes()), Some(size));
        assert_eq!(parse_resize(b"\x1b[8;40t"), None);
        assert_eq!(parse_resize(b"ls -la\n"), None);
        assert_eq!(parse_resize(b"\x1b[8;a;bt"), None);
    }

    #[tokio::test]
    async fn channel_writer_emits_one_frame_per_write() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut writer = ChannelWriter::new(tx);
        writer.write_all(b"hello").await.unwrap();
        writer.write_all(b"").await.unwrap();
        writer.write_all(b"world").await.unwrap();
        drop(writer);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"world"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn channel_writer_fails_once_reader_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut writer = ChannelWriter::new(tx);
        let err = writer.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn channel_reader_reads_until_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let mut reader = channel_reader(rx);
        tx.send(Bytes::from_static(b"ab")).await.unwrap();
        tx.send(Bytes::from_static(b"cd")).await.unwrap();
        drop(tx);
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "abcd");
    }

    #[tokio::test]
    async fn interactive_session_round_trip() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        manager.on_exec(move |mut args| {
            let seen_tx = seen_tx.clone();
            async move {
                let _ = seen_tx.send(format!("{:?}", args.options.terminal_size()));
                args.stdout.write_all(b"root@some-hostname # ").await.map_err(anyhow::Error::from)?;
                let mut stdin = args.stdin.take().expect("interactive");
                let mut line = vec![0u8; 23];
                stdin.read_exact(&mut line).await.map_err(anyhow::Error::from)?;
                let _ = seen_tx.send(String::from_utf8_lossy(&line).to_string());
                let mut resize = args.resize.take().expect("tty");
                if let Some(size) = resize.recv().await {
                    let _ = seen_tx.send(format!("resize {}x{}", size.width, size.height));
                }
                args.stderr.write_all(b"some error :/\n").await.map_err(anyhow::Error::from)?;
                Ok::<_, RpaasError>(ExecOutcome { exit_code: Some(3) })
            }
            .boxed()
        });

        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            session(manager, interactive_bash(), CancellationToken::new())
                .run(ChannelSource(in_rx), ChannelSink(out_tx)),
        );

        assert_eq!(
            out_rx.recv().await.unwrap(),
            Recorded::Data(Bytes::from_static(b"root@some-hostname # "))
        );
        in_tx
            .send(Inbound::Stdin(Bytes::from_static(b"my-interactive-command\n")))
            .await
            .unwrap();
        in_tx
            .send(Inbound::Resize(TerminalSize { width: 100, height: 30 }))
            .await
            .unwrap();
        assert_eq!(
            out_rx.recv().await.unwrap(),
            Recorded::Data(Bytes::from_static(b"some error :/\n"))
        );
        assert_eq!(out_rx.recv().await.unwrap(), Recorded::Exited(Some(3)));
        task.await.unwrap();

        assert_eq!(
            seen_rx.recv().await.unwrap(),
            format!("{:?}", Some(TerminalSize { width: 80, height: 24 }))
        );
        assert_eq!(seen_rx.recv().await.unwrap(), "my-interactive-command\n");
        assert_eq!(seen_rx.recv().await.unwrap(), "resize 100x30");
    }

    #[tokio::test]
    async fn peer_leaving_cancels_the_command() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (cancelled_tx, cancelled_rx) = tokio::sync::oneshot::channel();
        let cancelled_tx = std::sync::Mutex::new(Some(cancelled_tx));
        manager.on_exec(move |args| {
            let notify = cancelled_tx.lock().unwrap().take();
            async move {
                args.cancel.cancelled().await;
                if let Some(tx) = notify {
                    let _ = tx.send(());
                }
                Ok::<_, RpaasError>(ExecOutcome::success())
            }
            .boxed()
        });

        let (in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            session(manager, interactive_bash(), CancellationToken::new())
                .run(ChannelSource(in_rx), ChannelSink(out_tx)),
        );
        drop(in_tx);

        tokio::time::timeout(Duration::from_secs(1), cancelled_rx)
            .await
            .expect("command cancelled in time")
            .unwrap();
        task.await.unwrap();
        // nobody to close towards
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_closes_with_shutdown_ending() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        manager.on_exec(|args| {
            async move {
                args.cancel.cancelled().await;
                Ok::<_, RpaasError>(ExecOutcome::default())
            }
            .boxed()
        });

        let shutdown = CancellationToken::new();
        let (_in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            session(manager, interactive_bash(), shutdown.clone())
                .run(ChannelSource(in_rx), ChannelSink(out_tx)),
        );
        shutdown.cancel();
        assert_eq!(out_rx.recv().await.unwrap(), Recorded::Shutdown);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn manager_errors_close_the_session() {
        let manager = Arc::new(FakeManager::new());
        let (_in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        session(manager, interactive_bash(), CancellationToken::new())
            .run(ChannelSource(in_rx), ChannelSink(out_tx))
            .await;
        assert_eq!(
            out_rx.recv().await.unwrap(),
            Recorded::Failed("rpaas instance \"my-instance\" not found".to_string())
        );
    }

    #[tokio::test]
    async fn eof_closes_stdin() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        manager.on_exec(|mut args| {
            async move {
                let mut input = String::new();
                if let Some(mut stdin) = args.stdin.take() {
                    stdin.read_to_string(&mut input).await.map_err(anyhow::Error::from)?;
                }
                args.stdout.write_all(input.as_bytes()).await.map_err(anyhow::Error::from)?;
                Ok::<_, RpaasError>(ExecOutcome::success())
            }
            .boxed()
        });

        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        in_tx.send(Inbound::Stdin(Bytes::from_static(b"cat me"))).await.unwrap();
        in_tx.send(Inbound::Eof).await.unwrap();
        let options = ExecOptions {
            command: vec!["cat".to_string()],
            interactive: true,
            ..Default::default()
        };
        session(manager, options, CancellationToken::new())
            .run(ChannelSource(in_rx), ChannelSink(out_tx))
            .await;
        assert_eq!(out_rx.recv().await.unwrap(), Recorded::Data(Bytes::from_static(b"cat me")));
        assert_eq!(out_rx.recv().await.unwrap(), Recorded::Exited(Some(0)));
    }

    #[tokio::test]
    async fn queued_input_does_not_stall_output() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        manager.on_exec(|mut args| {
            async move {
                for i in 0..200 {
                    args.stdout
                        .write_all(format!("line {}\n", i).as_bytes())
                        .await
                        .map_err(anyhow::Error::from)?;
                }
                let mut input = Vec::new();
                if let Some(mut stdin) = args.stdin.take() {
                    stdin.read_to_end(&mut input).await.map_err(anyhow::Error::from)?;
                }
                args.stdout
                    .write_all(format!("read {}\n", input.len()).as_bytes())
                    .await
                    .map_err(anyhow::Error::from)?;
                Ok::<_, RpaasError>(ExecOutcome::success())
            }
            .boxed()
        });

        // more input than the stdin buffer holds, all of it waiting up front
        let (in_tx, in_rx) = mpsc::channel(128);
        for _ in 0..100 {
            in_tx.send(Inbound::Stdin(Bytes::from_static(b"x\n"))).await.unwrap();
        }
        in_tx.send(Inbound::Eof).await.unwrap();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let options = ExecOptions {
            command: vec!["sh".to_string()],
            interactive: true,
            ..Default::default()
        };
        tokio::time::timeout(
            Duration::from_secs(5),
            session(manager, options, CancellationToken::new())
                .run(ChannelSource(in_rx), ChannelSink(out_tx)),
        )
        .await
        .expect("session finished with input queued");

        let mut frames = Vec::new();
        while let Some(recorded) = out_rx.recv().await {
            frames.push(recorded);
        }
        assert_eq!(frames.len(), 202);
        assert_eq!(frames[0], Recorded::Data(Bytes::from_static(b"line 0\n")));
        assert_eq!(frames[200], Recorded::Data(Bytes::from_static(b"read 200\n")));
        assert_eq!(frames[201], Recorded::Exited(Some(0)));
        drop(in_tx);
    }

    #[tokio::test]
    async fn busy_command_gets_the_latest_terminal_size() {
        let manager = Arc::new(FakeManager::new().with_instance("my-instance"));
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        manager.on_exec(move |mut args| {
            let seen_tx = seen_tx.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let mut resize = args.resize.take().expect("tty");
                let drained = tokio::time::timeout(Duration::from_secs(2), async {
                    while let Some(size) = resize.recv().await {
                        let _ = seen_tx.send(size);
                        if size.width == 89 {
                            break;
                        }
                    }
                })
                .await;
                let exit_code = if drained.is_ok() { 0 } else { 1 };
                Ok::<_, RpaasError>(ExecOutcome {
                    exit_code: Some(exit_code),
                })
            }
            .boxed()
        });

        let (in_tx, in_rx) = mpsc::channel(16);
        for i in 0..10 {
            in_tx
                .send(Inbound::Resize(TerminalSize {
                    width: 80 + i,
                    height: 24,
                }))
                .await
                .unwrap();
        }
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        session(manager, interactive_bash(), CancellationToken::new())
            .run(ChannelSource(in_rx), ChannelSink(out_tx))
            .await;
        assert_eq!(out_rx.recv().await.unwrap(), Recorded::Exited(Some(0)));
        drop(in_tx);

        let mut seen = Vec::new();
        while let Ok(size) = seen_rx.try_recv() {
            seen.push(size);
        }
        assert_eq!(seen.last(), Some(&TerminalSize { width: 89, height: 24 }));
        // the resize channel holds four, the rest collapse into one
        assert!(seen.len() <= 5, "received {:?}", seen);
    }
}
