//! Wiring between an attached Kubernetes process and an exec session

use anyhow::Context;
use futures::{SinkExt, Stream, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{AttachParams, AttachedProcess, TerminalSize as KubeTerminalSize};
use rpaas_models::{ExecOptions, Result, RpaasError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tracing::debug;

use crate::manager::{BoxedWriter, ExecArgs, ExecOutcome};

pub fn attach_params(options: &ExecOptions, container: &str) -> AttachParams {
    AttachParams::default()
        .container(container)
        .stdin(options.interactive)
        .stdout(true)
        // a TTY merges stderr into stdout; kube rejects both at once
        .stderr(!options.tty)
        .tty(options.tty)
}

/// Pumps IO between the session and the remote process until the command
/// ends or the session is cancelled.
pub async fn run_attached(mut process: AttachedProcess, args: ExecArgs) -> Result<ExecOutcome> {
    let ExecArgs {
        options,
        stdin,
        mut stdout,
        mut stderr,
        resize,
        cancel,
    } = args;

    let mut resize_task = None;
    if let Some(mut sizer) = process.terminal_size() {
        if let Some(size) = options.terminal_size() {
            let _ = sizer
                .send(KubeTerminalSize {
                    width: size.width,
                    height: size.height,
                })
                .await;
        }
        if let Some(mut resize) = resize {
            resize_task = Some(tokio::spawn(async move {
                while let Some(size) = resize.recv().await {
                    let update = KubeTerminalSize {
                        width: size.width,
                        height: size.height,
                    };
                    if sizer.send(update).await.is_err() {
                        break;
                    }
                }
            }));
        }
    }

    let stdin_task = match (stdin, process.stdin()) {
        (Some(mut input), Some(mut remote)) => Some(tokio::spawn(async move {
            if let Err(e) = tokio::io::copy(&mut input, &mut remote).await {
                debug!(error = %e, "stdin copy ended");
            }
            let _ = remote.shutdown().await;
        })),
        _ => None,
    };

    let status = process.take_status();
    let mut remote_out = process.stdout();
    let mut remote_err = process.stderr();

    let pump = async {
        let out = async {
            if let Some(reader) = remote_out.as_mut() {
                tokio::io::copy(reader, &mut stdout).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let err = async {
            if let Some(reader) = remote_err.as_mut() {
                tokio::io::copy(reader, &mut stderr).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (out, err) = tokio::join!(out, err);
        out.and(err)
    };

    let cancelled = tokio::select! {
        _ = cancel.cancelled() => true,
        result = pump => {
            if let Err(e) = result {
                // the peer went away; nothing left to deliver
                debug!(error = %e, "exec output copy ended");
            }
            false
        }
    };

    if let Some(task) = stdin_task {
        task.abort();
    }
    if let Some(task) = resize_task {
        task.abort();
    }

    if cancelled {
        process.abort();
        return Ok(ExecOutcome::default());
    }

    let outcome = match status {
        Some(status) => outcome_from_status(status.await)?,
        None => ExecOutcome::default(),
    };
    process
        .join()
        .await
        .context("Failed to join remote process")?;
    Ok(outcome)
}

/// Interprets the final status object sent by the kubelet.
pub fn outcome_from_status(status: Option<Status>) -> Result<ExecOutcome> {
    let Some(status) = status else {
        return Ok(ExecOutcome::default());
    };
    if status.status.as_deref() == Some("Success") {
        return Ok(ExecOutcome::success());
    }
    if status.reason.as_deref() == Some("NonZeroExitCode") {
        let code = status
            .details
            .as_ref()
            .and_then(|d| d.causes.as_ref())
            .and_then(|causes| {
                causes
                    .iter()
                    .find(|c| c.reason.as_deref() == Some("ExitCode"))
                    .and_then(|c| c.message.as_deref())
                    .and_then(|m| m.parse::<i32>().ok())
            });
        return Ok(ExecOutcome {
            exit_code: code.or(Some(1)),
        });
    }
    Err(RpaasError::Internal(anyhow::anyhow!(
        "remote command failed: {}",
        status.message.unwrap_or_else(|| "unknown error".to_string())
    )))
}

/// Line stream of one pod log, prefixed with the pod name when `prefix` is set.
pub fn log_lines<R>(reader: R, prefix: Option<String>) -> impl Stream<Item = std::io::Result<String>>
where
    R: AsyncBufRead + Unpin,
{
    futures::stream::unfold(Some(reader.lines()), move |lines| {
        let prefix = prefix.clone();
        async move {
            let mut lines = lines?;
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = match prefix {
                        Some(prefix) => format!("[{}] {}\n", prefix, line),
                        None => format!("{}\n", line),
                    };
                    Some((Ok(line), Some(lines)))
                }
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        }
    })
}

/// Copies merged log lines into the sink until every stream ends or the
/// session is cancelled. A closed sink ends the copy quietly.
pub async fn copy_logs<S>(
    mut lines: S,
    sink: &mut BoxedWriter,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<()>
where
    S: Stream<Item = std::io::Result<String>> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = lines.next() => match next {
                Some(Ok(line)) => {
                    if let Err(e) = sink.write_all(line.as_bytes()).await {
                        debug!(error = %e, "log sink closed");
                        return Ok(());
                    }
                }
                Some(Err(e)) => {
                    return Err(RpaasError::Internal(
                        anyhow::Error::new(e).context("Failed to read pod log"),
                    ))
                }
                None => return Ok(()),
            }
        }
    }
}
