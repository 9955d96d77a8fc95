//! exec, shell, debug and logs
//!
//! Output is copied to stdout as it arrives. With `--interactive`, stdin is
//! pumped to the session until it hits EOF. The process exits with the
//! remote command's exit code.

use std::process::ExitCode;

use anyhow::Result;
use futures::StreamExt;
use rpaas_client::{Event, ExecSession, RpaasClient, SessionEnd};
use rpaas_models::{ExecOptions, LogOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::cli::SessionArgs;

const STDIN_CHUNK: usize = 4096;

/// Shell that prefers bash when the image has it.
const SHELL: [&str; 3] = [
    "/bin/sh",
    "-c",
    "command -v bash >/dev/null 2>&1 && exec bash || exec sh",
];

/// Terminal size from `COLUMNS`/`LINES`, when the shell exports them.
fn terminal_size() -> (Option<u16>, Option<u16>) {
    let read = |key: &str| std::env::var(key).ok().and_then(|v| v.trim().parse().ok());
    match (read("COLUMNS"), read("LINES")) {
        (Some(width), Some(height)) => (Some(width), Some(height)),
        _ => (None, None),
    }
}

pub fn exec_options(session: SessionArgs, command: Vec<String>, image: Option<String>) -> ExecOptions {
    let (width, height) = if session.tty {
        terminal_size()
    } else {
        (None, None)
    };
    ExecOptions {
        command,
        pod: session.pod,
        container: session.container,
        tty: session.tty,
        interactive: session.interactive,
        width,
        height,
        image,
        ws: true,
    }
}

pub async fn run_exec(
    client: &RpaasClient,
    instance: &str,
    session: SessionArgs,
    command: Vec<String>,
) -> Result<ExitCode> {
    let options = exec_options(session, command, None);
    let session = client.exec(instance, &options).await?;
    attach(session, options.interactive).await
}

pub async fn run_shell(client: &RpaasClient, instance: &str, session: SessionArgs) -> Result<ExitCode> {
    let session = SessionArgs {
        tty: true,
        interactive: true,
        ..session
    };
    let command = SHELL.iter().map(|s| s.to_string()).collect();
    run_exec(client, instance, session, command).await
}

pub async fn run_debug(
    client: &RpaasClient,
    instance: &str,
    session: SessionArgs,
    image: Option<String>,
    command: Vec<String>,
) -> Result<ExitCode> {
    let options = exec_options(session, command, image);
    let session = client.debug(instance, &options).await?;
    attach(session, options.interactive).await
}

/// Pumps stdin and stdout until the remote side closes.
async fn attach(session: ExecSession, interactive: bool) -> Result<ExitCode> {
    let (mut writer, mut reader) = session.split();

    let pump = interactive.then(|| {
        tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = vec![0u8; STDIN_CHUNK];
            loop {
                match stdin.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if writer.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "stdin closed");
                        break;
                    }
                }
            }
            // keep the writer alive; dropping it would cancel the command
            std::future::pending::<()>().await
        })
    });

    let mut stdout = tokio::io::stdout();
    let mut end = SessionEnd::Exited(0);
    while let Some(event) = reader.next().await {
        match event? {
            Event::Output(data) => {
                stdout.write_all(&data).await?;
                stdout.flush().await?;
            }
            Event::Closed(closed) => {
                end = closed;
                break;
            }
        }
    }
    if let Some(pump) = pump {
        pump.abort();
    }

    match &end {
        SessionEnd::Exited(_) => {}
        SessionEnd::Failed(reason) => eprintln!("Error: {}", reason),
        SessionEnd::Shutdown => eprintln!("Error: the control plane is shutting down"),
    }
    Ok(ExitCode::from(end.exit_code().clamp(0, 255) as u8))
}

pub async fn run_logs(client: &RpaasClient, instance: &str, options: LogOptions) -> Result<()> {
    options.validate()?;
    let mut stream = client.log(instance, &options).await?;
    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = stream.next().await {
        stdout.write_all(&chunk?).await?;
        stdout.flush().await?;
    }
    Ok(())
}
