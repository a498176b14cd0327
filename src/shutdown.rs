use std::{
    fmt,
    io::{self, BufRead},
    thread,
};

use anyhow::{Context, Result};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::oneshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    Keypress,
    Signal(&'static str),
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keypress => f.write_str("keypress"),
            Self::Signal(name) => f.write_str(name),
        }
    }
}

/// True for a line asking the agent to stop.
pub fn is_quit_line(line: &str) -> bool {
    matches!(line.trim(), "q" | "Q")
}

/// Resolves on the first of: `q` + Enter on stdin, SIGINT, SIGTERM.
///
/// stdin is read on a detached OS thread so a blocked read never holds up
/// runtime shutdown. End of input stops the watcher without triggering.
pub async fn wait_for_shutdown() -> Result<ShutdownTrigger> {
    let mut sigint = signal(SignalKind::interrupt()).context("unable to listen for SIGINT")?;
    let mut sigterm = signal(SignalKind::terminate()).context("unable to listen for SIGTERM")?;
    let keypress = spawn_stdin_watcher()?;
    let keypress = async move {
        if keypress.await.is_err() {
            tracing::debug!(target: "agent", "stdin_watch_ended");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => Ok(ShutdownTrigger::Signal("SIGINT")),
        _ = sigterm.recv() => Ok(ShutdownTrigger::Signal("SIGTERM")),
        _ = keypress => Ok(ShutdownTrigger::Keypress),
    }
}

fn spawn_stdin_watcher() -> Result<oneshot::Receiver<()>> {
    let (tx, rx) = oneshot::channel();
    thread::Builder::new()
        .name("stdin-watch".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) if is_quit_line(&line) => {
                        let _ = tx.send(());
                        return;
                    }
                    Ok(_) => {}
                    Err(_) => return,
                }
            }
        })
        .context("failed to spawn stdin watcher thread")?;
    Ok(rx)
}
