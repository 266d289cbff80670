use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    error::ChannelError,
    message::{SurfaceId, SurfaceMessage},
    surface::{Surface, SurfaceCommand},
};

/// A surface rendered by a child process.
///
/// Commands go to the child's stdin as one JSON object per line
/// (see [`SurfaceCommand`]); every non-empty line the child writes on stdout
/// is an inbound surface message. Stdout belongs to this child only, so each
/// line is stamped with this surface's id.
pub struct ProcessSurface {
    id: SurfaceId,
    tx: mpsc::UnboundedSender<SurfaceCommand>,
    visible: AtomicBool,
}

impl ProcessSurface {
    /// Launch `exe_path` with `args` and wire its stdio.
    pub async fn spawn<P: AsRef<Path>>(
        id: SurfaceId,
        exe_path: P,
        args: &[String],
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SurfaceMessage>), ChannelError> {
        // ── launch ───────────────────────────────────────────────────────
        let mut child = TokioCommand::new(exe_path.as_ref())
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChannelError::SurfaceClosed(id.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ChannelError::SurfaceClosed(id.to_string()))?;

        // ── commands → child.stdin ───────────────────────────────────────
        let (tx, mut rx) = mpsc::unbounded_channel::<SurfaceCommand>();
        let writer_id = id.clone();
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                let line = match serde_json::to_string(&cmd) {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(
                            surface = %writer_id,
                            error = %err,
                            "could not encode surface command"
                        );
                        continue;
                    }
                };
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                let _ = stdin.write_all(b"\n").await;
                let _ = stdin.flush().await;
            }
            debug!(surface = %writer_id, "surface writer stopped");
        });

        // ── child.stdout → inbound queue ─────────────────────────────────
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let reader_id = id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                if in_tx.send(SurfaceMessage::new(reader_id.clone(), line)).is_err() {
                    break;
                }
            }
            debug!(surface = %reader_id, "surface process closed its output");
            let _ = child.kill().await;
        });

        let surface = Arc::new(Self {
            id,
            tx,
            visible: AtomicBool::new(true),
        });
        Ok((surface, in_rx))
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn command(&self, cmd: SurfaceCommand) -> Result<(), ChannelError> {
        self.tx
            .send(cmd)
            .map_err(|_| ChannelError::SurfaceClosed(self.id.to_string()))
    }
}

#[async_trait]
impl Surface for ProcessSurface {
    fn id(&self) -> &SurfaceId {
        &self.id
    }

    async fn navigate(&self, uri: &str) -> Result<(), ChannelError> {
        self.command(SurfaceCommand::Navigate { uri: uri.to_string() })
    }

    async fn post(&self, body: String) -> Result<(), ChannelError> {
        let message: Value = serde_json::from_str(&body)?;
        self.command(SurfaceCommand::Post { message })
    }

    fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
        if let Err(err) = self.command(SurfaceCommand::Visible { visible }) {
            debug!(surface = %self.id, error = %err, "visibility change not delivered");
        }
    }
}
