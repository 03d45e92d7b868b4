//! Streaming update coordinator.
//!
//! Partial answers can arrive far faster than a chat platform tolerates
//! edits. The coordinator buffers the most recent update for a reply
//! message and flushes it once a quiescence window elapses with no newer
//! update superseding it. The final update of a turn goes through the same
//! window but its flush is awaited, so turn completion is gated on the last
//! edit actually landing.

use crate::slack::{MessageMetadata, SlackClient};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Quiescence window between accepted updates and the edit call.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(400);

/// One scheduled edit of a reply message. `metadata` carries the turn's
/// conversation position on every edit, intermediate or final.
#[derive(Debug, Clone)]
pub struct MessageUpdate {
    pub channel: String,
    pub ts: String,
    pub text: String,
    pub metadata: Option<MessageMetadata>,
}

/// Seam between the coordinator and the platform's edit API, so tests can
/// observe flushes without a network.
pub trait EditSink: Send + Sync + 'static {
    fn apply(
        &self,
        update: MessageUpdate,
    ) -> impl Future<Output = crate::Result<()>> + Send;
}

impl EditSink for Arc<SlackClient> {
    async fn apply(&self, update: MessageUpdate) -> crate::Result<()> {
        self.update_message(
            &update.channel,
            &update.ts,
            &update.text,
            update.metadata.as_ref(),
        )
        .await?;
        Ok(())
    }
}

enum Command {
    Schedule(MessageUpdate),
    Finish(MessageUpdate, oneshot::Sender<()>),
}

/// Handle to a per-turn coalescing task.
#[derive(Clone)]
pub struct UpdateCoordinator {
    tx: mpsc::UnboundedSender<Command>,
}

impl UpdateCoordinator {
    /// Spawn the coalescing task over `sink`.
    pub fn spawn<S: EditSink>(sink: S, window: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_loop(sink, window, rx));
        Self { tx }
    }

    /// Accept an intermediate update. Rapid successive calls coalesce: only
    /// the latest survives the quiescence window.
    pub fn schedule(&self, update: MessageUpdate) {
        let _ = self.tx.send(Command::Schedule(update));
    }

    /// Accept the turn's final update and wait until it has been flushed.
    pub async fn finish(&self, update: MessageUpdate) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Finish(update, done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_loop<S: EditSink>(
    sink: S,
    window: Duration,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut pending: Option<(MessageUpdate, Option<oneshot::Sender<()>>)> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        // With nothing pending, park the timer arm far in the future.
        let sleep_until = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Schedule(update)) => {
                    // Supersede the pending update but carry any un-acked
                    // finish notifier forward.
                    let notifier = pending.take().and_then(|(_, n)| n);
                    pending = Some((update, notifier));
                    deadline = Some(Instant::now() + window);
                }
                Some(Command::Finish(update, done)) => {
                    pending = Some((update, Some(done)));
                    deadline = Some(Instant::now() + window);
                }
                None => break,
            },
            _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                flush(&sink, &mut pending).await;
                deadline = None;
            }
        }
    }

    // Sender side gone: the last scheduled update must still land.
    flush(&sink, &mut pending).await;
}

async fn flush<S: EditSink>(
    sink: &S,
    pending: &mut Option<(MessageUpdate, Option<oneshot::Sender<()>>)>,
) {
    let Some((update, notifier)) = pending.take() else {
        return;
    };
    // Best-effort: an edit failure never aborts the in-flight turn.
    if let Err(error) = sink.apply(update).await {
        tracing::warn!(%error, "failed to edit reply message");
    }
    if let Some(notifier) = notifier {
        let _ = notifier.send(());
    }
}
