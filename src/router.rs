//! Event routing: chat events in, turns and command handling out.

use crate::backend::BackendAdapter;
use crate::search::SearchAugmentor;
use crate::slack::{ChatEvent, SlackClient};
use crate::streamer::{MessageUpdate, UpdateCoordinator};
use crate::thread::{MentionThread, ThreadStore};
use crate::{Answer, BackendMode};
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// The one user-visible failure text. Internal detail goes to the log only.
const APOLOGY: &str =
    "Sorry — the backend couldn't handle that one. Give it a moment and try again.";

/// Placeholder the reply message starts as while the answer streams in.
const PLACEHOLDER: &str = ":thought_balloon:";

/// Marker appended to a completed streamed reply.
const END_MARKER: &str = " :end:";

/// Shared state for all event handlers. One holder, passed by `Arc`; each
/// mutable field behind its own lock, none held across an await.
pub struct RelayContext {
    pub slack: Arc<SlackClient>,
    pub backend: BackendAdapter,
    pub threads: ThreadStore,
    pub mention_thread: MentionThread,
    pub search: SearchAugmentor,
    pub mode: RwLock<BackendMode>,
    pub internet: AtomicBool,
    pub reset_command: String,
}

impl RelayContext {
    fn mode(&self) -> BackendMode {
        *self.mode.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_mode(&self, mode: BackendMode) {
        *self.mode.write().unwrap_or_else(|e| e.into_inner()) = mode;
    }

    fn internet_enabled(&self) -> bool {
        self.internet.load(Ordering::Relaxed)
    }
}

/// Plain-text commands recognized inside chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reset,
    UseKey,
    UseToken,
    InternetOn,
    InternetOff,
}

/// Exact-match command parsing; anything else is a normal turn.
pub fn parse_command(text: &str) -> Option<Command> {
    match text.trim() {
        "reset" => Some(Command::Reset),
        "usekey" => Some(Command::UseKey),
        "usetoken" => Some(Command::UseToken),
        "ointernet" => Some(Command::InternetOn),
        "cinternet" => Some(Command::InternetOff),
        _ => None,
    }
}

/// Dispatches chat events, one spawned task per event.
pub struct EventRouter {
    ctx: Arc<RelayContext>,
}

impl EventRouter {
    pub fn new(ctx: Arc<RelayContext>) -> Self {
        Self { ctx }
    }

    /// Consume the event stream until it closes.
    pub async fn run(self, mut events: mpsc::Receiver<ChatEvent>) {
        while let Some(event) = events.recv().await {
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                dispatch(ctx, event).await;
            });
        }
    }
}

async fn dispatch(ctx: Arc<RelayContext>, event: ChatEvent) {
    match event {
        ChatEvent::Message {
            channel, ts, text, ..
        } => {
            if let Some(command) = parse_command(&text) {
                if let Err(error) = handle_command(&ctx, &channel, command).await {
                    tracing::error!(%error, channel = %channel, "command handling failed");
                }
            } else if let Err(error) = handle_message_turn(&ctx, &channel, &ts, &text).await {
                tracing::error!(%error, channel = %channel, "turn failed");
                post_apology(&ctx, &channel).await;
            }
        }
        ChatEvent::Mention {
            channel,
            user,
            text,
            ..
        } => {
            handle_mention_turn(&ctx, &channel, &user, &text).await;
        }
        ChatEvent::SlashCommand {
            command, channel, ..
        } => {
            // Already acked at the socket layer per the platform contract.
            if command == ctx.reset_command {
                ctx.mention_thread.reset();
                if let Err(error) = ctx.slack.post_message(&channel, "I reset your session").await
                {
                    tracing::error!(%error, channel = %channel, "failed to confirm slash reset");
                }
            } else {
                tracing::debug!(command = %command, "ignoring unconfigured slash command");
            }
        }
    }
}

/// Apply a mode/flag/reset command and confirm before any AI call is made.
async fn handle_command(
    ctx: &RelayContext,
    channel: &str,
    command: Command,
) -> crate::Result<()> {
    let confirmation = match command {
        Command::Reset => {
            ctx.mention_thread.reset();
            "I reset your session"
        }
        Command::UseKey => {
            ctx.set_mode(BackendMode::Key);
            "Switched to key mode."
        }
        Command::UseToken => {
            ctx.set_mode(BackendMode::Token);
            "Switched to token mode."
        }
        Command::InternetOn => {
            ctx.internet.store(true, Ordering::Relaxed);
            "Internet augmentation enabled."
        }
        Command::InternetOff => {
            ctx.internet.store(false, Ordering::Relaxed);
            "Internet augmentation disabled."
        }
    };
    tracing::info!(channel = %channel, ?command, "command applied");
    ctx.slack.post_message(channel, confirmation).await?;
    Ok(())
}

/// One normal turn: thread position from message metadata, streamed reply
/// edited in place, final metadata persisted on the reply.
async fn handle_message_turn(
    ctx: &Arc<RelayContext>,
    channel: &str,
    ts: &str,
    text: &str,
) -> crate::Result<()> {
    // History or placeholder-post failures are fatal to the turn and
    // propagate to the apology path.
    let thread = ctx.threads.recover(channel, ts).await?;
    let reply = ctx.slack.post_message(channel, PLACEHOLDER).await?;

    let prompt = if ctx.internet_enabled() {
        ctx.search.augment(text).await
    } else {
        text.to_string()
    };
    let mode = ctx.mode();

    let coordinator = UpdateCoordinator::spawn(ctx.slack.clone(), crate::streamer::DEFAULT_WINDOW);
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<Answer>();

    // Forward growing partials into the coordinator; each edit carries the
    // partial's conversation position so even an interrupted turn leaves
    // readable metadata behind.
    let forwarder = {
        let coordinator = coordinator.clone();
        let reply = reply.clone();
        tokio::spawn(async move {
            while let Some(partial) = progress_rx.recv().await {
                coordinator.schedule(MessageUpdate {
                    channel: reply.channel.clone(),
                    ts: reply.ts.clone(),
                    text: partial.text.clone(),
                    metadata: Some(ThreadStore::stamp(&partial)),
                });
            }
        })
    };

    let result = ctx
        .backend
        .send_message(mode, &prompt, &thread, Some(progress_tx))
        .await;

    // The progress sender is dropped once send_message returns, so the
    // forwarder drains every partial before the final edit is scheduled.
    let _ = forwarder.await;

    match result {
        Ok(answer) => {
            tracing::info!(channel = %channel, mode = %mode, "turn completed");
            coordinator
                .finish(MessageUpdate {
                    channel: reply.channel.clone(),
                    ts: reply.ts.clone(),
                    text: format!("{}{}", answer.text, END_MARKER),
                    metadata: Some(ThreadStore::stamp(&answer)),
                })
                .await;
        }
        Err(error) => {
            fail_turn(ctx, mode, channel, &error).await;
        }
    }
    Ok(())
}

/// Mention turn: process-local thread state, no streaming, the reply echoes
/// the question.
async fn handle_mention_turn(ctx: &Arc<RelayContext>, channel: &str, user: &str, question: &str) {
    let thread = ctx.mention_thread.current();
    let prompt = if ctx.internet_enabled() {
        ctx.search.augment(question).await
    } else {
        question.to_string()
    };
    let mode = ctx.mode();

    match ctx.backend.send_message(mode, &prompt, &thread, None).await {
        Ok(answer) => {
            ctx.mention_thread.record(&answer);
            let reply = mention_reply(user, question, &answer.text);
            if let Err(error) = ctx.slack.post_message(channel, &reply).await {
                tracing::error!(%error, channel = %channel, "failed to post mention reply");
            }
        }
        Err(error) => {
            fail_turn(ctx, mode, channel, &error).await;
        }
    }
}

/// Backend failure: log the detail, rotate the proxy pool in Token mode,
/// apologize in the channel.
async fn fail_turn(
    ctx: &RelayContext,
    mode: BackendMode,
    channel: &str,
    error: &crate::error::BackendError,
) {
    tracing::error!(%error, mode = %mode, channel = %channel, "backend request failed");
    if mode == BackendMode::Token {
        let next = ctx.backend.rotate_proxy();
        tracing::info!(endpoint = %next, "rotated to next proxy endpoint");
    }
    post_apology(ctx, channel).await;
}

async fn post_apology(ctx: &RelayContext, channel: &str) {
    if let Err(error) = ctx.slack.post_message(channel, APOLOGY).await {
        tracing::error!(%error, channel = %channel, "failed to post apology");
    }
}

/// Quoted echo of the question ahead of the answer.
fn mention_reply(user: &str, question: &str, answer: &str) -> String {
    format!("<@{user}> You asked:\n>{question}\n{answer}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_exact_matches() {
        assert_eq!(parse_command("reset"), Some(Command::Reset));
        assert_eq!(parse_command("usekey"), Some(Command::UseKey));
        assert_eq!(parse_command("usetoken"), Some(Command::UseToken));
        assert_eq!(parse_command("ointernet"), Some(Command::InternetOn));
        assert_eq!(parse_command("cinternet"), Some(Command::InternetOff));
    }

    #[test]
    fn test_parse_command_trims_whitespace_only() {
        assert_eq!(parse_command("  reset  "), Some(Command::Reset));
        assert_eq!(parse_command("please reset"), None);
        assert_eq!(parse_command("USEKEY"), None);
        assert_eq!(parse_command("what is usekey"), None);
    }

    #[test]
    fn test_mention_reply_quotes_question() {
        let reply = mention_reply("U1", "what time is it?", "It is noon.");
        assert_eq!(reply, "<@U1> You asked:\n>what time is it?\nIt is noon.");
    }
}
