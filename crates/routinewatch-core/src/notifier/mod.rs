//! Notification boundary.
//!
//! The watcher hands every [`Intent`] to a [`Notifier`] on a detached task.
//! Whatever a notifier does (log, push to a channel, speak through an
//! external program) it must report failures through [`NotifyError`] and
//! never panic the caller.

mod speech;

pub use speech::{CommandSpeaker, Speaker, SpeechNotifier, Voice};

use tokio::sync::mpsc;
use tracing::info;

use crate::error::NotifyError;
use crate::intent::Intent;

/// Consumes intents and turns them into user-facing output.
///
/// Called from a blocking thread, so implementations may block.
pub trait Notifier: Send + Sync {
    fn notify(&self, intent: &Intent) -> Result<(), NotifyError>;
}

/// Writes every intent to the log. Used when no output device is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, intent: &Intent) -> Result<(), NotifyError> {
        info!(
            routine_id = intent.routine_id(),
            kind = intent.kind(),
            "{}",
            intent.message()
        );
        Ok(())
    }
}

/// Forwards intents to an async receiver (a UI, a push gateway, a test).
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Intent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Intent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, intent: &Intent) -> Result<(), NotifyError> {
        self.tx
            .send(intent.clone())
            .map_err(|_| NotifyError::ChannelClosed)
    }
}
