//! Watcher commands: a one-shot sweep and the long-running loop.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use routinewatch_core::{
    CommandSpeaker, Config, LogNotifier, Notifier, SpeechNotifier, Watcher, WatcherConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{open_service, open_store, CmdResult};

/// How long in-flight notifications may finish after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Args)]
pub struct TickArgs {
    /// Only this owner's routines
    #[arg(long)]
    owner: Option<String>,
}

#[derive(Args)]
pub struct WatchArgs {
    /// Override watcher.poll_interval_ms
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

/// Speech if a speak command is configured, the log otherwise.
fn build_notifier(config: &Config) -> Arc<dyn Notifier> {
    match &config.notifier.speak_command {
        Some(program) => {
            let speaker = CommandSpeaker::new(program.clone())
                .with_args(config.notifier.speak_args.clone())
                .with_voice_flag(config.notifier.voice_flag.clone())
                .with_timeout(config.watcher.notify_timeout());
            Arc::new(SpeechNotifier::new(speaker))
        }
        None => Arc::new(LogNotifier),
    }
}

/// Evaluate every routine once, deliver the intents and print them.
pub fn tick(args: TickArgs) -> CmdResult {
    let config = Config::load()?;
    let notifier = build_notifier(&config);
    let refreshed = open_service()?.refresh(args.owner.as_deref())?;

    for intent in &refreshed.intents {
        if let Err(e) = notifier.notify(intent) {
            warn!(routine_id = intent.routine_id(), error = %e, "notification failed");
        }
    }
    if refreshed.failed > 0 {
        warn!(failed = refreshed.failed, "some routines could not be updated; run tick again");
    }
    println!("{}", serde_json::to_string_pretty(&refreshed.intents)?);
    Ok(())
}

/// Run the watcher until Ctrl-C.
pub fn watch(args: WatchArgs) -> CmdResult {
    let config = Config::load()?;
    let mut watcher_config = WatcherConfig::from(&config.watcher);
    if let Some(ms) = args.poll_interval_ms {
        watcher_config.poll_interval = Duration::from_millis(ms.max(1));
    }

    let store = open_store()?;
    let notifier = build_notifier(&config);
    let runtime = tokio::runtime::Runtime::new()?;

    let result =
        runtime.block_on(run_until_interrupted(Watcher::new(store, notifier, watcher_config)));
    // Do not wait on a notifier that is still stuck in a blocking call.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn run_until_interrupted(watcher: Watcher) -> CmdResult {
    let cancel = CancellationToken::new();
    let mut handle = watcher.spawn(cancel.clone());

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "failed to listen for Ctrl-C; stopping");
            }
            info!("interrupt received, stopping watcher");
            cancel.cancel();
        }
        result = &mut handle => return result.map_err(Into::into),
    }
    handle.await?;
    Ok(())
}
