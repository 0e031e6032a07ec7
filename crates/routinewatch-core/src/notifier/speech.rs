//! Spoken notifications.
//!
//! A routine's [`Personality`] picks the voice here, at the edge, and
//! nowhere else.

use std::process::Command;
use std::time::{Duration, Instant};

use super::Notifier;
use crate::error::NotifyError;
use crate::intent::Intent;
use crate::routine::Personality;

/// Neural voice name understood by the speech backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice(pub &'static str);

impl Voice {
    pub const DEFAULT: Voice = Voice("en-US-GuyNeural");

    pub fn for_personality(personality: &Personality) -> Self {
        match personality {
            Personality::Hood | Personality::Default => Voice::DEFAULT,
            Personality::Calm => Voice("en-US-AriaNeural"),
            Personality::Strict => Voice("en-US-SteffanNeural"),
            Personality::Motivational => Voice("en-US-DavisNeural"),
            Personality::Other(_) => Voice::DEFAULT,
        }
    }

    pub fn name(self) -> &'static str {
        self.0
    }
}

/// Capability to say something out loud.
pub trait Speaker: Send + Sync {
    fn speak(&self, text: &str, voice: Voice) -> Result<(), NotifyError>;
}

/// Speaks intents through a [`Speaker`].
///
/// Reminders use the routine's personality voice; misses use the default.
pub struct SpeechNotifier<S> {
    speaker: S,
}

impl<S: Speaker> SpeechNotifier<S> {
    pub fn new(speaker: S) -> Self {
        Self { speaker }
    }
}

impl<S: Speaker> Notifier for SpeechNotifier<S> {
    fn notify(&self, intent: &Intent) -> Result<(), NotifyError> {
        let voice = match intent {
            Intent::ReminderFire { personality, .. } => Voice::for_personality(personality),
            Intent::Missed { .. } => Voice::DEFAULT,
        };
        self.speaker.speak(&intent.message(), voice)
    }
}

/// How often a running speech process is checked for exit.
const POLL_EXIT_EVERY: Duration = Duration::from_millis(20);

/// Runs an external text-to-speech program and waits for it to finish.
///
/// Invoked as `<program> <args...> [<voice_flag> <voice>] <text>`. A
/// process still running after the timeout is killed.
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
    voice_flag: Option<String>,
    timeout: Option<Duration>,
}

impl CommandSpeaker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            voice_flag: None,
            timeout: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_voice_flag(mut self, flag: Option<String>) -> Self {
        self.voice_flag = flag;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn command(&self, text: &str, voice: Voice) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(flag) = &self.voice_flag {
            cmd.arg(flag).arg(voice.name());
        }
        cmd.arg(text);
        cmd
    }
}

impl Speaker for CommandSpeaker {
    fn speak(&self, text: &str, voice: Voice) -> Result<(), NotifyError> {
        let delivery = |e: std::io::Error| NotifyError::Delivery(format!("{}: {e}", self.program));
        let mut child = self.command(text, voice).spawn().map_err(delivery)?;
        let deadline = self.timeout.map(|t| (Instant::now() + t, t));

        let status = loop {
            if let Some(status) = child.try_wait().map_err(delivery)? {
                break status;
            }
            if let Some((deadline, timeout)) = deadline {
                if Instant::now() >= deadline {
                    // kill() errors if the process exited meanwhile.
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(NotifyError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
            std::thread::sleep(POLL_EXIT_EVERY);
        };

        if status.success() {
            Ok(())
        } else {
            Err(NotifyError::Delivery(format!(
                "{} exited with {status}",
                self.program
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSpeaker {
        said: Mutex<Vec<(String, Voice)>>,
    }

    impl Speaker for &RecordingSpeaker {
        fn speak(&self, text: &str, voice: Voice) -> Result<(), NotifyError> {
            self.said.lock().unwrap().push((text.to_string(), voice));
            Ok(())
        }
    }

    #[test]
    fn personality_selects_voice() {
        assert_eq!(Voice::for_personality(&Personality::Calm).name(), "en-US-AriaNeural");
        assert_eq!(Voice::for_personality(&Personality::Strict).name(), "en-US-SteffanNeural");
        assert_eq!(
            Voice::for_personality(&Personality::Other("pirate".into())),
            Voice::DEFAULT
        );
    }

    #[test]
    fn reminder_is_spoken_in_personality_voice() {
        let speaker = RecordingSpeaker::default();
        let notifier = SpeechNotifier::new(&speaker);
        notifier
            .notify(&Intent::ReminderFire {
                routine_id: 1,
                title: "Workout".into(),
                personality: Personality::Motivational,
            })
            .unwrap();

        let said = speaker.said.lock().unwrap();
        assert_eq!(said.len(), 1);
        assert_eq!(said[0].0, "Yo! Workout is coming up. Don't forget!");
        assert_eq!(said[0].1.name(), "en-US-DavisNeural");
    }

    #[test]
    fn command_line_places_voice_before_text() {
        let speaker = CommandSpeaker::new("say")
            .with_args(vec!["-r".into(), "180".into()])
            .with_voice_flag(Some("-v".into()));
        let cmd = speaker.command("hello", Voice::DEFAULT);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["-r", "180", "-v", "en-US-GuyNeural", "hello"]);
    }

    #[cfg(unix)]
    #[test]
    fn hung_speech_process_is_killed_at_timeout() {
        let speaker = CommandSpeaker::new("sh")
            .with_args(vec!["-c".into(), "exec sleep 30".into(), "sh".into()])
            .with_timeout(Duration::from_millis(100));
        let started = Instant::now();
        assert!(matches!(
            speaker.speak("hi", Voice::DEFAULT),
            Err(NotifyError::Timeout { timeout_ms: 100 })
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn finished_speech_process_is_ok() {
        let speaker = CommandSpeaker::new("true").with_timeout(Duration::from_secs(5));
        assert!(speaker.speak("hi", Voice::DEFAULT).is_ok());
    }

    #[test]
    fn missing_program_is_a_delivery_error() {
        let speaker = CommandSpeaker::new("routinewatch-no-such-speaker-binary");
        assert!(matches!(
            speaker.speak("hi", Voice::DEFAULT),
            Err(NotifyError::Delivery(_))
        ));
    }
}
