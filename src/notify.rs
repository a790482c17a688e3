//! User-facing notifications: the notifier capability and its built-ins.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Sound cues a front end can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sound {
    Activated,
    Success,
    Error,
    Warmup,
    Notification,
}

impl Sound {
    /// Packaged asset path for this cue.
    pub fn asset(self) -> &'static str {
        match self {
            Sound::Activated => "audio/active.mp3",
            Sound::Success => "audio/success.mp3",
            Sound::Error => "audio/error.mp3",
            Sound::Warmup => "audio/warmup.mp3",
            Sound::Notification => "audio/notif.mp3",
        }
    }
}

/// A system notification with its accompanying sound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub sound: Sound,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>, sound: Sound) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            sound,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

/// Surfaces notifications and plays sounds.
///
/// Fire-and-forget: implementations must not block and have no way to report
/// failure back to the engine.
pub trait Notifier: Send + Sync + 'static {
    /// Show `notification` and play its sound.
    fn notify(&self, notification: Notification);

    /// Play a sound without a visible notification.
    fn play(&self, sound: Sound);
}

/// Notifier that writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        tracing::info!(
            title = %notification.title,
            sound = notification.sound.asset(),
            "{}",
            notification.message
        );
    }

    fn play(&self, sound: Sound) {
        tracing::debug!(sound = sound.asset(), "play sound");
    }
}

/// Something a [`RecordingNotifier`] observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Notified(Notification),
    Played(Sound),
}

/// Notifier that keeps everything it receives, for inspection in tests and
/// embedders that render notifications themselves.
///
/// `Clone` shares the underlying log.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    log: Arc<Mutex<Vec<Recorded>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, oldest first.
    pub fn recorded(&self) -> Vec<Recorded> {
        self.lock().clone()
    }

    /// Titles of recorded notifications, oldest first.
    pub fn titles(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::Notified(n) => Some(n.title.clone()),
                Recorded::Played(_) => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Recorded>> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.lock().push(Recorded::Notified(notification));
    }

    fn play(&self, sound: Sound) {
        self.lock().push(Recorded::Played(sound));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sound_assets_match_packaged_files() {
        assert_eq!(Sound::Activated.asset(), "audio/active.mp3");
        assert_eq!(Sound::Notification.asset(), "audio/notif.mp3");
    }

    #[test]
    fn sound_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Sound::Warmup).unwrap(), "warmup");
    }

    #[test]
    fn recording_notifier_keeps_order() {
        let notifier = RecordingNotifier::new();
        let observer = notifier.clone();
        notifier.play(Sound::Warmup);
        notifier.notify(Notification::new("Bet placed", "BET-1 placed successfully.", Sound::Success));

        assert_eq!(
            observer.recorded(),
            vec![
                Recorded::Played(Sound::Warmup),
                Recorded::Notified(Notification::new(
                    "Bet placed",
                    "BET-1 placed successfully.",
                    Sound::Success
                )),
            ]
        );
        assert_eq!(observer.titles(), vec!["Bet placed".to_owned()]);
    }

    #[test]
    fn notification_display_joins_title_and_message() {
        let n = Notification::new("Error", "boom", Sound::Error);
        assert_eq!(n.to_string(), "Error: boom");
    }
}
