// desktop.rs — Best-effort desktop notifications.
//
// Desktop toasts are a side channel for whoever runs the notifier locally.
// They must never hold up delivery, so `notify` returns immediately and the
// actual `notify-send` process runs on a background task. A missing binary
// or a failing command is logged and otherwise ignored.

use std::io::ErrorKind;

use tokio::process::Command;

/// Toast urgency, as understood by `notify-send -u`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Low,
    Normal,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }
}

/// Fire-and-forget local notification.
pub trait DesktopNotifier: Send + Sync {
    fn notify(&self, title: &str, body: &str, urgency: Urgency);
}

/// Shows notifications by running `notify-send` (or a compatible command).
pub struct NotifySend {
    command: String,
}

impl NotifySend {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn args(title: &str, body: &str, urgency: Urgency) -> Vec<String> {
        vec![
            "-u".to_string(),
            urgency.as_str().to_string(),
            "-i".to_string(),
            "video-display".to_string(),
            title.to_string(),
            body.to_string(),
        ]
    }
}

impl Default for NotifySend {
    fn default() -> Self {
        Self::new("notify-send")
    }
}

impl DesktopNotifier for NotifySend {
    fn notify(&self, title: &str, body: &str, urgency: Urgency) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime, skipping desktop notification");
            return;
        };

        let command = self.command.clone();
        let args = Self::args(title, body, urgency);
        runtime.spawn(async move {
            match Command::new(&command).args(&args).status().await {
                Ok(status) if status.success() => {
                    tracing::debug!("desktop notification sent");
                }
                Ok(status) => {
                    tracing::warn!("failed to send desktop notification: {} exited with {}", command, status);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::warn!("desktop notifications unavailable: {} not found", command);
                }
                Err(e) => {
                    tracing::warn!("failed to send desktop notification: {}", e);
                }
            }
        });
    }
}

/// Discards every notification.
pub struct NullNotifier;

impl DesktopNotifier for NullNotifier {
    fn notify(&self, _title: &str, _body: &str, _urgency: Urgency) {}
}
