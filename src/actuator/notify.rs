//! Desktop notifications via `notify-send`

use tokio::process::Command;
use tracing::debug;

use super::Notifier;

/// Replaces its own previous bubble instead of stacking new ones
const SYNC_HINT_PREFIX: &str = "string:x-canonical-private-synchronous:";

#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    tag: String,
    expire_ms: u32,
}

impl DesktopNotifier {
    pub fn new(tag: impl Into<String>, expire_ms: u32) -> Self {
        Self {
            tag: tag.into(),
            expire_ms,
        }
    }

    fn args(&self, title: &str, body: &str) -> Vec<String> {
        vec![
            title.to_string(),
            body.to_string(),
            "-h".to_string(),
            format!("{}{}", SYNC_HINT_PREFIX, self.tag),
            "-t".to_string(),
            self.expire_ms.to_string(),
        ]
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new("volume-knob", 1000)
    }
}

impl Notifier for DesktopNotifier {
    async fn notify(&mut self, title: &str, body: &str) {
        let status = Command::new("notify-send")
            .args(self.args(title, body))
            .kill_on_drop(true)
            .status()
            .await;
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => debug!("notify-send exited with {}", status),
            Err(e) => debug!("notify-send unavailable: {}", e),
        }
    }
}

/// Used when notifications are disabled in the configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    async fn notify(&mut self, title: &str, body: &str) {
        debug!("Notification suppressed: {} {}", title, body);
    }
}
