//! Volume backend and notification seams
//!
//! The service loop only talks to [`Actuator`] and [`Notifier`]. The
//! production implementations shell out to `pactl` and `notify-send`;
//! tests plug in recording fakes.

pub mod notify;
pub mod pactl;

pub use notify::{DesktopNotifier, SilentNotifier};
pub use pactl::PactlActuator;

use std::future::Future;

use tracing::{debug, info};

use crate::mapping::ActionRequest;

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("Volume backend unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected backend output: {0}")]
    UnexpectedOutput(String),
}

/// Audio volume backend
pub trait Actuator: Send {
    /// Current volume in percent, 0 to 100
    fn get_volume(&mut self) -> impl Future<Output = Result<u8, ActuatorError>> + Send;

    fn set_volume(&mut self, percent: u8) -> impl Future<Output = Result<(), ActuatorError>> + Send;

    fn toggle_mute(&mut self) -> impl Future<Output = Result<(), ActuatorError>> + Send;

    fn is_muted(&mut self) -> impl Future<Output = Result<bool, ActuatorError>> + Send;
}

/// Best-effort user feedback; implementations swallow their own failures
pub trait Notifier: Send {
    fn notify(&mut self, title: &str, body: &str) -> impl Future<Output = ()> + Send;
}

/// What an applied action ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    VolumeSet(u8),
    Muted(bool),
}

/// Clamps `current + delta` into 0..=100
pub fn clamp_volume(current: u8, delta: i32) -> u8 {
    (i32::from(current).saturating_add(delta)).clamp(0, 100) as u8
}

/// Executes one action against the backend and reports it to the user
pub async fn apply_action<A: Actuator, N: Notifier>(
    actuator: &mut A,
    notifier: &mut N,
    request: ActionRequest,
) -> Result<ActionOutcome, ActuatorError> {
    match request {
        ActionRequest::VolumeDelta(delta) => {
            let current = actuator.get_volume().await?;
            let target = clamp_volume(current, delta);
            debug!("Volume {}% {:+} -> {}%", current, delta, target);
            actuator.set_volume(target).await?;
            info!("Volume set to {}%", target);

            let icon = if target > 0 { "🔊" } else { "🔇" };
            notifier
                .notify("Volume", &format!("{} {}%", icon, target))
                .await;
            Ok(ActionOutcome::VolumeSet(target))
        }
        ActionRequest::ToggleMute => {
            actuator.toggle_mute().await?;
            let muted = actuator.is_muted().await?;
            info!("Audio {}", if muted { "muted" } else { "unmuted" });

            let status = if muted { "🔇 Muted" } else { "🔊 Unmuted" };
            notifier.notify("Audio", status).await;
            Ok(ActionOutcome::Muted(muted))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeActuator, RecordingNotifier};
    use super::*;

    #[test]
    fn clamps_into_percent_range() {
        assert_eq!(clamp_volume(50, 2), 52);
        assert_eq!(clamp_volume(99, 6), 100);
        assert_eq!(clamp_volume(1, -4), 0);
        assert_eq!(clamp_volume(100, i32::MIN), 0);
    }

    #[tokio::test]
    async fn volume_delta_sets_clamped_volume_and_notifies() {
        let mut actuator = FakeActuator::at(99);
        let mut notifier = RecordingNotifier::default();

        let outcome = apply_action(&mut actuator, &mut notifier, ActionRequest::VolumeDelta(6))
            .await
            .unwrap();

        assert_eq!(outcome, ActionOutcome::VolumeSet(100));
        assert_eq!(actuator.set_calls, vec![100]);
        assert_eq!(
            notifier.sent,
            vec![("Volume".to_string(), "🔊 100%".to_string())]
        );
    }

    #[tokio::test]
    async fn zero_volume_uses_muted_icon() {
        let mut actuator = FakeActuator::at(2);
        let mut notifier = RecordingNotifier::default();
        apply_action(&mut actuator, &mut notifier, ActionRequest::VolumeDelta(-4))
            .await
            .unwrap();
        assert_eq!(notifier.sent[0].1, "🔇 0%");
    }

    #[tokio::test]
    async fn toggle_mute_reports_new_state() {
        let mut actuator = FakeActuator::at(40);
        let mut notifier = RecordingNotifier::default();

        let outcome = apply_action(&mut actuator, &mut notifier, ActionRequest::ToggleMute)
            .await
            .unwrap();

        assert_eq!(outcome, ActionOutcome::Muted(true));
        assert_eq!(actuator.toggle_calls, 1);
        assert!(actuator.set_calls.is_empty());
        assert_eq!(notifier.sent[0], ("Audio".to_string(), "🔇 Muted".to_string()));
    }

    #[tokio::test]
    async fn unavailable_backend_skips_set_and_notification() {
        let mut actuator = FakeActuator {
            unavailable: true,
            ..FakeActuator::at(50)
        };
        let mut notifier = RecordingNotifier::default();

        let result = apply_action(&mut actuator, &mut notifier, ActionRequest::VolumeDelta(2)).await;

        assert!(matches!(result, Err(ActuatorError::Unavailable(_))));
        assert!(actuator.set_calls.is_empty());
        assert!(notifier.sent.is_empty());
    }
}
