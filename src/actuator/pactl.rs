//! PulseAudio / PipeWire backend via `pactl`

use tokio::process::Command;
use tracing::{debug, warn};

use super::{Actuator, ActuatorError};

pub const DEFAULT_SINK: &str = "@DEFAULT_SINK@";

#[derive(Debug, Clone)]
pub struct PactlActuator {
    sink: String,
}

impl PactlActuator {
    pub fn new(sink: impl Into<String>) -> Self {
        Self { sink: sink.into() }
    }

    pub fn sink(&self) -> &str {
        &self.sink
    }

    async fn run(&self, args: &[&str]) -> Result<String, ActuatorError> {
        debug!("Running pactl {}", args.join(" "));
        let output = Command::new("pactl")
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ActuatorError::Unavailable(format!("failed to run pactl: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("pactl {} failed: {}", args.join(" "), stderr.trim());
            return Err(ActuatorError::Unavailable(format!(
                "pactl exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for PactlActuator {
    fn default() -> Self {
        Self::new(DEFAULT_SINK)
    }
}

impl Actuator for PactlActuator {
    async fn get_volume(&mut self) -> Result<u8, ActuatorError> {
        let output = self.run(&["get-sink-volume", self.sink.as_str()]).await?;
        parse_volume(&output).ok_or(ActuatorError::UnexpectedOutput(output))
    }

    async fn set_volume(&mut self, percent: u8) -> Result<(), ActuatorError> {
        let value = format!("{}%", percent.min(100));
        self.run(&["set-sink-volume", self.sink.as_str(), value.as_str()]).await?;
        Ok(())
    }

    async fn toggle_mute(&mut self) -> Result<(), ActuatorError> {
        self.run(&["set-sink-mute", self.sink.as_str(), "toggle"]).await?;
        Ok(())
    }

    async fn is_muted(&mut self) -> Result<bool, ActuatorError> {
        let output = self.run(&["get-sink-mute", self.sink.as_str()]).await?;
        parse_mute(&output).ok_or(ActuatorError::UnexpectedOutput(output))
    }
}

/// Reads the first channel percentage from `pactl get-sink-volume`
///
/// `Volume: front-left: 65536 / 100% / 0.00 dB, front-right: ...`
/// Over-amplified sinks report more than 100%, which is capped.
pub fn parse_volume(output: &str) -> Option<u8> {
    output
        .split(['/', ','])
        .map(str::trim)
        .find_map(|part| part.strip_suffix('%')?.trim().parse::<u32>().ok())
        .map(|percent| percent.min(100) as u8)
}

/// `Mute: yes` or `Mute: no`
pub fn parse_mute(output: &str) -> Option<bool> {
    let state = output.trim().strip_prefix("Mute:")?.trim();
    match state {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}
