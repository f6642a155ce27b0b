//! Turns raw source payloads into signed wheel ticks
//!
//! Two payload shapes are understood:
//!
//! - **Device records**: only horizontal wheel motion (`EV_REL` with
//!   `REL_HWHEEL` or `REL_HWHEEL_HI_RES`) is significant. High resolution
//!   values are scaled down by the configured divisor, truncating toward zero.
//!   A mute key press becomes [`NormalizedInput::MuteToggle`].
//! - **Command lines**: a line must name one of the allow-listed media key
//!   codes and carry a direction marker (`down` wins over `up`).
//!
//! Everything else is discarded without error. Only payloads that cannot be
//! decoded at all produce [`NormalizeError::Malformed`].

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::input::line::MAX_LINE_LENGTH;
use crate::input::record::{
    InputRecord, EV_KEY, EV_REL, INPUT_RECORD_SIZE, KEY_MUTE, KEY_RESERVED, REL_HWHEEL,
    REL_HWHEEL_HI_RES,
};
use crate::input::source::{RawEvent, SourceKind};

/// One unit (or several) of knob rotation; `delta` is never zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedTick {
    timestamp: Instant,
    delta: i32,
}

impl NormalizedTick {
    /// Returns `None` for a zero delta
    pub fn new(timestamp: Instant, delta: i32) -> Option<Self> {
        (delta != 0).then_some(Self { timestamp, delta })
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn delta(&self) -> i32 {
        self.delta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizedInput {
    Tick(NormalizedTick),
    MuteToggle { timestamp: Instant },
}

impl NormalizedInput {
    pub fn timestamp(&self) -> Instant {
        match self {
            NormalizedInput::Tick(tick) => tick.timestamp(),
            NormalizedInput::MuteToggle { timestamp } => *timestamp,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Malformed {origin} event ({length} bytes): {message}")]
    Malformed {
        origin: SourceKind,
        length: usize,
        message: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NormalizerSettings {
    /// Scale-down factor for high resolution wheel values
    pub hires_divisor: i32,
    /// Key codes that identify media-key lines from the command source
    pub media_key_codes: Vec<String>,
    /// Device key code that toggles mute, `0` (`KEY_RESERVED`) disables it
    pub mute_key: u16,
    /// Key code text that toggles mute on the command source
    pub mute_key_code: Option<String>,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            hires_divisor: 120,
            media_key_codes: ["165", "166", "167", "163", "164"]
                .into_iter()
                .map(String::from)
                .collect(),
            mute_key: KEY_MUTE,
            mute_key_code: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Normalizer {
    settings: NormalizerSettings,
}

impl Normalizer {
    pub fn new(settings: NormalizerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &NormalizerSettings {
        &self.settings
    }

    pub fn normalize(&self, event: &RawEvent) -> Result<Option<NormalizedInput>, NormalizeError> {
        match event.origin {
            SourceKind::Device => self.normalize_record(event),
            SourceKind::Command => self.normalize_line(event),
        }
    }

    fn normalize_record(&self, event: &RawEvent) -> Result<Option<NormalizedInput>, NormalizeError> {
        let record = InputRecord::parse(&event.bytes).ok_or_else(|| NormalizeError::Malformed {
            origin: event.origin,
            length: event.len(),
            message: format!("expected {} bytes", INPUT_RECORD_SIZE),
        })?;

        match (record.event_type, record.code) {
            (EV_REL, REL_HWHEEL | REL_HWHEEL_HI_RES) => {
                let delta = self.wheel_delta(record.code, record.value);
                if let Some(time) = record.kernel_time() {
                    debug!(
                        "Wheel record code {:#04x} value {} -> delta {} at {}",
                        record.code,
                        record.value,
                        delta,
                        time.format("%H:%M:%S.%3f")
                    );
                }
                Ok(NormalizedTick::new(event.received_at, delta).map(NormalizedInput::Tick))
            }
            (EV_KEY, code)
                if code != KEY_RESERVED && code == self.settings.mute_key && record.value == 1 =>
            {
                debug!("Mute key pressed");
                Ok(Some(NormalizedInput::MuteToggle {
                    timestamp: event.received_at,
                }))
            }
            _ => Ok(None),
        }
    }

    fn wheel_delta(&self, code: u16, value: i32) -> i32 {
        if code == REL_HWHEEL_HI_RES {
            // Rust integer division truncates toward zero
            value.checked_div(self.settings.hires_divisor).unwrap_or(0)
        } else {
            value
        }
    }

    fn normalize_line(&self, event: &RawEvent) -> Result<Option<NormalizedInput>, NormalizeError> {
        if event.len() > MAX_LINE_LENGTH {
            return Err(NormalizeError::Malformed {
                origin: event.origin,
                length: event.len(),
                message: format!("line longer than {} bytes", MAX_LINE_LENGTH),
            });
        }
        let line = std::str::from_utf8(&event.bytes).map_err(|e| NormalizeError::Malformed {
            origin: event.origin,
            length: event.len(),
            message: e.to_string(),
        })?;

        if let Some(code) = &self.settings.mute_key_code {
            if line.contains(code.as_str()) && line.contains("pressed") {
                debug!("Mute key line: {}", line);
                return Ok(Some(NormalizedInput::MuteToggle {
                    timestamp: event.received_at,
                }));
            }
        }

        let is_media_key = self
            .settings
            .media_key_codes
            .iter()
            .any(|code| line.contains(code.as_str()));
        if !is_media_key {
            return Ok(None);
        }

        let delta = if line.contains("down") {
            -1
        } else if line.contains("up") {
            1
        } else {
            return Ok(None);
        };
        debug!("Media key line {:?} -> delta {}", line, delta);
        Ok(NormalizedTick::new(event.received_at, delta).map(NormalizedInput::Tick))
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(NormalizerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_event(event_type: u16, code: u16, value: i32) -> RawEvent {
        let record = InputRecord {
            seconds: 1_700_000_000,
            microseconds: 0,
            event_type,
            code,
            value,
        };
        RawEvent::new(SourceKind::Device, record.to_bytes().to_vec())
    }

    fn line_event(line: &str) -> RawEvent {
        RawEvent::new(SourceKind::Command, line.as_bytes().to_vec())
    }

    fn tick_delta(result: Option<NormalizedInput>) -> Option<i32> {
        match result {
            Some(NormalizedInput::Tick(tick)) => Some(tick.delta()),
            _ => None,
        }
    }

    #[test]
    fn ignores_irrelevant_records() {
        let normalizer = Normalizer::default();
        // SYN report, vertical wheel, relative X, key press of another key
        for (event_type, code) in [(0x00, 0x00), (EV_REL, 0x08), (EV_REL, 0x00), (EV_KEY, 30)] {
            let result = normalizer
                .normalize(&record_event(event_type, code, 1))
                .unwrap();
            assert!(result.is_none(), "type {} code {}", event_type, code);
        }
        assert!(normalizer
            .normalize(&record_event(0x03, REL_HWHEEL, 5))
            .unwrap()
            .is_none());
    }

    #[test]
    fn high_resolution_values_are_truncated() {
        let normalizer = Normalizer::default();
        let delta = |value| {
            tick_delta(
                normalizer
                    .normalize(&record_event(EV_REL, REL_HWHEEL_HI_RES, value))
                    .unwrap(),
            )
        };
        assert_eq!(delta(119), None);
        assert_eq!(delta(-119), None);
        assert_eq!(delta(240), Some(2));
        assert_eq!(delta(-120), Some(-1));
        assert_eq!(delta(250), Some(2));
    }

    #[test]
    fn low_resolution_values_pass_through() {
        let normalizer = Normalizer::default();
        let result = normalizer
            .normalize(&record_event(EV_REL, REL_HWHEEL, 3))
            .unwrap();
        assert_eq!(tick_delta(result), Some(3));
        assert!(normalizer
            .normalize(&record_event(EV_REL, REL_HWHEEL, 0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn custom_divisor_applies() {
        let normalizer = Normalizer::new(NormalizerSettings {
            hires_divisor: 60,
            ..Default::default()
        });
        let result = normalizer
            .normalize(&record_event(EV_REL, REL_HWHEEL_HI_RES, 120))
            .unwrap();
        assert_eq!(tick_delta(result), Some(2));
    }

    #[test]
    fn short_record_is_malformed() {
        let normalizer = Normalizer::default();
        let event = RawEvent::new(SourceKind::Device, vec![0u8; 10]);
        assert!(matches!(
            normalizer.normalize(&event),
            Err(NormalizeError::Malformed { length: 10, .. })
        ));
    }

    #[test]
    fn mute_key_press_toggles() {
        let normalizer = Normalizer::default();
        let pressed = normalizer
            .normalize(&record_event(EV_KEY, KEY_MUTE, 1))
            .unwrap();
        assert!(matches!(pressed, Some(NormalizedInput::MuteToggle { .. })));

        let released = normalizer
            .normalize(&record_event(EV_KEY, KEY_MUTE, 0))
            .unwrap();
        assert!(released.is_none());
    }

    #[test]
    fn zero_mute_key_disables_toggle() {
        let normalizer = Normalizer::new(NormalizerSettings {
            mute_key: KEY_RESERVED,
            ..Default::default()
        });
        for code in [KEY_MUTE, KEY_RESERVED] {
            assert!(normalizer
                .normalize(&record_event(EV_KEY, code, 1))
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn media_key_lines_map_to_direction() {
        let normalizer = Normalizer::default();
        let delta = |line: &str| tick_delta(normalizer.normalize(&line_event(line)).unwrap());

        assert_eq!(delta("[wl_keyboard] key: 165; state: up"), Some(1));
        assert_eq!(delta("[wl_keyboard] key: 166; state: down"), Some(-1));
        assert_eq!(delta("[wl_keyboard] key: 30; state: down"), None);
        assert_eq!(delta("[wl_keyboard] key: 163; state: 1 (pressed)"), None);
        assert_eq!(delta("wl_pointer motion"), None);
    }

    #[test]
    fn command_mute_key_is_optional() {
        let line = "[wl_keyboard] key: 121; state: 1 (pressed)";
        assert!(Normalizer::default()
            .normalize(&line_event(line))
            .unwrap()
            .is_none());

        let normalizer = Normalizer::new(NormalizerSettings {
            mute_key_code: Some("121".to_string()),
            ..Default::default()
        });
        assert!(matches!(
            normalizer.normalize(&line_event(line)).unwrap(),
            Some(NormalizedInput::MuteToggle { .. })
        ));
    }

    #[test]
    fn oversized_line_is_malformed() {
        let mut line = "key: 165; state: up ".repeat(MAX_LINE_LENGTH / 10);
        line.truncate(MAX_LINE_LENGTH + 1);
        assert!(matches!(
            Normalizer::default().normalize(&line_event(&line)),
            Err(NormalizeError::Malformed { .. })
        ));
    }

    #[test]
    fn invalid_utf8_line_is_malformed() {
        let event = RawEvent::new(SourceKind::Command, vec![0xff, 0xfe, b'u', b'p']);
        assert!(Normalizer::default().normalize(&event).is_err());
    }
}
