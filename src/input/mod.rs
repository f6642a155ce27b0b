//! Input subsystem for the volume knob
//!
//! 1. [`source`] - bounded polling over raw input channels
//! 2. [`device`] / [`line`] - the two concrete readers
//! 3. [`normalizer`] - raw payloads to signed ticks
//! 4. [`supervisor`] - primary/secondary source selection
//!
//! # Architecture
//!
//! ```text
//! /dev/input/eventN ──► DeviceSource ─┐
//!                                     ├──► Normalizer ──► NormalizedInput
//! wev stdout ─────────► LineSource ───┘
//!          (RawEvent)
//! ```

pub mod device;
pub mod line;
pub mod normalizer;
pub mod record;
pub mod source;
pub mod supervisor;

use std::path::Path;

pub use source::{AnySource, SourceError};
pub use supervisor::{Committed, PrimaryOutcome, SecondaryOutcome, SourceSupervisor};

pub const INPUT_BY_ID_DIR: &str = "/dev/input/by-id";

/// Names of the stable device links, for hints when a device is missing
pub fn list_input_devices(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().display().to_string())
        .collect();
    names.sort();
    names
}
