//! Binary layout of kernel input records
//!
//! ```text
//! | seconds: i64 | microseconds: i64 | type: u16 | code: u16 | value: i32 |
//! ```
//!
//! Fields are in native byte order, 24 bytes per record on 64-bit targets.

use chrono::{DateTime, Local, TimeZone};

pub const INPUT_RECORD_SIZE: usize = 24;

pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const REL_HWHEEL: u16 = 0x06;
pub const REL_HWHEEL_HI_RES: u16 = 0x0c;
/// Never emitted for a real key
pub const KEY_RESERVED: u16 = 0;
pub const KEY_MUTE: u16 = 113;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRecord {
    pub seconds: i64,
    pub microseconds: i64,
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
}

impl InputRecord {
    /// Parses exactly one record; returns `None` for any other length
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != INPUT_RECORD_SIZE {
            return None;
        }
        Some(Self {
            seconds: i64::from_ne_bytes(bytes[0..8].try_into().ok()?),
            microseconds: i64::from_ne_bytes(bytes[8..16].try_into().ok()?),
            event_type: u16::from_ne_bytes(bytes[16..18].try_into().ok()?),
            code: u16::from_ne_bytes(bytes[18..20].try_into().ok()?),
            value: i32::from_ne_bytes(bytes[20..24].try_into().ok()?),
        })
    }

    pub fn to_bytes(&self) -> [u8; INPUT_RECORD_SIZE] {
        let mut out = [0u8; INPUT_RECORD_SIZE];
        out[0..8].copy_from_slice(&self.seconds.to_ne_bytes());
        out[8..16].copy_from_slice(&self.microseconds.to_ne_bytes());
        out[16..18].copy_from_slice(&self.event_type.to_ne_bytes());
        out[18..20].copy_from_slice(&self.code.to_ne_bytes());
        out[20..24].copy_from_slice(&self.value.to_ne_bytes());
        out
    }

    /// Kernel timestamp of the record, for logging
    pub fn kernel_time(&self) -> Option<DateTime<Local>> {
        let nanos = u32::try_from(self.microseconds.checked_mul(1_000)?).ok()?;
        Local.timestamp_opt(self.seconds, nanos).single()
    }
}
