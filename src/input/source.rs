//! Event sources for knob input
//!
//! Every source implements [`EventSource`]: one bounded poll that yields the next
//! [`RawEvent`], reports that nothing arrived in time, or reports that the
//! underlying stream is gone. The bound keeps the service loop responsive to
//! cancellation and lets the supervisor time out a silent source.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::input::device::DeviceSource;
use crate::input::line::LineSource;

/// Which reader produced a [`RawEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Fixed-size binary input records from a device file
    Device,
    /// Text lines from a monitoring command
    Command,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Device => write!(f, "device"),
            SourceKind::Command => write!(f, "command"),
        }
    }
}

/// Unparsed payload read from a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub origin: SourceKind,
    pub bytes: Vec<u8>,
    pub received_at: Instant,
}

impl RawEvent {
    #[cfg(test)]
    pub fn new(origin: SourceKind, bytes: Vec<u8>) -> Self {
        Self::received(origin, bytes, Instant::now())
    }

    /// Event stamped with the time its bytes came off the stream
    pub fn received(origin: SourceKind, bytes: Vec<u8>, received_at: Instant) -> Self {
        Self {
            origin,
            bytes,
            received_at,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Outcome of a single bounded poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePoll {
    Event(RawEvent),
    Timeout,
    Closed,
}

/// Why a source could not be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    NotFound,
    PermissionDenied,
    Other,
}

impl From<io::ErrorKind> for UnavailableReason {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => UnavailableReason::NotFound,
            io::ErrorKind::PermissionDenied => UnavailableReason::PermissionDenied,
            _ => UnavailableReason::Other,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source unavailable: {identifier}: {message}")]
    Unavailable {
        identifier: String,
        reason: UnavailableReason,
        message: String,
    },

    #[error("Failed to read from {identifier}: {message}")]
    ReadError { identifier: String, message: String },
}

impl SourceError {
    pub fn unavailable(identifier: impl Into<String>, error: &io::Error) -> Self {
        SourceError::Unavailable {
            identifier: identifier.into(),
            reason: error.kind().into(),
            message: error.to_string(),
        }
    }

    /// Reason for an open failure, `None` for read errors
    pub fn unavailable_reason(&self) -> Option<UnavailableReason> {
        match self {
            SourceError::Unavailable { reason, .. } => Some(*reason),
            SourceError::ReadError { .. } => None,
        }
    }
}

// Linux errno for a device that went away, e.g. an unplugged USB knob
const ENODEV: i32 = 19;

/// Read errors after which the stream will never produce data again
pub fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof | io::ErrorKind::NotFound
    ) || error.raw_os_error() == Some(ENODEV)
}

/// A channel of raw input that can be polled with a bounded wait
pub trait EventSource: Send {
    /// Waits at most `timeout` for the next raw event
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<SourcePoll, SourceError>> + Send;

    fn kind(&self) -> SourceKind;

    /// Human readable identifier (path or command line)
    fn identifier(&self) -> &str;
}

/// Where to open a source from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Device { path: PathBuf },
    Command { program: String, args: Vec<String> },
}

impl SourceSpec {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceSpec::Device { .. } => SourceKind::Device,
            SourceSpec::Command { .. } => SourceKind::Command,
        }
    }

    pub fn identifier(&self) -> String {
        match self {
            SourceSpec::Device { path } => path.display().to_string(),
            SourceSpec::Command { program, args } if args.is_empty() => program.clone(),
            SourceSpec::Command { program, args } => format!("{} {}", program, args.join(" ")),
        }
    }

    pub async fn open(&self) -> Result<AnySource, SourceError> {
        let identifier = self.identifier();
        match self {
            SourceSpec::Device { path } => {
                debug!("Opening input device {}", identifier);
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| SourceError::unavailable(&identifier, &e))?;
                info!("Opened input device {}", identifier);
                Ok(AnySource::Device(DeviceSource::new(Box::new(file), identifier)))
            }
            SourceSpec::Command { program, args } => {
                debug!("Spawning event command {}", identifier);
                let mut child = Command::new(program)
                    .args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| SourceError::unavailable(&identifier, &e))?;
                let stdout = child.stdout.take().ok_or_else(|| SourceError::Unavailable {
                    identifier: identifier.clone(),
                    reason: UnavailableReason::Other,
                    message: "child stdout was not captured".to_string(),
                })?;
                info!("Spawned event command {} (pid {:?})", identifier, child.id());
                Ok(AnySource::Line(
                    LineSource::new(Box::new(stdout), identifier)
                        .with_child(child),
                ))
            }
        }
    }
}

/// Either concrete source, so the supervisor can switch between them
pub enum AnySource {
    Device(DeviceSource),
    Line(LineSource),
}

impl EventSource for AnySource {
    async fn poll(&mut self, timeout: Duration) -> Result<SourcePoll, SourceError> {
        match self {
            AnySource::Device(source) => source.poll(timeout).await,
            AnySource::Line(source) => source.poll(timeout).await,
        }
    }

    fn kind(&self) -> SourceKind {
        match self {
            AnySource::Device(source) => source.kind(),
            AnySource::Line(source) => source.kind(),
        }
    }

    fn identifier(&self) -> &str {
        match self {
            AnySource::Device(source) => source.identifier(),
            AnySource::Line(source) => source.identifier(),
        }
    }
}

impl std::fmt::Debug for AnySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnySource")
            .field("kind", &self.kind())
            .field("identifier", &self.identifier())
            .finish()
    }
}
