//! Fixed-size record reader over a device byte stream

use std::io;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::input::record::INPUT_RECORD_SIZE;
use crate::input::source::{
    is_disconnect, EventSource, RawEvent, SourceError, SourceKind, SourcePoll,
};

// Up to 8 records per read, the kernel usually delivers a report plus SYN
const READ_CHUNK: usize = INPUT_RECORD_SIZE * 8;

/// Reads input records from an input device (or any byte stream)
///
/// Bytes are accumulated across polls, so a poll that times out halfway
/// through a record keeps the partial data for the next one. At end of
/// stream any trailing partial record is handed out as a short event so the
/// normalizer can report it as malformed.
///
/// Records are stamped with the time of the read that delivered them, not
/// the time they are handed out, so records of one kernel frame share a
/// timestamp however long the previous one took to process.
pub struct DeviceSource {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    identifier: String,
    buffer: Vec<u8>,
    read_at: Instant,
    finished: bool,
}

impl DeviceSource {
    pub fn new(reader: Box<dyn AsyncRead + Send + Unpin>, identifier: impl Into<String>) -> Self {
        Self {
            reader,
            identifier: identifier.into(),
            buffer: Vec::with_capacity(READ_CHUNK),
            read_at: Instant::now(),
            finished: false,
        }
    }

    fn take_record(&mut self) -> Option<RawEvent> {
        if self.buffer.len() < INPUT_RECORD_SIZE {
            return None;
        }
        let bytes: Vec<u8> = self.buffer.drain(..INPUT_RECORD_SIZE).collect();
        Some(RawEvent::received(SourceKind::Device, bytes, self.read_at))
    }
}

impl EventSource for DeviceSource {
    async fn poll(&mut self, timeout: Duration) -> Result<SourcePoll, SourceError> {
        if let Some(event) = self.take_record() {
            return Ok(SourcePoll::Event(event));
        }
        if self.finished {
            return Ok(SourcePoll::Closed);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let read = match tokio::time::timeout_at(deadline, self.reader.read(&mut chunk)).await
            {
                Ok(read) => read,
                Err(_) => return Ok(SourcePoll::Timeout),
            };

            match read {
                Ok(0) => {
                    self.finished = true;
                    if self.buffer.is_empty() {
                        debug!("Device {} reached end of stream", self.identifier);
                        return Ok(SourcePoll::Closed);
                    }
                    warn!(
                        "Device {} closed with {} trailing bytes",
                        self.identifier,
                        self.buffer.len()
                    );
                    let bytes = std::mem::take(&mut self.buffer);
                    return Ok(SourcePoll::Event(RawEvent::received(
                        SourceKind::Device,
                        bytes,
                        self.read_at,
                    )));
                }
                Ok(n) => {
                    self.read_at = Instant::now();
                    self.buffer.extend_from_slice(&chunk[..n]);
                    if let Some(event) = self.take_record() {
                        return Ok(SourcePoll::Event(event));
                    }
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                    continue;
                }
                Err(e) if is_disconnect(&e) => {
                    warn!("Device {} disconnected: {}", self.identifier, e);
                    self.finished = true;
                    self.buffer.clear();
                    return Ok(SourcePoll::Closed);
                }
                Err(e) => {
                    return Err(SourceError::ReadError {
                        identifier: self.identifier.clone(),
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Device
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
