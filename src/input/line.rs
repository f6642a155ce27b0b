//! Line-oriented reader over a monitoring command's output

use std::io;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tracing::{debug, warn};

use crate::input::source::{
    is_disconnect, EventSource, RawEvent, SourceError, SourceKind, SourcePoll,
};

/// Longest line handed to the normalizer; anything longer is reported as is
/// and the rest of it skipped up to the next newline
pub const MAX_LINE_LENGTH: usize = 4096;

const READ_CHUNK: usize = 1024;

/// Yields one raw event per line of text
///
/// Partial lines are kept between polls, so a timeout never splits a line.
/// Lines are stamped with the time of the read that completed them.
pub struct LineSource {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    identifier: String,
    buffer: Vec<u8>,
    read_at: Instant,
    // Inside an oversized line, dropping bytes until its newline
    skipping: bool,
    child: Option<Child>,
    finished: bool,
}

impl LineSource {
    pub fn new(reader: Box<dyn AsyncRead + Send + Unpin>, identifier: impl Into<String>) -> Self {
        Self {
            reader,
            identifier: identifier.into(),
            buffer: Vec::new(),
            read_at: Instant::now(),
            skipping: false,
            child: None,
            finished: false,
        }
    }

    /// Ties the lifetime of a spawned command to this source
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    fn take_line(&mut self) -> Option<RawEvent> {
        loop {
            match self.buffer.iter().position(|&b| b == b'\n') {
                Some(end) if self.skipping => {
                    self.buffer.drain(..=end);
                    self.skipping = false;
                }
                Some(end) => {
                    let line: Vec<u8> = self.buffer.drain(..=end).collect();
                    return Some(self.event(line));
                }
                None if self.skipping => {
                    self.buffer.clear();
                    return None;
                }
                None if self.buffer.len() > MAX_LINE_LENGTH => {
                    warn!(
                        "Line from {} exceeds {} bytes, skipping the rest of it",
                        self.identifier, MAX_LINE_LENGTH
                    );
                    self.skipping = true;
                    let line = std::mem::take(&mut self.buffer);
                    return Some(self.event(line));
                }
                None => return None,
            }
        }
    }

    fn event(&self, mut line: Vec<u8>) -> RawEvent {
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        RawEvent::received(SourceKind::Command, line, self.read_at)
    }

    fn log_exit(&mut self) {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => debug!("{} exited with {}", self.identifier, status),
                Ok(None) => debug!("{} closed its output", self.identifier),
                Err(e) => warn!("Could not query {}: {}", self.identifier, e),
            }
        }
    }
}

impl EventSource for LineSource {
    async fn poll(&mut self, timeout: Duration) -> Result<SourcePoll, SourceError> {
        if let Some(event) = self.take_line() {
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
                    self.log_exit();
                    if self.buffer.is_empty() || self.skipping {
                        return Ok(SourcePoll::Closed);
                    }
                    // Last line without a newline
                    let line = std::mem::take(&mut self.buffer);
                    return Ok(SourcePoll::Event(self.event(line)));
                }
                Ok(n) => {
                    self.read_at = Instant::now();
                    self.buffer.extend_from_slice(&chunk[..n]);
                    if let Some(event) = self.take_line() {
                        return Ok(SourcePoll::Event(event));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_disconnect(&e) => {
                    warn!("{} disconnected: {}", self.identifier, e);
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
        SourceKind::Command
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::AsyncWriteExt;

    async fn collect_lines(source: &mut LineSource) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        loop {
            match source.poll(Duration::from_millis(100)).await.unwrap() {
                SourcePoll::Event(event) => lines.push(event.bytes),
                SourcePoll::Closed => break,
                SourcePoll::Timeout => panic!("cursor never times out"),
            }
        }
        lines
    }

    #[tokio::test]
    async fn yields_lines_without_terminators() {
        let text = "first line\r\nsecond\nlast";
        let mut source = LineSource::new(Box::new(Cursor::new(text.as_bytes().to_vec())), "text");

        let lines: Vec<String> = collect_lines(&mut source)
            .await
            .into_iter()
            .map(|line| String::from_utf8(line).unwrap())
            .collect();
        assert_eq!(lines, vec!["first line", "second", "last"]);
    }

    #[tokio::test(start_paused = true)]
    async fn half_line_is_kept_across_timeout() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let mut source = LineSource::new(Box::new(reader), "duplex");

        writer.write_all(b"key: 165 ").await.unwrap();
        assert_eq!(
            source.poll(Duration::from_millis(20)).await.unwrap(),
            SourcePoll::Timeout
        );

        writer.write_all(b"state: down\n").await.unwrap();
        match source.poll(Duration::from_millis(20)).await.unwrap() {
            SourcePoll::Event(event) => assert_eq!(event.bytes, b"key: 165 state: down".to_vec()),
            other => panic!("expected line, got {:?}", other),
        }

        drop(writer);
        assert_eq!(
            source.poll(Duration::from_millis(20)).await.unwrap(),
            SourcePoll::Closed
        );
    }

    #[tokio::test]
    async fn lines_from_one_read_share_arrival_time() {
        let text = b"key: 165 state: up\nkey: 165 state: up\n".to_vec();
        let mut source = LineSource::new(Box::new(Cursor::new(text)), "text");
        let timeout = Duration::from_millis(100);

        let SourcePoll::Event(first) = source.poll(timeout).await.unwrap() else {
            panic!("expected first line");
        };
        std::thread::sleep(Duration::from_millis(20));
        let SourcePoll::Event(second) = source.poll(timeout).await.unwrap() else {
            panic!("expected second line");
        };
        assert_eq!(first.received_at, second.received_at);
    }

    #[tokio::test]
    async fn endless_line_is_cut_and_skipped() {
        let mut text = vec![b'x'; MAX_LINE_LENGTH * 3];
        text.extend_from_slice(b"\nkey: 165 state: up\n");
        let mut source = LineSource::new(Box::new(Cursor::new(text)), "text");

        let lines = collect_lines(&mut source).await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].len() > MAX_LINE_LENGTH);
        assert!(lines[0].len() <= MAX_LINE_LENGTH + READ_CHUNK);
        assert_eq!(lines[1], b"key: 165 state: up".to_vec());
    }
}
