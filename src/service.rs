//! The knob service loop
//!
//! ```text
//! Committed source ──► Normalizer ──► RateLimiter ──► ActionDispatcher ──► Actuator
//!        ▲                                                                    │
//!   bounded poll                                                          Notifier
//! ```
//!
//! Runs on a single task. Each iteration checks the stop token, waits at most
//! `poll_timeout` for one raw event and processes it to completion, actuator
//! call included. Per-event failures are logged and skipped; losing the
//! committed source, or a source that keeps failing, ends the loop with an
//! error.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actuator::{apply_action, Actuator, Notifier};
use crate::input::normalizer::{NormalizedInput, Normalizer};
use crate::input::source::{EventSource, SourcePoll};
use crate::input::supervisor::Committed;
use crate::mapping::{ActionDispatcher, RateLimiter};

// 5 seconds of failed reads at the default poll timeout
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Input source {0} closed")]
    SourceClosed(String),

    #[error("Input source {identifier} failed {attempts} reads in a row")]
    ReadFailed { identifier: String, attempts: u32 },
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceSummary {
    pub actions_applied: u64,
    pub actions_failed: u64,
    pub ticks_dropped: u64,
    pub events_ignored: u64,
    pub events_malformed: u64,
}

pub struct KnobService<A, N> {
    normalizer: Normalizer,
    limiter: RateLimiter,
    dispatcher: ActionDispatcher,
    actuator: A,
    notifier: N,
    poll_timeout: Duration,
    summary: ServiceSummary,
}

impl<A: Actuator, N: Notifier> KnobService<A, N> {
    pub fn new(
        normalizer: Normalizer,
        limiter: RateLimiter,
        dispatcher: ActionDispatcher,
        actuator: A,
        notifier: N,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            normalizer,
            limiter,
            dispatcher,
            actuator,
            notifier,
            poll_timeout,
            summary: ServiceSummary::default(),
        }
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn summary(&self) -> ServiceSummary {
        self.summary
    }

    /// Processes the committed source until `stop` is cancelled
    pub async fn run<E: EventSource>(
        &mut self,
        committed: Committed<E>,
        stop: &CancellationToken,
    ) -> Result<ServiceSummary, ServiceError> {
        let Committed {
            role,
            mut source,
            first,
        } = committed;
        info!(
            "Volume knob active on {:?} {} source {}",
            role,
            source.kind(),
            source.identifier()
        );

        self.handle(first).await;

        let mut read_errors = 0u32;
        loop {
            if stop.is_cancelled() {
                info!("Stop requested, leaving service loop");
                break;
            }

            let polled = source.poll(self.poll_timeout).await;
            if polled.is_ok() {
                read_errors = 0;
            }
            match polled {
                Ok(SourcePoll::Event(raw)) => match self.normalizer.normalize(&raw) {
                    Ok(Some(input)) => self.handle(input).await,
                    Ok(None) => self.summary.events_ignored += 1,
                    Err(e) => {
                        warn!("Discarding event: {}", e);
                        self.summary.events_malformed += 1;
                    }
                },
                Ok(SourcePoll::Timeout) => {}
                Ok(SourcePoll::Closed) => {
                    error!("Input source {} closed", source.identifier());
                    return Err(ServiceError::SourceClosed(source.identifier().to_string()));
                }
                Err(e) => {
                    read_errors += 1;
                    if read_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                        error!("Giving up on {}: {}", source.identifier(), e);
                        return Err(ServiceError::ReadFailed {
                            identifier: source.identifier().to_string(),
                            attempts: read_errors,
                        });
                    }
                    // Back off so a persistently failing read does not spin
                    warn!("Error reading input: {}", e);
                    tokio::time::sleep(self.poll_timeout).await;
                }
            }
        }

        info!("Service summary: {:?}", self.summary);
        Ok(self.summary)
    }

    async fn handle(&mut self, input: NormalizedInput) {
        let request = match input {
            NormalizedInput::Tick(tick) => {
                if !self.limiter.admit(&tick, tick.timestamp()) {
                    debug!("Tick {:+} dropped by debounce", tick.delta());
                    self.summary.ticks_dropped += 1;
                    return;
                }
                self.dispatcher.dispatch(&tick)
            }
            NormalizedInput::MuteToggle { .. } => self.dispatcher.toggle(),
        };

        match apply_action(&mut self.actuator, &mut self.notifier, request).await {
            Ok(outcome) => {
                debug!("Applied {}: {:?}", request, outcome);
                self.summary.actions_applied += 1;
            }
            Err(e) => {
                warn!("Could not apply {}: {}", request, e);
                self.summary.actions_failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::testing::{FakeActuator, RecordingNotifier};
    use crate::input::device::DeviceSource;
    use crate::input::normalizer::NormalizedTick;
    use crate::input::record::{
        InputRecord, EV_KEY, EV_REL, KEY_MUTE, REL_HWHEEL, REL_HWHEEL_HI_RES,
    };
    use crate::input::supervisor::FallbackState;
    use std::io::{self, Cursor};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Instant;
    use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};

    /// Every read fails with an error that is not a disconnect
    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other("i/o error")))
        }
    }

    fn service(actuator: FakeActuator) -> KnobService<FakeActuator, RecordingNotifier> {
        KnobService::new(
            Normalizer::default(),
            RateLimiter::from_millis(50),
            ActionDispatcher::new(2),
            actuator,
            RecordingNotifier::default(),
            Duration::from_millis(100),
        )
    }

    fn record(event_type: u16, code: u16, value: i32) -> [u8; 24] {
        InputRecord {
            seconds: 0,
            microseconds: 0,
            event_type,
            code,
            value,
        }
        .to_bytes()
    }

    fn committed<E>(source: E, delta: i32) -> Committed<E> {
        Committed {
            role: FallbackState::Primary,
            source,
            first: NormalizedInput::Tick(NormalizedTick::new(Instant::now(), delta).unwrap()),
        }
    }

    fn cancel_after(stop: &CancellationToken, after: Duration) {
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            stop.cancel();
        });
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_raises_volume() {
        let stop = CancellationToken::new();
        let (_writer, reader) = tokio::io::duplex(64);
        let source = DeviceSource::new(Box::new(reader), "duplex");
        cancel_after(&stop, Duration::from_millis(500));

        let mut service = service(FakeActuator::at(50));
        let summary = service.run(committed(source, 1), &stop).await.unwrap();

        assert_eq!(service.actuator().set_calls, vec![52]);
        assert_eq!(summary.actions_applied, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn volume_is_clamped_at_full() {
        let stop = CancellationToken::new();
        let (_writer, reader) = tokio::io::duplex(64);
        let source = DeviceSource::new(Box::new(reader), "duplex");
        cancel_after(&stop, Duration::from_millis(500));

        let mut service = service(FakeActuator::at(99));
        service.run(committed(source, 3), &stop).await.unwrap();

        assert_eq!(service.actuator().set_calls, vec![100]);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_debounced_but_mute_is_not() {
        let stop = CancellationToken::new();
        let (mut writer, reader) = tokio::io::duplex(256);
        writer.write_all(&record(EV_REL, REL_HWHEEL, 1)).await.unwrap();
        writer.write_all(&record(EV_REL, REL_HWHEEL, 1)).await.unwrap();
        writer.write_all(&record(0x00, 0x00, 0)).await.unwrap();
        writer.write_all(&record(EV_KEY, KEY_MUTE, 1)).await.unwrap();
        let source = DeviceSource::new(Box::new(reader), "duplex");
        cancel_after(&stop, Duration::from_millis(500));

        let mut service = service(FakeActuator::at(50));
        let summary = service.run(committed(source, 1), &stop).await.unwrap();

        assert_eq!(service.actuator().set_calls, vec![52]);
        assert_eq!(service.actuator().toggle_calls, 1);
        assert_eq!(summary.ticks_dropped, 2);
        assert_eq!(summary.events_ignored, 1);
        assert_eq!(summary.actions_applied, 2);
    }

    #[tokio::test]
    async fn backend_failures_do_not_stop_the_loop() {
        let stop = CancellationToken::new();
        let mut data = record(EV_REL, REL_HWHEEL, 1).to_vec();
        data.extend_from_slice(&[0u8; 7]);
        let source = DeviceSource::new(Box::new(Cursor::new(data)), "cursor");

        let mut service = service(FakeActuator {
            unavailable: true,
            ..FakeActuator::at(50)
        });
        let result = service.run(committed(source, 1), &stop).await;

        assert!(matches!(result, Err(ServiceError::SourceClosed(_))));
        let summary = service.summary();
        assert_eq!(summary.actions_failed, 1);
        assert_eq!(summary.ticks_dropped, 1);
        assert_eq!(summary.events_malformed, 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_only_handles_first_input() {
        let stop = CancellationToken::new();
        stop.cancel();
        let source = DeviceSource::new(Box::new(Cursor::new(Vec::new())), "empty");

        let mut service = service(FakeActuator::at(10));
        let summary = service.run(committed(source, -1), &stop).await.unwrap();

        assert_eq!(service.actuator().set_calls, vec![8]);
        assert_eq!(summary.actions_applied, 1);
    }

    #[tokio::test]
    async fn one_detent_changes_volume_once_with_slow_backend() {
        let stop = CancellationToken::new();
        // A high resolution mouse reports both wheel codes in the same frame
        let mut data = record(EV_REL, REL_HWHEEL, 1).to_vec();
        data.extend_from_slice(&record(EV_REL, REL_HWHEEL_HI_RES, 120));
        let source = DeviceSource::new(Box::new(Cursor::new(data)), "cursor");
        let committed = Committed {
            role: FallbackState::Primary,
            source,
            first: NormalizedInput::MuteToggle {
                timestamp: Instant::now(),
            },
        };

        let mut service = service(FakeActuator {
            latency: Duration::from_millis(70),
            ..FakeActuator::at(50)
        });
        let result = service.run(committed, &stop).await;

        assert!(matches!(result, Err(ServiceError::SourceClosed(_))));
        assert_eq!(service.actuator().set_calls, vec![52]);
        assert_eq!(service.summary().ticks_dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_read_errors_end_the_loop() {
        let stop = CancellationToken::new();
        let source = DeviceSource::new(Box::new(BrokenReader), "broken");

        let mut service = service(FakeActuator::at(50));
        let result = service.run(committed(source, 1), &stop).await;

        match result {
            Err(ServiceError::ReadFailed { identifier, attempts }) => {
                assert_eq!(identifier, "broken");
                assert_eq!(attempts, MAX_CONSECUTIVE_READ_ERRORS);
            }
            other => panic!("expected read failure, got {:?}", other),
        }
    }
}
