//! Source fallback supervisor with statum state machine
//!
//! Chooses which source the service loop commits to before it starts.
//!
//! # State Machine
//!
//! ```text
//! Primary ──(no input before timeout / closed / open failed)──► Secondary
//!    │                                                             │
//!    └──(first valid input)──► committed        (open failed /     │
//!                                               closed / error) ◄──┘
//!                                                     │
//!                                                     ▼
//!                                                  Failed
//! ```
//!
//! A source is committed as soon as it produces its first valid input, and
//! that input is handed back with it so it is not lost. There is no way
//! back from Secondary to Primary.

use std::time::Duration;

use statum::{machine, state};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::input::normalizer::{NormalizedInput, Normalizer};
use crate::input::source::{EventSource, SourceError, SourcePoll};

/// Runtime view of the supervisor state, for logging and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    Primary,
    Secondary,
    Failed,
}

#[derive(Clone, Debug)]
pub struct FallbackSettings {
    /// How long the primary may stay silent before falling back
    pub first_event_timeout: Duration,
    /// Upper bound for a single poll, also bounds cancellation latency
    pub poll_timeout: Duration,
    /// Without a secondary the primary is never timed out
    pub secondary_configured: bool,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            first_event_timeout: Duration::from_secs(5),
            poll_timeout: Duration::from_millis(100),
            secondary_configured: true,
        }
    }
}

/// A source that produced valid input, plus that first input
#[derive(Debug)]
pub struct Committed<E> {
    pub role: FallbackState,
    pub source: E,
    pub first: NormalizedInput,
}

#[derive(Debug)]
pub enum PrimaryOutcome<E> {
    Committed(Committed<E>),
    Fallback(SourceSupervisor<Secondary>),
    Cancelled,
}

#[derive(Debug)]
pub enum SecondaryOutcome<E> {
    Committed(Committed<E>),
    Failed(SourceSupervisor<Failed>),
    Cancelled,
}

#[state]
#[derive(Debug, Clone)]
pub enum SupervisorState {
    Primary,
    Secondary,
    Failed,
}

#[machine]
#[derive(Debug)]
pub struct SourceSupervisor<S: SupervisorState> {
    settings: FallbackSettings,
    normalizer: Normalizer,
    // Why the last source was abandoned
    failure: Option<String>,
}

impl<S: SupervisorState> SourceSupervisor<S> {
    pub fn settings(&self) -> &FallbackSettings {
        &self.settings
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}

impl SourceSupervisor<Primary> {
    pub fn create(settings: FallbackSettings, normalizer: Normalizer) -> Self {
        debug!("Creating source supervisor with settings: {:?}", settings);
        Self::new(settings, normalizer, None)
    }

    pub fn state(&self) -> FallbackState {
        FallbackState::Primary
    }

    /// Waits for the primary source to prove itself
    ///
    /// An open failure is fatal only when there is nothing to fall back to.
    pub async fn watch<E: EventSource>(
        mut self,
        opened: Result<E, SourceError>,
        stop: &CancellationToken,
    ) -> Result<PrimaryOutcome<E>, SourceError> {
        let mut source = match opened {
            Ok(source) => source,
            Err(e) if self.settings.secondary_configured => {
                warn!("Primary source unavailable: {}", e);
                self.failure = Some(e.to_string());
                return Ok(PrimaryOutcome::Fallback(self.transition()));
            }
            Err(e) => {
                error!("Primary source unavailable and no fallback configured: {}", e);
                return Err(e);
            }
        };

        let deadline = self
            .settings
            .secondary_configured
            .then(|| tokio::time::Instant::now() + self.settings.first_event_timeout);

        info!(
            "Waiting for first input on primary {} source {}",
            source.kind(),
            source.identifier()
        );
        match wait_for_first_input(&mut source, &self.normalizer, &self.settings, deadline, stop)
            .await
        {
            FirstInput::Input(first) => {
                info!("Committing to primary source {}", source.identifier());
                Ok(PrimaryOutcome::Committed(Committed {
                    role: FallbackState::Primary,
                    source,
                    first,
                }))
            }
            FirstInput::Cancelled => Ok(PrimaryOutcome::Cancelled),
            FirstInput::Abandoned(reason) => {
                warn!(
                    "Primary source {} abandoned: {}, trying secondary",
                    source.identifier(),
                    reason
                );
                self.failure = Some(reason);
                Ok(PrimaryOutcome::Fallback(self.transition()))
            }
        }
    }
}

impl SourceSupervisor<Secondary> {
    pub fn state(&self) -> FallbackState {
        FallbackState::Secondary
    }

    /// Gives the secondary source its one chance; there is no timeout here
    pub async fn engage<E: EventSource>(
        mut self,
        opened: Result<E, SourceError>,
        stop: &CancellationToken,
    ) -> SecondaryOutcome<E> {
        let mut source = match opened {
            Ok(source) => source,
            Err(e) => {
                error!("Secondary source unavailable: {}", e);
                self.failure = Some(e.to_string());
                return SecondaryOutcome::Failed(self.transition());
            }
        };

        info!(
            "Waiting for first input on secondary {} source {}",
            source.kind(),
            source.identifier()
        );
        match wait_for_first_input(&mut source, &self.normalizer, &self.settings, None, stop).await
        {
            FirstInput::Input(first) => {
                info!("Committing to secondary source {}", source.identifier());
                SecondaryOutcome::Committed(Committed {
                    role: FallbackState::Secondary,
                    source,
                    first,
                })
            }
            FirstInput::Cancelled => SecondaryOutcome::Cancelled,
            FirstInput::Abandoned(reason) => {
                error!("Secondary source {} failed: {}", source.identifier(), reason);
                self.failure = Some(reason);
                SecondaryOutcome::Failed(self.transition())
            }
        }
    }
}

impl SourceSupervisor<Failed> {
    pub fn state(&self) -> FallbackState {
        FallbackState::Failed
    }

    pub fn reason(&self) -> &str {
        self.failure.as_deref().unwrap_or("no usable input source")
    }
}

enum FirstInput {
    Input(NormalizedInput),
    Abandoned(String),
    Cancelled,
}

async fn wait_for_first_input<E: EventSource>(
    source: &mut E,
    normalizer: &Normalizer,
    settings: &FallbackSettings,
    deadline: Option<tokio::time::Instant>,
    stop: &CancellationToken,
) -> FirstInput {
    loop {
        if stop.is_cancelled() {
            return FirstInput::Cancelled;
        }

        let wait = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    return FirstInput::Abandoned(format!(
                        "no input within {}ms",
                        settings.first_event_timeout.as_millis()
                    ));
                }
                remaining.min(settings.poll_timeout)
            }
            None => settings.poll_timeout,
        };

        match source.poll(wait).await {
            Ok(SourcePoll::Event(raw)) => match normalizer.normalize(&raw) {
                Ok(Some(input)) => return FirstInput::Input(input),
                Ok(None) => {}
                Err(e) => warn!("Discarding event: {}", e),
            },
            Ok(SourcePoll::Timeout) => {}
            Ok(SourcePoll::Closed) => {
                return FirstInput::Abandoned("source closed before producing input".to_string())
            }
            Err(e) => return FirstInput::Abandoned(e.to_string()),
        }
    }
}
