use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::Event;

pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_MAX_EVENTS: usize = 500;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error, PartialEq)]
pub enum BatchError {
    #[error("`max_bytes` must be greater than zero")]
    InvalidMaxBytes,
    #[error("`max_events` must be greater than zero")]
    InvalidMaxEvents,
    #[error("`timeout` must be greater than zero")]
    InvalidTimeout,
}

/// Configures batching behavior.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// The maximum size of a batch before it is flushed.
    #[serde(default, with = "humanize::bytes::serde_option")]
    pub max_bytes: Option<usize>,

    /// The maximum number of events in a batch before it is flushed.
    #[serde(default)]
    pub max_events: Option<usize>,

    /// The period of the flush ticker. A non-empty batch is flushed on
    /// every tick, regardless of how full it is.
    #[serde(default, with = "humanize::duration::serde_option")]
    pub timeout: Option<Duration>,
}

impl BatchConfig {
    pub fn validate(self) -> Result<BatchSettings, BatchError> {
        let settings = BatchSettings {
            max_bytes: self.max_bytes.map(|n| n as u64).unwrap_or(DEFAULT_MAX_BYTES),
            max_events: self.max_events.unwrap_or(DEFAULT_MAX_EVENTS),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
        };

        if settings.max_bytes == 0 {
            return Err(BatchError::InvalidMaxBytes);
        }
        if settings.max_events == 0 {
            return Err(BatchError::InvalidMaxEvents);
        }
        if settings.timeout.is_zero() {
            return Err(BatchError::InvalidTimeout);
        }

        Ok(settings)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BatchSettings {
    /// Exclusive upper bound on the byte size of a batch.
    pub max_bytes: u64,
    pub max_events: usize,
    pub timeout: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_events: DEFAULT_MAX_EVENTS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// An ordered collection of events sized to fit the space and time
/// constraints of the ingest endpoint.
///
/// The batch itself does no bounds checking, limits are enforced by the
/// accumulator before events are pushed.
#[derive(Debug, Default)]
pub struct EventBatch {
    events: Vec<Event>,
    bytes: u64,
}

impl EventBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event whose serialized size is `size` bytes.
    pub fn push(&mut self, event: Event, size: u64) {
        self.events.push(event);
        self.bytes = self.bytes.saturating_add(size);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}
