use std::mem;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::batch::{BatchSettings, EventBatch};
use crate::event::Event;
use crate::pipeline::Counters;
use crate::shutdown::ShutdownSignal;

#[derive(Clone, Copy, Debug, Error, PartialEq)]
#[error("pipeline is closed")]
pub struct ClosedError;

/// Handle for feeding events into the accumulator.
///
/// The underlying channel is a rendezvous, a submit only completes once
/// the accumulator is ready to take the event, so a stalled delivery
/// stage throttles submitters all the way upstream.
#[derive(Clone, Debug)]
pub struct Submitter {
    tx: mpsc::Sender<Event>,
}

impl Submitter {
    pub async fn submit(&self, event: Event) -> Result<(), ClosedError> {
        self.tx.send(event).await.map_err(|_| ClosedError)
    }

    /// Blocking variant for producers running on non-async threads.
    pub fn blocking_submit(&self, event: Event) -> Result<(), ClosedError> {
        self.tx.blocking_send(event).map_err(|_| ClosedError)
    }
}

/// Consumer-producer stage: consumes events, produces sealed batches.
///
/// A batch is sealed when any of three independent triggers fires:
/// an incoming event would push the open batch past the byte or count
/// limit, the flush ticker ticks, or shutdown begins. The ticker runs on
/// a fixed period measured from pipeline start, not from the first event
/// of the open batch, so a lone event can wait up to one full period.
pub struct BatchProcessor {
    events: mpsc::Receiver<Event>,
    batches: mpsc::Sender<EventBatch>,
    settings: BatchSettings,
    counters: Arc<Counters>,
    shutdown: ShutdownSignal,
}

impl BatchProcessor {
    pub fn new(
        settings: BatchSettings,
        counters: Arc<Counters>,
        shutdown: ShutdownSignal,
    ) -> (Self, Submitter, mpsc::Receiver<EventBatch>) {
        // Capacity 1 is the smallest tokio allows, the closest thing to an
        // unbuffered hand-off. Any larger buffer would weaken the
        // back-pressure contract between the stages.
        let (event_tx, event_rx) = mpsc::channel(1);
        let (batch_tx, batch_rx) = mpsc::channel(1);

        let processor = Self {
            events: event_rx,
            batches: batch_tx,
            settings,
            counters,
            shutdown,
        };

        (processor, Submitter { tx: event_tx }, batch_rx)
    }

    pub fn total_events(&self) -> u64 {
        self.counters.events_accepted.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.counters.bytes_accepted.load(Ordering::Relaxed)
    }

    pub async fn run(mut self) {
        let mut ticker = interval_at(
            Instant::now() + self.settings.timeout,
            self.settings.timeout,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut batch = EventBatch::new();

        loop {
            tokio::select! {
                received = self.events.recv() => match received {
                    Some(event) => {
                        let size = event.size();

                        // bytes first: concurrent readers must never see
                        // more events than the bytes account for
                        self.counters.bytes_accepted.fetch_add(size, Ordering::Relaxed);
                        self.counters.events_accepted.fetch_add(1, Ordering::Relaxed);

                        // The cap is an exclusive upper bound, checked before
                        // the event is added. A batch that would land exactly
                        // at the cap is sealed first and the event starts the
                        // next one.
                        if batch.bytes().saturating_add(size) >= self.settings.max_bytes
                            || batch.len() >= self.settings.max_events
                        {
                            debug!(
                                message = "capacity induced flush",
                                count = batch.len(),
                                size = batch.bytes()
                            );

                            if !self.flush(&mut batch).await {
                                return;
                            }
                        }

                        batch.push(event, size);
                    }
                    None => {
                        debug!(
                            message = "event stream closed, flushing",
                            count = batch.len(),
                            size = batch.bytes()
                        );

                        self.flush(&mut batch).await;
                        return;
                    }
                },

                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        debug!(
                            message = "timer induced flush",
                            count = batch.len(),
                            size = batch.bytes()
                        );

                        if !self.flush(&mut batch).await {
                            return;
                        }
                    }
                }

                _ = self.shutdown.recv() => {
                    debug!(
                        message = "shutdown induced flush",
                        count = batch.len(),
                        size = batch.bytes()
                    );

                    self.flush(&mut batch).await;
                    return;
                }
            }
        }
    }

    /// Seal and hand off the open batch, leaving a fresh one in its place.
    /// Empty batches are never emitted. Returns false once the writer is
    /// gone and the loop must stop.
    async fn flush(&mut self, batch: &mut EventBatch) -> bool {
        if batch.is_empty() {
            return true;
        }

        let sealed = mem::take(batch);
        let (count, bytes) = (sealed.len(), sealed.bytes());

        // counted before the hand-off so `emitted` never trails behind
        // the writer's `delivered`
        self.counters.batches_emitted.fetch_add(1, Ordering::Relaxed);

        if self.batches.send(sealed).await.is_err() {
            warn!(
                message = "batch stream receiver dropped, discarding batch",
                count,
                bytes
            );

            return false;
        }

        true
    }
}
