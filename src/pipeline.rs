use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::batch::BatchSettings;
use crate::client::{DeliveryError, DeliveryService};
use crate::processor::{BatchProcessor, Submitter};
use crate::shutdown::{self, ShutdownTrigger};
use crate::writer::{BatchWriter, RetrySettings};

/// Running totals for the whole pipeline.
///
/// Each counter has exactly one writer task but may be read from any
/// task at any time, so updates go through atomics rather than plain
/// integers.
#[derive(Debug, Default)]
pub struct Counters {
    pub events_accepted: AtomicU64,
    pub bytes_accepted: AtomicU64,
    pub batches_emitted: AtomicU64,
    pub batches_delivered: AtomicU64,
    pub batches_failed: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        // completion counters are read before their upstream partners so a
        // snapshot never shows more delivered than emitted
        let batches_delivered = self.batches_delivered.load(Ordering::Relaxed);
        let batches_failed = self.batches_failed.load(Ordering::Relaxed);
        let batches_emitted = self.batches_emitted.load(Ordering::Relaxed);
        let events_accepted = self.events_accepted.load(Ordering::Relaxed);
        let bytes_accepted = self.bytes_accepted.load(Ordering::Relaxed);

        CountersSnapshot {
            events_accepted,
            bytes_accepted,
            batches_emitted,
            batches_delivered,
            batches_failed,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CountersSnapshot {
    pub events_accepted: u64,
    pub bytes_accepted: u64,
    pub batches_emitted: u64,
    pub batches_delivered: u64,
    pub batches_failed: u64,
}

#[derive(Debug)]
pub enum PipelineOutcome {
    /// Every emitted batch was delivered.
    Completed,
    /// The writer gave up on a batch, remaining batches were dropped.
    DeliveryFailed(DeliveryError),
}

#[derive(Debug)]
pub struct PipelineReport {
    pub outcome: PipelineOutcome,
    pub counters: CountersSnapshot,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PipelineOutcome::Completed)
    }
}

/// Owns the accumulator and writer stages and the channel between them.
pub struct Pipeline {
    trigger: ShutdownTrigger,
    crash: mpsc::UnboundedReceiver<()>,
    processor: JoinHandle<()>,
    writer: JoinHandle<Result<(), DeliveryError>>,
    counters: Arc<Counters>,
}

impl Pipeline {
    /// Spawn both stages and return the pipeline handle plus the
    /// submitter feeding it.
    pub fn start<S: DeliveryService>(
        batch: BatchSettings,
        retry: RetrySettings,
        service: S,
    ) -> (Pipeline, Submitter) {
        let (trigger, signal) = shutdown::channel();
        let counters = Arc::new(Counters::default());
        let (crash_tx, crash_rx) = mpsc::unbounded_channel();

        let (processor, submitter, batches) =
            BatchProcessor::new(batch, Arc::clone(&counters), signal);
        let writer = BatchWriter::new(batches, service, retry, Arc::clone(&counters), crash_tx);

        let pipeline = Pipeline {
            trigger,
            crash: crash_rx,
            processor: tokio::spawn(processor.run()),
            writer: tokio::spawn(writer.run()),
            counters,
        };

        (pipeline, submitter)
    }

    /// Read-only view of the running counters, never blocks the stages.
    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Resolves when the writer reports a fatal delivery failure.
    /// Pending forever on a pipeline that shuts down cleanly.
    pub async fn crashed(&mut self) {
        if self.crash.recv().await.is_some() {
            return;
        }

        future::pending::<()>().await
    }

    /// Begin shutdown and wait for the drain to finish: the accumulator
    /// flushes its open batch, the writer works through every batch that
    /// was emitted, then both tasks stop.
    pub async fn close(self) -> PipelineReport {
        self.trigger.fire();

        if let Err(err) = self.processor.await {
            error!(message = "batch processor task failed", %err);
        }

        let outcome = match self.writer.await {
            Ok(Ok(())) => PipelineOutcome::Completed,
            Ok(Err(err)) => PipelineOutcome::DeliveryFailed(err),
            Err(err) => {
                error!(message = "batch writer task failed", %err);

                PipelineOutcome::DeliveryFailed(DeliveryError::Aborted)
            }
        };

        PipelineReport {
            outcome,
            counters: self.counters.snapshot(),
        }
    }
}
