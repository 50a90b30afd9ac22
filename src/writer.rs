use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use backoff::ExponentialBackoff;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::batch::EventBatch;
use crate::client::{DeliveryError, DeliveryService};
use crate::pipeline::Counters;

#[derive(Clone, Copy, Debug)]
pub struct RetrySettings {
    /// Total attempt budget per batch, including the first attempt.
    pub attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Option<Duration>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: None,
        }
    }
}

/// Consumes sealed batches and hands each to the delivery service,
/// retrying transient failures with jittered exponential backoff.
///
/// Exactly one batch is in flight at a time. The rendezvous hand-off
/// from the accumulator means a stalled endpoint is felt by submitters
/// as back-pressure rather than as unbounded queueing.
pub struct BatchWriter<S> {
    batches: mpsc::Receiver<EventBatch>,
    service: S,
    retry: RetrySettings,
    counters: Arc<Counters>,
    crash: mpsc::UnboundedSender<()>,
    rng: SmallRng,
}

impl<S: DeliveryService> BatchWriter<S> {
    pub fn new(
        batches: mpsc::Receiver<EventBatch>,
        service: S,
        retry: RetrySettings,
        counters: Arc<Counters>,
        crash: mpsc::UnboundedSender<()>,
    ) -> Self {
        Self {
            batches,
            service,
            retry,
            counters,
            crash,
            rng: SmallRng::from_os_rng(),
        }
    }

    pub fn total_batches_delivered(&self) -> u64 {
        self.counters.batches_delivered.load(Ordering::Relaxed)
    }

    /// Drain the batch stream to exhaustion.
    ///
    /// The first batch that fails terminally, or exhausts its retry
    /// budget, is fatal: the supervisor is signalled over the crash
    /// channel and the remaining stream is abandoned. Losing batches
    /// silently would be worse than stopping ingestion.
    pub async fn run(mut self) -> Result<(), DeliveryError> {
        while let Some(batch) = self.batches.recv().await {
            debug!(
                message = "writing batch",
                count = batch.len(),
                size = batch.bytes()
            );

            match self.write(&batch).await {
                Ok(()) => {
                    self.counters.batches_delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    self.counters.batches_failed.fetch_add(1, Ordering::Relaxed);

                    error!(message = "batch delivery failed, shutting down", %err);
                    let _ = self.crash.send(());

                    return Err(err);
                }
            }
        }

        debug!(message = "batch stream closed");

        Ok(())
    }

    async fn write(&mut self, batch: &EventBatch) -> Result<(), DeliveryError> {
        let initial = self.retry.initial_backoff.as_millis() as u64;
        let mut backoff = match self.retry.max_backoff {
            Some(max) => ExponentialBackoff::from_millis(initial).max_delay(max),
            None => ExponentialBackoff::from_millis(initial),
        };
        let mut remaining = self.retry.attempts;

        loop {
            match self.service.deliver(batch).await {
                Ok(()) => return Ok(()),
                Err(err) if !err.is_retriable() => {
                    error!(message = "batch rejected, not retrying", %err);

                    return Err(err);
                }
                Err(err) => {
                    remaining -= 1;
                    if remaining == 0 {
                        warn!(
                            message = "retry budget exhausted",
                            attempts = self.retry.attempts,
                            %err
                        );

                        return Err(err);
                    }

                    let delay = backoff.next();
                    let delay = delay + self.jitter(delay);
                    warn!(message = "delivery failed, retrying", delay = ?delay, %err);

                    sleep(delay).await;
                }
            }
        }
    }

    /// Up to half the current delay, so parallel writers do not line up
    /// into synchronized retry storms.
    fn jitter(&mut self, delay: Duration) -> Duration {
        let cap = (delay / 2).as_millis() as u64;

        Duration::from_millis(self.rng.random_range(0..=cap))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use http::StatusCode;
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::event::Event;

    struct MockService {
        outcomes: Mutex<VecDeque<Result<(), DeliveryError>>>,
        attempts: Mutex<Vec<Instant>>,
    }

    impl MockService {
        fn scripted(outcomes: Vec<Result<(), DeliveryError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                attempts: Mutex::new(Vec::new()),
            })
        }

        fn attempt_gaps(&self) -> Vec<Duration> {
            let attempts = self.attempts.lock().unwrap();
            attempts
                .windows(2)
                .map(|pair| pair[1] - pair[0])
                .collect()
        }
    }

    #[async_trait]
    impl DeliveryService for Arc<MockService> {
        async fn deliver(&self, _batch: &EventBatch) -> Result<(), DeliveryError> {
            self.attempts.lock().unwrap().push(Instant::now());
            self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    fn server_error() -> DeliveryError {
        DeliveryError::Server {
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn single_batch() -> mpsc::Receiver<EventBatch> {
        let (tx, rx) = mpsc::channel(1);
        let mut batch = EventBatch::new();
        let event = Event::new(json!({ "msg": "hello" }));
        let size = event.size();
        batch.push(event, size);
        tx.try_send(batch).unwrap();

        rx
    }

    fn writer(
        service: Arc<MockService>,
        batches: mpsc::Receiver<EventBatch>,
    ) -> (
        BatchWriter<Arc<MockService>>,
        mpsc::UnboundedReceiver<()>,
        Arc<Counters>,
    ) {
        let counters = Arc::new(Counters::default());
        let (crash_tx, crash_rx) = mpsc::unbounded_channel();
        let writer = BatchWriter::new(
            batches,
            service,
            RetrySettings::default(),
            Arc::clone(&counters),
            crash_tx,
        );

        (writer, crash_rx, counters)
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_on_third_attempt() {
        let service = MockService::scripted(vec![Err(server_error()), Err(server_error()), Ok(())]);
        let (writer, mut crash_rx, counters) = writer(Arc::clone(&service), single_batch());

        writer.run().await.unwrap();

        let gaps = service.attempt_gaps();
        assert_eq!(gaps.len(), 2);
        // first delay is 1s plus up to half of it as jitter, second is
        // doubled, so the gaps never shrink
        assert!(gaps[0] >= Duration::from_secs(1) && gaps[0] <= Duration::from_millis(1500));
        assert!(gaps[1] >= Duration::from_secs(2) && gaps[1] <= Duration::from_secs(3));
        assert!(gaps[1] >= gaps[0]);

        assert_eq!(counters.batches_delivered.load(Ordering::Relaxed), 1);
        assert_eq!(counters.batches_failed.load(Ordering::Relaxed), 0);
        assert!(crash_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_retry_budget() {
        let service = MockService::scripted(vec![
            Err(server_error()),
            Err(server_error()),
            Err(server_error()),
        ]);
        let (writer, mut crash_rx, counters) = writer(Arc::clone(&service), single_batch());

        let err = writer.run().await.unwrap_err();
        assert!(err.is_retriable());

        assert_eq!(service.attempts.lock().unwrap().len(), 3);
        assert_eq!(counters.batches_delivered.load(Ordering::Relaxed), 0);
        assert_eq!(counters.batches_failed.load(Ordering::Relaxed), 1);
        assert_eq!(crash_rx.recv().await, Some(()));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_short_circuits() {
        let service = MockService::scripted(vec![Err(DeliveryError::Client {
            status: StatusCode::BAD_REQUEST,
        })]);
        let (writer, mut crash_rx, counters) = writer(Arc::clone(&service), single_batch());

        let err = writer.run().await.unwrap_err();
        assert!(!err.is_retriable());

        // one attempt, no backoff sleeps
        assert_eq!(service.attempts.lock().unwrap().len(), 1);
        assert_eq!(counters.batches_failed.load(Ordering::Relaxed), 1);
        assert_eq!(crash_rx.recv().await, Some(()));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_is_retried() {
        let service = MockService::scripted(vec![Err(DeliveryError::RateLimited), Ok(())]);
        let (writer, _crash_rx, counters) = writer(Arc::clone(&service), single_batch());

        writer.run().await.unwrap();

        assert_eq!(service.attempts.lock().unwrap().len(), 2);
        assert_eq!(counters.batches_delivered.load(Ordering::Relaxed), 1);
    }
}
