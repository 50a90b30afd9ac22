use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use serde_json::json;
use sluice::batch::{BatchSettings, EventBatch};
use sluice::client::{DeliveryError, DeliveryService};
use sluice::event::Event;
use sluice::pipeline::{Pipeline, PipelineOutcome};
use sluice::processor::ClosedError;
use sluice::sources::{self, Format, Properties};
use sluice::writer::RetrySettings;
use tokio::time::Instant;

struct MockService {
    outcomes: Mutex<VecDeque<Result<(), DeliveryError>>>,
    delivered: Mutex<Vec<Vec<Event>>>,
    attempts: AtomicUsize,
    attempt_times: Mutex<Vec<Instant>>,
}

impl MockService {
    fn ok() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    fn scripted(outcomes: Vec<Result<(), DeliveryError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            delivered: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            attempt_times: Mutex::new(Vec::new()),
        })
    }

    fn delivered(&self) -> Vec<Vec<Event>> {
        self.delivered.lock().unwrap().clone()
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    fn attempt_gaps(&self) -> Vec<Duration> {
        let times = self.attempt_times.lock().unwrap();
        times.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }
}

#[async_trait]
impl DeliveryService for Arc<MockService> {
    async fn deliver(&self, batch: &EventBatch) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.attempt_times.lock().unwrap().push(Instant::now());

        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.delivered
                .lock()
                .unwrap()
                .push(batch.events().to_vec());
        }

        outcome
    }
}

fn server_error() -> DeliveryError {
    DeliveryError::Server {
        status: StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn event(n: usize) -> Event {
    Event::new(json!({ "n": n })).with_timestamp(0, 0)
}

#[tokio::test(start_paused = true)]
async fn shutdown_drain_delivers_single_batch() {
    let service = MockService::ok();
    let (pipeline, submitter) =
        Pipeline::start(BatchSettings::default(), RetrySettings::default(), Arc::clone(&service));

    for n in 0..10 {
        submitter.submit(event(n)).await.unwrap();
    }
    // let the processor drain the hand-off slot before closing
    tokio::time::sleep(Duration::from_millis(1)).await;

    let report = pipeline.close().await;

    assert!(report.is_success());
    assert_eq!(report.counters.events_accepted, 10);
    assert_eq!(report.counters.batches_emitted, 1);
    assert_eq!(report.counters.batches_delivered, 1);
    assert_eq!(report.counters.batches_failed, 0);

    let delivered = service.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].len(), 10);

    // no further events are accepted after close
    assert_eq!(submitter.submit(event(99)).await, Err(ClosedError));
}

#[tokio::test(start_paused = true)]
async fn no_event_is_lost_or_reordered() {
    let service = MockService::ok();
    let settings = BatchSettings {
        max_events: 7,
        ..Default::default()
    };
    let (pipeline, submitter) =
        Pipeline::start(settings, RetrySettings::default(), Arc::clone(&service));

    let mut expected = Vec::new();
    for n in 0..100 {
        let event = event(n);
        expected.push(event.clone());
        submitter.submit(event).await.unwrap();
    }
    drop(submitter);
    tokio::time::sleep(Duration::from_millis(1)).await;

    let report = pipeline.close().await;
    assert!(report.is_success());
    assert_eq!(report.counters.events_accepted, 100);
    assert_eq!(
        report.counters.batches_emitted,
        report.counters.batches_delivered
    );

    let delivered = service.delivered();
    for batch in &delivered {
        assert!(batch.len() <= 7);
    }
    let flattened = delivered.into_iter().flatten().collect::<Vec<_>>();
    assert_eq!(flattened, expected);
}

#[tokio::test(start_paused = true)]
async fn emitted_batches_stay_under_byte_cap() {
    let service = MockService::ok();
    let size = event(0).size();
    let settings = BatchSettings {
        // room for three events
        max_bytes: size * 3 + 1,
        ..Default::default()
    };
    let (pipeline, submitter) =
        Pipeline::start(settings, RetrySettings::default(), Arc::clone(&service));

    for n in 0..10 {
        submitter.submit(event(n)).await.unwrap();
    }
    drop(submitter);
    tokio::time::sleep(Duration::from_millis(1)).await;

    let report = pipeline.close().await;
    assert!(report.is_success());

    let delivered = service.delivered();
    assert_eq!(
        delivered.iter().map(Vec::len).sum::<usize>(),
        10,
        "all events accounted for"
    );
    for batch in &delivered {
        assert!(batch.len() <= 3);
        let bytes: u64 = batch.iter().map(Event::size).sum();
        assert!(bytes < size * 3 + 1);
    }
}

#[tokio::test(start_paused = true)]
async fn lone_event_is_flushed_by_the_timer() {
    let service = MockService::ok();
    let (pipeline, submitter) = Pipeline::start(
        BatchSettings::default(),
        RetrySettings::default(),
        Arc::clone(&service),
    );

    submitter.submit(event(0)).await.unwrap();

    // no capacity pressure and no shutdown, only the 3s window passes
    tokio::time::sleep(Duration::from_millis(3100)).await;

    assert_eq!(service.delivered().len(), 1);

    let report = pipeline.close().await;
    assert!(report.is_success());
    assert_eq!(report.counters.batches_delivered, 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_growing_delays() {
    sluice::trace::test_init();

    let service = MockService::scripted(vec![Err(server_error()), Err(server_error()), Ok(())]);
    let (pipeline, submitter) = Pipeline::start(
        BatchSettings::default(),
        RetrySettings::default(),
        Arc::clone(&service),
    );

    submitter.submit(event(0)).await.unwrap();
    drop(submitter);
    tokio::time::sleep(Duration::from_millis(1)).await;

    let report = pipeline.close().await;
    assert!(report.is_success());
    assert_eq!(report.counters.batches_delivered, 1);
    assert_eq!(service.attempts(), 3);

    let gaps = service.attempt_gaps();
    assert_eq!(gaps.len(), 2);
    assert!(gaps[0] >= Duration::from_secs(1) && gaps[0] <= Duration::from_millis(1500));
    assert!(gaps[1] >= Duration::from_secs(2) && gaps[1] <= Duration::from_secs(3));
    assert!(gaps[1] >= gaps[0]);
}

#[tokio::test(start_paused = true)]
async fn persistent_failure_exhausts_the_budget_and_stops_the_pipeline() {
    sluice::trace::test_init();

    let service = MockService::scripted(vec![
        Err(server_error()),
        Err(server_error()),
        Err(server_error()),
    ]);
    let (mut pipeline, submitter) = Pipeline::start(
        BatchSettings::default(),
        RetrySettings::default(),
        Arc::clone(&service),
    );

    submitter.submit(event(0)).await.unwrap();
    drop(submitter);

    pipeline.crashed().await;

    let report = pipeline.close().await;
    assert!(!report.is_success());
    assert!(matches!(
        report.outcome,
        PipelineOutcome::DeliveryFailed(DeliveryError::Server { .. })
    ));
    assert_eq!(service.attempts(), 3);
    assert_eq!(report.counters.batches_failed, 1);
    assert_eq!(report.counters.batches_delivered, 0);
}

#[tokio::test(start_paused = true)]
async fn client_error_is_not_retried() {
    let service = MockService::scripted(vec![Err(DeliveryError::Client {
        status: StatusCode::BAD_REQUEST,
    })]);
    let (mut pipeline, submitter) = Pipeline::start(
        BatchSettings::default(),
        RetrySettings::default(),
        Arc::clone(&service),
    );

    submitter.submit(event(0)).await.unwrap();
    drop(submitter);

    pipeline.crashed().await;

    let report = pipeline.close().await;
    assert!(matches!(
        report.outcome,
        PipelineOutcome::DeliveryFailed(DeliveryError::Client { .. })
    ));
    assert_eq!(service.attempts(), 1);
    assert_eq!(report.counters.batches_failed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn counters_never_tear_under_concurrent_reads() {
    let service = MockService::ok();
    let settings = BatchSettings {
        max_events: 10,
        ..Default::default()
    };
    let (pipeline, submitter) =
        Pipeline::start(settings, RetrySettings::default(), Arc::clone(&service));

    // fixed-width bodies so every event serializes to the same size
    let fixed_event = |n: usize| Event::new(json!({ "n": format!("{n:04}") })).with_timestamp(0, 0);

    let feeder = tokio::spawn(async move {
        for n in 0..500 {
            submitter.submit(fixed_event(n)).await.unwrap();
        }
    });

    let size = fixed_event(0).size();
    let mut last = pipeline.counters();
    while last.events_accepted < 500 {
        let next = pipeline.counters();

        // every counter is monotone, a torn read would show up as a
        // value that goes backwards or lands between event sizes
        assert!(next.events_accepted >= last.events_accepted);
        assert!(next.bytes_accepted >= last.bytes_accepted);
        assert!(next.bytes_accepted % size == 0);
        assert!(next.batches_emitted >= last.batches_emitted);
        assert!(next.batches_delivered >= last.batches_delivered);

        last = next;
        tokio::task::yield_now().await;
    }

    feeder.await.unwrap();

    let report = pipeline.close().await;
    assert!(report.is_success());
    assert_eq!(report.counters.events_accepted, 500);
    assert_eq!(report.counters.bytes_accepted, 500 * size);
    assert_eq!(
        report.counters.batches_emitted,
        report.counters.batches_delivered
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn csv_file_flows_end_to_end() {
    let service = MockService::ok();
    let (pipeline, submitter) = Pipeline::start(
        BatchSettings::default(),
        RetrySettings::default(),
        Arc::clone(&service),
    );

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "name,level").unwrap();
    writeln!(file, "alpha,info").unwrap();
    writeln!(file, "beta,warn").unwrap();
    file.flush().unwrap();

    let path = file.path().to_path_buf();
    let properties = Properties {
        sourcetype: Some("csv".into()),
        ..Default::default()
    };
    let producer = tokio::task::spawn_blocking(move || {
        let reader = std::io::BufReader::new(std::fs::File::open(path).unwrap());
        sources::produce(Format::Csv, reader, &properties, &submitter)
    });

    assert_eq!(producer.await.unwrap().unwrap(), 2);

    let report = pipeline.close().await;
    assert!(report.is_success());
    assert_eq!(report.counters.events_accepted, 2);
    assert_eq!(report.counters.batches_delivered, 1);

    let delivered = service.delivered();
    assert_eq!(delivered[0][0].body()["name"], "alpha");
    assert_eq!(delivered[0][1].body()["level"], "warn");
}
