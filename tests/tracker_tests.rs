
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use reco::config::RetryPolicy;
use reco::job::{JobQuery, JobStatus, JobType};
use reco::{RecoError, StatusTracker};
use test_harness::{record, record_at, tracker, ScriptedApi, Step};
use tracing_subscriber::fmt::MakeWriter;

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test(start_paused = true)]
async fn test_wait_reaches_target() {
    let api = ScriptedApi::new();
    api.script_statuses("b1", &["SUBMITTED", "QUEUED", "STARTED"]);
    let tracker = tracker(api.clone());

    let start = Instant::now();
    tracker
        .wait_for_status(
            JobType::Build,
            "b1",
            &JobStatus::Started,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(api.fetch_count(), 3);
    // two sleeps of the default 10s interval on the paused clock
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(20));
    assert!(elapsed < Duration::from_secs(21));
}

#[tokio::test(start_paused = true)]
async fn test_wait_returns_immediately_when_already_there() {
    let api = ScriptedApi::new();
    api.script("b2", vec![Step::Record(record("b2", &["SUBMITTED", "STARTED"]))]);
    let tracker = tracker(api.clone());

    tracker
        .wait_for_status(
            JobType::Build,
            "b2",
            &JobStatus::Started,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(api.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_fails_on_other_terminal_status() {
    let api = ScriptedApi::new();
    api.script_statuses("s1", &["SUBMITTED", "QUEUED", "ERRORED"]);
    let tracker = tracker(api.clone());

    let err = tracker
        .wait_for_status(
            JobType::Simulation,
            "s1",
            &JobStatus::Started,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        RecoError::UnexpectedTermination { expected, actual } => {
            assert_eq!(expected, JobStatus::Started);
            assert_eq!(actual, JobStatus::Errored);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(api.fetch_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_completed_passes_through_started() {
    let api = ScriptedApi::new();
    api.script_statuses("b1", &["SUBMITTED", "STARTED", "COMPLETED"]);
    let tracker = tracker(api.clone());

    tracker
        .wait_for_status(
            JobType::Build,
            "b1",
            &JobStatus::Completed,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_job_stops_the_wait() {
    let api = ScriptedApi::new();
    let mut timed_out = record("b1", &["SUBMITTED", "STARTED", "ERRORED"]);
    timed_out.events[2].code = 124;
    let timed_out = reco::JobRecord::new("b1", timed_out.events);
    api.script(
        "b1",
        vec![
            Step::Record(record("b1", &["SUBMITTED"])),
            Step::Record(timed_out),
        ],
    );
    let tracker = tracker(api.clone());

    let err = tracker
        .wait_for_status(
            JobType::Build,
            "b1",
            &JobStatus::Completed,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RecoError::UnexpectedTermination {
            actual: JobStatus::TimedOut,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_failure_reads_as_errored() {
    let api = ScriptedApi::new();
    api.script("d1", vec![Step::Unreachable]);
    let tracker = tracker(api.clone());

    assert_eq!(
        tracker.get_status(JobType::Deployment, "d1").await,
        JobStatus::Errored
    );
    // the distinguishable variant keeps the cause
    assert!(matches!(
        tracker.fetch(JobType::Deployment, "d1").await,
        Err(RecoError::Network(_))
    ));

    let err = tracker
        .wait_for_status(
            JobType::Deployment,
            "d1",
            &JobStatus::Started,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RecoError::UnexpectedTermination {
            actual: JobStatus::Errored,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_job_is_errored() {
    let api = ScriptedApi::new();
    let tracker = tracker(api);
    assert_eq!(
        tracker.get_status(JobType::Build, "missing").await,
        JobStatus::Errored
    );
}

#[tokio::test(start_paused = true)]
async fn test_wait_respects_deadline() {
    let api = ScriptedApi::new();
    api.script_statuses("b1", &["QUEUED"]);
    let policy = RetryPolicy::default().with_deadline(Duration::from_secs(25));
    let tracker = StatusTracker::new(api.clone(), policy);

    let start = Instant::now();
    let err = tracker
        .wait_for_status(
            JobType::Build,
            "b1",
            &JobStatus::Started,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RecoError::WaitDeadlineExceeded(d) if d == Duration::from_secs(25)));
    // polls at 0s, 10s, 20s and once more at the deadline
    assert_eq!(api.fetch_count(), 4);
    assert!(start.elapsed() >= Duration::from_secs(25));
    assert!(start.elapsed() < Duration::from_secs(26));
}

#[tokio::test(start_paused = true)]
async fn test_wait_can_be_cancelled() {
    let api = ScriptedApi::new();
    api.script_statuses("b1", &["QUEUED"]);
    let tracker = tracker(api.clone());
    let cancel = CancellationToken::new();

    let waiter = {
        let tracker = tracker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tracker
                .wait_for_status(JobType::Build, "b1", &JobStatus::Started, &cancel)
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(35)).await;
    cancel.cancel();

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(RecoError::Cancelled)));
    assert_eq!(api.fetch_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_custom_interval() {
    let api = ScriptedApi::new();
    api.script_statuses("b1", &["QUEUED", "QUEUED", "QUEUED", "STARTED"]);
    let policy = RetryPolicy::default().with_interval(Duration::from_millis(500));
    let tracker = StatusTracker::new(api.clone(), policy);

    let start = Instant::now();
    tracker
        .wait_for_status(
            JobType::Build,
            "b1",
            &JobStatus::Started,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(api.fetch_count(), 4);
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_status_logged_only_on_change() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let api = ScriptedApi::new();
    api.script_statuses("b1", &["QUEUED", "QUEUED", "QUEUED", "STARTED"]);
    let tracker = tracker(api.clone());

    tracker
        .wait_for_status(
            JobType::Build,
            "b1",
            &JobStatus::Started,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(api.fetch_count(), 4);

    let status_lines: Vec<String> = logs
        .lines()
        .into_iter()
        .filter(|l| l.contains("status: "))
        .collect();
    assert_eq!(status_lines.len(), 2, "{:?}", status_lines);
    assert!(status_lines[0].contains("status: QUEUED"));
    assert!(status_lines[1].contains("status: STARTED"));

    // the queued hint follows the first status line only
    let hints = logs
        .lines()
        .into_iter()
        .filter(|l| l.contains("Waiting for Batch job to start"))
        .count();
    assert_eq!(hints, 1);
}

#[tokio::test]
async fn test_list_filters_sorts_and_limits() {
    let api = ScriptedApi::new();
    api.set_listing(
        JobType::Deployment,
        vec![
            record_at("d-old", 0, &["SUBMITTED", "STARTED", "COMPLETED"]),
            record_at("d-running", 500, &["SUBMITTED", "STARTED"]),
            record_at("d-new", 900, &["SUBMITTED", "STARTED", "COMPLETED"]),
            record_at("d-mid", 300, &["SUBMITTED", "STARTED", "COMPLETED"]),
        ],
    );
    let tracker = tracker(api.clone());

    let all = tracker
        .list(JobType::Deployment, &JobQuery::new())
        .await
        .unwrap();
    let ids: Vec<&str> = all.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["d-new", "d-running", "d-mid", "d-old"]);

    let query = JobQuery::new()
        .with_status(JobStatus::from("completed"))
        .with_limit(2);
    let done = tracker.list(JobType::Deployment, &query).await.unwrap();
    let ids: Vec<&str> = done.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["d-new", "d-mid"]);

    // other kinds are listed separately
    assert!(tracker
        .list(JobType::Build, &JobQuery::new())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(api.fetch_count(), 0);
}
