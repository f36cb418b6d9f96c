//! Multi-instance scheduling against one shared registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use mapprint::job::{
    AccessAssertion, JobFailure, JobRunner, JobState, PrintJobEntry, PrintJobResult, ReferenceId,
    ReportArtifact,
};
use mapprint::queue::CancelOutcome;
use mapprint::registry::{MemoryRegistry, RegistryError, RegistryValue, SharedRegistry};
use mapprint::scheduler::{ClaimOutcome, ClusterConfig, ClusterCoordinator, JobScheduler, SchedulerConfig};

/// Records which instance executed which job.
#[derive(Clone, Default)]
struct Executions(Arc<Mutex<HashMap<String, Vec<String>>>>);

impl Executions {
    fn runs_of(&self, id: &str) -> usize {
        self.0.lock().get(id).map_or(0, Vec::len)
    }

    fn instances(&self) -> usize {
        let mut seen: Vec<String> = self.0.lock().values().flatten().cloned().collect();
        seen.sort();
        seen.dedup();
        seen.len()
    }
}

struct SleepyRunner {
    instance: String,
    delay: Duration,
    executions: Executions,
}

impl JobRunner for SleepyRunner {
    async fn run(
        &self,
        entry: &PrintJobEntry,
        cancel: &CancellationToken,
    ) -> Result<ReportArtifact, JobFailure> {
        self.executions
            .0
            .lock()
            .entry(entry.reference_id.to_string())
            .or_default()
            .push(self.instance.clone());

        tokio::select! {
            _ = cancel.cancelled() => Err(JobFailure::cancelled()),
            _ = tokio::time::sleep(self.delay) => Ok(ReportArtifact {
                locator: format!("file:///reports/{}.png", entry.reference_id),
                content_type: "image/png".to_string(),
            }),
        }
    }
}

fn cluster(instance: &str) -> ClusterConfig {
    ClusterConfig::default()
        .with_name("it")
        .with_instance_id(instance)
        .with_claim_ttl(Duration::from_millis(300))
        .with_discovery_interval(Duration::from_millis(20))
}

fn start<R: SharedRegistry>(
    instance: &str,
    registry: Arc<R>,
    executions: &Executions,
    delay: Duration,
) -> JobScheduler<R, SleepyRunner> {
    let config = SchedulerConfig::default()
        .with_max_concurrent_jobs(2)
        .clustered(cluster(instance));
    start_with(config, registry, executions, delay)
}

fn start_with<R: SharedRegistry>(
    config: SchedulerConfig,
    registry: Arc<R>,
    executions: &Executions,
    delay: Duration,
) -> JobScheduler<R, SleepyRunner> {
    let runner = Arc::new(SleepyRunner {
        instance: config.cluster.instance_id.clone(),
        delay,
        executions: executions.clone(),
    });
    JobScheduler::start(config, runner, registry)
}

fn entry(id: &str) -> PrintJobEntry {
    PrintJobEntry::new(
        ReferenceId::new(id).unwrap(),
        json!({"panels": []}),
        AccessAssertion::anonymous(),
    )
}

async fn wait_for_state<R: SharedRegistry>(
    scheduler: &JobScheduler<R, SleepyRunner>,
    id: &ReferenceId,
    wanted: JobState,
) {
    for _ in 0..500 {
        if let Ok(status) = scheduler.status(id).await {
            if status.state == wanted {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached {wanted}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_job_runs_exactly_once_across_instances() {
    let registry = Arc::new(MemoryRegistry::new());
    let executions = Executions::default();
    let delay = Duration::from_millis(40);
    let nodes = [
        start("node-a", Arc::clone(&registry), &executions, delay),
        start("node-b", Arc::clone(&registry), &executions, delay),
        start("node-c", Arc::clone(&registry), &executions, delay),
    ];

    let ids: Vec<ReferenceId> = (0..12).map(|i| ReferenceId::new(format!("job-{i}")).unwrap()).collect();
    for id in &ids {
        nodes[0].submit(entry(id.as_str())).await.unwrap();
    }

    for id in &ids {
        wait_for_state(&nodes[0], id, JobState::DoneSuccess).await;
    }

    // Counters are bumped right after the terminal record is written.
    tokio::time::sleep(Duration::from_millis(50)).await;
    for id in &ids {
        assert_eq!(executions.runs_of(id.as_str()), 1, "job {id} ran more than once");
    }
    let local_total: u64 = nodes.iter().map(|n| n.local_counters().jobs_run()).sum();
    assert_eq!(local_total, 12);
    assert_eq!(nodes[1].jobs_run_count().await, 12);
    assert!(executions.instances() >= 2, "discovery never moved work off node-a");
    assert_eq!(nodes[2].waiting_jobs_count().await, 0);
    assert!(nodes[1].average_time_spent_running().await.unwrap() >= delay);

    // Results of jobs run elsewhere are visible everywhere.
    let result = nodes[2].result(&ids[0]).await.unwrap().unwrap();
    assert!(result.is_success());

    for node in &nodes {
        node.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_claim_of_crashed_instance_expires_and_job_reruns() {
    let registry = Arc::new(MemoryRegistry::new());
    let dead = ClusterCoordinator::new(
        Arc::clone(&registry),
        cluster("dead").with_claim_ttl(Duration::from_millis(100)),
        Duration::from_secs(60),
    );
    let orphan = entry("orphan");
    dead.advertise(&orphan).await.unwrap();
    assert_eq!(
        dead.claim(&orphan.reference_id, orphan.submission_time).await.unwrap(),
        ClaimOutcome::Won
    );

    let executions = Executions::default();
    let live = start("live", Arc::clone(&registry), &executions, Duration::from_millis(5));

    wait_for_state(&live, &orphan.reference_id, JobState::DoneSuccess).await;
    let status = live.status(&orphan.reference_id).await.unwrap();
    assert_eq!(status.executed_by.as_deref(), Some("live"));
    assert_eq!(executions.runs_of("orphan"), 1);
    live.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_waiting_job_can_be_cancelled_from_another_instance() {
    let registry = Arc::new(MemoryRegistry::new());
    let executions = Executions::default();
    // Single workers and no discovery: "second" waits on a, and b only
    // knows it through the registry.
    let quiet = |instance: &str| {
        SchedulerConfig::default()
            .with_max_concurrent_jobs(1)
            .clustered(cluster(instance).with_discovery_interval(Duration::from_secs(60)))
    };
    let busy = Duration::from_millis(300);
    let a = start_with(quiet("a"), Arc::clone(&registry), &executions, busy);
    let b = start_with(quiet("b"), Arc::clone(&registry), &executions, busy);

    a.submit(entry("first")).await.unwrap();
    let first = ReferenceId::new("first").unwrap();
    wait_for_state(&a, &first, JobState::Running).await;
    a.submit(entry("second")).await.unwrap();
    let second = ReferenceId::new("second").unwrap();
    assert_eq!(b.status(&second).await.unwrap().state, JobState::Waiting);

    match b.cancel(&second).await {
        CancelOutcome::Cancelled(status) => assert_eq!(status.state, JobState::Cancelled),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(b.cancel(&first).await, CancelOutcome::RunningElsewhere);

    wait_for_state(&a, &first, JobState::DoneSuccess).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(executions.runs_of("second"), 0);
    assert_eq!(a.status(&second).await.unwrap().state, JobState::Cancelled);
    assert_eq!(
        b.result(&second).await.unwrap(),
        Some(PrintJobResult::cancelled_before_start())
    );

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resubmitted_id_runs_again() {
    let registry = Arc::new(MemoryRegistry::new());
    let executions = Executions::default();
    let delay = Duration::from_millis(5);
    let a = start("a", Arc::clone(&registry), &executions, delay);
    let b = start("b", Arc::clone(&registry), &executions, delay);
    let id = ReferenceId::new("report").unwrap();

    a.submit(entry("report")).await.unwrap();
    wait_for_state(&a, &id, JobState::DoneSuccess).await;
    assert_eq!(executions.runs_of("report"), 1);

    // Same id, new submission, through the other instance.
    let again = entry("report");
    b.submit(again.clone()).await.unwrap();
    for _ in 0..500 {
        let status = b.status(&id).await.unwrap();
        if status.submission_time == again.submission_time && status.state == JobState::DoneSuccess {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(executions.runs_of("report"), 2);

    // The instance that ran the first submission reports the second one.
    let status = a.status(&id).await.unwrap();
    assert_eq!(status.submission_time, again.submission_time);
    assert_eq!(status.state, JobState::DoneSuccess);

    // And resubmitting on the same instance runs it a third time.
    a.submit(entry("report")).await.unwrap();
    for _ in 0..500 {
        if executions.runs_of("report") == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(executions.runs_of("report"), 3);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_of_job_claimed_elsewhere_leaves_it_running() {
    let registry = Arc::new(MemoryRegistry::new());
    let executions = Executions::default();
    let busy = Duration::from_millis(300);

    // a has one worker and never discovers; it is kept busy so "victim"
    // waits locally while b picks it up from the registry.
    let a = start_with(
        SchedulerConfig::default()
            .with_max_concurrent_jobs(1)
            .clustered(cluster("a").with_discovery_interval(Duration::from_secs(60))),
        Arc::clone(&registry),
        &executions,
        busy,
    );
    a.submit(entry("blocker")).await.unwrap();
    wait_for_state(&a, &ReferenceId::new("blocker").unwrap(), JobState::Running).await;

    let b = start_with(
        SchedulerConfig::default()
            .with_max_concurrent_jobs(1)
            .clustered(cluster("b")),
        Arc::clone(&registry),
        &executions,
        busy,
    );
    let victim = ReferenceId::new("victim").unwrap();
    a.submit(entry("victim")).await.unwrap();
    for _ in 0..100 {
        if executions.runs_of("victim") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(executions.runs_of("victim"), 1);

    assert_eq!(a.cancel(&victim).await, CancelOutcome::RunningElsewhere);
    let state = a.status(&victim).await.unwrap().state;
    assert!(
        matches!(state, JobState::Running | JobState::DoneSuccess),
        "unexpected state {state}"
    );

    wait_for_state(&a, &victim, JobState::DoneSuccess).await;
    wait_for_state(&b, &victim, JobState::DoneSuccess).await;
    assert_eq!(executions.runs_of("victim"), 1);
    assert!(b.result(&victim).await.unwrap().unwrap().is_success());

    a.shutdown().await;
    b.shutdown().await;
}

/// A registry whose backing store is down.
struct UnreachableRegistry;

fn down<T>() -> Result<T, RegistryError> {
    Err(RegistryError::Unavailable("connection refused".to_string()))
}

impl SharedRegistry for UnreachableRegistry {
    async fn get(&self, _: &str) -> Result<Option<RegistryValue>, RegistryError> {
        down()
    }

    async fn put(&self, _: &str, _: RegistryValue) -> Result<(), RegistryError> {
        down()
    }

    async fn put_with_ttl(&self, _: &str, _: RegistryValue, _: Duration) -> Result<(), RegistryError> {
        down()
    }

    async fn delete(&self, _: &str) -> Result<bool, RegistryError> {
        down()
    }

    async fn increment_int(&self, _: &str, _: i32) -> Result<i32, RegistryError> {
        down()
    }

    async fn increment_long(&self, _: &str, _: i64) -> Result<i64, RegistryError> {
        down()
    }

    async fn set_if_absent(&self, _: &str, _: RegistryValue, _: Duration) -> Result<bool, RegistryError> {
        down()
    }

    async fn keys_with_prefix(&self, _: &str) -> Result<Vec<String>, RegistryError> {
        down()
    }
}

#[tokio::test]
async fn test_unavailable_registry_degrades_to_local_execution() {
    let executions = Executions::default();
    let scheduler = start(
        "solo",
        Arc::new(UnreachableRegistry),
        &executions,
        Duration::from_millis(5),
    );

    let id = ReferenceId::new("local-only").unwrap();
    scheduler.submit(entry(id.as_str())).await.unwrap();
    wait_for_state(&scheduler, &id, JobState::DoneSuccess).await;

    assert_eq!(executions.runs_of("local-only"), 1);
    assert_eq!(scheduler.local_counters().jobs_run(), 1);
    assert_eq!(scheduler.jobs_run_count().await, 1);
    assert_eq!(scheduler.waiting_jobs_count().await, 0);
    scheduler.shutdown().await;
}
