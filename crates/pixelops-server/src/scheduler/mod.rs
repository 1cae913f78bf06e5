use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::state::AppState;

pub mod jobs;

/// How often the dispatcher wakes up to look for due jobs.
const DISPATCH_TICK: Duration = Duration::from_secs(30);

/// A fixed-cadence background job.
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Cadence of the job. Also the deadline of a single run.
    fn interval(&self) -> Duration;

    async fn run(&self, state: &AppState) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Started,
    /// The previous run is still executing; this tick is dropped.
    SkippedRunning,
}

/// Clears a job's running flag when its task ends, including on panic.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Slot {
    job: Arc<dyn ScheduledJob>,
    running: Arc<AtomicBool>,
    next_due: Instant,
}

pub struct Scheduler {
    state: AppState,
    slots: Vec<Slot>,
}

impl Scheduler {
    /// Each job first becomes due one interval after `start`.
    pub fn new(state: AppState, jobs: Vec<Arc<dyn ScheduledJob>>, start: Instant) -> Self {
        let slots = jobs
            .into_iter()
            .map(|job| Slot {
                next_due: start + job.interval(),
                job,
                running: Arc::new(AtomicBool::new(false)),
            })
            .collect();
        Self { state, slots }
    }

    pub fn with_default_jobs(state: AppState) -> Self {
        Self::new(state, jobs::default_jobs(), Instant::now())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.slots
            .iter()
            .any(|s| s.job.name() == name && s.running.load(Ordering::Acquire))
    }

    /// Fire every job due at `now`. Returns what happened to each due job.
    pub fn tick_at(&mut self, now: Instant) -> Vec<(&'static str, FireOutcome)> {
        let mut fired = Vec::new();
        for slot in &mut self.slots {
            if now < slot.next_due {
                continue;
            }
            slot.next_due = now + slot.job.interval();
            let outcome = fire(&self.state, slot);
            fired.push((slot.job.name(), outcome));
        }
        fired
    }

    /// Dispatcher loop. Never returns; job failures are logged only.
    pub async fn run(mut self) {
        info!(
            jobs = self.slots.len(),
            tick_seconds = DISPATCH_TICK.as_secs(),
            "scheduler started"
        );
        let mut interval = tokio::time::interval(DISPATCH_TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick_at(Instant::now());
        }
    }
}

fn fire(state: &AppState, slot: &Slot) -> FireOutcome {
    let name = slot.job.name();
    if slot
        .running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        warn!(job = name, "previous run still in progress; skipping tick");
        return FireOutcome::SkippedRunning;
    }

    let guard = RunningGuard(Arc::clone(&slot.running));
    let job = Arc::clone(&slot.job);
    let state = state.clone();
    tokio::spawn(async move {
        let _guard = guard;
        let deadline = job.interval();
        let started = Instant::now();
        match tokio::time::timeout(deadline, job.run(&state)).await {
            Ok(Ok(())) => info!(
                job = name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "job finished"
            ),
            Ok(Err(e)) => error!(job = name, error = %e, "job failed"),
            Err(_) => error!(
                job = name,
                deadline_seconds = deadline.as_secs(),
                "job exceeded its deadline and was cancelled"
            ),
        }
    });
    FireOutcome::Started
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Notify;

    use pixelops_core::config::Config;
    use pixelops_duckdb::DuckDbBackend;

    use super::*;

    fn state() -> AppState {
        AppState::new(
            DuckDbBackend::open_in_memory().expect("open"),
            Config::default(),
        )
    }

    /// Blocks until released, counting its runs.
    struct GatedJob {
        runs: Arc<AtomicUsize>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ScheduledJob for GatedJob {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(60)
        }

        async fn run(&self, _state: &AppState) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(())
        }
    }

    struct FailingJob {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ScheduledJob for FailingJob {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(10)
        }

        async fn run(&self, _state: &AppState) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("boom")
        }
    }

    struct StuckJob;

    #[async_trait]
    impl ScheduledJob for StuckJob {
        fn name(&self) -> &'static str {
            "stuck"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(50)
        }

        async fn run(&self, _state: &AppState) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    async fn wait_idle(scheduler: &Scheduler, name: &str) {
        for _ in 0..1000 {
            if !scheduler.is_running(name) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn jobs_are_not_due_before_their_interval() {
        let start = Instant::now();
        let job: Arc<dyn ScheduledJob> = Arc::new(FailingJob {
            runs: Arc::new(AtomicUsize::new(0)),
        });
        let mut scheduler = Scheduler::new(state(), vec![job], start);
        assert!(scheduler.tick_at(start).is_empty());
        assert!(scheduler
            .tick_at(start + Duration::from_secs(9))
            .is_empty());
        assert_eq!(
            scheduler.tick_at(start + Duration::from_secs(10)),
            vec![("failing", FireOutcome::Started)]
        );
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped_not_queued() {
        let runs = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let start = Instant::now();
        let job: Arc<dyn ScheduledJob> = Arc::new(GatedJob {
            runs: Arc::clone(&runs),
            release: Arc::clone(&release),
        });
        let mut scheduler = Scheduler::new(state(), vec![job], start);

        let first = scheduler.tick_at(start + Duration::from_secs(60));
        assert_eq!(first, vec![("gated", FireOutcome::Started)]);
        assert!(scheduler.is_running("gated"));

        let second = scheduler.tick_at(start + Duration::from_secs(120));
        assert_eq!(second, vec![("gated", FireOutcome::SkippedRunning)]);

        release.notify_one();
        wait_idle(&scheduler, "gated").await;
        assert!(!scheduler.is_running("gated"));

        let third = scheduler.tick_at(start + Duration::from_secs(180));
        assert_eq!(third, vec![("gated", FireOutcome::Started)]);
        release.notify_one();
        wait_idle(&scheduler, "gated").await;

        // The skipped tick never ran.
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_job_keeps_its_schedule() {
        let runs = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();
        let job: Arc<dyn ScheduledJob> = Arc::new(FailingJob {
            runs: Arc::clone(&runs),
        });
        let mut scheduler = Scheduler::new(state(), vec![job], start);

        scheduler.tick_at(start + Duration::from_secs(10));
        wait_idle(&scheduler, "failing").await;
        let again = scheduler.tick_at(start + Duration::from_secs(20));
        assert_eq!(again, vec![("failing", FireOutcome::Started)]);
        wait_idle(&scheduler, "failing").await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_past_deadline_is_cancelled() {
        let start = Instant::now();
        let job: Arc<dyn ScheduledJob> = Arc::new(StuckJob);
        let mut scheduler = Scheduler::new(state(), vec![job], start);

        scheduler.tick_at(start + Duration::from_millis(50));
        assert!(scheduler.is_running("stuck"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!scheduler.is_running("stuck"));
    }
}
