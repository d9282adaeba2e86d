use async_trait::async_trait;
use chrono::{DateTime, Utc};
use llmbot_core::shutdown;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// A unit of periodic work. Failures are the job's own concern; the
/// scheduler only sequences runs.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self);
}

/// Bookkeeping for one scheduler loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleState {
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
}

/// Fixed-delay scheduler.
///
/// The job runs once immediately, then again `interval` after each run
/// *completes*, so runs never overlap and a slow run pushes the next one
/// back. Setting the shutdown flag (or dropping its sender) ends the loop
/// at the next check; an in-flight run is allowed to finish.
pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub async fn run<J>(&self, job: &J, mut shutdown: watch::Receiver<bool>) -> ScheduleState
    where
        J: ScheduledJob + ?Sized,
    {
        info!(
            job = job.name(),
            interval_secs = self.interval.as_secs(),
            "Scheduler started"
        );
        let mut state = ScheduleState::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            debug!(job = job.name(), run = state.run_count + 1, "Running scheduled job");
            job.execute().await;
            state.last_run = Some(Utc::now());
            state.run_count += 1;

            debug!(job = job.name(), "Scheduler sleeping for {:?}", self.interval);
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown::requested(&mut shutdown) => break,
            }
        }

        info!(job = job.name(), runs = state.run_count, "Scheduler stopped");
        state
    }
}
