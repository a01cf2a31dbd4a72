// zephyr_scraper - Weather station telemetry acquisition and health monitoring
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! Process wide trigger for the periodic jobs.
//!
//! Jobs are registered once at startup along with their schedule. Each firing runs in its
//! own task, so a slow run never delays the next one. Runs of the same job may overlap.

use crate::bucket::Clock;
use crate::metrics::PipelineMetrics;
use crate::schedule::Schedule;
use crate::store::StoreError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("unknown job {0}")]
    UnknownJob(String),
}

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<(), JobError>;
}

struct Entry {
    schedule: Schedule,
    job: Arc<dyn Job>,
}

pub struct JobRegistry {
    entries: Vec<Entry>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
}

impl JobRegistry {
    pub fn new(clock: Arc<dyn Clock>, metrics: Arc<PipelineMetrics>) -> Self {
        JobRegistry {
            entries: Vec::new(),
            clock,
            metrics,
        }
    }

    pub fn register(&mut self, schedule: Schedule, job: Arc<dyn Job>) -> &mut Self {
        self.entries.push(Entry { schedule, job });
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.job.name()).collect()
    }

    /// Run a single job by name, immediately, and wait for it.
    pub async fn run_job(&self, name: &str) -> Result<(), SchedulerError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.job.name() == name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_owned()))?;

        execute(entry.job.clone(), self.metrics.clone()).await;
        Ok(())
    }

    /// Start a trigger loop for every registered job. The returned handles run until aborted.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.entries
            .iter()
            .map(|e| {
                let schedule = e.schedule.clone();
                let job = e.job.clone();
                let clock = self.clock.clone();
                let metrics = self.metrics.clone();

                tracing::info!(message = "scheduled job", service = "scheduler", job = job.name(), schedule = %schedule);
                tokio::spawn(trigger_loop(schedule, job, clock, metrics))
            })
            .collect()
    }
}

async fn trigger_loop(schedule: Schedule, job: Arc<dyn Job>, clock: Arc<dyn Clock>, metrics: Arc<PipelineMetrics>) {
    let mut after = clock.now();
    loop {
        let next = match schedule.next_after(after) {
            Some(t) => t,
            None => {
                tracing::error!(message = "schedule never fires", service = "scheduler", job = job.name(), schedule = %schedule);
                return;
            }
        };

        tokio::time::sleep((next - clock.now()).to_std().unwrap_or(Duration::ZERO)).await;
        tokio::spawn(execute(job.clone(), metrics.clone()));
        // Next firing is relative to this one, not to the clock
        after = next;
    }
}

/// Run `job` once, recording how long it took. Errors are logged and go no further.
async fn execute(job: Arc<dyn Job>, metrics: Arc<PipelineMetrics>) {
    let name = job.name();
    let start = Instant::now();
    tracing::debug!(message = "job starting", service = "scheduler", job = name);

    let res = job.run().await;
    let elapsed = start.elapsed();
    metrics.job_finished(name, elapsed);

    match res {
        Ok(()) => {
            tracing::info!(message = "job finished", service = "scheduler", job = name, elapsed_ms = elapsed.as_millis() as u64)
        }
        Err(e) => {
            tracing::error!(message = "job failed", service = "scheduler", job = name, elapsed_ms = elapsed.as_millis() as u64, error = %e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Job, JobError, JobRegistry, SchedulerError};
    use crate::bucket::{Clock, SystemClock};
    use crate::metrics::PipelineMetrics;
    use crate::model::Timestamp;
    use crate::schedule::Schedule;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use chrono::{DurationRound, TimeZone, Utc};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Wall clock that follows tokio's (possibly paused) time.
    #[derive(Debug)]
    struct TokioClock {
        base: Timestamp,
        origin: tokio::time::Instant,
    }

    impl TokioClock {
        fn starting_at(base: Timestamp) -> Self {
            TokioClock {
                base,
                origin: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> Timestamp {
            let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
            self.base + elapsed
        }
    }

    /// Records the second each run started at, then takes `duration` to finish.
    struct Timed {
        name: &'static str,
        clock: Arc<TokioClock>,
        duration: Duration,
        started: Mutex<Vec<Timestamp>>,
        finished: AtomicUsize,
    }

    impl Timed {
        fn new(name: &'static str, clock: Arc<TokioClock>, duration: Duration) -> Self {
            Timed {
                name,
                clock,
                duration,
                started: Mutex::new(Vec::new()),
                finished: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Job for Timed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self) -> Result<(), JobError> {
            let now = self.clock.now();
            self.started
                .lock()
                .push(now.duration_trunc(chrono::Duration::seconds(1)).unwrap_or(now));
            tokio::time::sleep(self.duration).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Counting {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Job for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self) -> Result<(), JobError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Job for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(&self) -> Result<(), JobError> {
            Err(StoreError::Backend("unavailable".to_owned()).into())
        }
    }

    #[tokio::test]
    async fn test_run_job_by_name() {
        let job = Arc::new(Counting::default());
        let metrics = Arc::new(PipelineMetrics::detached());
        let mut registry = JobRegistry::new(Arc::new(SystemClock), metrics);
        registry
            .register(Schedule::new("0 */10 * * * *").unwrap(), job.clone())
            .register(Schedule::new("0 0 0 * * *").unwrap(), Arc::new(Failing));

        registry.run_job("counting").await.unwrap();
        registry.run_job("counting").await.unwrap();
        assert_eq!(2, job.runs.load(Ordering::SeqCst));

        // Job failures are contained
        registry.run_job("failing").await.unwrap();

        assert_eq!(
            Err(SchedulerError::UnknownJob("nope".to_owned())),
            registry.run_job("nope").await
        );
        assert_eq!(vec!["counting", "failing"], registry.names());
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_fire_on_their_slots() {
        let at = |m: u32| Utc.with_ymd_and_hms(2024, 3, 1, 12, m, 0).unwrap();
        let clock = Arc::new(TokioClock::starting_at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 7, 45).unwrap()));

        // Each run outlasts the gap to the next slot
        let slow = Arc::new(Timed::new("slow", clock.clone(), Duration::from_secs(25 * 60)));
        let hourly = Arc::new(Timed::new("hourly", clock.clone(), Duration::from_secs(1)));

        let mut registry = JobRegistry::new(clock.clone(), Arc::new(PipelineMetrics::detached()));
        registry
            .register(Schedule::new("0 */10 * * * *").unwrap(), slow.clone())
            .register(Schedule::new("0 15 * * * *").unwrap(), hourly.clone());

        let handles = registry.start();
        assert_eq!(2, handles.len());

        // Until 12:37:45
        tokio::time::sleep(Duration::from_secs(30 * 60)).await;

        assert_eq!(vec![at(10), at(20), at(30)], *slow.started.lock());
        assert_eq!(1, slow.finished.load(Ordering::SeqCst));
        assert_eq!(vec![at(15)], *hourly.started.lock());
        assert_eq!(1, hourly.finished.load(Ordering::SeqCst));

        for handle in handles {
            handle.abort();
        }
    }
}
