//! # Background periodic jobs
//!
//! A small interval scheduler running each job in its own tokio task. The ticks of one job are run one after the
//! other inside its task, so a job never runs concurrently with itself and its ticks are always in order. When a
//! tick takes longer than the period, the following ticks are delayed rather than bunched up.
//!
//! ``` no_run
//! # use std::time::Duration;
//! # use pnr::scheduler::{BackgroundScheduler, PeriodicJob};
//! struct Beat;
//!
//! #[async_trait::async_trait]
//! impl PeriodicJob for Beat {
//!     async fn tick(&self) {
//!         println!("beat");
//!     }
//! }
//!
//! # async fn run() -> pnr::Result<()> {
//! let mut scheduler = BackgroundScheduler::new();
//! scheduler.add_job(Beat, Duration::from_secs(2))?;
//! tokio::time::sleep(Duration::from_secs(10)).await;
//! scheduler.shutdown(false).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::{Error, Result};

/// A job run at a fixed period
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    /// Run once. Called every period, never concurrently with itself.
    async fn tick(&self);

    /// Name used in logs
    fn name(&self) -> &str {
        "periodic job"
    }
}

#[async_trait]
impl<T: PeriodicJob> PeriodicJob for Arc<T> {
    async fn tick(&self) {
        self.as_ref().tick().await
    }

    fn name(&self) -> &str {
        self.as_ref().name()
    }
}

struct ScheduledJob {
    name: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// # Background scheduler
///
/// Jobs keep running until [BackgroundScheduler::shutdown()] is called or the scheduler is dropped.
#[derive(Default)]
pub struct BackgroundScheduler {
    jobs: Vec<ScheduledJob>,
}

impl BackgroundScheduler {
    /// Scheduler with no job
    pub fn new() -> Self {
        Self::default()
    }

    /// Start running `job` every `every`. The first tick happens one period from now.
    ///
    /// Must be called from within a tokio runtime. A zero period is an [Error::InvalidConfig].
    pub fn add_job(&mut self, job: impl PeriodicJob, every: Duration) -> Result<()> {
        if every.is_zero() {
            return Err(Error::InvalidConfig(format!(
                "period of '{}' must be greater than zero",
                job.name()
            )));
        }

        let name = job.name().to_owned();
        log::debug!("Scheduling '{}' every {:?}", name, every);

        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => job.tick().await,
                    _ = stopped.changed() => break,
                }
                if *stopped.borrow() {
                    break;
                }
            }
        });

        self.jobs.push(ScheduledJob { name, stop, task });
        Ok(())
    }

    /// Number of running jobs
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// No job running
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Stop all jobs
    ///
    /// With `wait = false` the job tasks are aborted and the function returns at once, a tick in progress is
    /// abandoned. With `wait = true` each job finishes its current tick, if any, and the function waits for it.
    pub async fn shutdown(&mut self, wait: bool) -> Result<()> {
        let jobs = std::mem::take(&mut self.jobs);
        if !wait {
            for job in jobs {
                log::debug!("Stopping '{}'", job.name);
                job.task.abort();
            }
            return Ok(());
        }

        for job in &jobs {
            let _ = job.stop.send(true);
        }
        for job in jobs {
            log::debug!("Waiting for '{}' to stop", job.name);
            job.task.await?;
        }
        Ok(())
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        for job in &self.jobs {
            job.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Busy {
        ticks: AtomicU32,
        running: AtomicU32,
        overlapped: AtomicU32,
        busy_for: Duration,
    }

    #[async_trait]
    impl PeriodicJob for Busy {
        async fn tick(&self) {
            if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            self.ticks.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.busy_for).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct Stamps {
        start: Instant,
        at: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl PeriodicJob for Stamps {
        async fn tick(&self) {
            self.at.lock().unwrap().push(self.start.elapsed());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_one_period_after_scheduling() -> Result<()> {
        let job = Arc::new(Stamps {
            start: Instant::now(),
            at: Mutex::new(Vec::new()),
        });
        let mut scheduler = BackgroundScheduler::new();
        scheduler.add_job(job.clone(), Duration::from_secs(2))?;

        tokio::time::sleep(Duration::from_millis(6_500)).await;
        scheduler.shutdown(true).await?;

        let at: Vec<u64> = job
            .at
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.as_secs_f64().round() as u64)
            .collect();
        assert_eq!(at, vec![2, 4, 6]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ticks_never_overlap() -> Result<()> {
        let job = Arc::new(Busy {
            busy_for: Duration::from_millis(2_500),
            ..Default::default()
        });
        let mut scheduler = BackgroundScheduler::new();
        scheduler.add_job(job.clone(), Duration::from_secs(1))?;

        tokio::time::sleep(Duration::from_secs(20)).await;
        scheduler.shutdown(true).await?;

        // A tick every 2.5 s instead of every second
        let ticks = job.ticks.load(Ordering::SeqCst);
        assert!((6..=9).contains(&ticks), "{} ticks", ticks);
        assert_eq!(job.overlapped.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_without_wait_abandons_the_running_tick() -> Result<()> {
        let job = Arc::new(Busy {
            busy_for: Duration::from_secs(3600),
            ..Default::default()
        });
        let mut scheduler = BackgroundScheduler::new();
        scheduler.add_job(job.clone(), Duration::from_secs(1))?;

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(job.running.load(Ordering::SeqCst), 1);

        let started = Instant::now();
        scheduler.shutdown(false).await?;
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(scheduler.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_with_wait_lets_the_tick_finish() -> Result<()> {
        let job = Arc::new(Busy {
            busy_for: Duration::from_secs(5),
            ..Default::default()
        });
        let mut scheduler = BackgroundScheduler::new();
        scheduler.add_job(job.clone(), Duration::from_secs(1))?;

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        scheduler.shutdown(true).await?;

        assert_eq!(job.running.load(Ordering::SeqCst), 0);
        assert_eq!(job.ticks.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_scheduler_stops_its_jobs() -> Result<()> {
        let job = Arc::new(Busy::default());
        let mut scheduler = BackgroundScheduler::new();
        scheduler.add_job(job.clone(), Duration::from_secs(1))?;

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        drop(scheduler);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(job.ticks.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn zero_period_is_rejected() {
        let mut scheduler = BackgroundScheduler::new();
        let result = scheduler.add_job(Busy::default(), Duration::ZERO);

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert!(scheduler.is_empty());
    }
}
