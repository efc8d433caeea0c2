//! Bounded fan-out of per-file operations.
//!
//! A fixed pool of workers pulls job indices from a shared channel and sends
//! results back over a second channel. The dispatching thread decides what
//! starts next: jobs start in submission order, a job never starts while
//! another job on the same path is running, and nothing new starts once any
//! job has failed. A job that panics counts as a failed job.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Mutex, PoisonError};
use std::thread;

use thiserror::Error;
use tracing::{debug, warn};

const CONCURRENCY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::concurrency");

/// A job that panicked instead of returning a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("operation panicked: {message}")]
pub struct JobPanicked {
    /// Panic message, when the payload carried one.
    pub message: String,
}

impl JobPanicked {
    fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|text| (*text).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self { message }
    }
}

/// Results of a bounded run, indexed by submission order.
#[derive(Debug)]
pub struct LimiterReport<R, E> {
    outcomes: Vec<Option<Result<R, E>>>,
}

impl<R, E> LimiterReport<R, E> {
    /// The earliest submitted job that ran and failed.
    #[must_use]
    pub fn first_failure(&self) -> Option<(usize, &E)> {
        self.outcomes
            .iter()
            .enumerate()
            .find_map(|(index, outcome)| match outcome {
                Some(Err(error)) => Some((index, error)),
                _ => None,
            })
    }

    /// True when every job ran and succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|outcome| matches!(outcome, Some(Ok(_))))
    }

    /// Number of jobs that ran.
    #[must_use]
    pub fn started(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_some()).count()
    }

    /// Per-job outcomes; `None` marks a job that never started.
    #[must_use]
    pub fn into_outcomes(self) -> Vec<Option<Result<R, E>>> {
        self.outcomes
    }
}

/// Runs jobs with at most a fixed number in flight.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConcurrencyLimiter {
    max_in_flight: usize,
}

impl ConcurrencyLimiter {
    /// Creates a limiter allowing `max_in_flight` concurrent jobs (at least
    /// one).
    #[must_use]
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Maximum concurrent jobs.
    #[must_use]
    pub const fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Runs `work` over `jobs`, keyed by the path `key` returns.
    ///
    /// Returns once every started job has finished. A panicking job is
    /// recorded as an error converted from [`JobPanicked`].
    pub fn run<J, R, E, K, W>(&self, jobs: &[J], key: K, work: W) -> LimiterReport<R, E>
    where
        J: Sync,
        R: Send,
        E: Send + From<JobPanicked>,
        K: Fn(&J) -> &Path,
        W: Fn(&J) -> Result<R, E> + Sync,
    {
        let workers = self.max_in_flight.min(jobs.len());
        let mut outcomes: Vec<Option<Result<R, E>>> = jobs.iter().map(|_| None).collect();
        if workers == 0 {
            return LimiterReport { outcomes };
        }
        debug!(
            target: CONCURRENCY_TARGET,
            jobs = jobs.len(),
            workers,
            "starting bounded run"
        );

        let (job_tx, job_rx) = mpsc::channel::<usize>();
        let job_rx = Mutex::new(job_rx);
        let (done_tx, done_rx) = mpsc::channel::<(usize, Result<R, E>)>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let done_tx = done_tx.clone();
                let job_rx = &job_rx;
                let work = &work;
                scope.spawn(move || {
                    loop {
                        let next = job_rx
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .recv();
                        let Ok(index) = next else { break };
                        let result = panic::catch_unwind(AssertUnwindSafe(|| work(&jobs[index])))
                            .unwrap_or_else(|payload| {
                                Err(E::from(JobPanicked::from_payload(payload.as_ref())))
                            });
                        if done_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            let mut pending: Vec<usize> = (0..jobs.len()).collect();
            let mut busy: HashSet<&Path> = HashSet::new();
            let mut in_flight = 0;
            let mut failed = false;
            loop {
                while !failed && in_flight < workers {
                    let Some(slot) = pending
                        .iter()
                        .position(|&index| !busy.contains(key(&jobs[index])))
                    else {
                        break;
                    };
                    let index = pending.remove(slot);
                    if job_tx.send(index).is_err() {
                        break;
                    }
                    busy.insert(key(&jobs[index]));
                    in_flight += 1;
                }
                if in_flight == 0 {
                    break;
                }
                let Ok((index, result)) = done_rx.recv() else {
                    break;
                };
                in_flight -= 1;
                busy.remove(key(&jobs[index]));
                if result.is_err() && !failed {
                    failed = true;
                    warn!(
                        target: CONCURRENCY_TARGET,
                        job = index,
                        skipped = pending.len(),
                        "job failed; no further jobs will start"
                    );
                }
                outcomes[index] = Some(result);
            }
            drop(job_tx);
        });

        LimiterReport { outcomes }
    }
}
