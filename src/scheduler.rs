//! Timer scheduler for a single test run.
//!
//! Three countdown timers are armed once the supervisor has sent the start
//! signal:
//!
//! - END fires once, `duration` after arming, and ends the transfer loop.
//! - FAILSAFE fires once, `duration + margin` after arming, and kills the
//!   process through the failsafe hook.
//! - REPORT fires every `interval`, first at `interval` after arming.
//!
//! Timer tasks never touch worker state; they only post [`Trigger`] values on
//! a channel drained by the transfer loop. END and REPORT share a task so a
//! report tick falling on the END instant is always posted before END.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::control::documents::{TestConfig, TestParams};
use crate::exit::codes;

/// Safety margin added to the test duration for the FAILSAFE timer.
pub const FAILSAFE_MARGIN: Duration = Duration::from_secs(10);

/// Deadline used when `created + duration` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("test duration {0} is not a valid number of seconds")]
    InvalidDuration(f64),

    #[error("report interval {0} must be a positive number of seconds")]
    InvalidInterval(f64),
}

/// Which timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    End,
    Failsafe,
    Report,
}

/// Single-consumer queue of fired timers.
pub type TriggerReceiver = mpsc::UnboundedReceiver<Trigger>;

/// Action taken when the FAILSAFE timer expires.
pub type FailsafeHook = Box<dyn FnOnce() + Send + 'static>;

/// Failsafe hook that terminates the process immediately, skipping cleanup.
pub fn exit_process() -> FailsafeHook {
    Box::new(|| {
        error!(exit_code = codes::FAILSAFE, "failsafe timer expired, terminating");
        std::process::exit(codes::FAILSAFE);
    })
}

// ---------------------------------------------------------------------------
// TestTiming
// ---------------------------------------------------------------------------

/// Validated timer settings for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestTiming {
    pub duration: Duration,
    pub report_interval: Duration,
    pub failsafe_margin: Duration,
}

impl TestTiming {
    /// Build timings from the `time` param and the `interval` config value.
    pub fn from_documents(
        config: &TestConfig,
        params: &TestParams,
        failsafe_margin: Duration,
    ) -> Result<Self, ScheduleError> {
        let duration = Duration::try_from_secs_f64(params.time)
            .map_err(|_| ScheduleError::InvalidDuration(params.time))?;

        let report_interval = Duration::try_from_secs_f64(config.interval)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or(ScheduleError::InvalidInterval(config.interval))?;

        Ok(Self {
            duration,
            report_interval,
            failsafe_margin,
        })
    }
}

fn deadline(from: Instant, after: Duration) -> Instant {
    from.checked_add(after).unwrap_or_else(|| from + FAR_FUTURE)
}

// ---------------------------------------------------------------------------
// Arming
// ---------------------------------------------------------------------------

/// Handles of the running timer tasks.
#[derive(Debug)]
pub struct ArmedTimers {
    created: Instant,
    tasks: Vec<JoinHandle<()>>,
}

impl ArmedTimers {
    /// Instant the timers were armed; all deadlines are relative to it.
    pub fn created_at(&self) -> Instant {
        self.created
    }

    pub fn is_armed(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Stop every timer. Safe to call more than once.
    pub fn cancel(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for ArmedTimers {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Arm the END, REPORT and FAILSAFE timers, measured from now.
///
/// Must be called from within a tokio runtime.
pub fn arm(timing: TestTiming, failsafe: FailsafeHook) -> (ArmedTimers, TriggerReceiver) {
    let created = Instant::now();
    let (tx, rx) = mpsc::unbounded_channel();

    let end_at = deadline(created, timing.duration);
    let failsafe_at = deadline(end_at, timing.failsafe_margin);

    debug!(
        duration_sec = timing.duration.as_secs_f64(),
        interval_sec = timing.report_interval.as_secs_f64(),
        failsafe_sec = timing.duration.saturating_add(timing.failsafe_margin).as_secs_f64(),
        "arming test timers"
    );

    let periodic_tx = tx.clone();
    let periodic = tokio::spawn(async move {
        let mut report = tokio::time::interval_at(
            deadline(created, timing.report_interval),
            timing.report_interval,
        );
        let end = tokio::time::sleep_until(end_at);
        tokio::pin!(end);

        loop {
            tokio::select! {
                biased;

                tick = report.tick() => {
                    // A late poll can surface ticks scheduled past END.
                    if tick > end_at {
                        let _ = periodic_tx.send(Trigger::End);
                        return;
                    }
                    if periodic_tx.send(Trigger::Report).is_err() {
                        return;
                    }
                }

                _ = &mut end => {
                    let _ = periodic_tx.send(Trigger::End);
                    return;
                }
            }
        }
    });

    let failsafe_task = tokio::spawn(async move {
        tokio::time::sleep_until(failsafe_at).await;
        let _ = tx.send(Trigger::Failsafe);
        failsafe();
    });

    let timers = ArmedTimers {
        created,
        tasks: vec![periodic, failsafe_task],
    };
    (timers, rx)
}
