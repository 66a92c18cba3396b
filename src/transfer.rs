//! Transfer loop: sends payloads until the END timer fires.
//!
//! ```text
//!   Running --END / FAILSAFE / send error--> Stopping --final report--> Done
//! ```
//!
//! Each iteration stamps the UDP header (if any), then races the send against
//! the trigger queue. Triggers are handled in arrival order, so a report tick
//! posted before END is reported and nothing is reported after it. Exactly one
//! final report is sent when the loop exits.

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connector::header::monotonic_timestamp;
use crate::connector::{Payload, PayloadSink};
use crate::report::Reporter;
use crate::scheduler::{Trigger, TriggerReceiver};

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Counters owned by the transfer loop.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    start_time: Instant,
}

impl Statistics {
    /// Zeroed counters with the start time set to now.
    pub fn start() -> Self {
        Self {
            bytes_sent: 0,
            packets_sent: 0,
            start_time: Instant::now(),
        }
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn record_send(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.packets_sent += 1;
    }
}

// ---------------------------------------------------------------------------
// Loop state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopping,
    Done,
}

/// Why the loop left the Running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTimer,
    Failsafe,
    /// The trigger queue closed without an END trigger.
    TimersCancelled,
    /// The peer accepted zero bytes.
    PeerClosed,
    SendFailed(io::ErrorKind),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndTimer => write!(f, "end timer"),
            StopReason::Failsafe => write!(f, "failsafe timer"),
            StopReason::TimersCancelled => write!(f, "timers cancelled"),
            StopReason::PeerClosed => write!(f, "peer closed"),
            StopReason::SendFailed(kind) => write!(f, "send failed ({})", kind),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSummary {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
}

/// Send failures that leave the connection usable.
fn is_transient(e: &io::Error) -> bool {
    if matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    ) {
        return true;
    }
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::ENOBUFS) {
        return true;
    }
    false
}

// ---------------------------------------------------------------------------
// TransferLoop
// ---------------------------------------------------------------------------

/// The send loop for one test run.
pub struct TransferLoop {
    payload: Payload,
    triggers: TriggerReceiver,
    state: LoopState,
    report_needed: bool,
    stop_reason: StopReason,
}

impl TransferLoop {
    pub fn new(payload: Payload, triggers: TriggerReceiver) -> Self {
        Self {
            payload,
            triggers,
            state: LoopState::Running,
            report_needed: false,
            stop_reason: StopReason::EndTimer,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until stopped, then send the final report.
    pub async fn run<S, W>(&mut self, sink: &mut S, reporter: &mut Reporter<W>) -> TransferSummary
    where
        S: PayloadSink,
        W: AsyncWrite + Unpin,
    {
        let mut stats = Statistics::start();
        info!(
            payload_size = self.payload.buffer.len(),
            udp_header = ?self.payload.header,
            "transfer started"
        );

        while self.state == LoopState::Running {
            if let Some(format) = self.payload.header {
                format.stamp(
                    &mut self.payload.buffer,
                    monotonic_timestamp(),
                    stats.packets_sent + 1,
                );
            }

            tokio::select! {
                biased;

                trigger = self.triggers.recv() => match trigger {
                    Some(trigger) => self.on_trigger(trigger, &stats, reporter).await,
                    None => self.stop(StopReason::TimersCancelled),
                },

                result = sink.send_payload(&self.payload.buffer) => {
                    self.on_send(result, &mut stats);
                }
            }
        }

        reporter.emit(&stats, true).await;
        self.state = LoopState::Done;

        let summary = TransferSummary {
            bytes_sent: stats.bytes_sent,
            packets_sent: stats.packets_sent,
            elapsed: stats.elapsed(),
            stop_reason: self.stop_reason,
        };
        info!(
            bytes_sent = summary.bytes_sent,
            packets_sent = summary.packets_sent,
            elapsed_sec = summary.elapsed.as_secs_f64(),
            reason = %summary.stop_reason,
            "transfer finished"
        );
        summary
    }

    async fn on_trigger<W>(&mut self, trigger: Trigger, stats: &Statistics, reporter: &mut Reporter<W>)
    where
        W: AsyncWrite + Unpin,
    {
        debug!(?trigger, "timer fired");
        match trigger {
            Trigger::Report => self.report_needed = true,
            Trigger::End => self.stop(StopReason::EndTimer),
            Trigger::Failsafe => self.stop(StopReason::Failsafe),
        }

        if self.report_needed && self.state == LoopState::Running {
            reporter.emit(stats, false).await;
            self.report_needed = false;
        }
    }

    fn on_send(&mut self, result: io::Result<usize>, stats: &mut Statistics) {
        match result {
            Ok(0) => self.stop(StopReason::PeerClosed),
            Ok(n) => stats.record_send(n),
            Err(e) if is_transient(&e) => {}
            Err(e) => {
                warn!(error = %e, "data send failed, stopping transfer");
                self.stop(StopReason::SendFailed(e.kind()));
            }
        }
    }

    /// Leave Running. Only the first call records its reason.
    fn stop(&mut self, reason: StopReason) {
        if self.state == LoopState::Running {
            self.state = LoopState::Stopping;
            self.stop_reason = reason;
        }
    }
}
