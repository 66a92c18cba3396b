//! Statistics reports sent to the supervisor.

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use crate::control;
use crate::transfer::Statistics;

/// One statistics report, built from a snapshot and sent once.
///
/// `retransmits`, `jitter` and `errors` are not measured by a sender and are
/// always zero. `start_time` is always `0.0`; elapsed time is in `end_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub bytes: f64,
    pub retransmits: i64,
    pub jitter: f64,
    pub errors: i64,
    pub packets: f64,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(rename = "final")]
    pub is_final: bool,
}

impl ReportDocument {
    pub fn snapshot(stats: &Statistics, is_final: bool) -> Self {
        Self {
            bytes: stats.bytes_sent as f64,
            retransmits: 0,
            jitter: 0.0,
            errors: 0,
            packets: stats.packets_sent as f64,
            start_time: 0.0,
            end_time: stats.elapsed().as_secs_f64(),
            is_final,
        }
    }
}

/// Sends reports over the control channel.
///
/// Send failures are logged and counted; they never stop the test.
#[derive(Debug)]
pub struct Reporter<W> {
    channel: W,
    sent: u64,
    failed: u64,
}

impl<W> Reporter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(channel: W) -> Self {
        Self {
            channel,
            sent: 0,
            failed: 0,
        }
    }

    /// Snapshot `stats` and send the resulting report.
    pub async fn emit(&mut self, stats: &Statistics, is_final: bool) {
        let report = ReportDocument::snapshot(stats, is_final);
        debug!(
            bytes = stats.bytes_sent,
            packets = stats.packets_sent,
            end_time = report.end_time,
            is_final,
            "sending report"
        );

        match control::send_message(&mut self.channel, &report).await {
            Ok(()) => self.sent += 1,
            Err(e) => {
                self.failed += 1;
                warn!(error = %e, is_final, "failed to send report");
            }
        }
    }

    /// Reports delivered so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Reports that could not be delivered.
    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn into_inner(self) -> W {
        self.channel
    }
}
