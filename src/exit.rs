//! Process exit codes.
//!
//! The supervisor only distinguishes a clean run, a failsafe kill and a
//! failure to start.

use crate::transfer::{StopReason, TransferSummary};
use crate::worker::WorkerError;

/// Exit code constants.
pub mod codes {
    /// The test ran to completion and the final report was sent.
    pub const SUCCESS: i32 = 0;
    /// The FAILSAFE timer expired.
    pub const FAILSAFE: i32 = 1;
    /// Setup failed before the test could start. Also clap's usage error code.
    pub const STARTUP_FAILURE: i32 = 2;
}

/// Map a WorkerError to an exit code.
pub fn exit_code(error: &WorkerError) -> i32 {
    match error {
        WorkerError::Bind { .. }
        | WorkerError::Accept(_)
        | WorkerError::ReceiveConfig(_)
        | WorkerError::InvalidConfig(_)
        | WorkerError::ReceiveParams(_)
        | WorkerError::InvalidParams(_)
        | WorkerError::Connect(_)
        | WorkerError::StartSignal(_)
        | WorkerError::Schedule(_) => codes::STARTUP_FAILURE,
    }
}

/// Exit code for a run that got as far as the transfer loop.
///
/// Only reachable for FAILSAFE when the failsafe hook does not exit itself.
pub fn summary_exit_code(summary: &TransferSummary) -> i32 {
    match summary.stop_reason {
        StopReason::Failsafe => codes::FAILSAFE,
        _ => codes::SUCCESS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ConnectError;
    use crate::control::ControlError;
    use crate::scheduler::ScheduleError;
    use std::io;
    use std::time::Duration;

    fn summary(stop_reason: StopReason) -> TransferSummary {
        TransferSummary {
            bytes_sent: 0,
            packets_sent: 0,
            elapsed: Duration::ZERO,
            stop_reason,
        }
    }

    #[test]
    fn test_exit_code_bind() {
        let error = WorkerError::Bind {
            path: "/tmp/worker.sock".into(),
            source: io::ErrorKind::AddrInUse.into(),
        };
        assert_eq!(exit_code(&error), codes::STARTUP_FAILURE);
    }

    #[test]
    fn test_exit_code_control_failures() {
        let error = WorkerError::ReceiveConfig(ControlError::Closed);
        assert_eq!(exit_code(&error), codes::STARTUP_FAILURE);

        let error = WorkerError::StartSignal(ControlError::Closed);
        assert_eq!(exit_code(&error), codes::STARTUP_FAILURE);
    }

    #[test]
    fn test_exit_code_connect() {
        let error = WorkerError::Connect(ConnectError::CookieTooShort { len: 4, required: 74 });
        assert_eq!(exit_code(&error), codes::STARTUP_FAILURE);
    }

    #[test]
    fn test_exit_code_schedule() {
        let error = WorkerError::Schedule(ScheduleError::InvalidInterval(0.0));
        assert_eq!(exit_code(&error), codes::STARTUP_FAILURE);
    }

    #[test]
    fn test_summary_exit_codes() {
        assert_eq!(summary_exit_code(&summary(StopReason::EndTimer)), codes::SUCCESS);
        assert_eq!(
            summary_exit_code(&summary(StopReason::SendFailed(io::ErrorKind::BrokenPipe))),
            codes::SUCCESS
        );
        assert_eq!(summary_exit_code(&summary(StopReason::Failsafe)), codes::FAILSAFE);
    }

    #[test]
    fn test_exit_codes_constants() {
        assert_eq!(codes::SUCCESS, 0);
        assert_eq!(codes::FAILSAFE, 1);
        assert_eq!(codes::STARTUP_FAILURE, 2);
    }
}
