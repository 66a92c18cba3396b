//! One worker run, from binding the control socket to the final report.
//!
//! 1. bind the Unix listener and accept the supervisor
//! 2. receive TestConfig, then TestParams
//! 3. open the data connection
//! 4. wait for the start byte
//! 5. arm timers and run the transfer loop
//!
//! Any failure before step 5 is a [`WorkerError`]. Every path releases its
//! resources through [`Resources::teardown`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::connector::{self, ConnectError, DataConnection, DEFAULT_PAYLOAD_SIZE};
use crate::control::documents::{TestConfig, TestParams};
use crate::control::{self, ControlError};
use crate::report::Reporter;
use crate::resources::Resources;
use crate::scheduler::{self, FailsafeHook, ScheduleError, TestTiming, FAILSAFE_MARGIN};
use crate::transfer::{TransferLoop, TransferSummary};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to bind control socket {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept supervisor connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("failed to receive test config: {0}")]
    ReceiveConfig(#[source] ControlError),

    #[error("invalid test config: {0}")]
    InvalidConfig(#[source] serde_json::Error),

    #[error("failed to receive test params: {0}")]
    ReceiveParams(#[source] ControlError),

    #[error("invalid test params: {0}")]
    InvalidParams(#[source] serde_json::Error),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("failed to receive start signal: {0}")]
    StartSignal(#[source] ControlError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Settings for a single run.
pub struct WorkerOptions {
    pub socket_path: PathBuf,
    pub failsafe_margin: Duration,
    pub default_payload_size: usize,
    /// Called when the FAILSAFE timer expires.
    pub failsafe: FailsafeHook,
}

impl WorkerOptions {
    /// Production defaults: 10 s failsafe margin and a hook that exits.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            failsafe_margin: FAILSAFE_MARGIN,
            default_payload_size: DEFAULT_PAYLOAD_SIZE,
            failsafe: scheduler::exit_process(),
        }
    }

    pub fn failsafe_margin(mut self, margin: Duration) -> Self {
        self.failsafe_margin = margin;
        self
    }

    pub fn failsafe_hook(mut self, hook: FailsafeHook) -> Self {
        self.failsafe = hook;
        self
    }
}

impl std::fmt::Debug for WorkerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerOptions")
            .field("socket_path", &self.socket_path)
            .field("failsafe_margin", &self.failsafe_margin)
            .field("default_payload_size", &self.default_payload_size)
            .finish_non_exhaustive()
    }
}

/// Run one test end to end.
pub async fn run_worker(options: WorkerOptions) -> Result<TransferSummary, WorkerError> {
    let test_id = Uuid::new_v4();
    let span = tracing::info_span!("worker", %test_id);

    async move {
        let mut resources = Resources::new();
        let result = run_session(options, &mut resources).await;
        resources.teardown();

        if let Err(e) = &result {
            error!(error = %e, "worker failed");
        }
        result
    }
    .instrument(span)
    .await
}

async fn run_session(
    options: WorkerOptions,
    resources: &mut Resources,
) -> Result<TransferSummary, WorkerError> {
    let WorkerOptions {
        socket_path,
        failsafe_margin,
        default_payload_size,
        failsafe,
    } = options;

    let listener = resources
        .listen(&socket_path)
        .map_err(|source| WorkerError::Bind {
            path: socket_path.clone(),
            source,
        })?;
    info!(path = %socket_path.display(), "waiting for supervisor");

    let (stream, _) = listener.accept().await.map_err(WorkerError::Accept)?;
    let control = resources.control.insert(stream);
    info!("supervisor connected");

    let config = control::receive_message(control)
        .await
        .map_err(WorkerError::ReceiveConfig)?;
    let config = TestConfig::from_document(config).map_err(WorkerError::InvalidConfig)?;

    let params = control::receive_message(control)
        .await
        .map_err(WorkerError::ReceiveParams)?;
    let params = TestParams::from_document(params).map_err(WorkerError::InvalidParams)?;

    info!(
        data_target = %config.target,
        port = config.data_port,
        udp = params.udp,
        time = params.time,
        interval = config.interval,
        "test configuration received"
    );

    // Checked before connecting so bad durations never open a data socket.
    let timing = TestTiming::from_documents(&config, &params, failsafe_margin)?;

    let DataConnection {
        socket,
        peer,
        payload,
    } = connector::connect_target(&config, &params, default_payload_size).await?;
    let data = resources.data.insert(socket);

    let state = control::receive_start_signal(control)
        .await
        .map_err(WorkerError::StartSignal)?;
    info!(state, %peer, "starting test");

    let (timers, triggers) = scheduler::arm(timing, failsafe);
    resources.timers = Some(timers);

    let mut reporter = Reporter::new(control);
    let summary = TransferLoop::new(payload, triggers)
        .run(data, &mut reporter)
        .await;

    if reporter.failed() > 0 {
        warn!(
            sent = reporter.sent(),
            failed = reporter.failed(),
            "some reports were not delivered"
        );
    }
    Ok(summary)
}
