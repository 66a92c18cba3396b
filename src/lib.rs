//! throughput-worker -- single-shot TCP/UDP throughput test sender.
//!
//! A supervisor spawns the worker with a Unix socket path, sends it the test
//! configuration over that socket, and receives periodic and final statistics
//! reports while the worker pushes payloads at a data target.

pub mod connector;
pub mod control;
pub mod exit;
pub mod report;
pub mod resources;
pub mod scheduler;
pub mod transfer;
pub mod worker;

pub use worker::{run_worker, WorkerError, WorkerOptions};
