use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use throughput_worker::exit::{self, codes};
use throughput_worker::{run_worker, WorkerOptions};

#[derive(Parser)]
#[command(
    name = "throughput-worker",
    about = "Single-shot TCP/UDP throughput test worker",
    version,
    long_about = None
)]
struct Cli {
    /// Unix socket path to listen on for the supervisor
    socket_path: PathBuf,

    /// Log output format
    #[arg(long, value_enum, env = "WORKER_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let code = match run_worker(WorkerOptions::new(cli.socket_path)).await {
        Ok(summary) => exit::summary_exit_code(&summary),
        Err(e) => exit::exit_code(&e),
    };

    if code == codes::SUCCESS {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(code as u8)
    }
}
