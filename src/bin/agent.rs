//! SUT-side HTTP service entry point (§4.2, §6.1).

use clap::Parser;
use std::time::Duration;

use capping_test::agent::rapl::discover_packages;
use capping_test::agent::AgentState;
use capping_test::config::AgentConfig;

/// Exposes socket power, static system info, and a load-generator
/// launcher over HTTP for the campaign runner to poll and drive.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(long, env = "AGENT_PORT", default_value_t = 8000)]
    port: u16,

    #[arg(long, env = "FIRESTARTER_PATH", default_value = "/usr/local/bin/firestarter")]
    firestarter_path: String,

    #[arg(long, env = "RAPL_ROOT", default_value = "/sys/devices/virtual/powercap/intel-rapl")]
    rapl_root: String,

    #[arg(long, env = "RAPL_SAMPLE_WINDOW_MS", default_value_t = 250)]
    rapl_sample_window_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    capping_test::init_tracing();
    let args = Cli::parse();

    let packages = discover_packages(&args.rapl_root)?;
    tracing::info!(count = packages.len(), "discovered rapl packages");

    let config = AgentConfig {
        rapl_sample_window: Duration::from_millis(args.rapl_sample_window_ms),
    };
    let state = AgentState::new(config, packages, args.firestarter_path);
    let app = capping_test::agent::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "agent listening");
    axum::serve(listener, app).await?;
    Ok(())
}
