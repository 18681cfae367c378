//! Controller-side campaign driver entry point (§4.4, §6.2).

use std::time::Duration;

use clap::{Parser, Subcommand};

use capping_test::bmc::{BmcDriver, BmcEndpoint, BmcKind};
use capping_test::config::{CampaignConfig, CapDirection, CollectorConfig, TestConfig};
use capping_test::runner;
use capping_test::store::Store;

/// Drives a SUT through a matrix of synthetic load levels and cap-level
/// trajectories, sampling power and applied cap into a time-series store.
///
/// `--cap_min`/`--cap_max`/`--cap_delta` live at the top level (not under
/// a subcommand) so the flag set matches §6.2's required-flags contract
/// exactly; `rename_all = "snake_case"` keeps clap's derived long names
/// spelled with underscores (`--cap_min`) rather than its kebab-case
/// default (`--cap-min`).
#[derive(Parser)]
#[command(version, about, long_about = None, rename_all = "snake_case")]
struct Cli {
    #[arg(long, env = "BMC_HOSTNAME")]
    bmc_hostname: String,

    #[arg(long, env = "BMC_USERNAME")]
    bmc_username: String,

    #[arg(long, env = "BMC_PASSWORD")]
    bmc_password: String,

    #[arg(long, env = "BMC_TYPE", value_enum)]
    bmc_type: BmcKind,

    #[arg(long, env = "AGENT_URL")]
    agent_url: String,

    #[arg(long, env = "CAP_MIN")]
    cap_min: i64,

    #[arg(long, env = "CAP_MAX")]
    cap_max: i64,

    #[arg(long, env = "CAP_DELTA")]
    cap_delta: i64,

    #[arg(long, env = "DB_PATH")]
    db_path: Option<String>,

    #[arg(long, env = "IPMITOOL_PATH", default_value = "/usr/bin/ipmitool")]
    ipmitool_path: String,

    #[arg(long, env = "MIN_LOAD", default_value_t = 100)]
    min_load: i64,

    #[arg(long, env = "MAX_LOAD", default_value_t = 100)]
    max_load: i64,

    #[arg(long, env = "LOAD_DELTA", default_value_t = 0)]
    load_delta: i64,

    #[arg(long, env = "CAP_DIRECTION", value_enum, default_value_t = CapDirection::Both)]
    cap_direction: CapDirection,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand)]
#[command(rename_all = "snake_case")]
enum Action {
    /// Samples idle and fully-loaded power to characterise the SUT.
    Calibrate {
        #[arg(long, default_value_t = 20)]
        sample_secs: u64,
    },
    /// Sanity-checks BMC connectivity and authentication.
    BmcProbe,
}

fn build_endpoint(cli: &Cli) -> BmcEndpoint {
    match cli.bmc_type {
        BmcKind::Ipmi => BmcEndpoint::new_ipmi(
            cli.bmc_hostname.clone(),
            cli.bmc_username.clone(),
            cli.bmc_password.clone(),
            cli.ipmitool_path.clone(),
        ),
        BmcKind::Redfish => {
            BmcEndpoint::new_redfish(cli.bmc_hostname.clone(), cli.bmc_username.clone(), cli.bmc_password.clone())
        }
    }
}

fn db_path(cli: &Cli) -> String {
    cli.db_path.clone().unwrap_or_else(|| {
        let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let agent_host = cli
            .agent_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .split(['/', ':'])
            .next()
            .unwrap_or(&cli.agent_url);
        format!("{agent_host}_{timestamp}_capping_test.db")
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    capping_test::init_tracing();
    let args = Cli::parse();

    match &args.action {
        Some(Action::BmcProbe) => {
            let mut endpoint = build_endpoint(&args);
            runner::probe(&mut endpoint).await?;
        }
        Some(Action::Calibrate { sample_secs }) => {
            let mut endpoint = build_endpoint(&args);
            endpoint.connect().await?;
            let (idle, loaded) =
                runner::calibrate(&endpoint, &args.agent_url, Duration::from_secs(*sample_secs)).await?;
            println!("idle_power={idle}W loaded_power={loaded}W");
            endpoint.disconnect().await?;
        }
        None => {
            let campaign_config = CampaignConfig {
                min_load: args.min_load,
                max_load: args.max_load,
                load_delta: args.load_delta,
                cap_min: args.cap_min,
                cap_max: args.cap_max,
                cap_delta: args.cap_delta,
                direction: args.cap_direction,
            };
            campaign_config
                .validate()
                .map_err(|e| anyhow::anyhow!("invalid campaign configuration: {e}"))?;

            let path = db_path(&args);
            let store = Store::open(&path).await?;
            let collector_store = Store::open(&path).await?;

            let system_info_url = format!("{}/system_info", args.agent_url.trim_end_matches('/'));
            let fields: std::collections::HashMap<String, String> =
                reqwest::Client::new().get(&system_info_url).send().await?.error_for_status()?.json().await?;
            store.log_system_info(&fields, args.bmc_type.as_str()).await?;

            let mut endpoint = build_endpoint(&args);
            endpoint.connect().await?;
            let mut collector_endpoint = build_endpoint(&args);
            collector_endpoint.connect().await?;

            runner::orchestrate(
                endpoint,
                collector_endpoint,
                args.agent_url.clone(),
                store,
                collector_store,
                TestConfig::default(),
                CollectorConfig::default(),
                campaign_config,
            )
            .await?;
        }
    }

    Ok(())
}
