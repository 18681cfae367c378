//! Campaign sequencer: cap trajectories x load settings, with
//! cap-change event logging and collector orchestration (§4.4).

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bmc::BmcDriver;
use crate::collector::{self, StopSignal};
use crate::config::{CampaignConfig, CapDirection, CollectorConfig, TestConfig};
use crate::store::Store;

/// One trajectory's parameters (§4.4.1).
#[derive(Debug, Clone, Copy)]
pub struct Trajectory {
    pub cap_from: i64,
    pub cap_to: i64,
    pub n_steps: i64,
    pub load_pct: i64,
    pub n_threads: i64,
    pub pause_load_between_cap_settings: bool,
}

/// Launches the agent's load generator via `POST /firestarter`, fire
/// and forget with respect to the call's own duration (the agent
/// itself never blocks on subprocess completion, §4.2.2).
async fn launch_load(
    client: &reqwest::Client,
    agent_url: &str,
    runtime_secs: u64,
    pct_load: i64,
    n_threads: i64,
) -> anyhow::Result<()> {
    let url = format!("{}/firestarter", agent_url.trim_end_matches('/'));
    let body = serde_json::json!({
        "runtime_secs": runtime_secs,
        "pct_load": pct_load,
        "n_threads": n_threads,
    });
    let resp = client.post(&url).json(&body).send().await?;
    if resp.status() != reqwest::StatusCode::ACCEPTED {
        info!(status = %resp.status(), "firestarter launch was not accepted");
    }
    Ok(())
}

/// Applies a new cap level on the BMC and logs it, first emitting a
/// "shadow" row one millisecond earlier carrying the previous cap
/// level so downstream plotting renders a staircase (§3, §8 property 5).
async fn apply_and_log_cap<B: BmcDriver>(
    bmc: &B,
    store: &Store,
    last_cap: &mut Option<i64>,
    new_cap: i64,
) -> anyhow::Result<()> {
    let now = Utc::now();
    if let Some(previous) = *last_cap {
        if previous != new_cap {
            store.log_cap_level(now - chrono::Duration::milliseconds(1), previous).await?;
        }
    }
    bmc.set_cap_level(new_cap).await?;
    store.log_cap_level(now, new_cap).await?;
    *last_cap = Some(new_cap);
    Ok(())
}

/// Runs one trajectory to completion, records a `tests` row (§4.4.1),
/// and returns the last cap level actually applied, so callers can log
/// an accurate post-campaign cap rather than assuming a fixed bound.
pub async fn run_test<B: BmcDriver>(
    bmc: &B,
    agent_url: &str,
    store: &Store,
    test_config: &TestConfig,
    trajectory: Trajectory,
) -> anyhow::Result<i64> {
    let client = reqwest::Client::new();
    let start = Utc::now();
    let step = (trajectory.cap_from - trajectory.cap_to) / trajectory.n_steps;
    let mut last_cap: Option<i64> = None;

    if trajectory.pause_load_between_cap_settings {
        run_pause_between(&client, agent_url, bmc, store, test_config, trajectory, step, &mut last_cap).await?;
    } else {
        run_continuous_load(&client, agent_url, bmc, store, test_config, trajectory, step, &mut last_cap).await?;
    }

    let end = Utc::now();
    store
        .log_test_run(&crate::store::TestRecord {
            start,
            end,
            cap_from: trajectory.cap_from,
            cap_to: trajectory.cap_to,
            n_steps: trajectory.n_steps,
            load_pct: trajectory.load_pct,
            n_threads: trajectory.n_threads,
            pause_load_between_cap_settings: trajectory.pause_load_between_cap_settings,
        })
        .await?;
    Ok(last_cap.expect("a trajectory always applies at least one cap"))
}

#[allow(clippy::too_many_arguments)]
async fn run_pause_between<B: BmcDriver>(
    client: &reqwest::Client,
    agent_url: &str,
    bmc: &B,
    store: &Store,
    test_config: &TestConfig,
    trajectory: Trajectory,
    step: i64,
    last_cap: &mut Option<i64>,
) -> anyhow::Result<()> {
    let mut cap_level = trajectory.cap_from;
    apply_and_log_cap(bmc, store, last_cap, cap_level).await?;
    tokio::time::sleep(test_config.inter_step_pause).await;

    for _ in 0..trajectory.n_steps {
        launch_load(
            client,
            agent_url,
            test_config.per_step.as_secs(),
            trajectory.load_pct,
            trajectory.n_threads,
        )
        .await?;
        tokio::time::sleep(test_config.per_step + test_config.inter_step_pause).await;
        cap_level -= step;
        apply_and_log_cap(bmc, store, last_cap, cap_level).await?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_continuous_load<B: BmcDriver>(
    client: &reqwest::Client,
    agent_url: &str,
    bmc: &B,
    store: &Store,
    test_config: &TestConfig,
    trajectory: Trajectory,
    step: i64,
    last_cap: &mut Option<i64>,
) -> anyhow::Result<()> {
    apply_and_log_cap(bmc, store, last_cap, test_config.uncapped_power).await?;

    let total_runtime = test_config.warmup + trajectory.n_steps as u32 * test_config.per_step;
    launch_load(
        client,
        agent_url,
        total_runtime.as_secs(),
        trajectory.load_pct,
        trajectory.n_threads,
    )
    .await?;
    tokio::time::sleep(test_config.warmup).await;

    let mut cap_level = trajectory.cap_from;
    for _ in 0..trajectory.n_steps {
        apply_and_log_cap(bmc, store, last_cap, cap_level).await?;
        tokio::time::sleep(test_config.per_step).await;
        cap_level -= step;
    }
    tokio::time::sleep(test_config.inter_step_pause).await;
    Ok(())
}

/// Enumerates the campaign matrix (§4.4.2), runs every trajectory in
/// sequence, and returns the cap level the final trajectory left
/// applied (not necessarily `cap_min` — `CapDirection::Both`'s last
/// trajectory is an up-step that ends at `cap_max`).
pub async fn campaign<B: BmcDriver>(
    bmc: &B,
    agent_url: &str,
    store: &Store,
    test_config: &TestConfig,
    campaign_config: &CampaignConfig,
) -> anyhow::Result<i64> {
    campaign_config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid campaign configuration: {e}"))?;

    let n_steps = (campaign_config.cap_max - campaign_config.cap_min) / campaign_config.cap_delta;
    let directions = match campaign_config.direction {
        CapDirection::Up => vec![true],
        CapDirection::Down => vec![false],
        CapDirection::Both => vec![false, true],
    };

    let mut last_cap = None;
    for load in loads(campaign_config) {
        for pause in [true, false] {
            for &up in &directions {
                let (cap_from, cap_to) = if up {
                    (campaign_config.cap_min, campaign_config.cap_max)
                } else {
                    (campaign_config.cap_max, campaign_config.cap_min)
                };
                info!(load, pause, up, cap_from, cap_to, "running trajectory");
                let applied = run_test(
                    bmc,
                    agent_url,
                    store,
                    test_config,
                    Trajectory {
                        cap_from,
                        cap_to,
                        n_steps,
                        load_pct: load,
                        n_threads: 0,
                        pause_load_between_cap_settings: pause,
                    },
                )
                .await?;
                last_cap = Some(applied);
            }
        }
    }
    Ok(last_cap.expect("a validated campaign always runs at least one trajectory"))
}

fn loads(config: &CampaignConfig) -> Vec<i64> {
    if config.min_load == config.max_load {
        return vec![config.min_load];
    }
    let mut loads = Vec::new();
    let mut load = config.min_load;
    while load <= config.max_load {
        loads.push(load);
        load += config.load_delta;
    }
    loads
}

/// Orchestrates a full campaign run: spawns the collector as a
/// background task, activates capping, runs the campaign, logs the
/// final cap, grace-sleeps so the collector observes the tail of the
/// run, then signals stop and awaits completion (§4.4.3).
pub async fn orchestrate<B: BmcDriver + Send + Sync + 'static>(
    mut bmc: B,
    mut collector_bmc: B,
    agent_url: String,
    store: Store,
    collector_store: Store,
    test_config: TestConfig,
    collector_config: CollectorConfig,
    campaign_config: CampaignConfig,
) -> anyhow::Result<()> {
    let stop = StopSignal::new();
    let collector_stop = stop.clone();
    let collector_agent_url = agent_url.clone();

    let collector_handle: JoinHandle<()> = tokio::spawn(async move {
        collector::run(&collector_bmc, &collector_agent_url, &collector_store, collector_config, collector_stop).await;
        let _ = collector_bmc.disconnect().await;
    });

    bmc.activate_capping().await?;
    let final_cap = campaign(&bmc, &agent_url, &store, &test_config, &campaign_config).await?;
    store.log_cap_level(Utc::now(), final_cap).await?;

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    stop.stop();
    collector_handle.await?;

    bmc.deactivate_capping().await?;
    bmc.disconnect().await?;
    Ok(())
}

/// Samples idle and fully-loaded power to characterise a SUT before a
/// campaign (SPEC_FULL §A.7 "Calibration pass"). Not required to gate
/// the campaign matrix; purely observational.
pub async fn calibrate<B: BmcDriver>(
    bmc: &B,
    agent_url: &str,
    sample_duration: std::time::Duration,
) -> anyhow::Result<(i64, i64)> {
    tokio::time::sleep(sample_duration).await;
    let idle_power = bmc.current_power().await?;

    let client = reqwest::Client::new();
    launch_load(&client, agent_url, sample_duration.as_secs(), 100, 0).await?;
    tokio::time::sleep(sample_duration).await;
    let loaded_power = bmc.current_power().await?;

    info!(idle_power, loaded_power, "calibration complete");
    Ok((idle_power, loaded_power))
}

/// Sanity-checks a BMC endpoint's connectivity/authentication without
/// running a campaign (SPEC_FULL §A.7 "BMC self-test CLI").
pub async fn probe<B: BmcDriver>(bmc: &mut B) -> anyhow::Result<()> {
    bmc.connect().await?;
    let power = bmc.current_power().await?;
    let cap = bmc.current_cap_level().await?;
    info!(power, ?cap, "bmc probe succeeded");
    bmc.disconnect().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_is_integer_division_following_sign() {
        let down_step = (1000 - 400) / 3;
        assert_eq!(down_step, 200);
        let up_step = (400 - 1000) / 3;
        assert_eq!(up_step, -200);
    }

    #[test]
    fn loads_enumerates_inclusive_range() {
        let config = CampaignConfig {
            min_load: 20,
            max_load: 100,
            load_delta: 40,
            cap_min: 400,
            cap_max: 1000,
            cap_delta: 200,
            direction: CapDirection::Both,
        };
        assert_eq!(loads(&config), vec![20, 60, 100]);
    }

    #[test]
    fn loads_collapses_to_single_value_when_equal() {
        let config = CampaignConfig {
            min_load: 50,
            max_load: 50,
            load_delta: 0,
            cap_min: 400,
            cap_max: 1000,
            cap_delta: 200,
            direction: CapDirection::Up,
        };
        assert_eq!(loads(&config), vec![50]);
    }

    #[test]
    fn continuous_load_down_step_matches_s1_scenario() {
        // S1: cap_from=1000, cap_to=400, n_steps=3 -> cap values [1000,800,600,400].. shifted by uncapped start.
        let step = (1000 - 400) / 3;
        let mut cap = 1000;
        let mut caps = vec![cap];
        for _ in 0..3 {
            cap -= step;
            caps.push(cap);
        }
        assert_eq!(caps, vec![1000, 800, 600, 400]);
    }
}
