//! RAPL package discovery and wrap-around-aware power sampling (§4.2.1,
//! §6.4).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::warn;

const RAPL_ROOT: &str = "/sys/devices/virtual/powercap/intel-rapl";

/// One CPU package's energy-counter location and wrap ceiling, read
/// once at agent start and immutable afterwards (§3 "Package descriptor").
#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub name: String,
    energy_uj_path: PathBuf,
    max_energy_uj: u64,
}

/// Enumerates `intel-rapl:<n>` child directories under `rapl_root` and
/// reads each package's stable name and wrap ceiling.
pub fn discover_packages(rapl_root: impl AsRef<Path>) -> std::io::Result<Vec<PackageInfo>> {
    let pattern = Regex::new(r"^intel-rapl:\d+$").expect("static regex");
    let rapl_root = rapl_root.as_ref();

    let mut packages = Vec::new();
    let entries = match std::fs::read_dir(rapl_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(packages),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !pattern.is_match(file_name) {
            continue;
        }

        let dir = entry.path();
        let name = std::fs::read_to_string(dir.join("name"))?.trim().to_string();
        let max_energy_uj: u64 = std::fs::read_to_string(dir.join("max_energy_range_uj"))?
            .trim()
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        packages.push(PackageInfo {
            name,
            energy_uj_path: dir.join("energy_uj"),
            max_energy_uj,
        });
    }

    packages.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(packages)
}

fn read_energy_uj(path: &Path) -> std::io::Result<u64> {
    std::fs::read_to_string(path)?
        .trim()
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Computes one package's average power over `[start, end]`, handling a
/// single counter wrap (§4.2.1 step 4, §8 property 3).
pub fn wrap_aware_power(start_energy_uj: u64, end_energy_uj: u64, max_energy_uj: u64, elapsed: Duration) -> f64 {
    let delta_uj = if end_energy_uj > start_energy_uj {
        end_energy_uj - start_energy_uj
    } else {
        (max_energy_uj - start_energy_uj) + end_energy_uj
    };
    delta_uj as f64 / elapsed.as_nanos() as f64 * 1000.0
}

/// Samples every package's energy counter, sleeps for `sample_window`,
/// samples again, and returns a `package name -> watts` map (§4.2.1).
/// The sleep is cooperative (`tokio::time::sleep`); it does not block
/// the agent's other routes.
pub async fn sample_power(
    packages: &[PackageInfo],
    sample_window: Duration,
) -> std::io::Result<HashMap<String, f64>> {
    let mut start = Vec::with_capacity(packages.len());
    for pkg in packages {
        start.push((read_energy_uj(&pkg.energy_uj_path)?, Instant::now()));
    }

    tokio::time::sleep(sample_window).await;

    let mut powers = HashMap::with_capacity(packages.len());
    for (pkg, (start_energy, start_time)) in packages.iter().zip(start) {
        let end_energy = match read_energy_uj(&pkg.energy_uj_path) {
            Ok(v) => v,
            Err(e) => {
                warn!(package = %pkg.name, error = %e, "failed to re-read energy counter");
                continue;
            }
        };
        let elapsed = start_time.elapsed();
        let watts = wrap_aware_power(start_energy, end_energy, pkg.max_energy_uj, elapsed);
        powers.insert(pkg.name.clone(), watts);
    }

    Ok(powers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_case_no_wrap() {
        let watts = wrap_aware_power(1_000_000, 1_250_000, 5_000_000, Duration::from_millis(250));
        // 250_000 uJ over 250ms == 1 W.
        assert!((watts - 1.0).abs() < 1e-9);
    }

    #[test]
    fn single_wrap_around() {
        let max = 5_000_000u64;
        let start = 4_900_000u64;
        let end = 100_000u64;
        let watts = wrap_aware_power(start, end, max, Duration::from_millis(250));
        // delta = (max - start) + end = 100_000 + 100_000 = 200_000 uJ over 250ms = 0.8W
        assert!((watts - 0.8).abs() < 1e-9);
        assert!(watts > 0.0);
    }

    #[test]
    fn package_dir_pattern_matches_only_numbered_packages() {
        let re = Regex::new(r"^intel-rapl:\d+$").unwrap();
        assert!(re.is_match("intel-rapl:0"));
        assert!(re.is_match("intel-rapl:12"));
        assert!(!re.is_match("intel-rapl:0:0"));
        assert!(!re.is_match("intel-rapl-mmio:0"));
    }
}
