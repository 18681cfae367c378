//! Single-shot hardware/firmware/OS fact aggregation (§4.2.3). Missing
//! files are tolerated (the key is omitted); returned as one flat map
//! whose keys become `system_info` columns (§6.3).

use std::collections::HashMap;
use std::path::Path;

use tokio::process::Command;
use tracing::debug;

const DMI_ROOT: &str = "/sys/devices/virtual/dmi/id";
const DMI_FILES: [&str; 7] = [
    "bios_date",
    "bios_vendor",
    "bios_version",
    "board_name",
    "board_vendor",
    "board_version",
    "sys_vendor",
];

/// lscpu field name -> system_info column name, plus whether the field
/// is numeric (numeric fields that fail to parse default to "0", §4.2.3).
const CPU_FIELDS: [(&str, &str, bool); 10] = [
    ("Architecture", "architecture", false),
    ("CPU(s)", "cpus", true),
    ("Thread(s) per core", "threads_per_core", true),
    ("Core(s) per socket", "cores_per_socket", true),
    ("Socket(s)", "sockets", true),
    ("Vendor ID", "vendor_id", false),
    ("Model name", "model_name", false),
    ("CPU MHz", "cpu_mhz", true),
    ("CPU max MHz", "cpu_max_mhz", true),
    ("CPU min MHz", "cpu_min_mhz", true),
];

pub async fn collect() -> HashMap<String, String> {
    let mut info = HashMap::new();
    info.extend(hw_info(DMI_ROOT));
    info.extend(cpu_info().await);
    if let Some(name) = read_hostname() {
        info.insert("hostname".to_string(), name);
    }
    if let Some(os) = os_name() {
        info.insert("os_name".to_string(), os);
    }
    info
}

fn hw_info(dmi_root: &str) -> HashMap<String, String> {
    let dmi_root = Path::new(dmi_root);
    let mut info = HashMap::new();
    for file in DMI_FILES {
        match std::fs::read_to_string(dmi_root.join(file)) {
            Ok(contents) => {
                info.insert(file.to_string(), contents.trim().to_string());
            }
            Err(e) => debug!(%file, error = %e, "dmi attribute unavailable"),
        }
    }
    info
}

async fn cpu_info() -> HashMap<String, String> {
    let output = match Command::new("lscpu").env("LANG", "en_US.UTF-8").output().await {
        Ok(output) => output,
        Err(e) => {
            debug!(error = %e, "lscpu unavailable");
            return HashMap::new();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let raw: HashMap<&str, &str> = stdout
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect();

    let mut info = HashMap::new();
    for (lscpu_key, column, numeric) in CPU_FIELDS {
        let Some(value) = raw.get(lscpu_key) else {
            continue;
        };
        if numeric {
            let parsed: f64 = value.parse().unwrap_or(0.0);
            info.insert(column.to_string(), format_numeric(parsed));
        } else {
            info.insert(column.to_string(), value.to_string());
        }
    }
    info
}

fn format_numeric(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn read_hostname() -> Option<String> {
    hostname::get().ok()?.into_string().ok()
}

fn os_name() -> Option<String> {
    let contents = std::fs::read_to_string("/etc/os-release").ok()?;
    let fields: HashMap<&str, &str> = contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k, v.trim_matches('"')))
        .collect();

    fields
        .get("PRETTY_NAME")
        .map(|s| s.to_string())
        .or_else(|| {
            let name = fields.get("NAME").copied().unwrap_or("Unknown");
            let version = fields.get("VERSION").copied().unwrap_or("");
            Some(format!("{name} {version}").trim().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cpu_fields_from_lscpu_style_text() {
        let text = "Architecture:        x86_64\nCPU(s):              64\nModel name:          Test CPU\n";
        let raw: HashMap<&str, &str> = text
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();
        assert_eq!(raw.get("Architecture"), Some(&"x86_64"));
        assert_eq!(raw.get("CPU(s)"), Some(&"64"));
    }
}
