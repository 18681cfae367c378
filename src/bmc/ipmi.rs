//! IPMI/DCMI back-end: shells out to `ipmitool` and parses its
//! `Key : Value` text output (§4.1.1).

use std::collections::HashMap;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::BmcError;

const GET_DCMI_POWER: &str = "dcmi power reading";
const GET_DCMI_POWER_CAP: &str = "dcmi power get_limit";
const SET_DCMI_POWER_CAP: &str = "dcmi power set_limit limit";
const ACTIVATE_CAPPING: &str = "dcmi power activate";
const DEACTIVATE_CAPPING: &str = "dcmi power deactivate";

const NO_ACTIVE_LIMIT: &str = "No Active Power Limit";

pub struct IpmiBmc {
    hostname: String,
    username: String,
    password: String,
    ipmitool_path: String,
}

impl IpmiBmc {
    pub fn new(hostname: String, username: String, password: String, ipmitool_path: String) -> Self {
        IpmiBmc {
            hostname,
            username,
            password,
            ipmitool_path,
        }
    }

    /// Runs one `ipmitool` invocation and parses its stdout into a
    /// `Key -> Value` map, keeping the last value on duplicate keys.
    /// Any non-empty stderr is treated as failure (§4.1.1, §9 open
    /// question — kept as specified, not resolved to an exit-status check).
    async fn run_command(&self, verb: &str) -> Result<HashMap<String, String>, BmcError> {
        let args = [
            "-H",
            self.hostname.as_str(),
            "-U",
            self.username.as_str(),
            "-P",
            self.password.as_str(),
        ];
        let verb_args: Vec<&str> = verb.split_whitespace().collect();

        debug!(ipmitool = %self.ipmitool_path, %verb, "running ipmitool");

        let output = Command::new(&self.ipmitool_path)
            .args(args)
            .args(&verb_args)
            .env("LANG", "en_US.UTF-8")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| BmcError::Transport(format!("failed to spawn {}: {e}", self.ipmitool_path)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            return Err(BmcError::Transport(format!(
                "{} {verb} failed: stderr: {stderr}",
                self.ipmitool_path
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_ipmi_output(&stdout))
    }
}

/// Splits each line on the first `:`, trims both sides, drops lines
/// without exactly two parts, last-wins on duplicates.
fn parse_ipmi_output(stdout: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for line in stdout.lines() {
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    fields
}

impl IpmiBmc {
    pub async fn connect(&mut self) -> Result<(), BmcError> {
        // IPMI has no session to establish; each command is independent.
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), BmcError> {
        Ok(())
    }

    pub async fn current_power(&self) -> Result<i64, BmcError> {
        let fields = self.run_command(GET_DCMI_POWER).await?;
        let raw = fields
            .get("Instantaneous power reading")
            .ok_or_else(|| BmcError::Parse("missing 'Instantaneous power reading'".into()))?;
        let token = raw
            .split_whitespace()
            .next()
            .ok_or_else(|| BmcError::Parse(format!("empty power reading: {raw:?}")))?;
        token
            .parse()
            .map_err(|e| BmcError::Parse(format!("could not parse power {token:?}: {e}")))
    }

    pub async fn current_cap_level(&self) -> Result<Option<i64>, BmcError> {
        let fields = self.run_command(GET_DCMI_POWER_CAP).await?;
        if fields.get("Current Limit State").map(String::as_str) == Some(NO_ACTIVE_LIMIT) {
            return Ok(None);
        }
        let raw = fields
            .get("Power Limit")
            .ok_or_else(|| BmcError::Parse("missing 'Power Limit'".into()))?;
        let token = raw
            .split_whitespace()
            .next()
            .ok_or_else(|| BmcError::Parse(format!("empty power limit: {raw:?}")))?;
        let watts = token
            .parse()
            .map_err(|e| BmcError::Parse(format!("could not parse cap {token:?}: {e}")))?;
        Ok(Some(watts))
    }

    pub async fn set_cap_level(&self, watts: i64) -> Result<(), BmcError> {
        let verb = format!("{SET_DCMI_POWER_CAP} {watts}");
        self.run_command(&verb).await?;
        Ok(())
    }

    pub async fn activate_capping(&self) -> Result<(), BmcError> {
        self.run_command(ACTIVATE_CAPPING).await?;
        Ok(())
    }

    pub async fn deactivate_capping(&self) -> Result<(), BmcError> {
        self.run_command(DEACTIVATE_CAPPING).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines() {
        let out = "Instantaneous power reading:                 300 Watts\n\
                   Minimum during sampling period:               100 Watts\n\
                   bad line with no colon\n";
        let fields = parse_ipmi_output(out);
        assert_eq!(
            fields.get("Instantaneous power reading").map(String::as_str),
            Some("300 Watts")
        );
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn last_wins_on_duplicate_keys() {
        let out = "Power Limit: 600 Watts\nPower Limit: 700 Watts\n";
        let fields = parse_ipmi_output(out);
        assert_eq!(fields.get("Power Limit").map(String::as_str), Some("700 Watts"));
    }

    #[test]
    fn no_active_limit_sentinel() {
        let out = "Current Limit State: No Active Power Limit\n";
        let fields = parse_ipmi_output(out);
        assert_eq!(
            fields.get("Current Limit State").map(String::as_str),
            Some(NO_ACTIVE_LIMIT)
        );
    }
}
