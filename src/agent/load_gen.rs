//! Singleton load-generator launcher (§4.2.2, §9 "Agent singleton load
//! handle"). At most one firestarter subprocess is ever alive; the 409
//! rule reduces to "a handle is present and not yet reaped".

use std::process::Stdio;
use std::sync::Arc;

use serde::Deserialize;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct FirestarterArgs {
    pub runtime_secs: u64,
    pub pct_load: u32,
    pub n_threads: u32,
}

#[derive(Clone)]
pub struct LoadGenerator {
    firestarter_path: Arc<str>,
    handle: Arc<Mutex<Option<Child>>>,
}

pub enum LaunchOutcome {
    Accepted,
    Conflict,
}

impl LoadGenerator {
    pub fn new(firestarter_path: impl Into<Arc<str>>) -> Self {
        LoadGenerator {
            firestarter_path: firestarter_path.into(),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Launches firestarter unless a prior job is still running. Never
    /// blocks on subprocess completion (§4.2.2).
    pub async fn launch(&self, args: FirestarterArgs) -> LaunchOutcome {
        let mut guard = self.handle.lock().await;

        if let Some(child) = guard.as_mut() {
            match child.try_wait() {
                Ok(None) => return LaunchOutcome::Conflict,
                Ok(Some(_)) | Err(_) => {
                    // Guaranteed terminated (or unobservable) - reap and replace.
                }
            }
        }

        info!(?args.runtime_secs, ?args.pct_load, ?args.n_threads, "launching firestarter");

        let child = tokio::process::Command::new(self.firestarter_path.as_ref())
            .arg("--quiet")
            .arg("--timeout")
            .arg(args.runtime_secs.to_string())
            .arg("--load")
            .arg(args.pct_load.to_string())
            .arg("--threads")
            .arg(args.n_threads.to_string())
            .stdout(Stdio::null())
            .spawn();

        match child {
            Ok(child) => {
                *guard = Some(child);
                LaunchOutcome::Accepted
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn firestarter");
                *guard = None;
                LaunchOutcome::Accepted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// A shebang script that ignores its arguments and just sleeps, so
    /// the fixed `--quiet --timeout ... --load ... --threads ...`
    /// command line `launch` builds doesn't make the process exit
    /// immediately the way invoking `/bin/sleep` with those flags would.
    fn sleeper_script() -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("capping-test-sleeper-{}", std::process::id()));
        std::fs::write(&path, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn second_launch_conflicts_while_first_runs() {
        let script = sleeper_script();
        let gen = LoadGenerator::new(script.to_str().unwrap());
        let first = gen
            .launch(FirestarterArgs {
                runtime_secs: 5,
                pct_load: 100,
                n_threads: 0,
            })
            .await;
        assert!(matches!(first, LaunchOutcome::Accepted));

        let second = gen
            .launch(FirestarterArgs {
                runtime_secs: 5,
                pct_load: 100,
                n_threads: 0,
            })
            .await;
        assert!(matches!(second, LaunchOutcome::Conflict));

        if let Some(child) = gen.handle.lock().await.as_mut() {
            let _ = child.kill().await;
        }
    }
}
