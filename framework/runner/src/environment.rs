use std::num::NonZeroU32;
use std::process::Command;

use chrono::Utc;
use docbench_summary_model::EnvironmentInfo;
use itertools::Itertools;

/// The version recorded with every result and mixed into the fingerprint.
pub const HARNESS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Restricts which GPUs a locally started service can see.
///
/// Set on the service's process only, the harness's own environment is never changed.
pub const GPU_VISIBILITY_ENV: &str = "CUDA_VISIBLE_DEVICES";

/// The device list exposing the first `gpu_count` GPUs, `0` for one GPU or `0,1,...,n-1`.
pub fn gpu_visibility(gpu_count: NonZeroU32) -> String {
    (0..gpu_count.get()).join(",")
}

/// Metadata about the machine and code a scenario runs against.
pub fn collect_environment(gpus: Vec<String>) -> EnvironmentInfo {
    EnvironmentInfo {
        git_sha: git_revision(),
        date: Some(Utc::now()),
        n_gpus: Some(gpus.len()),
        gpus: Some(gpus),
        host_name: sysinfo::System::host_name(),
        harness_version: Some(HARNESS_VERSION.to_string()),
    }
}

/// The short revision of the working directory's checkout, if there is one.
fn git_revision() -> Option<String> {
    let git = match which::which("git") {
        Ok(path) => path,
        Err(e) => {
            log::debug!("git is not available, not recording a revision: {e}");
            return None;
        }
    };

    let output = match Command::new(git).args(["rev-parse", "HEAD"]).output() {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            log::debug!(
                "Could not determine the git revision: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }
        Err(e) => {
            log::warn!("Failed to run git: {e}");
            return None;
        }
    };

    let revision = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if revision.is_empty() {
        return None;
    }
    Some(revision.chars().take(8).collect())
}
