use std::path::PathBuf;
use std::process::Command;

use anyhow::Context;
use docbench_runner::prelude::{DocbenchResult, GpuProbe};

use crate::bin_path::{binary_path, NVIDIA_SMI_PATH_ENV};

/// Lists GPUs with `nvidia-smi`.
///
/// `nvidia-smi` reports every GPU on the machine, so the list is narrowed to the devices named in
/// the requested visibility. A machine where `nvidia-smi` is missing or fails has no GPUs.
#[derive(Debug, Clone, Default)]
pub struct NvidiaSmi {
    bin_path: Option<PathBuf>,
}

impl NvidiaSmi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bin_path(bin_path: impl Into<PathBuf>) -> Self {
        Self {
            bin_path: Some(bin_path.into()),
        }
    }

    fn query(&self) -> DocbenchResult<String> {
        let bin_path = match &self.bin_path {
            Some(path) => path.clone(),
            None => binary_path("nvidia-smi", NVIDIA_SMI_PATH_ENV)?,
        };

        let output = Command::new(&bin_path)
            .args(["--query-gpu=index,name", "--format=csv,noheader"])
            .output()
            .with_context(|| format!("Failed to run {}", bin_path.display()))?;
        if !output.status.success() {
            anyhow::bail!(
                "nvidia-smi exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl GpuProbe for NvidiaSmi {
    fn visible_devices(&self, visibility: &str) -> anyhow::Result<Vec<String>> {
        let devices = match self.query() {
            Ok(csv) => parse_devices(&csv),
            Err(e) => {
                log::warn!("No GPUs detected: {e:#}");
                return Ok(Vec::new());
            }
        };
        if devices.is_empty() {
            log::warn!("nvidia-smi did not list any GPUs");
        }

        let visible = filter_visible(devices, visibility);
        log::debug!("GPUs visible with {visibility:?}: {visible:?}");
        Ok(visible)
    }
}

/// A GPU as listed by `nvidia-smi`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Device {
    index: String,
    name: String,
}

fn parse_devices(csv: &str) -> Vec<Device> {
    csv.lines()
        .filter_map(|line| {
            let (index, name) = line.split_once(',')?;
            Some(Device {
                index: index.trim().to_string(),
                name: name.trim().to_string(),
            })
        })
        .collect()
}

/// Keep the devices named in a `CUDA_VISIBLE_DEVICES` style list, in the order given there.
fn filter_visible(devices: Vec<Device>, visibility: &str) -> Vec<String> {
    visibility
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .filter_map(|id| devices.iter().find(|d| d.index == id))
        .map(|d| d.name.clone())
        .collect()
}
