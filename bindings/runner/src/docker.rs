//! Runs the serving backends as containers through the `docker` command line.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::Context;
use docbench_runner::prelude::{ContainerHandle, ContainerRuntime, ContainerSpec, DocbenchResult};

use crate::bin_path::{binary_path, DOCKER_PATH_ENV};

/// Containers are started through the `docker` binary from [DOCKER_PATH_ENV] or the user's
/// `PATH`, found when it is first needed.
#[derive(Debug, Clone, Default)]
pub struct DockerCli {
    bin_path: Option<PathBuf>,
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bin_path(bin_path: impl Into<PathBuf>) -> Self {
        Self {
            bin_path: Some(bin_path.into()),
        }
    }

    fn docker(&self, args: &[String]) -> DocbenchResult<Output> {
        let bin_path = match &self.bin_path {
            Some(path) => path.clone(),
            None => binary_path("docker", DOCKER_PATH_ENV)?,
        };

        log::trace!("Running {} {}", bin_path.display(), args.join(" "));
        let output = Command::new(&bin_path)
            .args(args)
            .output()
            .with_context(|| format!("Failed to run {}", bin_path.display()))?;

        if !output.status.success() {
            anyhow::bail!(
                "docker {} exited with {}: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(output)
    }
}

impl ContainerRuntime for DockerCli {
    fn start(&self, spec: &ContainerSpec) -> anyhow::Result<ContainerHandle> {
        let name = format!("{}-{}", spec.name, nanoid::nanoid!(8, &LOWER_ALPHANUMERIC));
        log::info!("Starting container {name} from {}", spec.image);

        let output = self
            .docker(&run_args(&name, spec))
            .with_context(|| format!("Failed to start container {name}"))?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            anyhow::bail!("docker run did not print a container id for {name}");
        }

        log::debug!("Started container {name} with id {id}");
        Ok(ContainerHandle::new(id))
    }

    fn logs_tail(&self, handle: &ContainerHandle, lines: usize) -> anyhow::Result<String> {
        let output = self.docker(&[
            "logs".to_string(),
            "--tail".to_string(),
            lines.to_string(),
            handle.to_string(),
        ])?;

        // Containers write to both streams and docker keeps them apart.
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    fn stop(&self, handle: &ContainerHandle) -> anyhow::Result<()> {
        log::info!("Stopping container {handle}");
        self.docker(&["stop".to_string(), handle.to_string()])
            .with_context(|| format!("Failed to stop container {handle}"))?;
        Ok(())
    }
}

const LOWER_ALPHANUMERIC: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Arguments to `docker` that start `spec` in the background.
fn run_args(name: &str, spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        name.to_string(),
    ];

    match spec.network.as_deref() {
        // Ports are already reachable on the host network and docker rejects publishing them.
        Some("host") => args.extend(["--network".to_string(), "host".to_string()]),
        network => {
            if let Some(network) = network {
                args.extend(["--network".to_string(), network.to_string()]);
            }
            for (host, container) in &spec.ports {
                args.extend(["-p".to_string(), format!("{host}:{container}")]);
            }
        }
    }

    for (key, value) in &spec.env {
        args.extend(["-e".to_string(), format!("{key}={value}")]);
    }

    if !spec.gpu_devices.is_empty() {
        let devices = spec
            .gpu_devices
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");
        // The quotes stop docker splitting the device list as separate options.
        args.extend(["--gpus".to_string(), format!("\"device={devices}\"")]);
    }

    args.push(spec.image.clone());
    args.extend(spec.args.iter().cloned());
    args
}
