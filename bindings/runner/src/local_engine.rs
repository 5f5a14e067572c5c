//! Runs the summarization service as a child process of the harness.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use docbench_runner::prelude::{DocbenchResult, Executor, LaunchArgs, LoadedModel, LocalEngine};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use url::Url;

/// Loads models by starting the configured serving command with the model's launch flags.
///
/// The service inherits the environment of the harness plus the launch variables, which carry the
/// GPU visibility for the scenario. Its output is forwarded to the log under a
/// `docbench_service::<port>` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCommandEngine;

impl LocalCommandEngine {
    pub fn new() -> Self {
        Self
    }
}

impl LocalEngine for LocalCommandEngine {
    fn load(&self, executor: &Executor, args: &LaunchArgs) -> anyhow::Result<Box<dyn LoadedModel>> {
        let (program, leading) = args
            .command
            .split_first()
            .context("No command configured to start the service locally")?;
        let endpoint = Url::parse(&format!("http://{}:{}/", args.host, args.port))
            .context("Invalid local service address")?;
        let log_target = format!("docbench_service::{}", args.port);

        log::info!("Starting {} for {}", args.command.join(" "), args.model_id);
        let mut child = executor.execute_in_place(async {
            Command::new(program)
                .args(leading)
                .args(args.service_args())
                .envs(args.env.iter().cloned())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("Failed to run {program}"))
        })?;

        if let Some(stdout) = child.stdout.take() {
            executor.spawn(forward_lines(stdout, log_target.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            executor.spawn(forward_lines(stderr, log_target.clone()));
        }

        Ok(Box::new(LocalService {
            child,
            endpoint,
            log_target,
            runtime: executor.handle().clone(),
        }))
    }
}

async fn forward_lines(stream: impl AsyncRead + Unpin, log_target: String) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if log::log_enabled!(target: &log_target, log::Level::Info) {
            log::info!(target: &log_target, "{line}");
        }
    }
}

/// How long a killed service gets to exit before teardown moves on.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// The running service process. Killed when dropped.
#[derive(Debug)]
struct LocalService {
    child: Child,
    endpoint: Url,
    log_target: String,
    runtime: tokio::runtime::Handle,
}

impl LocalService {
    /// Kill the process and wait for it to exit, so the next scenario finds its port and GPU
    /// memory free.
    fn kill(&mut self) -> DocbenchResult<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.start_kill()?;

        let child = &mut self.child;
        let status = self
            .runtime
            .block_on(async move { tokio::time::timeout(STOP_TIMEOUT, child.wait()).await })
            .map_err(|_| anyhow::anyhow!("The process did not exit within {STOP_TIMEOUT:?}"))??;
        log::debug!(target: &self.log_target, "Local service exited with {status}");
        Ok(())
    }
}

impl LoadedModel for LocalService {
    fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Drop for LocalService {
    fn drop(&mut self) {
        log::info!(target: &self.log_target, "Stopping local service");
        if let Err(e) = self.kill() {
            log::error!("Failed to stop the local service at {}: {e:?}", self.endpoint);
        }
    }
}
