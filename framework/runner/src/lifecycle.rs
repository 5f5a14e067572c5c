use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use docbench_core::prelude::BenchError;
use docbench_summary_model::{BackendKind, ScenarioDescriptor};
use url::Url;

use crate::collaborators::{Collaborators, ContainerHandle, ContainerSpec, LaunchArgs, LoadedModel};
use crate::config::{BackendConfig, WorkloadConfig};
use crate::environment::{gpu_visibility, GPU_VISIBILITY_ENV};
use crate::executor::Executor;

/// A backend for one scenario, from preparation until it has been stopped.
///
/// Container handles are added as soon as each container is created, so a backend that only
/// partly started can still be stopped completely.
pub struct RunningBackend {
    kind: BackendKind,
    endpoint: Option<Url>,
    handles: Vec<ContainerHandle>,
    ready_deadline: Instant,
    local_model: Option<Box<dyn LoadedModel>>,
}

impl RunningBackend {
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// The summarization service endpoint, once the backend has started.
    pub fn endpoint(&self) -> anyhow::Result<&Url> {
        self.endpoint
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("The {} backend has not been started", self.kind))
    }

    pub fn handles(&self) -> &[ContainerHandle] {
        &self.handles
    }

    pub fn ready_deadline(&self) -> Instant {
        self.ready_deadline
    }

    pub fn is_stopped(&self) -> bool {
        self.handles.is_empty() && self.local_model.is_none()
    }
}

impl std::fmt::Debug for RunningBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningBackend")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("handles", &self.handles)
            .field("local_model", &self.local_model.is_some())
            .finish()
    }
}

/// Brings backends up and down.
pub struct BackendManager {
    config: BackendConfig,
    max_new_tokens: u32,
    collection: String,
    collaborators: Collaborators,
    executor: Arc<Executor>,
}

impl BackendManager {
    pub fn new(
        config: BackendConfig,
        workload: &WorkloadConfig,
        collaborators: Collaborators,
        executor: Arc<Executor>,
    ) -> Self {
        Self {
            config,
            max_new_tokens: workload.max_new_tokens,
            collection: workload.collection.clone(),
            collaborators,
            executor,
        }
    }

    /// Plan a backend for the scenario without launching anything.
    pub fn prepare(&self, scenario: &ScenarioDescriptor) -> RunningBackend {
        RunningBackend {
            kind: scenario.backend,
            endpoint: None,
            handles: Vec::new(),
            ready_deadline: Instant::now() + self.config.ready_timeout(),
            local_model: None,
        }
    }

    /// Launch the backend and wait until it accepts requests.
    ///
    /// The ready deadline is measured from this call.
    pub fn start(&self, scenario: &ScenarioDescriptor, backend: &mut RunningBackend) -> anyhow::Result<()> {
        backend.ready_deadline = Instant::now() + self.config.ready_timeout();
        log::info!("Starting {} backend for {}", scenario.backend, scenario.model_id);

        match scenario.backend {
            BackendKind::InProcess => {
                self.load_local(scenario, backend, None)?;
            }
            BackendKind::SingleService => {
                let inference = self.start_inference_container(scenario, backend)?;
                self.wait_for_instance(&inference, backend)?;
                self.start_service_container(scenario, backend, inference)?;
            }
            BackendKind::DualService => {
                let inference = self.start_inference_container(scenario, backend)?;
                self.wait_for_instance(&inference, backend)?;
                self.load_local(scenario, backend, Some(inference))?;
            }
        }

        let endpoint = backend.endpoint()?.clone();
        self.wait_for_instance(&endpoint, backend)?;

        log::info!("The {} backend is ready at {endpoint}", scenario.backend);
        Ok(())
    }

    /// Stop everything the backend launched, newest first.
    ///
    /// Failures are logged and do not prevent the remaining handles from being stopped. Calling
    /// this again after the backend has stopped does nothing.
    pub fn stop(&self, backend: &mut RunningBackend) {
        if let Some(model) = backend.local_model.take() {
            log::debug!("Unloading local model at {}", model.endpoint());
            drop(model);
        }

        while let Some(handle) = backend.handles.pop() {
            match self.collaborators.containers.stop(&handle) {
                Ok(()) => log::debug!("Stopped container {handle}"),
                Err(e) => log::warn!("Failed to stop container {handle}: {e:?}"),
            }
        }
    }

    fn launch_args(&self, scenario: &ScenarioDescriptor, inference_server: Option<Url>) -> LaunchArgs {
        LaunchArgs {
            model_id: scenario.model_id.clone(),
            quantization: scenario.quantization,
            gpu_count: scenario.gpu_count,
            port: self.config.service_port,
            max_new_tokens: self.max_new_tokens,
            collection: self.collection.clone(),
            inference_server,
            host: self.config.host.clone(),
            command: self.config.local_command.clone(),
            env: vec![(GPU_VISIBILITY_ENV.to_string(), gpu_visibility(scenario.gpu_count))],
        }
    }

    fn load_local(
        &self,
        scenario: &ScenarioDescriptor,
        backend: &mut RunningBackend,
        inference_server: Option<Url>,
    ) -> anyhow::Result<()> {
        let args = self.launch_args(scenario, inference_server);
        let model = self
            .collaborators
            .engine
            .load(&self.executor, &args)
            .context(BenchError::startup(format!("Failed to load {}", scenario.model_id)))?;

        backend.endpoint = Some(model.endpoint().clone());
        backend.local_model = Some(model);
        Ok(())
    }

    fn start_inference_container(
        &self,
        scenario: &ScenarioDescriptor,
        backend: &mut RunningBackend,
    ) -> anyhow::Result<Url> {
        let port = self.config.inference_port();
        let mut args = vec![
            "--model-id".to_string(),
            scenario.model_id.clone(),
            "--port".to_string(),
            port.to_string(),
            "--num-shard".to_string(),
            scenario.gpu_count.to_string(),
        ];
        args.extend(self.config.inference_args.iter().cloned());

        let spec = ContainerSpec {
            name: format!("docbench-inference-{port}"),
            image: self.config.inference_image.clone(),
            ports: vec![(port, port)],
            network: self.config.network.clone(),
            env: self.config.forwarded_env(),
            gpu_devices: (0..scenario.gpu_count.get()).collect(),
            args,
        };
        self.start_container(&spec, backend)?;

        self.config.url_for_port(port)
    }

    fn start_service_container(
        &self,
        scenario: &ScenarioDescriptor,
        backend: &mut RunningBackend,
        inference_server: Url,
    ) -> anyhow::Result<()> {
        let port = self.config.service_port;
        let spec = ContainerSpec {
            name: format!("docbench-service-{port}"),
            image: self.config.service_image.clone(),
            ports: vec![(port, port)],
            network: self.config.network.clone(),
            env: self.config.forwarded_env(),
            gpu_devices: (0..scenario.gpu_count.get()).collect(),
            args: self.launch_args(scenario, Some(inference_server)).service_args(),
        };
        self.start_container(&spec, backend)?;

        backend.endpoint = Some(self.config.url_for_port(port)?);
        Ok(())
    }

    fn start_container(&self, spec: &ContainerSpec, backend: &mut RunningBackend) -> anyhow::Result<()> {
        let handle = self
            .collaborators
            .containers
            .start(spec)
            .context(BenchError::startup(format!(
                "Failed to start container {} from {}",
                spec.name, spec.image
            )))?;

        log::debug!("Started container {handle} for {}", spec.name);
        backend.handles.push(handle);
        Ok(())
    }

    /// Wait out the settle interval, bounded by the deadline, then poll the endpoint's port until
    /// it accepts a connection.
    fn wait_until_ready(&self, endpoint: &Url, deadline: Instant) -> anyhow::Result<()> {
        let host = endpoint
            .host_str()
            .ok_or_else(|| BenchError::startup(format!("No host in endpoint {endpoint}")))?
            .to_string();
        let port = endpoint
            .port_or_known_default()
            .ok_or_else(|| BenchError::startup(format!("No port in endpoint {endpoint}")))?;

        let settle = self
            .config
            .settle_interval()
            .min(deadline.saturating_duration_since(Instant::now()));
        let probe = self.config.probe_readiness;
        let poll_interval = self.config.poll_interval();
        let timeout_s = self.config.ready_timeout_s;
        let target = format!("{host}:{port}");

        self.executor.execute_in_place(async move {
            if !settle.is_zero() {
                log::debug!("Waiting {settle:?} for {target} to settle");
                tokio::time::sleep(settle).await;
            }

            if !probe {
                return Ok(());
            }

            loop {
                let attempt = tokio::time::timeout(
                    poll_interval.min(Duration::from_secs(5)),
                    tokio::net::TcpStream::connect((host.as_str(), port)),
                )
                .await;
                match attempt {
                    Ok(Ok(_)) => return Ok(()),
                    Ok(Err(e)) => log::trace!("{target} is not accepting connections yet: {e}"),
                    Err(_) => log::trace!("Connecting to {target} timed out"),
                }

                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(BenchError::BackendStartupTimeout { target, timeout_s }.into());
                }
                tokio::time::sleep(poll_interval.min(remaining)).await;
            }
        })
    }

    /// Wait for the instance launched last, then log the output of its container, if it has one.
    fn wait_for_instance(&self, endpoint: &Url, backend: &RunningBackend) -> anyhow::Result<()> {
        let ready = self.wait_until_ready(endpoint, backend.ready_deadline);

        let launched_last = match backend.local_model {
            Some(_) => None,
            None => backend.handles.last(),
        };
        if let Some(handle) = launched_last {
            match self
                .collaborators
                .containers
                .logs_tail(handle, self.config.log_tail_lines)
            {
                Ok(output) => log::info!("Recent output from container {handle}:\n{output}"),
                Err(e) => log::warn!("Failed to read output from container {handle}: {e:?}"),
            }
        }

        ready
    }
}
