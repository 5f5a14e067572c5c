use std::net::TcpListener;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use docbench_runner::prelude::*;
use docbench_summary_model::{append_record, load_records_from_file, GenerateOutcome, RecordOutcome};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use url::Url;

const DOCUMENT_LEN: usize = 1234;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Behaviour {
    Succeed,
    OutOfMemoryOnGenerate,
    SummarizeTimeout,
    UncitedSummary,
    PanicOnGenerate,
}

struct FakeState {
    endpoint: Url,
    available_gpus: usize,
    fail_start_at: Option<usize>,
    behaviour: Behaviour,
    started: Mutex<Vec<ContainerSpec>>,
    stopped: Mutex<Vec<String>>,
    visibility_queries: Mutex<Vec<String>>,
    launches: Mutex<Vec<LaunchArgs>>,
    loads: AtomicUsize,
    unloads: AtomicUsize,
}

impl FakeState {
    fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            available_gpus: 1,
            fail_start_at: None,
            behaviour: Behaviour::Succeed,
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            visibility_queries: Mutex::new(Vec::new()),
            launches: Mutex::new(Vec::new()),
            loads: AtomicUsize::new(0),
            unloads: AtomicUsize::new(0),
        }
    }
}

struct FakeContainers(Arc<FakeState>);

impl ContainerRuntime for FakeContainers {
    fn start(&self, spec: &ContainerSpec) -> anyhow::Result<ContainerHandle> {
        let mut started = self.0.started.lock();
        if self.0.fail_start_at == Some(started.len()) {
            anyhow::bail!("docker: Error response from daemon: no such image {}", spec.image);
        }
        started.push(spec.clone());
        Ok(ContainerHandle::new(format!("container-{}", started.len())))
    }

    fn logs_tail(&self, handle: &ContainerHandle, _lines: usize) -> anyhow::Result<String> {
        Ok(format!("{handle} ready"))
    }

    fn stop(&self, handle: &ContainerHandle) -> anyhow::Result<()> {
        self.0.stopped.lock().push(handle.to_string());
        Ok(())
    }
}

struct FakeModel {
    endpoint: Url,
    state: Arc<FakeState>,
}

impl LoadedModel for FakeModel {
    fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Drop for FakeModel {
    fn drop(&mut self) {
        self.state.unloads.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeEngine(Arc<FakeState>);

impl LocalEngine for FakeEngine {
    fn load(&self, _executor: &Executor, args: &LaunchArgs) -> anyhow::Result<Box<dyn LoadedModel>> {
        self.0.loads.fetch_add(1, Ordering::SeqCst);
        self.0.launches.lock().push(args.clone());
        Ok(Box::new(FakeModel {
            endpoint: self.0.endpoint.clone(),
            state: self.0.clone(),
        }))
    }
}

struct FakeGpus(Arc<FakeState>);

impl GpuProbe for FakeGpus {
    fn visible_devices(&self, visibility: &str) -> anyhow::Result<Vec<String>> {
        self.0.visibility_queries.lock().push(visibility.to_string());
        Ok(vec!["NVIDIA A100-SXM4-80GB".to_string(); self.0.available_gpus])
    }
}

struct FakeConnector(Arc<FakeState>);

impl ServiceConnector for FakeConnector {
    fn connect(&self, _endpoint: &Url, _timeout: Duration) -> anyhow::Result<Box<dyn ServiceClient>> {
        Ok(Box::new(FakeClient(self.0.behaviour)))
    }
}

struct FakeClient(Behaviour);

impl ServiceClient for FakeClient {
    fn upload(&mut self, file: &Path) -> anyhow::Result<UploadedFile> {
        let name = file.file_name().unwrap().to_string_lossy().to_string();
        Ok(UploadedFile {
            local: file.to_string_lossy().to_string(),
            remote: format!("/srv/uploads/{name}"),
        })
    }

    fn add_document(&mut self, _remote: &str, _chunk: bool, _chunk_size: u32, collection: &str) -> anyhow::Result<AddDocumentReply> {
        Ok(AddDocumentReply {
            error: None,
            collection: collection.to_string(),
            sources: json!([]),
            status: String::new(),
        })
    }

    fn submit(&mut self, params: &str, _timeout: Duration) -> anyhow::Result<String> {
        let summarize = params.contains("langchain_action");
        match (self.0, summarize) {
            (Behaviour::SummarizeTimeout, true) => anyhow::bail!("timed out waiting for a reply"),
            (Behaviour::UncitedSummary, true) => {
                Ok(json!({"response": "A summary", "sources": []}).to_string())
            }
            // The service replies with the `str()` of a Python dict.
            (_, true) => Ok("{'response': 'The paper describes a speech recognition model.', \
                 'sources': [{'source': '/srv/uploads/doc.pdf', 'score': 0.8}], 'error': None}"
                .to_string()),
            (Behaviour::OutOfMemoryOnGenerate, false) => anyhow::bail!(
                "torch.OutOfMemoryError: CUDA out of memory. Tried to allocate 2.00 GiB"
            ),
            (Behaviour::PanicOnGenerate, false) => panic!("service client bug"),
            (_, false) => Ok(json!({"response": "Water flows, water glows."}).to_string()),
        }
    }
}

struct FakeDocuments;

impl DocumentSource for FakeDocuments {
    fn fetch(&self, _url: &Url, dest: &Path) -> anyhow::Result<PathBuf> {
        std::fs::write(dest, vec![b'x'; DOCUMENT_LEN])?;
        Ok(dest.to_path_buf())
    }
}

struct Bench {
    dir: TempDir,
    // Held open so the readiness probe can connect.
    _listeners: [TcpListener; 2],
    port: u16,
    inference_port: u16,
}

impl Bench {
    fn new() -> Self {
        let service = TcpListener::bind("127.0.0.1:0").unwrap();
        let inference = TcpListener::bind("127.0.0.1:0").unwrap();
        Self {
            dir: tempfile::tempdir().unwrap(),
            port: service.local_addr().unwrap().port(),
            inference_port: inference.local_addr().unwrap().port(),
            _listeners: [service, inference],
        }
    }

    fn endpoint(&self) -> Url {
        Url::parse(&format!("http://127.0.0.1:{}/", self.port)).unwrap()
    }

    fn results(&self) -> PathBuf {
        self.dir.path().join("perf.jsonl")
    }

    /// Write a config file, overriding the defaults below with the given `key = value` pairs.
    fn write_config(&self, matrix: &[(&str, &str)], backend: &[(&str, &str)]) -> PathBuf {
        let port = self.port.to_string();
        let inference_port = self.inference_port.to_string();
        let matrix = merge(
            &[
                ("models", r#"["org/model-7b"]"#),
                ("quantizations", r#"["full"]"#),
                ("gpu_counts", "[1]"),
            ],
            matrix,
        );
        let backend = merge(
            &[
                ("service_port", port.as_str()),
                ("inference_port", inference_port.as_str()),
                ("settle_interval_s", "0"),
                ("ready_timeout_s", "5"),
                ("poll_interval_ms", "50"),
            ],
            backend,
        );

        let content = format!(
            "results_path = \"{}\"\n\n[matrix]\n{matrix}\n[workload]\ndocument_path = \"{}\"\n\n[backend]\n{backend}",
            self.results().display(),
            self.dir.path().join("doc.pdf").display(),
        );
        let path = self.dir.path().join("bench.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn run(&self, state: &Arc<FakeState>, config: &Path, args: &[&str]) -> anyhow::Result<MatrixReport> {
        let mut argv = vec![
            "perf_benchmarks".to_string(),
            "--config".to_string(),
            config.display().to_string(),
        ];
        argv.extend(args.iter().map(|arg| arg.to_string()));
        let cli = DocbenchCli::try_parse_from(argv).unwrap();

        run(builder(cli, state))
    }

    fn records(&self) -> Vec<BenchmarkRecord> {
        load_records_from_file(&self.results()).unwrap()
    }
}

fn merge(defaults: &[(&str, &str)], overrides: &[(&str, &str)]) -> String {
    let mut entries = defaults.to_vec();
    for &(key, value) in overrides {
        match entries.iter_mut().find(|entry| entry.0 == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
    }
    entries
        .iter()
        .map(|(key, value)| format!("{key} = {value}\n"))
        .collect()
}

fn builder(cli: DocbenchCli, state: &Arc<FakeState>) -> BenchmarkDefinitionBuilder {
    BenchmarkDefinitionBuilder::new("matrix_run", cli)
        .use_container_runtime(FakeContainers(state.clone()))
        .use_local_engine(FakeEngine(state.clone()))
        .use_gpu_probe(FakeGpus(state.clone()))
        .use_service_connector(FakeConnector(state.clone()))
        .use_document_source(FakeDocuments)
}

const RUN_IN_PROCESS: &[&str] = &["run", "--isolation", "none", "--no-progress"];

#[test]
fn every_scenario_gets_one_record() {
    let bench = Bench::new();
    let state = Arc::new(FakeState::new(bench.endpoint()));
    let config = bench.write_config(&[("quantizations", r#"["full", "4bit"]"#)], &[]);

    let report = bench
        .run(&state, &config, &["run", "--isolation", "none", "--no-progress", "--run-id", "run-1"])
        .unwrap();
    assert_eq!(2, report.succeeded);
    assert_eq!("run-1", report.run_id);

    let records = bench.records();
    assert_eq!(2, records.len());
    for record in &records {
        assert_eq!(RecordOutcome::Succeeded, record.outcome());
        assert_eq!("run-1", record.run_id);
        assert_eq!(Some(DOCUMENT_LEN as u64), record.summarize_input_len_bytes);
        assert!(record.summarize_output_len_bytes.unwrap() > 0);
        assert!(record.summarize_time.is_some());
        assert!(record.generate_output_len_bytes.unwrap() > 0);
        assert_eq!(Some(1), record.environment.n_gpus);
        assert_eq!(Some(HARNESS_VERSION.to_string()), record.environment.harness_version);
    }
    assert_eq!(Quantization::Full, records[0].scenario.quantization);
    assert_eq!(Quantization::FourBit, records[1].scenario.quantization);
    assert_ne!(records[0].fingerprint, records[1].fingerprint);

    assert_eq!(2, state.loads.load(Ordering::SeqCst));
    assert_eq!(2, state.unloads.load(Ordering::SeqCst));
}

#[test]
fn out_of_memory_is_recorded_as_code() {
    let bench = Bench::new();
    let mut state = FakeState::new(bench.endpoint());
    state.behaviour = Behaviour::OutOfMemoryOnGenerate;
    let state = Arc::new(state);
    let config = bench.write_config(&[("backends", r#"["in_process"]"#)], &[]);

    let err = bench.run(&state, &config, RUN_IN_PROCESS).unwrap_err();
    assert!(err.to_string().contains("1 scenarios failed"));

    let records = bench.records();
    assert_eq!(1, records.len());
    let record = &records[0];
    assert_eq!(Some("OOM".to_string()), record.failure_reason);
    assert_eq!(Some(FailureKind::OutOfMemory), record.failure_kind);
    assert_eq!(Some(FailureStage::Generate), record.failure_stage);
    // Summarization finished before generation failed.
    assert!(record.summarize_time.is_some());
    assert!(record.generate_time.is_none());
    assert_eq!(1, state.unloads.load(Ordering::SeqCst));
}

#[test]
fn failures_do_not_stop_the_matrix_unless_fail_fast() {
    let bench = Bench::new();
    let mut state = FakeState::new(bench.endpoint());
    state.behaviour = Behaviour::OutOfMemoryOnGenerate;
    state.available_gpus = 2;
    let state = Arc::new(state);
    let config = bench.write_config(&[("gpu_counts", "[1, 2]")], &[]);

    assert!(bench.run(&state, &config, RUN_IN_PROCESS).is_err());
    assert_eq!(2, bench.records().len());

    std::fs::remove_file(bench.results()).unwrap();
    let mut args = RUN_IN_PROCESS.to_vec();
    args.push("--fail-fast");
    assert!(bench.run(&state, &config, &args).is_err());
    assert_eq!(1, bench.records().len());
}

#[test]
fn summarize_timeout_is_unclassified() {
    let bench = Bench::new();
    let mut state = FakeState::new(bench.endpoint());
    state.behaviour = Behaviour::SummarizeTimeout;
    let state = Arc::new(state);
    let config = bench.write_config(&[], &[]);

    assert!(bench.run(&state, &config, RUN_IN_PROCESS).is_err());

    let records = bench.records();
    assert_eq!(1, records.len());
    let record = &records[0];
    assert_eq!(Some(FailureKind::Unclassified), record.failure_kind);
    assert_eq!(Some(FailureStage::Summarize), record.failure_stage);
    assert!(record
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("timed out waiting for a reply"));
    assert!(record.summarize_output_len_bytes.is_none());
    assert!(record.generate_time.is_none());
}

#[test]
fn uncited_summary_is_a_contract_violation() {
    let bench = Bench::new();
    let mut state = FakeState::new(bench.endpoint());
    state.behaviour = Behaviour::UncitedSummary;
    let state = Arc::new(state);
    let config = bench.write_config(&[], &[]);

    assert!(bench.run(&state, &config, RUN_IN_PROCESS).is_err());
    assert_eq!(
        Some(FailureKind::ContractViolation),
        bench.records()[0].failure_kind
    );
}

#[test]
fn partially_started_backend_is_stopped() {
    let bench = Bench::new();
    let mut state = FakeState::new(bench.endpoint());
    // The inference container starts, the service container does not.
    state.fail_start_at = Some(1);
    let state = Arc::new(state);
    let config = bench.write_config(&[("backends", r#"["single_service"]"#)], &[]);

    assert!(bench.run(&state, &config, RUN_IN_PROCESS).is_err());

    let records = bench.records();
    assert_eq!(1, records.len());
    assert_eq!(Some(FailureKind::BackendStartupError), records[0].failure_kind);
    assert_eq!(Some(FailureStage::Startup), records[0].failure_stage);
    assert!(records[0]
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("no such image"));

    assert_eq!(1, state.started.lock().len());
    assert_eq!(vec!["container-1".to_string()], *state.stopped.lock());
}

#[test]
fn single_service_runs_both_containers() {
    let bench = Bench::new();
    let state = Arc::new(FakeState::new(bench.endpoint()));
    let config = bench.write_config(&[("backends", r#"["single_service"]"#)], &[]);

    let report = bench.run(&state, &config, RUN_IN_PROCESS).unwrap();
    assert_eq!(1, report.succeeded);

    let started = state.started.lock();
    assert_eq!(2, started.len());
    assert!(started[0].args.contains(&"--model-id".to_string()));
    assert!(started[1]
        .args
        .contains(&format!("--inference_server=http://127.0.0.1:{}", bench.inference_port)));
    // Newest first.
    assert_eq!(
        vec!["container-2".to_string(), "container-1".to_string()],
        *state.stopped.lock()
    );
    assert_eq!(0, state.loads.load(Ordering::SeqCst));
}

#[test]
fn dual_service_loads_engine_next_to_inference_container() {
    let bench = Bench::new();
    let state = Arc::new(FakeState::new(bench.endpoint()));
    let config = bench.write_config(&[("backends", r#"["dual_service"]"#)], &[]);

    let report = bench.run(&state, &config, RUN_IN_PROCESS).unwrap();
    assert_eq!(1, report.succeeded);

    assert_eq!(1, state.started.lock().len());
    assert_eq!(1, state.loads.load(Ordering::SeqCst));
    assert_eq!(1, state.unloads.load(Ordering::SeqCst));
    assert_eq!(vec!["container-1".to_string()], *state.stopped.lock());
}

#[test]
fn backend_that_never_listens_times_out() {
    let bench = Bench::new();
    let closed_port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let state = Arc::new(FakeState::new(
        Url::parse(&format!("http://127.0.0.1:{closed_port}/")).unwrap(),
    ));
    let config = bench.write_config(&[], &[("ready_timeout_s", "1")]);

    assert!(bench.run(&state, &config, RUN_IN_PROCESS).is_err());

    let record = &bench.records()[0];
    assert_eq!(Some(FailureKind::BackendStartupTimeout), record.failure_kind);
    assert!(record.summarize_input_len_bytes.is_none());
    assert_eq!(1, state.unloads.load(Ordering::SeqCst));
}

#[test]
fn gpu_count_mismatch_is_skipped() {
    let bench = Bench::new();
    let state = Arc::new(FakeState::new(bench.endpoint()));
    let config = bench.write_config(&[("gpu_counts", "[1, 2]")], &[]);

    let report = bench.run(&state, &config, RUN_IN_PROCESS).unwrap();
    assert_eq!(1, report.succeeded);
    assert_eq!(1, report.skipped);

    let records = bench.records();
    assert_eq!(2, records.len());
    assert_eq!(RecordOutcome::Skipped, records[1].outcome());
    assert_eq!(
        Some("requested 2 GPUs but 1 are visible".to_string()),
        records[1].skipped
    );
    assert!(records[1].environment.date.is_none());
    assert_eq!(1, state.loads.load(Ordering::SeqCst));
}

#[test]
fn machine_without_gpus_skips_instead_of_failing() {
    let bench = Bench::new();
    let mut state = FakeState::new(bench.endpoint());
    state.available_gpus = 0;
    let state = Arc::new(state);
    let config = bench.write_config(&[], &[]);

    let report = bench.run(&state, &config, RUN_IN_PROCESS).unwrap();
    assert_eq!(0, report.succeeded);
    assert_eq!(1, report.skipped);

    let records = bench.records();
    assert_eq!(1, records.len());
    assert_eq!(RecordOutcome::Skipped, records[0].outcome());
    assert_eq!(
        Some("requested 1 GPUs but 0 are visible".to_string()),
        records[0].skipped
    );
    assert!(records[0].failure_kind.is_none());
    assert_eq!(0, state.loads.load(Ordering::SeqCst));
}

#[test]
fn gpu_visibility_goes_to_the_service_not_the_harness() {
    let bench = Bench::new();
    let mut state = FakeState::new(bench.endpoint());
    state.available_gpus = 2;
    let state = Arc::new(state);
    let config = bench.write_config(&[("gpu_counts", "[2]")], &[]);

    let before = std::env::var_os(GPU_VISIBILITY_ENV);
    let report = bench.run(&state, &config, RUN_IN_PROCESS).unwrap();
    assert_eq!(1, report.succeeded);
    assert_eq!(before, std::env::var_os(GPU_VISIBILITY_ENV));

    assert_eq!(vec!["0,1".to_string()], *state.visibility_queries.lock());
    let launches = state.launches.lock();
    assert_eq!(1, launches.len());
    assert!(launches[0]
        .env
        .contains(&(GPU_VISIBILITY_ENV.to_string(), "0,1".to_string())));
}

#[test]
fn unwritable_results_log_does_not_fail_the_run() {
    let bench = Bench::new();
    let state = Arc::new(FakeState::new(bench.endpoint()));
    let config = bench.write_config(&[], &[]);
    let missing_dir = bench.dir.path().join("missing").join("perf.jsonl");

    let mut args = vec!["--results", missing_dir.to_str().unwrap()];
    args.extend_from_slice(RUN_IN_PROCESS);
    let report = bench.run(&state, &config, &args).unwrap();

    assert_eq!(1, report.succeeded);
    assert!(!missing_dir.exists());
    assert_eq!(1, state.unloads.load(Ordering::SeqCst));
}

#[test]
fn panicking_scenario_is_still_recorded_and_torn_down() {
    let bench = Bench::new();
    let mut state = FakeState::new(bench.endpoint());
    state.behaviour = Behaviour::PanicOnGenerate;
    let state = Arc::new(state);

    let mut config = BenchConfig::default();
    config.results_path = bench.results();
    config.workload.document_path = bench.dir.path().join("doc.pdf");
    config.backend.service_port = bench.port;
    config.backend.settle_interval_s = 0;
    config.backend.poll_interval_ms = 50;

    let collaborators = Collaborators {
        containers: Arc::new(FakeContainers(state.clone())),
        engine: Arc::new(FakeEngine(state.clone())),
        gpus: Arc::new(FakeGpus(state.clone())),
        connector: Arc::new(FakeConnector(state.clone())),
        documents: Arc::new(FakeDocuments),
    };
    let runner = ScenarioRunner::new(
        "run-1",
        &config,
        collaborators,
        Arc::new(Executor::start().unwrap()),
        Arc::new(Reporter::new()),
    );
    let scenario = ScenarioDescriptor {
        backend: BackendKind::InProcess,
        model_id: "org/model-7b".to_string(),
        tasks: "summarize+generate".parse().unwrap(),
        quantization: Quantization::Full,
        gpu_count: NonZeroU32::new(1).unwrap(),
    };

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        runner.run_scenario(&scenario)
    }));
    assert!(result.is_err());

    let records = bench.records();
    assert_eq!(1, records.len());
    assert_eq!(Some(FailureKind::Unclassified), records[0].failure_kind);
    assert_eq!(Some(FailureStage::Generate), records[0].failure_stage);
    assert_eq!(1, state.unloads.load(Ordering::SeqCst));
}

#[test]
fn stopping_twice_is_harmless() {
    let bench = Bench::new();
    let state = Arc::new(FakeState::new(bench.endpoint()));
    let mut config = BenchConfig::default();
    config.backend.service_port = bench.port;
    config.backend.settle_interval_s = 0;

    let collaborators = Collaborators {
        containers: Arc::new(FakeContainers(state.clone())),
        engine: Arc::new(FakeEngine(state.clone())),
        gpus: Arc::new(FakeGpus(state.clone())),
        connector: Arc::new(FakeConnector(state.clone())),
        documents: Arc::new(FakeDocuments),
    };
    let manager = BackendManager::new(
        config.backend.clone(),
        &config.workload,
        collaborators,
        Arc::new(Executor::start().unwrap()),
    );
    let scenario = ScenarioDescriptor {
        backend: BackendKind::DualService,
        model_id: "org/model-7b".to_string(),
        tasks: "generate".parse().unwrap(),
        quantization: Quantization::Full,
        gpu_count: NonZeroU32::new(1).unwrap(),
    };

    let mut backend = manager.prepare(&scenario);
    manager.start(&scenario, &mut backend).unwrap();
    assert_eq!(1, backend.handles().len());
    assert_eq!(&bench.endpoint(), backend.endpoint().unwrap());

    manager.stop(&mut backend);
    manager.stop(&mut backend);

    assert!(backend.is_stopped());
    assert_eq!(1, state.stopped.lock().len());
    assert_eq!(1, state.unloads.load(Ordering::SeqCst));
}

#[test]
fn summary_fails_on_regression() {
    let bench = Bench::new();
    let state = Arc::new(FakeState::new(bench.endpoint()));
    let config = bench.write_config(&[], &[]);

    let scenario = ScenarioDescriptor {
        backend: BackendKind::InProcess,
        model_id: "org/model-7b".to_string(),
        tasks: "generate".parse().unwrap(),
        quantization: Quantization::Full,
        gpu_count: NonZeroU32::new(1).unwrap(),
    };
    for (run_id, seconds) in [("run-1", 10.0), ("run-2", 15.0)] {
        let mut record = BenchmarkRecord::new(run_id, scenario.clone(), HARNESS_VERSION);
        record.record_generate(&GenerateOutcome {
            output_len_bytes: 10,
            elapsed: Duration::from_secs_f64(seconds),
        });
        append_record(&record, &bench.results()).unwrap();
    }

    let err = bench.run(&state, &config, &["summary"]).unwrap_err();
    assert!(err.to_string().contains("regressed"));
    assert!(bench.run(&state, &config, &["summary", "--threshold", "60"]).is_ok());
}
