//! Staggered fan-out of load-test runs across the cluster.
//!
//! One task per target. Launches happen in target-list order, separated by
//! the stagger interval; runs overlap and finish in any order. The batch
//! waits for every run and only fails on problems found before the first
//! launch (target resolution, payload loading).

use crate::capture::{results_dir, results_path, LiveSink, OutputCapture};
use crate::error::{DispatchError, Result, RunError, RunPhase};
use crate::executor::{Credential, RemoteConnection, RemoteExecutor, RemoteSession};
use crate::payload::PayloadLoader;
use crate::report::{RunReporter, TargetOutcome};
use crate::target::TargetDirectory;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Command run on every target.
pub const DEFAULT_REMOTE_COMMAND: &str = "cd mattermost-load-test && ./bin/loadtest all";

/// Where the configuration payload lands on every target.
pub const DEFAULT_REMOTE_CONFIG_PATH: &str = "mattermost-load-test/loadtestconfig.json";

/// Delay between successive launches.
pub const DEFAULT_STAGGER: Duration = Duration::from_secs(10);

/// Fixed parameters of a dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Directory under which `results/` is created.
    pub working_dir: PathBuf,
    /// Identity used to connect to every target.
    pub credential: Credential,
    /// Delay between successive launches.
    pub stagger: Duration,
    /// Remote command to run.
    pub remote_command: String,
    /// Upload destination for the configuration payload, relative to the login directory.
    pub remote_config_path: String,
}

impl DispatchSettings {
    /// Settings with the default command, payload path and stagger interval.
    pub fn new(working_dir: impl Into<PathBuf>, credential: Credential) -> Self {
        Self {
            working_dir: working_dir.into(),
            credential,
            stagger: DEFAULT_STAGGER,
            remote_command: DEFAULT_REMOTE_COMMAND.to_string(),
            remote_config_path: DEFAULT_REMOTE_CONFIG_PATH.to_string(),
        }
    }
}

/// Per-invocation options.
#[derive(Default)]
pub struct LoadtestOptions {
    /// Path or URL of a configuration payload to upload to every target.
    pub config_location: Option<String>,
    /// Sink receiving the primary target's live standard output.
    pub live_output: Option<LiveSink>,
}

impl std::fmt::Debug for LoadtestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadtestOptions")
            .field("config_location", &self.config_location)
            .field("live_output", &self.live_output.is_some())
            .finish()
    }
}

/// What a completed batch tells the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Directory holding one results file per target.
    pub results_dir: PathBuf,
    /// Number of targets dispatched.
    pub dispatched: usize,
}

/// Runs the load-test command across every target of a cluster.
pub struct Dispatcher {
    targets: Arc<dyn TargetDirectory>,
    executor: Arc<dyn RemoteExecutor>,
    payloads: Arc<dyn PayloadLoader>,
    reporter: Arc<dyn RunReporter>,
    settings: Arc<DispatchSettings>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher from its collaborators.
    pub fn new(
        targets: Arc<dyn TargetDirectory>,
        executor: Arc<dyn RemoteExecutor>,
        payloads: Arc<dyn PayloadLoader>,
        reporter: Arc<dyn RunReporter>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            targets,
            executor,
            payloads,
            reporter,
            settings: Arc::new(settings),
        }
    }

    /// Get the dispatcher settings.
    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Resolve the ordered target list, failing if it is empty.
    ///
    /// Repeated addresses keep their first position; each target gets one
    /// run and one results file.
    pub async fn resolve_targets(&self) -> Result<Vec<String>> {
        let addrs = self.targets.loadtest_instance_addrs().await?;
        if addrs.is_empty() {
            return Err(DispatchError::NoTargets);
        }

        let mut seen = HashSet::with_capacity(addrs.len());
        let mut unique = Vec::with_capacity(addrs.len());
        for addr in addrs {
            if seen.insert(addr.clone()) {
                unique.push(addr);
            } else {
                tracing::warn!("Skipping duplicate loadtest instance {}", addr);
            }
        }
        Ok(unique)
    }

    /// Run the load test on every target and wait for all runs to finish.
    ///
    /// Per-target failures are reported, never returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the target list cannot be resolved or is empty,
    /// or if the configuration payload cannot be loaded. No target is
    /// contacted in either case.
    pub async fn loadtest(&self, options: LoadtestOptions) -> Result<BatchReport> {
        let addrs = self.resolve_targets().await?;

        let payload = match options.config_location.filter(|l| !l.is_empty()) {
            Some(location) => {
                let data = self
                    .payloads
                    .load(&location)
                    .await
                    .map_err(|source| DispatchError::Payload {
                        location: location.clone(),
                        source,
                    })?;
                Some(Arc::<[u8]>::from(data))
            }
            None => None,
        };

        let mut live_output = options.live_output;
        let mut handles = Vec::with_capacity(addrs.len());

        for (index, address) in addrs.iter().enumerate() {
            if index > 0 && !self.settings.stagger.is_zero() {
                tokio::time::sleep(self.settings.stagger).await;
            }

            let mirror = if index == 0 { live_output.take() } else { None };
            let run = TargetRun {
                address: address.clone(),
                index,
                payload: payload.clone(),
                executor: Arc::clone(&self.executor),
                reporter: Arc::clone(&self.reporter),
                settings: Arc::clone(&self.settings),
            };
            self.reporter.launched(address, index);
            handles.push((index, address.clone(), tokio::spawn(run.execute(mirror))));
        }

        let results_dir = results_dir(&self.settings.working_dir);
        tracing::info!(
            "Waiting for loadtests to complete. See: {} for results.",
            results_dir.display()
        );

        for (index, address, handle) in handles {
            if let Err(e) = handle.await {
                let reason = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                };
                self.reporter.finished(&TargetOutcome {
                    results_file: results_path(&self.settings.working_dir, &address),
                    address,
                    index,
                    result: Err(RunError::Panicked(reason)),
                });
            }
        }

        Ok(BatchReport {
            results_dir,
            dispatched: addrs.len(),
        })
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One target's run, owned by its task.
struct TargetRun {
    address: String,
    index: usize,
    payload: Option<Arc<[u8]>>,
    executor: Arc<dyn RemoteExecutor>,
    reporter: Arc<dyn RunReporter>,
    settings: Arc<DispatchSettings>,
}

impl TargetRun {
    async fn execute(self, mirror: Option<LiveSink>) {
        let result = self.run(mirror).await;
        self.reporter.finished(&TargetOutcome {
            address: self.address.clone(),
            index: self.index,
            results_file: results_path(&self.settings.working_dir, &self.address),
            result,
        });
    }

    async fn run(&self, mirror: Option<LiveSink>) -> std::result::Result<(), RunError> {
        let mut capture = OutputCapture::create(&self.settings.working_dir, &self.address, mirror)
            .await
            .map_err(|source| RunError::ResultsFile {
                path: results_path(&self.settings.working_dir, &self.address),
                source,
            })?;

        let result = self.connect_and_run(&mut capture).await;
        if let Err(e) = &result {
            if let Err(io) = capture.record_failure(e).await {
                tracing::warn!("Failed to record error in {}: {}", capture.path().display(), io);
            }
        }

        let flushed = capture.finish().await.map_err(RunError::Capture);
        result.and(flushed)
    }

    async fn connect_and_run(&self, capture: &mut OutputCapture) -> std::result::Result<(), RunError> {
        tracing::debug!("{}: {}", self.address, RunPhase::Connecting);
        let mut conn = self
            .executor
            .connect(&self.settings.credential, &self.address)
            .await
            .map_err(RunError::Connect)?;

        let result = self.run_on_connection(conn.as_mut(), capture).await;
        if let Err(e) = conn.close().await {
            tracing::warn!("Failed to close connection to {}: {}", self.address, e);
        }
        result
    }

    async fn run_on_connection(
        &self,
        conn: &mut dyn RemoteConnection,
        capture: &mut OutputCapture,
    ) -> std::result::Result<(), RunError> {
        tracing::debug!("{}: {}", self.address, RunPhase::OpeningSession);
        let mut session = conn.open_session().await.map_err(RunError::Session)?;

        let result = self.upload_and_run(conn, session.as_mut(), capture).await;
        if let Err(e) = session.close().await {
            tracing::warn!("Failed to close session on {}: {}", self.address, e);
        }
        result
    }

    async fn upload_and_run(
        &self,
        conn: &mut dyn RemoteConnection,
        session: &mut dyn RemoteSession,
        capture: &mut OutputCapture,
    ) -> std::result::Result<(), RunError> {
        if let Some(payload) = &self.payload {
            tracing::debug!("{}: {}", self.address, RunPhase::Uploading);
            conn.upload_bytes(payload, &self.settings.remote_config_path)
                .await
                .map_err(RunError::Upload)?;
        }

        tracing::debug!("{}: {}", self.address, RunPhase::Running);
        session
            .run(&self.settings.remote_command, capture)
            .await
            .map_err(RunError::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{MockExecutor, MockScript};
    use crate::payload::{FileOrUrlLoader, PayloadError};
    use crate::report::MemoryReporter;
    use crate::target::{StaticTargets, TargetError};
    use async_trait::async_trait;
    use std::path::Path;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tempfile::tempdir;
    use tokio::io::AsyncWrite;

    /// Payload loader serving fixed bytes and counting calls.
    #[derive(Default)]
    struct FixedPayload {
        data: Vec<u8>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PayloadLoader for FixedPayload {
        async fn load(&self, location: &str) -> std::result::Result<Vec<u8>, PayloadError> {
            self.calls.lock().unwrap().push(location.to_string());
            Ok(self.data.clone())
        }
    }

    /// Target directory that cannot determine the topology.
    struct BrokenDirectory;

    #[async_trait]
    impl TargetDirectory for BrokenDirectory {
        async fn loadtest_instance_addrs(&self) -> std::result::Result<Vec<String>, TargetError> {
            Err(TargetError::MissingOutput {
                name: "loadtest_instance_addrs".into(),
            })
        }
    }

    /// AsyncWrite that appends into a shared buffer.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl AsyncWrite for SharedSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct Fixture {
        executor: MockExecutor,
        reporter: MemoryReporter,
        payloads: Arc<FixedPayload>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                executor: MockExecutor::new(),
                reporter: MemoryReporter::new(),
                payloads: Arc::new(FixedPayload {
                    data: b"{\"UsersConfiguration\":{\"NumActiveEntities\":100}}".to_vec(),
                    ..FixedPayload::default()
                }),
            }
        }

        fn dispatcher(&self, targets: Arc<dyn TargetDirectory>, working_dir: &Path) -> Dispatcher {
            self.dispatcher_with_stagger(targets, working_dir, Duration::ZERO)
        }

        fn dispatcher_with_stagger(
            &self,
            targets: Arc<dyn TargetDirectory>,
            working_dir: &Path,
            stagger: Duration,
        ) -> Dispatcher {
            let mut settings =
                DispatchSettings::new(working_dir, Credential::new("ubuntu", "/keys/cluster.pem"));
            settings.stagger = stagger;
            Dispatcher::new(
                targets,
                Arc::new(self.executor.clone()),
                self.payloads.clone(),
                Arc::new(self.reporter.clone()),
                settings,
            )
        }
    }

    fn abc() -> Arc<dyn TargetDirectory> {
        Arc::new(StaticTargets::new(["A", "B", "C"]))
    }

    fn result_files(working_dir: &Path) -> Vec<String> {
        let dir = results_dir(working_dir);
        if !dir.exists() {
            return Vec::new();
        }
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn three_targets_one_connect_failure() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();
        fx.executor.fail_connect("B", "connection refused");

        let report = fx
            .dispatcher(abc(), dir.path())
            .loadtest(LoadtestOptions::default())
            .await
            .unwrap();

        assert_eq!(report.dispatched, 3);
        assert_eq!(report.results_dir, dir.path().join("results"));
        assert_eq!(
            result_files(dir.path()),
            vec!["loadtest-out-A.txt", "loadtest-out-B.txt", "loadtest-out-C.txt"]
        );
        assert_eq!(fx.reporter.failed_addresses(), vec!["B"]);
        assert_eq!(fx.reporter.outcomes().len(), 3);

        let b = std::fs::read_to_string(results_path(dir.path(), "B")).unwrap();
        assert!(b.contains("connection refused"), "got: {}", b);
        let a = std::fs::read_to_string(results_path(dir.path(), "A")).unwrap();
        assert_eq!(a, "loadtest output from A\n");
    }

    #[tokio::test]
    async fn every_target_failing_still_succeeds() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();
        fx.executor.fail_connect("A", "no route to host");
        fx.executor.fail_session("B", "channel open failed");
        fx.executor.script(
            "C",
            MockScript {
                exit_code: Some(1),
                ..MockScript::default()
            },
        );

        let report = fx
            .dispatcher(abc(), dir.path())
            .loadtest(LoadtestOptions::default())
            .await;

        assert!(report.is_ok());
        let mut failed = fx.reporter.failed_addresses();
        failed.sort();
        assert_eq!(failed, vec!["A", "B", "C"]);

        let phases: Vec<(String, RunPhase)> = fx
            .reporter
            .outcomes()
            .into_iter()
            .map(|(addr, phase, _)| (addr, phase))
            .collect();
        assert!(phases.contains(&("A".to_string(), RunPhase::Connecting)));
        assert!(phases.contains(&("B".to_string(), RunPhase::OpeningSession)));
        assert!(phases.contains(&("C".to_string(), RunPhase::Running)));

        // C failed inside the run, after both were opened.
        assert_eq!(fx.executor.closed_sessions(), vec!["C"]);
        let mut conns = fx.executor.closed_connections();
        conns.sort();
        assert_eq!(conns, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn results_dir_creation_failure_is_per_target() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();
        std::fs::write(results_dir(dir.path()), b"not a directory").unwrap();

        let report = fx
            .dispatcher(abc(), dir.path())
            .loadtest(LoadtestOptions::default())
            .await
            .unwrap();

        assert_eq!(report.dispatched, 3);
        assert!(fx.executor.connected_addresses().is_empty());
        let outcomes = fx.reporter.outcomes();
        assert_eq!(outcomes.len(), 3);
        for (addr, phase, err) in outcomes {
            assert_eq!(phase, RunPhase::Preparing, "{}", addr);
            assert!(err.unwrap().contains("unable to create loadtest results file"));
        }
    }

    #[tokio::test]
    async fn address_that_would_escape_results_dir_is_rejected() {
        let root = tempdir().unwrap();
        let work = root.path().join("wd");
        let fx = Fixture::new();
        let targets: Arc<dyn TargetDirectory> =
            Arc::new(StaticTargets::new(["A", "x/../../../escaped"]));

        fx.dispatcher(targets, &work)
            .loadtest(LoadtestOptions::default())
            .await
            .unwrap();

        assert_eq!(fx.executor.connected_addresses(), vec!["A"]);
        assert_eq!(result_files(&work), vec!["loadtest-out-A.txt"]);
        assert!(!root.path().join("escaped.txt").exists());

        let outcomes = fx.reporter.outcomes();
        let bad = outcomes
            .iter()
            .find(|(a, _, _)| a == "x/../../../escaped")
            .unwrap();
        assert_eq!(bad.1, RunPhase::Preparing);
        assert_eq!(fx.reporter.failed_addresses(), vec!["x/../../../escaped"]);
    }

    #[tokio::test]
    async fn duplicate_addresses_run_once() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();
        let targets: Arc<dyn TargetDirectory> =
            Arc::new(StaticTargets::new(["A", "B", "A", "C", "B"]));
        let dispatcher = fx.dispatcher(targets, dir.path());

        assert_eq!(
            dispatcher.resolve_targets().await.unwrap(),
            vec!["A", "B", "C"]
        );
        let report = dispatcher.loadtest(LoadtestOptions::default()).await.unwrap();

        assert_eq!(report.dispatched, 3);
        assert_eq!(fx.reporter.launched_addresses(), vec!["A", "B", "C"]);
        let a = std::fs::read_to_string(results_path(dir.path(), "A")).unwrap();
        assert_eq!(a, "loadtest output from A\n");
    }

    #[test]
    fn target_runs_can_be_spawned() {
        fn assert_send<T: Send + 'static>(_: &T) {}

        let run = TargetRun {
            address: "A".into(),
            index: 0,
            payload: None,
            executor: Arc::new(MockExecutor::new()),
            reporter: Arc::new(MemoryReporter::new()),
            settings: Arc::new(DispatchSettings::new(
                "/tmp",
                Credential::new("ubuntu", "/keys/cluster.pem"),
            )),
        };
        assert_send(&run.execute(None));
    }

    #[tokio::test]
    async fn empty_target_list_fails_fast() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();
        let targets: Arc<dyn TargetDirectory> = Arc::new(StaticTargets::default());

        let err = fx
            .dispatcher(targets, dir.path())
            .loadtest(LoadtestOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::NoTargets));
        assert!(fx.executor.connected_addresses().is_empty());
        assert!(result_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn unresolvable_targets_fail_fast() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();

        let err = fx
            .dispatcher(Arc::new(BrokenDirectory), dir.path())
            .loadtest(LoadtestOptions {
                config_location: Some("loadtestconfig.json".into()),
                live_output: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Targets(_)));
        assert!(fx.executor.connected_addresses().is_empty());
        assert!(fx.payloads.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_config_url_fails_before_any_file() {
        let dir = tempdir().unwrap();
        let executor = MockExecutor::new();
        let dispatcher = Dispatcher::new(
            abc(),
            Arc::new(executor.clone()),
            Arc::new(FileOrUrlLoader::new()),
            Arc::new(MemoryReporter::new()),
            DispatchSettings::new(dir.path(), Credential::new("ubuntu", "/keys/cluster.pem")),
        );

        let err = dispatcher
            .loadtest(LoadtestOptions {
                config_location: Some("http://127.0.0.1:1/loadtestconfig.json".into()),
                live_output: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Payload { .. }));
        assert!(executor.connected_addresses().is_empty());
        assert!(result_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn payload_loaded_once_and_uploaded_to_every_target() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();

        fx.dispatcher(abc(), dir.path())
            .loadtest(LoadtestOptions {
                config_location: Some("https://config.example.com/loadtest.json".into()),
                live_output: None,
            })
            .await
            .unwrap();

        assert_eq!(fx.payloads.calls.lock().unwrap().len(), 1);
        let uploads = fx.executor.uploads();
        assert_eq!(uploads.len(), 3);
        for (_, data, path) in &uploads {
            assert_eq!(data, &fx.payloads.data);
            assert_eq!(path, DEFAULT_REMOTE_CONFIG_PATH);
        }
        let mut addrs: Vec<String> = uploads.into_iter().map(|(a, _, _)| a).collect();
        addrs.sort();
        assert_eq!(addrs, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn no_config_location_means_no_upload() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();

        fx.dispatcher(abc(), dir.path())
            .loadtest(LoadtestOptions {
                config_location: Some(String::new()),
                live_output: None,
            })
            .await
            .unwrap();

        assert!(fx.executor.uploads().is_empty());
        assert!(fx.payloads.calls.lock().unwrap().is_empty());
        assert_eq!(fx.executor.runs().len(), 3);
    }

    #[tokio::test]
    async fn upload_failure_skips_run_and_releases_connection() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();
        fx.executor.fail_upload("B", "disk full");

        fx.dispatcher(abc(), dir.path())
            .loadtest(LoadtestOptions {
                config_location: Some("loadtestconfig.json".into()),
                live_output: None,
            })
            .await
            .unwrap();

        let ran: Vec<String> = fx.executor.runs().into_iter().map(|(a, _)| a).collect();
        assert!(!ran.contains(&"B".to_string()));
        assert_eq!(fx.reporter.failed_addresses(), vec!["B"]);

        let mut sessions = fx.executor.closed_sessions();
        sessions.sort();
        assert_eq!(sessions, vec!["A", "B", "C"]);
        let mut conns = fx.executor.closed_connections();
        conns.sort();
        assert_eq!(conns, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn session_failure_still_closes_connection() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();
        fx.executor.fail_session("A", "administratively prohibited");

        fx.dispatcher(abc(), dir.path())
            .loadtest(LoadtestOptions::default())
            .await
            .unwrap();

        assert!(!fx.executor.closed_sessions().contains(&"A".to_string()));
        assert!(fx.executor.closed_connections().contains(&"A".to_string()));
    }

    #[tokio::test]
    async fn only_primary_output_is_mirrored() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();
        let sink = SharedSink::default();

        fx.dispatcher(abc(), dir.path())
            .loadtest(LoadtestOptions {
                config_location: None,
                live_output: Some(Box::new(sink.clone())),
            })
            .await
            .unwrap();

        assert_eq!(sink.contents(), "loadtest output from A\n");
        for addr in ["A", "B", "C"] {
            let file = std::fs::read_to_string(results_path(dir.path(), addr)).unwrap();
            assert_eq!(file, format!("loadtest output from {}\n", addr));
        }
    }

    #[tokio::test]
    async fn primary_failure_drops_mirroring() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();
        fx.executor.fail_connect("A", "timeout");
        let sink = SharedSink::default();

        fx.dispatcher(abc(), dir.path())
            .loadtest(LoadtestOptions {
                config_location: None,
                live_output: Some(Box::new(sink.clone())),
            })
            .await
            .unwrap();

        assert!(sink.contents().is_empty());
        assert_eq!(fx.executor.runs().len(), 2);
    }

    #[tokio::test]
    async fn runs_the_configured_command_with_the_shared_credential() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();

        fx.dispatcher(abc(), dir.path())
            .loadtest(LoadtestOptions::default())
            .await
            .unwrap();

        for (_, command) in fx.executor.runs() {
            assert_eq!(command, DEFAULT_REMOTE_COMMAND);
        }
        for credential in fx.executor.credentials() {
            assert_eq!(credential, Credential::new("ubuntu", "/keys/cluster.pem"));
        }
    }

    #[tokio::test]
    async fn panicking_run_is_isolated() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();
        fx.executor.panic_on_run("B");

        let report = fx
            .dispatcher(abc(), dir.path())
            .loadtest(LoadtestOptions::default())
            .await
            .unwrap();

        assert_eq!(report.dispatched, 3);
        let outcomes = fx.reporter.outcomes();
        assert_eq!(outcomes.len(), 3);
        let b = outcomes.iter().find(|(a, _, _)| a == "B").unwrap();
        assert!(b.2.as_deref().unwrap().contains("mock run panicked on B"));
        assert_eq!(fx.reporter.failed_addresses(), vec!["B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn launches_are_staggered_in_list_order() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();
        let stagger = Duration::from_secs(10);
        let start = tokio::time::Instant::now();

        fx.dispatcher_with_stagger(abc(), dir.path(), stagger)
            .loadtest(LoadtestOptions::default())
            .await
            .unwrap();

        let connects = fx.executor.connect_times();
        let order: Vec<&str> = connects.iter().map(|(a, _)| a.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        for pair in connects.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= stagger);
        }
        assert!(start.elapsed() >= stagger * 2);
        assert!(start.elapsed() < stagger * 3, "no delay after the last launch");
        assert_eq!(fx.reporter.launched_addresses(), vec!["A", "B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_waits_for_the_slowest_run() {
        let dir = tempdir().unwrap();
        let fx = Fixture::new();
        let stagger = Duration::from_secs(10);
        fx.executor.script(
            "A",
            MockScript {
                stdout: b"slow\n".to_vec(),
                duration: Duration::from_secs(60),
                ..MockScript::default()
            },
        );
        let start = tokio::time::Instant::now();

        fx.dispatcher_with_stagger(abc(), dir.path(), stagger)
            .loadtest(LoadtestOptions::default())
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(fx.reporter.outcomes().len(), 3);
        // A launched first but finished last.
        assert_eq!(fx.reporter.outcomes().last().unwrap().0, "A");
    }
}
