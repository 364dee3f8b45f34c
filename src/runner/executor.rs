use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::actions::{ensure_similar, ActionRunner, ActionSettings};
use super::context::TestContext;
use super::events::{ConsoleEventListener, EventEmitter, TestEvent};
use super::history::HistoryStore;
use super::prerequisites::PrerequisiteVerifier;
use super::state::{
    StepResult, StepState, SuiteCounts, SuiteResult, SuiteStatus, TestPhase, TestResult,
    TestStatus,
};
use crate::driver::image_compare::{self, CompareOptions};
use crate::driver::traits::{CommandChannel, CompanionClient};
use crate::error::{Error, Result};
use crate::graph;
use crate::parser::types::{ExpectedOutcome, Step, TestCase, TestSuite};
use crate::utils::config::Config;

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Pause after interactive steps before validating the screen
    pub settle_delay: Duration,
    /// Default threshold for per-step reference validation
    pub step_screenshot_threshold: f64,
    /// Default threshold for `screenMatches` assertions
    pub assert_screenshot_threshold: f64,
    pub compare: CompareOptions,
    pub stop_on_first_failure: bool,
    pub history_limit: usize,
    pub base_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Write `screenshot` steps to disk
    pub save_screenshots: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            step_screenshot_threshold: image_compare::DEFAULT_THRESHOLD,
            assert_screenshot_threshold: image_compare::DEFAULT_THRESHOLD,
            compare: CompareOptions::default(),
            stop_on_first_failure: true,
            history_limit: 20,
            base_dir: PathBuf::from("."),
            output_dir: PathBuf::from("./output"),
            save_screenshots: true,
        }
    }
}

impl ExecutorOptions {
    pub fn from_config(config: &Config, base_dir: PathBuf) -> Self {
        Self {
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            step_screenshot_threshold: config.step_screenshot_threshold,
            assert_screenshot_threshold: config.assert_screenshot_threshold,
            compare: CompareOptions {
                channel_tolerance: config.pixel_tolerance,
            },
            stop_on_first_failure: config.stop_on_first_failure,
            history_limit: config.history_limit,
            base_dir,
            output_dir: config.output_dir.clone(),
            save_screenshots: true,
        }
    }
}

/// Cooperative cancellation flag, observed between steps and between tests
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One execution per process, shared by every executor
static RUN_SLOT: AtomicBool = AtomicBool::new(false);

/// Held while a test or suite runs; releases the slot on drop
struct RunGuard(&'static AtomicBool);

impl RunGuard {
    fn acquire(slot: &'static AtomicBool) -> Result<Self> {
        slot.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::AlreadyRunning)?;
        Ok(Self(slot))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct StepsOutcome {
    status: TestStatus,
    steps: Vec<StepResult>,
    screenshots: Vec<String>,
    error: Option<String>,
}

/// `error` dominates `failed`, which dominates `passed`
fn escalate(current: TestStatus, next: TestStatus) -> TestStatus {
    match (current, next) {
        (TestStatus::Error, _) | (_, TestStatus::Error) => TestStatus::Error,
        (TestStatus::Failed, _) | (_, TestStatus::Failed) => TestStatus::Failed,
        _ => TestStatus::Passed,
    }
}

pub struct TestExecutor {
    channel: Arc<dyn CommandChannel>,
    companion: Option<Arc<dyn CompanionClient>>,
    verifier: PrerequisiteVerifier,
    history: Arc<dyn HistoryStore>,
    emitter: EventEmitter,
    options: ExecutorOptions,
    running: &'static AtomicBool,
    stop: StopHandle,
}

impl TestExecutor {
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        companion: Option<Arc<dyn CompanionClient>>,
        verifier: PrerequisiteVerifier,
        history: Arc<dyn HistoryStore>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            channel,
            companion,
            verifier,
            history,
            emitter: EventEmitter::default(),
            options,
            running: &RUN_SLOT,
            stop: StopHandle::default(),
        }
    }

    /// Subscribe to execution events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TestEvent> {
        self.emitter.subscribe()
    }

    /// Start printing events to the console in the background
    pub fn spawn_console_listener(&self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(ConsoleEventListener::listen(self.emitter.subscribe()))
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn verifier(&self) -> &PrerequisiteVerifier {
        &self.verifier
    }

    /// Whether any executor in this process is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Give this executor its own slot so parallel unit tests do not contend
    #[cfg(test)]
    fn isolate_run_slot(&mut self) {
        self.running = Box::leak(Box::new(AtomicBool::new(false)));
    }

    /// Run a single test case
    pub async fn run_test(&self, test: &mut TestCase, device_id: &str) -> Result<TestResult> {
        let _guard = RunGuard::acquire(self.running)?;
        self.stop.reset();

        let result = self.execute_test(test, device_id).await;
        test.record_execution(result.to_record(), self.options.history_limit);
        Ok(result)
    }

    /// Run every test of `suite` in dependency order.
    ///
    /// A cyclic suite is rejected before any device interaction.
    pub async fn run_suite(
        &self,
        suite: &TestSuite,
        tests: &mut [TestCase],
        device_id: &str,
    ) -> Result<SuiteResult> {
        let _guard = RunGuard::acquire(self.running)?;
        self.stop.reset();

        let execution_order = graph::generate_execution_order(suite, tests)?;
        let index: HashMap<String, usize> = tests
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();

        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        log::info!(
            "Running suite '{}' ({} tests) on {}",
            suite.id,
            execution_order.len(),
            device_id
        );
        self.emitter.emit(TestEvent::SuiteStarted {
            run_id: run_id.clone(),
            suite_id: suite.id.clone(),
            execution_order: execution_order.clone(),
        });

        let mut test_results = Vec::with_capacity(execution_order.len());
        let mut stopped_by_user = false;

        for test_id in &execution_order {
            if self.stop.is_stop_requested() {
                log::info!("Stop requested; skipping remaining tests");
                stopped_by_user = true;
                break;
            }
            let Some(&idx) = index.get(test_id) else {
                continue;
            };

            let result = self.execute_test(&tests[idx], device_id).await;
            tests[idx].record_execution(result.to_record(), self.options.history_limit);
            let status = result.status;
            test_results.push(result);

            if status != TestStatus::Passed && self.options.stop_on_first_failure {
                log::info!("Stopping suite after '{}' ({:?})", test_id, status);
                break;
            }
        }

        // A stop observed mid-test also marks the suite
        stopped_by_user |= self.stop.is_stop_requested();

        let counts = SuiteCounts::tally(execution_order.len(), &test_results);
        let status = SuiteStatus::aggregate(&test_results, stopped_by_user);
        let duration_ms = start.elapsed().as_millis() as u64;

        self.emitter.emit(TestEvent::SuiteFinished {
            suite_id: suite.id.clone(),
            status,
            counts: counts.clone(),
            duration_ms,
        });

        Ok(SuiteResult {
            run_id,
            suite_id: suite.id.clone(),
            status,
            execution_order,
            test_results,
            counts,
            stopped_by_user,
            duration_ms,
            started_at,
        })
    }

    fn transition(&self, test_id: &str, phase: &mut TestPhase, next: TestPhase) {
        if !phase.can_transition_to(next) {
            log::warn!("[{}] unexpected phase change {:?} -> {:?}", test_id, phase, next);
        }
        *phase = next;
        self.emitter.emit(TestEvent::PhaseChanged {
            test_id: test_id.to_string(),
            phase: next,
        });
    }

    /// Run one test through its full lifecycle. Never fails: every outcome
    /// becomes a `TestResult`.
    async fn execute_test(&self, test: &TestCase, device_id: &str) -> TestResult {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();

        let ctx = TestContext::new(&self.options.base_dir, &self.options.output_dir, device_id, test);
        let runner = ActionRunner::new(
            self.channel.clone(),
            self.companion.clone(),
            device_id,
            ActionSettings {
                assert_threshold: self.options.assert_screenshot_threshold,
                compare: self.options.compare,
                base_dir: ctx.base_dir.clone(),
                screenshot_dir: self.options.save_screenshots.then(|| ctx.output_dir.clone()),
            },
        );

        self.emitter.emit(TestEvent::TestStarted {
            test_id: test.id.clone(),
            test_name: test.display_name().to_string(),
            step_count: test.steps.len(),
        });

        let mut phase = TestPhase::NotStarted;
        self.transition(&test.id, &mut phase, TestPhase::PrerequisitesPending);

        let report = self.verifier.verify_prerequisites(test, &runner).await;
        for outcome in &report.outcomes {
            self.emitter.emit(TestEvent::PrerequisiteChecked {
                test_id: test.id.clone(),
                outcome: outcome.clone(),
            });
        }
        let prerequisites = report.outcomes;

        let outcome = match report.failure {
            Some(failure) => {
                let reason = format!("prerequisite failed: {}", failure);
                let steps = test
                    .steps
                    .iter()
                    .enumerate()
                    .map(|(i, s)| {
                        StepResult::skipped(i, s.kind.name(), s.description.as_deref(), &reason)
                    })
                    .collect();
                StepsOutcome {
                    status: TestStatus::Error,
                    steps,
                    screenshots: Vec::new(),
                    error: Some(failure.to_string()),
                }
            }
            None => {
                self.transition(&test.id, &mut phase, TestPhase::StepsRunning);
                self.run_steps(test, &ctx, &runner).await
            }
        };

        self.transition(&test.id, &mut phase, TestPhase::CleanupRunning);
        let cleanup = self
            .verifier
            .run_cleanup(test, &runner, outcome.status == TestStatus::Passed)
            .await;
        if !cleanup.is_empty() {
            self.emitter.emit(TestEvent::CleanupFinished {
                test_id: test.id.clone(),
                outcomes: cleanup.clone(),
            });
        }

        self.transition(&test.id, &mut phase, TestPhase::Terminal(outcome.status));
        let duration_ms = start.elapsed().as_millis() as u64;

        self.verifier
            .mark_executed(&test.id, outcome.status == TestStatus::Passed, duration_ms)
            .await;

        let result = TestResult {
            run_id,
            test_id: test.id.clone(),
            test_name: test.display_name().to_string(),
            status: outcome.status,
            duration_ms,
            started_at,
            steps: outcome.steps,
            screenshots: outcome.screenshots,
            prerequisites,
            cleanup,
            error: outcome.error,
        };

        if let Err(e) = self.history.append(&test.id, result.to_record()).await {
            log::warn!("[{}] Failed to record execution history: {}", test.id, e);
        }

        self.emitter.emit(TestEvent::TestFinished {
            test_id: test.id.clone(),
            status: result.status,
            duration_ms,
            error: result.error.clone(),
        });
        result
    }

    async fn run_steps(&self, test: &TestCase, ctx: &TestContext, runner: &ActionRunner) -> StepsOutcome {
        let mut outcome = StepsOutcome {
            status: TestStatus::Passed,
            steps: Vec::with_capacity(test.steps.len()),
            screenshots: Vec::new(),
            error: None,
        };

        for (index, step) in test.steps.iter().enumerate() {
            if self.stop.is_stop_requested() {
                outcome.status = escalate(outcome.status, TestStatus::Failed);
                outcome.error.get_or_insert_with(|| "Stopped by user".to_string());
                self.skip_remaining(test, index, "stopped by user", &mut outcome.steps);
                break;
            }

            let expected_failure = step.expected_outcome == ExpectedOutcome::Fail;
            let mut state = StepState::start(
                index,
                step.kind.name(),
                step.description.as_deref(),
                expected_failure,
            );
            self.emitter.emit(TestEvent::StepStarted {
                test_id: test.id.clone(),
                index,
                action: step.display_name(),
            });

            let result = self.run_step(step, ctx, runner, &mut state).await;
            let result = match (result, expected_failure) {
                (Ok(()), false) => Ok(false),
                (Err(e), false) => Err(e),
                (Err(e), true) => {
                    log::debug!("[{}] step {} failed as expected: {}", test.id, index, e);
                    Ok(true)
                }
                (Ok(()), true) => Err(Error::StepFailed(
                    "step succeeded but was expected to fail".to_string(),
                )),
            };

            match result {
                Ok(inverted) => {
                    let step_result = state.pass();
                    if let Some(path) = &step_result.screenshot {
                        outcome.screenshots.push(path.clone());
                    }
                    self.emitter.emit(TestEvent::StepPassed {
                        test_id: test.id.clone(),
                        index,
                        duration_ms: step_result.duration_ms,
                        inverted,
                    });
                    outcome.steps.push(step_result);
                }
                Err(e) => {
                    let severity = if e.is_transport() {
                        TestStatus::Error
                    } else {
                        TestStatus::Failed
                    };
                    outcome.status = escalate(outcome.status, severity);
                    outcome
                        .error
                        .get_or_insert_with(|| format!("Step {} ({}) failed: {}", index, step.display_name(), e));

                    let step_result = state.fail(e.to_string());
                    self.emitter.emit(TestEvent::StepFailed {
                        test_id: test.id.clone(),
                        index,
                        error: e.to_string(),
                        duration_ms: step_result.duration_ms,
                        continued: step.continue_on_failure,
                    });
                    outcome.steps.push(step_result);

                    if !step.continue_on_failure {
                        self.skip_remaining(test, index + 1, "previous step failed", &mut outcome.steps);
                        break;
                    }
                }
            }
        }

        outcome
    }

    fn skip_remaining(&self, test: &TestCase, from: usize, reason: &str, steps: &mut Vec<StepResult>) {
        for (index, step) in test.steps.iter().enumerate().skip(from) {
            self.emitter.emit(TestEvent::StepSkipped {
                test_id: test.id.clone(),
                index,
                reason: reason.to_string(),
            });
            steps.push(StepResult::skipped(
                index,
                step.kind.name(),
                step.description.as_deref(),
                reason,
            ));
        }
    }

    async fn run_step(
        &self,
        step: &Step,
        ctx: &TestContext,
        runner: &ActionRunner,
        state: &mut StepState,
    ) -> Result<()> {
        let step = ctx.substitute_step(step)?;
        let output = runner.run_step(&step.kind).await?;
        state.screenshot = output.screenshot;
        state.similarity = output.similarity;

        if !step.kind.is_interactive() {
            return Ok(());
        }

        if !self.options.settle_delay.is_zero() {
            tokio::time::sleep(self.options.settle_delay).await;
        }

        let Some(reference) = &step.reference_screenshot else {
            return Ok(());
        };
        let threshold = step
            .screenshot_threshold
            .unwrap_or(self.options.step_screenshot_threshold);
        match runner.compare_with_reference(reference).await? {
            Some(similarity) => {
                state.similarity = Some(similarity.ratio);
                ensure_similar(&similarity, threshold)
            }
            None => {
                log::warn!(
                    "Reference screenshot '{}' not found; skipping validation",
                    reference
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeChannel;
    use crate::runner::actions::tests::png;
    use crate::runner::cache::VerificationCache;
    use crate::runner::history::InMemoryHistory;
    use crate::runner::prerequisites::VerifierOptions;
    use crate::runner::state::{ExecutionRecord, StepStatus};

    struct Harness {
        channel: Arc<FakeChannel>,
        history: Arc<InMemoryHistory>,
        executor: TestExecutor,
    }

    fn harness(configure: impl FnOnce(&mut ExecutorOptions)) -> Harness {
        let channel = Arc::new(FakeChannel::new());
        let history = Arc::new(InMemoryHistory::new(10));
        let mut options = ExecutorOptions {
            settle_delay: Duration::ZERO,
            save_screenshots: false,
            ..Default::default()
        };
        configure(&mut options);
        let verifier =
            PrerequisiteVerifier::new(VerificationCache::new(), None, VerifierOptions::default());
        let mut executor =
            TestExecutor::new(channel.clone(), None, verifier, history.clone(), options);
        executor.isolate_run_slot();
        Harness {
            channel,
            history,
            executor,
        }
    }

    fn test_from_yaml(yaml: &str) -> TestCase {
        serde_yaml::from_str(yaml).unwrap()
    }

    /// A test whose only step runs `echo <id>` and checks for "ok"
    fn command_test(id: &str) -> TestCase {
        test_from_yaml(&format!(
            r#"
id: {id}
suiteId: s
steps:
  - action: assert
    assertion: {{ type: commandOutput, command: "echo {id}", contains: ok }}
"#
        ))
    }

    fn suite(ids: &[&str]) -> TestSuite {
        TestSuite {
            id: "s".to_string(),
            name: None,
            tests: ids.iter().map(|s| s.to_string()).collect(),
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_stop_on_first_failure() {
        let h = harness(|_| {});
        for id in ["t1", "t3", "t4", "t5"] {
            h.channel.respond(&format!("echo {}", id), "ok");
        }
        let mut tests: Vec<TestCase> = ["t1", "t2", "t3", "t4", "t5"]
            .iter()
            .map(|id| command_test(id))
            .collect();

        let result = h
            .executor
            .run_suite(&suite(&["t1", "t2", "t3", "t4", "t5"]), &mut tests, "d")
            .await
            .unwrap();

        assert_eq!(result.test_results.len(), 2);
        assert_eq!(result.status, SuiteStatus::Failed);
        assert_eq!(result.counts.skipped, 3);
        assert_eq!(result.test_results[1].status, TestStatus::Failed);
        assert!(!result.stopped_by_user);
        assert_eq!(tests[0].history.len(), 1);
        assert!(tests[2].history.is_empty());
    }

    #[tokio::test]
    async fn test_run_all_without_stop_on_failure() {
        let h = harness(|o| o.stop_on_first_failure = false);
        h.channel.respond("echo t1", "ok");
        h.channel.timeout_on("echo t3");
        let mut tests: Vec<TestCase> = ["t1", "t2", "t3"].iter().map(|id| command_test(id)).collect();

        let result = h
            .executor
            .run_suite(&suite(&["t1", "t2", "t3"]), &mut tests, "d")
            .await
            .unwrap();

        assert_eq!(result.test_results.len(), 3);
        assert_eq!(result.test_results[1].status, TestStatus::Failed);
        assert_eq!(result.test_results[2].status, TestStatus::Error);
        assert_eq!(result.status, SuiteStatus::Error);
    }

    #[tokio::test]
    async fn test_dependency_order_and_verify_only() {
        let h = harness(|_| {});
        h.channel.respond("echo login", "ok");
        h.channel.respond("echo checkout", "ok");

        let mut checkout = command_test("checkout");
        checkout.prerequisites.push(crate::graph::tests::dependency("needs-login", "login"));
        let mut tests = vec![checkout.clone(), command_test("login")];

        let result = h
            .executor
            .run_suite(&suite(&["checkout", "login"]), &mut tests, "d")
            .await
            .unwrap();
        assert_eq!(result.execution_order, vec!["login", "checkout"]);
        assert_eq!(result.status, SuiteStatus::Passed);
        assert!(result.test_results[1].prerequisites[0].from_cache);

        // A fresh process never ran login: checkout errors without running it
        let fresh = harness(|_| {});
        let result = fresh.executor.run_test(&mut checkout, "d").await.unwrap();
        assert_eq!(result.status, TestStatus::Error);
        assert!(result.error.unwrap().contains("has not been executed"));
        assert!(result.steps.iter().all(|s| s.status == StepStatus::Skipped));
        assert_eq!(fresh.channel.count_matching("echo login"), 0);
        assert_eq!(fresh.channel.count_matching("echo checkout"), 0);

        // markExecuted still records the errored run
        let cached = fresh.executor.verifier().cache().get("checkout").await.unwrap();
        assert!(!cached.success);
        assert_eq!(fresh.history.records("checkout").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_device_interaction() {
        let h = harness(|_| {});
        let mut a = command_test("a");
        a.prerequisites.push(crate::graph::tests::dependency("a->b", "b"));
        let mut b = command_test("b");
        b.prerequisites.push(crate::graph::tests::dependency("b->a", "a"));
        let mut tests = vec![a, b];

        let err = h
            .executor
            .run_suite(&suite(&["a", "b"]), &mut tests, "d")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DependencyCycle { .. }));
        assert!(h.channel.commands().is_empty());
        assert!(!h.executor.is_running());
    }

    #[tokio::test]
    async fn test_negative_steps() {
        let h = harness(|_| {});
        h.channel.fail_on("input keyevent");
        let mut test = test_from_yaml(
            r#"
id: negative
steps:
  - action: pressButton
    button: back
    expectedOutcome: fail
  - action: tap
    target: { x: 1, y: 2 }
    expectedOutcome: fail
"#,
        );

        let result = h.executor.run_test(&mut test, "d").await.unwrap();
        assert_eq!(result.steps[0].status, StepStatus::Passed);
        assert!(result.steps[0].expected_failure);
        assert_eq!(result.steps[1].status, StepStatus::Failed);
        assert_eq!(result.status, TestStatus::Failed);
    }

    #[tokio::test]
    async fn test_continue_on_failure() {
        let h = harness(|_| {});
        let mut test = test_from_yaml(
            r#"
id: soft
steps:
  - action: assert
    assertion: { type: commandOutput, command: "getprop x", contains: "1" }
    continueOnFailure: true
  - action: tap
    target: { x: 5, y: 5 }
  - action: assert
    assertion: { type: commandOutput, command: "getprop y", contains: "1" }
  - action: tap
    target: { x: 9, y: 9 }
"#,
        );

        let result = h.executor.run_test(&mut test, "d").await.unwrap();
        assert_eq!(result.status, TestStatus::Failed);
        let statuses: Vec<StepStatus> = result.steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                StepStatus::Failed,
                StepStatus::Passed,
                StepStatus::Failed,
                StepStatus::Skipped
            ]
        );
        assert_eq!(h.channel.count_matching("input tap 5 5"), 1);
        assert_eq!(h.channel.count_matching("input tap 9 9"), 0);
    }

    #[tokio::test]
    async fn test_variables_and_transport_error() {
        let h = harness(|_| {});
        h.channel.fail_on("input text");
        let mut test = test_from_yaml(
            r#"
id: vars
variables: { user: "alice smith" }
steps:
  - action: inputText
    text: "{{user}}"
"#,
        );

        let result = h.executor.run_test(&mut test, "d").await.unwrap();
        assert_eq!(h.channel.commands(), vec!["input text \"alice%ssmith\""]);
        assert_eq!(result.status, TestStatus::Error);
    }

    #[tokio::test]
    async fn test_reference_screenshot_validation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("home.png"), png(4, 4, [0, 0, 0, 255])).unwrap();
        let h = harness(|o| o.base_dir = dir.path().to_path_buf());
        h.channel.set_frame(png(4, 4, [255, 255, 255, 255]));

        let mut test = test_from_yaml(
            r#"
id: visual
steps:
  - action: tap
    target: { x: 1, y: 1 }
    referenceScreenshot: missing.png
  - action: tap
    target: { x: 2, y: 2 }
    referenceScreenshot: home.png
"#,
        );

        let result = h.executor.run_test(&mut test, "d").await.unwrap();
        assert_eq!(result.steps[0].status, StepStatus::Passed);
        assert_eq!(result.steps[1].status, StepStatus::Failed);
        assert_eq!(result.steps[1].similarity, Some(0.0));
        assert_eq!(result.status, TestStatus::Failed);
    }

    #[tokio::test]
    async fn test_cleanup_runs_after_prerequisite_failure() {
        let h = harness(|_| {});
        let mut test = test_from_yaml(
            r#"
id: guarded
prerequisites:
  - id: dep
    type: test_dependency
    testId: never-run
  - id: teardown
    type: cleanup
    actions:
      - type: command
        command: "am force-stop com.example"
steps:
  - action: tap
    target: { x: 1, y: 1 }
"#,
        );

        let result = h.executor.run_test(&mut test, "d").await.unwrap();
        assert_eq!(result.status, TestStatus::Error);
        assert_eq!(h.channel.commands(), vec!["am force-stop com.example"]);
        assert_eq!(result.cleanup.len(), 1);
        assert_eq!(test.history.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_request_marks_suite_stopped() {
        let h = harness(|_| {});
        let mut tests: Vec<TestCase> = ["slow", "next"]
            .iter()
            .map(|id| {
                test_from_yaml(&format!(
                    "id: {}\nsteps:\n  - action: wait\n    durationMs: 100\n",
                    id
                ))
            })
            .collect();
        let stop = h.executor.stop_handle();

        let slow_suite = suite(&["slow", "next"]);
        let (result, _) = tokio::join!(
            h.executor.run_suite(&slow_suite, &mut tests, "d"),
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                stop.request_stop();
            }
        );
        let result = result.unwrap();

        assert_eq!(result.test_results.len(), 1);
        assert_eq!(result.test_results[0].status, TestStatus::Passed);
        assert!(result.stopped_by_user);
        assert_eq!(result.status, SuiteStatus::Stopped);
    }

    #[tokio::test]
    async fn test_concurrent_runs_rejected() {
        let h = harness(|_| {});
        let mut first = test_from_yaml("id: a\nsteps:\n  - action: wait\n    durationMs: 50\n");
        let mut second = test_from_yaml("id: b\nsteps: []\n");

        let (a, b) = tokio::join!(
            h.executor.run_test(&mut first, "d"),
            h.executor.run_test(&mut second, "d")
        );
        assert!(a.is_ok());
        assert!(matches!(b, Err(Error::AlreadyRunning)));
        assert!(!h.executor.is_running());
    }

    /// An executor sharing the process-wide run slot
    fn process_executor() -> TestExecutor {
        let verifier =
            PrerequisiteVerifier::new(VerificationCache::new(), None, VerifierOptions::default());
        TestExecutor::new(
            Arc::new(FakeChannel::new()),
            None,
            verifier,
            Arc::new(InMemoryHistory::new(10)),
            ExecutorOptions {
                settle_delay: Duration::ZERO,
                save_screenshots: false,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_second_executor_in_process_rejected() {
        let (first_executor, second_executor) = (process_executor(), process_executor());
        let mut first = test_from_yaml("id: a\nsteps:\n  - action: wait\n    durationMs: 50\n");
        let mut second = test_from_yaml("id: b\nsteps: []\n");

        let (a, b) = tokio::join!(
            first_executor.run_test(&mut first, "d"),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                second_executor.run_test(&mut second, "d").await
            }
        );
        assert!(a.is_ok());
        assert!(matches!(b, Err(Error::AlreadyRunning)));
        assert!(!first_executor.is_running());
        assert!(!second_executor.is_running());
    }

    struct BrokenHistory;

    #[async_trait::async_trait]
    impl HistoryStore for BrokenHistory {
        async fn append(&self, _test_id: &str, _record: ExecutionRecord) -> Result<()> {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "history backend offline",
            )))
        }

        async fn records(&self, _test_id: &str) -> Result<Vec<ExecutionRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_history_failure_is_not_propagated() {
        let channel = Arc::new(FakeChannel::new());
        let verifier =
            PrerequisiteVerifier::new(VerificationCache::new(), None, VerifierOptions::default());
        let mut executor = TestExecutor::new(
            channel.clone(),
            None,
            verifier,
            Arc::new(BrokenHistory),
            ExecutorOptions {
                settle_delay: Duration::ZERO,
                save_screenshots: false,
                ..Default::default()
            },
        );
        executor.isolate_run_slot();
        let mut test = test_from_yaml("id: t\nsteps:\n  - action: tap\n    target: { x: 3, y: 4 }\n");

        let result = executor.run_test(&mut test, "d").await.unwrap();
        assert_eq!(result.status, TestStatus::Passed);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(test.history.len(), 1);
        assert!(executor.verifier().cache().get("t").await.unwrap().success);
    }

    #[tokio::test]
    async fn test_error_outcome_written_to_history() {
        let h = harness(|_| {});
        h.channel.timeout_on("input tap");
        let mut test = test_from_yaml("id: flaky\nsteps:\n  - action: tap\n    target: { x: 1, y: 1 }\n");

        let result = h.executor.run_test(&mut test, "d").await.unwrap();
        assert_eq!(result.status, TestStatus::Error);

        let records = h.history.records("flaky").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TestStatus::Error);
        assert!(records[0].error.is_some());
    }

    #[tokio::test]
    async fn test_step_threshold_override_and_settle_delay() {
        let dir = tempfile::tempdir().unwrap();
        // Top row differs: 4 of 16 pixels mismatch
        let mut reference = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 0, 255]));
        for x in 0..4 {
            reference.put_pixel(x, 0, image::Rgba([255, 255, 255, 255]));
        }
        let mut encoded = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(reference)
            .write_to(&mut encoded, image::ImageOutputFormat::Png)
            .unwrap();
        std::fs::write(dir.path().join("menu.png"), encoded.into_inner()).unwrap();

        let h = harness(|o| {
            o.base_dir = dir.path().to_path_buf();
            o.settle_delay = Duration::from_millis(80);
        });
        h.channel.set_frame(png(4, 4, [0, 0, 0, 255]));

        let mut test = test_from_yaml(
            r#"
id: tolerant
steps:
  - action: tap
    target: { x: 1, y: 1 }
    referenceScreenshot: menu.png
  - action: tap
    target: { x: 2, y: 2 }
    referenceScreenshot: menu.png
    screenshotThreshold: 0.3
"#,
        );
        let start = Instant::now();
        let result = h.executor.run_test(&mut test, "d").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(80));
        assert_eq!(result.steps[0].status, StepStatus::Failed);
        assert_eq!(result.status, TestStatus::Failed);

        let mut test = test_from_yaml(
            r#"
id: tolerant-only
steps:
  - action: tap
    target: { x: 2, y: 2 }
    referenceScreenshot: menu.png
    screenshotThreshold: 0.3
"#,
        );
        let result = h.executor.run_test(&mut test, "d").await.unwrap();
        assert_eq!(result.status, TestStatus::Passed);
        assert_eq!(result.steps[0].similarity, Some(0.75));

        // Non-interactive steps do not wait for the screen to settle
        let mut quiet = test_from_yaml("id: quiet\nsteps:\n  - action: wait\n    durationMs: 0\n");
        let start = Instant::now();
        h.executor.run_test(&mut quiet, "d").await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_local_disk_failure_is_a_step_failure() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let h = harness(|o| {
            o.save_screenshots = true;
            o.output_dir = blocker.path().to_path_buf();
        });
        h.channel.set_frame(png(2, 2, [0, 0, 0, 255]));
        let mut test = test_from_yaml("id: shots\nsteps:\n  - action: screenshot\n");

        let result = h.executor.run_test(&mut test, "d").await.unwrap();
        assert_eq!(result.status, TestStatus::Failed);
        assert!(result.error.unwrap().contains("File error"));
    }
}
