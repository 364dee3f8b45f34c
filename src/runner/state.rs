use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::prerequisites::{CleanupOutcome, PrerequisiteOutcome};

/// Terminal outcome of a test
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    /// A step did not meet its contract
    Failed,
    /// Prerequisite or transport failure
    Error,
}

/// Lifecycle of a single test run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "phase", content = "status", rename_all = "camelCase")]
pub enum TestPhase {
    NotStarted,
    PrerequisitesPending,
    StepsRunning,
    CleanupRunning,
    Terminal(TestStatus),
}

impl TestPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestPhase::Terminal(_))
    }

    /// Legal forward transitions. Prerequisite failures skip the steps but still clean up.
    pub fn can_transition_to(&self, next: TestPhase) -> bool {
        use TestPhase::*;
        matches!(
            (self, next),
            (NotStarted, PrerequisitesPending)
                | (PrerequisitesPending, StepsRunning)
                | (PrerequisitesPending, CleanupRunning)
                | (StepsRunning, CleanupRunning)
                | (CleanupRunning, Terminal(_))
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub index: usize,
    pub action: String,
    pub description: Option<String>,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// The step declared `expectedOutcome: fail`
    pub expected_failure: bool,
    /// Similarity against the reference screenshot, when validated
    pub similarity: Option<f64>,
    pub screenshot: Option<String>,
}

/// Tracks a step while it runs, then freezes into a `StepResult`
#[derive(Debug)]
pub struct StepState {
    index: usize,
    action: String,
    description: Option<String>,
    expected_failure: bool,
    started_at: Instant,
    pub similarity: Option<f64>,
    pub screenshot: Option<String>,
}

impl StepState {
    pub fn start(index: usize, action: &str, description: Option<&str>, expected_failure: bool) -> Self {
        Self {
            index,
            action: action.to_string(),
            description: description.map(|d| d.to_string()),
            expected_failure,
            started_at: Instant::now(),
            similarity: None,
            screenshot: None,
        }
    }

    pub fn pass(self) -> StepResult {
        self.finish(StepStatus::Passed, None)
    }

    pub fn fail(self, error: String) -> StepResult {
        self.finish(StepStatus::Failed, Some(error))
    }

    fn finish(self, status: StepStatus, error: Option<String>) -> StepResult {
        StepResult {
            index: self.index,
            action: self.action,
            description: self.description,
            status,
            duration_ms: self.started_at.elapsed().as_millis() as u64,
            error,
            expected_failure: self.expected_failure,
            similarity: self.similarity,
            screenshot: self.screenshot,
        }
    }
}

impl StepResult {
    pub fn skipped(index: usize, action: &str, description: Option<&str>, reason: &str) -> Self {
        Self {
            index,
            action: action.to_string(),
            description: description.map(|d| d.to_string()),
            status: StepStatus::Skipped,
            duration_ms: 0,
            error: Some(reason.to_string()),
            expected_failure: false,
            similarity: None,
            screenshot: None,
        }
    }
}

/// Write-once record of a finished test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub run_id: String,
    pub test_id: String,
    pub test_name: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<StepResult>,
    pub screenshots: Vec<String>,
    pub prerequisites: Vec<PrerequisiteOutcome>,
    pub cleanup: Vec<CleanupOutcome>,
    pub error: Option<String>,
}

impl TestResult {
    pub fn to_record(&self) -> ExecutionRecord {
        ExecutionRecord {
            run_id: self.run_id.clone(),
            status: self.status,
            duration_ms: self.duration_ms,
            executed_at: self.started_at,
            error: self.error.clone(),
        }
    }
}

/// Compact history entry kept on a test case
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub run_id: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub executed_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SuiteStatus {
    Passed,
    Failed,
    Error,
    Stopped,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SuiteCounts {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub error: u32,
    /// Tests not run because of a stop request or `stopOnFirstFailure`
    pub skipped: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteResult {
    pub run_id: String,
    pub suite_id: String,
    pub status: SuiteStatus,
    pub execution_order: Vec<String>,
    pub test_results: Vec<TestResult>,
    pub counts: SuiteCounts,
    pub stopped_by_user: bool,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl SuiteCounts {
    pub fn tally(total: usize, results: &[TestResult]) -> Self {
        let (passed, failed, error) =
            results
                .iter()
                .fold((0, 0, 0), |(p, f, e), result| match result.status {
                    TestStatus::Passed => (p + 1, f, e),
                    TestStatus::Failed => (p, f + 1, e),
                    TestStatus::Error => (p, f, e + 1),
                });

        Self {
            total: total as u32,
            passed,
            failed,
            error,
            skipped: total.saturating_sub(results.len()) as u32,
        }
    }
}

impl SuiteStatus {
    /// `error` dominates `failed`, which dominates `passed`; a user stop overrides all
    pub fn aggregate(results: &[TestResult], stopped_by_user: bool) -> Self {
        if stopped_by_user {
            SuiteStatus::Stopped
        } else if results.iter().any(|r| r.status == TestStatus::Error) {
            SuiteStatus::Error
        } else if results.iter().any(|r| r.status == TestStatus::Failed) {
            SuiteStatus::Failed
        } else {
            SuiteStatus::Passed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: TestStatus) -> TestResult {
        TestResult {
            run_id: "r".to_string(),
            test_id: "t".to_string(),
            test_name: "t".to_string(),
            status,
            duration_ms: 0,
            started_at: Utc::now(),
            steps: vec![],
            screenshots: vec![],
            prerequisites: vec![],
            cleanup: vec![],
            error: None,
        }
    }

    #[test]
    fn test_phase_transitions() {
        assert!(TestPhase::NotStarted.can_transition_to(TestPhase::PrerequisitesPending));
        assert!(TestPhase::PrerequisitesPending.can_transition_to(TestPhase::CleanupRunning));
        assert!(TestPhase::CleanupRunning.can_transition_to(TestPhase::Terminal(TestStatus::Error)));
        assert!(!TestPhase::NotStarted.can_transition_to(TestPhase::StepsRunning));
        assert!(!TestPhase::StepsRunning.can_transition_to(TestPhase::Terminal(TestStatus::Passed)));
    }

    #[test]
    fn test_suite_aggregation() {
        let results = vec![
            result(TestStatus::Passed),
            result(TestStatus::Failed),
            result(TestStatus::Error),
        ];
        assert_eq!(SuiteStatus::aggregate(&results, false), SuiteStatus::Error);
        assert_eq!(SuiteStatus::aggregate(&results[..2], false), SuiteStatus::Failed);
        assert_eq!(SuiteStatus::aggregate(&results[..1], false), SuiteStatus::Passed);
        assert_eq!(SuiteStatus::aggregate(&results, true), SuiteStatus::Stopped);

        let counts = SuiteCounts::tally(5, &results);
        assert_eq!(counts.passed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.error, 1);
        assert_eq!(counts.skipped, 2);
    }
}
