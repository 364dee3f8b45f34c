pub mod json;
pub mod junit;

use anyhow::{Context, Result};
use std::path::Path;

use crate::runner::state::SuiteResult;

/// Write every report format for a finished suite into `output_dir`
pub fn generate_report(result: &SuiteResult, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    json::write_report(result, output_dir)?;
    junit::write_report(result, output_dir)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::runner::state::{SuiteCounts, SuiteStatus, TestResult, TestStatus};
    use chrono::Utc;

    pub(crate) fn test_result(id: &str, status: TestStatus, error: Option<&str>) -> TestResult {
        TestResult {
            run_id: "run-1".to_string(),
            test_id: id.to_string(),
            test_name: format!("{} flow", id),
            status,
            duration_ms: 1500,
            started_at: Utc::now(),
            steps: vec![],
            screenshots: vec![],
            prerequisites: vec![],
            cleanup: vec![],
            error: error.map(|e| e.to_string()),
        }
    }

    pub(crate) fn suite_result() -> SuiteResult {
        let test_results = vec![
            test_result("login", TestStatus::Passed, None),
            test_result("cart", TestStatus::Failed, Some("Element not found: cart/total")),
            test_result("pay", TestStatus::Error, Some("Timeout after 30000ms: adb shell")),
        ];
        SuiteResult {
            run_id: "run-1".to_string(),
            suite_id: "checkout".to_string(),
            status: SuiteStatus::aggregate(&test_results, false),
            execution_order: vec!["login".into(), "cart".into(), "pay".into(), "refund".into()],
            counts: SuiteCounts::tally(4, &test_results),
            test_results,
            stopped_by_user: false,
            duration_ms: 4500,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_generate_report_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("reports");
        generate_report(&suite_result(), &output).unwrap();

        let json = std::fs::read_to_string(output.join(json::FILE_NAME)).unwrap();
        let parsed: SuiteResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.status, SuiteStatus::Error);
        assert_eq!(parsed.counts.skipped, 1);
        assert!(output.join(junit::FILE_NAME).exists());
    }
}
