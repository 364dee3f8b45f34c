use crate::runner::state::{StepStatus, SuiteResult, TestResult, TestStatus};
use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::{Path, PathBuf};

pub const FILE_NAME: &str = "junit.xml";

fn seconds(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

/// Generate JUnit XML report string from a suite result
pub fn generate_junit_xml(result: &SuiteResult) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let counts = &result.counts;
    let tests = counts.total.to_string();
    let failures = counts.failed.to_string();
    let errors = counts.error.to_string();
    let skipped = counts.skipped.to_string();
    let time = seconds(result.duration_ms);

    // <testsuites>
    let mut suites_start = BytesStart::new("testsuites");
    suites_start.push_attribute(("name", result.suite_id.as_str()));
    suites_start.push_attribute(("tests", tests.as_str()));
    suites_start.push_attribute(("failures", failures.as_str()));
    suites_start.push_attribute(("errors", errors.as_str()));
    suites_start.push_attribute(("skipped", skipped.as_str()));
    suites_start.push_attribute(("time", time.as_str()));
    writer.write_event(Event::Start(suites_start))?;

    let timestamp = result.started_at.to_rfc3339();
    let mut suite_start = BytesStart::new("testsuite");
    suite_start.push_attribute(("name", result.suite_id.as_str()));
    suite_start.push_attribute(("id", result.run_id.as_str()));
    suite_start.push_attribute(("tests", tests.as_str()));
    suite_start.push_attribute(("failures", failures.as_str()));
    suite_start.push_attribute(("errors", errors.as_str()));
    suite_start.push_attribute(("skipped", skipped.as_str()));
    suite_start.push_attribute(("time", time.as_str()));
    suite_start.push_attribute(("timestamp", timestamp.as_str()));
    writer.write_event(Event::Start(suite_start))?;

    for test in &result.test_results {
        write_test_case(&mut writer, &result.suite_id, test)?;
    }

    // Tests never reached because of a stop or stopOnFirstFailure
    let ran: Vec<&str> = result.test_results.iter().map(|t| t.test_id.as_str()).collect();
    for id in result.execution_order.iter().filter(|id| !ran.contains(&id.as_str())) {
        let mut case_start = BytesStart::new("testcase");
        case_start.push_attribute(("name", id.as_str()));
        case_start.push_attribute(("classname", result.suite_id.as_str()));
        case_start.push_attribute(("time", "0.000"));
        writer.write_event(Event::Start(case_start))?;
        writer.write_event(Event::Empty(BytesStart::new("skipped")))?;
        writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    let xml = String::from_utf8(writer.into_inner().into_inner())?;
    Ok(xml)
}

fn write_test_case<W: std::io::Write>(
    writer: &mut Writer<W>,
    suite_id: &str,
    test: &TestResult,
) -> Result<()> {
    let mut case_start = BytesStart::new("testcase");
    let time = seconds(test.duration_ms);
    case_start.push_attribute(("name", test.test_name.as_str()));
    case_start.push_attribute(("classname", format!("{}.{}", suite_id, test.test_id).as_str()));
    case_start.push_attribute(("time", time.as_str()));
    writer.write_event(Event::Start(case_start))?;

    let element = match test.status {
        TestStatus::Passed => None,
        TestStatus::Failed => Some(("failure", "StepFailure")),
        TestStatus::Error => Some(("error", "ExecutionError")),
    };

    if let Some((tag, kind)) = element {
        let message = test.error.as_deref().unwrap_or("Unknown error");
        let mut start = BytesStart::new(tag);
        start.push_attribute(("message", message));
        start.push_attribute(("type", kind));
        writer.write_event(Event::Start(start))?;

        let details: Vec<String> = test
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .map(|s| {
                format!(
                    "step {} ({}): {}",
                    s.index + 1,
                    s.action,
                    s.error.as_deref().unwrap_or("failed")
                )
            })
            .collect();
        let body = if details.is_empty() {
            message.to_string()
        } else {
            details.join("\n")
        };
        writer.write_event(Event::Text(BytesText::new(&body)))?;
        writer.write_event(Event::End(BytesEnd::new(tag)))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

/// Write report to file
pub fn write_report(result: &SuiteResult, output_dir: &Path) -> Result<PathBuf> {
    let xml = generate_junit_xml(result)?;
    let path = output_dir.join(FILE_NAME);
    std::fs::write(&path, xml).with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("JUnit report saved to: {}", path.display());
    Ok(path)
}
