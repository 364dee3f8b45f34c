//! Suite dependency validation
//!
//! Issues are reported independently of whether an execution order exists.
//! Fixes are plain data; applying them is up to the caller.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::DependencyGraph;
use crate::parser::types::{PrerequisiteKind, TestCase, TestSuite};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum IssueKind {
    /// Dependency on a test id that does not exist
    MissingDependency,
    DisabledPrerequisite,
    /// Dependency on a known test that is not part of the suite
    NotInSuite,
    /// A test is declared before one of its prerequisites
    OrderViolation,
    Cycle,
    /// The suite lists a test id that does not exist
    UnknownSuiteMember,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FixAction {
    RemovePrerequisite {
        test_id: String,
        prerequisite_id: String,
    },
    EnablePrerequisite {
        test_id: String,
        prerequisite_id: String,
    },
    AddToSuite {
        suite_id: String,
        test_id: String,
    },
    RemoveFromSuite {
        suite_id: String,
        test_id: String,
    },
    Reorder {
        suite_id: String,
        order: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedFix {
    pub description: String,
    /// Safe to apply without a human decision
    pub auto_applicable: bool,
    pub action: FixAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub test_id: Option<String>,
    pub prerequisite_id: Option<String>,
    pub message: String,
    pub fix: Option<SuggestedFix>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyValidationResult {
    /// No error-severity issue was found
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub execution_order: Option<Vec<String>>,
    pub cycles: Vec<Vec<String>>,
    pub depths: HashMap<String, usize>,
}

impl DependencyValidationResult {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }
}

/// Validate the dependency structure of `suite` against all known tests
pub fn validate(suite: &TestSuite, tests: &[TestCase]) -> DependencyValidationResult {
    let graph = DependencyGraph::build(suite, tests);
    let known: HashMap<&str, &TestCase> = tests.iter().map(|t| (t.id.as_str(), t)).collect();

    let cycles = graph.detect_cycles();
    let execution_order = graph.execution_order().ok();

    let mut issues = Vec::new();
    let mut seen_members = HashSet::new();

    for (position, member) in suite.tests.iter().enumerate() {
        if !seen_members.insert(member.as_str()) {
            continue;
        }
        let Some(test) = known.get(member.as_str()) else {
            issues.push(ValidationIssue {
                kind: IssueKind::UnknownSuiteMember,
                severity: Severity::Error,
                test_id: Some(member.clone()),
                prerequisite_id: None,
                message: format!(
                    "Suite '{}' lists test '{}' which does not exist",
                    suite.id, member
                ),
                fix: Some(SuggestedFix {
                    description: format!("Remove '{}' from suite '{}'", member, suite.id),
                    auto_applicable: true,
                    action: FixAction::RemoveFromSuite {
                        suite_id: suite.id.clone(),
                        test_id: member.clone(),
                    },
                }),
            });
            continue;
        };

        for prereq in &test.prerequisites {
            if !prereq.enabled {
                issues.push(ValidationIssue {
                    kind: IssueKind::DisabledPrerequisite,
                    severity: Severity::Warning,
                    test_id: Some(test.id.clone()),
                    prerequisite_id: Some(prereq.id.clone()),
                    message: format!(
                        "Prerequisite '{}' ({}) on test '{}' is disabled",
                        prereq.id,
                        prereq.kind.name(),
                        test.id
                    ),
                    fix: Some(SuggestedFix {
                        description: format!("Enable prerequisite '{}'", prereq.id),
                        auto_applicable: true,
                        action: FixAction::EnablePrerequisite {
                            test_id: test.id.clone(),
                            prerequisite_id: prereq.id.clone(),
                        },
                    }),
                });
            }

            let PrerequisiteKind::TestDependency { test_id: target } = &prereq.kind else {
                continue;
            };

            if !known.contains_key(target.as_str()) {
                issues.push(ValidationIssue {
                    kind: IssueKind::MissingDependency,
                    severity: Severity::Error,
                    test_id: Some(test.id.clone()),
                    prerequisite_id: Some(prereq.id.clone()),
                    message: format!(
                        "Test '{}' depends on '{}' which does not exist",
                        test.id, target
                    ),
                    fix: Some(SuggestedFix {
                        description: format!("Remove dependency '{}'", prereq.id),
                        auto_applicable: true,
                        action: FixAction::RemovePrerequisite {
                            test_id: test.id.clone(),
                            prerequisite_id: prereq.id.clone(),
                        },
                    }),
                });
                continue;
            }

            if !prereq.enabled {
                continue;
            }

            let Some(target_position) = suite.position(target) else {
                issues.push(ValidationIssue {
                    kind: IssueKind::NotInSuite,
                    severity: Severity::Error,
                    test_id: Some(test.id.clone()),
                    prerequisite_id: Some(prereq.id.clone()),
                    message: format!(
                        "Test '{}' depends on '{}' which is not part of suite '{}'",
                        test.id, target, suite.id
                    ),
                    fix: Some(SuggestedFix {
                        description: format!("Add '{}' to suite '{}'", target, suite.id),
                        auto_applicable: true,
                        action: FixAction::AddToSuite {
                            suite_id: suite.id.clone(),
                            test_id: target.clone(),
                        },
                    }),
                });
                continue;
            };

            if target_position > position {
                issues.push(ValidationIssue {
                    kind: IssueKind::OrderViolation,
                    severity: Severity::Error,
                    test_id: Some(test.id.clone()),
                    prerequisite_id: Some(prereq.id.clone()),
                    message: format!(
                        "Test '{}' is scheduled before its prerequisite '{}'",
                        test.id, target
                    ),
                    fix: execution_order.as_ref().map(|order| SuggestedFix {
                        description: format!("Reorder suite '{}' as {}", suite.id, order.join(", ")),
                        auto_applicable: true,
                        action: FixAction::Reorder {
                            suite_id: suite.id.clone(),
                            order: order.clone(),
                        },
                    }),
                });
            }
        }
    }

    for cycle in &cycles {
        issues.push(cycle_issue(cycle, &known));
    }

    let valid = !issues.iter().any(|i| i.severity == Severity::Error);

    DependencyValidationResult {
        valid,
        issues,
        execution_order,
        cycles,
        depths: graph.depths(),
    }
}

/// The closing edge of a cycle is the dependency of its last node on its first.
fn cycle_issue(cycle: &[String], known: &HashMap<&str, &TestCase>) -> ValidationIssue {
    let first = &cycle[0];
    let last = &cycle[cycle.len() - 1];

    let closing = known.get(last.as_str()).and_then(|test| {
        test.prerequisites.iter().find(|p| {
            p.enabled
                && matches!(&p.kind, PrerequisiteKind::TestDependency { test_id } if test_id == first)
        })
    });

    let mut path = cycle.to_vec();
    path.push(first.clone());

    ValidationIssue {
        kind: IssueKind::Cycle,
        severity: Severity::Error,
        test_id: Some(last.clone()),
        prerequisite_id: closing.map(|p| p.id.clone()),
        message: format!("Dependency cycle: {}", path.join(" -> ")),
        fix: closing.map(|p| SuggestedFix {
            description: format!(
                "Remove dependency '{}' from '{}' to break the cycle",
                p.id, last
            ),
            auto_applicable: false,
            action: FixAction::RemovePrerequisite {
                test_id: last.clone(),
                prerequisite_id: p.id.clone(),
            },
        }),
    }
}
