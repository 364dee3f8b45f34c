//! Prerequisite processing before a test and best-effort cleanup after it
//!
//! `test_dependency` prerequisites are checks against the verification cache
//! only. A dependency that was never run (or did not pass) fails the test; it
//! is never executed on the dependent's behalf.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::actions::ActionRunner;
use super::cache::VerificationCache;
use crate::driver::traits::DeviceSetupProvider;
use crate::error::{Error, Result};
use crate::parser::types::{CleanupAction, Prerequisite, PrerequisiteKind, TestCase};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteOutcome {
    pub id: String,
    pub kind: String,
    pub success: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub from_cache: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupOutcome {
    pub description: String,
    pub success: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of processing a test's prerequisites
#[derive(Debug, Default)]
pub struct PrerequisiteReport {
    pub outcomes: Vec<PrerequisiteOutcome>,
    /// The first failure; remaining prerequisites were not processed
    pub failure: Option<Error>,
}

impl PrerequisiteReport {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct VerifierOptions {
    /// When off, no `test_dependency` can be proven
    pub caching: bool,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self { caching: true }
    }
}

pub struct PrerequisiteVerifier {
    cache: VerificationCache,
    setup: Option<Arc<dyn DeviceSetupProvider>>,
    options: VerifierOptions,
}

impl PrerequisiteVerifier {
    pub fn new(
        cache: VerificationCache,
        setup: Option<Arc<dyn DeviceSetupProvider>>,
        options: VerifierOptions,
    ) -> Self {
        Self {
            cache,
            setup,
            options,
        }
    }

    pub fn cache(&self) -> &VerificationCache {
        &self.cache
    }

    /// Enabled non-cleanup prerequisites in processing order
    /// (setup_profile, state_setup, test_dependency; declaration order within a kind)
    pub fn ordered<'a>(prerequisites: &'a [Prerequisite]) -> Vec<&'a Prerequisite> {
        let mut ordered: Vec<(u8, &Prerequisite)> = prerequisites
            .iter()
            .filter(|p| p.enabled)
            .filter_map(|p| p.kind.priority().map(|prio| (prio, p)))
            .collect();
        ordered.sort_by_key(|(prio, _)| *prio);
        ordered.into_iter().map(|(_, p)| p).collect()
    }

    /// Process the prerequisites of `test`, stopping at the first failure
    pub async fn verify_prerequisites(
        &self,
        test: &TestCase,
        runner: &ActionRunner,
    ) -> PrerequisiteReport {
        let mut report = PrerequisiteReport::default();

        for prerequisite in &test.prerequisites {
            if !prerequisite.enabled && prerequisite.kind.priority().is_some() {
                log::debug!("[{}] Skipping disabled prerequisite '{}'", test.id, prerequisite.id);
                report.outcomes.push(PrerequisiteOutcome {
                    id: prerequisite.id.clone(),
                    kind: prerequisite.kind.name().to_string(),
                    success: true,
                    skipped: true,
                    from_cache: false,
                    duration_ms: 0,
                    message: Some("disabled".to_string()),
                });
            }
        }

        for prerequisite in Self::ordered(&test.prerequisites) {
            let start = Instant::now();
            let result = self.process(prerequisite, runner).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(from_cache) => {
                    log::debug!(
                        "[{}] Prerequisite '{}' satisfied{}",
                        test.id,
                        prerequisite.id,
                        if from_cache { " (cached)" } else { "" }
                    );
                    report.outcomes.push(PrerequisiteOutcome {
                        id: prerequisite.id.clone(),
                        kind: prerequisite.kind.name().to_string(),
                        success: true,
                        skipped: false,
                        from_cache,
                        duration_ms,
                        message: None,
                    });
                }
                Err(e) => {
                    log::warn!("[{}] Prerequisite '{}' failed: {}", test.id, prerequisite.id, e);
                    report.outcomes.push(PrerequisiteOutcome {
                        id: prerequisite.id.clone(),
                        kind: prerequisite.kind.name().to_string(),
                        success: false,
                        skipped: false,
                        from_cache: false,
                        duration_ms,
                        message: Some(e.to_string()),
                    });
                    report.failure = Some(e);
                    break;
                }
            }
        }

        report
    }

    /// Returns whether the prerequisite was satisfied from the cache
    async fn process(&self, prerequisite: &Prerequisite, runner: &ActionRunner) -> Result<bool> {
        match &prerequisite.kind {
            PrerequisiteKind::TestDependency { test_id } => {
                self.verify_dependency(test_id).await.map(|_| true)
            }
            PrerequisiteKind::SetupProfile { profile_id } => {
                let setup = self.setup.as_ref().ok_or_else(|| Error::PrerequisiteFailed {
                    id: prerequisite.id.clone(),
                    reason: "no device setup provider configured".to_string(),
                })?;
                let report = with_timeout(
                    prerequisite,
                    setup.apply_profile(runner.device_id(), profile_id),
                )
                .await?;
                if report.success {
                    Ok(false)
                } else {
                    let failed: Vec<String> = report
                        .steps
                        .iter()
                        .filter(|s| !s.success)
                        .map(|s| match &s.message {
                            Some(m) => format!("{} ({})", s.description, m),
                            None => s.description.clone(),
                        })
                        .collect();
                    Err(Error::PrerequisiteFailed {
                        id: prerequisite.id.clone(),
                        reason: format!("profile '{}' failed: {}", profile_id, failed.join(", ")),
                    })
                }
            }
            PrerequisiteKind::StateSetup { actions } => {
                let mut failures = Vec::new();
                for action in actions {
                    if let Err(e) = with_timeout(prerequisite, runner.run_setup(action)).await {
                        log::warn!("State setup action {} failed: {}", action.describe(), e);
                        failures.push(format!("{}: {}", action.describe(), e));
                    }
                }
                if failures.is_empty() {
                    Ok(false)
                } else {
                    Err(Error::PrerequisiteFailed {
                        id: prerequisite.id.clone(),
                        reason: failures.join("; "),
                    })
                }
            }
            PrerequisiteKind::Cleanup { .. } => Ok(false),
        }
    }

    /// Check that `test_id` already ran and passed
    pub async fn verify_dependency(&self, test_id: &str) -> Result<()> {
        if !self.options.caching {
            return Err(Error::DependencyNotExecuted {
                test_id: test_id.to_string(),
            });
        }
        match self.cache.get(test_id).await {
            Some(entry) if entry.success => Ok(()),
            Some(_) => Err(Error::DependencyFailed {
                test_id: test_id.to_string(),
            }),
            None => Err(Error::DependencyNotExecuted {
                test_id: test_id.to_string(),
            }),
        }
    }

    pub async fn mark_executed(&self, test_id: &str, success: bool, duration_ms: u64) {
        self.cache.mark_executed(test_id, success, duration_ms).await;
    }

    /// Run test-level cleanup steps, then `cleanup` prerequisites.
    ///
    /// Failures are logged and reported, never propagated.
    pub async fn run_cleanup(
        &self,
        test: &TestCase,
        runner: &ActionRunner,
        test_passed: bool,
    ) -> Vec<CleanupOutcome> {
        let mut outcomes = Vec::new();

        for action in &test.cleanup_steps {
            outcomes.push(self.cleanup_action(test, action, runner, test_passed, None).await);
        }

        for prerequisite in &test.prerequisites {
            let PrerequisiteKind::Cleanup { actions } = &prerequisite.kind else {
                continue;
            };
            if !prerequisite.enabled {
                log::debug!("[{}] Skipping disabled cleanup '{}'", test.id, prerequisite.id);
                continue;
            }
            for action in actions {
                outcomes.push(
                    self.cleanup_action(test, action, runner, test_passed, Some(prerequisite))
                        .await,
                );
            }
        }

        outcomes
    }

    async fn cleanup_action(
        &self,
        test: &TestCase,
        action: &CleanupAction,
        runner: &ActionRunner,
        test_passed: bool,
        owner: Option<&Prerequisite>,
    ) -> CleanupOutcome {
        let description = action.action.describe();
        if !action.should_run(test_passed) {
            return CleanupOutcome {
                description,
                success: true,
                skipped: true,
                message: Some("test passed".to_string()),
            };
        }

        let result = match owner {
            Some(prerequisite) => with_timeout(prerequisite, runner.run_setup(&action.action)).await,
            None => runner.run_setup(&action.action).await,
        };
        match result {
            Ok(()) => CleanupOutcome {
                description,
                success: true,
                skipped: false,
                message: None,
            },
            Err(e) => {
                log::warn!("[{}] Cleanup {} failed: {}", test.id, description, e);
                CleanupOutcome {
                    description,
                    success: false,
                    skipped: false,
                    message: Some(e.to_string()),
                }
            }
        }
    }
}

async fn with_timeout<T>(
    prerequisite: &Prerequisite,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match prerequisite.timeout_ms {
        Some(ms) => tokio::time::timeout(Duration::from_millis(ms), fut)
            .await
            .map_err(|_| Error::timeout(format!("Prerequisite '{}'", prerequisite.id), ms))?,
        None => fut.await,
    }
}
