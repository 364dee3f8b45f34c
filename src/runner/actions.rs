//! Dispatch of step, setup and assertion kinds onto the device channels

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::driver::android::commands;
use crate::driver::image_compare::{self, CompareOptions, Similarity};
use crate::driver::traits::{CommandChannel, CompanionClient};
use crate::error::{Error, Result};
use crate::parser::types::{Assertion, SetupAction, StepKind, Target};

/// What a step produced besides success
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub screenshot: Option<String>,
    pub similarity: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ActionSettings {
    /// Threshold for `screenMatches` assertions without their own
    pub assert_threshold: f64,
    pub compare: CompareOptions,
    /// Relative reference paths are resolved against this directory
    pub base_dir: PathBuf,
    /// Where `screenshot` steps are written; `None` keeps them in memory only
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            assert_threshold: image_compare::DEFAULT_THRESHOLD,
            compare: CompareOptions::default(),
            base_dir: PathBuf::from("."),
            screenshot_dir: None,
        }
    }
}

/// Runs actions against one device
pub struct ActionRunner {
    channel: Arc<dyn CommandChannel>,
    companion: Option<Arc<dyn CompanionClient>>,
    device_id: String,
    settings: ActionSettings,
}

impl ActionRunner {
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        companion: Option<Arc<dyn CompanionClient>>,
        device_id: &str,
        settings: ActionSettings,
    ) -> Self {
        Self {
            channel,
            companion,
            device_id: device_id.to_string(),
            settings,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn settings(&self) -> &ActionSettings {
        &self.settings
    }

    fn companion(&self) -> Result<&dyn CompanionClient> {
        self.companion.as_deref().ok_or(Error::CompanionUnavailable)
    }

    async fn shell(&self, command: &str) -> Result<String> {
        self.channel.run(&self.device_id, command).await
    }

    async fn shell_all(&self, commands: &[String]) -> Result<()> {
        for command in commands {
            self.shell(command).await?;
        }
        Ok(())
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.settings.base_dir.join(path)
        }
    }

    /// Execute one step kind
    pub async fn run_step(&self, kind: &StepKind) -> Result<StepOutput> {
        match kind {
            StepKind::Tap { target } => {
                self.tap(target).await?;
            }
            StepKind::Swipe {
                from,
                to,
                duration_ms,
            } => {
                let command = commands::swipe(from.x, from.y, to.x, to.y, duration_ms.unwrap_or(300));
                self.shell(&command).await?;
            }
            StepKind::InputText { text, target } => {
                if let Some(target) = target {
                    self.tap(target).await?;
                }
                self.shell(&commands::input_text(text)).await?;
            }
            StepKind::Wait { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
            }
            StepKind::Assert { assertion } => {
                let similarity = self.check(assertion).await?;
                return Ok(StepOutput {
                    similarity,
                    ..Default::default()
                });
            }
            StepKind::Screenshot { name } => {
                let path = self.take_screenshot(name.as_deref()).await?;
                return Ok(StepOutput {
                    screenshot: path,
                    ..Default::default()
                });
            }
            StepKind::PressButton { button } => {
                self.shell(&commands::press_button(*button)).await?;
            }
            StepKind::SetOrientation { orientation } => {
                self.shell_all(&commands::set_orientation(*orientation)).await?;
            }
            StepKind::App { app_id, operation } => {
                self.shell_all(&commands::app(*operation, app_id)).await?;
            }
            StepKind::Connectivity { network, enabled } => {
                self.shell_all(&commands::connectivity(*network, *enabled))
                    .await?;
            }
            StepKind::Interrupt { interruption } => {
                self.shell_all(&commands::interruption(interruption)).await?;
            }
            StepKind::CustomAction { name, params } => {
                self.companion()?.custom_action(name, params.clone()).await?;
            }
        }
        Ok(StepOutput::default())
    }

    /// Execute a state-setup, cleanup or profile action
    pub async fn run_setup(&self, action: &SetupAction) -> Result<()> {
        match action {
            SetupAction::Device { step } => self.run_step(step).await.map(|_| ()),
            SetupAction::Companion { request } => {
                self.companion()?.request(request.clone()).await.map(|_| ())
            }
            SetupAction::Command { command } => self.shell(command).await.map(|_| ()),
        }
    }

    async fn tap(&self, target: &Target) -> Result<()> {
        match target {
            Target::Point { x, y } => self.shell(&commands::tap(*x, *y)).await.map(|_| ()),
            Target::Element { element } => self.companion()?.tap_by_path(element).await,
        }
    }

    /// Evaluate an assertion, returning the similarity for screen comparisons
    pub async fn check(&self, assertion: &Assertion) -> Result<Option<f64>> {
        match assertion {
            Assertion::ElementExists { element } => {
                let elements = self.companion()?.get_elements().await?;
                if !elements.iter().any(|e| &e.path == element) {
                    return Err(Error::AssertionFailed(format!(
                        "Element '{}' not found",
                        element
                    )));
                }
            }
            Assertion::ElementNotExists { element } => {
                let elements = self.companion()?.get_elements().await?;
                if elements.iter().any(|e| &e.path == element) {
                    return Err(Error::AssertionFailed(format!(
                        "Element '{}' is present",
                        element
                    )));
                }
            }
            Assertion::ElementText {
                element,
                expected,
                contains,
            } => {
                let actual = self
                    .companion()?
                    .get_element_property(element, "text")
                    .await?
                    .unwrap_or_default();
                let matched = if *contains {
                    actual.contains(expected.as_str())
                } else {
                    &actual == expected
                };
                if !matched {
                    return Err(Error::AssertionFailed(format!(
                        "Element '{}' text is '{}', expected {}'{}'",
                        element,
                        actual,
                        if *contains { "to contain " } else { "" },
                        expected
                    )));
                }
            }
            Assertion::ScreenMatches {
                reference,
                threshold,
            } => {
                let threshold = threshold.unwrap_or(self.settings.assert_threshold);
                let similarity = self
                    .compare_with_reference(reference)
                    .await?
                    .ok_or_else(|| {
                        Error::AssertionFailed(format!(
                            "Reference screenshot '{}' not found",
                            reference
                        ))
                    })?;
                ensure_similar(&similarity, threshold)?;
                return Ok(Some(similarity.ratio));
            }
            Assertion::CommandOutput { command, contains } => {
                let output = self.shell(command).await?;
                if !output.contains(contains.as_str()) {
                    return Err(Error::AssertionFailed(format!(
                        "Output of '{}' does not contain '{}'",
                        command, contains
                    )));
                }
            }
            Assertion::AppInForeground { app_id } => {
                let output = self.shell(commands::foreground_query()).await?;
                if !output.contains(app_id.as_str()) {
                    return Err(Error::AssertionFailed(format!(
                        "App '{}' is not in the foreground",
                        app_id
                    )));
                }
            }
        }
        Ok(None)
    }

    /// Compare the current frame with a reference file.
    ///
    /// Returns `None` when the reference does not exist.
    pub async fn compare_with_reference(&self, reference: &str) -> Result<Option<Similarity>> {
        let path = self.resolve(reference);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let expected = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::artifact(&path, e))?;
        let actual = self.channel.capture_frame(&self.device_id).await?;
        let similarity = image_compare::compare_bytes(&expected, &actual, &self.settings.compare)?;
        log::debug!(
            "Screen vs '{}': similarity {:.3} ({} of {} pixels differ)",
            reference,
            similarity.ratio,
            similarity.mismatched,
            similarity.total
        );
        Ok(Some(similarity))
    }

    async fn take_screenshot(&self, name: Option<&str>) -> Result<Option<String>> {
        let bytes = self.channel.capture_frame(&self.device_id).await?;
        let Some(dir) = &self.settings.screenshot_dir else {
            return Ok(None);
        };

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::artifact(dir, e))?;
        let file_name = match name {
            Some(name) if name.ends_with(".png") => name.to_string(),
            Some(name) => format!("{}.png", name),
            None => format!(
                "screenshot_{}.png",
                chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f")
            ),
        };
        let path = dir.join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::artifact(&path, e))?;
        Ok(Some(path.to_string_lossy().to_string()))
    }
}

/// Fail with a mismatch error unless `similarity` meets `threshold`
pub fn ensure_similar(similarity: &Similarity, threshold: f64) -> Result<()> {
    if similarity.passes(threshold) {
        Ok(())
    } else {
        Err(Error::ScreenshotMismatch {
            similarity: similarity.ratio,
            required: image_compare::required_similarity(threshold),
        })
    }
}
