use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::runner::state::ExecutionRecord;

/// An ordered set of test cases executed together
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuite {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Test case ids, in declared execution order
    #[serde(default)]
    pub tests: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl TestSuite {
    pub fn contains(&self, test_id: &str) -> bool {
        self.tests.iter().any(|id| id == test_id)
    }

    /// Position of a test in the declared order
    pub fn position(&self, test_id: &str) -> Option<usize> {
        self.tests.iter().position(|id| id == test_id)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// A single test case owned by one suite
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,

    /// Owning suite (mandatory parent reference)
    #[serde(default)]
    pub suite_id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub steps: Vec<Step>,

    /// Test-level cleanup, run after the steps regardless of outcome
    #[serde(default)]
    pub cleanup_steps: Vec<CleanupAction>,

    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,

    /// Values substituted into `{{name}}` tokens
    #[serde(default)]
    pub variables: HashMap<String, String>,

    #[serde(default)]
    pub history: Vec<ExecutionRecord>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl TestCase {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Append a record, keeping only the last `limit` entries
    pub fn record_execution(&mut self, record: ExecutionRecord, limit: usize) {
        self.history.push(record);
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }

    /// Ids of enabled test dependencies
    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.prerequisites.iter().filter_map(|p| match &p.kind {
            PrerequisiteKind::TestDependency { test_id } if p.enabled => Some(test_id.as_str()),
            _ => None,
        })
    }
}

/// One scripted step of a test case
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(flatten)]
    pub kind: StepKind,

    #[serde(default)]
    pub expected_outcome: ExpectedOutcome,

    #[serde(default)]
    pub continue_on_failure: bool,

    /// Reference image validated after interactive steps
    #[serde(default)]
    pub reference_screenshot: Option<String>,

    /// Allowed mismatch ratio for `reference_screenshot`
    #[serde(default)]
    pub screenshot_threshold: Option<f64>,
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            id: None,
            description: None,
            kind,
            expected_outcome: ExpectedOutcome::Pass,
            continue_on_failure: false,
            reference_screenshot: None,
            screenshot_threshold: None,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.description {
            Some(desc) => format!("{} ({})", self.kind.name(), desc),
            None => self.kind.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedOutcome {
    #[default]
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Where a tap or input lands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Target {
    Point { x: i32, y: i32 },
    /// Element path resolved through the companion protocol
    Element { element: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "action",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum StepKind {
    Tap {
        target: Target,
    },
    Swipe {
        from: Point,
        to: Point,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    InputText {
        text: String,
        #[serde(default)]
        target: Option<Target>,
    },
    Wait {
        duration_ms: u64,
    },
    Assert {
        assertion: Assertion,
    },
    Screenshot {
        #[serde(default)]
        name: Option<String>,
    },
    PressButton {
        button: HardwareButton,
    },
    SetOrientation {
        orientation: Orientation,
    },
    App {
        app_id: String,
        operation: AppOperation,
    },
    Connectivity {
        network: Network,
        enabled: bool,
    },
    Interrupt {
        interruption: Interruption,
    },
    CustomAction {
        name: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Tap { .. } => "tap",
            StepKind::Swipe { .. } => "swipe",
            StepKind::InputText { .. } => "inputText",
            StepKind::Wait { .. } => "wait",
            StepKind::Assert { .. } => "assert",
            StepKind::Screenshot { .. } => "screenshot",
            StepKind::PressButton { .. } => "pressButton",
            StepKind::SetOrientation { .. } => "setOrientation",
            StepKind::App { .. } => "app",
            StepKind::Connectivity { .. } => "connectivity",
            StepKind::Interrupt { .. } => "interrupt",
            StepKind::CustomAction { .. } => "customAction",
        }
    }

    /// Interactive steps settle and may be validated against a reference screenshot
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            StepKind::Tap { .. }
                | StepKind::Swipe { .. }
                | StepKind::InputText { .. }
                | StepKind::Screenshot { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Assertion {
    ElementExists {
        element: String,
    },
    ElementNotExists {
        element: String,
    },
    ElementText {
        element: String,
        expected: String,
        #[serde(default)]
        contains: bool,
    },
    ScreenMatches {
        reference: String,
        #[serde(default)]
        threshold: Option<f64>,
    },
    CommandOutput {
        command: String,
        contains: String,
    },
    AppInForeground {
        app_id: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HardwareButton {
    Back,
    Home,
    AppSwitch,
    VolumeUp,
    VolumeDown,
    Power,
    Enter,
}

/// Device orientation modes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    Portrait,
    Landscape,
    ReversePortrait,
    ReverseLandscape,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AppOperation {
    Launch,
    Stop,
    Restart,
    ClearData,
    Background,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Network {
    Wifi,
    MobileData,
    Airplane,
    Bluetooth,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "kind",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Interruption {
    IncomingCall {
        number: String,
    },
    Sms {
        number: String,
        message: String,
    },
    Notification {
        title: String,
        text: String,
    },
    LowBattery {
        #[serde(default = "default_low_battery_level")]
        level: u8,
    },
    BatteryReset,
}

fn default_low_battery_level() -> u8 {
    5
}

/// Request understood by the companion element protocol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "request",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum CompanionRequest {
    Ping,
    GetElements,
    TapByPath {
        path: String,
    },
    GetElementProperty {
        path: String,
        property: String,
    },
    CustomAction {
        name: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

impl CompanionRequest {
    pub fn name(&self) -> &'static str {
        match self {
            CompanionRequest::Ping => "ping",
            CompanionRequest::GetElements => "getElements",
            CompanionRequest::TapByPath { .. } => "tapByPath",
            CompanionRequest::GetElementProperty { .. } => "getElementProperty",
            CompanionRequest::CustomAction { .. } => "customAction",
        }
    }
}

/// An action run by state-setup prerequisites, cleanup and device profiles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum SetupAction {
    /// A device-level step (app lifecycle, connectivity, button, ...)
    Device { step: StepKind },
    Companion { request: CompanionRequest },
    /// Raw shell command
    Command { command: String },
}

impl SetupAction {
    pub fn describe(&self) -> String {
        match self {
            SetupAction::Device { step } => format!("device:{}", step.name()),
            SetupAction::Companion { request } => format!("companion:{}", request.name()),
            SetupAction::Command { command } => format!("command:{}", command),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupAction {
    #[serde(flatten)]
    pub action: SetupAction,

    /// Run even when the test passed
    #[serde(default)]
    pub always_run: bool,
}

impl CleanupAction {
    /// Cleanup runs unless the test passed and the action is not `always_run`
    pub fn should_run(&self, test_passed: bool) -> bool {
        !test_passed || self.always_run
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prerequisite {
    pub id: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(flatten)]
    pub kind: PrerequisiteKind,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum PrerequisiteKind {
    SetupProfile { profile_id: String },
    TestDependency { test_id: String },
    StateSetup { actions: Vec<SetupAction> },
    Cleanup { actions: Vec<CleanupAction> },
}

impl PrerequisiteKind {
    pub fn name(&self) -> &'static str {
        match self {
            PrerequisiteKind::SetupProfile { .. } => "setup_profile",
            PrerequisiteKind::TestDependency { .. } => "test_dependency",
            PrerequisiteKind::StateSetup { .. } => "state_setup",
            PrerequisiteKind::Cleanup { .. } => "cleanup",
        }
    }

    /// Processing priority before the steps run; cleanup is never processed there
    pub fn priority(&self) -> Option<u8> {
        match self {
            PrerequisiteKind::SetupProfile { .. } => Some(1),
            PrerequisiteKind::StateSetup { .. } => Some(2),
            PrerequisiteKind::TestDependency { .. } => Some(3),
            PrerequisiteKind::Cleanup { .. } => None,
        }
    }
}

/// Named device configuration applied by `setup_profile` prerequisites
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub actions: Vec<SetupAction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_parsing() {
        let yaml = r#"
action: tap
target: { x: 10, y: 20 }
expectedOutcome: fail
continueOnFailure: true
"#;
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            step.kind,
            StepKind::Tap {
                target: Target::Point { x: 10, y: 20 }
            }
        );
        assert_eq!(step.expected_outcome, ExpectedOutcome::Fail);
        assert!(step.continue_on_failure);
    }

    #[test]
    fn test_element_target_and_assertion() {
        let yaml = r#"
- action: tap
  target: { element: "login/button" }
- action: assert
  assertion: { type: elementText, element: "header", expected: "Welcome" }
- action: app
  appId: com.example
  operation: clearData
"#;
        let steps: Vec<Step> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            steps[0].kind,
            StepKind::Tap {
                target: Target::Element {
                    element: "login/button".to_string()
                }
            }
        );
        assert!(matches!(
            steps[1].kind,
            StepKind::Assert {
                assertion: Assertion::ElementText { contains: false, .. }
            }
        ));
        assert_eq!(steps[2].kind.name(), "app");
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let yaml = "action: teleport\n";
        assert!(serde_yaml::from_str::<Step>(yaml).is_err());
    }

    #[test]
    fn test_prerequisite_parsing() {
        let yaml = r#"
- id: p1
  type: test_dependency
  testId: login
- id: p2
  type: state_setup
  enabled: false
  timeoutMs: 3000
  actions:
    - type: command
      command: "settings put global window_animation_scale 0"
    - type: device
      step: { action: connectivity, network: wifi, enabled: true }
- id: p3
  type: cleanup
  actions:
    - type: command
      command: "pm clear com.example"
      alwaysRun: true
"#;
        let prereqs: Vec<Prerequisite> = serde_yaml::from_str(yaml).unwrap();
        assert!(prereqs[0].enabled);
        assert_eq!(prereqs[0].kind.priority(), Some(3));
        assert!(!prereqs[1].enabled);
        assert_eq!(prereqs[1].timeout_ms, Some(3000));
        match &prereqs[2].kind {
            PrerequisiteKind::Cleanup { actions } => {
                assert!(actions[0].always_run);
                assert!(actions[0].should_run(true));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_cleanup_run_policy() {
        let action = CleanupAction {
            action: SetupAction::Command {
                command: "true".to_string(),
            },
            always_run: false,
        };
        assert!(!action.should_run(true));
        assert!(action.should_run(false));
    }

    #[test]
    fn test_history_is_bounded() {
        use crate::runner::state::TestStatus;

        let mut test: TestCase = serde_yaml::from_str("id: t1\nsuiteId: s1\n").unwrap();
        for i in 0..5 {
            test.record_execution(
                ExecutionRecord {
                    run_id: format!("run-{}", i),
                    status: TestStatus::Passed,
                    duration_ms: 1,
                    executed_at: chrono::Utc::now(),
                    error: None,
                },
                3,
            );
        }
        assert_eq!(test.history.len(), 3);
        assert_eq!(test.history[0].run_id, "run-2");
    }
}
