use super::types::{DeviceProfile, TestCase, TestSuite};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A suite together with its test cases and the device profiles they reference
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteBundle {
    pub suite: TestSuite,

    #[serde(default)]
    pub tests: Vec<TestCase>,

    #[serde(default)]
    pub profiles: Vec<DeviceProfile>,
}

impl SuiteBundle {
    pub fn test(&self, id: &str) -> Option<&TestCase> {
        self.tests.iter().find(|t| t.id == id)
    }
}

/// Load a bundle file. `.json` files are parsed as JSON, anything else as YAML.
pub fn load_bundle(path: &Path) -> Result<SuiteBundle> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::InvalidConfig(format!("Failed to read file {}: {}", path.display(), e))
    })?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("json"));

    let bundle = if is_json {
        serde_json::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?
    } else {
        serde_yaml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?
    };

    normalize(bundle)
}

/// Parse bundle YAML held in memory
pub fn parse_bundle_str(content: &str) -> Result<SuiteBundle> {
    let bundle: SuiteBundle =
        serde_yaml::from_str(content).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    normalize(bundle)
}

/// Fill in parent references and reject structurally broken bundles
fn normalize(mut bundle: SuiteBundle) -> Result<SuiteBundle> {
    if bundle.suite.id.trim().is_empty() {
        return Err(Error::InvalidConfig("Suite id must not be empty".to_string()));
    }

    let mut seen = HashSet::new();
    for test in &mut bundle.tests {
        if test.id.trim().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "Test without id in suite '{}'",
                bundle.suite.id
            )));
        }
        if !seen.insert(test.id.clone()) {
            return Err(Error::InvalidConfig(format!("Duplicate test id '{}'", test.id)));
        }

        if test.suite_id.is_empty() {
            test.suite_id = bundle.suite.id.clone();
        } else if test.suite_id != bundle.suite.id {
            return Err(Error::InvalidConfig(format!(
                "Test '{}' belongs to suite '{}', not '{}'",
                test.id, test.suite_id, bundle.suite.id
            )));
        }
    }

    let mut profiles = HashSet::new();
    for profile in &bundle.profiles {
        if !profiles.insert(profile.id.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "Duplicate device profile '{}'",
                profile.id
            )));
        }
    }

    log::debug!(
        "Loaded suite '{}' with {} tests and {} profiles",
        bundle.suite.id,
        bundle.tests.len(),
        bundle.profiles.len()
    );
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::{PrerequisiteKind, StepKind};
    use std::io::Write;

    const BUNDLE: &str = r#"
suite:
  id: checkout
  tests: [login, cart]
profiles:
  - id: clean-device
    actions:
      - type: command
        command: "settings put global window_animation_scale 0"
tests:
  - id: login
    prerequisites:
      - id: profile
        type: setup_profile
        profileId: clean-device
    steps:
      - action: tap
        target: { x: 100, y: 200 }
      - action: inputText
        text: "{{user}}"
    variables:
      user: alice
  - id: cart
    suiteId: checkout
    prerequisites:
      - id: after-login
        type: test_dependency
        testId: login
    steps:
      - action: wait
        durationMs: 100
"#;

    #[test]
    fn test_parse_bundle() {
        let bundle = parse_bundle_str(BUNDLE).unwrap();
        assert_eq!(bundle.suite.tests, vec!["login", "cart"]);
        assert_eq!(bundle.tests.len(), 2);
        assert_eq!(bundle.profiles[0].actions.len(), 1);

        let login = bundle.test("login").unwrap();
        assert_eq!(login.suite_id, "checkout");
        assert!(matches!(login.steps[1].kind, StepKind::InputText { .. }));

        let cart = bundle.test("cart").unwrap();
        assert!(matches!(
            &cart.prerequisites[0].kind,
            PrerequisiteKind::TestDependency { test_id } if test_id == "login"
        ));
    }

    #[test]
    fn test_unknown_action_is_config_error() {
        let yaml = r#"
suite: { id: s }
tests:
  - id: t
    steps:
      - action: teleport
"#;
        assert!(matches!(parse_bundle_str(yaml), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_structural_errors() {
        let duplicate = "suite: { id: s }\ntests:\n  - id: t\n  - id: t\n";
        let err = parse_bundle_str(duplicate).unwrap_err();
        assert!(err.to_string().contains("Duplicate test id"));

        let foreign = "suite: { id: s }\ntests:\n  - id: t\n    suiteId: other\n";
        assert!(matches!(parse_bundle_str(foreign), Err(Error::InvalidConfig(_))));

        let empty = "suite: { id: s }\ntests:\n  - id: ''\n";
        assert!(matches!(parse_bundle_str(empty), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_load_json_bundle() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"suite": {{"id": "s", "tests": ["t"]}}, "tests": [{{"id": "t", "steps": [{{"action": "screenshot"}}]}}]}}"#
        )
        .unwrap();

        let bundle = load_bundle(file.path()).unwrap();
        assert_eq!(bundle.tests[0].suite_id, "s");
        assert_eq!(bundle.tests[0].steps[0].kind, StepKind::Screenshot { name: None });
    }

    #[test]
    fn test_missing_file() {
        assert!(load_bundle(Path::new("/nonexistent/bundle.yaml")).is_err());
    }
}
