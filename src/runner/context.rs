use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::parser::types::{Step, TestCase};

fn token_regex() -> Result<&'static Regex> {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    if let Some(re) = TOKEN.get() {
        return Ok(re);
    }
    let re = Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}")
        .map_err(|e| Error::InvalidConfig(format!("variable pattern: {}", e)))?;
    Ok(TOKEN.get_or_init(|| re))
}

/// Runtime information for one test run
pub struct TestContext {
    /// Base directory for test files (for resolving relative paths)
    pub base_dir: PathBuf,

    /// Output directory for this test's screenshots
    pub output_dir: PathBuf,

    pub device_id: String,

    /// Values for `{{name}}` tokens
    pub vars: HashMap<String, String>,
}

impl TestContext {
    pub fn new(base_dir: &Path, output_dir: &Path, device_id: &str, test: &TestCase) -> Self {
        let mut output = output_dir.to_path_buf();
        output.push(device_id.replace(':', "_")); // Ensure valid directory name
        output.push(&test.id);

        Self {
            base_dir: base_dir.to_path_buf(),
            output_dir: output,
            device_id: device_id.to_string(),
            vars: test.variables.clone(),
        }
    }

    /// Resolve a relative path against the base directory
    pub fn resolve_path(&self, relative: &str) -> PathBuf {
        let path = Path::new(relative);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn get_var(&self, name: &str) -> Option<String> {
        if let Some(value) = self.vars.get(name) {
            return Some(value.clone());
        }
        match name {
            "date" => Some(chrono::Local::now().format("%Y-%m-%d").to_string()),
            "time" => Some(chrono::Local::now().format("%H:%M:%S").to_string()),
            "timestamp" => Some(chrono::Utc::now().timestamp().to_string()),
            "deviceId" => Some(self.device_id.clone()),
            _ => None,
        }
    }

    /// Replace `{{name}}` tokens in `text`; unknown names are kept as written
    pub fn substitute_with(&self, text: &str, escape: fn(&str) -> String) -> Result<String> {
        let re = token_regex()?;
        Ok(re
            .replace_all(text, |caps: &regex::Captures| match self.get_var(&caps[1]) {
                Some(value) => escape(&value),
                None => caps[0].to_string(),
            })
            .to_string())
    }

    pub fn substitute_vars(&self, text: &str) -> Result<String> {
        self.substitute_with(text, |v| v.to_string())
    }

    /// Substitute variables across the serialized form of a step
    pub fn substitute_step(&self, step: &Step) -> Result<Step> {
        let json = serde_json::to_string(step)?;
        if !token_regex()?.is_match(&json) {
            return Ok(step.clone());
        }
        let substituted = self.substitute_with(&json, json_escape)?;
        serde_json::from_str(&substituted).map_err(|e| {
            Error::InvalidConfig(format!(
                "step '{}' is invalid after variable substitution: {}",
                step.display_name(),
                e
            ))
        })
    }
}

/// Escape a value for embedding inside a JSON string literal
fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::{StepKind, Target};

    fn context(vars: &[(&str, &str)]) -> TestContext {
        let mut test = TestCase {
            id: "login".to_string(),
            ..Default::default()
        };
        for (k, v) in vars {
            test.variables.insert(k.to_string(), v.to_string());
        }
        TestContext::new(Path::new("/tests"), Path::new("/out"), "emulator-5554", &test)
    }

    #[test]
    fn test_substitute_vars() {
        let ctx = context(&[("user", "alice")]);
        assert_eq!(ctx.substitute_vars("hi {{user}}").unwrap(), "hi alice");
        assert_eq!(ctx.substitute_vars("hi {{ user }}").unwrap(), "hi alice");
        assert_eq!(ctx.substitute_vars("{{unknown}}").unwrap(), "{{unknown}}");
        assert_eq!(ctx.substitute_vars("{{deviceId}}").unwrap(), "emulator-5554");
    }

    #[test]
    fn test_substitute_step_escapes_values() {
        let ctx = context(&[("password", "p\"w\\d"), ("field", "root/password")]);
        let step = Step::new(StepKind::InputText {
            text: "{{password}}".to_string(),
            target: Some(Target::Element {
                element: "{{field}}".to_string(),
            }),
        });

        let substituted = ctx.substitute_step(&step).unwrap();
        assert_eq!(
            substituted.kind,
            StepKind::InputText {
                text: "p\"w\\d".to_string(),
                target: Some(Target::Element {
                    element: "root/password".to_string(),
                }),
            }
        );
    }

    #[test]
    fn test_output_dir_per_device_and_test() {
        let ctx = context(&[]);
        assert_eq!(ctx.output_dir, PathBuf::from("/out/emulator-5554/login"));
        assert_eq!(ctx.resolve_path("refs/a.png"), PathBuf::from("/tests/refs/a.png"));
    }
}
