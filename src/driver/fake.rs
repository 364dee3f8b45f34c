//! In-memory device doubles used by unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::traits::{CommandChannel, CompanionClient, ElementInfo};
use crate::error::{Error, Result};
use crate::parser::types::CompanionRequest;

#[derive(Debug, Clone, Copy)]
enum Failure {
    Device,
    Timeout,
}

/// Records every command and answers from scripted outputs
#[derive(Default)]
pub struct FakeChannel {
    commands: Mutex<Vec<String>>,
    outputs: Mutex<Vec<(String, String)>>,
    failures: Mutex<Vec<(String, Failure)>>,
    frame: Mutex<Option<Vec<u8>>>,
    event_lines: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `output`
    pub fn respond(&self, pattern: &str, output: &str) {
        self.outputs
            .lock()
            .unwrap()
            .push((pattern.to_string(), output.to_string()));
    }

    /// Fail commands containing `pattern` with a device error
    pub fn fail_on(&self, pattern: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((pattern.to_string(), Failure::Device));
    }

    pub fn timeout_on(&self, pattern: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((pattern.to_string(), Failure::Timeout));
    }

    pub fn set_frame(&self, bytes: Vec<u8>) {
        *self.frame.lock().unwrap() = Some(bytes);
    }

    pub fn set_event_lines(&self, lines: &[&str]) {
        *self.event_lines.lock().unwrap() = lines.iter().map(|l| l.to_string()).collect();
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }
}

#[async_trait]
impl CommandChannel for FakeChannel {
    async fn run(&self, device_id: &str, command: &str) -> Result<String> {
        self.commands.lock().unwrap().push(command.to_string());

        let failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, failure)| *failure);
        match failure {
            Some(Failure::Device) => {
                return Err(Error::Device(format!("{}: '{}' failed", device_id, command)))
            }
            Some(Failure::Timeout) => return Err(Error::timeout(command, 10)),
            None => {}
        }

        Ok(self
            .outputs
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    async fn capture_frame(&self, _device_id: &str) -> Result<Vec<u8>> {
        self.commands.lock().unwrap().push("screencap -p".to_string());
        self.frame
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Device("no frame".to_string()))
    }

    async fn open_event_stream(
        &self,
        _device_id: &str,
        _input_device: &str,
    ) -> Result<mpsc::Receiver<String>> {
        let lines = self.event_lines.lock().unwrap().clone();
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            let _ = tx.try_send(line);
        }
        Ok(rx)
    }
}

/// Companion double serving a fixed element tree
#[derive(Default)]
pub struct FakeCompanion {
    pub elements: Vec<ElementInfo>,
    pub properties: HashMap<(String, String), String>,
    pub taps: Mutex<Vec<String>>,
}

impl FakeCompanion {
    pub fn with_elements(paths: &[&str]) -> Self {
        Self {
            elements: paths
                .iter()
                .map(|p| ElementInfo {
                    path: p.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn property(mut self, path: &str, property: &str, value: &str) -> Self {
        self.properties
            .insert((path.to_string(), property.to_string()), value.to_string());
        self
    }
}

#[async_trait]
impl CompanionClient for FakeCompanion {
    async fn request(&self, request: CompanionRequest) -> Result<serde_json::Value> {
        match request {
            CompanionRequest::Ping => Ok(serde_json::json!("pong")),
            CompanionRequest::GetElements => Ok(serde_json::to_value(&self.elements)?),
            CompanionRequest::TapByPath { path } => {
                if !self.elements.iter().any(|e| e.path == path) {
                    return Err(Error::Companion(format!("No element at {}", path)));
                }
                self.taps.lock().unwrap().push(path);
                Ok(serde_json::Value::Null)
            }
            CompanionRequest::GetElementProperty { path, property } => Ok(self
                .properties
                .get(&(path, property))
                .map(|v| serde_json::Value::String(v.clone()))
                .unwrap_or(serde_json::Value::Null)),
            CompanionRequest::CustomAction { name, .. } => {
                Err(Error::Companion(format!("Unsupported custom action {}", name)))
            }
        }
    }
}
