use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::parser::types::CompanionRequest;

/// Transport to a target device
///
/// The core never depends on a specific transport; it only needs shell
/// commands, frame captures and the raw input-event stream used while
/// recording.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Run a device shell command and return its text output
    async fn run(&self, device_id: &str, command: &str) -> Result<String>;

    /// Capture the current screen as encoded image bytes (PNG)
    async fn capture_frame(&self, device_id: &str) -> Result<Vec<u8>>;

    /// Open a line stream of raw input events from `input_device`.
    ///
    /// The stream ends when the receiver is dropped.
    async fn open_event_stream(
        &self,
        device_id: &str,
        input_device: &str,
    ) -> Result<mpsc::Receiver<String>>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileStepReport {
    pub description: String,
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileApplyReport {
    pub success: bool,
    pub steps: Vec<ProfileStepReport>,
}

/// Applies named device-configuration profiles
#[async_trait]
pub trait DeviceSetupProvider: Send + Sync {
    async fn apply_profile(&self, device_id: &str, profile_id: &str) -> Result<ProfileApplyReport>;
}

/// A UI element as reported by the companion protocol
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementInfo {
    pub path: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub element_type: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub visible: Option<bool>,
}

/// Optional UI-element introspection channel on the app under test
#[async_trait]
pub trait CompanionClient: Send + Sync {
    /// Send one request and return its `result` payload
    async fn request(&self, request: CompanionRequest) -> Result<serde_json::Value>;

    async fn ping(&self) -> Result<()> {
        self.request(CompanionRequest::Ping).await.map(|_| ())
    }

    async fn get_elements(&self) -> Result<Vec<ElementInfo>> {
        let value = self.request(CompanionRequest::GetElements).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::Companion(format!("Malformed element list: {}", e)))
    }

    async fn tap_by_path(&self, path: &str) -> Result<()> {
        self.request(CompanionRequest::TapByPath {
            path: path.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn get_element_property(&self, path: &str, property: &str) -> Result<Option<String>> {
        let value = self
            .request(CompanionRequest::GetElementProperty {
                path: path.to_string(),
                property: property.to_string(),
            })
            .await?;
        Ok(match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    async fn custom_action(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.request(CompanionRequest::CustomAction {
            name: name.to_string(),
            params,
        })
        .await
    }
}
