use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::actions::{ActionRunner, ActionSettings};
use crate::driver::traits::{
    CommandChannel, CompanionClient, DeviceSetupProvider, ProfileApplyReport, ProfileStepReport,
};
use crate::error::Result;
use crate::parser::types::DeviceProfile;

/// Applies profiles loaded with the suite bundle by running their actions in order
pub struct ProfileSetupProvider {
    profiles: HashMap<String, DeviceProfile>,
    channel: Arc<dyn CommandChannel>,
    companion: Option<Arc<dyn CompanionClient>>,
}

impl ProfileSetupProvider {
    pub fn new(
        profiles: Vec<DeviceProfile>,
        channel: Arc<dyn CommandChannel>,
        companion: Option<Arc<dyn CompanionClient>>,
    ) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
            channel,
            companion,
        }
    }

    pub fn profile_ids(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }
}

#[async_trait]
impl DeviceSetupProvider for ProfileSetupProvider {
    async fn apply_profile(&self, device_id: &str, profile_id: &str) -> Result<ProfileApplyReport> {
        let Some(profile) = self.profiles.get(profile_id) else {
            return Ok(ProfileApplyReport {
                success: false,
                steps: vec![ProfileStepReport {
                    description: format!("resolve profile '{}'", profile_id),
                    success: false,
                    message: Some("Unknown device profile".to_string()),
                }],
            });
        };

        log::info!("Applying device profile '{}' to {}", profile_id, device_id);
        let runner = ActionRunner::new(
            self.channel.clone(),
            self.companion.clone(),
            device_id,
            ActionSettings::default(),
        );

        let mut steps = Vec::with_capacity(profile.actions.len());
        for action in &profile.actions {
            let outcome = runner.run_setup(action).await;
            if let Err(e) = &outcome {
                log::warn!("Profile '{}' action {} failed: {}", profile_id, action.describe(), e);
            }
            steps.push(ProfileStepReport {
                description: action.describe(),
                success: outcome.is_ok(),
                message: outcome.err().map(|e| e.to_string()),
            });
        }

        Ok(ProfileApplyReport {
            success: steps.iter().all(|s| s.success),
            steps,
        })
    }
}
