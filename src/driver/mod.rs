pub mod android;
pub mod companion;
#[cfg(test)]
pub mod fake;
pub mod image_compare;
pub mod traits;

pub use android::AdbChannel;
pub use companion::TcpCompanionClient;
pub use traits::{CommandChannel, CompanionClient, DeviceSetupProvider};

use anyhow::Result;

/// List connected devices for the specified platform
pub async fn list_devices(platform: &str) -> Result<()> {
    match platform {
        "android" => android::list_devices().await,
        _ => {
            anyhow::bail!("Unknown platform: {}", platform);
        }
    }
}
