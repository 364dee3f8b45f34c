pub mod actions;
pub mod cache;
pub mod context;
pub mod events;
pub mod executor;
pub mod history;
pub mod prerequisites;
pub mod profiles;
pub mod state;

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use events::*;
pub use executor::{ExecutorOptions, StopHandle, TestExecutor};
pub use state::*;

use crate::driver::traits::{CommandChannel, CompanionClient, DeviceSetupProvider};
use crate::driver::{AdbChannel, TcpCompanionClient};
use crate::parser::types::TestSuite;
use crate::utils::config::Config;
use cache::VerificationCache;
use history::InMemoryHistory;
use prerequisites::{PrerequisiteVerifier, VerifierOptions};
use profiles::ProfileSetupProvider;

/// What to run and where
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub bundle: PathBuf,
    pub device: Option<String>,
    /// Run only this test (its dependencies must already be proven)
    pub test: Option<String>,
    /// Companion protocol address (`host:port`)
    pub companion: Option<String>,
}

/// The requested device, or the first connected one that is online
pub async fn resolve_device(device: Option<&str>) -> Result<String> {
    if let Some(device) = device {
        return Ok(device.to_string());
    }
    let connected = crate::driver::android::adb::get_devices().await?;
    let device = connected
        .into_iter()
        .find(|d| d.state == "device")
        .context("No Android devices connected")?;
    Ok(device.serial)
}

/// Load a bundle, run it on a device and write reports
pub async fn run_bundle(
    request: &RunRequest,
    config: &Config,
    on_start: impl FnOnce(StopHandle),
) -> Result<SuiteResult> {
    let mut bundle = crate::parser::yaml::load_bundle(&request.bundle)?;

    // 1. Resolve device
    let device_id = resolve_device(request.device.as_deref()).await?;

    // 2. Narrow the suite when a single test is requested
    let suite = match &request.test {
        Some(test_id) => {
            if !bundle.suite.contains(test_id) {
                anyhow::bail!("Test '{}' is not part of suite '{}'", test_id, bundle.suite.id);
            }
            TestSuite {
                tests: vec![test_id.clone()],
                ..bundle.suite.clone()
            }
        }
        None => bundle.suite.clone(),
    };

    // 3. Wire collaborators
    let channel: Arc<dyn CommandChannel> =
        Arc::new(AdbChannel::new(Duration::from_millis(config.command_timeout_ms)));
    let companion: Option<Arc<dyn CompanionClient>> = request.companion.as_deref().map(|addr| {
        Arc::new(TcpCompanionClient::new(
            addr,
            Duration::from_millis(config.companion_timeout_ms),
        )) as Arc<dyn CompanionClient>
    });
    let setup: Arc<dyn DeviceSetupProvider> = Arc::new(ProfileSetupProvider::new(
        bundle.profiles.clone(),
        channel.clone(),
        companion.clone(),
    ));

    let cache = VerificationCache::with_ttl(config.cache_ttl_secs.map(Duration::from_secs));
    let sweep = config
        .cache_ttl_secs
        .map(|_| cache.spawn_expiry_sweep(Duration::from_secs(config.cache_sweep_interval_secs.max(1))));
    let verifier = PrerequisiteVerifier::new(
        cache,
        Some(setup),
        VerifierOptions {
            caching: config.verification_caching,
        },
    );

    let base_dir = request
        .bundle
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let executor = TestExecutor::new(
        channel,
        companion,
        verifier,
        Arc::new(InMemoryHistory::new(config.history_limit)),
        ExecutorOptions::from_config(config, base_dir),
    );
    let console = executor.spawn_console_listener();
    on_start(executor.stop_handle());

    // 4. Execute
    let result = executor
        .run_suite(&suite, &mut bundle.tests, &device_id)
        .await;

    if let Some(sweep) = sweep {
        sweep.abort();
    }
    drop(executor);
    let _ = console.await;

    let result = result?;

    // 5. Reports
    crate::report::generate_report(&result, &config.output_dir)?;
    println!(
        "\n  {} Reports written to {}",
        "📄".blue(),
        config.output_dir.display()
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_explicit_device_skips_lookup() {
        let device = resolve_device(Some("emulator-5554")).await.unwrap();
        assert_eq!(device, "emulator-5554");
    }
}
