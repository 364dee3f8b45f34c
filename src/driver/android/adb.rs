use crate::utils::binary_resolver;
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Represents an Android device
#[derive(Debug, Clone)]
pub struct Device {
    pub serial: String,
    pub state: String,
}

fn with_serial<'a>(serial: Option<&'a str>, rest: &[&'a str]) -> Vec<&'a str> {
    let mut args = Vec::with_capacity(rest.len() + 2);
    if let Some(s) = serial {
        args.push("-s");
        args.push(s);
    }
    args.extend_from_slice(rest);
    args
}

/// Get list of connected Android devices
pub async fn get_devices() -> Result<Vec<Device>> {
    let adb_path = binary_resolver::find_adb()?;
    let output = Command::new(adb_path)
        .args(["devices"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("Failed to execute adb devices")?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !stderr.is_empty() {
        log::debug!("adb devices stderr:\n{}", stderr);
    }

    Ok(parse_devices(&stdout))
}

fn parse_devices(output: &str) -> Vec<Device> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            (parts.len() >= 2).then(|| Device {
                serial: parts[0].to_string(),
                state: parts[1].to_string(),
            })
        })
        .collect()
}

/// Execute an ADB shell command
pub async fn shell(serial: Option<&str>, cmd: &str) -> Result<String> {
    let args = with_serial(serial, &["shell", cmd]);

    let adb_path = binary_resolver::find_adb()?;
    let output = Command::new(adb_path)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to execute: adb shell {}", cmd))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("ADB shell command failed: {}", stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Execute ADB exec-out command and return raw binary data
/// Use this for binary output like screenshots
pub async fn exec_out_binary(serial: Option<&str>, cmd: &str) -> Result<Vec<u8>> {
    let args = with_serial(serial, &["exec-out", cmd]);

    let adb_path = binary_resolver::find_adb()?;
    let output = Command::new(adb_path)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to execute: adb exec-out {}", cmd))?;

    // exec-out may not set exit status properly, check if we got output
    if output.stdout.is_empty() && !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("ADB exec-out command failed: {}", stderr.trim());
    }

    Ok(output.stdout)
}

/// Spawn a long-running `adb shell <cmd>` with piped stdout
pub fn spawn_shell(serial: Option<&str>, cmd: &str) -> Result<Child> {
    let args = with_serial(serial, &["shell", cmd]);

    let adb_path = binary_resolver::find_adb()?;
    Command::new(&adb_path)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start: adb shell {}", cmd))
}

/// Parse `wm size` output, preferring an override size over the physical one
pub fn parse_screen_size(output: &str) -> Option<(u32, u32)> {
    let mut size = None;

    for line in output.lines() {
        if line.contains("Override size:") || line.contains("Physical size:") {
            if let Some(size_str) = line.split(':').nth(1) {
                let parts: Vec<&str> = size_str.trim().split('x').collect();
                if parts.len() == 2 {
                    if let (Ok(w), Ok(h)) = (parts[0].trim().parse(), parts[1].trim().parse()) {
                        size = Some((w, h));
                        if line.contains("Override size:") {
                            break;
                        }
                    }
                }
            }
        }
    }

    size
}
