pub mod adb;
pub mod commands;

use async_trait::async_trait;
use colored::Colorize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};

use super::traits::CommandChannel;
use crate::error::{Error, Result};

/// Buffered raw event lines per open stream
const EVENT_STREAM_CAPACITY: usize = 1024;

/// Command channel backed by the `adb` binary
///
/// Commands to the same device are serialized; different devices run
/// concurrently.
pub struct AdbChannel {
    command_timeout: Duration,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AdbChannel {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            command_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn device_lock(&self, device_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn timeout_ms(&self) -> u64 {
        self.command_timeout.as_millis() as u64
    }

    /// Screen resolution reported by `wm size`
    pub async fn screen_size(&self, device_id: &str) -> Result<(u32, u32)> {
        let output = self.run(device_id, commands::screen_size()).await?;
        adb::parse_screen_size(&output)
            .ok_or_else(|| Error::Device(format!("Cannot parse screen size from '{}'", output.trim())))
    }
}

#[async_trait]
impl CommandChannel for AdbChannel {
    async fn run(&self, device_id: &str, command: &str) -> Result<String> {
        let lock = self.device_lock(device_id).await;
        let _guard = lock.lock().await;

        log::debug!("[{}] adb shell {}", device_id, command);
        match tokio::time::timeout(self.command_timeout, adb::shell(Some(device_id), command)).await
        {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(Error::Device(format!("{:#}", e))),
            Err(_) => Err(Error::timeout(format!("adb shell {}", command), self.timeout_ms())),
        }
    }

    async fn capture_frame(&self, device_id: &str) -> Result<Vec<u8>> {
        let lock = self.device_lock(device_id).await;
        let _guard = lock.lock().await;

        let capture = adb::exec_out_binary(Some(device_id), commands::screencap());
        match tokio::time::timeout(self.command_timeout, capture).await {
            Ok(Ok(bytes)) if bytes.is_empty() => {
                Err(Error::Device("screencap returned no data".to_string()))
            }
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(Error::Device(format!("{:#}", e))),
            Err(_) => Err(Error::timeout("screencap", self.timeout_ms())),
        }
    }

    async fn open_event_stream(
        &self,
        device_id: &str,
        input_device: &str,
    ) -> Result<mpsc::Receiver<String>> {
        let mut child = adb::spawn_shell(Some(device_id), &commands::getevent_stream(input_device))
            .map_err(|e| Error::Device(format!("{:#}", e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Device("getevent has no stdout".to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_STREAM_CAPACITY);
        let device = device_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if tx.send(line).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            log::warn!("[{}] getevent read error: {}", device, e);
                            break;
                        }
                    },
                    _ = tx.closed() => break,
                }
            }
            // Receiver gone or stream ended; stop getevent on the device
            let _ = child.kill().await;
            log::debug!("[{}] event stream closed", device);
        });

        Ok(rx)
    }
}

/// Print connected Android devices
pub async fn list_devices() -> anyhow::Result<()> {
    let devices = adb::get_devices().await?;

    if devices.is_empty() {
        println!("  No Android devices connected");
    } else {
        println!("  Found {} device(s):", devices.len());
        for device in devices {
            println!(
                "    {} {} ({})",
                "•".green(),
                device.serial.white().bold(),
                device.state.dimmed()
            );
        }
    }

    Ok(())
}
