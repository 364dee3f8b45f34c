//! Event recorder that turns a device's raw touch stream into gestures
//!
//! The read loop runs as a background task and hands gestures to the consumer
//! through a bounded queue. A slow consumer back-pressures the loop rather
//! than losing gestures.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::touch_decoder::{find_touch_device, Gesture, TouchCalibration, TouchDecoder, TouchThresholds};
use crate::driver::android::{adb, commands};
use crate::driver::traits::CommandChannel;
use crate::error::{Error, Result};

/// Where the recorder reads from and how it scales coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingTarget {
    pub input_device: String,
    pub calibration: TouchCalibration,
}

pub struct EventRecorder {
    channel: Arc<dyn CommandChannel>,
    device_id: String,
    thresholds: TouchThresholds,
    queue_capacity: usize,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventRecorder {
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        device_id: &str,
        thresholds: TouchThresholds,
        queue_capacity: usize,
    ) -> Self {
        Self {
            channel,
            device_id: device_id.to_string(),
            thresholds,
            queue_capacity: queue_capacity.max(1),
            task: Mutex::new(None),
        }
    }

    /// Detect the touch device, its axis ranges and the screen resolution
    pub async fn probe(&self) -> Result<RecordingTarget> {
        let capabilities = self
            .channel
            .run(&self.device_id, commands::getevent_capabilities())
            .await?;
        let input_device = find_touch_device(&capabilities)
            .ok_or_else(|| Error::Device("No touch input device found".to_string()))?;

        let size_output = self.channel.run(&self.device_id, commands::screen_size()).await?;
        let (width, height) = adb::parse_screen_size(&size_output).ok_or_else(|| {
            Error::Device(format!("Cannot parse screen size from '{}'", size_output.trim()))
        })?;

        let calibration =
            TouchCalibration::from_capabilities(&capabilities, Some(&input_device), width, height);
        log::info!(
            "Touch device {} (max {}x{}) on {}x{} screen",
            input_device,
            calibration.max_x,
            calibration.max_y,
            width,
            height
        );

        Ok(RecordingTarget {
            input_device,
            calibration,
        })
    }

    /// Start the read loop; gestures arrive on the returned receiver
    pub async fn start(&self) -> Result<mpsc::Receiver<Gesture>> {
        let mut task = self.task.lock().await;
        if task.as_ref().map_or(false, |t| !t.is_finished()) {
            return Err(Error::AlreadyRecording);
        }

        let target = self.probe().await?;
        let mut events = self
            .channel
            .open_event_stream(&self.device_id, &target.input_device)
            .await?;

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut decoder = TouchDecoder::new(target.calibration, self.thresholds);
        let device = self.device_id.clone();

        *task = Some(tokio::spawn(async move {
            while let Some(line) = events.recv().await {
                let Some(gesture) = decoder.feed_line(&line) else {
                    continue;
                };
                log::debug!("[{}] {:?}", device, gesture);
                if tx.send(gesture).await.is_err() {
                    break;
                }
            }
            log::debug!("[{}] recording loop finished", device);
        }));

        Ok(rx)
    }

    /// Stop the read loop. Returns whether a recording was active.
    pub async fn stop(&self) -> bool {
        match self.task.lock().await.take() {
            Some(handle) => {
                let active = !handle.is_finished();
                handle.abort();
                active
            }
            None => false,
        }
    }

    pub async fn is_recording(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map_or(false, |t| !t.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeChannel;
    use crate::recorder::touch_decoder::tests::tap_lines;

    const CAPABILITIES: &str = "\
add device 1: /dev/input/event3
  name:     \"touch\"
  events:
    ABS (0003): ABS_MT_POSITION_X     : value 0, min 0, max 1080, fuzz 0, flat 0, resolution 0
                ABS_MT_POSITION_Y     : value 0, min 0, max 2400, fuzz 0, flat 0, resolution 0
";

    fn channel(lines: &[String]) -> Arc<FakeChannel> {
        let channel = Arc::new(FakeChannel::new());
        channel.respond("getevent -pl", CAPABILITIES);
        channel.respond("wm size", "Physical size: 1080x2400\n");
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        channel.set_event_lines(&refs);
        channel
    }

    #[tokio::test]
    async fn test_probe() {
        let recorder = EventRecorder::new(channel(&[]), "d", TouchThresholds::default(), 8);
        let target = recorder.probe().await.unwrap();
        assert_eq!(target.input_device, "/dev/input/event3");
        assert_eq!(target.calibration.max_y, 2400);
        assert_eq!(target.calibration.screen_width, 1080);
    }

    #[tokio::test]
    async fn test_gestures_flow_through_queue() {
        let mut lines = tap_lines(1000, 1100, 1, 200, 300);
        lines.extend(tap_lines(5000, 5100, 2, 900, 2000));
        let recorder = EventRecorder::new(channel(&lines), "d", TouchThresholds::default(), 8);

        let mut gestures = recorder.start().await.unwrap();
        let first = gestures.recv().await.unwrap();
        let second = gestures.recv().await.unwrap();
        assert!(matches!(first, Gesture::Tap { at, .. } if at.x == 200 && at.y == 300));
        assert!(matches!(second, Gesture::Tap { .. }));

        // The fake stream ends after its lines, which closes the queue
        assert!(gestures.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let mut lines = tap_lines(1000, 1100, 1, 200, 300);
        lines.extend(tap_lines(5000, 5100, 2, 900, 2000));
        // Capacity 1 keeps the loop blocked on the second gesture
        let recorder = EventRecorder::new(channel(&lines), "d", TouchThresholds::default(), 1);

        let _gestures = recorder.start().await.unwrap();
        tokio::task::yield_now().await;
        assert!(recorder.is_recording().await);
        assert!(matches!(recorder.start().await, Err(Error::AlreadyRecording)));

        assert!(recorder.stop().await);
        assert!(!recorder.is_recording().await);
    }

    #[tokio::test]
    async fn test_missing_touch_device() {
        let channel = Arc::new(FakeChannel::new());
        channel.respond("getevent -pl", "add device 1: /dev/input/event0\n  name: \"keys\"\n");
        let recorder = EventRecorder::new(channel, "d", TouchThresholds::default(), 4);
        assert!(matches!(recorder.start().await, Err(Error::Device(_))));
    }
}
