//! Decoder for `getevent -lt` touch telemetry
//!
//! Lines look like
//! `[   5241.023941] /dev/input/event2: EV_ABS       ABS_MT_POSITION_X    000001f4`.
//! Coordinate updates are buffered; touch-down and touch-up transitions only
//! take effect at the next `SYN_REPORT`, when the frame is complete.

use serde::{Deserialize, Serialize};

use crate::parser::types::Point;

/// Axis maximum assumed when the capability query gives none
pub const DEFAULT_AXIS_MAX: u32 = 32767;

/// One parsed `getevent` line
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Kernel timestamp in milliseconds, when the line carried one
    pub timestamp_ms: Option<u64>,
    pub device: Option<String>,
    pub event_type: String,
    pub code: String,
    pub value: String,
}

impl RawEvent {
    /// Parse a labelled line; returns `None` for headers and noise
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (timestamp_ms, rest) = match line.strip_prefix('[') {
            Some(stamped) => {
                let end = stamped.find(']')?;
                let seconds: f64 = stamped[..end].trim().parse().ok()?;
                (Some((seconds * 1000.0).round() as u64), &stamped[end + 1..])
            }
            None => (None, line),
        };

        let mut parts = rest.split_whitespace().peekable();
        let device = match parts.peek() {
            Some(first) if first.ends_with(':') => {
                parts.next().map(|d| d.trim_end_matches(':').to_string())
            }
            _ => None,
        };
        let event_type = parts.next()?;
        let code = parts.next()?;
        let value = parts.next()?;
        if !event_type.starts_with("EV_") {
            return None;
        }

        Some(Self {
            timestamp_ms,
            device,
            event_type: event_type.to_string(),
            code: code.to_string(),
            value: value.to_string(),
        })
    }

    /// Numeric value; `getevent` prints 32-bit hex, so `ffffffff` reads as -1
    pub fn numeric(&self) -> Option<i64> {
        if let Some(hex) = self
            .value
            .strip_prefix("0x")
            .or_else(|| self.value.strip_prefix("0X"))
        {
            return u32::from_str_radix(hex, 16).ok().map(|v| v as i32 as i64);
        }
        if self.value.chars().all(|c| c.is_ascii_hexdigit()) {
            return u32::from_str_radix(&self.value, 16)
                .ok()
                .map(|v| v as i32 as i64);
        }
        self.value.parse().ok()
    }
}

/// Find the primary touch input device in `getevent -pl` output
pub fn find_touch_device(getevent_output: &str) -> Option<String> {
    let mut current_device: Option<String> = None;

    for line in getevent_output.lines() {
        if line.starts_with("add device") {
            // add device 1: /dev/input/event5
            if let Some(path_start) = line.find("/dev/input/") {
                current_device = Some(line[path_start..].trim().to_string());
            }
        } else if line.contains("ABS_MT_POSITION_X") || line.contains("ABS_MT_TOUCH") {
            if let Some(device) = &current_device {
                return Some(device.clone());
            }
        }
    }

    None
}

/// Extract `max N` from a capability line
fn extract_max_value(line: &str) -> Option<u32> {
    // "ABS_MT_POSITION_X : value 0, min 0, max 1080, fuzz 0, flat 0, resolution 0"
    let max_pos = line.find("max ")?;
    let rest = &line[max_pos + 4..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok().filter(|v| *v > 0)
}

/// Raw-to-screen coordinate mapping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchCalibration {
    pub max_x: u32,
    pub max_y: u32,
    pub screen_width: u32,
    pub screen_height: u32,
}

impl TouchCalibration {
    /// Read axis maxima for `device` from `getevent -pl` output, falling back to
    /// `DEFAULT_AXIS_MAX` for any axis not reported
    pub fn from_capabilities(
        getevent_output: &str,
        device: Option<&str>,
        screen_width: u32,
        screen_height: u32,
    ) -> Self {
        let mut max_x = None;
        let mut max_y = None;
        let mut in_device = device.is_none();

        for line in getevent_output.lines() {
            if line.starts_with("add device") {
                in_device = match device {
                    Some(d) => line.trim_end().ends_with(d),
                    None => true,
                };
                continue;
            }
            if !in_device {
                continue;
            }
            if line.contains("ABS_MT_POSITION_X") && max_x.is_none() {
                max_x = extract_max_value(line);
            } else if line.contains("ABS_MT_POSITION_Y") && max_y.is_none() {
                max_y = extract_max_value(line);
            }
        }

        Self {
            max_x: max_x.unwrap_or(DEFAULT_AXIS_MAX),
            max_y: max_y.unwrap_or(DEFAULT_AXIS_MAX),
            screen_width,
            screen_height,
        }
    }

    fn scale(raw: i64, max: u32, extent: u32) -> i32 {
        let ratio = (raw.max(0) as f64 / max.max(1) as f64).min(1.0);
        (ratio * extent as f64).round() as i32
    }

    pub fn to_screen_x(&self, raw: i64) -> i32 {
        Self::scale(raw, self.max_x, self.screen_width)
    }

    pub fn to_screen_y(&self, raw: i64) -> i32 {
        Self::scale(raw, self.max_y, self.screen_height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchThresholds {
    pub tap_max_duration_ms: u64,
    pub tap_max_distance_px: f64,
    pub double_tap_window_ms: u64,
    pub swipe_min_distance_px: f64,
    pub swipe_min_duration_ms: u64,
    pub swipe_max_duration_ms: u64,
}

impl Default for TouchThresholds {
    fn default() -> Self {
        Self {
            tap_max_duration_ms: 400,
            tap_max_distance_px: 100.0,
            double_tap_window_ms: 500,
            swipe_min_distance_px: 250.0,
            swipe_min_duration_ms: 30,
            swipe_max_duration_ms: 2000,
        }
    }
}

/// A classified interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "gesture", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Gesture {
    Tap {
        at: Point,
        /// Release time
        time_ms: u64,
    },
    DoubleTap {
        at: Point,
        time_ms: u64,
    },
    Swipe {
        from: Point,
        to: Point,
        duration_ms: u64,
        time_ms: u64,
    },
}

impl Gesture {
    pub fn name(&self) -> &'static str {
        match self {
            Gesture::Tap { .. } => "tap",
            Gesture::DoubleTap { .. } => "doubleTap",
            Gesture::Swipe { .. } => "swipe",
        }
    }

    /// When the finger touched down
    pub fn started_ms(&self) -> u64 {
        match self {
            Gesture::Tap { time_ms, .. } | Gesture::DoubleTap { time_ms, .. } => *time_ms,
            Gesture::Swipe {
                time_ms,
                duration_ms,
                ..
            } => time_ms.saturating_sub(*duration_ms),
        }
    }

    /// When the finger lifted
    pub fn ended_ms(&self) -> u64 {
        match self {
            Gesture::Tap { time_ms, .. }
            | Gesture::DoubleTap { time_ms, .. }
            | Gesture::Swipe { time_ms, .. } => *time_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Transition {
    Down,
    Up,
}

fn distance(a: Point, b: Point) -> f64 {
    let dx = (a.x - b.x) as f64;
    let dy = (a.y - b.y) as f64;
    dx.hypot(dy)
}

/// Stateful gesture classifier fed one raw event at a time
#[derive(Debug)]
pub struct TouchDecoder {
    calibration: TouchCalibration,
    thresholds: TouchThresholds,
    current_x: Option<i32>,
    current_y: Option<i32>,
    touch_active: bool,
    tracking_id: Option<i64>,
    pending: Option<Transition>,
    down_at: Option<(Point, u64)>,
    /// Last single tap (position, release time) that may become a double tap
    last_tap: Option<(Point, u64)>,
    last_timestamp_ms: u64,
}

impl TouchDecoder {
    pub fn new(calibration: TouchCalibration, thresholds: TouchThresholds) -> Self {
        Self {
            calibration,
            thresholds,
            current_x: None,
            current_y: None,
            touch_active: false,
            tracking_id: None,
            pending: None,
            down_at: None,
            last_tap: None,
            last_timestamp_ms: 0,
        }
    }

    pub fn calibration(&self) -> &TouchCalibration {
        &self.calibration
    }

    pub fn is_touch_active(&self) -> bool {
        self.touch_active
    }

    /// Parse and process one line
    pub fn feed_line(&mut self, line: &str) -> Option<Gesture> {
        let event = RawEvent::parse(line)?;
        self.process(&event)
    }

    pub fn process(&mut self, event: &RawEvent) -> Option<Gesture> {
        if let Some(ts) = event.timestamp_ms {
            self.last_timestamp_ms = ts;
        }

        match (event.event_type.as_str(), event.code.as_str()) {
            ("EV_ABS", "ABS_MT_POSITION_X") => {
                if let Some(raw) = event.numeric() {
                    self.current_x = Some(self.calibration.to_screen_x(raw));
                }
                None
            }
            ("EV_ABS", "ABS_MT_POSITION_Y") => {
                if let Some(raw) = event.numeric() {
                    self.current_y = Some(self.calibration.to_screen_y(raw));
                }
                None
            }
            ("EV_ABS", "ABS_MT_TRACKING_ID") => {
                match event.numeric() {
                    Some(-1) => {
                        if self.touch_active || self.pending == Some(Transition::Down) {
                            self.pending = Some(Transition::Up);
                        }
                    }
                    Some(id) => {
                        // A repeated id for the active contact is not a new touch
                        if self.touch_active && self.tracking_id == Some(id) {
                            return None;
                        }
                        self.tracking_id = Some(id);
                        if !self.touch_active {
                            self.pending = Some(Transition::Down);
                        }
                    }
                    None => {}
                }
                None
            }
            ("EV_KEY", "BTN_TOUCH") => {
                match event.value.as_str() {
                    "DOWN" if !self.touch_active => self.pending = Some(Transition::Down),
                    "UP" if self.touch_active || self.pending == Some(Transition::Down) => {
                        self.pending = Some(Transition::Up)
                    }
                    _ => {}
                }
                None
            }
            ("EV_SYN", "SYN_REPORT") => self.sync(),
            _ => None,
        }
    }

    fn position(&self) -> Option<Point> {
        Some(Point::new(self.current_x?, self.current_y?))
    }

    fn sync(&mut self) -> Option<Gesture> {
        let now = self.last_timestamp_ms;
        match self.pending.take()? {
            Transition::Down => {
                self.touch_active = true;
                self.down_at = self.position().map(|p| (p, now));
                None
            }
            Transition::Up => {
                self.touch_active = false;
                self.tracking_id = None;
                let (start, down_time) = self.down_at.take()?;
                let end = self.position()?;
                self.classify(start, end, down_time, now)
            }
        }
    }

    fn classify(&mut self, start: Point, end: Point, down_ms: u64, up_ms: u64) -> Option<Gesture> {
        let t = &self.thresholds;
        let duration = up_ms.saturating_sub(down_ms);
        let moved = distance(start, end);

        if duration < t.tap_max_duration_ms && moved < t.tap_max_distance_px {
            if let Some((previous, released)) = self.last_tap {
                let gap = down_ms.saturating_sub(released);
                if gap <= t.double_tap_window_ms && distance(previous, start) < t.tap_max_distance_px {
                    // Reset so a third tap starts a new sequence
                    self.last_tap = None;
                    return Some(Gesture::DoubleTap {
                        at: start,
                        time_ms: up_ms,
                    });
                }
            }
            self.last_tap = Some((start, up_ms));
            return Some(Gesture::Tap {
                at: start,
                time_ms: up_ms,
            });
        }

        if moved > t.swipe_min_distance_px
            && (t.swipe_min_duration_ms..=t.swipe_max_duration_ms).contains(&duration)
        {
            self.last_tap = None;
            return Some(Gesture::Swipe {
                from: start,
                to: end,
                duration_ms: duration,
                time_ms: up_ms,
            });
        }

        log::debug!(
            "Unclassified touch: {:.0}px over {}ms from ({}, {})",
            moved,
            duration,
            start.x,
            start.y
        );
        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Identity calibration: raw units equal screen pixels
    pub(crate) fn calibration() -> TouchCalibration {
        TouchCalibration {
            max_x: 1080,
            max_y: 2400,
            screen_width: 1080,
            screen_height: 2400,
        }
    }

    fn line(ms: u64, code: &str, value: &str) -> String {
        let event_type = if code.starts_with("ABS") {
            "EV_ABS"
        } else if code.starts_with("BTN") {
            "EV_KEY"
        } else {
            "EV_SYN"
        };
        format!(
            "[{:>8}.{:06}] /dev/input/event2: {:<12} {:<20} {}",
            ms / 1000,
            (ms % 1000) * 1000,
            event_type,
            code,
            value
        )
    }

    fn touch(ms: u64, id: u32, x: i32, y: i32) -> Vec<String> {
        vec![
            line(ms, "ABS_MT_TRACKING_ID", &format!("{:08x}", id)),
            line(ms, "BTN_TOUCH", "DOWN"),
            line(ms, "ABS_MT_POSITION_X", &format!("{:08x}", x)),
            line(ms, "ABS_MT_POSITION_Y", &format!("{:08x}", y)),
            line(ms, "SYN_REPORT", "00000000"),
        ]
    }

    fn movement(ms: u64, x: i32, y: i32) -> Vec<String> {
        vec![
            line(ms, "ABS_MT_POSITION_X", &format!("{:08x}", x)),
            line(ms, "ABS_MT_POSITION_Y", &format!("{:08x}", y)),
            line(ms, "SYN_REPORT", "00000000"),
        ]
    }

    fn release(ms: u64) -> Vec<String> {
        vec![
            line(ms, "ABS_MT_TRACKING_ID", "ffffffff"),
            line(ms, "BTN_TOUCH", "UP"),
            line(ms, "SYN_REPORT", "00000000"),
        ]
    }

    /// Lines for a press at (x, y) held from `down_ms` to `up_ms`
    pub(crate) fn tap_lines(down_ms: u64, up_ms: u64, id: u32, x: i32, y: i32) -> Vec<String> {
        let mut lines = touch(down_ms, id, x, y);
        lines.extend(release(up_ms));
        lines
    }

    fn decode(lines: &[String]) -> Vec<Gesture> {
        let mut decoder = TouchDecoder::new(calibration(), TouchThresholds::default());
        lines.iter().filter_map(|l| decoder.feed_line(l)).collect()
    }

    #[test]
    fn test_parse_raw_event() {
        let event =
            RawEvent::parse("[   5241.023941] /dev/input/event2: EV_ABS       ABS_MT_POSITION_X    000001f4")
                .unwrap();
        assert_eq!(event.timestamp_ms, Some(5241024));
        assert_eq!(event.device.as_deref(), Some("/dev/input/event2"));
        assert_eq!(event.code, "ABS_MT_POSITION_X");
        assert_eq!(event.numeric(), Some(500));

        let up = RawEvent::parse("/dev/input/event2: EV_ABS ABS_MT_TRACKING_ID ffffffff").unwrap();
        assert_eq!(up.timestamp_ms, None);
        assert_eq!(up.numeric(), Some(-1));

        assert!(RawEvent::parse("add device 1: /dev/input/event2").is_none());
        assert!(RawEvent::parse("").is_none());
    }

    #[test]
    fn test_tap_then_double_tap() {
        let mut lines = tap_lines(1000, 1150, 1, 100, 100);
        lines.extend(tap_lines(1300, 1400, 2, 105, 98));

        let gestures = decode(&lines);
        assert_eq!(
            gestures,
            vec![
                Gesture::Tap {
                    at: Point::new(100, 100),
                    time_ms: 1150
                },
                Gesture::DoubleTap {
                    at: Point::new(105, 98),
                    time_ms: 1400
                },
            ]
        );
    }

    #[test]
    fn test_third_tap_starts_new_sequence() {
        let mut lines = tap_lines(1000, 1100, 1, 100, 100);
        lines.extend(tap_lines(1200, 1300, 2, 100, 100));
        lines.extend(tap_lines(1400, 1500, 3, 100, 100));

        let names: Vec<&str> = decode(&lines).iter().map(|g| g.name()).collect();
        assert_eq!(names, vec!["tap", "doubleTap", "tap"]);
    }

    #[test]
    fn test_distant_taps_stay_single() {
        let mut lines = tap_lines(1000, 1100, 1, 100, 100);
        lines.extend(tap_lines(1200, 1300, 2, 800, 1800));
        let names: Vec<&str> = decode(&lines).iter().map(|g| g.name()).collect();
        assert_eq!(names, vec!["tap", "tap"]);
    }

    #[test]
    fn test_swipe() {
        let mut lines = touch(2000, 7, 100, 100);
        lines.extend(movement(2100, 300, 100));
        lines.extend(movement(2190, 500, 100));
        lines.extend(release(2200));

        assert_eq!(
            decode(&lines),
            vec![Gesture::Swipe {
                from: Point::new(100, 100),
                to: Point::new(500, 100),
                duration_ms: 200,
                time_ms: 2200
            }]
        );
    }

    #[test]
    fn test_long_press_and_slow_drag_are_ignored() {
        // Held too long for a tap, too short a move for a swipe
        let lines = tap_lines(0, 900, 1, 300, 300);
        assert!(decode(&lines).is_empty());

        // Long distance but slower than the swipe window
        let mut lines = touch(10_000, 2, 100, 100);
        lines.extend(movement(12_000, 900, 100));
        lines.extend(release(12_500));
        assert!(decode(&lines).is_empty());
    }

    #[test]
    fn test_transitions_wait_for_sync_report() {
        let mut decoder = TouchDecoder::new(calibration(), TouchThresholds::default());
        decoder.feed_line(&line(0, "ABS_MT_TRACKING_ID", "00000001"));
        decoder.feed_line(&line(0, "ABS_MT_POSITION_X", "00000064"));
        assert!(!decoder.is_touch_active());

        decoder.feed_line(&line(0, "ABS_MT_POSITION_Y", "00000064"));
        decoder.feed_line(&line(0, "SYN_REPORT", "00000000"));
        assert!(decoder.is_touch_active());

        // Repeating the active tracking id does not register a new touch
        decoder.feed_line(&line(50, "ABS_MT_TRACKING_ID", "00000001"));
        decoder.feed_line(&line(50, "SYN_REPORT", "00000000"));
        assert!(decoder.is_touch_active());

        decoder.feed_line(&line(100, "ABS_MT_TRACKING_ID", "ffffffff"));
        assert!(decoder.is_touch_active());
        let gesture = decoder.feed_line(&line(100, "SYN_REPORT", "00000000"));
        assert!(matches!(gesture, Some(Gesture::Tap { .. })));
        assert!(!decoder.is_touch_active());
    }

    #[test]
    fn test_calibration_from_capabilities() {
        let output = "\
add device 1: /dev/input/event0
  name:     \"gpio-keys\"
add device 2: /dev/input/event2
  name:     \"touchscreen\"
  events:
    ABS (0003): ABS_MT_POSITION_X     : value 0, min 0, max 4095, fuzz 0, flat 0, resolution 0
                ABS_MT_POSITION_Y     : value 0, min 0, max 8191, fuzz 0, flat 0, resolution 0
                ABS_MT_TRACKING_ID    : value 0, min 0, max 65535, fuzz 0, flat 0, resolution 0
";
        assert_eq!(find_touch_device(output).as_deref(), Some("/dev/input/event2"));

        let cal = TouchCalibration::from_capabilities(output, Some("/dev/input/event2"), 1080, 2400);
        assert_eq!(cal.max_x, 4095);
        assert_eq!(cal.max_y, 8191);
        assert_eq!(cal.to_screen_x(4095), 1080);
        assert_eq!(cal.to_screen_y(0), 0);

        let fallback = TouchCalibration::from_capabilities("", None, 1080, 2400);
        assert_eq!(fallback.max_x, DEFAULT_AXIS_MAX);
    }
}
