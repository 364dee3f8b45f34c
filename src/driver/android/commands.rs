//! Shell command builders for device-level actions

use crate::parser::types::{AppOperation, HardwareButton, Interruption, Network, Orientation};

pub fn tap(x: i32, y: i32) -> String {
    format!("input tap {} {}", x, y)
}

pub fn swipe(x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u64) -> String {
    format!("input swipe {} {} {} {} {}", x1, y1, x2, y2, duration_ms)
}

pub fn input_text(text: &str) -> String {
    format!("input text \"{}\"", escape_for_android_shell(text))
}

/// Escape text for `input text` (spaces become `%s`)
pub fn escape_for_android_shell(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(' ', "%s")
        .replace('"', "\\\"")
        .replace('\'', "\\'")
        .replace('&', "\\&")
        .replace('<', "\\<")
        .replace('>', "\\>")
        .replace('|', "\\|")
        .replace(';', "\\;")
        .replace('$', "\\$")
        .replace('`', "\\`")
}

/// Quote an argument for `sh -c`
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

pub fn keycode(button: HardwareButton) -> u32 {
    match button {
        HardwareButton::Home => 3,
        HardwareButton::Back => 4,
        HardwareButton::VolumeUp => 24,
        HardwareButton::VolumeDown => 25,
        HardwareButton::Power => 26,
        HardwareButton::Enter => 66,
        HardwareButton::AppSwitch => 187,
    }
}

pub fn press_button(button: HardwareButton) -> String {
    format!("input keyevent {}", keycode(button))
}

pub fn set_orientation(orientation: Orientation) -> Vec<String> {
    let rotation = match orientation {
        Orientation::Portrait => 0,
        Orientation::Landscape => 1,
        Orientation::ReversePortrait => 2,
        Orientation::ReverseLandscape => 3,
    };
    vec![
        "settings put system accelerometer_rotation 0".to_string(),
        format!("settings put system user_rotation {}", rotation),
    ]
}

pub fn app(operation: AppOperation, app_id: &str) -> Vec<String> {
    let package = shell_quote(app_id);
    let launch = format!("monkey -p {} -c android.intent.category.LAUNCHER 1", package);
    let stop = format!("am force-stop {}", package);
    match operation {
        AppOperation::Launch => vec![launch],
        AppOperation::Stop => vec![stop],
        AppOperation::Restart => vec![stop, launch],
        AppOperation::ClearData => vec![format!("pm clear {}", package)],
        AppOperation::Background => vec![press_button(HardwareButton::Home)],
    }
}

pub fn connectivity(network: Network, enabled: bool) -> Vec<String> {
    let state = if enabled { "enable" } else { "disable" };
    match network {
        Network::Wifi => vec![format!("svc wifi {}", state)],
        Network::MobileData => vec![format!("svc data {}", state)],
        Network::Bluetooth => vec![format!("svc bluetooth {}", state)],
        Network::Airplane => vec![
            format!("settings put global airplane_mode_on {}", if enabled { 1 } else { 0 }),
            format!(
                "am broadcast -a android.intent.action.AIRPLANE_MODE --ez state {}",
                enabled
            ),
        ],
    }
}

pub fn interruption(interruption: &Interruption) -> Vec<String> {
    match interruption {
        Interruption::IncomingCall { number } => vec![format!(
            "am broadcast -a android.intent.action.PHONE_STATE --es state RINGING --es incoming_number {}",
            shell_quote(number)
        )],
        Interruption::Sms { number, message } => vec![format!(
            "am broadcast -a android.provider.Telephony.SMS_RECEIVED --es sender {} --es body {}",
            shell_quote(number),
            shell_quote(message)
        )],
        Interruption::Notification { title, text } => vec![format!(
            "cmd notification post -S bigtext -t {} lumi_interrupt {}",
            shell_quote(title),
            shell_quote(text)
        )],
        Interruption::LowBattery { level } => vec![
            "dumpsys battery unplug".to_string(),
            format!("dumpsys battery set level {}", level),
        ],
        Interruption::BatteryReset => vec!["dumpsys battery reset".to_string()],
    }
}

/// Query whose output names the focused window's package
pub fn foreground_query() -> &'static str {
    "dumpsys window | grep -E 'mCurrentFocus|mFocusedApp'"
}

pub fn screencap() -> &'static str {
    "screencap -p"
}

pub fn getevent_capabilities() -> &'static str {
    "getevent -pl"
}

pub fn getevent_stream(input_device: &str) -> String {
    format!("getevent -lt {}", input_device)
}

pub fn screen_size() -> &'static str {
    "wm size"
}
