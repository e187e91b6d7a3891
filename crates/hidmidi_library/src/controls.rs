use serde::{Deserialize, Serialize};
use std::fmt;

/// HID usage pages the mapper gives names to.
pub mod pages {
    pub const GENERIC_DESKTOP: u16 = 0x01;
    pub const SIMULATION: u16 = 0x02;
    pub const GAME: u16 = 0x05;
    pub const BUTTON: u16 = 0x09;
    pub const CONSUMER: u16 = 0x0C;
}

/// Locates one logical control inside a device's reports.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct HidUsage {
    pub usage_page: u16,
    pub usage: u16,
}

impl HidUsage {
    pub const fn new(usage_page: u16, usage: u16) -> Self {
        Self { usage_page, usage }
    }
}

impl fmt::Display for HidUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}/{:#04x}", self.usage_page, self.usage)
    }
}

/// Which control is read and how its raw value is to be interpreted.
///
/// Chosen once during setup and never modified afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ControlDescriptor {
    pub is_button: bool,
    #[serde(flatten)]
    pub locator: HidUsage,
    pub logical_min: i64,
    pub logical_max: i64,
    #[serde(default = "unknown_control")]
    pub name: String,
}

fn unknown_control() -> String {
    "Unknown Control".to_string()
}

impl ControlDescriptor {
    pub fn button(locator: HidUsage) -> Self {
        Self {
            is_button: true,
            locator,
            logical_min: 0,
            logical_max: 1,
            name: usage_name(locator.usage_page, locator.usage),
        }
    }

    pub fn axis(locator: HidUsage, logical_min: i64, logical_max: i64) -> Self {
        Self {
            is_button: false,
            locator,
            logical_min,
            logical_max,
            name: usage_name(locator.usage_page, locator.usage),
        }
    }
}

impl fmt::Display for ControlDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_button {
            write!(f, "{} (Button)", self.name)
        } else {
            write!(
                f,
                "{} (Axis/Value: {}-{})",
                self.name, self.logical_min, self.logical_max
            )
        }
    }
}

/// Friendly name for a usage, falling back to the raw page/usage pair.
pub fn usage_name(usage_page: u16, usage: u16) -> String {
    let known = match (usage_page, usage) {
        (pages::SIMULATION, 0xBA) => Some("Rudder"),
        (pages::SIMULATION, 0xBB) => Some("Throttle"),
        (pages::SIMULATION, 0xC4) => Some("Accelerator"),
        (pages::SIMULATION, 0xC5) => Some("Brake"),
        (pages::GAME, 0x20) => Some("POV Hat Up"),
        (pages::GAME, 0x21) => Some("POV Hat Down"),
        (pages::GAME, 0x22) => Some("POV Hat Right"),
        (pages::GAME, 0x23) => Some("POV Hat Left"),
        (pages::GAME, 0x24) => Some("POV Hat Press"),
        (pages::GENERIC_DESKTOP, 0x01) => Some("Pointer"),
        (pages::GENERIC_DESKTOP, 0x02) => Some("Mouse"),
        (pages::GENERIC_DESKTOP, 0x04) => Some("Joystick"),
        (pages::GENERIC_DESKTOP, 0x05) => Some("Gamepad"),
        (pages::GENERIC_DESKTOP, 0x06) => Some("Keyboard"),
        (pages::GENERIC_DESKTOP, 0x07) => Some("Keypad"),
        (pages::GENERIC_DESKTOP, 0x30) => Some("X Axis"),
        (pages::GENERIC_DESKTOP, 0x31) => Some("Y Axis"),
        (pages::GENERIC_DESKTOP, 0x32) => Some("Z Axis"),
        (pages::GENERIC_DESKTOP, 0x33) => Some("Rx Axis"),
        (pages::GENERIC_DESKTOP, 0x34) => Some("Ry Axis"),
        (pages::GENERIC_DESKTOP, 0x35) => Some("Rz Axis"),
        (pages::GENERIC_DESKTOP, 0x36) => Some("Slider"),
        (pages::GENERIC_DESKTOP, 0x37) => Some("Dial"),
        (pages::GENERIC_DESKTOP, 0x38) => Some("Wheel"),
        (pages::GENERIC_DESKTOP, 0x39) => Some("Hat Switch"),
        (pages::GENERIC_DESKTOP, 0x80) => Some("System Control"),
        (pages::CONSUMER, 0xE9) => Some("Volume Up"),
        (pages::CONSUMER, 0xEA) => Some("Volume Down"),
        (pages::CONSUMER, 0xB0) => Some("Play"),
        (pages::CONSUMER, 0xB1) => Some("Pause"),
        (pages::CONSUMER, 0xB5) => Some("Next Track"),
        (pages::CONSUMER, 0xB6) => Some("Prev Track"),
        _ => None,
    };

    match known {
        Some(name) => name.to_string(),
        None if usage_page == pages::BUTTON => format!("Button {usage}"),
        None => format!("Usage(UP:0x{usage_page:02x}, U:0x{usage:02x})"),
    }
}
