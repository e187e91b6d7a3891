use hidmidi_library::HidUsage;
use hidmidi_library::controls::pages;
use serde::Deserialize;

/// Top-level application usage a HID device must expose to be offered.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeviceUsage {
    pub usage_page: u16,
    pub usage: u16,
}

impl From<DeviceUsage> for HidUsage {
    fn from(u: DeviceUsage) -> Self {
        HidUsage::new(u.usage_page, u.usage)
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub(crate) struct Settings {
    /// Where mappings are listed, loaded from and saved to.
    pub mapping_dir: String,
    /// MIDI client name registered with the system.
    pub client_name: String,
    /// Send interval given to newly created mappings.
    pub default_send_interval_ms: i64,
    /// Redraw rate of the live status line.
    pub display_fps: u32,
    /// Used when RUST_LOG is not set.
    pub log_level: String,
    pub device_usages: Vec<DeviceUsage>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mapping_dir: ".".to_string(),
            client_name: "HID MIDI Mapper".to_string(),
            default_send_interval_ms: hidmidi_library::mapping::DEFAULT_SEND_INTERVAL_MS,
            display_fps: hidmidi_library::monitor::DEFAULT_DISPLAY_FPS,
            log_level: "info".to_string(),
            device_usages: vec![
                // Joystick and Gamepad
                DeviceUsage {
                    usage_page: pages::GENERIC_DESKTOP,
                    usage: 0x04,
                },
                DeviceUsage {
                    usage_page: pages::GENERIC_DESKTOP,
                    usage: 0x05,
                },
            ],
        }
    }
}

impl Settings {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.mapping_dir.is_empty() {
            return Err("Mapping directory must not be empty".to_string());
        }

        if self.client_name.is_empty() {
            return Err("Client name must not be empty".to_string());
        }

        if self.default_send_interval_ms <= 0 {
            return Err(format!(
                "default_send_interval_ms must be positive (found {})",
                self.default_send_interval_ms
            ));
        }

        if self.display_fps == 0 {
            return Err("display_fps must be positive".to_string());
        }

        if self.device_usages.is_empty() {
            return Err("At least one device usage is needed to find devices".to_string());
        }

        Ok(())
    }

    pub(crate) fn accepts(&self, usage_page: u16, usage: u16) -> bool {
        self.device_usages
            .iter()
            .any(|u| u.usage_page == usage_page && u.usage == usage)
    }
}
