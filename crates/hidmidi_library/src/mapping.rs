//! What a control turns into, and how that is stored on disk.

use crate::controls::ControlDescriptor;
use crate::error::MappingError;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const MAPPING_EXTENSION: &str = ".hidmidi.json";
pub const DEFAULT_SEND_INTERVAL_MS: i64 = 1;
pub const DEFAULT_NOTE_VELOCITY: u8 = 64;
pub const DEFAULT_CC_ON: u8 = 127;
pub const DEFAULT_CC_OFF: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageKind {
    #[default]
    None,
    NoteOnOff,
    ControlChange,
}

const MESSAGE_KIND_NAMES: [(MessageKind, &str); 3] = [
    (MessageKind::None, "None"),
    (MessageKind::NoteOnOff, "NoteOnOff"),
    (MessageKind::ControlChange, "CC"),
];

impl MessageKind {
    pub fn wire_name(self) -> &'static str {
        MESSAGE_KIND_NAMES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, name)| *name)
            .unwrap_or("None")
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        MESSAGE_KIND_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(kind, _)| *kind)
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire_name())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    /// `null` is accepted as `None` for files written by older versions.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(MessageKind::None),
            Some(name) => MessageKind::from_wire_name(&name).ok_or_else(|| {
                de::Error::unknown_variant(&name, &["None", "NoteOnOff", "CC"])
            }),
        }
    }
}

/// Learned usable range of an axis.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationState {
    #[serde(rename = "calibrationMinHid", default)]
    pub min_raw: i64,
    #[serde(rename = "calibrationMaxHid", default)]
    pub max_raw: i64,
    #[serde(rename = "calibrationDone", default)]
    pub done: bool,
}

impl CalibrationState {
    pub fn is_degenerate(&self) -> bool {
        self.min_raw == self.max_raw
    }
}

/// Complete mapping of one control to MIDI, as persisted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MappingConfig {
    pub hid_device_path: String,
    #[serde(default)]
    pub hid_device_name: String,
    pub control: ControlDescriptor,
    pub midi_device_name: String,
    #[serde(default)]
    pub midi_message_type: MessageKind,
    #[serde(default)]
    pub midi_channel: u8,
    #[serde(default, rename = "midiNoteOrCCNumber")]
    pub midi_note_or_cc_number: u8,
    #[serde(default = "default_velocity")]
    pub midi_value_note_on_velocity: u8,
    #[serde(default = "default_cc_on", rename = "midiValueCCOn")]
    pub midi_value_cc_on: u8,
    #[serde(default = "default_cc_off", rename = "midiValueCCOff")]
    pub midi_value_cc_off: u8,
    #[serde(flatten)]
    pub calibration: CalibrationState,
    #[serde(default)]
    pub reverse_axis: bool,
    #[serde(default = "default_interval")]
    pub midi_send_interval_ms: i64,
}

fn default_velocity() -> u8 {
    DEFAULT_NOTE_VELOCITY
}

fn default_cc_on() -> u8 {
    DEFAULT_CC_ON
}

fn default_cc_off() -> u8 {
    DEFAULT_CC_OFF
}

fn default_interval() -> i64 {
    DEFAULT_SEND_INTERVAL_MS
}

impl MappingConfig {
    pub fn new(hid_device_path: impl Into<String>, control: ControlDescriptor) -> Self {
        Self {
            hid_device_path: hid_device_path.into(),
            hid_device_name: String::new(),
            control,
            midi_device_name: String::new(),
            midi_message_type: MessageKind::None,
            midi_channel: 0,
            midi_note_or_cc_number: 0,
            midi_value_note_on_velocity: DEFAULT_NOTE_VELOCITY,
            midi_value_cc_on: DEFAULT_CC_ON,
            midi_value_cc_off: DEFAULT_CC_OFF,
            calibration: CalibrationState::default(),
            reverse_axis: false,
            midi_send_interval_ms: DEFAULT_SEND_INTERVAL_MS,
        }
    }

    /// Minimum spacing between two sends. Always positive.
    pub fn send_interval(&self) -> Duration {
        let ms = if self.midi_send_interval_ms > 0 {
            self.midi_send_interval_ms
        } else {
            DEFAULT_SEND_INTERVAL_MS
        };
        Duration::from_millis(ms as u64)
    }

    /// Replaces a non-positive send interval with the default.
    pub fn normalize_interval(&mut self) -> bool {
        if self.midi_send_interval_ms > 0 {
            return false;
        }
        warn!(
            interval_ms = self.midi_send_interval_ms,
            default_ms = DEFAULT_SEND_INTERVAL_MS,
            "MIDI send interval is invalid, resetting to default"
        );
        self.midi_send_interval_ms = DEFAULT_SEND_INTERVAL_MS;
        true
    }

    pub fn validate(&self) -> Result<(), MappingError> {
        check_range("midiChannel", self.midi_channel, 0, 15)?;
        check_range("midiNoteOrCCNumber", self.midi_note_or_cc_number, 0, 127)?;
        check_range("midiValueNoteOnVelocity", self.midi_value_note_on_velocity, 1, 127)?;
        check_range("midiValueCCOn", self.midi_value_cc_on, 0, 127)?;
        check_range("midiValueCCOff", self.midi_value_cc_off, 0, 127)?;
        check_hid_value("calibrationMinHid", self.calibration.min_raw)?;
        check_hid_value("calibrationMaxHid", self.calibration.max_raw)?;
        check_hid_value("logicalMin", self.control.logical_min)?;
        check_hid_value("logicalMax", self.control.logical_max)?;
        Ok(())
    }

    pub fn from_json(path: &Path, text: &str) -> Result<Self, MappingError> {
        let mut config: MappingConfig = serde_json::from_str(text).map_err(|source| MappingError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.normalize_interval();
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, MappingError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| MappingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(path, &text)?;
        debug!(path = %path.display(), control = %config.control.name, "loaded mapping");
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut serializer)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MappingError> {
        let path = path.as_ref();
        let mut text = self.to_json().map_err(|source| MappingError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        text.push('\n');
        fs::write(path, text).map_err(|source| MappingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "saved mapping");
        Ok(())
    }
}

fn check_range(field: &'static str, value: u8, min: u8, max: u8) -> Result<(), MappingError> {
    if (min..=max).contains(&value) {
        return Ok(());
    }
    Err(MappingError::OutOfRange {
        field,
        value: i64::from(value),
        min: i64::from(min),
        max: i64::from(max),
    })
}

// HID fields are at most 32 bits wide.
fn check_hid_value(field: &'static str, value: i64) -> Result<(), MappingError> {
    let (min, max) = (i64::from(i32::MIN), i64::from(u32::MAX));
    if (min..=max).contains(&value) {
        return Ok(());
    }
    Err(MappingError::OutOfRange { field, value, min, max })
}

/// Appends the mapping extension unless `name` already ends with it.
pub fn with_extension(name: &str) -> String {
    if name.ends_with(MAPPING_EXTENSION) {
        name.to_string()
    } else {
        format!("{name}{MAPPING_EXTENSION}")
    }
}

/// Saved mappings in `dir`, sorted. A missing directory yields an empty list.
pub fn list_mappings(dir: impl AsRef<Path>) -> Vec<PathBuf> {
    let dir = dir.as_ref();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %dir.display(), %err, "cannot list mappings");
            return Vec::new();
        }
    };

    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(MAPPING_EXTENSION))
        })
        .collect();
    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::HidUsage;

    fn axis_mapping() -> MappingConfig {
        let mut config = MappingConfig::new(
            "/dev/hidraw3",
            ControlDescriptor::axis(HidUsage::new(0x01, 0x30), 0, 1023),
        );
        config.hid_device_name = "Test Stick".to_string();
        config.midi_device_name = "Synth In".to_string();
        config.midi_message_type = MessageKind::ControlChange;
        config.midi_channel = 2;
        config.midi_note_or_cc_number = 74;
        config.calibration = CalibrationState {
            min_raw: 12,
            max_raw: 1001,
            done: true,
        };
        config
    }

    #[test]
    fn message_kind_wire_names() {
        assert_eq!(serde_json::to_string(&MessageKind::ControlChange).unwrap(), "\"CC\"");
        assert_eq!(serde_json::to_string(&MessageKind::None).unwrap(), "\"None\"");
        let kind: MessageKind = serde_json::from_str("null").unwrap();
        assert_eq!(kind, MessageKind::None);
        let kind: MessageKind = serde_json::from_str("\"NoteOnOff\"").unwrap();
        assert_eq!(kind, MessageKind::NoteOnOff);
        assert!(serde_json::from_str::<MessageKind>("\"Pitch\"").is_err());
    }

    #[test]
    fn saved_keys_are_flat_and_camel_case() {
        let json: serde_json::Value = serde_json::from_str(&axis_mapping().to_json().unwrap()).unwrap();
        assert_eq!(json["midiMessageType"], "CC");
        assert_eq!(json["midiNoteOrCCNumber"], 74);
        assert_eq!(json["midiValueCCOn"], 127);
        assert_eq!(json["calibrationMinHid"], 12);
        assert_eq!(json["calibrationDone"], true);
        assert_eq!(json["control"]["usagePage"], 1);
        assert_eq!(json["midiSendIntervalMs"], 1);
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let text = r#"{
            "hidDevicePath": "p",
            "control": {"isButton": true, "usagePage": 9, "usage": 1, "logicalMin": 0, "logicalMax": 1, "name": "Button 1"},
            "midiDeviceName": "m",
            "midiMessageType": null,
            "midiSendIntervalMs": 0
        }"#;
        let config = MappingConfig::from_json(Path::new("t.json"), text).unwrap();
        assert_eq!(config.midi_message_type, MessageKind::None);
        assert_eq!(config.midi_value_note_on_velocity, 64);
        assert_eq!(config.midi_value_cc_on, 127);
        assert_eq!(config.midi_value_cc_off, 0);
        assert_eq!(config.calibration, CalibrationState::default());
        assert!(!config.reverse_axis);
        assert_eq!(config.midi_send_interval_ms, DEFAULT_SEND_INTERVAL_MS);
    }

    #[test]
    fn missing_or_out_of_range_fields_fail_cleanly() {
        let missing = r#"{"hidDevicePath": "p", "midiDeviceName": "m"}"#;
        assert!(matches!(
            MappingConfig::from_json(Path::new("t.json"), missing),
            Err(MappingError::Json { .. })
        ));

        let mut config = axis_mapping();
        config.midi_channel = 16;
        let err = MappingConfig::from_json(Path::new("t.json"), &config.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, MappingError::OutOfRange { field: "midiChannel", .. }));

        assert!(matches!(
            MappingConfig::from_json(Path::new("t.json"), "[1, 2]"),
            Err(MappingError::Json { .. })
        ));
    }

    #[test]
    fn bounds_wider_than_a_hid_field_are_rejected() {
        let mut config = axis_mapping();
        config.calibration.min_raw = -9_000_000_000_000_000_000;
        config.calibration.max_raw = 9_000_000_000_000_000_000;
        let err = MappingConfig::from_json(Path::new("t.json"), &config.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, MappingError::OutOfRange { field: "calibrationMinHid", .. }));

        let mut config = axis_mapping();
        config.control.logical_max = i64::MAX;
        let err = MappingConfig::from_json(Path::new("t.json"), &config.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, MappingError::OutOfRange { field: "logicalMax", .. }));

        let mut config = axis_mapping();
        config.calibration.min_raw = i64::from(i32::MIN);
        config.calibration.max_raw = i64::from(u32::MAX);
        assert!(MappingConfig::from_json(Path::new("t.json"), &config.to_json().unwrap()).is_ok());
    }

    #[test]
    fn send_interval_never_zero() {
        let mut config = axis_mapping();
        config.midi_send_interval_ms = -5;
        assert_eq!(config.send_interval(), Duration::from_millis(1));
        assert!(config.normalize_interval());
        assert!(!config.normalize_interval());
        config.midi_send_interval_ms = 10;
        assert_eq!(config.send_interval(), Duration::from_millis(10));
    }

    #[test]
    fn save_load_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let config = axis_mapping();

        let path = dir.path().join(with_extension("stick"));
        config.save(&path).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        config.save(dir.path().join("another.hidmidi.json")).unwrap();

        let loaded = MappingConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n    \"hidDevicePath\""));
        assert!(text.ends_with("}\n"));

        let listed = list_mappings(dir.path());
        let names: Vec<_> = listed
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["another.hidmidi.json", "stick.hidmidi.json"]);

        assert!(list_mappings(dir.path().join("nope")).is_empty());
        assert!(matches!(
            MappingConfig::load(dir.path().join("nope.hidmidi.json")),
            Err(MappingError::Io { .. })
        ));
    }

    #[test]
    fn extension_appended_once() {
        assert_eq!(with_extension("pedal"), "pedal.hidmidi.json");
        assert_eq!(with_extension("pedal.hidmidi.json"), "pedal.hidmidi.json");
    }
}
