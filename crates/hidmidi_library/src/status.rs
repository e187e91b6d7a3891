//! Console text for the live monitor: the status line and mapping summary.

use crate::mapping::{MappingConfig, MessageKind};
use crate::midi::span;
use std::fmt::Write;

pub const DISPLAY_WIDTH: usize = 80;
pub const BAR_WIDTH: usize = 30;
const NAME_WIDTH: usize = 20;

/// One fixed-width line describing the live value, meant to be redrawn in
/// place. Axes use the calibrated range once calibration is done and the
/// hardware range before that.
pub fn status_line(mapping: &MappingConfig, raw: i64) -> String {
    let name: String = mapping.control.name.chars().take(NAME_WIDTH).collect();
    let mut line = format!("[{name:<NAME_WIDTH$}] ");

    if mapping.control.is_button {
        line.push_str(if raw != 0 { "[ ### ON ### ]" } else { "[ --- OFF -- ]" });
    } else {
        let (lo, hi) = if mapping.calibration.done {
            (mapping.calibration.min_raw, mapping.calibration.max_raw)
        } else {
            (mapping.control.logical_min, mapping.control.logical_max)
        };
        let percentage = if hi > lo {
            span(lo, raw.clamp(lo, hi)) * 100.0 / span(lo, hi)
        } else if raw >= hi {
            100.0
        } else {
            0.0
        };
        let filled = ((percentage / 100.0 * BAR_WIDTH as f64 + 0.5) as usize).min(BAR_WIDTH);
        let _ = write!(
            line,
            "|{}{}| {:5.1}% (Raw:{:>6})",
            "#".repeat(filled),
            "-".repeat(BAR_WIDTH - filled),
            percentage,
            raw
        );
    }

    fit_width(line, DISPLAY_WIDTH)
}

fn fit_width(line: String, width: usize) -> String {
    let mut fitted: String = line.chars().take(width).collect();
    let len = fitted.chars().count();
    fitted.extend(std::iter::repeat_n(' ', width - len));
    fitted
}

/// Human readable description of what the mapping sends. Channels are shown
/// 1-based.
pub fn mapping_summary(mapping: &MappingConfig) -> String {
    let ch = u16::from(mapping.midi_channel) + 1;
    let number = mapping.midi_note_or_cc_number;
    let reversed = if mapping.reverse_axis { " [Reversed]" } else { "" };

    match mapping.midi_message_type {
        MessageKind::None => "None".to_string(),
        MessageKind::NoteOnOff => format!(
            "Note On/Off (Ch: {ch}, Note: {number}, Vel: {})",
            mapping.midi_value_note_on_velocity
        ),
        MessageKind::ControlChange if mapping.control.is_button => format!(
            "CC Button (Ch: {ch}, CC: {number}, OnVal: {}, OffVal: {})",
            mapping.midi_value_cc_on, mapping.midi_value_cc_off
        ),
        MessageKind::ControlChange if mapping.calibration.done => format!(
            "CC Axis (Ch: {ch}, CC: {number}, Range: {}-{} -> {}){reversed}",
            mapping.calibration.min_raw,
            mapping.calibration.max_raw,
            if mapping.reverse_axis { "127-0" } else { "0-127" }
        ),
        MessageKind::ControlChange => format!(
            "CC Axis (Ch: {ch}, CC: {number}, Range: UNCALIBRATED, logical {}-{}, no output){reversed}",
            mapping.control.logical_min, mapping.control.logical_max
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::{ControlDescriptor, HidUsage};
    use crate::mapping::CalibrationState;

    fn axis() -> MappingConfig {
        let mut cfg = MappingConfig::new("dev", ControlDescriptor::axis(HidUsage::new(0x01, 0x30), 0, 1000));
        cfg.midi_message_type = MessageKind::ControlChange;
        cfg.midi_note_or_cc_number = 7;
        cfg
    }

    #[test]
    fn button_line() {
        let mut cfg = MappingConfig::new("dev", ControlDescriptor::button(HidUsage::new(0x09, 2)));
        cfg.midi_message_type = MessageKind::NoteOnOff;
        let on = status_line(&cfg, 1);
        assert!(on.starts_with("[Button 2            ] [ ### ON ### ]"));
        assert_eq!(on.len(), DISPLAY_WIDTH);
        assert!(status_line(&cfg, 0).contains("[ --- OFF -- ]"));
    }

    #[test]
    fn axis_line_uses_logical_range_until_calibrated() {
        let mut cfg = axis();
        let line = status_line(&cfg, 500);
        assert!(line.contains(&format!("|{}{}|", "#".repeat(15), "-".repeat(15))));
        assert!(line.contains(" 50.0% (Raw:   500)"));
        assert_eq!(line.chars().count(), DISPLAY_WIDTH);

        cfg.calibration = CalibrationState {
            min_raw: 500,
            max_raw: 600,
            done: true,
        };
        assert!(status_line(&cfg, 500).contains("  0.0%"));
        assert!(status_line(&cfg, 900).contains("100.0%"));
    }

    #[test]
    fn extreme_range_does_not_overflow() {
        let mut cfg = axis();
        cfg.calibration = CalibrationState {
            min_raw: i64::MIN,
            max_raw: i64::MAX,
            done: true,
        };
        assert!(status_line(&cfg, i64::MAX).contains("100.0%"));
        assert!(status_line(&cfg, i64::MIN).contains("  0.0%"));
    }

    #[test]
    fn long_names_are_cut() {
        let mut cfg = axis();
        cfg.control.name = "A very long control name indeed".to_string();
        assert!(status_line(&cfg, 0).starts_with("[A very long control ] "));
    }

    #[test]
    fn summaries() {
        let mut cfg = axis();
        assert!(mapping_summary(&cfg).contains("UNCALIBRATED"));
        cfg.calibration = CalibrationState {
            min_raw: 3,
            max_raw: 990,
            done: true,
        };
        cfg.reverse_axis = true;
        assert_eq!(
            mapping_summary(&cfg),
            "CC Axis (Ch: 1, CC: 7, Range: 3-990 -> 127-0) [Reversed]"
        );

        cfg.midi_message_type = MessageKind::None;
        assert_eq!(mapping_summary(&cfg), "None");
    }
}
