use hidmidi_library::calibration::{CalibrationEvent, CalibrationPhase};
use hidmidi_library::monitor::{DisplaySink, StatusSnapshot};
use hidmidi_library::status::{DISPLAY_WIDTH, status_line};
use std::io::{self, Write};

/// Redraws the live status line in place.
pub(crate) struct ConsoleDisplay;

impl DisplaySink for ConsoleDisplay {
    fn render(&mut self, snapshot: &StatusSnapshot<'_>) {
        let mut out = io::stdout().lock();
        let _ = write!(out, "\r{}", status_line(snapshot.mapping, snapshot.raw));
        let _ = out.flush();
    }
}

fn stage(phase: CalibrationPhase) -> &'static str {
    if phase.is_min_stage() { "MINIMUM" } else { "MAXIMUM" }
}

fn overwrite(text: &str) {
    let mut out = io::stdout().lock();
    let _ = write!(out, "\r{text:<DISPLAY_WIDTH$}");
    let _ = out.flush();
}

/// Prints calibration progress on the console.
pub(crate) fn show_calibration(control_name: &str) -> impl FnMut(&CalibrationEvent) + '_ {
    let mut announced = None;
    move |event| match *event {
        CalibrationEvent::Countdown { phase, remaining_secs } => {
            if announced != Some(phase) {
                announced = Some(phase);
                println!("\n--- Calibrating {} ---", stage(phase));
                println!("Move the control [{control_name}] fully to its desired {} position.", stage(phase));
                println!("   Get ready!");
            }
            overwrite(&format!("Starting {} capture in {remaining_secs} second(s)...", stage(phase)));
        }
        CalibrationEvent::Hold {
            phase,
            remaining_secs,
            current,
            extreme,
        } => {
            if announced != Some(phase) {
                announced = Some(phase);
                overwrite("");
                println!("\r   OK. Now HOLD the control steady at the {} position.", stage(phase));
            }
            let label = if phase.is_min_stage() { "Min" } else { "Max" };
            overwrite(&format!(
                "Capturing... ({remaining_secs:>3}s) Current: {current:>6} {label}: {extreme:>6}"
            ));
        }
        CalibrationEvent::Captured { phase, value } => {
            overwrite("");
            let label = if phase.is_min_stage() { "Minimum" } else { "Maximum" };
            println!("\r   {label} value captured: {value}");
        }
        CalibrationEvent::NoSignal { fallback, .. } => {
            overwrite("");
            println!("\rWarning: No input change detected during hold period. Using value from before hold: {fallback}");
        }
        CalibrationEvent::Swapped { min, max } => {
            println!("\nNote: Min value was greater than Max value. Swapping.");
            println!("  New Min: {min}, New Max: {max}");
        }
        CalibrationEvent::Degenerate { value } => {
            println!("\nWarning: Minimum and Maximum calibrated values are the same ({value}).");
            println!("         MIDI output might be fixed or have very limited range.");
        }
    }
}
