use hidmidi_library::mapping::{MappingConfig, MessageKind};
use std::io::{BufRead, Write};

/// Line-oriented console prompts. Every question returns `None` once input
/// is exhausted, which callers treat as a request to quit.
pub(crate) struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub(crate) fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn read_line(&mut self) -> Option<String> {
        let _ = write!(self.output, "> ");
        let _ = self.output.flush();
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }

    fn say(&mut self, text: &str) {
        let _ = writeln!(self.output, "{text}");
    }

    /// Asks until a whole number in `min..=max` is entered.
    pub(crate) fn number(&mut self, question: &str, min: i64, max: i64) -> Option<i64> {
        self.say(question);
        loop {
            let line = self.read_line()?;
            if line.is_empty() {
                self.say("Empty input. Please enter a number.");
                continue;
            }
            match line.parse::<i64>() {
                Ok(n) if (min..=max).contains(&n) => return Some(n),
                _ => self.say(&format!(
                    "Invalid input. Please enter a whole number between {min} and {max}."
                )),
            }
        }
    }

    /// Numbered menu over `items`; returns the chosen index.
    pub(crate) fn choose(&mut self, heading: &str, items: &[String]) -> Option<usize> {
        if items.is_empty() {
            return None;
        }
        self.say(heading);
        for (i, item) in items.iter().enumerate() {
            self.say(&format!("  [{i}] {item}"));
        }
        self.number("Enter number:", 0, items.len() as i64 - 1)
            .map(|n| n as usize)
    }

    pub(crate) fn text(&mut self, question: &str) -> Option<String> {
        self.say(question);
        loop {
            let line = self.read_line()?;
            if !line.is_empty() {
                return Some(line);
            }
            self.say("Input cannot be empty.");
        }
    }

    fn midi_byte(&mut self, question: &str, min: i64, max: i64) -> Option<u8> {
        self.number(question, min, max).map(|n| n as u8)
    }

    /// Fills in message kind, channel and values for the selected control.
    /// Channels are asked 1-based and stored 0-based.
    pub(crate) fn configure_mapping(&mut self, mapping: &mut MappingConfig) -> Option<()> {
        if mapping.control.is_button {
            let kinds = ["Note On/Off".to_string(), "CC (Control Change)".to_string()];
            let kind = self.choose("Select MIDI message type for Button:", &kinds)?;
            mapping.midi_channel = self.midi_byte("Enter MIDI Channel (1-16):", 1, 16)? - 1;
            if kind == 0 {
                mapping.midi_message_type = MessageKind::NoteOnOff;
                mapping.midi_note_or_cc_number = self.midi_byte("Enter MIDI Note Number (0-127):", 0, 127)?;
                mapping.midi_value_note_on_velocity = self.midi_byte("Enter Note On Velocity (1-127):", 1, 127)?;
            } else {
                mapping.midi_message_type = MessageKind::ControlChange;
                mapping.midi_note_or_cc_number = self.midi_byte("Enter MIDI CC Number (0-127):", 0, 127)?;
                mapping.midi_value_cc_on =
                    self.midi_byte("Enter CC Value when Button Pressed (0-127):", 0, 127)?;
                mapping.midi_value_cc_off =
                    self.midi_byte("Enter CC Value when Button Released (0-127):", 0, 127)?;
            }
        } else {
            self.say("Mapping Axis/Value to MIDI CC.");
            mapping.midi_message_type = MessageKind::ControlChange;
            mapping.midi_channel = self.midi_byte("Enter MIDI Channel (1-16):", 1, 16)? - 1;
            mapping.midi_note_or_cc_number = self.midi_byte("Enter MIDI CC Number (0-127):", 0, 127)?;
            mapping.reverse_axis =
                self.number("Reverse MIDI output? (0=No: Min->0, Max->127 / 1=Yes):", 0, 1)? == 1;
        }
        Some(())
    }
}
