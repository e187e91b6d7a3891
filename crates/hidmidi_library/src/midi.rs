//! Control value to MIDI: message building, the mapping decision, send
//! spacing and the all-off sequence sent on shutdown.

use crate::error::MidiSendError;
use crate::mapping::{CalibrationState, MappingConfig, MessageKind};
use midly::live::LiveEvent;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error};

pub const CHANNEL_COUNT: u8 = 16;
pub const CC_ALL_SOUND_OFF: u8 = 120;
pub const CC_RESET_ALL_CONTROLLERS: u8 = 121;
pub const CC_ALL_NOTES_OFF: u8 = 123;
pub const RESET_MESSAGE_GAP: Duration = Duration::from_micros(500);
pub const SEND_FAILURE_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// The three channel-voice messages the mapper can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMessage {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
}

impl ChannelMessage {
    pub fn to_bytes(self) -> [u8; 3] {
        match self {
            ChannelMessage::NoteOn {
                channel,
                key,
                velocity,
            } => [0x90 | (channel & 0x0F), key & 0x7F, velocity & 0x7F],
            ChannelMessage::NoteOff { channel, key } => [0x80 | (channel & 0x0F), key & 0x7F, 0],
            ChannelMessage::ControlChange {
                channel,
                controller,
                value,
            } => [0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F],
        }
    }
}

/// An already-open MIDI output. Fire and forget: an error only says this one
/// message was dropped.
pub trait MidiSink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), MidiSendError>;
}

impl<S: MidiSink + ?Sized> MidiSink for &mut S {
    fn send(&mut self, bytes: &[u8]) -> Result<(), MidiSendError> {
        (**self).send(bytes)
    }
}

/// Collects every message, for tests and dry runs.
impl MidiSink for Vec<Vec<u8>> {
    fn send(&mut self, bytes: &[u8]) -> Result<(), MidiSendError> {
        self.push(bytes.to_vec());
        Ok(())
    }
}

/// Scales `raw` into 0..=127 using the calibrated range, rounding half up.
///
/// A zero-width range yields full scale at or above the calibrated value and
/// zero below it. Reversal mirrors the scaled value, so a reversed axis is
/// exactly `127 - forward` at every position.
pub fn axis_value(raw: i64, calibration: &CalibrationState, reverse: bool) -> u8 {
    let CalibrationState { min_raw, max_raw, .. } = *calibration;
    let normalized = if max_raw > min_raw {
        let clamped = raw.clamp(min_raw, max_raw);
        span(min_raw, clamped) / span(min_raw, max_raw)
    } else if raw >= max_raw {
        1.0
    } else {
        0.0
    };
    let value = (normalized * 127.0 + 0.5).clamp(0.0, 127.0) as u8;
    if reverse { 127 - value } else { value }
}

/// Distance from `lo` to `hi`, exact for any pair of `i64`.
pub(crate) fn span(lo: i64, hi: i64) -> f64 {
    (i128::from(hi) - i128::from(lo)) as f64
}

/// Decides what, if anything, a confirmed change turns into.
#[derive(Debug, Clone)]
pub struct MidiMapper {
    config: MappingConfig,
    previous_raw: i64,
    last_sent: Option<u8>,
}

impl MidiMapper {
    pub fn new(config: MappingConfig, initial_raw: i64) -> Self {
        Self {
            config,
            previous_raw: initial_raw,
            last_sent: None,
        }
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    pub fn previous_raw(&self) -> i64 {
        self.previous_raw
    }

    pub fn last_sent(&self) -> Option<u8> {
        self.last_sent
    }

    /// The message `raw` calls for, without side effects.
    pub fn evaluate(&self, raw: i64) -> Option<ChannelMessage> {
        let cfg = &self.config;
        let channel = cfg.midi_channel;
        let number = cfg.midi_note_or_cc_number;

        if cfg.control.is_button {
            let pressed = raw != 0;
            if pressed == (self.previous_raw != 0) {
                return None;
            }
            // Edge-gated even when the CC on and off values are equal.
            return match cfg.midi_message_type {
                MessageKind::NoteOnOff if pressed => Some(ChannelMessage::NoteOn {
                    channel,
                    key: number,
                    velocity: cfg.midi_value_note_on_velocity,
                }),
                MessageKind::NoteOnOff => Some(ChannelMessage::NoteOff { channel, key: number }),
                MessageKind::ControlChange => Some(ChannelMessage::ControlChange {
                    channel,
                    controller: number,
                    value: if pressed {
                        cfg.midi_value_cc_on
                    } else {
                        cfg.midi_value_cc_off
                    },
                }),
                MessageKind::None => None,
            };
        }

        if cfg.midi_message_type != MessageKind::ControlChange || !cfg.calibration.done {
            return None;
        }
        let value = axis_value(raw, &cfg.calibration, cfg.reverse_axis);
        if self.last_sent == Some(value) {
            return None;
        }
        Some(ChannelMessage::ControlChange {
            channel,
            controller: number,
            value,
        })
    }

    /// Evaluates `raw`, sends the resulting message if any and advances the
    /// mapper. `raw` becomes the previous value even when the send fails; the
    /// last sent axis value only moves on success.
    pub fn process<S>(&mut self, raw: i64, sink: &mut S) -> Result<Option<ChannelMessage>, MidiSendError>
    where
        S: MidiSink + ?Sized,
    {
        let message = self.evaluate(raw);
        self.previous_raw = raw;

        let Some(message) = message else {
            return Ok(None);
        };
        let bytes = message.to_bytes();
        sink.send(&bytes)?;
        debug!(raw, event = ?LiveEvent::parse(&bytes).ok(), "sent MIDI");

        self.last_sent = match message {
            ChannelMessage::ControlChange { value, .. } if !self.config.control.is_button => Some(value),
            _ => None,
        };
        Ok(Some(message))
    }
}

/// Minimum spacing between two sends. Only real sends are stamped, so a
/// change that produced no message never delays the next one.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn ready(&self, now: Instant) -> bool {
        match self.last {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

/// Keeps a dead output from flooding the log: one report per window, with a
/// count of what was swallowed in between.
#[derive(Debug)]
pub struct SendFailureThrottle {
    window: Duration,
    last_report: Option<Instant>,
    suppressed: u64,
}

impl Default for SendFailureThrottle {
    fn default() -> Self {
        Self::new(SEND_FAILURE_REPORT_INTERVAL)
    }
}

impl SendFailureThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_report: None,
            suppressed: 0,
        }
    }

    /// Returns true when the failure was logged.
    pub fn report(&mut self, now: Instant, err: &MidiSendError) -> bool {
        let due = self
            .last_report
            .is_none_or(|last| now.saturating_duration_since(last) >= self.window);
        if !due {
            self.suppressed += 1;
            return false;
        }
        error!(suppressed = self.suppressed, "{err}");
        self.last_report = Some(now);
        self.suppressed = 0;
        true
    }
}

/// All sound off, reset all controllers and all notes off on every channel.
/// Errors are ignored; this runs while tearing down.
pub fn send_reset_sequence<S: MidiSink + ?Sized>(sink: &mut S, gap: Duration) {
    for channel in 0..CHANNEL_COUNT {
        for controller in [CC_ALL_SOUND_OFF, CC_RESET_ALL_CONTROLLERS, CC_ALL_NOTES_OFF] {
            let message = ChannelMessage::ControlChange {
                channel,
                controller,
                value: 0,
            };
            let _ = sink.send(&message.to_bytes());
            if !gap.is_zero() {
                thread::sleep(gap);
            }
        }
    }
    debug!("sent MIDI reset sequence");
}

/// Sends the reset sequence when dropped, including during unwinding.
pub struct ResetOnDrop<S: MidiSink> {
    sink: S,
    gap: Duration,
}

impl<S: MidiSink> ResetOnDrop<S> {
    pub fn new(sink: S) -> Self {
        Self::with_gap(sink, RESET_MESSAGE_GAP)
    }

    pub fn with_gap(sink: S, gap: Duration) -> Self {
        Self { sink, gap }
    }

    pub fn sink(&mut self) -> &mut S {
        &mut self.sink
    }
}

impl<S: MidiSink> Drop for ResetOnDrop<S> {
    fn drop(&mut self) {
        send_reset_sequence(&mut self.sink, self.gap);
    }
}
