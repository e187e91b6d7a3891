//! The dispatch loop that runs once setup is complete.

use crate::mapping::MappingConfig;
use crate::midi::{ChannelMessage, MidiMapper, MidiSink, RateLimiter, ResetOnDrop, SendFailureThrottle};
use crate::runtime::RuntimeState;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const DEFAULT_DISPLAY_FPS: u32 = 60;
pub const TICK_SLEEP: Duration = Duration::from_millis(1);

/// What the display is asked to draw on a frame.
#[derive(Debug, Clone, Copy)]
pub struct StatusSnapshot<'a> {
    pub mapping: &'a MappingConfig,
    pub raw: i64,
    pub last_sent: Option<u8>,
}

pub trait DisplaySink {
    fn render(&mut self, snapshot: &StatusSnapshot<'_>);
}

impl<F> DisplaySink for F
where
    F: FnMut(&StatusSnapshot<'_>),
{
    fn render(&mut self, snapshot: &StatusSnapshot<'_>) {
        self(snapshot)
    }
}

/// Polls the shared state at its own cadence: the display at the frame rate,
/// MIDI whenever a change is pending and the send interval allows it.
pub struct MonitorLoop<'a> {
    runtime: &'a RuntimeState,
    mapper: MidiMapper,
    limiter: RateLimiter,
    failures: SendFailureThrottle,
    frame: Duration,
    last_frame: Option<Instant>,
}

impl<'a> MonitorLoop<'a> {
    /// Starts from the value currently held by `runtime` and flags it as
    /// changed so the first tick pushes it out.
    pub fn new(runtime: &'a RuntimeState, mapping: MappingConfig, display_fps: u32) -> Self {
        let limiter = RateLimiter::new(mapping.send_interval());
        let mapper = MidiMapper::new(mapping, runtime.current());
        runtime.mark_changed();
        Self {
            runtime,
            mapper,
            limiter,
            failures: SendFailureThrottle::default(),
            frame: Duration::from_secs(1) / display_fps.max(1),
            last_frame: None,
        }
    }

    pub fn mapper(&self) -> &MidiMapper {
        &self.mapper
    }

    /// One pass of the loop. Returns the message sent on this tick, if any.
    ///
    /// A change that arrives while the interval has not elapsed stays pending
    /// and is evaluated later against whatever the value is by then.
    pub fn tick<S, D>(&mut self, now: Instant, sink: &mut S, display: &mut D) -> Option<ChannelMessage>
    where
        S: MidiSink + ?Sized,
        D: DisplaySink + ?Sized,
    {
        let frame_due = self
            .last_frame
            .is_none_or(|last| now.saturating_duration_since(last) >= self.frame);
        if frame_due {
            display.render(&StatusSnapshot {
                mapping: self.mapper.config(),
                raw: self.runtime.current(),
                last_sent: self.mapper.last_sent(),
            });
            self.last_frame = Some(now);
        }

        if !self.limiter.ready(now) || !self.runtime.take_change() {
            return None;
        }

        let raw = self.runtime.current();
        match self.mapper.process(raw, sink) {
            Ok(Some(message)) => {
                self.limiter.record(now);
                Some(message)
            }
            Ok(None) => None,
            Err(err) => {
                self.failures.report(now, &err);
                None
            }
        }
    }

    /// Runs until the quit flag is raised. `pump` is called at the top of
    /// every iteration for input sources that need servicing on this thread.
    ///
    /// The reset sequence goes out on every exit path, panics included.
    pub fn run<S, D, P>(&mut self, sink: S, display: &mut D, mut pump: P)
    where
        S: MidiSink,
        D: DisplaySink + ?Sized,
        P: FnMut(),
    {
        info!(interval = ?self.limiter.interval(), "monitoring started");
        let mut guard = ResetOnDrop::new(sink);

        while !self.runtime.quit_requested() {
            pump();
            if self.runtime.quit_requested() {
                break;
            }
            self.tick(Instant::now(), guard.sink(), display);
            thread::sleep(TICK_SLEEP);
        }

        debug!("monitoring stopping, resetting MIDI output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::{ControlDescriptor, HidUsage};
    use crate::mapping::{CalibrationState, MessageKind};

    fn axis_mapping(interval_ms: i64) -> MappingConfig {
        let mut cfg = MappingConfig::new("dev", ControlDescriptor::axis(HidUsage::new(0x01, 0x30), 0, 1000));
        cfg.midi_message_type = MessageKind::ControlChange;
        cfg.midi_note_or_cc_number = 1;
        cfg.calibration = CalibrationState {
            min_raw: 0,
            max_raw: 1000,
            done: true,
        };
        cfg.midi_send_interval_ms = interval_ms;
        cfg
    }

    fn no_display(_: &StatusSnapshot<'_>) {}

    #[derive(Default)]
    struct Frames(Vec<i64>);

    impl DisplaySink for Frames {
        fn render(&mut self, snapshot: &StatusSnapshot<'_>) {
            self.0.push(snapshot.raw);
        }
    }

    #[test]
    fn initial_value_is_pushed_out() {
        let runtime = RuntimeState::new(1000);
        let mut monitor = MonitorLoop::new(&runtime, axis_mapping(1), 60);
        let mut sink: Vec<Vec<u8>> = Vec::new();

        let sent = monitor.tick(Instant::now(), &mut sink, &mut no_display);
        assert!(sent.is_some());
        assert_eq!(sink, [vec![0xB0, 1, 127]]);
    }

    #[test]
    fn changes_inside_the_interval_are_deferred_not_dropped() {
        let runtime = RuntimeState::new(0);
        let mut monitor = MonitorLoop::new(&runtime, axis_mapping(10), 60);
        let mut sink: Vec<Vec<u8>> = Vec::new();
        let t0 = Instant::now();

        monitor.tick(t0, &mut sink, &mut no_display);
        assert_eq!(sink.len(), 1);

        runtime.record_sample(500);
        monitor.tick(t0 + Duration::from_millis(5), &mut sink, &mut no_display);
        runtime.record_sample(1000);
        monitor.tick(t0 + Duration::from_millis(7), &mut sink, &mut no_display);
        assert_eq!(sink.len(), 1);
        assert!(runtime.has_pending_change());

        monitor.tick(t0 + Duration::from_millis(10), &mut sink, &mut no_display);
        assert_eq!(sink, [vec![0xB0, 1, 0], vec![0xB0, 1, 127]]);
        assert!(!runtime.has_pending_change());
    }

    #[test]
    fn unchanged_value_sends_nothing() {
        let runtime = RuntimeState::new(0);
        let mut monitor = MonitorLoop::new(&runtime, axis_mapping(1), 60);
        let mut sink: Vec<Vec<u8>> = Vec::new();
        let t0 = Instant::now();
        for ms in 0..20 {
            monitor.tick(t0 + Duration::from_millis(ms), &mut sink, &mut no_display);
        }
        assert_eq!(sink.len(), 1);

        // A raw change too small to move the MIDI value.
        runtime.record_sample(1);
        monitor.tick(t0 + Duration::from_millis(30), &mut sink, &mut no_display);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn display_runs_at_frame_rate() {
        let runtime = RuntimeState::new(0);
        let mut monitor = MonitorLoop::new(&runtime, axis_mapping(1), 10);
        let mut frames = Frames::default();
        let mut sink: Vec<Vec<u8>> = Vec::new();
        let t0 = Instant::now();

        for ms in [0, 50, 99, 100, 150, 200] {
            monitor.tick(t0 + Duration::from_millis(ms), &mut sink, &mut frames);
        }
        assert_eq!(frames.0.len(), 3);
    }

    #[test]
    fn run_resets_output_on_quit() {
        let runtime = RuntimeState::new(0);
        let mut monitor = MonitorLoop::new(&runtime, axis_mapping(1), 60);
        let mut sink: Vec<Vec<u8>> = Vec::new();
        let mut passes = 0;

        monitor.run(&mut sink, &mut no_display, || {
            passes += 1;
            if passes == 3 {
                runtime.request_quit();
            }
        });

        assert_eq!(sink.first(), Some(&vec![0xB0, 1, 0]));
        assert_eq!(sink.len(), 1 + 48);
        assert_eq!(sink.last(), Some(&vec![0xBF, 123, 0]));
    }
}
