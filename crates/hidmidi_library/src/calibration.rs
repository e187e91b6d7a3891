//! Interactive two-stage range capture for analog controls.
//!
//! The user is given a countdown, then holds the control at one extreme while
//! the engine watches the live value. The same is repeated for the other
//! extreme. Waits run against a deadline in short sleep slices so a quit
//! request is seen quickly, and a caller-supplied pump runs on every slice so
//! single-threaded input sources keep delivering samples.

use crate::controls::ControlDescriptor;
use crate::error::CalibrationError;
use crate::mapping::CalibrationState;
use crate::runtime::RuntimeState;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    Idle,
    CountdownMin,
    HoldMin,
    CountdownMax,
    HoldMax,
    Done,
    Aborted,
}

impl CalibrationPhase {
    pub fn is_min_stage(self) -> bool {
        matches!(self, CalibrationPhase::CountdownMin | CalibrationPhase::HoldMin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationTiming {
    pub countdown: Duration,
    pub hold: Duration,
    /// Display refresh period; also the countdown sleep slice.
    pub refresh: Duration,
    /// Sleep between two looks at the live value while holding.
    pub poll: Duration,
}

impl Default for CalibrationTiming {
    fn default() -> Self {
        Self {
            countdown: Duration::from_secs(5),
            hold: Duration::from_secs(10),
            refresh: Duration::from_millis(100),
            poll: Duration::from_millis(5),
        }
    }
}

/// Progress and notices reported to whoever draws the calibration screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationEvent {
    Countdown {
        phase: CalibrationPhase,
        remaining_secs: u64,
    },
    Hold {
        phase: CalibrationPhase,
        remaining_secs: u64,
        current: i64,
        extreme: i64,
    },
    Captured {
        phase: CalibrationPhase,
        value: i64,
    },
    NoSignal {
        phase: CalibrationPhase,
        fallback: i64,
    },
    Swapped {
        min: i64,
        max: i64,
    },
    Degenerate {
        value: i64,
    },
}

impl CalibrationState {
    /// Final state from the two captured extremes. An inverted pair is
    /// swapped. An equal pair is accepted as a constant mapping.
    pub fn from_extremes(min_raw: i64, max_raw: i64) -> Self {
        let (min_raw, max_raw) = if min_raw > max_raw {
            (max_raw, min_raw)
        } else {
            (min_raw, max_raw)
        };
        Self {
            min_raw,
            max_raw,
            done: true,
        }
    }
}

pub struct CalibrationEngine<'a> {
    runtime: &'a RuntimeState,
    timing: CalibrationTiming,
    phase: CalibrationPhase,
}

impl<'a> CalibrationEngine<'a> {
    pub fn new(runtime: &'a RuntimeState) -> Self {
        Self::with_timing(runtime, CalibrationTiming::default())
    }

    pub fn with_timing(runtime: &'a RuntimeState, timing: CalibrationTiming) -> Self {
        Self {
            runtime,
            timing,
            phase: CalibrationPhase::Idle,
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    /// Runs both stages for `control`.
    ///
    /// Buttons need no calibration: the default (not done) state is returned
    /// and nothing is waited for. On a quit request the engine ends in
    /// `Aborted` and no state is returned, so a partially captured range can
    /// never be stored as done.
    pub fn run<P, O>(
        &mut self,
        control: &ControlDescriptor,
        mut pump: P,
        mut observer: O,
    ) -> Result<CalibrationState, CalibrationError>
    where
        P: FnMut(CalibrationPhase),
        O: FnMut(&CalibrationEvent),
    {
        if control.is_button {
            return Ok(CalibrationState::default());
        }
        info!(control = %control.name, "calibration started");

        let result = self.run_stages(&mut pump, &mut observer);
        if result.is_err() {
            self.phase = CalibrationPhase::Aborted;
            info!("calibration aborted");
        }
        result
    }

    fn run_stages(
        &mut self,
        pump: &mut dyn FnMut(CalibrationPhase),
        observer: &mut dyn FnMut(&CalibrationEvent),
    ) -> Result<CalibrationState, CalibrationError> {
        self.enter(CalibrationPhase::CountdownMin);
        self.countdown(pump, observer)?;
        self.enter(CalibrationPhase::HoldMin);
        let min_raw = self.hold(pump, observer, i64::min)?;

        self.enter(CalibrationPhase::CountdownMax);
        self.countdown(pump, observer)?;
        self.enter(CalibrationPhase::HoldMax);
        let max_raw = self.hold(pump, observer, i64::max)?;

        let state = CalibrationState::from_extremes(min_raw, max_raw);
        if min_raw > max_raw {
            info!(min = state.min_raw, max = state.max_raw, "captured range was inverted, swapped");
            observer(&CalibrationEvent::Swapped {
                min: state.min_raw,
                max: state.max_raw,
            });
        } else if state.is_degenerate() {
            warn!(value = state.min_raw, "calibrated min and max are equal, output will be constant");
            observer(&CalibrationEvent::Degenerate { value: state.min_raw });
        }

        self.enter(CalibrationPhase::Done);
        info!(min = state.min_raw, max = state.max_raw, "calibration complete");
        Ok(state)
    }

    fn enter(&mut self, phase: CalibrationPhase) {
        debug!(from = ?self.phase, to = ?phase, "calibration phase");
        self.phase = phase;
    }

    fn check_quit(&self) -> Result<(), CalibrationError> {
        if self.runtime.quit_requested() {
            return Err(CalibrationError::Aborted);
        }
        Ok(())
    }

    fn countdown(
        &self,
        pump: &mut dyn FnMut(CalibrationPhase),
        observer: &mut dyn FnMut(&CalibrationEvent),
    ) -> Result<(), CalibrationError> {
        let deadline = Instant::now() + self.timing.countdown;
        let mut shown = None;
        loop {
            self.check_quit()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            pump(self.phase);

            let remaining_secs = remaining.as_millis().div_ceil(1000) as u64;
            if shown != Some(remaining_secs) {
                observer(&CalibrationEvent::Countdown {
                    phase: self.phase,
                    remaining_secs,
                });
                shown = Some(remaining_secs);
            }
            thread::sleep(self.timing.refresh.min(remaining));
        }
    }

    /// Watches the live value until the hold deadline and folds every change
    /// into the running extreme with `pick`.
    fn hold(
        &self,
        pump: &mut dyn FnMut(CalibrationPhase),
        observer: &mut dyn FnMut(&CalibrationEvent),
        pick: fn(i64, i64) -> i64,
    ) -> Result<i64, CalibrationError> {
        let before = self.runtime.current();
        self.runtime.clear_change();

        let deadline = Instant::now() + self.timing.hold;
        let mut next_refresh = Instant::now();
        let mut extreme: Option<i64> = None;
        let mut last_read = before;

        loop {
            self.check_quit()?;
            let now = Instant::now();
            let remaining = deadline.saturating_duration_since(now);
            if remaining.is_zero() {
                break;
            }
            pump(self.phase);

            if self.runtime.take_change() {
                last_read = self.runtime.current();
                extreme = Some(extreme.map_or(last_read, |e| pick(e, last_read)));
            }

            if now >= next_refresh {
                next_refresh = now + self.timing.refresh;
                observer(&CalibrationEvent::Hold {
                    phase: self.phase,
                    remaining_secs: ((remaining.as_millis() + 500) / 1000) as u64,
                    current: last_read,
                    extreme: extreme.unwrap_or(last_read),
                });
            }
            thread::sleep(self.timing.poll.min(remaining));
        }

        let value = match extreme {
            Some(value) => value,
            None => {
                warn!(phase = ?self.phase, fallback = before, "no input change during hold, using value from before the hold");
                observer(&CalibrationEvent::NoSignal {
                    phase: self.phase,
                    fallback: before,
                });
                before
            }
        };
        observer(&CalibrationEvent::Captured {
            phase: self.phase,
            value,
        });
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::HidUsage;

    const FAST: CalibrationTiming = CalibrationTiming {
        countdown: Duration::from_millis(4),
        hold: Duration::from_millis(10),
        refresh: Duration::from_millis(2),
        poll: Duration::from_millis(1),
    };

    fn axis() -> ControlDescriptor {
        ControlDescriptor::axis(HidUsage::new(0x01, 0x30), 0, 1023)
    }

    #[test]
    fn inverted_capture_is_swapped() {
        let runtime = RuntimeState::new(500);
        let mut events = Vec::new();
        let mut engine = CalibrationEngine::with_timing(&runtime, FAST);

        let state = engine
            .run(
                &axis(),
                |phase| match phase {
                    CalibrationPhase::HoldMin => {
                        runtime.record_sample(800);
                    }
                    CalibrationPhase::HoldMax => {
                        runtime.record_sample(200);
                    }
                    _ => {}
                },
                |event| events.push(event.clone()),
            )
            .unwrap();

        assert_eq!(
            state,
            CalibrationState {
                min_raw: 200,
                max_raw: 800,
                done: true
            }
        );
        assert_eq!(engine.phase(), CalibrationPhase::Done);
        assert!(events.contains(&CalibrationEvent::Swapped { min: 200, max: 800 }));
    }

    #[test]
    fn running_extremes_are_tracked() {
        let runtime = RuntimeState::new(500);
        let mut low = [40, 10, 30].into_iter();
        let mut high = [950, 1010, 990].into_iter();
        let timing = CalibrationTiming {
            hold: Duration::from_millis(200),
            ..FAST
        };
        let mut engine = CalibrationEngine::with_timing(&runtime, timing);

        let state = engine
            .run(
                &axis(),
                |phase| {
                    let next = match phase {
                        CalibrationPhase::HoldMin => low.next(),
                        CalibrationPhase::HoldMax => high.next(),
                        _ => None,
                    };
                    if let Some(value) = next {
                        runtime.record_sample(value);
                    }
                },
                |_| {},
            )
            .unwrap();

        assert_eq!((state.min_raw, state.max_raw), (10, 1010));
        assert!(state.done);
    }

    #[test]
    fn silent_hold_falls_back_to_prior_value() {
        let runtime = RuntimeState::new(500);
        // A change raised before the hold must not count as a capture.
        runtime.mark_changed();
        let mut events = Vec::new();

        let state = CalibrationEngine::with_timing(&runtime, FAST)
            .run(&axis(), |_| {}, |event| events.push(event.clone()))
            .unwrap();

        assert_eq!((state.min_raw, state.max_raw), (500, 500));
        assert!(state.done);
        assert!(events.contains(&CalibrationEvent::NoSignal {
            phase: CalibrationPhase::HoldMin,
            fallback: 500
        }));
        assert!(events.contains(&CalibrationEvent::Degenerate { value: 500 }));
    }

    #[test]
    fn slow_pump_does_not_stretch_the_hold() {
        let runtime = RuntimeState::new(500);
        let timing = CalibrationTiming {
            hold: Duration::from_millis(30),
            ..FAST
        };
        let started = Instant::now();
        let mut pumps = 0;

        CalibrationEngine::with_timing(&runtime, timing)
            .run(
                &axis(),
                |phase| {
                    if matches!(phase, CalibrationPhase::HoldMin | CalibrationPhase::HoldMax) {
                        pumps += 1;
                        thread::sleep(Duration::from_millis(20));
                    }
                },
                |_| {},
            )
            .unwrap();

        assert!(pumps <= 8, "{pumps} pumps");
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn quit_aborts_without_result() {
        let runtime = RuntimeState::new(500);
        let mut engine = CalibrationEngine::with_timing(&runtime, FAST);

        let result = engine.run(
            &axis(),
            |phase| {
                if phase == CalibrationPhase::HoldMax {
                    runtime.request_quit();
                }
            },
            |_| {},
        );

        assert_eq!(result, Err(CalibrationError::Aborted));
        assert_eq!(engine.phase(), CalibrationPhase::Aborted);
    }

    #[test]
    fn quit_during_countdown_stops_immediately() {
        let runtime = RuntimeState::new(0);
        runtime.request_quit();
        let mut pumped = 0;
        let mut engine = CalibrationEngine::new(&runtime);

        let result = engine.run(&axis(), |_| pumped += 1, |_| {});
        assert_eq!(result, Err(CalibrationError::Aborted));
        assert_eq!(pumped, 0);
    }

    #[test]
    fn buttons_skip_calibration() {
        let runtime = RuntimeState::new(0);
        let mut engine = CalibrationEngine::new(&runtime);
        let state = engine
            .run(&ControlDescriptor::button(HidUsage::new(0x09, 1)), |_| {}, |_| {})
            .unwrap();
        assert!(!state.done);
        assert_eq!(engine.phase(), CalibrationPhase::Idle);
    }

    #[test]
    fn countdown_reports_each_second_once() {
        let runtime = RuntimeState::new(0);
        let timing = CalibrationTiming {
            countdown: Duration::from_millis(3),
            refresh: Duration::from_millis(1),
            ..FAST
        };
        let mut shown = Vec::new();
        CalibrationEngine::with_timing(&runtime, timing)
            .run(&axis(), |_| {}, |event| {
                if let CalibrationEvent::Countdown { phase, remaining_secs } = event {
                    shown.push((*phase, *remaining_secs));
                }
            })
            .unwrap();
        assert_eq!(
            shown,
            [(CalibrationPhase::CountdownMin, 1), (CalibrationPhase::CountdownMax, 1)]
        );
    }
}
