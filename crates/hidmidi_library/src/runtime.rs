//! Sampling state shared between the input side and the dispatch side.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Live value of the selected control plus the process-wide quit flag.
///
/// The sampling path writes, the monitor or calibration reads. Everything in
/// here is a scalar atomic, so one side never observes a half-written update.
#[derive(Debug, Default)]
pub struct RuntimeState {
    current: AtomicI64,
    changed: AtomicBool,
    quit: AtomicBool,
}

impl RuntimeState {
    pub fn new(initial: i64) -> Self {
        Self {
            current: AtomicI64::new(initial),
            changed: AtomicBool::new(false),
            quit: AtomicBool::new(false),
        }
    }

    /// Stores a freshly decoded value. Returns true when it differs from the
    /// stored one, in which case the change flag is raised.
    pub fn record_sample(&self, value: i64) -> bool {
        let previous = self.current.swap(value, Ordering::AcqRel);
        if previous == value {
            return false;
        }
        self.changed.store(true, Ordering::Release);
        true
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Acquire)
    }

    /// Test-and-clear of the change flag. A change is handed out once.
    pub fn take_change(&self) -> bool {
        self.changed.swap(false, Ordering::AcqRel)
    }

    pub fn has_pending_change(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    /// Forces the next `take_change` to succeed, e.g. to push the initial
    /// value out when monitoring starts.
    pub fn mark_changed(&self) {
        self.changed.store(true, Ordering::Release);
    }

    pub fn clear_change(&self) {
        self.changed.store(false, Ordering::Release);
    }

    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn identical_samples_report_once() {
        let state = RuntimeState::new(0);
        assert!(!state.record_sample(0));
        assert!(!state.take_change());

        assert!(state.record_sample(5));
        assert!(!state.record_sample(5));
        assert!(state.take_change());
        assert!(!state.take_change());
        assert_eq!(state.current(), 5);
    }

    #[test]
    fn pending_change_survives_until_taken() {
        let state = RuntimeState::new(10);
        state.record_sample(11);
        state.record_sample(12);
        assert!(state.has_pending_change());
        assert!(state.take_change());
        assert_eq!(state.current(), 12);
    }

    #[test]
    fn quit_is_visible_across_threads() {
        let state = Arc::new(RuntimeState::new(0));
        let writer = Arc::clone(&state);
        thread::spawn(move || {
            writer.record_sample(42);
            writer.request_quit();
        })
        .join()
        .unwrap();

        assert!(state.quit_requested());
        assert!(state.take_change());
        assert_eq!(state.current(), 42);
    }

    proptest! {
        #[test]
        fn change_iff_sample_differs(initial in -3i64..3, samples in prop::collection::vec(-3i64..3, 0..64)) {
            let state = RuntimeState::new(initial);
            let mut previous = initial;
            for sample in samples {
                state.record_sample(sample);
                prop_assert_eq!(state.take_change(), sample != previous);
                previous = sample;
            }
        }
    }
}
