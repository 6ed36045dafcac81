//! Output timeline shared by the scheduler and the render thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the current playback position, in seconds since the output path opened.
pub trait OutputClock: Send + Sync {
    fn current_time(&self) -> f64;
}

/// Clock driven by the number of frames committed to the playback device.
#[derive(Debug)]
pub struct DeviceClock {
    sample_rate: u32,
    frames: AtomicU64,
}

impl DeviceClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frames: AtomicU64::new(0),
        }
    }

    /// Frames committed so far; the next period starts here.
    pub fn position(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }
}

impl OutputClock for DeviceClock {
    fn current_time(&self) -> f64 {
        self.position() as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
pub mod testing {
    use super::OutputClock;
    use std::sync::Mutex;

    /// Clock the test moves by hand.
    #[derive(Debug, Default)]
    pub struct ManualClock {
        now: Mutex<f64>,
    }

    impl ManualClock {
        pub fn at(seconds: f64) -> Self {
            Self { now: Mutex::new(seconds) }
        }

        pub fn set(&self, seconds: f64) {
            *self.now.lock().unwrap() = seconds;
        }
    }

    impl OutputClock for ManualClock {
        fn current_time(&self) -> f64 {
            *self.now.lock().unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_clock_counts_committed_frames() {
        let clock = DeviceClock::new(24000);
        assert_eq!(clock.current_time(), 0.0);
        clock.advance(12000);
        assert_eq!(clock.position(), 12000);
        assert!((clock.current_time() - 0.5).abs() < 1e-12);
        clock.advance(12000);
        assert!((clock.current_time() - 1.0).abs() < 1e-12);
    }
}
