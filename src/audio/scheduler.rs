//! Gapless playback scheduling against a single output clock.
//!
//! Each incoming segment starts where the previous one ends, or "now" if the
//! timeline has fallen behind. An interruption drops every pending segment and
//! rewinds the timeline so the next segment starts immediately.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::clock::OutputClock;
use super::codec::AudioFrame;

/// Token for one scheduled segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    pub id: u64,
    /// Start on the output timeline, in seconds.
    pub start_time: f64,
    pub duration: f64,
}

impl PlaybackHandle {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

struct Segment {
    handle: PlaybackHandle,
    frame: AudioFrame,
}

pub struct PlaybackScheduler {
    clock: Arc<dyn OutputClock>,
    next_start_time: f64,
    /// Only segments that have not finished. Keyed by handle id, so iteration is arrival order.
    active: BTreeMap<u64, Segment>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(clock: Arc<dyn OutputClock>) -> Self {
        Self {
            clock,
            next_start_time: 0.0,
            active: BTreeMap::new(),
            next_id: 1,
        }
    }

    #[cfg(test)]
    pub fn current_time(&self) -> f64 {
        self.clock.current_time()
    }

    #[cfg(test)]
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Place `frame` right after the previously scheduled segment.
    pub fn schedule(&mut self, frame: AudioFrame) -> PlaybackHandle {
        let now = self.clock.current_time();
        self.reap_at(now);

        let start_time = self.next_start_time.max(now);
        let duration = frame.duration();
        self.next_start_time = start_time + duration;

        let handle = PlaybackHandle {
            id: self.next_id,
            start_time,
            duration,
        };
        self.next_id += 1;

        log::debug!(
            "Scheduled segment #{} at {:.3}s for {:.3}s (now {:.3}s)",
            handle.id,
            start_time,
            duration,
            now
        );

        self.active.insert(handle.id, Segment { handle, frame });
        handle
    }

    /// Stop everything pending or playing and rewind the timeline.
    /// Returns how many segments were cut off; zero on an empty set.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        self.active.clear();
        self.next_start_time = 0.0;
        if stopped > 0 {
            log::info!("Playback interrupted, {} segment(s) discarded", stopped);
        }
        stopped
    }

    /// Drop segments that have played to the end.
    pub fn reap(&mut self) -> usize {
        let now = self.clock.current_time();
        self.reap_at(now)
    }

    fn reap_at(&mut self, now: f64) -> usize {
        let before = self.active.len();
        self.active.retain(|_, seg| seg.handle.end_time() > now);
        before - self.active.len()
    }

    #[cfg(test)]
    pub fn is_active(&self, handle: &PlaybackHandle) -> bool {
        self.active.contains_key(&handle.id)
    }

    #[cfg(test)]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Mix active segments into `out`, covering device frames
    /// `[position, position + out.len())` at `out_rate`.
    pub fn render(&mut self, out: &mut [f32], position: u64, out_rate: u32) {
        out.fill(0.0);
        if out_rate == 0 || out.is_empty() {
            return;
        }
        let window_end = position + out.len() as u64;

        for seg in self.active.values() {
            let seg_frames = seg.frame.frames() as u64;
            let seg_rate = seg.frame.sample_rate as u64;
            if seg_frames == 0 || seg_rate == 0 {
                continue;
            }

            let first = (seg.handle.start_time * out_rate as f64).round() as u64;
            let span = seg_frames * out_rate as u64 / seg_rate;
            let last = first + span;
            if last <= position || first >= window_end {
                continue;
            }

            let from = first.max(position);
            let to = last.min(window_end);
            for device_frame in from..to {
                let rel = device_frame - first;
                let src = if seg_rate == out_rate as u64 {
                    rel
                } else {
                    rel * seg_rate / out_rate as u64
                };
                let idx = (device_frame - position) as usize;
                out[idx] += seg.frame.mono_sample(src as usize);
            }
        }

        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::clock::testing::ManualClock;

    fn segment(seconds: f64) -> AudioFrame {
        let frames = (24000.0 * seconds).round() as usize;
        AudioFrame::new(24000, 1, vec![0.25; frames])
    }

    fn scheduler_at(now: f64) -> (Arc<ManualClock>, PlaybackScheduler) {
        let clock = Arc::new(ManualClock::at(now));
        let scheduler = PlaybackScheduler::new(clock.clone());
        (clock, scheduler)
    }

    #[test]
    fn segments_are_back_to_back() {
        let (_clock, mut sched) = scheduler_at(2.0);
        let durations = [0.5, 0.25, 1.0, 0.125];
        let mut expected = 2.0;
        for d in durations {
            let handle = sched.schedule(segment(d));
            assert!((handle.start_time - expected).abs() < 1e-9);
            expected += d;
        }
        assert!((sched.next_start_time() - expected).abs() < 1e-9);
        assert_eq!(sched.active_len(), durations.len());
    }

    #[test]
    fn late_segment_starts_now_instead_of_in_the_past() {
        let (clock, mut sched) = scheduler_at(0.0);
        sched.schedule(segment(0.5));
        clock.set(3.0);
        let handle = sched.schedule(segment(0.5));
        assert!((handle.start_time - 3.0).abs() < 1e-9);
    }

    #[test]
    fn finished_segments_leave_the_active_set() {
        let (clock, mut sched) = scheduler_at(0.0);
        let a = sched.schedule(segment(0.5));
        let b = sched.schedule(segment(0.5));
        clock.set(0.75);
        assert_eq!(sched.reap(), 1);
        assert!(!sched.is_active(&a));
        assert!(sched.is_active(&b));
        clock.set(1.0);
        sched.reap();
        assert_eq!(sched.active_len(), 0);
    }

    #[test]
    fn interrupt_on_empty_set_is_a_no_op() {
        let (_clock, mut sched) = scheduler_at(1.0);
        assert_eq!(sched.interrupt(), 0);
        assert_eq!(sched.next_start_time(), 0.0);
        assert_eq!(sched.active_len(), 0);
    }

    #[test]
    fn barge_in_discards_pending_audio() {
        let (clock, mut sched) = scheduler_at(0.0);
        let long = sched.schedule(segment(1.0));
        assert!((long.end_time() - 1.0).abs() < 1e-9);

        clock.set(0.3);
        assert_eq!(sched.interrupt(), 1);
        assert_eq!(sched.active_len(), 0);
        assert_eq!(sched.next_start_time(), 0.0);

        let next = sched.schedule(segment(0.5));
        assert!((next.start_time - 0.3).abs() < 1e-9, "started at {}", next.start_time);
        assert!((sched.next_start_time() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn render_places_samples_on_the_timeline() {
        let (_clock, mut sched) = scheduler_at(0.0);
        // 10 frames of silence gap via start offset: schedule at 0, then a marked segment
        sched.schedule(AudioFrame::new(24000, 1, vec![0.0; 10]));
        sched.schedule(AudioFrame::new(24000, 1, vec![0.5; 4]));

        let mut out = vec![1.0f32; 16];
        sched.render(&mut out, 0, 24000);
        assert!(out[..10].iter().all(|&s| s == 0.0));
        assert!(out[10..14].iter().all(|&s| s == 0.5));
        assert!(out[14..].iter().all(|&s| s == 0.0));

        // Second window continues where the first stopped
        let mut out = vec![0.0f32; 8];
        sched.render(&mut out, 12, 24000);
        assert_eq!(&out[..2], &[0.5, 0.5]);
        assert!(out[2..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn render_resamples_to_the_device_rate() {
        let (_clock, mut sched) = scheduler_at(0.0);
        sched.schedule(AudioFrame::new(24000, 1, vec![0.1, 0.2, 0.3]));
        let mut out = vec![0.0f32; 8];
        sched.render(&mut out, 0, 48000);
        assert_eq!(&out[..6], &[0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
        assert_eq!(&out[6..], &[0.0, 0.0]);
    }

    #[test]
    fn interrupted_segments_are_never_rendered() {
        let (_clock, mut sched) = scheduler_at(0.0);
        sched.schedule(segment(0.1));
        sched.interrupt();
        let mut out = vec![0.0f32; 64];
        sched.render(&mut out, 0, 24000);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
