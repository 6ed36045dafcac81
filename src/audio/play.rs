use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::analyser::FrequencyAnalyser;
use super::clock::DeviceClock;
use super::codec::AudioFrame;
use super::device::OutputStream;
use super::lock;
use super::scheduler::{PlaybackHandle, PlaybackScheduler};
use crate::error::AudioError;

/// Output path of a session: the scheduler plus a render thread that keeps
/// the playback device fed, one period at a time, silence included.
///
/// - Render thread: scheduler → period buffer → analyser tap → device write
pub struct PlaybackEngine {
    running: Arc<AtomicBool>,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    render_handle: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    /// Take ownership of an opened output device and start rendering.
    /// `on_error` is called once if the device fails while playing.
    pub fn start<E>(
        output: Box<dyn OutputStream>,
        analyser: Arc<Mutex<FrequencyAnalyser>>,
        on_error: E,
    ) -> Result<Self, AudioError>
    where
        E: FnOnce(AudioError) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let clock = Arc::new(DeviceClock::new(output.sample_rate()));
        let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new(clock.clone())));

        log::info!(
            "Playback starting: rate={}, period={}",
            output.sample_rate(),
            output.period_size()
        );

        let render_handle = {
            let running = running.clone();
            let scheduler = scheduler.clone();
            thread::Builder::new()
                .name("audio-render".into())
                .spawn(move || {
                    if let Err(e) = render_thread(output, &scheduler, &analyser, &clock, &running) {
                        log::error!("Playback thread error: {}", e);
                        on_error(e);
                    }
                })
                .map_err(|e| AudioError::Io(e.to_string()))?
        };

        Ok(Self {
            running,
            scheduler,
            render_handle: Some(render_handle),
        })
    }

    pub fn schedule(&self, frame: AudioFrame) -> PlaybackHandle {
        lock(&self.scheduler).schedule(frame)
    }

    pub fn interrupt(&self) -> usize {
        lock(&self.scheduler).interrupt()
    }

    #[cfg(test)]
    pub fn active_len(&self) -> usize {
        lock(&self.scheduler).active_len()
    }

    #[cfg(test)]
    pub fn next_start_time(&self) -> f64 {
        lock(&self.scheduler).next_start_time()
    }

    #[cfg(test)]
    pub fn current_time(&self) -> f64 {
        lock(&self.scheduler).current_time()
    }

    /// Cut off all audio, stop the render thread and release the device. Idempotent.
    pub fn stop(&mut self) {
        lock(&self.scheduler).interrupt();
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.render_handle.take() {
            let _ = h.join();
            log::info!("Playback stopped");
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render_thread(
    mut output: Box<dyn OutputStream>,
    scheduler: &Mutex<PlaybackScheduler>,
    analyser: &Mutex<FrequencyAnalyser>,
    clock: &DeviceClock,
    running: &AtomicBool,
) -> Result<(), AudioError> {
    let period = output.period_size().max(1);
    let rate = output.sample_rate();
    let mut buf = vec![0f32; period];

    while running.load(Ordering::Relaxed) {
        // Render and commit under one lock so nothing gets scheduled into a period
        // that is already on its way to the device.
        {
            let mut sched = lock(scheduler);
            sched.render(&mut buf, clock.position(), rate);
            clock.advance(period as u64);
        }

        lock(analyser).push(&buf);
        output.write(&buf)?;
        lock(scheduler).reap();
    }
    Ok(())
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::time::Duration;

    /// Output device that paces writes in real time and records what it was given.
    pub struct FakeOutput {
        pub rate: u32,
        pub period: usize,
        pub written: Arc<Mutex<Vec<f32>>>,
    }

    impl OutputStream for FakeOutput {
        fn sample_rate(&self) -> u32 {
            self.rate
        }

        fn period_size(&self) -> usize {
            self.period
        }

        fn write(&mut self, samples: &[f32]) -> Result<(), AudioError> {
            self.written.lock().unwrap().extend_from_slice(samples);
            thread::sleep(Duration::from_secs_f64(samples.len() as f64 / self.rate as f64));
            Ok(())
        }
    }
}
