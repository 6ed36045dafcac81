use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::codec;
use super::device::InputStream;
use crate::error::AudioError;

/// Live microphone capture feeding fixed-size frames to a callback.
///
/// - Capture thread: device read → accumulate → `on_frame(frame)` per full frame
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Start delivering `frame_size`-sample frames from an acquired input device.
    ///
    /// `on_frame` runs on the capture thread and must not block; returning
    /// `ControlFlow::Break` ends the capture. `on_error` is called once if the
    /// device fails or its stream runs out while capturing.
    pub fn start<F, E>(
        input: Box<dyn InputStream>,
        frame_size: usize,
        on_frame: F,
        on_error: E,
    ) -> Result<Self, AudioError>
    where
        F: FnMut(&[f32]) -> ControlFlow<()> + Send + 'static,
        E: FnOnce(AudioError) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let frames = Arc::new(AtomicU64::new(0));
        let frame_size = frame_size.max(1);

        log::info!(
            "Capture starting: rate={}, frame_size={}",
            input.sample_rate(),
            frame_size
        );

        let handle = {
            let running = running.clone();
            let frames = frames.clone();
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    if let Err(e) = capture_thread(input, frame_size, on_frame, &running, &frames) {
                        log::error!("Capture thread error: {}", e);
                        on_error(e);
                    }
                })
                .map_err(|e| AudioError::Io(e.to_string()))?
        };

        Ok(Self {
            running,
            frames,
            handle: Some(handle),
        })
    }

    /// Frames handed to `on_frame` so far.
    pub fn frames_delivered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Halt delivery and release the device. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
            log::info!("Capture stopped after {} frame(s)", self.frames_delivered());
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread<F>(
    mut input: Box<dyn InputStream>,
    frame_size: usize,
    mut on_frame: F,
    running: &AtomicBool,
    frames: &AtomicU64,
) -> Result<(), AudioError>
where
    F: FnMut(&[f32]) -> ControlFlow<()>,
{
    let mut read_buf = vec![0f32; frame_size];
    // Device periods rarely line up with frame_size
    let mut accum_buf: Vec<f32> = Vec::with_capacity(frame_size * 2);

    while running.load(Ordering::Relaxed) {
        let n = input.read(&mut read_buf)?;
        if n == 0 {
            if !running.load(Ordering::Relaxed) {
                break;
            }
            return Err(AudioError::Io("Microphone stream ended".into()));
        }
        accum_buf.extend_from_slice(&read_buf[..n]);

        while accum_buf.len() >= frame_size {
            if !running.load(Ordering::Relaxed) {
                return Ok(());
            }
            let flow = on_frame(&accum_buf[..frame_size]);
            frames.fetch_add(1, Ordering::Relaxed);
            accum_buf.drain(..frame_size);
            if flow.is_break() {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Outcome of handing one frame to the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forward {
    Sent,
    /// Queue full, frame discarded.
    Dropped,
    /// Session channel is gone.
    Closed,
}

/// Encodes captured frames and pushes them onto the bounded outbound queue
/// without ever blocking the capture thread.
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<String>,
    live: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl FrameSink {
    pub fn new(tx: mpsc::Sender<String>, live: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            live,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn forward(&self, samples: &[f32]) -> Forward {
        if !self.live.load(Ordering::Acquire) {
            return Forward::Closed;
        }
        match self.tx.try_send(codec::encode(samples)) {
            Ok(()) => Forward::Sent,
            Err(TrySendError::Full(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n == 1 || n % 50 == 0 {
                    log::warn!("Outbound audio queue full, {} frame(s) dropped so far", n);
                }
                Forward::Dropped
            }
            Err(TrySendError::Closed(_)) => Forward::Closed,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Callback shape expected by `CaptureHandle::start`.
    pub fn into_callback(self) -> impl FnMut(&[f32]) -> ControlFlow<()> + Send + 'static {
        move |frame| match self.forward(frame) {
            Forward::Closed => ControlFlow::Break(()),
            Forward::Sent | Forward::Dropped => ControlFlow::Continue(()),
        }
    }
}
