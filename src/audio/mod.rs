//! audio - Microphone capture, gapless playback and the PCM wire codec
//!
//! Uses ALSA for audio I/O on dedicated threads. Captured 16 kHz frames are
//! base64-encoded PCM16 for the live service; received 24 kHz segments are
//! decoded and placed on a single output timeline by the scheduler.

pub mod alsa_device;
pub mod analyser;
pub mod capture;
pub mod clock;
pub mod codec;
pub mod device;
pub mod play;
pub mod scheduler;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use alsa_device::AlsaBackend;
pub use analyser::{AnalyserConfig, FrequencyAnalyser};
pub use capture::{CaptureHandle, FrameSink};
pub use codec::AudioFrame;
pub use device::{AudioBackend, InputStream, OutputStream};
pub use play::PlaybackEngine;

/// A panicked audio thread must not take the session's teardown down with it.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
