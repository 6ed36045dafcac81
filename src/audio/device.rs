//! Device seam between the session and the sound hardware.

use crate::error::AudioError;

/// Opens the single microphone/speaker pair a session uses.
pub trait AudioBackend: Send + Sync {
    /// Acquire the capture device at exactly `sample_rate`, mono.
    ///
    /// Fails with `DeviceUnavailable` when the device is missing, busy or refuses the rate.
    fn open_input(&self, sample_rate: u32) -> Result<Box<dyn InputStream>, AudioError>;

    /// Acquire the playback device near `sample_rate`, mono.
    fn open_output(
        &self,
        sample_rate: u32,
        period_size: usize,
    ) -> Result<Box<dyn OutputStream>, AudioError>;
}

/// Blocking source of mono float samples.
pub trait InputStream: Send {
    fn sample_rate(&self) -> u32;

    /// Block until some samples are available and copy them into `buf`.
    /// `Ok(0)` means the stream has ended.
    fn read(&mut self, buf: &mut [f32]) -> Result<usize, AudioError>;
}

/// Blocking sink of mono float samples.
pub trait OutputStream: Send {
    /// Rate the hardware actually runs at, which may differ from the requested one.
    fn sample_rate(&self) -> u32;

    /// Preferred number of frames per write.
    fn period_size(&self) -> usize;

    fn write(&mut self, samples: &[f32]) -> Result<(), AudioError>;
}
