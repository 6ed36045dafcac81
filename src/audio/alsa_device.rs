//! ALSA PCM device wrappers for audio capture and playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use super::codec::{f32_to_i16, i16_to_f32};
use super::device::{AudioBackend, InputStream, OutputStream};
use crate::error::AudioError;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

/// Open a PCM device for capture (recording).
pub fn open_capture(device: &str, sample_rate: u32, channels: u32) -> Result<(PCM, AlsaParams)> {
    open_pcm(device, Direction::Capture, sample_rate, channels, None, "Capture")
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    open_pcm(
        device,
        Direction::Playback,
        sample_rate,
        channels,
        period_size,
        "Playback",
    )
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    // Configure hardware parameters
    {
        let hwp =
            HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        let rate = hwp.get_rate()?;
        let ch = hwp.get_channels()?;
        let ps = hwp.get_period_size()? as usize;
        (rate, ch, ps)
    };

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}

/// ALSA-backed microphone/speaker pair, addressed by PCM device names
/// such as "default" or "plughw:0,0".
pub struct AlsaBackend {
    capture_device: String,
    playback_device: String,
}

impl AlsaBackend {
    pub fn new(capture_device: impl Into<String>, playback_device: impl Into<String>) -> Self {
        Self {
            capture_device: capture_device.into(),
            playback_device: playback_device.into(),
        }
    }
}

impl AudioBackend for AlsaBackend {
    fn open_input(&self, sample_rate: u32) -> Result<Box<dyn InputStream>, AudioError> {
        let (pcm, params) = open_capture(&self.capture_device, sample_rate, 1)
            .map_err(|e| AudioError::DeviceUnavailable(format!("{:#}", e)))?;

        // The wire format promises a fixed rate, so a mismatch is a setup failure
        if params.sample_rate != sample_rate {
            return Err(AudioError::DeviceUnavailable(format!(
                "capture device '{}' runs at {} Hz, {} Hz required",
                self.capture_device, params.sample_rate, sample_rate
            )));
        }

        Ok(Box::new(AlsaInput {
            read_buf: vec![0i16; params.period_size * params.channels as usize],
            pcm,
            params,
        }))
    }

    fn open_output(
        &self,
        sample_rate: u32,
        period_size: usize,
    ) -> Result<Box<dyn OutputStream>, AudioError> {
        let period_size_opt = if period_size > 0 { Some(period_size) } else { None };
        let (pcm, params) =
            open_playback(&self.playback_device, sample_rate, 1, period_size_opt)
                .map_err(|e| AudioError::DeviceUnavailable(format!("{:#}", e)))?;

        Ok(Box::new(AlsaOutput {
            write_buf: Vec::with_capacity(params.period_size * params.channels as usize),
            pcm,
            params,
        }))
    }
}

struct AlsaInput {
    pcm: PCM,
    params: AlsaParams,
    read_buf: Vec<i16>,
}

impl InputStream for AlsaInput {
    fn sample_rate(&self) -> u32 {
        self.params.sample_rate
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize, AudioError> {
        let channels = self.params.channels as usize;
        let max_frames = buf.len().min(self.read_buf.len() / channels);
        if max_frames == 0 {
            return Ok(0);
        }

        let io = self.pcm.io_i16()?;
        let mut retry_count = 0u32;
        let frames = loop {
            match io.readi(&mut self.read_buf[..max_frames * channels]) {
                Ok(frames) => break frames,
                Err(e) if retry_count < 3 => {
                    log::warn!("ALSA capture error: {}, recovering...", e);
                    retry_count += 1;
                    self.pcm.prepare()?;
                }
                Err(e) => return Err(e.into()),
            }
        };

        // Downmix in case the device handed us more channels than asked for
        for (i, out) in buf.iter_mut().take(frames).enumerate() {
            let frame = &self.read_buf[i * channels..(i + 1) * channels];
            let sum: f32 = frame.iter().map(|&s| i16_to_f32(s)).sum();
            *out = sum / channels as f32;
        }
        Ok(frames)
    }
}

struct AlsaOutput {
    pcm: PCM,
    params: AlsaParams,
    write_buf: Vec<i16>,
}

impl OutputStream for AlsaOutput {
    fn sample_rate(&self) -> u32 {
        self.params.sample_rate
    }

    fn period_size(&self) -> usize {
        self.params.period_size
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        let channels = self.params.channels as usize;
        self.write_buf.clear();
        for &s in samples {
            let v = f32_to_i16(s);
            for _ in 0..channels {
                self.write_buf.push(v);
            }
        }

        // Retry loop handles short writes and XRUN recovery without losing frames.
        let io = self.pcm.io_i16()?;
        let total_frames = samples.len();
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        while frames_written < total_frames {
            let offset = frames_written * channels;
            match io.writei(&self.write_buf[offset..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    self.pcm.prepare()?;

                    // 底层持续跟不上写入速度时，丢弃剩余帧防止死循环
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for AlsaOutput {
    fn drop(&mut self) {
        // Discard queued frames so teardown is immediate
        let _ = self.pcm.drop();
    }
}
