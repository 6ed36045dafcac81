//! Frequency analyser on the output path.
//!
//! Keeps the most recent `fft_size` rendered samples and turns them into
//! byte-scaled magnitude bins: Blackman window, DFT, exponential smoothing
//! over time, then decibels mapped linearly from `[min_db, max_db]` to `[0, 255]`.

use std::collections::VecDeque;
use std::f32::consts::PI;

#[derive(Debug, Clone, Copy)]
pub struct AnalyserConfig {
    /// Window length in samples, a power of two.
    pub fft_size: usize,
    /// Weight of the previous spectrum, in [0, 1).
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

pub struct FrequencyAnalyser {
    config: AnalyserConfig,
    history: VecDeque<f32>,
    window: Vec<f32>,
    // Twiddle tables, row-major [bin][n]
    cos_table: Vec<f32>,
    sin_table: Vec<f32>,
    smoothed: Vec<f32>,
}

impl FrequencyAnalyser {
    pub fn new(mut config: AnalyserConfig) -> Self {
        config.fft_size = config.fft_size.max(32).next_power_of_two();
        config.smoothing = config.smoothing.clamp(0.0, 0.99);
        if config.max_decibels <= config.min_decibels {
            config.max_decibels = config.min_decibels + 1.0;
        }

        let n = config.fft_size;
        let bins = n / 2;
        let window = (0..n)
            .map(|i| {
                let x = i as f32 / n as f32;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();

        let mut cos_table = Vec::with_capacity(bins * n);
        let mut sin_table = Vec::with_capacity(bins * n);
        for k in 0..bins {
            for i in 0..n {
                let angle = 2.0 * PI * ((k * i) % n) as f32 / n as f32;
                cos_table.push(angle.cos());
                sin_table.push(angle.sin());
            }
        }

        Self {
            config,
            history: VecDeque::from(vec![0.0; n]),
            window,
            cos_table,
            sin_table,
            smoothed: vec![0.0; bins],
        }
    }

    /// Feed samples as they leave for the speaker.
    pub fn push(&mut self, samples: &[f32]) {
        let n = self.config.fft_size;
        let tail = if samples.len() > n { &samples[samples.len() - n..] } else { samples };
        for &s in tail {
            self.history.pop_front();
            self.history.push_back(if s.is_finite() { s } else { 0.0 });
        }
    }

    /// Current spectrum, one byte per bin.
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        let n = self.config.fft_size;
        let bins = n / 2;
        let windowed: Vec<f32> = self
            .history
            .iter()
            .zip(&self.window)
            .map(|(s, w)| s * w)
            .collect();

        let tau = self.config.smoothing;
        let range = self.config.max_decibels - self.config.min_decibels;
        let mut out = Vec::with_capacity(bins);

        for k in 0..bins {
            let row = k * n;
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (i, x) in windowed.iter().enumerate() {
                re += x * self.cos_table[row + i];
                im -= x * self.sin_table[row + i];
            }
            let magnitude = (re * re + im * im).sqrt() / n as f32;
            self.smoothed[k] = tau * self.smoothed[k] + (1.0 - tau) * magnitude;

            let db = if self.smoothed[k] > 0.0 {
                20.0 * self.smoothed[k].log10()
            } else {
                f32::NEG_INFINITY
            };
            out.push(db_to_byte(db, self.config.min_decibels, range));
        }
        out
    }
}

fn db_to_byte(db: f32, min_db: f32, range: f32) -> u8 {
    let scaled = 255.0 * (db - min_db) / range;
    if scaled.is_nan() {
        return 0;
    }
    scaled.clamp(0.0, 255.0) as u8
}
