//! Output activity level for the presentation layer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::audio::lock;
use crate::audio::FrequencyAnalyser;

/// Average bin energy scaled to [0, 1].
pub fn normalized_volume(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u32 = bins.iter().map(|&b| b as u32).sum();
    let avg = sum as f32 / bins.len() as f32;
    (avg / u8::MAX as f32).clamp(0.0, 1.0)
}

/// Repeating task that samples the analyser once per display frame and
/// publishes the latest volume. Lives exactly as long as the session's output path.
pub struct VolumeMonitor {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl VolumeMonitor {
    pub fn start(
        analyser: Arc<Mutex<FrequencyAnalyser>>,
        volume: Arc<watch::Sender<f32>>,
        refresh_hz: u32,
    ) -> Self {
        let cancel = CancellationToken::new();
        let period = Duration::from_secs_f64(1.0 / refresh_hz.max(1) as f64);
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let bins = lock(&analyser).byte_frequency_data();
                        volume.send_replace(normalized_volume(&bins));
                    }
                }
            }
            log::debug!("Volume monitor stopped");
        });

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Cancel the loop and wait until it has published its last value. Idempotent.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Volume monitor task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for VolumeMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AnalyserConfig;

    #[test]
    fn full_scale_bins_map_to_unit_range() {
        assert_eq!(normalized_volume(&[0; 128]), 0.0);
        assert_eq!(normalized_volume(&[255; 128]), 1.0);
        assert_eq!(normalized_volume(&[]), 0.0);
        let half = normalized_volume(&[0, 255]);
        assert!((half - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn publishes_until_stopped() {
        let analyser = Arc::new(Mutex::new(FrequencyAnalyser::new(AnalyserConfig {
            smoothing: 0.0,
            ..AnalyserConfig::default()
        })));
        let tone: Vec<f32> = (0..256)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 20.0 * i as f32 / 256.0).sin())
            .collect();
        lock(&analyser).push(&tone);

        let (tx, mut rx) = watch::channel(0.0f32);
        let tx = Arc::new(tx);
        let mut monitor = VolumeMonitor::start(analyser.clone(), tx.clone(), 200);

        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|v| *v > 0.0))
            .await
            .expect("monitor never published")
            .unwrap();

        monitor.stop().await;
        tx.send_replace(0.0);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*rx.borrow(), 0.0);

        monitor.stop().await;
    }
}
