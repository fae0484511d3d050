//! Progress smoothing for active downloads.
//!
//! Raw engine samples are jumpy: a sample arrives every couple of hundred
//! milliseconds and the bytes moved between two of them vary a lot. The
//! [`ProgressSmoother`] turns them into an exponential moving average of the
//! transfer speed plus a remaining-time estimate, and recognizes the
//! post-download processing phase (stream merging, audio conversion).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::engine::{ProgressSample, SampleStatus};
use crate::format::{format_eta, format_speed};

/// Default weight given to the newest speed measurement.
pub const DEFAULT_SMOOTHING_FACTOR: f64 = 0.2;

/// Stage of a progress update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    /// Bytes are being transferred.
    Downloading,
    /// The transfer is done and the engine is post-processing.
    Processing,
    /// The session ended; transient speed and ETA are cleared.
    Settled,
}

/// A smoothed reading produced from one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SmoothedProgress {
    /// Transfer in progress.
    Downloading {
        /// Completion in percent.
        percent: f64,
        /// Smoothed speed in bytes per second, never negative.
        speed_bps: f64,
        /// Estimated remaining time.
        eta: Option<Duration>,
    },
    /// Transfer complete, post-processing running.
    Processing {
        /// Completion in percent (at least 100).
        percent: f64,
    },
}

impl SmoothedProgress {
    /// Render this reading for display.
    #[must_use]
    pub fn to_update(&self) -> ProgressUpdate {
        match *self {
            Self::Downloading {
                percent,
                speed_bps,
                eta,
            } => ProgressUpdate {
                stage: ProgressStage::Downloading,
                percent,
                speed_text: Some(format_speed(speed_bps)),
                eta_text: Some(eta.map_or_else(|| "--:--".to_string(), format_eta)),
            },
            Self::Processing { percent } => ProgressUpdate {
                stage: ProgressStage::Processing,
                percent,
                speed_text: None,
                eta_text: None,
            },
        }
    }
}

/// Display-ready progress, as sent to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Current stage.
    pub stage: ProgressStage,
    /// Completion in percent (0.0 - 100.0).
    pub percent: f64,
    /// Formatted speed, absent outside the downloading stage.
    pub speed_text: Option<String>,
    /// Formatted ETA, absent outside the downloading stage.
    pub eta_text: Option<String>,
}

impl ProgressUpdate {
    /// Final update for a finished session: full for success, zero otherwise.
    #[must_use]
    pub const fn settled(percent: f64) -> Self {
        Self {
            stage: ProgressStage::Settled,
            percent,
            speed_text: None,
            eta_text: None,
        }
    }
}

/// Exponential moving average over raw download samples.
#[derive(Debug, Clone)]
pub struct ProgressSmoother {
    alpha: f64,
    last_downloaded_bytes: u64,
    last_timestamp: Instant,
    smoothed_speed: f64,
}

impl ProgressSmoother {
    /// Create a smoother whose measurements start at `now`.
    ///
    /// `alpha` outside (0, 1] falls back to [`DEFAULT_SMOOTHING_FACTOR`].
    #[must_use]
    pub fn new(alpha: f64, now: Instant) -> Self {
        let alpha = if alpha > 0.0 && alpha <= 1.0 {
            alpha
        } else {
            DEFAULT_SMOOTHING_FACTOR
        };
        Self {
            alpha,
            last_downloaded_bytes: 0,
            last_timestamp: now,
            smoothed_speed: 0.0,
        }
    }

    /// Forget everything; the next session starts at `now`.
    pub const fn reset(&mut self, now: Instant) {
        self.last_downloaded_bytes = 0;
        self.last_timestamp = now;
        self.smoothed_speed = 0.0;
    }

    /// Current smoothed speed in bytes per second (may be negative).
    #[must_use]
    pub const fn smoothed_speed(&self) -> f64 {
        self.smoothed_speed
    }

    /// Feed one sample.
    ///
    /// Returns `None` for non-downloading samples below 100%, which carry
    /// nothing worth rendering.
    pub fn observe(&mut self, sample: &ProgressSample) -> Option<SmoothedProgress> {
        let percent = sample.percent();

        if sample.status != SampleStatus::Downloading {
            return (percent >= 100.0).then_some(SmoothedProgress::Processing { percent });
        }

        let elapsed = sample
            .timestamp
            .saturating_duration_since(self.last_timestamp)
            .as_secs_f64();
        let speed = if elapsed > 0.0 {
            (sample.downloaded_bytes as f64 - self.last_downloaded_bytes as f64) / elapsed
        } else {
            0.0
        };

        self.smoothed_speed = if self.smoothed_speed == 0.0 {
            speed
        } else {
            self.alpha.mul_add(speed, (1.0 - self.alpha) * self.smoothed_speed)
        };

        self.last_downloaded_bytes = sample.downloaded_bytes;
        self.last_timestamp = sample.timestamp;

        let speed_bps = self.smoothed_speed.max(0.0);
        Some(SmoothedProgress::Downloading {
            percent,
            speed_bps,
            eta: sample.eta.or_else(|| estimate_remaining(sample, speed_bps)),
        })
    }
}

fn estimate_remaining(sample: &ProgressSample, speed_bps: f64) -> Option<Duration> {
    if speed_bps <= 0.0 {
        return None;
    }
    let remaining = sample.expected_bytes()?.saturating_sub(sample.downloaded_bytes);
    Duration::try_from_secs_f64(remaining as f64 / speed_bps).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Duration = Duration::from_millis(200);

    fn sample_at(start: Instant, step: u32, bytes: u64) -> ProgressSample {
        ProgressSample::downloading(bytes, start + STEP * step)
    }

    #[test]
    fn test_first_sample_seeds_average() {
        let start = Instant::now();
        let mut smoother = ProgressSmoother::new(0.2, start);

        let reading = smoother.observe(&sample_at(start, 1, 1000));

        // 1000 bytes over 200ms
        assert!((smoother.smoothed_speed() - 5000.0).abs() < 1e-6);
        assert!(matches!(
            reading,
            Some(SmoothedProgress::Downloading { speed_bps, .. }) if (speed_bps - 5000.0).abs() < 1e-6
        ));
    }

    #[test]
    fn test_second_sample_is_weighted() {
        let start = Instant::now();
        let mut smoother = ProgressSmoother::new(0.2, start);

        smoother.observe(&sample_at(start, 1, 1000)); // 5000 B/s
        smoother.observe(&sample_at(start, 2, 3000)); // 10000 B/s

        // 0.2 * 10000 + 0.8 * 5000
        assert!((smoother.smoothed_speed() - 6000.0).abs() < 1e-6);
    }

    #[test]
    fn test_constant_rate_converges() {
        let start = Instant::now();
        let mut smoother = ProgressSmoother::new(0.2, start);

        // Seed at 1000 B/s, then switch to 5000 B/s.
        let mut bytes = 200;
        smoother.observe(&sample_at(start, 1, bytes));
        for step in 2..=22 {
            bytes += 1000;
            smoother.observe(&sample_at(start, step, bytes));
        }

        let error = (smoother.smoothed_speed() - 5000.0).abs() / 5000.0;
        assert!(error < 0.01, "smoothed speed still {error:.3} off");
    }

    #[test]
    fn test_zero_elapsed_yields_zero_instant_speed() {
        let start = Instant::now();
        let mut smoother = ProgressSmoother::new(0.2, start);

        smoother.observe(&ProgressSample::downloading(500, start));
        assert_eq!(smoother.smoothed_speed(), 0.0);
    }

    #[test]
    fn test_timestamps_update_unconditionally() {
        let start = Instant::now();
        let mut smoother = ProgressSmoother::new(0.2, start);

        smoother.observe(&sample_at(start, 1, 1000));
        // Same timestamp again: instant speed 0, average decays.
        smoother.observe(&sample_at(start, 1, 1000));
        assert!((smoother.smoothed_speed() - 4000.0).abs() < 1e-6);
    }

    #[test]
    fn test_negative_speed_is_hidden() {
        let start = Instant::now();
        let mut smoother = ProgressSmoother::new(1.0, start);

        smoother.observe(&sample_at(start, 1, 10_000));
        // Second stream starts from zero bytes.
        let reading = smoother.observe(&sample_at(start, 2, 0));

        assert!(smoother.smoothed_speed() < 0.0);
        assert!(matches!(
            reading,
            Some(SmoothedProgress::Downloading { speed_bps, .. }) if speed_bps == 0.0
        ));
    }

    #[test]
    fn test_eta_prefers_engine_value() {
        let start = Instant::now();
        let mut smoother = ProgressSmoother::new(0.2, start);

        let sample = sample_at(start, 1, 1000)
            .with_total(11_000)
            .with_eta(Duration::from_secs(42));
        let reading = smoother.observe(&sample);

        assert!(matches!(
            reading,
            Some(SmoothedProgress::Downloading { eta: Some(eta), .. }) if eta == Duration::from_secs(42)
        ));
    }

    #[test]
    fn test_eta_derived_from_smoothed_speed() {
        let start = Instant::now();
        let mut smoother = ProgressSmoother::new(0.2, start);

        // 5000 B/s with 10_000 bytes left
        let reading = smoother.observe(&sample_at(start, 1, 1000).with_total(11_000));

        assert!(matches!(
            reading,
            Some(SmoothedProgress::Downloading { eta: Some(eta), percent, .. })
                if eta == Duration::from_secs(2) && (percent - 100.0 / 11.0).abs() < 1e-9
        ));
    }

    #[test]
    fn test_finished_at_full_is_processing() {
        let start = Instant::now();
        let mut smoother = ProgressSmoother::new(0.2, start);
        smoother.observe(&sample_at(start, 1, 1000));

        let finished = sample_at(start, 2, 4000)
            .with_total(4000)
            .with_status(SampleStatus::Finished);
        let reading = smoother.observe(&finished);

        assert_eq!(reading, Some(SmoothedProgress::Processing { percent: 100.0 }));
        // Not fed through the speed computation.
        assert!((smoother.smoothed_speed() - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn test_other_status_below_full_is_ignored() {
        let start = Instant::now();
        let mut smoother = ProgressSmoother::new(0.2, start);

        let sample = sample_at(start, 1, 10)
            .with_total(4000)
            .with_status(SampleStatus::Other);
        assert_eq!(smoother.observe(&sample), None);
    }

    #[test]
    fn test_reset_clears_state() {
        let start = Instant::now();
        let mut smoother = ProgressSmoother::new(0.2, start);
        smoother.observe(&sample_at(start, 1, 1000));

        let later = start + Duration::from_secs(10);
        smoother.reset(later);
        assert_eq!(smoother.smoothed_speed(), 0.0);

        smoother.observe(&ProgressSample::downloading(300, later + STEP));
        assert!((smoother.smoothed_speed() - 1500.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_alpha_uses_default() {
        let start = Instant::now();
        let mut smoother = ProgressSmoother::new(0.0, start);
        smoother.observe(&sample_at(start, 1, 1000)); // 5000
        smoother.observe(&sample_at(start, 2, 3000)); // 10000
        assert!((smoother.smoothed_speed() - 6000.0).abs() < 1e-6);
    }

    #[test]
    fn test_update_rendering() {
        let downloading = SmoothedProgress::Downloading {
            percent: 42.0,
            speed_bps: 1536.0,
            eta: Some(Duration::from_secs(65)),
        }
        .to_update();
        assert_eq!(downloading.stage, ProgressStage::Downloading);
        assert_eq!(downloading.speed_text.as_deref(), Some("1.5 KiB/s"));
        assert_eq!(downloading.eta_text.as_deref(), Some("01:05"));

        let processing = SmoothedProgress::Processing { percent: 100.0 }.to_update();
        assert_eq!(processing.stage, ProgressStage::Processing);
        assert!(processing.speed_text.is_none());
        assert!(processing.eta_text.is_none());
    }
}
