//! Per-batch signal statistics.
//!
//! Each engine cycle reads one batch of input samples per channel and
//! publishes fresh RMS/peak figures computed from that batch alone — no
//! cross-batch smoothing, so displayed values track the live signal.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// RMS and peak of one sample batch, volts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SignalStats {
    /// sqrt(mean(x²)) over the batch
    pub rms: f64,
    /// max(|x|) over the batch
    pub peak: f64,
}

impl SignalStats {
    /// Compute statistics for one batch. An empty batch yields zeros.
    pub fn from_batch(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let sum_sq: f64 = samples.iter().map(|s| s * s).sum();
        let rms = (sum_sq / samples.len() as f64).sqrt();
        let peak = samples.iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
        Self { rms, peak }
    }
}

/// A published measurement for one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelMeasurement {
    /// Card the channel belongs to
    pub card: String,
    /// Channel index on the card
    pub channel: usize,
    /// Latest batch statistics, volts
    pub stats: SignalStats,
    /// When the batch was processed; `None` until the first engine cycle
    pub measured_at: Option<DateTime<Utc>>,
}

/// Display-layer clipping flag: whether a raw sample sits within the margin
/// of the converter ceiling (both in volts).
pub fn is_clipping(sample_v: f64, ceiling_v: f64, margin_v: f64) -> bool {
    sample_v.abs() >= ceiling_v - margin_v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::sine_buffer;

    #[test]
    fn sine_rms_is_amplitude_over_sqrt_two() {
        // A finely sampled 1 V sine measures ≈ 0.7071 V RMS.
        let batch = sine_buffer(1_000.0, 1_000_000.0, 1.0, 0.0, 10);
        let stats = SignalStats::from_batch(&batch);
        assert!((stats.rms - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-4);
        assert!((stats.peak - 1.0).abs() < 1e-6);
    }

    #[test]
    fn peak_tracks_largest_magnitude() {
        let stats = SignalStats::from_batch(&[0.1, -0.9, 0.4]);
        assert_eq!(stats.peak, 0.9);
    }

    #[test]
    fn empty_batch_yields_zeros() {
        let stats = SignalStats::from_batch(&[]);
        assert_eq!(stats, SignalStats::default());
    }

    #[test]
    fn clipping_margin() {
        assert!(is_clipping(9.95, 10.0, 0.1));
        assert!(is_clipping(-9.95, 10.0, 0.1));
        assert!(!is_clipping(9.85, 10.0, 0.1));
    }
}
