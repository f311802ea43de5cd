//! Sample-rate selection for sine generation.
//!
//! Maps a requested output frequency to the smallest standard converter rate
//! that yields at least [`TARGET_SAMPLES_PER_CYCLE`] samples of every output
//! cycle, and grades the achieved waveform fidelity. Pure functions only:
//! no side effects, safe to call concurrently.

use crate::error::{StimError, StimResult};
use serde::Serialize;
use std::fmt;

/// Standard rates the converters support, ascending (S/s).
pub const STANDARD_RATES: [f64; 11] = [
    1_000.0,
    2_500.0,
    5_000.0,
    10_000.0,
    25_000.0,
    50_000.0,
    100_000.0,
    200_000.0,
    500_000.0,
    1_000_000.0,
    2_000_000.0,
];

/// Hardware sampling ceiling (S/s).
pub const MAX_SAMPLE_RATE: f64 = 2_000_000.0;

/// Fidelity target: aim for this many samples of each output cycle.
pub const TARGET_SAMPLES_PER_CYCLE: f64 = 100.0;

/// Waveform fidelity grade derived from samples-per-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleQuality {
    /// ≥200 samples per cycle
    Excellent,
    /// ≥100 samples per cycle
    Good,
    /// ≥50 samples per cycle
    Fair,
    /// Below 50 samples per cycle; the ceiling rate could not do better
    Poor,
}

impl SampleQuality {
    /// Grade a samples-per-cycle figure.
    pub fn grade(samples_per_cycle: f64) -> Self {
        if samples_per_cycle >= 200.0 {
            Self::Excellent
        } else if samples_per_cycle >= 100.0 {
            Self::Good
        } else if samples_per_cycle >= 50.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

impl fmt::Display for SampleQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
        };
        f.write_str(label)
    }
}

/// The advised rate for one requested frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateAdvice {
    /// Chosen converter rate (S/s)
    pub sample_rate: f64,
    /// Achieved samples per output cycle at that rate
    pub samples_per_cycle: f64,
    /// Fidelity grade for the pairing
    pub quality: SampleQuality,
}

/// Advise a hardware-legal sample rate for `frequency`.
///
/// Picks the smallest entry of [`STANDARD_RATES`] giving at least
/// [`TARGET_SAMPLES_PER_CYCLE`] samples per cycle. When no standard rate can
/// reach the target the ceiling rate is returned with a degraded grade
/// instead of an error; only non-positive or non-finite input fails.
pub fn advise(frequency: f64) -> StimResult<RateAdvice> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return Err(StimError::InvalidFrequency(frequency));
    }

    let sample_rate = STANDARD_RATES
        .iter()
        .copied()
        .find(|rate| rate / frequency >= TARGET_SAMPLES_PER_CYCLE)
        .unwrap_or(MAX_SAMPLE_RATE);
    let samples_per_cycle = sample_rate / frequency;

    Ok(RateAdvice {
        sample_rate,
        samples_per_cycle,
        quality: SampleQuality::grade(samples_per_cycle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_smallest_standard_rate_meeting_the_target() {
        let advice = advise(1_000.0).unwrap();
        assert_eq!(advice.sample_rate, 100_000.0);
        assert_eq!(advice.samples_per_cycle, 100.0);
        assert_eq!(advice.quality, SampleQuality::Good);
    }

    #[test]
    fn low_frequencies_grade_excellent() {
        let advice = advise(4.0).unwrap();
        assert_eq!(advice.sample_rate, 1_000.0);
        assert_eq!(advice.quality, SampleQuality::Excellent);
    }

    #[test]
    fn ceiling_rate_degrades_gracefully() {
        // 2 MS/s / 29.43 kHz ≈ 68 samples/cycle
        let advice = advise(29_430.0).unwrap();
        assert_eq!(advice.sample_rate, MAX_SAMPLE_RATE);
        assert_eq!(advice.quality, SampleQuality::Fair);

        // 2 MS/s / 100 kHz = 20 samples/cycle
        let advice = advise(100_000.0).unwrap();
        assert_eq!(advice.sample_rate, MAX_SAMPLE_RATE);
        assert_eq!(advice.quality, SampleQuality::Poor);
    }

    #[test]
    fn meets_target_whenever_a_standard_rate_can() {
        for f in [0.5, 10.0, 60.0, 440.0, 1234.0, 8192.0, 20_000.0] {
            let advice = advise(f).unwrap();
            if MAX_SAMPLE_RATE / f >= TARGET_SAMPLES_PER_CYCLE {
                assert!(
                    advice.samples_per_cycle >= TARGET_SAMPLES_PER_CYCLE,
                    "{f} Hz got only {} samples/cycle",
                    advice.samples_per_cycle
                );
            } else {
                assert_eq!(advice.sample_rate, MAX_SAMPLE_RATE);
            }
        }
    }

    #[test]
    fn rejects_non_positive_and_non_finite_input() {
        assert!(matches!(advise(0.0), Err(StimError::InvalidFrequency(_))));
        assert!(matches!(advise(-50.0), Err(StimError::InvalidFrequency(_))));
        assert!(matches!(
            advise(f64::NAN),
            Err(StimError::InvalidFrequency(_))
        ));
        assert!(matches!(
            advise(f64::INFINITY),
            Err(StimError::InvalidFrequency(_))
        ));
    }

    #[test]
    fn grade_boundaries() {
        assert_eq!(SampleQuality::grade(200.0), SampleQuality::Excellent);
        assert_eq!(SampleQuality::grade(199.9), SampleQuality::Good);
        assert_eq!(SampleQuality::grade(100.0), SampleQuality::Good);
        assert_eq!(SampleQuality::grade(99.9), SampleQuality::Fair);
        assert_eq!(SampleQuality::grade(50.0), SampleQuality::Fair);
        assert_eq!(SampleQuality::grade(49.9), SampleQuality::Poor);
    }
}
