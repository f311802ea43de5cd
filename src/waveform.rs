//! Seamless sine buffer synthesis for continuous regenerating output.
//!
//! The hardware replays a host-written buffer forever without host
//! intervention, so the buffer must hold a whole number of cycles: the phase
//! at the wrap point has to land exactly where the buffer begins. Synthesis
//! therefore quantizes the period to `round(sample_rate / frequency)` samples
//! and repeats one computed cycle, which makes the wrap equality exact rather
//! than within-epsilon.

use std::f64::consts::TAU;

/// Fewest samples that can still describe one cycle.
pub const MIN_SAMPLES_PER_CYCLE: usize = 2;

/// Quantized period length in samples for a frequency/rate pairing.
pub fn samples_per_cycle(frequency: f64, sample_rate: f64) -> usize {
    let period = (sample_rate / frequency).round() as usize;
    period.max(MIN_SAMPLES_PER_CYCLE)
}

/// Build one regenerating buffer: `cycles` repetitions of a single period.
///
/// `sample[i] = offset_v + amplitude_v * sin(2π i / period)`, with the buffer
/// length always `cycles * samples_per_cycle(frequency, sample_rate)`.
pub fn sine_buffer(
    frequency: f64,
    sample_rate: f64,
    amplitude_v: f64,
    offset_v: f64,
    cycles: usize,
) -> Vec<f64> {
    let period = samples_per_cycle(frequency, sample_rate);

    let mut cycle = Vec::with_capacity(period);
    for i in 0..period {
        let phase = TAU * i as f64 / period as f64;
        cycle.push(offset_v + amplitude_v * phase.sin());
    }

    let mut buffer = Vec::with_capacity(period * cycles);
    for _ in 0..cycles {
        buffer.extend_from_slice(&cycle);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_length_is_whole_cycles() {
        // 100 kS/s at 1 kHz: 100 samples per cycle
        assert_eq!(samples_per_cycle(1_000.0, 100_000.0), 100);
        let buffer = sine_buffer(1_000.0, 100_000.0, 1.0, 0.0, 4);
        assert_eq!(buffer.len(), 4 * 100);
    }

    #[test]
    fn wrap_is_phase_continuous() {
        let buffer = sine_buffer(1_000.0, 100_000.0, 1.0, 0.0, 4);
        let period = samples_per_cycle(1_000.0, 100_000.0);
        assert_eq!(buffer[0], buffer[period]);
        assert_eq!(buffer[1], buffer[period + 1]);
        // The same holds when rate/frequency is not an integer.
        let buffer = sine_buffer(300.0, 50_000.0, 1.0, 0.0, 4);
        let period = samples_per_cycle(300.0, 50_000.0);
        assert_eq!(period, 167);
        assert_eq!(buffer[0], buffer[period]);
        assert_eq!(buffer[period - 1], buffer[2 * period - 1]);
    }

    #[test]
    fn amplitude_scales_and_offset_shifts() {
        let buffer = sine_buffer(1_000.0, 100_000.0, 2.5, 0.0, 4);
        let peak = buffer.iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
        assert!((peak - 2.5).abs() < 1e-3);

        let shifted = sine_buffer(1_000.0, 100_000.0, 1.0, 0.5, 4);
        let mean = shifted.iter().sum::<f64>() / shifted.len() as f64;
        assert!((mean - 0.5).abs() < 1e-9);
    }

    #[test]
    fn period_never_drops_below_two_samples() {
        assert_eq!(samples_per_cycle(1_500_000.0, 2_000_000.0), 2);
        let buffer = sine_buffer(1_500_000.0, 2_000_000.0, 1.0, 0.0, 4);
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn zero_amplitude_yields_flat_offset() {
        let buffer = sine_buffer(60.0, 10_000.0, 0.0, -0.25, 4);
        assert!(buffer.iter().all(|&s| s == -0.25));
    }
}
