//! Custom error types for the application.
//!
//! This module defines the primary error type, `StimError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures that can occur,
//! from configuration problems to hardware provisioning and runtime faults.
//!
//! ## Error Taxonomy
//!
//! - **Configuration errors** (`InvalidChannel`, `AmplitudeOutOfRange`,
//!   `InvalidFrequency`, `FrequencyTooHigh`, `NoChannelsEnabled`,
//!   `AlreadyRunning`, `Config`, `Configuration`): recoverable, reported to
//!   the caller synchronously, and never change engine state.
//! - **`Provisioning`**: a card's output or input task could not be created
//!   or started. Surfaced at the `start()` boundary after every session
//!   opened by that attempt has been rolled back.
//! - **`Hardware`**: a runtime fault on an established session. These are
//!   funneled into the engine's status channel rather than thrown across the
//!   worker boundary; the variant exists so callers polling the channel can
//!   hold a typed value.
//!
//! Resource-release failures during shutdown are deliberately absent: they
//! are logged and swallowed so `stop()` always returns control to the caller.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type StimResult<T> = std::result::Result<T, StimError>;

/// All failure modes surfaced by the generation/acquisition engine.
#[derive(Error, Debug)]
pub enum StimError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frequency table error: {0}")]
    FrequencyFile(#[from] csv::Error),

    #[error("Unknown channel {channel} on card {card}")]
    InvalidChannel { card: String, channel: usize },

    #[error(
        "Level out of range on {card}/ao{channel}: amplitude {amplitude_uv} uV \
         with offset {offset_uv} uV exceeds the ±{max_uv} uV ceiling"
    )]
    AmplitudeOutOfRange {
        card: String,
        channel: usize,
        amplitude_uv: f64,
        offset_uv: f64,
        max_uv: f64,
    },

    #[error("Invalid frequency: {0} Hz")]
    InvalidFrequency(f64),

    #[error(
        "Frequency {frequency} Hz leaves fewer than 2 samples per cycle at {sample_rate} S/s"
    )]
    FrequencyTooHigh { frequency: f64, sample_rate: f64 },

    #[error("No channels enabled; enable at least one channel before starting")]
    NoChannelsEnabled,

    #[error("Generation is already running")]
    AlreadyRunning,

    #[error("Failed to provision card {card}: {source}")]
    Provisioning {
        card: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Hardware fault on card {card}: {message}")]
    Hardware { card: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisioning_error_names_the_card() {
        let err = StimError::Provisioning {
            card: "SV2".into(),
            source: anyhow::anyhow!("device not present"),
        };
        let msg = err.to_string();
        assert!(msg.contains("SV2"));
        assert!(msg.contains("provision"));
    }

    #[test]
    fn amplitude_error_reports_the_ceiling() {
        let err = StimError::AmplitudeOutOfRange {
            card: "SV1".into(),
            channel: 3,
            amplitude_uv: 9_000_000.0,
            offset_uv: 2_000_000.0,
            max_uv: 10_000_000.0,
        };
        assert!(err.to_string().contains("SV1/ao3"));
        assert!(err.to_string().contains("10000000"));
    }
}
