//! Configuration loading for the generation/acquisition engine.
//!
//! Configuration is loaded from a TOML file merged with environment
//! variables (prefixed with `STIMGEN_`), then semantically validated.
//!
//! # Example
//! ```no_run
//! use stimgen::config::StimConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StimConfig::load()?;
//! config.validate()?;
//! println!("Driving {} card(s)", config.cards.len());
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StimConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Hardware limits shared by all cards
    #[serde(default)]
    pub hardware: HardwareConfig,
    /// Engine cadence and buffer sizing
    #[serde(default)]
    pub engine: EngineSettings,
    /// The cards this system drives
    pub cards: Vec<CardConfig>,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Limits of the generation/acquisition hardware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Output voltage ceiling, microvolts. Amplitude plus |offset| on any
    /// channel may never exceed this.
    #[serde(default = "default_max_amplitude_uv")]
    pub max_amplitude_uv: f64,
    /// Maximum sampling rate supported by the converters (S/s)
    #[serde(default = "default_max_sample_rate")]
    pub max_sample_rate: f64,
    /// Host-side input buffer depth, seconds of samples. Sized to absorb
    /// scheduling jitter without overflowing the hardware FIFO.
    #[serde(default = "default_input_buffer_secs")]
    pub input_buffer_secs: f64,
}

/// Cadence and capacity knobs for the engine loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Monitoring loop period
    #[serde(with = "humantime_serde", default = "default_cycle_period")]
    pub cycle_period: Duration,
    /// Per-channel scope ring capacity, samples
    #[serde(default = "default_scope_capacity")]
    pub scope_capacity: usize,
    /// Whole cycles held in each regenerating output buffer
    #[serde(default = "default_cycles_per_buffer")]
    pub cycles_per_buffer: usize,
    /// Upper bound on a single blocking input read
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,
}

/// One physical card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardConfig {
    /// Driver-visible card name (e.g. "SV1")
    pub id: String,
    /// Number of output channels (each mirrored by an input)
    #[serde(default = "default_channels_per_card")]
    pub channels: usize,
}

// Default value functions
fn default_max_amplitude_uv() -> f64 {
    10_000_000.0 // ±10 V converters
}

fn default_max_sample_rate() -> f64 {
    2_000_000.0
}

fn default_input_buffer_secs() -> f64 {
    2.0
}

fn default_cycle_period() -> Duration {
    Duration::from_millis(20)
}

fn default_scope_capacity() -> usize {
    5000
}

fn default_cycles_per_buffer() -> usize {
    4
}

fn default_read_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_channels_per_card() -> usize {
    8
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            max_amplitude_uv: default_max_amplitude_uv(),
            max_sample_rate: default_max_sample_rate(),
            input_buffer_secs: default_input_buffer_secs(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cycle_period: default_cycle_period(),
            scope_capacity: default_scope_capacity(),
            cycles_per_buffer: default_cycles_per_buffer(),
            read_timeout: default_read_timeout(),
        }
    }
}

impl Default for StimConfig {
    /// Four 8-channel cards named SV1..SV4, matching the usual chassis layout.
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: "stimgen".into(),
                log_level: "info".into(),
            },
            hardware: HardwareConfig::default(),
            engine: EngineSettings::default(),
            cards: (1..=4)
                .map(|n| CardConfig {
                    id: format!("SV{n}"),
                    channels: default_channels_per_card(),
                })
                .collect(),
        }
    }
}

impl StimConfig {
    /// Load configuration from `config/default.toml` and environment variables.
    ///
    /// Environment variables override file values with the `STIMGEN_` prefix
    /// and `__` as the section separator, e.g.
    /// `STIMGEN_APPLICATION__LOG_LEVEL=debug`.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("config/default.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("STIMGEN_").split("__"))
            .extract()
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.cards.is_empty() {
            return Err("At least one card must be configured".into());
        }

        let mut ids = std::collections::HashSet::new();
        for card in &self.cards {
            if card.id.trim().is_empty() {
                return Err("Card id cannot be empty".into());
            }
            if !ids.insert(&card.id) {
                return Err(format!("Duplicate card id: {}", card.id));
            }
            if card.channels == 0 {
                return Err(format!("Card {} must have at least one channel", card.id));
            }
        }

        if !(self.hardware.max_amplitude_uv > 0.0) {
            return Err("hardware.max_amplitude_uv must be positive".into());
        }
        if !(self.hardware.max_sample_rate > 0.0) {
            return Err("hardware.max_sample_rate must be positive".into());
        }
        if !(self.hardware.input_buffer_secs >= 2.0) {
            return Err(
                "hardware.input_buffer_secs must be at least 2 seconds to absorb \
                 scheduling jitter"
                    .into(),
            );
        }

        if self.engine.cycle_period.is_zero() {
            return Err("engine.cycle_period must be non-zero".into());
        }
        if self.engine.scope_capacity == 0 {
            return Err("engine.scope_capacity must be non-zero".into());
        }
        if self.engine.cycles_per_buffer < 4 {
            return Err(format!(
                "engine.cycles_per_buffer is {}; at least 4 cycles are needed to amortize \
                 reconfiguration against buffer memory",
                self.engine.cycles_per_buffer
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> StimConfig {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .expect("config should parse")
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let config = from_toml(
            r#"
            [application]
            name = "stimgen test"
            log_level = "info"

            [[cards]]
            id = "SV1"
            "#,
        );

        assert_eq!(config.cards.len(), 1);
        assert_eq!(config.cards[0].channels, 8);
        assert_eq!(config.hardware.max_amplitude_uv, 10_000_000.0);
        assert_eq!(config.engine.cycle_period, Duration::from_millis(20));
        assert_eq!(config.engine.scope_capacity, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn durations_parse_from_humantime_strings() {
        let config = from_toml(
            r#"
            [application]
            name = "t"
            log_level = "debug"

            [engine]
            cycle_period = "5ms"
            read_timeout = "1s"

            [[cards]]
            id = "SV1"
            "#,
        );
        assert_eq!(config.engine.cycle_period, Duration::from_millis(5));
        assert_eq!(config.engine.read_timeout, Duration::from_secs(1));
    }

    #[test]
    fn default_config_is_valid() {
        let config = StimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cards.len(), 4);
        assert_eq!(config.cards[0].id, "SV1");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = StimConfig::default();
        config.application.log_level = "verbose".into();
        assert!(config.validate().is_err());

        let mut config = StimConfig::default();
        config.cards[1].id = "SV1".into();
        assert!(config.validate().unwrap_err().contains("Duplicate"));

        let mut config = StimConfig::default();
        config.cards.clear();
        assert!(config.validate().is_err());

        let mut config = StimConfig::default();
        config.engine.cycles_per_buffer = 2;
        assert!(config.validate().is_err());

        let mut config = StimConfig::default();
        config.cards[0].channels = 0;
        assert!(config.validate().is_err());
    }
}
