//! The application hub.
//!
//! `StimApp` wires the validated configuration, the channel registry, the
//! scope bank, and the acquisition engine together and exposes the whole
//! in-process presentation boundary: read-only snapshot queries for display
//! code and mutating commands for controls. A GUI front end, the CLI demo,
//! and the test suites all sit on this one surface; none of them can reach
//! hardware except through the engine.

use crate::advisor::RateAdvice;
use crate::config::StimConfig;
use crate::engine::{AcquisitionEngine, EngineEvent, GenerationState};
use crate::error::{StimError, StimResult};
use crate::hardware::SignalBackend;
use crate::measurement::ChannelMeasurement;
use crate::registry::{ChannelConfig, ChannelRegistry};
use crate::scope::ScopeBank;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Central application object; one per process.
pub struct StimApp {
    config: Arc<StimConfig>,
    registry: Arc<ChannelRegistry>,
    scopes: Arc<ScopeBank>,
    engine: AcquisitionEngine,
}

impl StimApp {
    /// Validate `config` and build the full stack over `backend`.
    pub fn new(config: StimConfig, backend: Arc<dyn SignalBackend>) -> StimResult<Self> {
        config.validate().map_err(StimError::Configuration)?;
        let config = Arc::new(config);
        let registry = Arc::new(ChannelRegistry::new(
            &config.cards,
            config.hardware.max_amplitude_uv,
        ));
        let scopes = Arc::new(ScopeBank::new(&config.cards, config.engine.scope_capacity));
        let engine = AcquisitionEngine::new(
            backend,
            Arc::clone(&registry),
            Arc::clone(&scopes),
            Arc::clone(&config),
        );
        Ok(Self {
            config,
            registry,
            scopes,
            engine,
        })
    }

    /// The validated configuration.
    pub fn config(&self) -> &StimConfig {
        &self.config
    }

    /// Direct access to the channel registry.
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    // --- Read-only snapshot queries -------------------------------------

    /// Every channel's configuration and latest measurement.
    pub fn list_channels(&self) -> Vec<ChannelConfig> {
        self.registry.list_channels()
    }

    /// The latest RMS/peak published for one channel.
    pub fn channel_measurement(&self, card: &str, channel: usize) -> StimResult<ChannelMeasurement> {
        self.registry.measurement(card, channel)
    }

    /// A point-in-time copy of one channel's scope ring.
    pub fn scope_snapshot(&self, card: &str, channel: usize) -> StimResult<Vec<f64>> {
        self.scopes
            .buffer(card, channel)
            .map(|buffer| buffer.snapshot())
            .ok_or_else(|| StimError::InvalidChannel {
                card: card.to_owned(),
                channel,
            })
    }

    /// Current generation state.
    pub fn generation_state(&self) -> GenerationState {
        self.engine.generation_state()
    }

    /// Subscribe to engine status events (faults, lifecycle).
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.subscribe()
    }

    // --- Mutating commands ----------------------------------------------

    /// Set enabled state and amplitude for one channel, atomically.
    pub fn set_channel(
        &self,
        card: &str,
        channel: usize,
        enabled: bool,
        amplitude_uv: f64,
    ) -> StimResult<()> {
        self.registry.set_channel(card, channel, enabled, amplitude_uv)
    }

    /// Enable or disable one channel.
    pub fn set_enabled(&self, card: &str, channel: usize, enabled: bool) -> StimResult<()> {
        self.registry.set_enabled(card, channel, enabled)
    }

    /// Set one channel's amplitude, microvolts.
    pub fn set_amplitude(&self, card: &str, channel: usize, amplitude_uv: f64) -> StimResult<()> {
        self.registry.set_amplitude(card, channel, amplitude_uv)
    }

    /// Set one channel's DC offset, microvolts.
    pub fn set_offset(&self, card: &str, channel: usize, offset_uv: f64) -> StimResult<()> {
        self.registry.set_offset(card, channel, offset_uv)
    }

    /// Change the output frequency; applied to all cards on the next engine
    /// cycle when running.
    pub fn set_frequency(&self, frequency: f64) -> StimResult<RateAdvice> {
        self.engine.set_frequency(frequency)
    }

    /// Start continuous generation at `frequency`.
    pub async fn start_generation(&self, frequency: f64) -> StimResult<RateAdvice> {
        self.engine.start(frequency).await
    }

    /// Stop generation and release all hardware. Idempotent.
    pub async fn stop_generation(&self) {
        self.engine.stop().await;
    }
}
