//! Hardware I/O capability traits.
//!
//! The vendor driver is deliberately out of scope: the engine talks to a
//! small set of capability traits instead of a concrete binding, so any
//! backend satisfying them is substitutable — the real driver shim on a
//! production box, the [`mock::MockChassis`] in tests and demos.
//!
//! # Design
//!
//! Each trait:
//! - Is async (uses `#[async_trait]`)
//! - Uses `anyhow::Result` for errors (typed classification happens at the
//!   engine boundary, not here)
//! - Focuses on one task kind
//!
//! A task handle is exclusively owned: the engine worker is the only code
//! that ever touches a created task, which matches driver APIs that forbid
//! concurrent access to one task handle.

pub mod mock;
pub mod session;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// One card visible to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    /// Driver-visible name (e.g. "SV1")
    pub id: String,
    /// Product designation reported by the driver
    pub product: String,
    /// Output channel count (inputs mirror outputs)
    pub channels: usize,
}

/// Capability: a chassis of generation/acquisition cards.
///
/// Factory for per-card task handles plus discovery. `Send + Sync` because
/// the backend itself is shared; the handles it creates are not.
#[async_trait]
pub trait SignalBackend: Send + Sync {
    /// Enumerate the cards currently visible to the driver.
    async fn list_cards(&self) -> Result<Vec<CardInfo>>;

    /// Create an analog-output task bound to `channels` of `card`.
    ///
    /// The task is created idle; it produces nothing until configured and
    /// started. Fails if the card is absent or a channel does not exist.
    async fn create_output_task(&self, card: &str, channels: &[usize])
        -> Result<Box<dyn OutputTask>>;

    /// Create the input task mirroring `channels` of `card`, with a host
    /// buffer holding `buffer_secs` seconds of samples.
    async fn create_input_task(
        &self,
        card: &str,
        channels: &[usize],
        buffer_secs: f64,
    ) -> Result<Box<dyn InputTask>>;
}

/// Capability: one card's analog-output task.
#[async_trait]
pub trait OutputTask: Send {
    /// Load one waveform per bound channel and configure continuous
    /// regenerating output at `sample_rate`.
    ///
    /// All waveforms must share a length; the hardware replays the buffer
    /// seamlessly until stopped. Must be called on a stopped task.
    async fn configure_continuous(&mut self, sample_rate: f64, waveforms: &[Vec<f64>])
        -> Result<()>;

    /// Begin generating.
    async fn start(&mut self) -> Result<()>;

    /// Halt generation. Safe to call on a task that never started.
    async fn stop(&mut self) -> Result<()>;

    /// Release driver resources. Must tolerate a task already in a failed
    /// state; after release the handle is inert.
    async fn release(&mut self) -> Result<()>;
}

/// Capability: one card's analog-input task.
#[async_trait]
pub trait InputTask: Send {
    /// Begin acquiring into the host buffer.
    async fn start(&mut self) -> Result<()>;

    /// Read `samples_per_channel` samples for every bound channel, in the
    /// channel order the task was created with. Blocks at most `timeout`.
    async fn read_batch(
        &mut self,
        samples_per_channel: usize,
        timeout: Duration,
    ) -> Result<Vec<Vec<f64>>>;

    /// Halt acquisition.
    async fn stop(&mut self) -> Result<()>;

    /// Release driver resources. Must tolerate a task already in a failed
    /// state.
    async fn release(&mut self) -> Result<()>;
}
