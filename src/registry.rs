//! The shared table of per-channel configuration and live measurements.
//!
//! Two writers touch this table concurrently: the front end edits the drive
//! side (`enabled`, amplitude, offset) and the engine publishes the measured
//! side (RMS/peak). Locking is sharded per card — one `RwLock` over each
//! card's channel vector — so a single editor call is applied atomically and
//! can never be observed half-written, while edits on one card never
//! serialize traffic on another. All critical sections are O(channels) and
//! never touch hardware, so neither side can starve the other.
//!
//! Validation happens at the mutation boundary: a channel must exist and the
//! requested amplitude plus |offset| must stay within the converter ceiling.
//! Accepted edits become visible to the engine on its next polling cycle.

use crate::config::CardConfig;
use crate::error::{StimError, StimResult};
use crate::measurement::{ChannelMeasurement, SignalStats};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Front-end-facing view of one output line.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChannelConfig {
    /// Card the channel belongs to
    pub card: String,
    /// Channel index on the card
    pub channel: usize,
    /// Drive amplitude, microvolts
    pub amplitude_uv: f64,
    /// DC offset, microvolts
    pub offset_uv: f64,
    /// Whether the channel participates in generation
    pub enabled: bool,
    /// Latest measured statistics, volts
    pub measured: SignalStats,
    /// When the measurement was published
    pub measured_at: Option<DateTime<Utc>>,
}

/// Requested drive level for one enabled channel, as consumed by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelLevel {
    /// Channel index on the card
    pub channel: usize,
    /// Drive amplitude, microvolts
    pub amplitude_uv: f64,
    /// DC offset, microvolts
    pub offset_uv: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    amplitude_uv: f64,
    offset_uv: f64,
    enabled: bool,
    measured: SignalStats,
    measured_at: Option<DateTime<Utc>>,
}

/// Sharded per-card registry of channel state.
pub struct ChannelRegistry {
    max_amplitude_uv: f64,
    cards: BTreeMap<String, RwLock<Vec<ChannelState>>>,
}

impl ChannelRegistry {
    /// Build the registry for the configured cards. Every channel starts
    /// disabled at zero amplitude and offset.
    pub fn new(cards: &[CardConfig], max_amplitude_uv: f64) -> Self {
        let cards = cards
            .iter()
            .map(|card| {
                (
                    card.id.clone(),
                    RwLock::new(vec![ChannelState::default(); card.channels]),
                )
            })
            .collect();
        Self {
            max_amplitude_uv,
            cards,
        }
    }

    /// Output voltage ceiling, microvolts.
    pub fn max_amplitude_uv(&self) -> f64 {
        self.max_amplitude_uv
    }

    /// Configured card ids, in stable order.
    pub fn cards(&self) -> Vec<String> {
        self.cards.keys().cloned().collect()
    }

    fn read_shard(
        &self,
        card: &str,
        channel: usize,
    ) -> StimResult<RwLockReadGuard<'_, Vec<ChannelState>>> {
        let shard = self.shard(card, channel)?;
        let guard = shard.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if channel >= guard.len() {
            return Err(StimError::InvalidChannel {
                card: card.to_owned(),
                channel,
            });
        }
        Ok(guard)
    }

    fn write_shard(
        &self,
        card: &str,
        channel: usize,
    ) -> StimResult<RwLockWriteGuard<'_, Vec<ChannelState>>> {
        let shard = self.shard(card, channel)?;
        let guard = shard.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if channel >= guard.len() {
            return Err(StimError::InvalidChannel {
                card: card.to_owned(),
                channel,
            });
        }
        Ok(guard)
    }

    fn shard(&self, card: &str, channel: usize) -> StimResult<&RwLock<Vec<ChannelState>>> {
        self.cards.get(card).ok_or_else(|| StimError::InvalidChannel {
            card: card.to_owned(),
            channel,
        })
    }

    fn check_level(
        &self,
        card: &str,
        channel: usize,
        amplitude_uv: f64,
        offset_uv: f64,
    ) -> StimResult<()> {
        let in_range = amplitude_uv.is_finite()
            && offset_uv.is_finite()
            && amplitude_uv >= 0.0
            && amplitude_uv + offset_uv.abs() <= self.max_amplitude_uv;
        if in_range {
            Ok(())
        } else {
            Err(StimError::AmplitudeOutOfRange {
                card: card.to_owned(),
                channel,
                amplitude_uv,
                offset_uv,
                max_uv: self.max_amplitude_uv,
            })
        }
    }

    /// Enable or disable one channel.
    pub fn set_enabled(&self, card: &str, channel: usize, enabled: bool) -> StimResult<()> {
        let mut shard = self.write_shard(card, channel)?;
        shard[channel].enabled = enabled;
        Ok(())
    }

    /// Set one channel's drive amplitude, microvolts.
    pub fn set_amplitude(&self, card: &str, channel: usize, amplitude_uv: f64) -> StimResult<()> {
        let mut shard = self.write_shard(card, channel)?;
        self.check_level(card, channel, amplitude_uv, shard[channel].offset_uv)?;
        shard[channel].amplitude_uv = amplitude_uv;
        Ok(())
    }

    /// Set one channel's DC offset, microvolts.
    pub fn set_offset(&self, card: &str, channel: usize, offset_uv: f64) -> StimResult<()> {
        let mut shard = self.write_shard(card, channel)?;
        self.check_level(card, channel, shard[channel].amplitude_uv, offset_uv)?;
        shard[channel].offset_uv = offset_uv;
        Ok(())
    }

    /// Set enabled state and amplitude together, atomically.
    pub fn set_channel(
        &self,
        card: &str,
        channel: usize,
        enabled: bool,
        amplitude_uv: f64,
    ) -> StimResult<()> {
        let mut shard = self.write_shard(card, channel)?;
        self.check_level(card, channel, amplitude_uv, shard[channel].offset_uv)?;
        let entry = &mut shard[channel];
        entry.enabled = enabled;
        entry.amplitude_uv = amplitude_uv;
        Ok(())
    }

    /// Publish the latest batch statistics for one channel (engine-side path).
    pub fn publish_measurement(
        &self,
        card: &str,
        channel: usize,
        stats: SignalStats,
    ) -> StimResult<()> {
        let mut shard = self.write_shard(card, channel)?;
        let entry = &mut shard[channel];
        entry.measured = stats;
        entry.measured_at = Some(Utc::now());
        Ok(())
    }

    /// The latest published measurement for one channel.
    pub fn measurement(&self, card: &str, channel: usize) -> StimResult<ChannelMeasurement> {
        let shard = self.read_shard(card, channel)?;
        let entry = &shard[channel];
        Ok(ChannelMeasurement {
            card: card.to_owned(),
            channel,
            stats: entry.measured,
            measured_at: entry.measured_at,
        })
    }

    /// A copy of every channel's state, cards in stable order.
    pub fn list_channels(&self) -> Vec<ChannelConfig> {
        let mut all = Vec::new();
        for (card, shard) in &self.cards {
            let guard = shard.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            for (channel, entry) in guard.iter().enumerate() {
                all.push(ChannelConfig {
                    card: card.clone(),
                    channel,
                    amplitude_uv: entry.amplitude_uv,
                    offset_uv: entry.offset_uv,
                    enabled: entry.enabled,
                    measured: entry.measured,
                    measured_at: entry.measured_at,
                });
            }
        }
        all
    }

    /// The enabled channels of each card, ascending channel order, for
    /// provisioning decisions. Cards with nothing enabled are absent.
    ///
    /// Each card's list is read under that card's lock, so it can never mix
    /// the halves of a single editor call; an edit landing on another card
    /// during the walk may or may not be included, which is fine for a poll.
    pub fn snapshot_enabled_by_card(&self) -> BTreeMap<String, Vec<ChannelLevel>> {
        let mut by_card = BTreeMap::new();
        for (card, shard) in &self.cards {
            let guard = shard.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            let levels: Vec<ChannelLevel> = guard
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.enabled)
                .map(|(channel, entry)| ChannelLevel {
                    channel,
                    amplitude_uv: entry.amplitude_uv,
                    offset_uv: entry.offset_uv,
                })
                .collect();
            if !levels.is_empty() {
                by_card.insert(card.clone(), levels);
            }
        }
        by_card
    }
}
