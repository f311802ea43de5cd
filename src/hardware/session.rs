//! Per-card pairing of output and input hardware tasks.
//!
//! A `CardSession` exists only while its card has at least one enabled
//! channel and generation is running. It exclusively owns the card's two
//! task handles; only the engine worker ever touches a session. Provisioning
//! is all-or-nothing: if any step fails, every handle created so far is
//! released before the error is returned, so a failed provision leaves no
//! driver resources behind.

use crate::hardware::{InputTask, OutputTask, SignalBackend};
use crate::registry::ChannelLevel;
use crate::waveform;
use anyhow::Result;
use std::time::Duration;
use tracing::{debug, warn};

/// One card's active output+input task pair.
pub struct CardSession {
    card: String,
    levels: Vec<ChannelLevel>,
    sample_rate: f64,
    output: Box<dyn OutputTask>,
    input: Box<dyn InputTask>,
}

impl CardSession {
    /// Create, configure, and start both tasks for `card`.
    ///
    /// The output task is bound to the enabled channels in `levels` and
    /// loaded with one seamless sine buffer per channel; the input task
    /// mirrors the same channels. Either task failing to come up rolls the
    /// whole session back.
    pub async fn provision(
        backend: &dyn SignalBackend,
        card: &str,
        levels: &[ChannelLevel],
        frequency: f64,
        sample_rate: f64,
        cycles: usize,
        input_buffer_secs: f64,
    ) -> Result<Self> {
        let channels: Vec<usize> = levels.iter().map(|level| level.channel).collect();

        let mut output = backend.create_output_task(card, &channels).await?;
        let waveforms = build_waveforms(levels, frequency, sample_rate, cycles);
        let started = async {
            output.configure_continuous(sample_rate, &waveforms).await?;
            output.start().await
        }
        .await;
        if let Err(err) = started {
            quiet_release_output(output.as_mut(), card).await;
            return Err(err);
        }

        let mut input = match backend
            .create_input_task(card, &channels, input_buffer_secs)
            .await
        {
            Ok(input) => input,
            Err(err) => {
                quiet_release_output(output.as_mut(), card).await;
                return Err(err);
            }
        };
        if let Err(err) = input.start().await {
            quiet_release_input(input.as_mut(), card).await;
            quiet_release_output(output.as_mut(), card).await;
            return Err(err);
        }

        debug!(card, channels = channels.len(), sample_rate, "card session provisioned");
        Ok(Self {
            card: card.to_owned(),
            levels: levels.to_vec(),
            sample_rate,
            output,
            input,
        })
    }

    /// The card this session drives.
    pub fn card(&self) -> &str {
        &self.card
    }

    /// The levels the output buffers were last built from, ascending channel
    /// order.
    pub fn levels(&self) -> &[ChannelLevel] {
        &self.levels
    }

    /// The rate both tasks are clocked at.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Whether `levels` covers exactly the channels this session is bound to.
    pub fn same_channel_set(&self, levels: &[ChannelLevel]) -> bool {
        self.levels.len() == levels.len()
            && self
                .levels
                .iter()
                .zip(levels)
                .all(|(a, b)| a.channel == b.channel)
    }

    /// Whether `levels` matches the session's current levels exactly.
    pub fn levels_match(&self, levels: &[ChannelLevel]) -> bool {
        self.levels.as_slice() == levels
    }

    /// Rebuild the output buffers for new levels or a new frequency without
    /// recreating either task. Requires the same channel set and rate; the
    /// input task keeps acquiring across the swap, so other cards and the
    /// monitoring cadence are unaffected.
    pub async fn rewrite_output(
        &mut self,
        levels: &[ChannelLevel],
        frequency: f64,
        cycles: usize,
    ) -> Result<()> {
        let waveforms = build_waveforms(levels, frequency, self.sample_rate, cycles);
        self.output.stop().await?;
        self.output
            .configure_continuous(self.sample_rate, &waveforms)
            .await?;
        self.output.start().await?;
        self.levels = levels.to_vec();
        Ok(())
    }

    /// Read the newest `samples_per_channel` input samples for every bound
    /// channel, in `levels()` order.
    pub async fn read_batch(
        &mut self,
        samples_per_channel: usize,
        timeout: Duration,
    ) -> Result<Vec<Vec<f64>>> {
        self.input.read_batch(samples_per_channel, timeout).await
    }

    /// Stop and release both tasks, newest acquisition first. Best-effort:
    /// failures are logged, never raised, so teardown always completes.
    pub async fn teardown(&mut self) {
        if let Err(err) = self.input.stop().await {
            warn!(card = %self.card, %err, "input task stop failed");
        }
        if let Err(err) = self.input.release().await {
            warn!(card = %self.card, %err, "input task release failed");
        }
        if let Err(err) = self.output.stop().await {
            warn!(card = %self.card, %err, "output task stop failed");
        }
        if let Err(err) = self.output.release().await {
            warn!(card = %self.card, %err, "output task release failed");
        }
        debug!(card = %self.card, "card session torn down");
    }
}

fn build_waveforms(
    levels: &[ChannelLevel],
    frequency: f64,
    sample_rate: f64,
    cycles: usize,
) -> Vec<Vec<f64>> {
    levels
        .iter()
        .map(|level| {
            waveform::sine_buffer(
                frequency,
                sample_rate,
                level.amplitude_uv * 1e-6,
                level.offset_uv * 1e-6,
                cycles,
            )
        })
        .collect()
}

async fn quiet_release_output(output: &mut dyn OutputTask, card: &str) {
    if let Err(err) = output.stop().await {
        warn!(card, %err, "output task stop failed during rollback");
    }
    if let Err(err) = output.release().await {
        warn!(card, %err, "output task release failed during rollback");
    }
}

async fn quiet_release_input(input: &mut dyn InputTask, card: &str) {
    if let Err(err) = input.stop().await {
        warn!(card, %err, "input task stop failed during rollback");
    }
    if let Err(err) = input.release().await {
        warn!(card, %err, "input task release failed during rollback");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CardConfig;
    use crate::hardware::mock::MockChassis;

    fn chassis() -> MockChassis {
        MockChassis::new(&[CardConfig {
            id: "SV1".into(),
            channels: 8,
        }])
    }

    fn levels() -> Vec<ChannelLevel> {
        vec![
            ChannelLevel {
                channel: 0,
                amplitude_uv: 1_000_000.0,
                offset_uv: 0.0,
            },
            ChannelLevel {
                channel: 4,
                amplitude_uv: 250_000.0,
                offset_uv: 50_000.0,
            },
        ]
    }

    #[tokio::test]
    async fn provision_starts_both_tasks() {
        let chassis = chassis();
        let mut session =
            CardSession::provision(&chassis, "SV1", &levels(), 1_000.0, 100_000.0, 4, 2.0)
                .await
                .unwrap();
        assert_eq!(chassis.alive_tasks("SV1"), (1, 1));
        assert!(chassis.has_program("SV1"));

        let batch = session
            .read_batch(200, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        // Channel 0 carries a 1 V sine.
        let peak = batch[0].iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
        assert!((peak - 1.0).abs() < 1e-6);

        session.teardown().await;
        assert_eq!(chassis.alive_tasks("SV1"), (0, 0));
        assert!(!chassis.has_program("SV1"));
    }

    #[tokio::test]
    async fn failed_input_creation_rolls_back_the_output() {
        let chassis = chassis();
        chassis.fail_input_creation("SV1");
        let result =
            CardSession::provision(&chassis, "SV1", &levels(), 1_000.0, 100_000.0, 4, 2.0).await;
        assert!(result.is_err());
        assert_eq!(chassis.alive_tasks("SV1"), (0, 0));
        assert!(!chassis.has_program("SV1"));
    }

    #[tokio::test]
    async fn absent_card_fails_cleanly() {
        let chassis = chassis();
        chassis.fail_task_creation("SV1");
        let result =
            CardSession::provision(&chassis, "SV1", &levels(), 1_000.0, 100_000.0, 4, 2.0).await;
        assert!(result.is_err());
        assert_eq!(chassis.alive_tasks("SV1"), (0, 0));
    }

    #[tokio::test]
    async fn rewrite_swaps_buffers_without_recreating_tasks() {
        let chassis = chassis();
        let mut session =
            CardSession::provision(&chassis, "SV1", &levels(), 1_000.0, 100_000.0, 4, 2.0)
                .await
                .unwrap();
        assert_eq!(chassis.configure_count("SV1"), 1);

        let mut new_levels = levels();
        new_levels[0].amplitude_uv = 2_000_000.0;
        session
            .rewrite_output(&new_levels, 1_000.0, 4)
            .await
            .unwrap();
        assert_eq!(chassis.configure_count("SV1"), 2);
        assert_eq!(chassis.alive_tasks("SV1"), (1, 1));
        assert_eq!(session.levels()[0].amplitude_uv, 2_000_000.0);

        let batch = session
            .read_batch(200, Duration::from_millis(10))
            .await
            .unwrap();
        let peak = batch[0].iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
        assert!((peak - 2.0).abs() < 1e-6);

        session.teardown().await;
    }

    #[tokio::test]
    async fn channel_set_comparison() {
        let chassis = chassis();
        let mut session =
            CardSession::provision(&chassis, "SV1", &levels(), 1_000.0, 100_000.0, 4, 2.0)
                .await
                .unwrap();

        let mut amp_changed = levels();
        amp_changed[1].amplitude_uv = 1.0;
        let mut set_changed = levels();
        set_changed[1].channel = 5;

        assert!(session.same_channel_set(&levels()));
        assert!(session.levels_match(&levels()));
        assert!(session.same_channel_set(&amp_changed));
        assert!(!session.levels_match(&amp_changed));
        assert!(!session.same_channel_set(&set_changed));

        session.teardown().await;
    }
}
