//! Simulated chassis for testing without physical hardware.
//!
//! `MockChassis` models a chassis of generation/acquisition cards whose
//! inputs are wired back to their own outputs: whatever waveform a card's
//! output task is regenerating is what its input task reads, optionally with
//! a little noise on top. It also exposes the failure-injection and
//! accounting hooks the test suites lean on:
//!
//! - mark a card unreachable so task creation fails (absent hardware)
//! - break a card's reads so an established session faults mid-run
//! - count configure calls and live task handles per card
//!
//! All mock operations are async-safe and return immediately; pacing comes
//! from the engine's cycle timer, not from the backend.

use super::{CardInfo, InputTask, OutputTask, SignalBackend};
use crate::config::CardConfig;
use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Clone)]
struct OutputProgram {
    channels: Vec<usize>,
    waveforms: Vec<Vec<f64>>,
}

#[derive(Default)]
struct ChassisState {
    /// Active regenerating program per card
    programs: Mutex<HashMap<String, OutputProgram>>,
    /// Cards whose task creation fails entirely
    unreachable: Mutex<HashSet<String>>,
    /// Cards whose input task creation fails
    input_unreachable: Mutex<HashSet<String>>,
    /// Cards whose established input tasks fail on read
    broken_reads: Mutex<HashSet<String>>,
    configure_calls: Mutex<HashMap<String, usize>>,
    outputs_alive: Mutex<HashMap<String, usize>>,
    inputs_alive: Mutex<HashMap<String, usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Loopback chassis backend.
pub struct MockChassis {
    cards: Vec<CardInfo>,
    noise_v: f64,
    state: Arc<ChassisState>,
}

impl MockChassis {
    /// A chassis with the configured cards and noise-free loopback.
    pub fn new(cards: &[CardConfig]) -> Self {
        Self {
            cards: cards
                .iter()
                .map(|card| CardInfo {
                    id: card.id.clone(),
                    product: "Simulated 4468".into(),
                    channels: card.channels,
                })
                .collect(),
            noise_v: 0.0,
            state: Arc::default(),
        }
    }

    /// Add uniform noise of the given magnitude (microvolts) to every input
    /// sample, for more lifelike demo output.
    pub fn with_noise_uv(mut self, noise_uv: f64) -> Self {
        self.noise_v = noise_uv * 1e-6;
        self
    }

    /// Make every task creation on `card` fail, as if the card were absent.
    pub fn fail_task_creation(&self, card: &str) {
        lock(&self.state.unreachable).insert(card.to_owned());
    }

    /// Make only input task creation on `card` fail.
    pub fn fail_input_creation(&self, card: &str) {
        lock(&self.state.input_unreachable).insert(card.to_owned());
    }

    /// Make established input tasks on `card` fail their reads.
    pub fn fail_reads(&self, card: &str) {
        lock(&self.state.broken_reads).insert(card.to_owned());
    }

    /// Clear all injected failures for `card`.
    pub fn restore(&self, card: &str) {
        lock(&self.state.unreachable).remove(card);
        lock(&self.state.input_unreachable).remove(card);
        lock(&self.state.broken_reads).remove(card);
    }

    /// How many times `card`'s output has been (re)configured.
    pub fn configure_count(&self, card: &str) -> usize {
        lock(&self.state.configure_calls)
            .get(card)
            .copied()
            .unwrap_or(0)
    }

    /// Live (output, input) task handles for `card`.
    pub fn alive_tasks(&self, card: &str) -> (usize, usize) {
        (
            lock(&self.state.outputs_alive).get(card).copied().unwrap_or(0),
            lock(&self.state.inputs_alive).get(card).copied().unwrap_or(0),
        )
    }

    /// Whether `card` currently holds a regenerating program.
    pub fn has_program(&self, card: &str) -> bool {
        lock(&self.state.programs).contains_key(card)
    }

    fn card_info(&self, card: &str) -> Option<&CardInfo> {
        self.cards.iter().find(|c| c.id == card)
    }

    fn check_channels(&self, card: &str, channels: &[usize]) -> Result<()> {
        let Some(info) = self.card_info(card) else {
            bail!("unknown card {card}");
        };
        if let Some(bad) = channels.iter().find(|&&ch| ch >= info.channels) {
            bail!("card {card} has no channel {bad}");
        }
        Ok(())
    }
}

#[async_trait]
impl SignalBackend for MockChassis {
    async fn list_cards(&self) -> Result<Vec<CardInfo>> {
        Ok(self.cards.clone())
    }

    async fn create_output_task(
        &self,
        card: &str,
        channels: &[usize],
    ) -> Result<Box<dyn OutputTask>> {
        if lock(&self.state.unreachable).contains(card) {
            bail!("card {card} is not reachable");
        }
        self.check_channels(card, channels)?;
        *lock(&self.state.outputs_alive).entry(card.to_owned()).or_default() += 1;
        Ok(Box::new(MockOutputTask {
            card: card.to_owned(),
            channels: channels.to_vec(),
            running: false,
            released: false,
            state: Arc::clone(&self.state),
        }))
    }

    async fn create_input_task(
        &self,
        card: &str,
        channels: &[usize],
        buffer_secs: f64,
    ) -> Result<Box<dyn InputTask>> {
        if lock(&self.state.unreachable).contains(card)
            || lock(&self.state.input_unreachable).contains(card)
        {
            bail!("card {card} is not reachable");
        }
        self.check_channels(card, channels)?;
        if !(buffer_secs > 0.0) {
            bail!("input buffer must cover a positive time span");
        }
        *lock(&self.state.inputs_alive).entry(card.to_owned()).or_default() += 1;
        Ok(Box::new(MockInputTask {
            card: card.to_owned(),
            channels: channels.to_vec(),
            cursor: 0,
            noise_v: self.noise_v,
            rng: StdRng::seed_from_u64(0x4468),
            released: false,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockOutputTask {
    card: String,
    channels: Vec<usize>,
    running: bool,
    released: bool,
    state: Arc<ChassisState>,
}

#[async_trait]
impl OutputTask for MockOutputTask {
    async fn configure_continuous(
        &mut self,
        sample_rate: f64,
        waveforms: &[Vec<f64>],
    ) -> Result<()> {
        if self.released {
            bail!("output task on {} already released", self.card);
        }
        if self.running {
            bail!("cannot reconfigure a running output task");
        }
        if waveforms.len() != self.channels.len() {
            bail!(
                "{} waveforms for {} bound channels",
                waveforms.len(),
                self.channels.len()
            );
        }
        if !(sample_rate > 0.0) {
            bail!("sample rate must be positive");
        }
        let len = waveforms.first().map_or(0, Vec::len);
        if len == 0 || waveforms.iter().any(|w| w.len() != len) {
            bail!("waveforms must share one non-zero length");
        }

        *lock(&self.state.configure_calls)
            .entry(self.card.clone())
            .or_default() += 1;
        lock(&self.state.programs).insert(
            self.card.clone(),
            OutputProgram {
                channels: self.channels.clone(),
                waveforms: waveforms.to_vec(),
            },
        );
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        if !lock(&self.state.programs).contains_key(&self.card) {
            bail!("output task on {} started before configuration", self.card);
        }
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            self.running = false;
            lock(&self.state.programs).remove(&self.card);
            if let Some(count) = lock(&self.state.outputs_alive).get_mut(&self.card) {
                *count = count.saturating_sub(1);
            }
        }
        Ok(())
    }
}

struct MockInputTask {
    card: String,
    channels: Vec<usize>,
    cursor: usize,
    noise_v: f64,
    rng: StdRng,
    released: bool,
    state: Arc<ChassisState>,
}

#[async_trait]
impl InputTask for MockInputTask {
    async fn start(&mut self) -> Result<()> {
        if self.released {
            bail!("input task on {} already released", self.card);
        }
        Ok(())
    }

    async fn read_batch(
        &mut self,
        samples_per_channel: usize,
        _timeout: Duration,
    ) -> Result<Vec<Vec<f64>>> {
        if lock(&self.state.broken_reads).contains(&self.card) {
            bail!("simulated read failure on card {}", self.card);
        }

        let programs = lock(&self.state.programs);
        let program = programs.get(&self.card);

        let mut batches = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let waveform = program.and_then(|p| {
                p.channels
                    .iter()
                    .position(|ch| ch == channel)
                    .map(|i| &p.waveforms[i])
            });
            let mut samples = Vec::with_capacity(samples_per_channel);
            for k in 0..samples_per_channel {
                let mut sample = waveform.map_or(0.0, |w| w[(self.cursor + k) % w.len()]);
                if self.noise_v > 0.0 {
                    sample += self.rng.gen_range(-self.noise_v..=self.noise_v);
                }
                samples.push(sample);
            }
            batches.push(samples);
        }
        drop(programs);

        self.cursor += samples_per_channel;
        Ok(batches)
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            if let Some(count) = lock(&self.state.inputs_alive).get_mut(&self.card) {
                *count = count.saturating_sub(1);
            }
        }
        Ok(())
    }
}
