//! The acquisition engine: session provisioning, the continuous
//! output+monitoring loop, and fault isolation.
//!
//! One dedicated worker task owns every [`CardSession`] and executes the
//! whole running-state loop sequentially — provisioning, buffer rewrites,
//! input polling, measurement publication. Nothing else ever touches a task
//! handle, which sidesteps the concurrent-handle-access restrictions of
//! driver APIs. The presentation side communicates through shared state
//! (registry, scope bank, [`GenerationState`]) and a broadcast status
//! channel; errors discovered inside the loop never cross the task boundary
//! as panics or return values.
//!
//! # Lifecycle
//!
//! `Idle → Starting → Running → Stopping → Idle`. The transient phases live
//! entirely inside [`AcquisitionEngine::start`] and
//! [`AcquisitionEngine::stop`]; externally only `running` is observable.
//! `start` is atomic: either every card with enabled channels comes up, or
//! every session opened by the attempt is torn down again and the engine
//! stays idle. `stop` awaits the worker, so when it returns all hardware
//! resources are released and a following `start` cannot race an in-flight
//! teardown. Dropping the engine while running has the same effect as
//! `stop`: the worker notices the closed shutdown channel and unwinds.

use crate::advisor::{self, RateAdvice};
use crate::config::StimConfig;
use crate::error::{StimError, StimResult};
use crate::hardware::session::CardSession;
use crate::hardware::SignalBackend;
use crate::measurement::SignalStats;
use crate::registry::{ChannelLevel, ChannelRegistry};
use crate::scope::ScopeBank;
use crate::waveform;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// The process-wide generation state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GenerationState {
    /// Selected output frequency, Hz
    pub frequency: f64,
    /// Converter rate all sessions are clocked at, S/s
    pub sample_rate: f64,
    /// Whether the worker loop is active
    pub running: bool,
}

/// Events published on the engine status channel.
///
/// The presentation layer subscribes and polls; a lagging subscriber misses
/// old events rather than blocking the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Generation came up on all required cards
    Started {
        /// Selected frequency, Hz
        frequency: f64,
        /// Advised converter rate, S/s
        sample_rate: f64,
    },
    /// Generation stopped and all sessions are released
    Stopped,
    /// A running frequency change was applied to every card
    RateChanged {
        /// New frequency, Hz
        frequency: f64,
        /// New converter rate, S/s
        sample_rate: f64,
    },
    /// One card failed and was excluded; remaining cards continue
    CardFault {
        /// The affected card
        card: String,
        /// Driver-reported failure
        message: String,
        /// When the fault was observed
        at: DateTime<Utc>,
    },
}

/// The multi-card generation/acquisition engine.
pub struct AcquisitionEngine {
    config: Arc<StimConfig>,
    backend: Arc<dyn SignalBackend>,
    registry: Arc<ChannelRegistry>,
    scopes: Arc<ScopeBank>,
    state: Arc<RwLock<GenerationState>>,
    events: broadcast::Sender<EngineEvent>,
    worker: Mutex<Option<WorkerHandle>>,
}

struct WorkerHandle {
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl AcquisitionEngine {
    /// Wire the engine against a backend and the shared tables.
    pub fn new(
        backend: Arc<dyn SignalBackend>,
        registry: Arc<ChannelRegistry>,
        scopes: Arc<ScopeBank>,
        config: Arc<StimConfig>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            backend,
            registry,
            scopes,
            state: Arc::new(RwLock::new(GenerationState::default())),
            events,
            worker: Mutex::new(None),
        }
    }

    /// Current generation state (copy).
    pub fn generation_state(&self) -> GenerationState {
        read_state(&self.state)
    }

    /// Whether generation is running.
    pub fn is_running(&self) -> bool {
        read_state(&self.state).running
    }

    /// Subscribe to the status channel.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Record a new target frequency.
    ///
    /// Validated immediately; applied by the worker on its next cycle when
    /// running (all cards are regenerated — frequency is global). When idle
    /// the value simply becomes the default for the next `start`.
    pub fn set_frequency(&self, frequency: f64) -> StimResult<RateAdvice> {
        let advice = advisor::advise(frequency)?;
        ensure_synthesizable(frequency, &advice)?;
        update_state(&self.state, |state| state.frequency = frequency);
        Ok(advice)
    }

    /// Start continuous generation at `frequency`.
    ///
    /// Provisions one session per card with enabled channels. Atomic: if any
    /// session fails to come up, everything opened by this call is torn down
    /// (reverse order) and the engine stays idle.
    pub async fn start(&self, frequency: f64) -> StimResult<RateAdvice> {
        let mut slot = self.worker.lock().await;
        if slot.is_some() {
            return Err(StimError::AlreadyRunning);
        }

        let advice = advisor::advise(frequency)?;
        ensure_synthesizable(frequency, &advice)?;

        let plan = self.registry.snapshot_enabled_by_card();
        if plan.is_empty() {
            return Err(StimError::NoChannelsEnabled);
        }

        let mut sessions: Vec<CardSession> = Vec::with_capacity(plan.len());
        for (card, levels) in &plan {
            let provisioned = CardSession::provision(
                self.backend.as_ref(),
                card,
                levels,
                frequency,
                advice.sample_rate,
                self.config.engine.cycles_per_buffer,
                self.config.hardware.input_buffer_secs,
            )
            .await;
            match provisioned {
                Ok(session) => sessions.push(session),
                Err(source) => {
                    for opened in sessions.iter_mut().rev() {
                        opened.teardown().await;
                    }
                    return Err(StimError::Provisioning {
                        card: card.clone(),
                        source,
                    });
                }
            }
        }

        update_state(&self.state, |state| {
            *state = GenerationState {
                frequency,
                sample_rate: advice.sample_rate,
                running: true,
            };
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Worker {
            config: Arc::clone(&self.config),
            backend: Arc::clone(&self.backend),
            registry: Arc::clone(&self.registry),
            scopes: Arc::clone(&self.scopes),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            sessions,
            frequency,
            sample_rate: advice.sample_rate,
            faulted: HashMap::new(),
        };
        let task = tokio::spawn(worker.run(shutdown_rx));
        *slot = Some(WorkerHandle {
            task,
            shutdown: shutdown_tx,
        });

        info!(
            frequency,
            sample_rate = advice.sample_rate,
            cards = plan.len(),
            "generation started"
        );
        let _ = self.events.send(EngineEvent::Started {
            frequency,
            sample_rate: advice.sample_rate,
        });
        Ok(advice)
    }

    /// Stop generation and release every session.
    ///
    /// Idempotent and infallible: release problems are logged by the worker,
    /// and calling this while idle is a no-op. On return the worker has
    /// exited and no hardware task remains allocated.
    pub async fn stop(&self) {
        let mut slot = self.worker.lock().await;
        let Some(handle) = slot.take() else {
            return;
        };
        let _ = handle.shutdown.send(true);
        if let Err(err) = handle.task.await {
            warn!(%err, "engine worker did not exit cleanly");
        }
        update_state(&self.state, |state| state.running = false);
        let _ = self.events.send(EngineEvent::Stopped);
        info!("generation stopped");
    }
}

fn ensure_synthesizable(frequency: f64, advice: &RateAdvice) -> StimResult<()> {
    if advice.samples_per_cycle < waveform::MIN_SAMPLES_PER_CYCLE as f64 {
        return Err(StimError::FrequencyTooHigh {
            frequency,
            sample_rate: advice.sample_rate,
        });
    }
    Ok(())
}

fn read_state(state: &RwLock<GenerationState>) -> GenerationState {
    *state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn update_state(state: &RwLock<GenerationState>, apply: impl FnOnce(&mut GenerationState)) {
    let mut guard = state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    apply(&mut guard);
}

/// The loop body. Owns all sessions; consumed by `run`.
struct Worker {
    config: Arc<StimConfig>,
    backend: Arc<dyn SignalBackend>,
    registry: Arc<ChannelRegistry>,
    scopes: Arc<ScopeBank>,
    state: Arc<RwLock<GenerationState>>,
    events: broadcast::Sender<EngineEvent>,
    sessions: Vec<CardSession>,
    frequency: f64,
    sample_rate: f64,
    /// Cards excluded after a fault, with the configuration they faulted
    /// under. A card is retried once its configuration differs.
    faulted: HashMap<String, Vec<ChannelLevel>>,
}

impl Worker {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.engine.cycle_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.cycle().await,
            }
        }
        // Reverse order of acquisition, newest session first.
        for session in self.sessions.iter_mut().rev() {
            session.teardown().await;
        }
        self.sessions.clear();
    }

    async fn cycle(&mut self) {
        self.apply_frequency_change().await;
        let plan = self.registry.snapshot_enabled_by_card();
        self.reconcile(&plan).await;
        self.poll_inputs().await;
    }

    /// Apply a frequency edit observed in the shared state. Frequency is
    /// global: at an unchanged converter rate every card's buffers are
    /// rewritten in place; a rate change rebuilds every session.
    async fn apply_frequency_change(&mut self) {
        let requested = read_state(&self.state).frequency;
        if requested == self.frequency {
            return;
        }
        let advice = match advisor::advise(requested) {
            Ok(advice)
                if advice.samples_per_cycle >= waveform::MIN_SAMPLES_PER_CYCLE as f64 =>
            {
                advice
            }
            _ => {
                // set_frequency validates before publishing, so this state
                // was poked some other way; keep the active frequency.
                warn!(requested, "ignoring unusable frequency in shared state");
                update_state(&self.state, |state| state.frequency = self.frequency);
                return;
            }
        };

        info!(
            from = self.frequency,
            to = requested,
            sample_rate = advice.sample_rate,
            "applying frequency change to all cards"
        );
        self.frequency = requested;
        self.faulted.clear();

        if advice.sample_rate == self.sample_rate {
            let cycles = self.config.engine.cycles_per_buffer;
            let mut kept = Vec::with_capacity(self.sessions.len());
            for mut session in std::mem::take(&mut self.sessions) {
                let levels = session.levels().to_vec();
                match session.rewrite_output(&levels, requested, cycles).await {
                    Ok(()) => kept.push(session),
                    Err(err) => {
                        let card = session.card().to_owned();
                        session.teardown().await;
                        self.fault(&card, &err.to_string(), levels);
                    }
                }
            }
            self.sessions = kept;
        } else {
            self.sample_rate = advice.sample_rate;
            // The input buffers are sized by rate; reconcile() re-provisions
            // every card from the current snapshot.
            let mut old = std::mem::take(&mut self.sessions);
            for session in old.iter_mut().rev() {
                session.teardown().await;
            }
        }

        update_state(&self.state, |state| {
            state.frequency = self.frequency;
            state.sample_rate = self.sample_rate;
        });
        let _ = self.events.send(EngineEvent::RateChanged {
            frequency: self.frequency,
            sample_rate: self.sample_rate,
        });
    }

    /// Bring the session set in line with the registry snapshot: tear down
    /// cards with nothing enabled, rewrite buffers where only levels moved,
    /// rebuild where the channel set changed, and lazily provision cards
    /// that gained their first enabled channel.
    async fn reconcile(&mut self, plan: &BTreeMap<String, Vec<ChannelLevel>>) {
        let cycles = self.config.engine.cycles_per_buffer;

        let mut kept = Vec::with_capacity(self.sessions.len());
        for mut session in std::mem::take(&mut self.sessions) {
            match plan.get(session.card()) {
                None => {
                    debug!(card = session.card(), "last channel disabled; tearing down");
                    session.teardown().await;
                }
                Some(levels) if session.levels_match(levels) => kept.push(session),
                Some(levels) if session.same_channel_set(levels) => {
                    match session.rewrite_output(levels, self.frequency, cycles).await {
                        Ok(()) => kept.push(session),
                        Err(err) => {
                            let card = session.card().to_owned();
                            session.teardown().await;
                            self.fault(&card, &err.to_string(), levels.clone());
                        }
                    }
                }
                Some(_) => {
                    // Channel set changed: the card's tasks are rebuilt below.
                    debug!(card = session.card(), "channel set changed; rebuilding");
                    session.teardown().await;
                }
            }
        }
        self.sessions = kept;

        for (card, levels) in plan {
            if self.sessions.iter().any(|session| session.card() == card) {
                continue;
            }
            if self.faulted.get(card) == Some(levels) {
                continue; // unchanged since the fault; wait for an edit
            }
            let provisioned = CardSession::provision(
                self.backend.as_ref(),
                card,
                levels,
                self.frequency,
                self.sample_rate,
                cycles,
                self.config.hardware.input_buffer_secs,
            )
            .await;
            match provisioned {
                Ok(session) => {
                    self.faulted.remove(card);
                    self.sessions.push(session);
                }
                Err(err) => self.fault(card, &err.to_string(), levels.clone()),
            }
        }
    }

    /// Read the newest batch from every active session, publish RMS/peak,
    /// and feed the scope rings. A failing card is torn down and excluded;
    /// the others keep streaming.
    async fn poll_inputs(&mut self) {
        let batch_len = (self.sample_rate * 0.1).max(5_000.0) as usize;
        let timeout = self.config.engine.read_timeout;

        let mut kept = Vec::with_capacity(self.sessions.len());
        for mut session in std::mem::take(&mut self.sessions) {
            match session.read_batch(batch_len, timeout).await {
                Ok(batches) => {
                    let card = session.card().to_owned();
                    for (level, samples) in session.levels().iter().zip(&batches) {
                        let stats = SignalStats::from_batch(samples);
                        if let Err(err) =
                            self.registry.publish_measurement(&card, level.channel, stats)
                        {
                            warn!(%err, "measurement publish failed");
                        }
                        if let Some(buffer) = self.scopes.buffer(&card, level.channel) {
                            buffer.append(samples);
                        }
                    }
                    kept.push(session);
                }
                Err(err) => {
                    let card = session.card().to_owned();
                    let levels = session.levels().to_vec();
                    session.teardown().await;
                    self.fault(&card, &err.to_string(), levels);
                }
            }
        }
        self.sessions = kept;
    }

    fn fault(&mut self, card: &str, message: &str, levels: Vec<ChannelLevel>) {
        warn!(card, message, "card faulted; excluded until its configuration changes");
        self.faulted.insert(card.to_owned(), levels);
        let _ = self.events.send(EngineEvent::CardFault {
            card: card.to_owned(),
            message: message.to_owned(),
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesizability_boundary() {
        // 1 MHz at the 2 MS/s ceiling is exactly two samples per cycle.
        let advice = advisor::advise(1_000_000.0).unwrap();
        assert!(ensure_synthesizable(1_000_000.0, &advice).is_ok());

        let advice = advisor::advise(1_500_000.0).unwrap();
        assert!(matches!(
            ensure_synthesizable(1_500_000.0, &advice),
            Err(StimError::FrequencyTooHigh { .. })
        ));
    }

    #[test]
    fn state_defaults_to_idle() {
        let state = GenerationState::default();
        assert!(!state.running);
        assert_eq!(state.frequency, 0.0);
    }
}
