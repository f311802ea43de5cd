//! Bounded waveform rings for the display layer.
//!
//! Each monitored channel owns one [`ScopeBuffer`]: a fixed-capacity ring
//! the engine appends batches to and the plot widget reads via point-in-time
//! snapshots. Writers and readers synchronize on a short-lived per-buffer
//! lock, so a snapshot can never observe a batch mid-write and appending
//! never blocks on a slow reader. Clipping policy is deliberately absent —
//! the buffer holds raw values and the display layer applies its own margin
//! (see [`crate::measurement::is_clipping`]).

use crate::config::CardConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Fixed-capacity sample ring for one channel.
pub struct ScopeBuffer {
    capacity: usize,
    inner: Mutex<VecDeque<f64>>,
}

impl ScopeBuffer {
    /// Create a ring holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<f64>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a batch, discarding the oldest samples beyond capacity.
    pub fn append(&self, samples: &[f64]) {
        let mut ring = self.lock();
        if samples.len() >= self.capacity {
            // The batch alone fills the ring; only its tail survives.
            ring.clear();
            ring.extend(&samples[samples.len() - self.capacity..]);
            return;
        }
        let overflow = (ring.len() + samples.len()).saturating_sub(self.capacity);
        ring.drain(..overflow);
        ring.extend(samples);
    }

    /// A consistent point-in-time copy, oldest sample first.
    pub fn snapshot(&self) -> Vec<f64> {
        self.lock().iter().copied().collect()
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the ring holds no samples.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of samples the ring can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all held samples.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// One [`ScopeBuffer`] per configured (card, channel) pair.
///
/// The bank is built once at startup, so lookups need no lock of their own;
/// only the individual buffers synchronize.
pub struct ScopeBank {
    buffers: HashMap<(String, usize), Arc<ScopeBuffer>>,
}

impl ScopeBank {
    /// Allocate rings for every channel of every configured card.
    pub fn new(cards: &[CardConfig], capacity: usize) -> Self {
        let mut buffers = HashMap::new();
        for card in cards {
            for channel in 0..card.channels {
                buffers.insert(
                    (card.id.clone(), channel),
                    Arc::new(ScopeBuffer::new(capacity)),
                );
            }
        }
        Self { buffers }
    }

    /// The ring for one channel, if the pair is configured.
    pub fn buffer(&self, card: &str, channel: usize) -> Option<Arc<ScopeBuffer>> {
        self.buffers.get(&(card.to_owned(), channel)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn ring_never_exceeds_capacity() {
        let ring = ScopeBuffer::new(100);
        for chunk in 0..7 {
            let batch: Vec<f64> = (0..30).map(|i| (chunk * 30 + i) as f64).collect();
            ring.append(&batch);
            assert!(ring.len() <= 100);
        }
        assert_eq!(ring.len(), 100);
    }

    #[test]
    fn snapshot_returns_the_most_recent_samples() {
        let ring = ScopeBuffer::new(5);
        ring.append(&[1.0, 2.0, 3.0, 4.0]);
        ring.append(&[5.0, 6.0, 7.0]);
        assert_eq!(ring.snapshot(), vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn oversized_batch_keeps_only_its_tail() {
        let ring = ScopeBuffer::new(4);
        let batch: Vec<f64> = (0..10).map(f64::from).collect();
        ring.append(&batch);
        assert_eq!(ring.snapshot(), vec![6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn concurrent_append_and_snapshot() {
        let ring = Arc::new(ScopeBuffer::new(1000));

        let writer_ring = Arc::clone(&ring);
        let writer = thread::spawn(move || {
            for i in 0..500 {
                let batch = vec![i as f64; 40];
                writer_ring.append(&batch);
            }
        });

        let reader_ring = Arc::clone(&ring);
        let reader = thread::spawn(move || {
            for _ in 0..200 {
                let snap = reader_ring.snapshot();
                assert!(snap.len() <= 1000);
                // Batches are written whole under the lock and capacity is a
                // multiple of the batch size, so a snapshot must decompose
                // into uniform 40-sample batches — a mixed chunk would mean a
                // torn write.
                assert_eq!(snap.len() % 40, 0);
                for chunk in snap.chunks(40) {
                    assert!(chunk.iter().all(|&s| s == chunk[0]));
                }
            }
        });

        writer.join().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn bank_covers_every_configured_channel() {
        let cards = vec![
            CardConfig {
                id: "SV1".into(),
                channels: 2,
            },
            CardConfig {
                id: "SV2".into(),
                channels: 1,
            },
        ];
        let bank = ScopeBank::new(&cards, 64);
        assert!(bank.buffer("SV1", 0).is_some());
        assert!(bank.buffer("SV1", 1).is_some());
        assert!(bank.buffer("SV2", 0).is_some());
        assert!(bank.buffer("SV2", 1).is_none());
        assert!(bank.buffer("SV9", 0).is_none());
    }
}
