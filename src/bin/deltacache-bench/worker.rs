//! Worker thread for in-process cache benchmarking.

use crate::config::Config;
use crate::metrics;

use deltacache::{DeltaCache, Handle};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::trace;

/// Multiplier of the key scrambler. Odd, so the mapping is a bijection.
const KEY_SCRAMBLE: u32 = 0x9e37_79b1;

/// Test phase, controlled by main thread and read by workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Write each key of the worker's prefill range once.
    Prefill = 0,
    /// Run the workload without recording.
    Warmup = 1,
    /// Run the workload and record.
    Running = 2,
    /// Workers exit.
    Stop = 3,
}

impl Phase {
    #[inline]
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Phase::Prefill,
            1 => Phase::Warmup,
            2 => Phase::Running,
            _ => Phase::Stop,
        }
    }
}

/// Shared state between main thread and workers.
pub struct SharedState {
    phase: AtomicU8,
    prefill_complete: AtomicUsize,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Prefill as u8),
            prefill_complete: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn mark_prefill_complete(&self) {
        self.prefill_complete.fetch_add(1, Ordering::Release);
    }

    pub fn prefill_complete_count(&self) -> usize {
        self.prefill_complete.load(Ordering::Acquire)
    }
}

/// Map a key id onto the pre-hashed key space.
///
/// Segments own contiguous ranges of home buckets, so sequential ids would
/// load them one after another. Scrambling spreads ids over all segments.
#[inline]
pub fn key_for(id: usize) -> u32 {
    (id as u32).wrapping_mul(KEY_SCRAMBLE)
}

/// Value stored for a key id. Never zero.
#[inline]
fn handle_for(id: usize) -> Handle {
    Handle::new(std::num::NonZeroU64::MIN.saturating_add(id as u64))
}

/// Run a single worker thread.
pub fn run_worker(
    id: usize,
    config: &Config,
    cache: &DeltaCache,
    shared: &SharedState,
    prefill_range: Option<std::ops::Range<usize>>,
) {
    let key_count = config.workload.keyspace.count;
    let get_threshold = config.workload.commands.get;
    let put_threshold = get_threshold + config.workload.commands.put;

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42 + id as u64);

    if let Some(range) = prefill_range {
        let mut rejected = 0usize;
        for key_id in range {
            if cache.put(key_for(key_id), handle_for(key_id)).is_err() {
                rejected += 1;
            }
        }
        trace!(worker = id, rejected, "prefill done");
    }
    shared.mark_prefill_complete();

    loop {
        let phase = shared.phase();
        match phase {
            Phase::Prefill => {
                std::hint::spin_loop();
                continue;
            }
            Phase::Stop => break,
            Phase::Warmup | Phase::Running => {}
        }

        let key_id = rng.random_range(0..key_count);
        let key = key_for(key_id);

        let roll: u8 = rng.random_range(0..100);
        let recording = phase == Phase::Running;

        if roll < get_threshold {
            let start = Instant::now();
            let hit = cache.get(key).is_some();
            let elapsed_ns = start.elapsed().as_nanos() as u64;

            if recording {
                metrics::GET_COUNT.increment();
                metrics::COMPLETED_COUNT.increment();
                if hit {
                    metrics::CACHE_HITS.increment();
                } else {
                    metrics::CACHE_MISSES.increment();
                }
                let _ = metrics::RESPONSE_LATENCY.increment(elapsed_ns);
                let _ = metrics::GET_LATENCY.increment(elapsed_ns);
            }
        } else if roll < put_threshold {
            let start = Instant::now();
            let result = cache.put(key, handle_for(key_id));
            let elapsed_ns = start.elapsed().as_nanos() as u64;

            if recording {
                metrics::PUT_COUNT.increment();
                metrics::COMPLETED_COUNT.increment();
                match result {
                    Ok(None) => {}
                    Ok(Some(_)) => {
                        metrics::PUT_EXISTS.increment();
                    }
                    Err(_) => {
                        metrics::PUT_ERRORS.increment();
                    }
                }
                let _ = metrics::RESPONSE_LATENCY.increment(elapsed_ns);
                let _ = metrics::PUT_LATENCY.increment(elapsed_ns);
            }
        } else {
            let start = Instant::now();
            let removed = cache.remove(key).is_some();
            let elapsed_ns = start.elapsed().as_nanos() as u64;

            if recording {
                metrics::REMOVE_COUNT.increment();
                metrics::COMPLETED_COUNT.increment();
                if removed {
                    metrics::REMOVE_HITS.increment();
                }
                let _ = metrics::RESPONSE_LATENCY.increment(elapsed_ns);
                let _ = metrics::REMOVE_LATENCY.increment(elapsed_ns);
            }
        }
    }
}
