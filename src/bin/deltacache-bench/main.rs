//! In-process cache benchmark. Drives a shared `DeltaCache` from worker
//! threads with a configurable get/put/remove mix.

mod config;
mod logging;
mod metrics;
mod worker;

use crate::config::Config;
use crate::worker::{Phase, SharedState};

use clap::Parser;
use deltacache::{DeltaCache, MetricsSnapshot};
use metriken::{AtomicHistogram, histogram::Histogram};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "deltacache-bench")]
#[command(about = "In-process cache benchmark")]
struct Args {
    /// Path to configuration file
    config: PathBuf,
}

fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    logging::init(&config.logging);

    if let Err(e) = run(config) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let cache = Arc::new(DeltaCache::from_config(&config.cache)?);
    print_config(&config, &cache);

    info!(
        capacity = cache.capacity(),
        segments = cache.num_segments(),
        line_span = cache.line_span(),
        overflow_span = cache.overflow_span(),
        "cache created"
    );

    let num_threads = config.general.threads;
    let warmup = config.general.warmup;
    let duration = config.general.duration;

    let shared = Arc::new(SharedState::new());

    let prefill_ranges: Vec<Option<std::ops::Range<usize>>> = if config.workload.prefill {
        let key_count = config.workload.keyspace.count;
        let keys_per_worker = key_count / num_threads;
        let remainder = key_count % num_threads;
        (0..num_threads)
            .map(|id| {
                let start = id * keys_per_worker + id.min(remainder);
                let count = keys_per_worker + usize::from(id < remainder);
                Some(start..start + count)
            })
            .collect()
    } else {
        vec![None; num_threads]
    };

    // Signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    if config.workload.prefill {
        info!(
            keys = config.workload.keyspace.count,
            threads = num_threads,
            "prefilling"
        );
        shared.set_phase(Phase::Prefill);
    } else {
        shared.set_phase(Phase::Warmup);
    }

    let config = Arc::new(config);
    let mut handles = Vec::with_capacity(num_threads);

    for (id, prefill_range) in prefill_ranges.into_iter().enumerate() {
        let cache = Arc::clone(&cache);
        let shared = Arc::clone(&shared);
        let config = Arc::clone(&config);

        let handle = thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || {
                worker::run_worker(id, &config, &cache, &shared, prefill_range);
            })?;

        handles.push(handle);
    }

    // Main thread: reporting loop
    let start = Instant::now();
    let report_interval = Duration::from_secs(1);
    let mut last_report = Instant::now();
    let mut last_completed = 0u64;
    let mut last_hits = 0u64;
    let mut last_misses = 0u64;
    let mut last_cache = MetricsSnapshot::default();
    let mut last_histogram: Option<Histogram> = None;
    let mut run_start: Option<Instant> = None;
    let mut current_phase = if config.workload.prefill {
        Phase::Prefill
    } else {
        Phase::Warmup
    };
    let mut warmup_start: Option<Instant> = if config.workload.prefill {
        None
    } else {
        Some(start)
    };

    loop {
        thread::sleep(Duration::from_millis(100));

        if !running.load(Ordering::SeqCst) {
            info!("interrupted, stopping workers");
            shared.set_phase(Phase::Stop);
            break;
        }

        if current_phase == Phase::Prefill {
            if shared.prefill_complete_count() >= num_threads {
                info!(
                    size = cache.size(),
                    table_full = cache.metrics().snapshot().table_full,
                    elapsed = ?start.elapsed(),
                    "prefill complete, warming up for {:?}",
                    warmup
                );
                shared.set_phase(Phase::Warmup);
                current_phase = Phase::Warmup;
                warmup_start = Some(Instant::now());
            }
            continue;
        }

        let elapsed = warmup_start.unwrap_or(start).elapsed();

        if elapsed >= warmup + duration {
            shared.set_phase(Phase::Stop);
            break;
        }

        if current_phase == Phase::Warmup && elapsed >= warmup {
            shared.set_phase(Phase::Running);
            current_phase = Phase::Running;
            info!("running for {:?}", duration);
            print_header();
            last_report = Instant::now();
            last_completed = metrics::COMPLETED_COUNT.value();
            last_hits = metrics::CACHE_HITS.value();
            last_misses = metrics::CACHE_MISSES.value();
            last_cache = cache.metrics().snapshot();
            last_histogram = metrics::RESPONSE_LATENCY.load();
            run_start = Some(Instant::now());
        }

        if current_phase != Phase::Running {
            continue;
        }

        if last_report.elapsed() >= report_interval {
            let completed = metrics::COMPLETED_COUNT.value();
            let hits = metrics::CACHE_HITS.value();
            let misses = metrics::CACHE_MISSES.value();
            let snapshot = cache.metrics().snapshot();

            let elapsed_secs = last_report.elapsed().as_secs_f64();
            let rate = (completed - last_completed) as f64 / elapsed_secs;

            let delta_hits = hits - last_hits;
            let delta_gets = delta_hits + (misses - last_misses);
            let hit_pct = if delta_gets > 0 {
                (delta_hits as f64 / delta_gets as f64) * 100.0
            } else {
                0.0
            };

            // Interval percentiles via wrapping_sub
            let current_histogram = metrics::RESPONSE_LATENCY.load();
            let latencies = match (&current_histogram, &last_histogram) {
                (Some(current), Some(previous)) => match current.wrapping_sub(previous) {
                    Ok(delta) => latency_us(&delta),
                    Err(_) => [0.0; 5],
                },
                (Some(current), None) => latency_us(current),
                _ => [0.0; 5],
            };
            last_histogram = current_histogram;
            let [p50, p90, p99, p999, max] = latencies;

            println!(
                "{:>12.0} {:>7.1}% {:>10.1} {:>10.1} {:>10.1} {:>10.1} {:>10.1} {:>10} {:>10}",
                rate,
                hit_pct,
                p50,
                p90,
                p99,
                p999,
                max,
                snapshot.read_retries - last_cache.read_retries,
                snapshot.relocations - last_cache.relocations,
            );

            last_completed = completed;
            last_hits = hits;
            last_misses = misses;
            last_cache = snapshot;
            last_report = Instant::now();
        }
    }

    for handle in handles {
        if handle.join().is_err() {
            error!("worker thread panicked");
        }
    }

    // an interrupted run reports over the time it actually ran
    let elapsed = run_start.map_or(Duration::ZERO, |start| start.elapsed());
    print_summary(&cache, elapsed.min(duration));

    Ok(())
}

fn print_config(config: &Config, cache: &DeltaCache) {
    eprintln!("deltacache-bench configuration:");
    eprintln!("  capacity:   {}", cache.capacity());
    eprintln!("  segments:   {}", cache.num_segments());
    eprintln!("  line_size:  {} bytes", config.cache.line_size);
    eprintln!("  placement:  {}", config.cache.cacheline_placement);
    eprintln!("  overflow:   {}", config.cache.overflow_span);
    eprintln!("  threads:    {}", config.general.threads);
    eprintln!("  duration:   {:?}", config.general.duration);
    eprintln!("  warmup:     {:?}", config.general.warmup);
    eprintln!(
        "  commands:   get={} put={} remove={}",
        config.workload.commands.get, config.workload.commands.put, config.workload.commands.remove,
    );
    eprintln!("  keyspace:   {} keys", config.workload.keyspace.count);
    eprintln!("  logging:    {} ({})", config.logging.level, config.logging.format);
    eprintln!();
}

fn print_header() {
    println!(
        "{:>12} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "ops/sec", "hit%", "p50(us)", "p90(us)", "p99(us)", "p999(us)", "max(us)", "retries",
        "relocated",
    );
    println!("{}", "-".repeat(104));
}

fn print_summary(cache: &DeltaCache, elapsed: Duration) {
    let gets = metrics::GET_COUNT.value();
    let puts = metrics::PUT_COUNT.value();
    let removes = metrics::REMOVE_COUNT.value();
    let completed = metrics::COMPLETED_COUNT.value();
    let put_exists = metrics::PUT_EXISTS.value();
    let put_errors = metrics::PUT_ERRORS.value();
    let remove_hits = metrics::REMOVE_HITS.value();
    let hits = metrics::CACHE_HITS.value();
    let misses = metrics::CACHE_MISSES.value();

    let total_gets = hits + misses;
    let hit_pct = if total_gets > 0 {
        (hits as f64 / total_gets as f64) * 100.0
    } else {
        0.0
    };

    let elapsed = elapsed.as_secs_f64();
    let avg_rate = if elapsed > 0.0 {
        completed as f64 / elapsed
    } else {
        0.0
    };

    let snapshot = cache.metrics().snapshot();

    eprintln!();
    eprintln!("=== Final Summary ===");
    eprintln!("  total ops:    {completed}");
    eprintln!("  avg ops/sec:  {avg_rate:.0}");
    eprintln!("  gets:         {gets}");
    eprintln!("  puts:         {puts} (exists: {put_exists}, errors: {put_errors})");
    eprintln!("  removes:      {removes} (hits: {remove_hits})");
    eprintln!("  hit rate:     {hit_pct:.1}%");
    eprintln!();
    eprintln!("  size:         {}", cache.size());
    match cache.cacheline_locality() {
        Some(locality) => eprintln!("  locality:     {locality:.1}%"),
        None => eprintln!("  locality:     n/a"),
    }
    eprintln!("  read retries: {}", snapshot.read_retries);
    eprintln!("  overflowed:   {}", snapshot.overflow_placements);
    eprintln!("  relocations:  {}", snapshot.relocations);
    eprintln!("  table full:   {}", snapshot.table_full);
    eprintln!();

    // Per-operation latency breakdown
    print_latency_summary("GET", &metrics::GET_LATENCY);
    print_latency_summary("PUT", &metrics::PUT_LATENCY);
    if removes > 0 {
        print_latency_summary("REMOVE", &metrics::REMOVE_LATENCY);
    }
    print_latency_summary("ALL", &metrics::RESPONSE_LATENCY);
}

fn print_latency_summary(label: &str, hist: &AtomicHistogram) {
    let [p50, p90, p99, p999, max] = match hist.load() {
        Some(snapshot) => latency_us(&snapshot),
        None => [0.0; 5],
    };

    eprintln!(
        "  {label:<6} latency (us): p50={p50:.1}  p90={p90:.1}  p99={p99:.1}  p999={p999:.1}  max={max:.1}",
    );
}

// --- Histogram helpers ---

/// p50, p90, p99, p99.9 and max of a nanosecond histogram, in microseconds.
fn latency_us(hist: &Histogram) -> [f64; 5] {
    [50.0, 90.0, 99.0, 99.9, 100.0].map(|p| percentile_from_histogram(hist, p) / 1000.0)
}

fn percentile_from_histogram(hist: &Histogram, p: f64) -> f64 {
    if let Ok(Some(results)) = hist.percentiles(&[p])
        && let Some((_pct, bucket)) = results.first()
    {
        return bucket.end() as f64;
    }
    0.0
}
