//! Process-wide configuration for rowsort.
//!
//! Values are initialized from environment variables on first access and
//! can be overridden at runtime via the setter functions.
//!
//! # Scratch storage
//!
//! - `ROWSORT_CACHE_CAPACITY`: total bytes of scratch data kept in RAM
//!   before containers spill to the scratch directory. Default: 2 GiB.
//! - `ROWSORT_CACHE_CAPACITY_PER_FILE`: largest single scratch file kept
//!   in RAM. Default: 128 MiB.
//!
//! # Sorting
//!
//! - `ROWSORT_MEMORY_THRESHOLD`: fraction of the memory budget above which
//!   memory counts as low and the chunk builder flushes. Default: 0.8.
//! - `ROWSORT_MEMORY_LIMIT`: memory budget in bytes. `0` means "use the
//!   total system memory". Default: 0.
//! - `ROWSORT_MEMORY_POLL_INTERVAL_MS`: minimum time between two memory
//!   samples. Default: 50.
//! - `ROWSORT_MAX_OPEN_CONTAINERS`: merge fan-in. Default: 40.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Once;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const DEFAULT_CACHE_CAPACITY: usize = 2 * 1024 * 1024 * 1024; // 2 GiB
const DEFAULT_CACHE_CAPACITY_PER_FILE: usize = 128 * 1024 * 1024; // 128 MiB
const DEFAULT_MEMORY_THRESHOLD: f64 = 0.8;
const DEFAULT_MEMORY_POLL_INTERVAL_MS: usize = 50;
pub const DEFAULT_MAX_OPEN_CONTAINERS: usize = 40;

// ---------------------------------------------------------------------------
// Atomic globals
// ---------------------------------------------------------------------------

static CACHE_CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_CACHE_CAPACITY);
static CACHE_CAPACITY_PER_FILE: AtomicUsize = AtomicUsize::new(DEFAULT_CACHE_CAPACITY_PER_FILE);
// f64 stored as raw bits
static MEMORY_THRESHOLD: AtomicU64 = AtomicU64::new(0x3FE9_9999_9999_999A);
static MEMORY_LIMIT: AtomicUsize = AtomicUsize::new(0);
static MEMORY_POLL_INTERVAL_MS: AtomicUsize = AtomicUsize::new(DEFAULT_MEMORY_POLL_INTERVAL_MS);
static MAX_OPEN_CONTAINERS: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_OPEN_CONTAINERS);

static INIT: Once = Once::new();

fn env_override(name: &str, parse: impl Fn(&str) -> Option<usize>, target: &AtomicUsize) {
    if let Some(n) = std::env::var(name).ok().as_deref().and_then(parse) {
        target.store(n, Ordering::Relaxed);
    }
}

/// Apply environment variable overrides (idempotent).
fn ensure_init() {
    INIT.call_once(|| {
        env_override("ROWSORT_CACHE_CAPACITY", parse_byte_size, &CACHE_CAPACITY);
        env_override(
            "ROWSORT_CACHE_CAPACITY_PER_FILE",
            parse_byte_size,
            &CACHE_CAPACITY_PER_FILE,
        );
        env_override("ROWSORT_MEMORY_LIMIT", parse_byte_size, &MEMORY_LIMIT);
        env_override(
            "ROWSORT_MEMORY_POLL_INTERVAL_MS",
            |s| s.trim().parse().ok(),
            &MEMORY_POLL_INTERVAL_MS,
        );
        env_override(
            "ROWSORT_MAX_OPEN_CONTAINERS",
            |s| s.trim().parse().ok().filter(|&n: &usize| n > 2),
            &MAX_OPEN_CONTAINERS,
        );
        if let Some(t) = std::env::var("ROWSORT_MEMORY_THRESHOLD")
            .ok()
            .as_deref()
            .and_then(parse_fraction)
        {
            MEMORY_THRESHOLD.store(t.to_bits(), Ordering::Relaxed);
        }
    });
}

/// Parse a byte size: a plain integer or one with a `K`/`KB`, `M`/`MB`,
/// `G`/`GB` suffix (case-insensitive).
pub fn parse_byte_size(s: &str) -> Option<usize> {
    const UNITS: [(&str, usize); 6] = [
        ("KB", 1 << 10),
        ("MB", 1 << 20),
        ("GB", 1 << 30),
        ("K", 1 << 10),
        ("M", 1 << 20),
        ("G", 1 << 30),
    ];
    let upper = s.trim().to_ascii_uppercase();
    let (digits, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, mult)| upper.strip_suffix(suffix).map(|n| (n.trim(), *mult)))
        .unwrap_or((upper.as_str(), 1));
    digits.parse::<usize>().ok()?.checked_mul(multiplier)
}

/// Parse a fraction in `(0, 1]`.
fn parse_fraction(s: &str) -> Option<f64> {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|t| *t > 0.0 && *t <= 1.0)
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Total bytes of scratch data kept in RAM.
pub fn get_cache_capacity() -> usize {
    ensure_init();
    CACHE_CAPACITY.load(Ordering::Relaxed)
}

pub fn set_cache_capacity(bytes: usize) {
    ensure_init();
    CACHE_CAPACITY.store(bytes, Ordering::Relaxed);
}

/// Largest single scratch file kept in RAM.
pub fn get_cache_capacity_per_file() -> usize {
    ensure_init();
    CACHE_CAPACITY_PER_FILE.load(Ordering::Relaxed)
}

pub fn set_cache_capacity_per_file(bytes: usize) {
    ensure_init();
    CACHE_CAPACITY_PER_FILE.store(bytes, Ordering::Relaxed);
}

/// Relative memory usage above which memory counts as low.
pub fn get_memory_threshold() -> f64 {
    ensure_init();
    f64::from_bits(MEMORY_THRESHOLD.load(Ordering::Relaxed))
}

/// Set the low-memory threshold. Values outside `(0, 1]` are ignored.
pub fn set_memory_threshold(threshold: f64) {
    ensure_init();
    if threshold > 0.0 && threshold <= 1.0 {
        MEMORY_THRESHOLD.store(threshold.to_bits(), Ordering::Relaxed);
    }
}

/// Memory budget in bytes, `0` meaning "total system memory".
pub fn get_memory_limit() -> usize {
    ensure_init();
    MEMORY_LIMIT.load(Ordering::Relaxed)
}

pub fn set_memory_limit(bytes: usize) {
    ensure_init();
    MEMORY_LIMIT.store(bytes, Ordering::Relaxed);
}

pub fn get_memory_poll_interval_ms() -> usize {
    ensure_init();
    MEMORY_POLL_INTERVAL_MS.load(Ordering::Relaxed)
}

pub fn set_memory_poll_interval_ms(ms: usize) {
    ensure_init();
    MEMORY_POLL_INTERVAL_MS.store(ms, Ordering::Relaxed);
}

/// Default merge fan-in.
pub fn get_max_open_containers() -> usize {
    ensure_init();
    MAX_OPEN_CONTAINERS.load(Ordering::Relaxed)
}

/// Set the default merge fan-in. Values `<= 2` are ignored.
pub fn set_max_open_containers(n: usize) {
    ensure_init();
    if n > 2 {
        MAX_OPEN_CONTAINERS.store(n, Ordering::Relaxed);
    }
}
