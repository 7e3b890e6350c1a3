//! Millisecond tick sources.
//!
//! Ticks are a wrapping `u32` millisecond counter. Never compare two ticks
//! with `<`/`>` directly; go through [`diff_tick`].

use std::cell::Cell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Millisecond tick counter. Wraps roughly every 49 days.
pub type Tick = u32;

/// Number of `gettick()` calls served from the cache before the clock is re-read.
pub const TICK_CACHE: u32 = 3;

/// Wraparound-safe signed difference `a - b`.
///
/// Positive when `a` is after `b`.
#[inline]
pub fn diff_tick(a: Tick, b: Tick) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Adds a signed millisecond offset to a tick.
#[inline]
pub fn add_tick(tick: Tick, delta: i32) -> Tick {
    tick.wrapping_add(delta as u32)
}

/// Source of the current tick.
pub trait TickSource {
    /// Current tick; implementations may serve a cached value.
    fn gettick(&self) -> Tick;

    /// Current tick, always re-reading the underlying clock.
    fn gettick_nocache(&self) -> Tick;
}

/// Monotonic clock measured from process start, with a small call cache.
pub struct SystemClock {
    start: Instant,
    cache: Cell<Tick>,
    remaining: Cell<u32>,
    cache_size: u32,
}

impl SystemClock {
    /// Create a clock that caches each reading for [`TICK_CACHE`] calls.
    pub fn new() -> Self {
        Self::with_cache(TICK_CACHE)
    }

    /// Create a clock with an explicit cache size. `0` or `1` disables caching.
    pub fn with_cache(cache_size: u32) -> Self {
        SystemClock {
            start: Instant::now(),
            cache: Cell::new(0),
            remaining: Cell::new(0),
            cache_size: cache_size.max(1),
        }
    }

    fn sys_tick(&self) -> Tick {
        // Truncation is the wraparound.
        self.start.elapsed().as_millis() as u32
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for SystemClock {
    fn gettick(&self) -> Tick {
        let left = self.remaining.get();
        if left <= 1 {
            return self.gettick_nocache();
        }
        self.remaining.set(left - 1);
        self.cache.get()
    }

    fn gettick_nocache(&self) -> Tick {
        let now = self.sys_tick();
        self.cache.set(now);
        self.remaining.set(self.cache_size);
        now
    }
}

/// Externally driven clock for simulations and tests.
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start: Tick) -> Self {
        ManualClock { now: Arc::new(AtomicU32::new(start)) }
    }

    pub fn set(&self, tick: Tick) {
        self.now.store(tick, Ordering::Relaxed);
    }

    /// Move the clock forward and return the new tick.
    pub fn advance(&self, ms: u32) -> Tick {
        self.now.fetch_add(ms, Ordering::Relaxed).wrapping_add(ms)
    }

    pub fn now(&self) -> Tick {
        self.now.load(Ordering::Relaxed)
    }
}

impl TickSource for ManualClock {
    fn gettick(&self) -> Tick {
        self.now()
    }

    fn gettick_nocache(&self) -> Tick {
        self.now()
    }
}
