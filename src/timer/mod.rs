//! Timer registry and scheduler pump.
//!
//! Every delayed or recurring action in the map server goes through one
//! [`TimerRegistry`]: mob AI cadence, respawns, walk steps, delayed drops.
//! Records live in a slot array indexed by [`TimerId`]; expiry order is kept
//! in a [`MinHeap`] of `(tick, id)` entries. Callbacks are named by a small
//! `Copy` tag type chosen by the owner of the registry and dispatched through
//! [`TimerContext::on_timer`], so a callback gets mutable access to the whole
//! world instead of a raw function pointer.

pub mod heap;
pub mod tick;

use std::fmt::Debug;

use heap::{HeapKey, MinHeap};
pub use tick::{add_tick, diff_tick, ManualClock, SystemClock, Tick, TickSource};

/// Lower clamp of the delay returned by [`do_timer`].
pub const TIMER_MIN_INTERVAL: i32 = 50;
/// Upper clamp of the delay returned by [`do_timer`], also the idle delay.
pub const TIMER_MAX_INTERVAL: i32 = 1000;
/// A timer this late (ms) is fired with the current tick instead of its own.
pub const TIMER_OVERDUE_LIMIT: i32 = 1000;
/// Slot array and heap growth step.
pub const TIMER_CHUNK: usize = 256;

/// Handle to a timer slot. Slot 0 is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u32);

impl TimerId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Unused slot (possibly on the free list).
    Free,
    /// Fires once, then the slot is recycled.
    Once,
    /// Re-armed after every firing until deleted.
    Interval,
}

#[derive(Debug, Clone)]
pub struct TimerRecord<F, D> {
    pub tick: Tick,
    pub func: Option<F>,
    pub owner: u32,
    pub data: D,
    pub kind: TimerKind,
    pub interval: i32,
    /// Popped from the heap and currently being dispatched.
    in_flight: bool,
}

impl<F, D: Default> TimerRecord<F, D> {
    fn empty() -> Self {
        TimerRecord {
            tick: 0,
            func: None,
            owner: 0,
            data: D::default(),
            kind: TimerKind::Free,
            interval: 0,
            in_flight: false,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("no such timer [{0}]")]
    NoSuchTimer(u32),

    #[error("function mismatch [{tid}] {found} != {expected}")]
    FuncMismatch { tid: u32, found: String, expected: String },

    #[error("invalid interval {interval} for {func} (tick={tick})")]
    InvalidInterval { tick: Tick, interval: i32, func: String },

    #[error("timer [{0}] is deleted or executing")]
    NotScheduled(u32),
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    tick: Tick,
    tid: u32,
}

impl HeapKey for HeapEntry {
    fn heap_less(&self, other: &Self) -> bool {
        diff_tick(self.tick, other.tick) < 0
    }
}

/// Slot array of timer records plus the expiry heap.
pub struct TimerRegistry<F, D> {
    records: Vec<TimerRecord<F, D>>,
    free: Vec<u32>,
    heap: MinHeap<HeapEntry>,
}

impl<F, D> TimerRegistry<F, D>
where
    F: Copy + Eq + Debug,
    D: Clone + Default,
{
    pub fn new() -> Self {
        let mut records = Vec::with_capacity(TIMER_CHUNK);
        records.push(TimerRecord::empty());
        TimerRegistry { records, free: Vec::new(), heap: MinHeap::with_capacity(TIMER_CHUNK) }
    }

    fn acquire(&mut self) -> u32 {
        if let Some(tid) = self.free.pop() {
            return tid;
        }
        if self.records.len() == self.records.capacity() {
            self.records.reserve(TIMER_CHUNK);
        }
        self.records.push(TimerRecord::empty());
        (self.records.len() - 1) as u32
    }

    fn push_heap(&mut self, tid: u32) {
        self.heap.ensure(1, TIMER_CHUNK);
        let tick = self.records[tid as usize].tick;
        self.heap.push(HeapEntry { tick, tid });
    }

    fn insert(&mut self, tick: Tick, func: F, owner: u32, data: D, kind: TimerKind, interval: i32) -> TimerId {
        let tid = self.acquire();
        let rec = &mut self.records[tid as usize];
        rec.tick = tick;
        rec.func = Some(func);
        rec.owner = owner;
        rec.data = data;
        rec.kind = kind;
        rec.interval = interval;
        rec.in_flight = false;
        self.push_heap(tid);
        TimerId(tid)
    }

    /// Schedule a one-shot timer at `tick`.
    pub fn add_timer(&mut self, tick: Tick, func: F, owner: u32, data: D) -> TimerId {
        self.insert(tick, func, owner, data, TimerKind::Once, 1000)
    }

    /// Schedule a recurring timer first due at `tick`.
    pub fn add_timer_interval(
        &mut self,
        tick: Tick,
        func: F,
        owner: u32,
        data: D,
        interval: i32,
    ) -> Result<TimerId, TimerError> {
        if interval < 1 {
            let err = TimerError::InvalidInterval { tick, interval, func: format!("{func:?}") };
            tracing::error!("[timer] add_timer_interval: {err} owner={owner}");
            return Err(err);
        }
        Ok(self.insert(tick, func, owner, data, TimerKind::Interval, interval))
    }

    /// Mark a timer deleted. `func` must match the callback it was created with.
    ///
    /// The heap entry stays where it is and is discarded when it reaches the top.
    pub fn delete_timer(&mut self, tid: TimerId, func: F) -> Result<(), TimerError> {
        let idx = tid.0 as usize;
        if tid.0 < 1 || idx >= self.records.len() {
            let err = TimerError::NoSuchTimer(tid.0);
            tracing::error!("[timer] delete_timer: {err} ({func:?})");
            return Err(err);
        }
        let rec = &mut self.records[idx];
        if rec.func != Some(func) {
            let err = TimerError::FuncMismatch {
                tid: tid.0,
                found: format!("{:?}", rec.func),
                expected: format!("{func:?}"),
            };
            tracing::error!("[timer] delete_timer: {err}");
            return Err(err);
        }
        rec.func = None;
        rec.kind = TimerKind::Once;
        Ok(())
    }

    /// Move a pending timer to `tick`. Locating the heap slot is a linear scan.
    pub fn settick_timer(&mut self, tid: TimerId, tick: Tick) -> Result<Tick, TimerError> {
        let Some(pos) = self.heap.position(|e| e.tid == tid.0) else {
            let err = TimerError::NoSuchTimer(tid.0);
            tracing::error!("[timer] settick_timer: {err}");
            return Err(err);
        };
        let rec = &mut self.records[tid.0 as usize];
        if rec.kind == TimerKind::Free || rec.in_flight || rec.func.is_none() {
            let err = TimerError::NotScheduled(tid.0);
            tracing::error!("[timer] settick_timer: {err}");
            return Err(err);
        }
        if rec.tick == tick {
            return Ok(tick);
        }
        rec.tick = tick;
        self.heap.update_at(pos, |e| e.tick = tick);
        Ok(tick)
    }

    /// Shift a pending timer by `delta` ms.
    pub fn addtick_timer(&mut self, tid: TimerId, delta: i32) -> Result<Tick, TimerError> {
        let idx = tid.0 as usize;
        if tid.0 < 1 || idx >= self.records.len() {
            let err = TimerError::NoSuchTimer(tid.0);
            tracing::error!("[timer] addtick_timer: {err}");
            return Err(err);
        }
        let tick = add_tick(self.records[idx].tick, delta);
        self.settick_timer(tid, tick)
    }

    pub fn get_timer(&self, tid: TimerId) -> Option<&TimerRecord<F, D>> {
        if tid.0 < 1 {
            return None;
        }
        self.records.get(tid.0 as usize)
    }

    /// Whether `tid` refers to a live timer created with `func`.
    pub fn is_pending(&self, tid: TimerId, func: F) -> bool {
        self.get_timer(tid).is_some_and(|r| r.func == Some(func))
    }

    /// Number of entries in the expiry heap, deleted ones included.
    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    /// Number of live (not deleted, not free) timers.
    pub fn active(&self) -> usize {
        self.records.iter().filter(|r| r.func.is_some()).count()
    }

    /// Expiry tick of the earliest heap entry.
    pub fn next_tick(&self) -> Option<Tick> {
        self.heap.peek().map(|e| e.tick)
    }

    pub fn clear(&mut self) {
        self.records.truncate(1);
        self.free.clear();
        self.heap.clear();
    }

    fn pop_due(&mut self, now: Tick) -> Result<(u32, i32), i32> {
        let Some(top) = self.heap.peek() else {
            return Err(TIMER_MAX_INTERVAL);
        };
        let diff = diff_tick(top.tick, now);
        if diff > 0 {
            return Err(diff);
        }
        let tid = top.tid;
        self.heap.pop();
        self.records[tid as usize].in_flight = true;
        Ok((tid, diff))
    }

    fn settle(&mut self, tid: u32, now: Tick) {
        let rec = &mut self.records[tid as usize];
        if !rec.in_flight {
            return;
        }
        rec.in_flight = false;
        if rec.kind == TimerKind::Interval && rec.func.is_some() {
            if diff_tick(rec.tick, now) < -TIMER_OVERDUE_LIMIT {
                rec.tick = now.wrapping_add(rec.interval as u32);
            } else {
                rec.tick = rec.tick.wrapping_add(rec.interval as u32);
            }
            self.push_heap(tid);
        } else {
            rec.kind = TimerKind::Free;
            rec.func = None;
            rec.data = D::default();
            self.free.push(tid);
        }
    }
}

impl<F, D> Default for TimerRegistry<F, D>
where
    F: Copy + Eq + Debug,
    D: Clone + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of a timer registry that can dispatch its callbacks.
pub trait TimerContext {
    type Func: Copy + Eq + Debug;
    type Data: Clone + Default;

    fn timers(&mut self) -> &mut TimerRegistry<Self::Func, Self::Data>;

    /// Run one callback. `tick` is the expiry tick, or `now` for badly overdue timers.
    fn on_timer(&mut self, tid: TimerId, tick: Tick, func: Self::Func, owner: u32, data: Self::Data);
}

/// Fire every timer due at `now`, in expiry order.
///
/// Returns how long (ms) the caller may sleep before the next call,
/// clamped to `[TIMER_MIN_INTERVAL, TIMER_MAX_INTERVAL]`.
pub fn do_timer<C: TimerContext>(ctx: &mut C, now: Tick) -> i32 {
    let diff = loop {
        let (tid, diff) = match ctx.timers().pop_due(now) {
            Ok(due) => due,
            Err(diff) => break diff,
        };
        let rec = &ctx.timers().records[tid as usize];
        if let Some(func) = rec.func {
            let tick = if diff < -TIMER_OVERDUE_LIMIT { now } else { rec.tick };
            let owner = rec.owner;
            let data = rec.data.clone();
            ctx.on_timer(TimerId(tid), tick, func, owner, data);
        }
        ctx.timers().settle(tid, now);
    };
    diff.clamp(TIMER_MIN_INTERVAL, TIMER_MAX_INTERVAL)
}
