//! Scheduler pump behaviour seen from outside the crate.

mod common;

use common::{template, Harness};
use mapcore::game::mob::spawn::SpawnData;
use mapcore::game::mob::Mode;
use mapcore::timer::{
    add_tick, do_timer, Tick, TimerContext, TimerId, TimerRegistry, TIMER_MAX_INTERVAL, TIMER_MIN_INTERVAL,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Note,
    /// Schedules a `Note` due `owner` ms after it fires.
    Chain,
}

#[derive(Default)]
struct Recorder {
    timers: TimerRegistry<Job, u32>,
    fired: Vec<(Tick, u32)>,
}

impl TimerContext for Recorder {
    type Func = Job;
    type Data = u32;

    fn timers(&mut self) -> &mut TimerRegistry<Job, u32> {
        &mut self.timers
    }

    fn on_timer(&mut self, _tid: TimerId, tick: Tick, func: Job, owner: u32, data: u32) {
        self.fired.push((tick, data));
        if func == Job::Chain {
            self.timers.add_timer(add_tick(tick, owner as i32), Job::Note, 0, data + 1);
        }
    }
}

fn one_shot_fires_once_at(t0: Tick) {
    let mut ctx = Recorder::default();
    let due = add_tick(t0, 10_000);
    ctx.timers.add_timer(due, Job::Note, 0, 7);

    for step in (0..10_000).step_by(250) {
        do_timer(&mut ctx, add_tick(t0, step));
        assert!(ctx.fired.is_empty(), "fired early at +{step}");
    }
    do_timer(&mut ctx, due);
    assert_eq!(ctx.fired, vec![(due, 7)]);

    for later in [1, 500, 20_000] {
        do_timer(&mut ctx, add_tick(due, later));
    }
    assert_eq!(ctx.fired.len(), 1);
    assert_eq!(ctx.timers.active(), 0);
}

#[test]
fn one_shot_fires_exactly_once() {
    one_shot_fires_once_at(50_000);
}

#[test]
fn one_shot_fires_once_across_tick_wraparound() {
    one_shot_fires_once_at(u32::MAX - 3_000);
}

#[test]
fn interval_keeps_cadence_when_pumped_late() {
    let mut ctx = Recorder::default();
    ctx.timers.add_timer_interval(1_100, Job::Note, 0, 0, 100).unwrap();

    // Pumped every 130ms for two seconds: every period still fires once.
    let mut now = 1_000;
    while now < 3_000 {
        now += 130;
        do_timer(&mut ctx, now);
    }
    let ticks: Vec<Tick> = ctx.fired.iter().map(|f| f.0).collect();
    let expected: Vec<Tick> = (1..=20).map(|i| 1_000 + i * 100).collect();
    assert_eq!(ticks, expected);
}

#[test]
fn callback_scheduled_due_timer_runs_in_same_pass() {
    let mut ctx = Recorder::default();
    ctx.timers.add_timer(100, Job::Chain, 0, 1);
    ctx.timers.add_timer(100, Job::Chain, 5_000, 10);

    let delay = do_timer(&mut ctx, 100);

    let data: Vec<u32> = ctx.fired.iter().map(|f| f.1).collect();
    assert_eq!(data.len(), 3);
    assert!(data.contains(&2));
    assert!(!data.contains(&11));
    assert_eq!(delay, TIMER_MAX_INTERVAL);
}

#[test]
fn world_pump_reports_time_until_next_ai_pass() {
    let mut h = Harness::new(vec![template(1002, Mode::CANMOVE)]);
    h.site(SpawnData::single(0, 20, 20, 1002));

    assert_eq!(h.world.pump(), 100);
    h.clock.advance(60);
    assert_eq!(h.world.pump(), TIMER_MIN_INTERVAL);
    h.clock.advance(40);
    assert_eq!(h.world.pump(), 100);
    assert_eq!(h.world.timers.active(), 2);
}
