use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mapcore::database::mob_db::MobTemplate;
use mapcore::game::hooks::ScriptedRandom;
use mapcore::game::map::MapGrid;
use mapcore::game::mob::spawn::{self, SpawnData};
use mapcore::game::mob::Mode;
use mapcore::game::pc::{pc_add, PlayerData};
use mapcore::game::world::{MapWorld, MapWorldBuilder};
use mapcore::timer::{do_timer, Tick, TimerContext, TimerId, TimerRegistry};

struct Sink {
    timers: TimerRegistry<u8, u32>,
    fired: u64,
}

impl TimerContext for Sink {
    type Func = u8;
    type Data = u32;

    fn timers(&mut self) -> &mut TimerRegistry<u8, u32> {
        &mut self.timers
    }

    fn on_timer(&mut self, _tid: TimerId, _tick: Tick, _func: u8, _owner: u32, data: u32) {
        self.fired += u64::from(data);
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

fn bench_add_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_add_drain");
    for count in [1_000u32, 10_000] {
        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &n| {
            b.iter(|| {
                let mut sink = Sink { timers: TimerRegistry::new(), fired: 0 };
                for i in 0..n {
                    // Scatter expiries so the heap does real work.
                    let tick = i.wrapping_mul(2_654_435_761) % 60_000;
                    sink.timers.add_timer(tick, 0, i, 1);
                }
                do_timer(&mut sink, 60_000);
                black_box(sink.fired)
            });
        });
    }
    group.finish();
}

fn bench_delete_pending(c: &mut Criterion) {
    c.bench_function("timer_delete_pending_1000", |b| {
        b.iter(|| {
            let mut timers: TimerRegistry<u8, u32> = TimerRegistry::new();
            let ids: Vec<_> = (0..1_000u32).map(|i| timers.add_timer(i * 7, 0, i, 0)).collect();
            for tid in ids.into_iter().rev() {
                let _ = timers.delete_timer(tid, 0);
            }
            black_box(timers.heap_len())
        });
    });
}

// ── World ───────────────────────────────────────────────────────────────────

fn crowded_world(mobs: u32) -> (MapWorld, mapcore::timer::ManualClock) {
    let clock = mapcore::timer::ManualClock::new(10_000);
    let mut world = MapWorldBuilder::new()
        .clock(clock.clone())
        .rng(ScriptedRandom::cycle((0..97).collect()))
        .build();
    world.map.add_map(MapGrid::open("prt_fild08", 200, 200));
    world.mob_db.insert(
        1002,
        Arc::new(MobTemplate {
            id: 1002,
            name: "Poring".into(),
            max_hp: 50,
            mode: Mode::CANMOVE | Mode::AGGRESSIVE,
            ..MobTemplate::default()
        }),
    );
    let site = SpawnData { map: "prt_fild08".into(), num: mobs, ..SpawnData::single(0, 0, 0, 1002) };
    if let Ok(idx) = spawn::add_site(&mut world, site) {
        spawn::spawn_site(&mut world, idx);
    }
    for (i, (x, y)) in [(50, 50), (150, 150), (100, 100)].into_iter().enumerate() {
        let id = i as u32 + 1;
        let _ = pc_add(&mut world.map, PlayerData::new(id, id + 150_000, "bench"), 0, x, y);
    }
    let _ = world.register_ai_timers();
    (world, clock)
}

fn bench_world_pump(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_pump_100ms");
    for mobs in [200u32, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(mobs), &mobs, |b, &n| {
            let (mut world, clock) = crowded_world(n);
            b.iter(|| {
                clock.advance(100);
                black_box(world.pump())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_add_and_drain, bench_delete_pending, bench_world_pump);
criterion_main!(benches);
