//! Shared setup for the world-level tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use mapcore::database::mob_db::MobTemplate;
use mapcore::game::hooks::{RewardSink, ScriptedRandom};
use mapcore::game::item::ItemStack;
use mapcore::game::map::MapGrid;
use mapcore::game::mob::spawn::{self, SpawnData};
use mapcore::game::mob::Mode;
use mapcore::game::pc::{pc_add, PlayerData};
use mapcore::game::types::{BlockId, MapId};
use mapcore::game::world::{MapWorld, MapWorldBuilder};
use mapcore::timer::{ManualClock, Tick};

pub const START: Tick = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reward {
    Exp(BlockId, u64, u64),
    Zeny(BlockId, u32),
    Party(u32, u64, u64),
}

/// Reward sink that records every call.
#[derive(Clone, Default)]
pub struct Ledger(pub Rc<RefCell<Vec<Reward>>>);

impl Ledger {
    pub fn entries(&self) -> Vec<Reward> {
        self.0.borrow().clone()
    }
}

impl RewardSink for Ledger {
    fn gain_exp(&mut self, player: BlockId, base: u64, job: u64, _mob: BlockId) {
        self.0.borrow_mut().push(Reward::Exp(player, base, job));
    }

    fn gain_zeny(&mut self, player: BlockId, zeny: u32) {
        self.0.borrow_mut().push(Reward::Zeny(player, zeny));
    }

    fn party_shares_exp(&self, _party_id: u32) -> bool {
        false
    }

    fn party_exp_share(&mut self, party_id: u32, _m: MapId, base: u64, job: u64, _zeny: u32, _mob: BlockId) {
        self.0.borrow_mut().push(Reward::Party(party_id, base, job));
    }

    fn give_item(&mut self, _player: BlockId, _item: &ItemStack) -> bool {
        false
    }
}

pub struct Harness {
    pub world: MapWorld,
    pub clock: ManualClock,
    pub ledger: Ledger,
}

impl Harness {
    /// One open 80x80 map named `prt_fild08`, AI timers registered.
    pub fn new(templates: Vec<MobTemplate>) -> Self {
        let clock = ManualClock::new(START);
        let ledger = Ledger::default();
        let mut world = MapWorldBuilder::new()
            .clock(clock.clone())
            .rng(ScriptedRandom::constant(0))
            .rewards(ledger.clone())
            .build();
        world.map.add_map(MapGrid::open("prt_fild08", 80, 80));
        for db in templates {
            world.mob_db.insert(db.id, Arc::new(db));
        }
        world.register_ai_timers().unwrap();
        Harness { world, clock, ledger }
    }

    /// Add a spawn site and fill it. Returns the ids it produced.
    pub fn site(&mut self, data: SpawnData) -> Vec<BlockId> {
        let before = self.world.map.mobs();
        let idx = spawn::add_site(&mut self.world, SpawnData { map: "prt_fild08".into(), ..data }).unwrap();
        spawn::spawn_site(&mut self.world, idx);
        self.world.map.mobs().into_iter().filter(|id| !before.contains(id)).collect()
    }

    pub fn player(&mut self, x: i32, y: i32) -> BlockId {
        let id = self.world.map.players().last().map_or(1, |last| last + 1);
        pc_add(&mut self.world.map, PlayerData::new(id, id + 150_000, "tester"), 0, x, y).unwrap()
    }

    /// Advance the clock in `step` ms increments, pumping after each.
    pub fn run_for(&mut self, ms: u32, step: u32) {
        let mut elapsed = 0;
        while elapsed < ms {
            self.clock.advance(step);
            self.world.pump();
            elapsed += step;
        }
    }

    pub fn now(&self) -> Tick {
        self.clock.now()
    }
}

pub fn template(id: u32, mode: Mode) -> MobTemplate {
    MobTemplate {
        id,
        name: format!("mob{id}"),
        lv: 10,
        max_hp: 100,
        base_exp: 100,
        job_exp: 50,
        range: 1,
        range2: 10,
        range3: 12,
        mode,
        speed: 200,
        adelay: 1000,
        amotion: 500,
        dmotion: 300,
        ..MobTemplate::default()
    }
}
