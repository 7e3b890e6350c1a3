//! The simulation context.
//!
//! [`MapWorld`] owns everything one map-server instance simulates: the timer
//! registry, the entity directory, template and spawn tables, castles and the
//! injected collaborators. It is the [`TimerContext`] the scheduler pump runs
//! against, so every timer callback gets the whole world mutably.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::BattleConfig;
use crate::database::mob_db::MobTemplate;
use crate::game::hooks::{
    CombatEngine, GuildRegistry, NotificationSink, NullCombat, NullGuilds, NullNotifier, NullRewards,
    RandomSource, RewardSink, ThreadRandom,
};
use crate::game::item::{self, ItemDropList};
use crate::game::map::{EntityDirectory, FreeCell};
use crate::game::mob::guardian::{self, Castle};
use crate::game::mob::spawn::{self, SpawnData};
use crate::game::mob::{death, dispatch, MIN_MOBTHINKTIME};
use crate::game::types::{BlockId, BlockList, MapId};
use crate::game::unit;
use crate::timer::{add_tick, do_timer, SystemClock, Tick, TickSource, TimerContext, TimerError, TimerId, TimerRegistry};

/// Every callback the map server schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerFunc {
    MobAiHard,
    MobAiLazy,
    MobDelaySpawn,
    MobTimerDelete,
    MobDelayItemDrop,
    MobSpawnGuardian,
    UnitWalk,
    UnitAttack,
    UnitWalkToBlDelayed,
    ClearFloorItem,
}

/// Payload carried by a timer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TimerData {
    #[default]
    None,
    Drops(ItemDropList),
    Guild(u32),
    Target(BlockId),
}

pub struct MapWorld {
    pub battle: BattleConfig,
    pub timers: TimerRegistry<TimerFunc, TimerData>,
    pub map: EntityDirectory,
    pub mob_db: HashMap<u32, Arc<MobTemplate>>,
    pub spawns: Vec<SpawnData>,
    pub castles: Vec<Castle>,
    pub notify: Box<dyn NotificationSink>,
    pub combat: Box<dyn CombatEngine>,
    pub rewards: Box<dyn RewardSink>,
    pub guilds: Box<dyn GuildRegistry>,
    clock: Box<dyn TickSource>,
    rng: Box<dyn RandomSource>,
    ai_timers: Vec<TimerId>,
}

impl MapWorld {
    pub fn gettick(&self) -> Tick {
        self.clock.gettick()
    }

    pub fn rnd(&mut self) -> u32 {
        self.rng.rnd()
    }

    pub fn mob_template(&self, class_: u32) -> Option<Arc<MobTemplate>> {
        self.mob_db.get(&class_).cloned()
    }

    /// [`EntityDirectory::search_freecell`] with the world's random source and settings.
    #[allow(clippy::too_many_arguments)]
    pub fn search_freecell(
        &mut self,
        src: Option<BlockList>,
        m: MapId,
        cx: i32,
        cy: i32,
        rx: i32,
        ry: i32,
        flags: FreeCell,
    ) -> Option<(i32, i32)> {
        self.map
            .search_freecell(src.as_ref(), m, cx, cy, rx, ry, flags, self.rng.as_mut(), &self.battle)
    }

    /// Start the hard and lazy AI passes. Calling it twice is a no-op.
    pub fn register_ai_timers(&mut self) -> Result<(), TimerError> {
        if !self.ai_timers.is_empty() {
            return Ok(());
        }
        let tick = self.gettick();
        let hard_ms = MIN_MOBTHINKTIME as i32;
        let lazy_ms = hard_ms * 10;
        let hard = self.timers.add_timer_interval(
            add_tick(tick, hard_ms),
            TimerFunc::MobAiHard,
            0,
            TimerData::None,
            hard_ms,
        )?;
        let lazy = self.timers.add_timer_interval(
            add_tick(tick, lazy_ms),
            TimerFunc::MobAiLazy,
            0,
            TimerData::None,
            lazy_ms,
        )?;
        self.ai_timers = vec![hard, lazy];
        tracing::info!("[mob] AI timers registered (hard {hard_ms} ms, lazy {lazy_ms} ms)");
        Ok(())
    }

    /// Spawn one mob per configured slot of every spawn site.
    pub fn spawn_all(&mut self) -> usize {
        let mut count = 0;
        for idx in 0..self.spawns.len() {
            count += spawn::spawn_site(self, idx);
        }
        tracing::info!("[mob] {count} mobs spawned from {} sites", self.spawns.len());
        count
    }

    /// Run every timer due now. Returns how long the caller may sleep (ms).
    pub fn pump(&mut self) -> i32 {
        let now = self.clock.gettick_nocache();
        do_timer(self, now)
    }
}

impl TimerContext for MapWorld {
    type Func = TimerFunc;
    type Data = TimerData;

    fn timers(&mut self) -> &mut TimerRegistry<TimerFunc, TimerData> {
        &mut self.timers
    }

    fn on_timer(&mut self, tid: TimerId, tick: Tick, func: TimerFunc, owner: u32, data: TimerData) {
        match (func, data) {
            (TimerFunc::MobAiHard, _) => dispatch::ai_hard(self, tick),
            (TimerFunc::MobAiLazy, _) => dispatch::ai_lazy(self, tick),
            (TimerFunc::MobDelaySpawn, _) => spawn::delayspawn(self, tid, owner),
            (TimerFunc::MobTimerDelete, _) => spawn::timer_delete(self, tid, owner),
            (TimerFunc::MobDelayItemDrop, TimerData::Drops(list)) => death::delay_item_drop(self, list),
            (TimerFunc::MobSpawnGuardian, TimerData::Guild(guild_id)) => {
                guardian::spawn_guardian_sub(self, owner, guild_id)
            }
            (TimerFunc::UnitWalk, _) => {
                unit::walktoxy_timer(self, Some(tid), tick, owner);
            }
            (TimerFunc::UnitAttack, _) => unit::attack_timer(self, tid, tick, owner),
            (TimerFunc::UnitWalkToBlDelayed, TimerData::Target(target)) => {
                unit::walktobl_delayed(self, tick, owner, target)
            }
            (TimerFunc::ClearFloorItem, _) => item::clearflooritem_timer(self, tid, owner),
            (func, data) => {
                tracing::error!("[timer] {func:?} [{tid}] fired with unexpected payload {data:?}");
            }
        }
    }
}

/// Builds a [`MapWorld`], defaulting every collaborator to its null implementation.
pub struct MapWorldBuilder {
    battle: BattleConfig,
    map: EntityDirectory,
    mob_db: HashMap<u32, Arc<MobTemplate>>,
    spawns: Vec<SpawnData>,
    castles: Vec<Castle>,
    clock: Box<dyn TickSource>,
    rng: Box<dyn RandomSource>,
    notify: Box<dyn NotificationSink>,
    combat: Box<dyn CombatEngine>,
    rewards: Box<dyn RewardSink>,
    guilds: Box<dyn GuildRegistry>,
}

impl Default for MapWorldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MapWorldBuilder {
    pub fn new() -> Self {
        MapWorldBuilder {
            battle: BattleConfig::default(),
            map: EntityDirectory::new(),
            mob_db: HashMap::new(),
            spawns: Vec::new(),
            castles: Vec::new(),
            clock: Box::new(SystemClock::new()),
            rng: Box::new(ThreadRandom),
            notify: Box::new(NullNotifier),
            combat: Box::new(NullCombat),
            rewards: Box::new(NullRewards),
            guilds: Box::new(NullGuilds),
        }
    }

    pub fn battle(mut self, battle: BattleConfig) -> Self {
        self.battle = battle;
        self
    }

    pub fn directory(mut self, map: EntityDirectory) -> Self {
        self.map = map;
        self
    }

    pub fn templates(mut self, templates: HashMap<u32, Arc<MobTemplate>>) -> Self {
        self.mob_db = templates;
        self
    }

    pub fn spawns(mut self, spawns: Vec<SpawnData>) -> Self {
        self.spawns = spawns;
        self
    }

    pub fn castles(mut self, castles: Vec<Castle>) -> Self {
        self.castles = castles;
        self
    }

    pub fn clock<T: TickSource + 'static>(mut self, clock: T) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn rng<R: RandomSource + 'static>(mut self, rng: R) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn notifier<N: NotificationSink + 'static>(mut self, notify: N) -> Self {
        self.notify = Box::new(notify);
        self
    }

    pub fn combat<C: CombatEngine + 'static>(mut self, combat: C) -> Self {
        self.combat = Box::new(combat);
        self
    }

    pub fn rewards<R: RewardSink + 'static>(mut self, rewards: R) -> Self {
        self.rewards = Box::new(rewards);
        self
    }

    pub fn guilds<G: GuildRegistry + 'static>(mut self, guilds: G) -> Self {
        self.guilds = Box::new(guilds);
        self
    }

    pub fn build(self) -> MapWorld {
        MapWorld {
            battle: self.battle,
            timers: TimerRegistry::new(),
            map: self.map,
            mob_db: self.mob_db,
            spawns: self.spawns,
            castles: self.castles,
            notify: self.notify,
            combat: self.combat,
            rewards: self.rewards,
            guilds: self.guilds,
            clock: self.clock,
            rng: self.rng,
            ai_timers: Vec::new(),
        }
    }
}
