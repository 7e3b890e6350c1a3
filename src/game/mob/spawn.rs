//! Spawning, respawning and slaves.

use serde::Deserialize;

use crate::game::hooks::ClearType;
use crate::game::map::{Block, FreeCell, MapError};
use crate::game::mob::{
    death, guardian, skill, AiKind, MobData, MobStatus, Mode, SkillState, SpawnSize, MIN_RANDOMWALKTIME,
    MOB_MAX_DELAY, MOB_SLAVEDISTANCE,
};
use crate::game::mob::skill::{SkillCondition, SkillEvent};
use crate::game::types::{BlType, BlockId, MapId};
use crate::game::unit;
use crate::game::world::{MapWorld, TimerData, TimerFunc};
use crate::timer::add_tick;

/// Respawns never come faster than this (ms).
pub const MIN_SPAWN_DELAY: u32 = 5000;
/// Delay before retrying a spawn that found no free cell (ms).
const SPAWN_RETRY_DELAY: i32 = 5000;
const MAX_LEVEL: i32 = 255;
/// Name placeholder meaning "use the template name".
const TEMPLATE_NAME: &str = "--en--";
/// At most this many distinct classes per summon.
const MAX_SUMMON_CLASSES: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("unknown mob class {0}")]
    UnknownClass(u32),

    #[error("spawn of class {0} asks for no mobs")]
    ZeroAmount(u32),

    #[error("unknown map {0}")]
    UnknownMap(String),

    #[error("no free cell for class {class_} on map {m}")]
    NoFreeCell { class_: u32, m: MapId },

    #[error("map {0} is not a castle")]
    NotACastle(String),

    #[error("guardian index {0} out of range")]
    InvalidGuardianIndex(usize),

    #[error("guardian slot {index} of castle {castle} is already taken")]
    SlotTaken { castle: String, index: usize },

    #[error(transparent)]
    Map(#[from] MapError),
}

fn default_name() -> String {
    TEMPLATE_NAME.to_string()
}

/// One spawn line: `num` mobs of `class_` kept alive in an area.
#[derive(Debug, Clone, Deserialize)]
pub struct SpawnData {
    pub map: String,
    #[serde(skip)]
    pub m: MapId,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    /// Half-width of the spawn area; 0 with `x == y == 0` means anywhere.
    #[serde(default)]
    pub xs: i32,
    #[serde(default)]
    pub ys: i32,
    #[serde(rename = "class")]
    pub class_: u32,
    #[serde(default)]
    pub level: i32,
    #[serde(default = "default_name")]
    pub name: String,
    pub num: u32,
    /// Base respawn delay (ms).
    #[serde(default)]
    pub delay1: u32,
    /// Random extra respawn delay (ms).
    #[serde(default)]
    pub delay2: u32,
    #[serde(default)]
    pub size: SpawnSize,
    #[serde(default)]
    pub ai: AiKind,
    /// Boss spawn: leaves a tomb on death.
    #[serde(default)]
    pub boss: bool,
    #[serde(default)]
    pub event: String,
    /// Mobs of this line currently alive or waiting to respawn.
    #[serde(skip)]
    pub active: u32,
}

impl SpawnData {
    /// A single mob of `class_` at `(x, y)`.
    pub fn single(m: MapId, x: i32, y: i32, class_: u32) -> Self {
        SpawnData {
            map: String::new(),
            m,
            x,
            y,
            xs: 0,
            ys: 0,
            class_,
            level: 0,
            name: default_name(),
            num: 1,
            delay1: 0,
            delay2: 0,
            size: SpawnSize::Normal,
            ai: AiKind::None,
            boss: false,
            event: String::new(),
            active: 0,
        }
    }
}

/// Validate a spawn line and resolve its name placeholder.
pub fn parse_dataset(world: &MapWorld, data: &mut SpawnData) -> Result<(), SpawnError> {
    let Some(db) = world.mob_template(data.class_) else {
        return Err(SpawnError::UnknownClass(data.class_));
    };
    if data.num == 0 {
        return Err(SpawnError::ZeroAmount(data.class_));
    }
    data.event = data.event.trim_matches('"').to_string();
    if data.name == TEMPLATE_NAME || data.name.is_empty() {
        data.name = db.name.clone();
    }
    Ok(())
}

/// Build a mob from a spawn line and register it, off-map.
pub fn spawn_dataset(world: &mut MapWorld, data: &SpawnData, site: Option<usize>) -> Result<BlockId, SpawnError> {
    let db = world.mob_template(data.class_).ok_or(SpawnError::UnknownClass(data.class_))?;
    let id = world.map.alloc_id(BlType::MOB)?;
    let mut md = MobData::new(id, db, &world.battle);
    md.bl.m = data.m;
    md.bl.x = data.x;
    md.bl.y = data.y;
    md.state.boss = data.boss;
    if data.level > 0 && data.level <= MAX_LEVEL {
        md.level = data.level;
    }
    md.name = data.name.clone();
    md.special.ai = data.ai;
    md.special.size = data.size;
    md.status = MobStatus::from_template(&md.db, data.size, &world.battle);
    if data.event.len() >= 4 {
        md.npc_event = data.event.clone();
    }
    md.spawn = site;
    world.map.insert(Block::Mob(Box::new(md)))?;
    Ok(id)
}

/// Resolve a loaded spawn line and append it to the world's spawn table.
pub fn add_site(world: &mut MapWorld, mut data: SpawnData) -> Result<usize, SpawnError> {
    if !data.map.is_empty() {
        data.m = world.map.mapname2mapid(&data.map).ok_or_else(|| SpawnError::UnknownMap(data.map.clone()))?;
    }
    parse_dataset(world, &mut data)?;
    data.active = 0;
    world.spawns.push(data);
    Ok(world.spawns.len() - 1)
}

/// Fill spawn site `idx`. Returns how many mobs were placed.
pub fn spawn_site(world: &mut MapWorld, idx: usize) -> usize {
    let Some(mut data) = world.spawns.get(idx).cloned() else {
        return 0;
    };
    if let Err(e) = parse_dataset(world, &mut data) {
        tracing::warn!("[mob] spawn site {idx} skipped: {e}");
        return 0;
    }
    if let Some(sp) = world.spawns.get_mut(idx) {
        sp.name = data.name.clone();
        sp.event = data.event.clone();
    }
    let mut count = 0;
    for _ in 0..data.num {
        let id = match spawn_dataset(world, &data, Some(idx)) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("[mob] spawn site {idx}: {e}");
                break;
            }
        };
        if let Some(sp) = world.spawns.get_mut(idx) {
            sp.active += 1;
        }
        if mob_spawn(world, id) {
            count += 1;
        }
    }
    count
}

fn schedule_spawn(world: &mut MapWorld, id: BlockId, delay: i32) {
    let tick = world.gettick();
    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    if let Some(old) = md.spawn_timer.take() {
        let _ = world.timers.delete_timer(old, TimerFunc::MobDelaySpawn);
    }
    let tid = world.timers.add_timer(add_tick(tick, delay), TimerFunc::MobDelaySpawn, id, TimerData::None);
    if let Some(md) = world.map.mob_mut(id) {
        md.spawn_timer = Some(tid);
    }
}

/// Put a registered mob on the map with fresh state.
///
/// Site mobs are placed inside their site's area. When no cell is free the
/// spawn is retried after [`SPAWN_RETRY_DELAY`] and false is returned.
pub fn mob_spawn(world: &mut MapWorld, id: BlockId) -> bool {
    let tick = world.gettick();
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    md.last_thinktime = tick;
    let on_map = md.bl.on_map;
    let site = md.spawn;
    if on_map {
        unit::remove_map(world, id, ClearType::Respawn);
    }

    if let Some(sp) = site.and_then(|idx| world.spawns.get(idx)).cloned() {
        if !on_map {
            let class_changed = world.map.mob(id).is_some_and(|md| md.class_ != sp.class_);
            if class_changed {
                if let Some(db) = world.mob_template(sp.class_) {
                    if let Some(md) = world.map.mob_mut(id) {
                        md.class_ = sp.class_;
                        md.db = db;
                        md.name = sp.name.clone();
                    }
                }
            }
        }

        let Some(bl) = world.map.id2bl(id).copied() else {
            return false;
        };
        let pos = if (sp.x == 0 && sp.y == 0) || sp.xs != 0 || sp.ys != 0 {
            let (rx, ry) = if sp.x == 0 && sp.y == 0 && sp.xs == 0 && sp.ys == 0 { (-1, -1) } else { (sp.xs, sp.ys) };
            let flags = if world.battle.no_spawn_on_player > 0 { FreeCell::AVOID_PLAYERS } else { FreeCell::empty() };
            world.search_freecell(Some(bl), sp.m, sp.x, sp.y, rx, ry, flags)
        } else {
            let site_bl = crate::game::types::BlockList { m: sp.m, x: sp.x, y: sp.y, ..bl };
            let watched = world.battle.no_spawn_on_player > 99
                && !world.map.ids_in_range(&site_bl, world.battle.area_size, BlType::PC).is_empty();
            (!watched).then_some((sp.x, sp.y))
        };
        let Some((x, y)) = pos else {
            tracing::debug!("[mob] no spawn cell for {id} (class {}) on map {}, retrying", sp.class_, sp.m);
            schedule_spawn(world, id, SPAWN_RETRY_DELAY);
            return false;
        };
        if let Err(e) = world.map.place(id, sp.m, x, y) {
            tracing::error!("[mob] spawn {id}: {e}");
            return false;
        }
    }

    let rnd = world.rnd();
    let Some(status) = world.map.mob(id).map(|md| MobStatus::from_template(&md.db, md.special.size, &world.battle))
    else {
        return false;
    };
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    let boss = md.state.boss;
    md.state = Default::default();
    md.state.boss = boss;
    md.status = status;
    md.sc = Default::default();
    md.ks = None;
    md.attacked_id = 0;
    md.attacked_count = 0;
    md.target_id = 0;
    md.move_fail_count = 0;
    md.ud.state.attack_continue = false;
    md.ud.target_to = 0;
    md.ud.dir = 0;
    md.ud.skill_id = 0;
    md.ud.to_x = md.bl.x;
    md.ud.to_y = md.bl.y;
    let spawn_timer = md.spawn_timer.take();
    md.master_dist = 0;
    md.state.aggressive = md.status.mode.contains(Mode::ANGRY);
    md.state.skillstate = SkillState::Idle;
    md.next_walktime = add_tick(tick, (rnd % 1000 + MIN_RANDOMWALKTIME) as i32);
    md.last_linktime = tick;
    md.dmgtick = add_tick(tick, -5000);
    md.last_pcneartime = 0;
    let reset = tick.wrapping_sub(MOB_MAX_DELAY);
    md.skilldelay = vec![reset; md.db.skills.len()];
    md.skill_idx = None;
    md.dmglog = Default::default();
    md.tdmg = 0;
    md.lootitems.clear();
    let tomb = md.tomb_nid.is_some();
    if let Some(tid) = spawn_timer {
        let _ = world.timers.delete_timer(tid, TimerFunc::MobDelaySpawn);
    }
    if tomb {
        death::mvptomb_destroy(world, id);
    }

    if let Err(e) = world.map.addblock(id) {
        tracing::error!("[mob] spawn {id}: {e}");
        return false;
    }
    let Some(bl) = world.map.id2bl(id).copied() else {
        return false;
    };
    if world.map.users(bl.m) > 0 {
        world.notify.notify_spawn(&bl);
    }
    tracing::trace!("[mob] spawned {id} on map {} at ({},{})", bl.m, bl.x, bl.y);
    skill::mobskill_use(world, id, tick, SkillEvent::Condition(SkillCondition::Spawn));
    true
}

/// Schedule the respawn of a dead site mob; dynamic mobs are freed instead.
pub fn setdelayspawn(world: &mut MapWorld, id: BlockId) {
    let Some(md) = world.map.mob(id) else {
        return;
    };
    let Some(sp) = md.spawn.and_then(|idx| world.spawns.get(idx)) else {
        unit::unit_free(world, id, ClearType::Dead);
        return;
    };
    let (delay1, delay2, class_) = (sp.delay1, sp.delay2, sp.class_);
    let mut spawntime = delay1;
    if delay2 > 0 {
        spawntime = spawntime.saturating_add(world.rnd() % delay2);
    }
    let mode = world.mob_template(class_).map(|db| db.mode).unwrap_or_default();
    let rate = if mode.contains(Mode::BOSS) {
        world.battle.boss_spawn_delay
    } else if mode.contains(Mode::PLANT) {
        world.battle.plant_spawn_delay
    } else {
        world.battle.mob_spawn_delay
    };
    if rate != 100 {
        // Divide first so large delays do not overflow.
        spawntime = (spawntime / 100).saturating_mul(rate);
    }
    let spawntime = spawntime.clamp(MIN_SPAWN_DELAY, i32::MAX as u32);
    schedule_spawn(world, id, spawntime as i32);
}

pub fn delayspawn(world: &mut MapWorld, tid: crate::timer::TimerId, id: BlockId) {
    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    if md.spawn_timer != Some(tid) {
        tracing::warn!("[mob] delayspawn: timer mismatch {:?} != {tid}", md.spawn_timer);
        return;
    }
    md.spawn_timer = None;
    mob_spawn(world, id);
}

/// Parameters for a one-off spawn outside the spawn table.
#[derive(Debug, Clone)]
pub struct OnceSpawn {
    pub m: MapId,
    /// Negative coordinates pick a cell next to `near`, or anywhere on the map.
    pub x: i32,
    pub y: i32,
    pub class_: u32,
    pub amount: u32,
    pub name: Option<String>,
    pub event: String,
    pub size: SpawnSize,
    pub ai: AiKind,
    /// Unit whose position is used when no coordinates are given.
    pub near: Option<BlockId>,
    /// Remove the mobs after this many ms.
    pub lifetime: Option<i32>,
}

impl OnceSpawn {
    pub fn new(m: MapId, x: i32, y: i32, class_: u32) -> Self {
        OnceSpawn {
            m,
            x,
            y,
            class_,
            amount: 1,
            name: None,
            event: String::new(),
            size: SpawnSize::Normal,
            ai: AiKind::None,
            near: None,
            lifetime: None,
        }
    }
}

fn once_spawn_sub(world: &mut MapWorld, req: &OnceSpawn) -> Result<BlockId, SpawnError> {
    let (mut x, mut y) = (req.x, req.y);
    if x < 0 || y < 0 {
        if let Some(bl) = req.near.and_then(|n| world.map.id2bl(n).copied()) {
            if let Some(p) = world.search_freecell(Some(bl), req.m, bl.x, bl.y, 1, 1, FreeCell::empty()) {
                (x, y) = p;
            }
        }
    }
    let grid = world.map.map(req.m).ok_or_else(|| SpawnError::UnknownMap(req.m.to_string()))?;
    if x <= 0 || x >= grid.xs || y <= 0 || y >= grid.ys {
        (x, y) = world
            .search_freecell(None, req.m, x, y, -1, -1, FreeCell::AVOID_PLAYERS)
            .ok_or(SpawnError::NoFreeCell { class_: req.class_, m: req.m })?;
    }
    let mut data = SpawnData::single(req.m, x, y, req.class_);
    data.name = req.name.clone().unwrap_or_else(default_name);
    data.event = req.event.clone();
    data.size = req.size;
    data.ai = req.ai;
    parse_dataset(world, &mut data)?;
    spawn_dataset(world, &data, None)
}

/// Spawn `amount` mobs that do not respawn. Returns the id of the last one.
pub fn once_spawn(world: &mut MapWorld, req: &OnceSpawn) -> Result<BlockId, SpawnError> {
    if req.amount == 0 {
        return Err(SpawnError::ZeroAmount(req.class_));
    }
    let mut last = Err(SpawnError::ZeroAmount(req.class_));
    for _ in 0..req.amount {
        let id = match once_spawn_sub(world, req) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("[mob] once_spawn: {e}");
                last = Err(e);
                continue;
            }
        };
        if req.class_ == guardian::MOBID_EMPERIUM {
            guardian::attach_emperium(world, id);
        }
        mob_spawn(world, id);
        if let Some(ms) = req.lifetime.filter(|ms| *ms > 0) {
            let tick = world.gettick();
            let tid = world.timers.add_timer(add_tick(tick, ms), TimerFunc::MobTimerDelete, id, TimerData::None);
            if let Some(md) = world.map.mob_mut(id) {
                md.deletetimer = Some(tid);
            }
        }
        last = Ok(id);
    }
    last
}

/// [`once_spawn`] with each mob on a random passable cell of a rectangle.
pub fn once_spawn_area(
    world: &mut MapWorld,
    req: &OnceSpawn,
    (x0, y0): (i32, i32),
    (x1, y1): (i32, i32),
) -> Result<BlockId, SpawnError> {
    let (x0, x1) = (x0.min(x1), x0.max(x1));
    let (y0, y1) = (y0.min(y1), y0.max(y1));
    let max = ((y1 - y0 + 1) * (x1 - x0 + 1) * 3).min(1000);
    let mut last_good: Option<(i32, i32)> = None;
    let mut last = Err(SpawnError::ZeroAmount(req.class_));
    for _ in 0..req.amount {
        let mut found = None;
        for _ in 0..max {
            let x = (world.rnd() % (x1 - x0 + 1) as u32) as i32 + x0;
            let y = (world.rnd() % (y1 - y0 + 1) as u32) as i32 + y0;
            if !world.map.getcell(req.m, x, y, crate::game::map::CellCheck::NoPass) {
                found = Some((x, y));
                break;
            }
        }
        let Some((x, y)) = found.or(last_good) else {
            return Err(SpawnError::NoFreeCell { class_: req.class_, m: req.m });
        };
        last_good = Some((x, y));
        let single = OnceSpawn { x, y, amount: 1, ..req.clone() };
        last = once_spawn(world, &single);
    }
    last
}

/// Lifetime of a once-spawned mob ran out.
pub fn timer_delete(world: &mut MapWorld, tid: crate::timer::TimerId, id: BlockId) {
    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    if md.deletetimer != Some(tid) {
        tracing::warn!("[mob] timer_delete: timer mismatch {:?} != {tid}", md.deletetimer);
        return;
    }
    md.deletetimer = None;
    unit::unit_free(world, id, ClearType::Teleport);
}

/// Bring a dead mob back in place with `hp` HP. Rewards start over.
pub fn revive(world: &mut MapWorld, id: BlockId, hp: i32) {
    let tick = world.gettick();
    let rnd = world.rnd();
    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    md.status.hp = hp.clamp(1, md.status.max_hp);
    md.state.skillstate = SkillState::Idle;
    md.state.rebirth = true;
    md.last_thinktime = tick;
    md.next_walktime = add_tick(tick, (rnd % 1000 + MIN_RANDOMWALKTIME) as i32);
    md.last_linktime = tick;
    md.last_pcneartime = 0;
    md.dmglog = Default::default();
    md.tdmg = 0;
    let on_map = md.bl.on_map;
    if !on_map {
        if let Err(e) = world.map.addblock(id) {
            tracing::error!("[mob] revive {id}: {e}");
            return;
        }
    }
    if let Some(bl) = world.map.id2bl(id).copied() {
        world.notify.notify_spawn(&bl);
    }
    skill::mobskill_use(world, id, tick, SkillEvent::Condition(SkillCondition::Spawn));
}

/// Ids of the slaves of `master` on its map.
fn slaves_of(world: &MapWorld, master: BlockId) -> Vec<BlockId> {
    let Some(bl) = world.map.id2bl(master) else {
        return Vec::new();
    };
    world
        .map
        .ids_in_map(bl.m, BlType::MOB)
        .into_iter()
        .filter(|id| world.map.mob(*id).is_some_and(|md| md.master_id == master))
        .collect()
}

pub fn countslave(world: &MapWorld, master: BlockId) -> usize {
    slaves_of(world, master).len()
}

/// Summon slaves of `classes` (round robin) around `master`. Returns how many appeared.
pub fn summonslave(world: &mut MapWorld, master: BlockId, classes: &[u32], amount: usize, skill_id: u16) -> usize {
    let Some(md2) = world.map.mob(master) else {
        return 0;
    };
    let (mbl, size, ai, master_aggressive) =
        (md2.bl, md2.special.size, md2.special.ai, md2.status.mode.contains(Mode::AGGRESSIVE));
    let classes: Vec<u32> = classes
        .iter()
        .copied()
        .take_while(|c| world.mob_db.contains_key(c))
        .take(MAX_SUMMON_CLASSES)
        .collect();
    let count = classes.len();
    if count == 0 {
        return 0;
    }
    let mut k = 0;
    let mut amount = amount;
    if amount > 0 && amount < count {
        k = world.rnd() as usize % count;
        amount += k;
    }

    let mut summoned = 0;
    for k in k..amount {
        let class_ = classes[k % count];
        let (x, y) = world
            .search_freecell(Some(mbl), mbl.m, mbl.x, mbl.y, MOB_SLAVEDISTANCE, MOB_SLAVEDISTANCE, FreeCell::empty())
            .unwrap_or((mbl.x, mbl.y));
        let mut data = SpawnData::single(mbl.m, x, y, class_);
        data.size = size;
        data.ai = ai;
        if parse_dataset(world, &mut data).is_err() {
            continue;
        }
        let id = match spawn_dataset(world, &data, None) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("[mob] summonslave: {e}");
                continue;
            }
        };
        if skill_id == skill::NPC_SUMMONSLAVE {
            if let Some(md) = world.map.mob_mut(id) {
                md.master_id = master;
                md.special.ai = ai;
            }
        }
        if !mob_spawn(world, id) {
            continue;
        }
        summoned += 1;

        let inherit = world.battle.slaves_inherit_mode;
        if let Some(md) = world.map.mob_mut(id).filter(|md| md.master_id != 0) {
            let aggressive = match inherit {
                0 => md.status.mode.contains(Mode::AGGRESSIVE),
                1 => true,
                2 => false,
                _ => master_aggressive,
            };
            md.status.mode.set(Mode::AGGRESSIVE, aggressive);
        }
    }
    tracing::debug!("[mob] {master} summoned {summoned} slaves with skill {skill_id}");
    summoned
}

/// Teleport every slave of `master` to a random cell within `range` of it.
pub fn warpslave(world: &mut MapWorld, master: BlockId, range: i32) -> usize {
    let range = range.max(1);
    let Some(mbl) = world.map.id2bl(master).copied() else {
        return 0;
    };
    let mut warped = 0;
    for id in slaves_of(world, master) {
        let Some((x, y)) = world.search_freecell(Some(mbl), mbl.m, mbl.x, mbl.y, range, range, FreeCell::empty())
        else {
            continue;
        };
        if unit::warp(world, id, mbl.m, x, y, ClearType::Teleport) {
            warped += 1;
        }
    }
    warped
}

/// Kill every slave of `master`.
pub fn deleteslave(world: &mut MapWorld, master: BlockId) {
    for id in slaves_of(world, master) {
        death::kill(world, id);
    }
}

/// Remove a mob for good, whatever its spawn data says.
pub fn remove(world: &mut MapWorld, id: BlockId) {
    unit::unit_free(world, id, ClearType::OutSight);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::game::mob::tests::{put_pc, template, test_world};
    use crate::timer::ManualClock;

    fn world_with(classes: &[(u32, Mode)]) -> (MapWorld, ManualClock) {
        let clock = ManualClock::new(50_000);
        let mut world = test_world(&clock);
        for (class_, mode) in classes {
            world.mob_db.insert(*class_, template(*class_, *mode));
        }
        (world, clock)
    }

    fn site(class_: u32, num: u32) -> SpawnData {
        SpawnData { x: 20, y: 20, xs: 3, ys: 3, delay1: 1000, ..SpawnData { num, ..SpawnData::single(0, 20, 20, class_) } }
    }

    #[test]
    fn test_spawn_site_places_inside_area() {
        let (mut world, _) = world_with(&[(1002, Mode::CANMOVE)]);
        world.spawns.push(site(1002, 3));
        assert_eq!(world.spawn_all(), 3);
        assert_eq!(world.spawns[0].active, 3);
        for id in world.map.mobs() {
            let md = world.map.mob(id).unwrap();
            assert!(md.bl.on_map);
            assert!((17..=23).contains(&md.bl.x) && (17..=23).contains(&md.bl.y));
            assert_eq!(md.name, "mob1002");
            assert_eq!(md.state.skillstate, SkillState::Idle);
            assert_eq!(md.last_linktime, 50_000);
        }
    }

    #[test]
    fn test_add_site_resolves_map_and_name() {
        let (mut world, _) = world_with(&[(1002, Mode::CANMOVE)]);
        let data = SpawnData { map: "test".into(), ..SpawnData::single(7, 5, 5, 1002) };
        assert_eq!(add_site(&mut world, data).unwrap(), 0);
        assert_eq!(world.spawns[0].m, 0);
        assert_eq!(world.spawns[0].name, "mob1002");

        let bad = SpawnData { map: "nowhere".into(), ..SpawnData::single(0, 5, 5, 1002) };
        assert!(matches!(add_site(&mut world, bad), Err(SpawnError::UnknownMap(_))));
        let unknown = SpawnData { map: "test".into(), ..SpawnData::single(0, 5, 5, 4242) };
        assert!(matches!(add_site(&mut world, unknown), Err(SpawnError::UnknownClass(4242))));
        assert_eq!(world.spawns.len(), 1);
    }

    #[test]
    fn test_unknown_class_is_skipped() {
        let (mut world, _) = world_with(&[]);
        world.spawns.push(site(4242, 2));
        assert_eq!(world.spawn_all(), 0);
        assert!(world.map.mobs().is_empty());
    }

    #[test]
    fn test_respawn_delay_has_floor_and_multiplier() {
        let (mut world, _) = world_with(&[(1002, Mode::empty()), (1039, Mode::BOSS)]);
        world.spawns.push(site(1002, 1));
        world.spawns.push(SpawnData { delay1: 100_000, ..site(1039, 1) });
        world.battle.boss_spawn_delay = 50;
        world.spawn_all();
        let ids = world.map.mobs();

        setdelayspawn(&mut world, ids[0]);
        let tid = world.map.mob(ids[0]).unwrap().spawn_timer.unwrap();
        assert_eq!(world.timers.get_timer(tid).unwrap().tick, 50_000 + MIN_SPAWN_DELAY);

        setdelayspawn(&mut world, ids[1]);
        let tid = world.map.mob(ids[1]).unwrap().spawn_timer.unwrap();
        assert_eq!(world.timers.get_timer(tid).unwrap().tick, 100_000);
    }

    #[test]
    fn test_delayspawn_ignores_stale_timer() {
        let (mut world, clock) = world_with(&[(1002, Mode::empty())]);
        world.spawns.push(site(1002, 1));
        world.spawn_all();
        let id = world.map.mobs()[0];
        unit::remove_map(&mut world, id, ClearType::Dead);
        setdelayspawn(&mut world, id);
        let stale = world.timers.add_timer(50_001, TimerFunc::MobDelaySpawn, id, TimerData::None);
        clock.set(50_001);
        world.pump();
        assert!(!world.map.mob(id).unwrap().bl.on_map);
        assert_ne!(world.map.mob(id).unwrap().spawn_timer, Some(stale));
        clock.set(55_000);
        world.pump();
        let md = world.map.mob(id).unwrap();
        assert!(md.bl.on_map);
        assert!(md.spawn_timer.is_none());
    }

    #[test]
    fn test_blocked_spawn_retries_later() {
        let (mut world, clock) = world_with(&[(1002, Mode::empty())]);
        world.battle.no_spawn_on_player = 100;
        world.spawns.push(SpawnData { xs: 0, ys: 0, ..site(1002, 1) });
        put_pc(&mut world, 21, 21);
        assert_eq!(world.spawn_all(), 0);
        let id = world.map.mobs()[0];
        assert!(world.map.mob(id).unwrap().spawn_timer.is_some());
        clock.set(55_000);
        world.pump();
        // Still watched: another retry is queued.
        assert!(!world.map.mob(id).unwrap().bl.on_map);
        assert!(world.map.mob(id).unwrap().spawn_timer.is_some());
    }

    #[test]
    fn test_once_spawn_lifetime() {
        let (mut world, clock) = world_with(&[(1002, Mode::empty())]);
        let req = OnceSpawn { lifetime: Some(3000), amount: 2, ..OnceSpawn::new(0, 5, 5, 1002) };
        let last = once_spawn(&mut world, &req).unwrap();
        assert_eq!(world.map.mobs().len(), 2);
        assert!(world.map.mob(last).unwrap().spawn.is_none());
        clock.set(53_000);
        world.pump();
        assert!(world.map.mobs().is_empty());
    }

    #[test]
    fn test_once_spawn_area_stays_inside() {
        let (mut world, _) = world_with(&[(1002, Mode::empty())]);
        let req = OnceSpawn { amount: 4, ..OnceSpawn::new(0, 0, 0, 1002) };
        once_spawn_area(&mut world, &req, (12, 8), (10, 6)).unwrap();
        for id in world.map.mobs() {
            let bl = world.map.mob(id).unwrap().bl;
            assert!((10..=12).contains(&bl.x) && (6..=8).contains(&bl.y));
        }
    }

    #[test]
    fn test_summon_round_robin_and_inherit() {
        let (mut world, _) = world_with(&[(1039, Mode::AGGRESSIVE), (1002, Mode::AGGRESSIVE), (1003, Mode::empty())]);
        let master = once_spawn(&mut world, &OnceSpawn::new(0, 10, 10, 1039)).unwrap();
        world.battle.slaves_inherit_mode = 2;
        assert_eq!(summonslave(&mut world, master, &[1002, 1003, 9999], 4, skill::NPC_SUMMONSLAVE), 4);
        assert_eq!(countslave(&world, master), 4);
        let mut classes: Vec<u32> = Vec::new();
        for id in world.map.mobs().into_iter().filter(|id| *id != master) {
            let md = world.map.mob(id).unwrap();
            assert!(!md.status.mode.contains(Mode::AGGRESSIVE));
            assert!(crate::game::types::check_distance_bl(&md.bl, &world.map.mob(master).unwrap().bl, MOB_SLAVEDISTANCE));
            classes.push(md.class_);
        }
        classes.sort_unstable();
        assert_eq!(classes, vec![1002, 1002, 1003, 1003]);
    }

    #[test]
    fn test_slaves_follow_master_lifecycle() {
        let (mut world, _) = world_with(&[(1039, Mode::empty()), (1002, Mode::empty())]);
        let master = once_spawn(&mut world, &OnceSpawn::new(0, 10, 10, 1039)).unwrap();
        summonslave(&mut world, master, &[1002], 2, skill::NPC_SUMMONSLAVE);

        unit::warp(&mut world, master, 0, 30, 30, ClearType::Teleport);
        assert_eq!(warpslave(&mut world, master, 3), 2);
        let mbl = world.map.mob(master).unwrap().bl;
        for id in slaves_of(&world, master) {
            assert!(crate::game::types::check_distance_bl(&world.map.mob(id).unwrap().bl, &mbl, 3));
        }

        deleteslave(&mut world, master);
        assert_eq!(countslave(&world, master), 0);
        assert_eq!(world.map.mobs(), vec![master]);
    }

    #[test]
    fn test_revive_resets_rewards() {
        let (mut world, _) = world_with(&[(1002, Mode::empty())]);
        let id = once_spawn(&mut world, &OnceSpawn::new(0, 10, 10, 1002)).unwrap();
        {
            let md = world.map.mob_mut(id).unwrap();
            md.record_damage(7, crate::game::mob::DamageFlag::Normal, 40);
            md.tdmg = 40;
            md.status.hp = 0;
        }
        revive(&mut world, id, 30);
        let md = world.map.mob(id).unwrap();
        assert_eq!(md.status.hp, 30);
        assert_eq!(md.tdmg, 0);
        assert_eq!(md.damage_entries().count(), 0);
        assert!(md.state.rebirth);
    }

    #[test]
    fn test_spawn_resets_skill_delays() {
        let (mut world, _) = world_with(&[]);
        let mut db = (*template(1002, Mode::empty())).clone();
        db.skills = vec![crate::game::mob::skill::tests::skill(1, SkillState::Idle, SkillCondition::Spawn)];
        world.mob_db.insert(1002, Arc::new(db));
        let id = once_spawn(&mut world, &OnceSpawn::new(0, 10, 10, 1002)).unwrap();
        // The spawn skill fired right away.
        let md = world.map.mob(id).unwrap();
        assert_eq!(md.skilldelay, vec![50_000]);
        assert_eq!(md.ud.skill_id, 1);
    }
}
