//! Per-mob decision making.
//!
//! [`ai_sub_hard`] is the full think step run for mobs near a player: it
//! re-validates the current target, reacts to attackers, follows a master,
//! scans for loot and enemies and finally attacks, chases or idles. The
//! helpers below are also used by the unit layer and the lazy pass.

use std::ops::ControlFlow;

use crate::config::mob_ai;
use crate::game::hooks::ClearType;
use crate::game::item;
use crate::game::map::{Block, CellCheck, FreeCell, MapFlags};
use crate::game::mob::skill::{self, SkillCondition, SkillEvent};
use crate::game::mob::{
    death, spawn, AiKind, MobSc, Mode, SkillState, IDLE_SKILL_INTERVAL, LOOTITEM_SIZE, MAX_MINCHASE, MIN_MOBLINKTIME,
    MIN_MOBTHINKTIME, MIN_RANDOMWALKTIME, MOB_SLAVEDISTANCE, RUDE_ATTACKED_COUNT,
};
use crate::game::pc::PcState;
use crate::game::types::*;
use crate::game::unit::{self, StopWalk};
use crate::game::world::MapWorld;
use crate::timer::{add_tick, diff_tick, Tick};

/// Random walk attempts before a walk counts as failed.
const RANDOMWALK_RETRIES: usize = 20;
/// Failed random walks after which a stuck mob is respawned elsewhere.
const MAX_MOVE_FAIL: u32 = 1000;

// ─── Perception ─────────────────────────────────────────────────────────────

/// Whether mob `id` can currently see `target` (alive, on a map, not hidden from it).
pub fn can_see(world: &MapWorld, id: BlockId, target: BlockId) -> bool {
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    let sees_hidden = md.mode().intersects(Mode::DETECTOR | Mode::BOSS);
    match world.map.get(target) {
        Some(Block::Pc(sd)) => sd.bl.on_map && !sd.is_dead() && (!sd.is_hidden() || sees_hidden),
        Some(Block::Mob(t)) => t.bl.on_map && !t.is_dead() && (!t.is_hidden() || sees_hidden),
        Some(Block::Item(fi)) => fi.bl.on_map,
        Some(Block::Npc(nd)) => nd.bl.on_map,
        None => false,
    }
}

/// Whether `target` is on the other side of mob `id`.
///
/// Wild mobs fight players and player-controlled mobs; controlled mobs
/// fight wild mobs.
pub fn is_enemy(world: &MapWorld, id: BlockId, target: BlockId) -> bool {
    if id == target {
        return false;
    }
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    let wild = md.special.ai == AiKind::None;
    match world.map.get(target) {
        Some(Block::Pc(_)) => wild,
        Some(Block::Mob(t)) => wild != (t.special.ai == AiKind::None),
        _ => false,
    }
}

/// Enemy that is still alive.
pub fn is_live_enemy(world: &MapWorld, id: BlockId, target: BlockId) -> bool {
    let alive = match world.map.get(target) {
        Some(Block::Pc(sd)) => !sd.is_dead(),
        Some(Block::Mob(t)) => !t.is_dead(),
        _ => false,
    };
    alive && is_enemy(world, id, target)
}

/// Players a mob must leave alone: invincible ones, and gangster-paradise
/// sitters unless the mob is a boss.
fn pc_protected(world: &MapWorld, target: BlockId, boss: bool) -> bool {
    world.map.pc(target).is_some_and(|sd| {
        sd.state.contains(PcState::INVINCIBLE) || (sd.state.contains(PcState::GANGSTER_PARADISE) && !boss)
    })
}

fn unit_level(world: &MapWorld, id: BlockId) -> i32 {
    match world.map.get(id) {
        Some(Block::Pc(sd)) => sd.base_level,
        Some(Block::Mob(md)) => md.level,
        _ => 0,
    }
}

fn unit_is_dead(world: &MapWorld, id: BlockId) -> bool {
    match world.map.get(id) {
        Some(Block::Pc(sd)) => sd.is_dead(),
        Some(Block::Mob(md)) => md.is_dead(),
        _ => false,
    }
}

/// Unit `id` is currently attacking, if known.
fn attack_target_of(world: &MapWorld, id: BlockId) -> BlockId {
    world.map.mob(id).map_or(0, |md| md.ud.target)
}

/// Whether mob `id` can walk to within `range` of `tbl`. Chasing uses strict
/// paths, everything else the easy walk.
pub fn mob_can_reach(world: &MapWorld, id: BlockId, tbl: &BlockList, range: i32, state: SkillState) -> bool {
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    let easy = !matches!(state, SkillState::Rush | SkillState::Follow);
    unit::can_reach_bl(&world.map, &md.bl, tbl, range, easy).is_some()
}

// ─── Targeting ──────────────────────────────────────────────────────────────

/// Lock onto `target` from `dist` cells away, if the target-change rules allow it.
pub fn mob_target(world: &mut MapWorld, id: BlockId, target: BlockId, dist: i32) -> bool {
    let Some(tbl) = world.map.id2bl(target).copied() else {
        return false;
    };
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    if md.target_id != 0 && !md.can_changetarget(&tbl, &world.battle) {
        return false;
    }
    if !can_see(world, id, target) {
        return false;
    }
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    md.target_id = target;
    if md.state.provoke_flag != 0 && md.state.provoke_flag != target {
        md.state.provoke_flag = 0;
    }
    md.min_chase = (dist + md.db.range3).min(MAX_MINCHASE);
    true
}

/// Closest visible enemy within `view_range`, replacing `current` only when
/// strictly closer. Locks the mob onto whatever it picks.
pub fn activesearch(world: &mut MapWorld, id: BlockId, view_range: i32, current: Option<BlockList>) -> Option<BlockList> {
    let md = world.map.mob(id)?;
    let (bl, mode, level, range2, range3, boss) =
        (md.bl, md.mode(), md.level, md.db.range2, md.db.range3, md.is_boss());
    let mut best = current;
    let mut picked = None;
    for cid in world.map.ids_in_range(&bl, view_range, md.enemy_type()) {
        if cid == id || best.is_some_and(|b| b.id == cid) || !can_see(world, id, cid) {
            continue;
        }
        if mode.contains(Mode::TARGETWEAK) && unit_level(world, cid) >= level - 5 {
            continue;
        }
        if !is_enemy(world, id, cid) || pc_protected(world, cid, boss) {
            continue;
        }
        let Some(cbl) = world.map.id2bl(cid).copied() else {
            continue;
        };
        let dist = distance_bl(&bl, &cbl);
        if best.is_none_or(|b| !check_distance_bl(&bl, &b, dist)) && check_distance_bl(&bl, &cbl, range2) {
            best = Some(cbl);
            picked = Some((cid, dist));
        }
    }
    if let Some((cid, dist)) = picked {
        if let Some(md) = world.map.mob_mut(id) {
            md.target_id = cid;
            md.min_chase = (dist + range3).min(MAX_MINCHASE);
        }
    }
    best
}

/// While chasing, switch to any enemy already within weapon reach.
pub fn changechase(world: &mut MapWorld, id: BlockId, search: i32, current: Option<BlockList>) -> Option<BlockList> {
    let md = world.map.mob(id)?;
    let (bl, range) = (md.bl, md.status.range);
    let mut best = current;
    for cid in world.map.ids_in_range(&bl, search, md.enemy_type()) {
        if cid == id || best.is_some_and(|b| b.id == cid) {
            continue;
        }
        if !is_enemy(world, id, cid) || !can_see(world, id, cid) {
            continue;
        }
        let Some(cbl) = world.map.id2bl(cid).copied() else {
            continue;
        };
        if check_distance_bl(&bl, &cbl, range) {
            best = Some(cbl);
        }
    }
    if let Some(b) = best.filter(|b| Some(b.id) != current.map(|c| c.id)) {
        if let Some(md) = world.map.mob_mut(id) {
            md.target_id = b.id;
            md.min_chase = md.db.range3;
        }
    }
    best
}

/// Closest reachable floor item within `view_range`.
pub fn lootsearch(world: &mut MapWorld, id: BlockId, view_range: i32) -> Option<BlockList> {
    let bl = world.map.mob(id)?.bl;
    let mut best: Option<BlockList> = None;
    for iid in world.map.ids_in_range(&bl, view_range, BlType::ITEM) {
        let Some(ibl) = world.map.id2bl(iid).copied() else {
            continue;
        };
        let dist = distance_bl(&bl, &ibl);
        if mob_can_reach(world, id, &ibl, dist + 1, SkillState::Loot)
            && best.is_none_or(|b| !check_distance_bl(&bl, &b, dist))
        {
            best = Some(ibl);
        }
    }
    if let Some(b) = best {
        if let Some(md) = world.map.mob_mut(id) {
            md.target_id = b.id;
            md.min_chase = md.db.range3;
        }
    }
    best
}

/// Head for a warp portal leading towards a target on another map (or far away).
pub fn warpchase(world: &mut MapWorld, id: BlockId, target: BlockList) -> bool {
    if !world.battle.has_ai(mob_ai::WARP_CHASE) || world.battle.mob_warp & 1 == 0 {
        return false;
    }
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    let area = world.battle.area_size;
    if target.m == md.bl.m && check_distance_bl(&md.bl, &target, area) {
        return false;
    }
    if md.is_walking() && world.map.getcell(md.bl.m, md.ud.to_x, md.ud.to_y, CellCheck::Npc) {
        return true;
    }
    let portal = world
        .map
        .ids_in_range(&md.bl, md.db.range2, BlType::NPC)
        .into_iter()
        .filter_map(|nid| world.map.npc(nid))
        .filter_map(|nd| {
            let (m, x, y) = nd.warp_dest()?;
            (m == target.m).then(|| (distance(target.x - x, target.y - y), nd.bl.id))
        })
        .filter(|(d, _)| *d < area)
        .min_by_key(|(d, _)| *d)
        .map(|(_, nid)| nid);
    portal.is_some_and(|nid| unit::walktobl(world, id, nid, 0, 1))
}

/// Call same-class mobs within `range` of `src` onto `target`.
pub fn linksearch(world: &mut MapWorld, src: &BlockList, range: i32, class_: u32, target: BlockId, tick: Tick) {
    let Some(tbl) = world.map.id2bl(target).copied() else {
        return;
    };
    for mid in world.map.ids_in_range(src, range, BlType::MOB) {
        let Some(md) = world.map.mob_mut(mid) else {
            continue;
        };
        if mid == src.id
            || md.class_ != class_
            || md.target_id != 0
            || diff_tick(tick, md.last_linktime) < MIN_MOBLINKTIME
        {
            continue;
        }
        md.last_linktime = tick;
        let range2 = md.db.range2;
        if mob_can_reach(world, mid, &tbl, range2, SkillState::Follow) {
            if let Some(md) = world.map.mob_mut(mid) {
                md.target_id = target;
                md.min_chase = md.db.range3;
                tracing::trace!("[mob] {mid} linked onto {target}");
            }
        }
    }
}

// ─── Idling ─────────────────────────────────────────────────────────────────

/// Drop the current target and fall back to idling.
///
/// Idle and finished-walk mobs use an idle skill every
/// [`IDLE_SKILL_INTERVAL`] calls or try a random walk; any other state stops
/// attacking and chasing and schedules the next walk.
pub fn unlocktarget(world: &mut MapWorld, id: BlockId, tick: Tick) {
    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    match md.state.skillstate {
        SkillState::Walk if md.is_walking() => {}
        SkillState::Walk | SkillState::Idle => {
            md.state.skillstate = SkillState::Idle;
            md.ud.walk_count = md.ud.walk_count.wrapping_add(1);
            let idle_skill = md.ud.walk_count % IDLE_SKILL_INTERVAL == 0;
            if !(idle_skill && skill::mobskill_use(world, id, tick, SkillEvent::Periodic)) {
                let wander = world
                    .map
                    .mob(id)
                    .is_some_and(|md| md.master_id == 0 && diff_tick(md.next_walktime, tick) <= 0);
                if wander && !randomwalk(world, id, tick) {
                    let jitter = (world.rnd() % 1000) as i32;
                    if let Some(md) = world.map.mob_mut(id) {
                        md.next_walktime = add_tick(tick, jitter);
                    }
                }
            }
        }
        _ => {
            unit::stop_attack(world, id);
            unit::stop_walking(world, id, StopWalk::FIXPOS);
            let mut delay = world.rnd() % 1000;
            if !world.battle.has_ai(mob_ai::WALK_AFTER_UNLOCK) {
                delay += MIN_RANDOMWALKTIME;
            }
            if let Some(md) = world.map.mob_mut(id) {
                md.state.skillstate = SkillState::Idle;
                md.next_walktime = add_tick(tick, delay as i32);
            }
        }
    }
    if let Some(md) = world.map.mob_mut(id) {
        if md.target_id != 0 {
            md.target_id = 0;
            md.ud.target_to = 0;
            md.ud.target = 0;
        }
    }
}

/// Walk to a random passable cell nearby. A mob that keeps failing is
/// respawned somewhere else.
pub fn randomwalk(world: &mut MapWorld, id: BlockId, tick: Tick) -> bool {
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    if diff_tick(md.next_walktime, tick) > 0 || !md.mode().contains(Mode::CANMOVE) || !unit::can_move(world, id) {
        return false;
    }
    let bl = md.bl;
    let d = (12 - md.move_fail_count.min(12) as i32).clamp(5, 7);
    let span = (d * 2 + 1) as u32;

    let mut moved = false;
    for _ in 0..RANDOMWALK_RETRIES {
        let r = world.rnd();
        let x = bl.x + (r % span) as i32 - d;
        let y = bl.y + (r / span % span) as i32 - d;
        if (x, y) != (bl.x, bl.y) && world.map.getcell(bl.m, x, y, CellCheck::Pass) && unit::walktoxy(world, id, x, y, 0)
        {
            moved = true;
            break;
        }
    }

    if !moved {
        let Some(md) = world.map.mob_mut(id) else {
            return false;
        };
        md.move_fail_count += 1;
        if md.move_fail_count > MAX_MOVE_FAIL {
            tracing::warn!(
                "[mob] {id} (class {}) cannot move at map {} ({},{}); respawning",
                md.class_,
                bl.m,
                bl.x,
                bl.y
            );
            md.move_fail_count = 0;
            spawn::mob_spawn(world, id);
        }
        return false;
    }

    let jitter = world.rnd() % 1000;
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    let walk_ms = unit::path_time(md.status.speed, &md.ud.walkpath.path);
    md.state.skillstate = SkillState::Walk;
    md.move_fail_count = 0;
    md.next_walktime = add_tick(tick, (jitter + MIN_RANDOMWALKTIME) as i32 + walk_ms);
    true
}

// ─── Slaves ─────────────────────────────────────────────────────────────────

/// Follow the master and take over its target. Returns true when the slave
/// did something this tick.
pub fn slavemob(world: &mut MapWorld, id: BlockId, tick: Tick) -> bool {
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    let (bl, master_id, mode) = (md.bl, md.master_id, md.mode());
    let master = world.map.id2bl(master_id).copied();
    let Some(mbl) = master.filter(|_| !unit_is_dead(world, master_id)) else {
        tracing::debug!("[mob] slave {id} lost master {master_id}");
        death::kill(world, id);
        return true;
    };
    if !mbl.on_map {
        return false;
    }

    if mode.contains(Mode::CANMOVE) {
        let Some(md) = world.map.mob_mut(id) else {
            return false;
        };
        let old_dist = md.master_dist;
        md.master_dist = distance_bl(&bl, &mbl);
        let dist = md.master_dist;
        if mbl.m != bl.m || (old_dist < 10 && dist > 18) || dist > MAX_MINCHASE {
            md.master_dist = 0;
            unit::warp(world, id, mbl.m, mbl.x, mbl.y, ClearType::Teleport);
            return true;
        }
        if md.target_id != 0 {
            return false;
        }
        if (dist > MOB_SLAVEDISTANCE || dist == 0) && unit::can_move(world, id) {
            unit::stop_attack(world, id);
            let cell = world.search_freecell(
                Some(bl),
                mbl.m,
                mbl.x,
                mbl.y,
                MOB_SLAVEDISTANCE,
                MOB_SLAVEDISTANCE,
                FreeCell::REACHABLE,
            );
            if let Some((x, y)) = cell {
                if unit::walktoxy(world, id, x, y, 0) {
                    return true;
                }
            }
        }
    } else if mbl.m != bl.m && world.map.map(bl.m).is_some_and(|g| g.flags.contains(MapFlags::GVG)) {
        death::kill(world, id);
        return true;
    }

    let Some(md) = world.map.mob(id) else {
        return false;
    };
    if md.target_id != 0 || diff_tick(tick, md.last_linktime) < MIN_MOBLINKTIME {
        return false;
    }
    let master_target = world.map.mob(master_id).and_then(|master| {
        if master.ud.target != 0 && master.ud.state.attack_continue {
            Some(master.ud.target)
        } else if master.ud.skilltarget != 0 && is_enemy(world, id, master.ud.skilltarget) {
            Some(master.ud.skilltarget)
        } else {
            None
        }
    });
    let target = master_target.filter(|t| can_see(world, id, *t));
    let tbl = target.and_then(|t| world.map.id2bl(t).copied());
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    md.last_linktime = tick;
    let Some(tbl) = tbl else {
        return false;
    };
    md.target_id = tbl.id;
    md.min_chase = (md.db.range3 + distance_bl(&md.bl, &tbl)).min(MAX_MINCHASE);
    true
}

// ─── Hard AI ────────────────────────────────────────────────────────────────

/// Keep the current target or drop it.
fn check_target(world: &mut MapWorld, id: BlockId, tick: Tick, can_move: bool) -> ControlFlow<bool, Option<BlockList>> {
    let Some(md) = world.map.mob(id) else {
        return ControlFlow::Break(false);
    };
    let target_id = md.target_id;
    if target_id == 0 {
        return ControlFlow::Continue(None);
    }
    let (bl, attacking, walking, min_chase, boss) =
        (md.bl, md.ud.attacktimer.is_some(), md.is_walking(), md.min_chase, md.is_boss());
    let tbl = world.map.id2bl(target_id).copied();
    let valid = tbl.is_some_and(|t| {
        t.m == bl.m
            && (attacking || can_see(world, id, target_id))
            && !(walking && !world.battle.has_ai(mob_ai::CHASE_REFRESH) && !check_distance_bl(&bl, &t, min_chase))
            && !pc_protected(world, target_id, boss)
    });
    if valid {
        return ControlFlow::Continue(tbl);
    }

    if let Some(t) = tbl {
        if warpchase(world, id, t) {
            return ControlFlow::Break(true);
        }
    }
    let Some(md) = world.map.mob(id) else {
        return ControlFlow::Break(false);
    };
    let path_pos = md.ud.walkpath.path_pos;
    if md.is_walking()
        && (!can_move || path_pos as u32 <= world.battle.mob_chase_refresh)
        && (tbl.is_some() || path_pos == 0)
    {
        // Keep walking a few cells before giving up the chase.
        return ControlFlow::Break(true);
    }
    unlocktarget(world, id, tick);
    ControlFlow::Continue(None)
}

/// `attacked_count += 1`; true when the old count already reached the rude threshold.
fn bump_rude_count(world: &mut MapWorld, id: BlockId) -> bool {
    world.map.mob_mut(id).is_some_and(|md| {
        let old = md.attacked_count;
        md.attacked_count += 1;
        old >= RUDE_ATTACKED_COUNT
    })
}

fn rude_attacked_response(world: &mut MapWorld, id: BlockId, tick: Tick, can_move: bool, flee_from: Option<BlockId>) -> bool {
    if !bump_rude_count(world, id) {
        return false;
    }
    if skill::mobskill_use(world, id, tick, SkillEvent::Condition(SkillCondition::RudeAttacked)) {
        return false;
    }
    let Some(from) = flee_from.filter(|_| can_move) else {
        return false;
    };
    let dist = (world.rnd() % 10 + 1) as i32;
    unit::escape(world, id, from, dist)
}

/// React to whoever hit the mob since the last think.
fn check_attacker(
    world: &mut MapWorld,
    id: BlockId,
    tick: Tick,
    tbl: Option<BlockList>,
    can_move: bool,
) -> ControlFlow<bool, Option<BlockList>> {
    let Some(md) = world.map.mob(id) else {
        return ControlFlow::Break(false);
    };
    let attacked_id = md.attacked_id;
    if attacked_id == 0 || !md.mode().contains(Mode::CANATTACK) {
        return ControlFlow::Continue(tbl);
    }
    let (bl, range, range3, min_chase) = (md.bl, md.status.range, md.db.range3, md.min_chase);
    let rude = world.battle.has_ai(mob_ai::RUDE_ATTACK);
    let stuck = !can_move && diff_tick(tick, md.ud.canmove_tick) > 0 && (rude || md.walktoxy_fail_count > 0);
    let mut tbl = tbl;

    if let Some(t) = tbl.filter(|t| t.id == attacked_id) {
        let unreachable = !check_distance_bl(&bl, &t, range)
            && (stuck || !mob_can_reach(world, id, &t, min_chase, SkillState::Rush));
        if unreachable && rude_attacked_response(world, id, tick, can_move, Some(t.id)) {
            if let Some(md) = world.map.mob_mut(id) {
                md.attacked_id = 0;
            }
            return ControlFlow::Break(true);
        }
    } else if let Some(abl) = world.map.id2bl(attacked_id).copied() {
        let changeable = tbl.is_none() || md.can_changetarget(&abl, &world.battle);
        if changeable {
            let dist = distance_bl(&bl, &abl);
            let unreachable = bl.m != abl.m
                || !abl.on_map
                || dist >= MAX_MINCHASE
                || !is_enemy(world, id, attacked_id)
                || (rude && !can_see(world, id, attacked_id))
                || (!check_distance_bl(&bl, &abl, range)
                    && (stuck || !mob_can_reach(world, id, &abl, dist + range3, SkillState::Rush)));
            if unreachable {
                let flee_from = if tbl.is_none() { Some(abl.id) } else { None };
                if rude_attacked_response(world, id, tick, can_move, flee_from) {
                    if let Some(md) = world.map.mob_mut(id) {
                        md.attacked_id = 0;
                    }
                    return ControlFlow::Break(true);
                }
            } else if rude || can_see(world, id, attacked_id) {
                // Switch unless the current target is closer and busy with this mob.
                let keep = tbl.is_some_and(|t| {
                    dist >= range && check_distance_bl(&bl, &t, dist) && attack_target_of(world, t.id) == id
                });
                if !keep {
                    if let Some(md) = world.map.mob_mut(id) {
                        md.target_id = attacked_id;
                        md.attacked_count = md.attacked_count.saturating_sub(1);
                        md.min_chase = (dist + range3).min(MAX_MINCHASE);
                    }
                    tbl = Some(abl);
                }
            }
        }
    }

    if let Some(md) = world.map.mob_mut(id) {
        md.attacked_id = 0;
    }
    ControlFlow::Continue(tbl)
}

/// Walk to a floor item and pick it up.
fn loot(world: &mut MapWorld, id: BlockId, tick: Tick, item_bl: BlockList, mode: Mode, can_move: bool) -> bool {
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    if md.ud.target_to == item_bl.id && md.is_walking() {
        return true;
    }
    if !mode.contains(Mode::LOOTER) {
        unlocktarget(world, id, tick);
        return true;
    }
    if !check_distance_bl(&md.bl, &item_bl, 1) {
        if !mode.contains(Mode::CANMOVE) {
            unlocktarget(world, id, tick);
            return true;
        }
        if !can_move {
            return true;
        }
        if let Some(md) = world.map.mob_mut(id) {
            md.state.skillstate = SkillState::Loot;
        }
        if !unit::walktobl(world, id, item_bl.id, 1, 1) {
            unlocktarget(world, id, tick);
        }
        return true;
    }
    if md.ud.attacktimer.is_some() {
        return true;
    }
    let Some(stack) = world.map.item(item_bl.id).map(|fi| fi.item) else {
        unlocktarget(world, id, tick);
        return true;
    };
    if let Some(md) = world.map.mob_mut(id) {
        if let Some(lost) = md.push_loot(stack) {
            tracing::debug!("[mob] {id} loot bag full, destroyed item {}", lost.nameid);
        }
    }
    item::clearflooritem(world, item_bl.id);
    unlocktarget(world, id, tick);
    true
}

/// Full think step. Returns true when the mob did anything that counts as
/// being near a player.
pub fn ai_sub_hard(world: &mut MapWorld, id: BlockId, tick: Tick) -> bool {
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    if !md.bl.on_map || md.is_dead() {
        return false;
    }
    if diff_tick(tick, md.last_thinktime) < MIN_MOBTHINKTIME as i32 {
        return false;
    }
    md.last_thinktime = tick;
    if md.sc.is_abnormal() {
        md.target_id = 0;
        md.attacked_id = 0;
        return false;
    }
    let view_range = if md.sc.contains(MobSc::BLIND) { 3 } else { md.db.range2 };
    let mode = md.mode();
    let range = md.status.range;
    let can_move = mode.contains(Mode::CANMOVE) && unit::can_move(world, id);

    let tbl = match check_target(world, id, tick, can_move) {
        ControlFlow::Break(done) => return done,
        ControlFlow::Continue(t) => t,
    };
    let mut tbl = match check_attacker(world, id, tick, tbl, can_move) {
        ControlFlow::Break(done) => return done,
        ControlFlow::Continue(t) => t,
    };

    let Some(md) = world.map.mob(id) else {
        return false;
    };
    if md.master_id != 0 && slavemob(world, id, tick) {
        return true;
    }

    let Some(md) = world.map.mob(id) else {
        return false;
    };
    if tbl.is_none()
        && mode.contains(Mode::LOOTER)
        && diff_tick(tick, md.ud.canact_tick) > 0
        && (md.lootitems.len() < LOOTITEM_SIZE || world.battle.monster_loot_type != 1)
    {
        tbl = lootsearch(world, id, view_range);
    }

    let Some(md) = world.map.mob(id) else {
        return false;
    };
    let skillstate = md.state.skillstate;
    let aggressive = mode.contains(Mode::AGGRESSIVE) && world.battle.monster_active_enable;
    if (tbl.is_none() && aggressive) || skillstate == SkillState::Follow {
        tbl = activesearch(world, id, view_range, tbl);
    } else if mode.contains(Mode::CHANGECHASE) && matches!(skillstate, SkillState::Rush | SkillState::Follow) {
        tbl = changechase(world, id, view_range.min(range), tbl);
    }

    let Some(tbl) = tbl else {
        if let Some(md) = world.map.mob_mut(id) {
            if mode.contains(Mode::ANGRY) && !md.state.aggressive {
                md.state.aggressive = true;
            }
        }
        unlocktarget(world, id, tick);
        return true;
    };

    if tbl.bl_type == BlType::ITEM {
        return loot(world, id, tick, tbl, mode, can_move);
    }

    let Some(md) = world.map.mob(id) else {
        return false;
    };
    if check_distance_bl(&md.bl, &tbl, range) && !md.sc.contains(MobSc::HIDING) {
        if md.ud.target != tbl.id || md.ud.attacktimer.is_none() {
            if tbl.bl_type == BlType::PC {
                // Counts as an attacker for the exp bonus.
                death::log_damage(world, id, tbl.id, 0);
            }
            unit::attack(world, id, tbl.id, true);
        }
        return true;
    }

    if !md.is_walking()
        && matches!(md.state.skillstate, SkillState::Berserk | SkillState::Angry)
        && diff_tick(md.ud.canmove_tick, tick) <= MIN_MOBTHINKTIME as i32
        && diff_tick(md.ud.canact_tick, tick) < -((MIN_MOBTHINKTIME * IDLE_SKILL_INTERVAL) as i32)
    {
        skill::mobskill_use(world, id, tick, SkillEvent::Periodic);
    }

    let Some(md) = world.map.mob(id) else {
        return false;
    };
    if check_distance_bl(&md.bl, &tbl, range) {
        return true;
    }
    if md.is_walking() && (!can_move || md.ud.walkpath.path_pos as u32 <= world.battle.mob_chase_refresh) {
        return true;
    }
    if !mode.contains(Mode::CANMOVE) || (!can_move && diff_tick(tick, md.ud.canmove_tick) > 0) {
        // Immobile: give up and idle.
        if md.ud.attacktimer.is_none() {
            unlocktarget(world, id, tick);
        }
        return true;
    }
    if md.is_walking()
        && md.ud.target_to == tbl.id
        && (!world.battle.has_ai(mob_ai::CHASE_REFRESH) || check_distance(tbl.x - md.ud.to_x, tbl.y - md.ud.to_y, range))
    {
        return true;
    }
    let min_chase = md.min_chase;
    if !mob_can_reach(world, id, &tbl, min_chase, SkillState::Rush) || !unit::walktobl(world, id, tbl.id, range, 2) {
        unlocktarget(world, id, tick);
    }
    true
}
