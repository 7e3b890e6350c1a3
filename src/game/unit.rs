//! Unit movement and auto-attack.
//!
//! Mobs are the only units the core walks itself; players are moved by the
//! client layer. A walk is a path plus one [`TimerFunc::UnitWalk`] timer per
//! cell, an auto-attack is a [`TimerFunc::UnitAttack`] timer re-armed every
//! attack delay while `attack_continue` holds.

use bitflags::bitflags;

use crate::game::hooks::ClearType;
use crate::game::map::{CellCheck, EntityDirectory, FreeCell};
use crate::game::mob::{ai, skill, Mode, SkillState, WALK_SKILL_INTERVAL};
use crate::game::npc;
use crate::game::path;
use crate::game::types::*;
use crate::game::world::{MapWorld, TimerData, TimerFunc};
use crate::timer::{add_tick, diff_tick, Tick, TimerId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StopWalk: u8 {
        /// Finish at least one cell if the walk has not started yet.
        const ONESTEP  = 0x1;
        /// Finish the current cell if more than half of it is covered.
        const NEXTCELL = 0x2;
        const FIXPOS   = 0x4;
    }
}

/// `walktoxy` flags.
pub const WALK_EASY: i32 = 0x1;
/// Walk even when the unit may not move right now.
pub const WALK_FORCE: i32 = 0x2;

/// Time (ms) to cross one cell in direction `dir`.
fn step_delay(speed: i32, dir: u8) -> i32 {
    if dir_is_diagonal(dir) {
        speed * path::MOVE_DIAGONAL_COST / path::MOVE_COST
    } else {
        speed
    }
}

/// Time (ms) to walk the whole path.
pub fn path_time(speed: i32, dirs: &[u8]) -> i32 {
    dirs.iter().map(|d| step_delay(speed, *d)).sum()
}

pub fn can_move(world: &MapWorld, id: BlockId) -> bool {
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    if diff_tick(md.ud.canmove_tick, world.gettick()) > 0 {
        return false;
    }
    !md.sc.is_abnormal()
}

/// Cell next to `tbl` that `bl` can walk to, if any.
///
/// With `range > 0` the target must also be within `range` cells.
pub fn can_reach_bl(dir: &EntityDirectory, bl: &BlockList, tbl: &BlockList, range: i32, easy: bool) -> Option<(i32, i32)> {
    if bl.m != tbl.m {
        return None;
    }
    if bl.x == tbl.x && bl.y == tbl.y {
        return Some((tbl.x, tbl.y));
    }
    if range > 0 && !check_distance_bl(bl, tbl, range) {
        return None;
    }
    let mut dx = (tbl.x - bl.x).signum();
    let mut dy = (tbl.y - bl.y).signum();
    if dir.getcell(tbl.m, tbl.x - dx, tbl.y - dy, CellCheck::NoPass) {
        let free = (0..8).find(|i| !dir.getcell(tbl.m, tbl.x - DIRX[*i], tbl.y - DIRY[*i], CellCheck::NoPass))?;
        dx = DIRX[free];
        dy = DIRY[free];
    }
    let (x, y) = (tbl.x - dx, tbl.y - dy);
    let grid = dir.map(bl.m)?;
    path::search(grid, bl.x, bl.y, x, y, i32::from(easy), CellCheck::NoReach)?;
    Some((x, y))
}

pub fn can_reach_pos(dir: &EntityDirectory, bl: &BlockList, x: i32, y: i32, easy: bool) -> bool {
    if bl.x == x && bl.y == y {
        return true;
    }
    let Some(grid) = dir.map(bl.m) else {
        return false;
    };
    path::search(grid, bl.x, bl.y, x, y, i32::from(easy), CellCheck::NoReach).is_some()
}

// ─── Walking ────────────────────────────────────────────────────────────────

/// Path to `(to_x, to_y)` and start stepping.
fn walktoxy_sub(world: &mut MapWorld, id: BlockId) -> bool {
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    let (bl, to_x, to_y, easy) = (md.bl, md.ud.to_x, md.ud.to_y, md.ud.state.walk_easy);
    let Some(grid) = world.map.map(bl.m) else {
        return false;
    };
    let Some(mut dirs) = path::search(grid, bl.x, bl.y, to_x, to_y, i32::from(easy), CellCheck::NoPass) else {
        return false;
    };

    let tick = world.gettick();
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    if md.ud.target_to != 0 && md.ud.chaserange > 1 {
        // Stop short of the target once it is within chase range.
        let mut i = md.ud.chaserange * path::MOVE_COST - path::MOVE_COST;
        while i > 0 && dirs.len() > 1 {
            let Some(dir) = dirs.pop() else {
                break;
            };
            i -= if dir_is_diagonal(dir) { path::MOVE_COST * 20 } else { path::MOVE_COST };
            md.ud.to_x -= DIRX[dir as usize];
            md.ud.to_y -= DIRY[dir as usize];
        }
    }
    md.ud.walkpath = path::WalkPath { path: dirs, path_pos: 0 };
    md.ud.state.change_walk_target = false;
    let delay = md.ud.walkpath.next_dir().map(|d| step_delay(md.status.speed, d));
    let (bl, walkpath) = (md.bl, md.ud.walkpath.clone());

    world.notify.notify_move(&bl, &walkpath);
    if let Some(delay) = delay {
        let tid = world.timers.add_timer(add_tick(tick, delay), TimerFunc::UnitWalk, id, TimerData::None);
        if let Some(md) = world.map.mob_mut(id) {
            md.ud.walktimer = Some(tid);
        }
    }
    true
}

/// One walk step. `tid` is `None` when called directly to finish a cell.
pub fn walktoxy_timer(world: &mut MapWorld, tid: Option<TimerId>, tick: Tick, id: BlockId) -> bool {
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    if md.ud.walktimer != tid {
        tracing::error!("[mob] walktoxy_timer mismatch {:?} != {:?}", md.ud.walktimer, tid);
        return false;
    }
    md.ud.walktimer = None;
    if !md.bl.on_map {
        return false;
    }
    let Some(dir) = md.ud.walkpath.next_dir() else {
        return false;
    };
    md.ud.dir = dir;
    let bl = md.bl;
    let (x, y) = (bl.x + DIRX[dir as usize], bl.y + DIRY[dir as usize]);

    if world.map.getcell(bl.m, x, y, CellCheck::NoPass) {
        return walktoxy_sub(world, id);
    }
    if let Err(e) = world.map.moveblock(id, x, y) {
        tracing::error!("[mob] walktoxy_timer: {e}");
        return false;
    }

    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    md.ud.walk_count += 1;
    md.walktoxy_fail_count = 0;
    if md.min_chase > md.db.range3 {
        md.min_chase -= 1;
    }
    let walk_count = md.ud.walk_count;

    if world.battle.mob_warp & 1 != 0 && world.map.getcell(bl.m, x, y, CellCheck::Npc) {
        if let Some((m, wx, wy)) = npc::warp_at(&world.map, bl.m, x, y).and_then(|nd| nd.warp_dest()) {
            warp(world, id, m, wx, wy, ClearType::Teleport);
            return false;
        }
    }

    if tid.is_some()
        && walk_count % WALK_SKILL_INTERVAL == 0
        && world.map.users(bl.m) > 0
        && skill::mobskill_use(world, id, tick, skill::SkillEvent::Periodic)
    {
        let walking = world.map.mob(id).is_some_and(|md| md.state.skillstate == SkillState::Walk);
        if !walking {
            // The skill changed what the mob is doing.
            return false;
        }
    }

    if tid.is_none() {
        return false;
    }

    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    if md.ud.state.change_walk_target {
        return walktoxy_sub(world, id);
    }

    md.ud.walkpath.path_pos += 1;
    if let Some(dir) = md.ud.walkpath.next_dir() {
        let delay = step_delay(md.status.speed, dir);
        let (bl, walkpath, recently_hit) = (md.bl, md.ud.walkpath.clone(), diff_tick(tick, md.dmgtick) < 3000);
        let tid = world.timers.add_timer(add_tick(tick, delay), TimerFunc::UnitWalk, id, TimerData::None);
        if let Some(md) = world.map.mob_mut(id) {
            md.ud.walktimer = Some(tid);
        }
        if recently_hit {
            world.notify.notify_move(&bl, &walkpath);
        }
        return true;
    }

    // Arrived.
    let target_to = md.ud.target_to;
    if target_to == 0 {
        md.ud.to_x = md.bl.x;
        md.ud.to_y = md.bl.y;
        return true;
    }
    let (me, chaserange, attack_continue, walk_easy) =
        (md.bl, md.ud.chaserange, md.ud.state.attack_continue, md.ud.state.walk_easy);
    let tbl = world.map.id2bl(target_to).copied();
    let visible = tbl.is_some() && ai::can_see(world, id, target_to);
    let Some(tbl) = tbl.filter(|_| visible) else {
        let warped = matches!(tbl, Some(t) if ai::warpchase(world, id, t));
        if let Some(md) = world.map.mob_mut(id) {
            md.ud.to_x = md.bl.x;
            md.ud.to_y = md.bl.y;
            if !warped {
                md.ud.target_to = 0;
            }
        }
        return true;
    };
    if me.m == tbl.m && check_distance_bl(&me, &tbl, chaserange) {
        if attack_continue {
            if let Some(md) = world.map.mob_mut(id) {
                md.ud.target_to = 0;
            }
            attack(world, id, tbl.id, true);
        }
    } else {
        let flag = i32::from(walk_easy) | if attack_continue { 2 } else { 0 };
        walktobl(world, id, tbl.id, chaserange, flag);
    }
    true
}

/// Walk to `(x, y)`. `flag`: [`WALK_EASY`], [`WALK_FORCE`].
pub fn walktoxy(world: &mut MapWorld, id: BlockId, x: i32, y: i32, flag: i32) -> bool {
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    let (bl, mode) = (md.bl, md.status.mode);
    let Some(grid) = world.map.map(bl.m) else {
        return false;
    };
    let Some(dirs) = path::search(grid, bl.x, bl.y, x, y, flag & WALK_EASY, CellCheck::NoPass) else {
        return false;
    };
    if dirs.len() as i32 > world.battle.max_walk_path {
        return false;
    }
    if flag & WALK_FORCE == 0 && (!mode.contains(Mode::CANMOVE) || !can_move(world, id)) {
        return false;
    }

    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    md.ud.state.walk_easy = flag & WALK_EASY != 0;
    md.ud.to_x = x;
    md.ud.to_y = y;
    stop_attack(world, id);

    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    if md.ud.walktimer.is_some() {
        md.ud.state.change_walk_target = true;
        return true;
    }
    walktoxy_sub(world, id)
}

/// Chase-state after starting to walk towards a target.
fn set_mobstate(world: &mut MapWorld, id: BlockId, chase: bool) {
    if !chase {
        return;
    }
    if let Some(md) = world.map.mob_mut(id) {
        md.state.skillstate = if md.state.aggressive { SkillState::Follow } else { SkillState::Rush };
    }
}

/// Walk towards `target` and stop within `range`. `flag & 1` easy path,
/// `flag & 2` attack on arrival.
pub fn walktobl(world: &mut MapWorld, id: BlockId, target: BlockId, range: i32, flag: i32) -> bool {
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    if !md.status.mode.contains(Mode::CANMOVE) {
        return false;
    }
    let bl = md.bl;
    let Some(tbl) = world.map.id2bl(target).copied() else {
        return false;
    };
    let reach = can_reach_bl(&world.map, &bl, &tbl, distance_bl(&bl, &tbl) + 1, flag & 1 != 0);
    let tick = world.gettick();

    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    match reach {
        None => {
            md.ud.to_x = bl.x;
            md.ud.to_y = bl.y;
            md.ud.target_to = 0;
            return false;
        }
        Some((x, y)) if range > 0 => {
            md.ud.to_x = x;
            md.ud.to_y = y;
        }
        Some(_) => {
            md.ud.to_x = tbl.x;
            md.ud.to_y = tbl.y;
        }
    }
    md.ud.state.walk_easy = flag & 1 != 0;
    md.ud.target_to = target;
    md.ud.chaserange = range;
    md.ud.state.attack_continue = flag & 2 != 0;
    stop_attack(world, id);

    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    if md.ud.walktimer.is_some() {
        md.ud.state.change_walk_target = true;
        set_mobstate(world, id, flag & 2 != 0);
        return true;
    }
    if diff_tick(md.ud.canmove_tick, tick) > 0 {
        let at = add_tick(md.ud.canmove_tick, 1);
        world.timers.add_timer(at, TimerFunc::UnitWalkToBlDelayed, id, TimerData::Target(target));
        return true;
    }
    if !can_move(world, id) {
        return false;
    }
    if walktoxy_sub(world, id) {
        set_mobstate(world, id, flag & 2 != 0);
        return true;
    }
    false
}

/// Resume a chase postponed by a walk delay.
pub fn walktobl_delayed(world: &mut MapWorld, tick: Tick, id: BlockId, target: BlockId) {
    let Some(md) = world.map.mob(id) else {
        return;
    };
    if md.ud.walktimer.is_some() || md.ud.target_to != target {
        return;
    }
    if diff_tick(md.ud.canmove_tick, tick) > 0 {
        let at = add_tick(md.ud.canmove_tick, 1);
        world.timers.add_timer(at, TimerFunc::UnitWalkToBlDelayed, id, TimerData::Target(target));
        return;
    }
    let chase = md.ud.state.attack_continue;
    if can_move(world, id) && walktoxy_sub(world, id) {
        set_mobstate(world, id, chase);
    }
}

pub fn stop_walking(world: &mut MapWorld, id: BlockId, flag: StopWalk) -> bool {
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    let Some(tid) = md.ud.walktimer.take() else {
        return false;
    };
    md.ud.state.change_walk_target = false;
    let step = md.ud.walkpath.next_dir().map_or(0, |d| step_delay(md.status.speed, d));
    let path_pos = md.ud.walkpath.path_pos;
    let due = world.timers.get_timer(tid).map(|r| r.tick);
    let _ = world.timers.delete_timer(tid, TimerFunc::UnitWalk);
    let tick = world.gettick();

    let finish_cell = (flag.contains(StopWalk::ONESTEP) && path_pos == 0)
        || (flag.contains(StopWalk::NEXTCELL) && due.is_some_and(|t| diff_tick(t, tick) <= step / 2));
    if finish_cell {
        if let Some(md) = world.map.mob_mut(id) {
            md.ud.walkpath.path.truncate(path_pos + 1);
        }
        walktoxy_timer(world, None, tick, id);
    }

    let Some(md) = world.map.mob_mut(id) else {
        return true;
    };
    md.ud.walkpath.clear();
    md.ud.to_x = md.bl.x;
    md.ud.to_y = md.bl.y;
    true
}

/// Stop moving for `delay` ms. `skill_induced` delays never shorten an existing
/// one and do not affect bosses; damage delays are skipped while already stopped.
pub fn set_walkdelay(world: &mut MapWorld, id: BlockId, tick: Tick, delay: i32, skill_induced: bool) -> bool {
    if delay <= 0 {
        return false;
    }
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    if skill_induced {
        if md.is_boss() || diff_tick(md.ud.canmove_tick, add_tick(tick, delay)) > 0 {
            return false;
        }
    } else {
        if !can_move(world, id) {
            return false;
        }
        if diff_tick(md.ud.canmove_tick, add_tick(tick, -delay)) > 0 {
            return false;
        }
    }

    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    md.ud.canmove_tick = add_tick(tick, delay);
    if md.ud.walktimer.is_none() {
        return true;
    }
    let (chase, resume_at) = (md.ud.target_to, add_tick(md.ud.canmove_tick, 1));
    stop_walking(world, id, StopWalk::NEXTCELL);
    if delay > 1 && chase != 0 {
        world.timers.add_timer(resume_at, TimerFunc::UnitWalkToBlDelayed, id, TimerData::Target(chase));
    }
    true
}

// ─── Relocation ─────────────────────────────────────────────────────────────

/// Move a unit to `(x, y)` on map `m`; negative coordinates pick a random cell.
pub fn warp(world: &mut MapWorld, id: BlockId, m: MapId, x: i32, y: i32, clr: ClearType) -> bool {
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    if !md.bl.on_map || md.is_dead() {
        return false;
    }
    let src = md.bl;
    let (x, y) = if x < 0 || y < 0 {
        match world.search_freecell(None, m, x, y, -1, -1, FreeCell::empty()) {
            Some(p) => p,
            None => {
                tracing::warn!("[mob] warp: no free cell on map {m} for {id}");
                return false;
            }
        }
    } else if world.map.getcell(m, x, y, CellCheck::NoReach) {
        match world.search_freecell(Some(src), m, x, y, 4, 4, FreeCell::empty()) {
            Some(p) => p,
            None => {
                tracing::warn!("[mob] warp: ({x},{y}) on map {m} is blocked and nothing free nearby");
                return false;
            }
        }
    } else {
        (x, y)
    };

    remove_map(world, id, clr);
    if world.map.place(id, m, x, y).and_then(|_| world.map.addblock(id)).is_err() {
        tracing::error!("[mob] warp: could not place {id} on map {m} at ({x},{y})");
        return false;
    }
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    md.ud.to_x = x;
    md.ud.to_y = y;
    md.ud.dir = 0;
    let bl = md.bl;
    world.notify.notify_spawn(&bl);
    true
}

/// Run up to `dist` cells directly away from `target`.
pub fn escape(world: &mut MapWorld, id: BlockId, target: BlockId, dist: i32) -> bool {
    let (Some(bl), Some(tbl)) = (world.map.id2bl(id).copied(), world.map.id2bl(target).copied()) else {
        return false;
    };
    let dir = calc_dir(tbl.x, tbl.y, bl.x, bl.y) as usize;
    let mut dist = dist;
    while dist > 0 && world.map.getcell(bl.m, bl.x + dist * DIRX[dir], bl.y + dist * DIRY[dir], CellCheck::NoReach) {
        dist -= 1;
    }
    dist > 0 && walktoxy(world, id, bl.x + dist * DIRX[dir], bl.y + dist * DIRY[dir], 0)
}

// ─── Attacking ──────────────────────────────────────────────────────────────

pub fn stop_attack(world: &mut MapWorld, id: BlockId) {
    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    md.ud.target = 0;
    if let Some(tid) = md.ud.attacktimer.take() {
        let _ = world.timers.delete_timer(tid, TimerFunc::UnitAttack);
    }
}

/// Give up on the current attack target.
fn unattackable(world: &mut MapWorld, id: BlockId) {
    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    md.ud.state.attack_continue = false;
    md.ud.target = 0;
    let tick = world.gettick();
    ai::unlocktarget(world, id, tick);
}

/// Start attacking `target`, repeatedly when `continuous`.
pub fn attack(world: &mut MapWorld, id: BlockId, target: BlockId, continuous: bool) -> bool {
    if !ai::is_live_enemy(world, id, target) || !ai::can_see(world, id, target) {
        unattackable(world, id);
        return false;
    }
    let tick = world.gettick();
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    md.ud.state.attack_continue = continuous;
    md.ud.target = target;
    if continuous {
        md.ud.chaserange = md.status.range;
    }
    if md.ud.attacktimer.is_some() {
        return true;
    }
    if diff_tick(md.ud.attackabletime, tick) > 0 {
        let at = md.ud.attackabletime;
        let tid = world.timers.add_timer(at, TimerFunc::UnitAttack, id, TimerData::None);
        if let Some(md) = world.map.mob_mut(id) {
            md.ud.attacktimer = Some(tid);
        }
        return true;
    }
    if !attack_timer_sub(world, None, tick, id) {
        unattackable(world, id);
        return false;
    }
    true
}

pub fn attack_timer(world: &mut MapWorld, tid: TimerId, tick: Tick, id: BlockId) {
    if !attack_timer_sub(world, Some(tid), tick, id) {
        unattackable(world, id);
    }
}

/// One swing. Returns false when the target cannot be attacked any more.
fn attack_timer_sub(world: &mut MapWorld, tid: Option<TimerId>, tick: Tick, id: BlockId) -> bool {
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    if md.ud.attacktimer != tid {
        tracing::error!("[mob] attack_timer mismatch {:?} != {:?}", md.ud.attacktimer, tid);
        return false;
    }
    md.ud.attacktimer = None;
    let (src, target) = (md.bl, md.ud.target);
    let Some(tbl) = world.map.id2bl(target).copied() else {
        return false;
    };
    if !src.on_map || !tbl.on_map {
        return false;
    }
    if !ai::is_live_enemy(world, id, target) || !ai::can_see(world, id, target) {
        return false;
    }
    if src.m != tbl.m {
        return ai::warpchase(world, id, tbl);
    }

    let Some(md) = world.map.mob(id) else {
        return false;
    };
    if diff_tick(md.ud.canact_tick, tick) > 0 {
        if tid.is_none() {
            return false;
        }
        if md.ud.state.attack_continue {
            let at = if diff_tick(md.ud.canact_tick, md.ud.attackabletime) > 0 {
                md.ud.canact_tick
            } else {
                md.ud.attackabletime
            };
            let tid = world.timers.add_timer(at, TimerFunc::UnitAttack, id, TimerData::None);
            if let Some(md) = world.map.mob_mut(id) {
                md.ud.attackabletime = at;
                md.ud.attacktimer = Some(tid);
            }
        }
        return true;
    }

    let target_walking = match world.map.pc(target) {
        Some(sd) => sd.is_walking(),
        None => world.map.mob(target).is_some_and(|t| t.is_walking()),
    };
    let range = md.status.range + i32::from(target_walking);
    if !check_distance_bl(&src, &tbl, range) {
        let flag = i32::from(md.ud.state.walk_easy) | 2;
        let chaserange = md.ud.chaserange;
        walktobl(world, id, target, chaserange, flag);
        return true;
    }

    if diff_tick(md.ud.attackabletime, tick) <= 0 {
        if md.ud.walktimer.is_some() {
            stop_walking(world, id, StopWalk::FIXPOS);
        }
        let Some(md) = world.map.mob_mut(id) else {
            return false;
        };
        md.ud.dir = calc_dir(src.x, src.y, tbl.x, tbl.y);
        if matches!(md.state.skillstate, SkillState::Angry | SkillState::Berserk) {
            if skill::mobskill_use(world, id, tick, skill::SkillEvent::Periodic) {
                return true;
            }
        } else {
            md.state.skillstate = if md.state.aggressive { SkillState::Angry } else { SkillState::Berserk };
        }

        let Some(md) = world.map.mob_mut(id) else {
            return false;
        };
        if md.status.mode.contains(Mode::ASSIST) && diff_tick(tick, md.last_linktime) >= crate::game::mob::MIN_MOBLINKTIME {
            md.last_linktime = tick;
            let (class_, range2) = (md.class_, md.db.range2);
            ai::linksearch(world, &src, range2, class_, target, tick);
        }

        let Some(md) = world.map.mob(id) else {
            return false;
        };
        let (adelay, amotion) = (md.status.adelay, md.status.amotion);
        let hit = world.combat.issue_attack(&src, &tbl, tick);
        world.notify.notify_attack(&src, target, tick);
        if !hit {
            return true;
        }
        if let Some(md) = world.map.mob_mut(id) {
            md.ud.attackabletime = add_tick(tick, adelay);
        }
        set_walkdelay(world, id, tick, amotion, true);
    }

    let Some(md) = world.map.mob(id) else {
        return true;
    };
    if md.ud.state.attack_continue && md.ud.attacktimer.is_none() {
        let at = md.ud.attackabletime;
        let tid = world.timers.add_timer(at, TimerFunc::UnitAttack, id, TimerData::None);
        if let Some(md) = world.map.mob_mut(id) {
            md.ud.attacktimer = Some(tid);
        }
    }
    true
}

// ─── Removal ────────────────────────────────────────────────────────────────

/// Take a unit off its map, cancelling walk and attack.
pub fn remove_map(world: &mut MapWorld, id: BlockId, clr: ClearType) -> bool {
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    if !md.bl.on_map {
        return false;
    }
    if md.ud.walktimer.is_some() {
        stop_walking(world, id, StopWalk::empty());
    }
    stop_attack(world, id);
    let tick = world.gettick();
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    md.ud.attackabletime = tick;
    md.ud.canmove_tick = tick;
    md.ud.target_to = 0;
    md.target_id = 0;
    md.attacked_id = 0;
    md.state.skillstate = SkillState::Idle;
    let bl = md.bl;
    world.notify.notify_clear_unit(&bl, clr);
    world.map.delblock(id);
    true
}

/// Destroy a mob: off the map, timers cancelled, castle slot freed, slaves killed.
pub fn unit_free(world: &mut MapWorld, id: BlockId, clr: ClearType) {
    if world.map.mob(id).is_none() {
        return;
    }
    remove_map(world, id, clr);
    crate::game::mob::spawn::deleteslave(world, id);

    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    let spawn_timer = md.spawn_timer.take();
    let deletetimer = md.deletetimer.take();
    let (guardian, spawn, tomb) = (md.guardian.take(), md.spawn, md.tomb_nid.take());
    if let Some(tid) = spawn_timer {
        let _ = world.timers.delete_timer(tid, TimerFunc::MobDelaySpawn);
    }
    if let Some(tid) = deletetimer {
        let _ = world.timers.delete_timer(tid, TimerFunc::MobTimerDelete);
    }
    if let Some(gd) = guardian {
        crate::game::mob::guardian::release_slot(world, &gd, id);
    }
    if let Some(sp) = spawn.and_then(|idx| world.spawns.get_mut(idx)) {
        sp.active = sp.active.saturating_sub(1);
    }
    if let Some(nid) = tomb {
        crate::game::mob::death::mvptomb_remove(world, nid);
    }
    world.map.remove(id);
    tracing::trace!("[mob] freed {id}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::MapGrid;
    use crate::game::mob::tests::{put_mob, put_pc, test_world};
    use crate::game::pc::PcState;
    use crate::timer::ManualClock;

    fn walk_for(world: &mut MapWorld, clock: &ManualClock, ms: u32) {
        for _ in 0..ms / 100 {
            clock.advance(100);
            world.pump();
        }
    }

    #[test]
    fn test_path_time_weights_diagonals() {
        assert_eq!(step_delay(200, 0), 200);
        assert_eq!(step_delay(200, 7), 280);
        assert_eq!(path_time(100, &[0, 1, 2]), 340);
    }

    #[test]
    fn test_can_reach_bl_picks_adjacent_cell() {
        let mut dir = EntityDirectory::new();
        dir.add_map(MapGrid::open("t", 20, 20));
        let me = BlockList { x: 2, y: 2, ..BlockList::new(1, BlType::MOB) };
        let tgt = BlockList { x: 6, y: 2, ..BlockList::new(2, BlType::PC) };
        assert_eq!(can_reach_bl(&dir, &me, &tgt, 0, false), Some((5, 2)));
        assert_eq!(can_reach_bl(&dir, &me, &tgt, 3, false), None);
        assert_eq!(can_reach_bl(&dir, &me, &me, 0, false), Some((2, 2)));
        let other_map = BlockList { m: 1, ..tgt };
        assert_eq!(can_reach_bl(&dir, &me, &other_map, 0, false), None);
    }

    #[test]
    fn test_can_reach_bl_walls() {
        let mut dir = EntityDirectory::new();
        let mut grid = MapGrid::open("t", 20, 20);
        grid.set_walkable(5, 2, false);
        dir.add_map(grid);
        let me = BlockList { x: 2, y: 2, ..BlockList::new(1, BlType::MOB) };
        let tgt = BlockList { x: 6, y: 2, ..BlockList::new(2, BlType::PC) };
        let (x, y) = can_reach_bl(&dir, &me, &tgt, 0, false).unwrap();
        assert!(check_distance(x - 6, y - 2, 1));
        assert_ne!((x, y), (5, 2));
        assert!(can_reach_pos(&dir, &me, 9, 9, false));
    }

    #[test]
    fn test_chase_drops_target_that_vanishes() {
        let clock = ManualClock::new(10_000);
        let mut world = test_world(&clock);
        let id = put_mob(&mut world, Mode::CANMOVE, 5, 5);
        let pc = put_pc(&mut world, 10, 5);

        assert!(walktobl(&mut world, id, pc, 1, 0));
        assert_eq!(world.map.mob(id).unwrap().ud.target_to, pc);
        world.map.pc_mut(pc).unwrap().state |= PcState::HIDING;

        walk_for(&mut world, &clock, 1500);
        let md = world.map.mob(id).unwrap();
        assert_eq!((md.bl.x, md.bl.y), (9, 5));
        assert_eq!(md.ud.target_to, 0);
        assert!(md.ud.walktimer.is_none());
    }

    #[test]
    fn test_escape_runs_straight_away_from_adjacent_attacker() {
        let clock = ManualClock::new(10_000);
        let mut world = test_world(&clock);
        let id = put_mob(&mut world, Mode::CANMOVE, 10, 10);
        let west = put_pc(&mut world, 9, 10);

        assert!(escape(&mut world, id, west, 5));
        let md = world.map.mob(id).unwrap();
        assert_eq!((md.ud.to_x, md.ud.to_y), (15, 10));

        walk_for(&mut world, &clock, 1500);
        let md = world.map.mob(id).unwrap();
        assert_eq!((md.bl.x, md.bl.y), (15, 10));

        let south = put_pc(&mut world, 15, 9);
        assert!(escape(&mut world, id, south, 3));
        let md = world.map.mob(id).unwrap();
        assert_eq!((md.ud.to_x, md.ud.to_y), (15, 13));
    }
}
