//! The two-speed AI passes.
//!
//! The hard pass runs every [`MIN_MOBTHINKTIME`] ms and thinks fully for
//! every mob around a player. The lazy pass runs ten times less often over
//! all mobs and mostly just lets unattended ones wander. Both iterate the
//! live directory, so a mob removed by an earlier think is simply skipped.

use crate::config::mob_ai;
use crate::game::mob::{ai, skill, Mode, SkillState, ACTIVE_AI_RANGE, MIN_MOBTHINKTIME};
use crate::game::types::{BlType, BlockId};
use crate::game::unit;
use crate::game::world::MapWorld;
use crate::timer::{diff_tick, Tick};

/// Think once for a mob found near a player and mark it as seen.
pub fn ai_sub_hard_timer(world: &mut MapWorld, id: BlockId, tick: Tick) {
    if ai::ai_sub_hard(world, id, tick) {
        if let Some(md) = world.map.mob_mut(id) {
            md.state.spotted = true;
            md.last_pcneartime = tick;
        }
    }
}

/// Hard pass: full AI for mobs within view of any player.
pub fn ai_hard(world: &mut MapWorld, tick: Tick) {
    if world.battle.has_ai(mob_ai::FORCE_HARD) {
        for id in world.map.mobs() {
            ai_sub_lazy(world, id, tick);
        }
        return;
    }
    let range = world.battle.area_size + ACTIVE_AI_RANGE;
    for pid in world.map.players() {
        let Some(sd) = world.map.pc(pid) else {
            continue;
        };
        if !sd.bl.on_map {
            continue;
        }
        let center = sd.bl;
        for id in world.map.ids_in_range(&center, range, BlType::MOB) {
            ai_sub_hard_timer(world, id, tick);
        }
    }
}

/// Lazy pass over every mob.
pub fn ai_lazy(world: &mut MapWorld, tick: Tick) {
    for id in world.map.mobs() {
        ai_sub_lazy(world, id, tick);
    }
}

/// Cheap think for a mob nobody is looking at.
///
/// Recently active mobs (within `mob_active_time` / `boss_active_time` of
/// being near a player) still get the full AI. Everything else thinks at
/// most once a second: slaves follow their master, spotted mobs wander
/// when their walk time is up, or try an idle skill while standing.
pub fn ai_sub_lazy(world: &mut MapWorld, id: BlockId, tick: Tick) {
    let Some(md) = world.map.mob(id) else {
        return;
    };
    if !md.bl.on_map {
        return;
    }
    if world.battle.has_ai(mob_ai::FORCE_HARD) && world.map.users(md.bl.m) > 0 {
        ai::ai_sub_hard(world, id, tick);
        return;
    }
    if md.is_dead() {
        return;
    }

    let active_time = if md.is_boss() { world.battle.boss_active_time } else { world.battle.mob_active_time };
    if active_time > 0 && md.last_pcneartime != 0 && diff_tick(tick, md.last_thinktime) > MIN_MOBTHINKTIME as i32 {
        if diff_tick(tick, md.last_pcneartime) < active_time {
            ai::ai_sub_hard(world, id, tick);
            return;
        }
        if let Some(md) = world.map.mob_mut(id) {
            md.last_pcneartime = 0;
        }
    }

    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    if diff_tick(tick, md.last_thinktime) < (10 * MIN_MOBTHINKTIME) as i32 {
        return;
    }
    md.last_thinktime = tick;

    if md.master_id != 0 {
        ai::slavemob(world, id, tick);
        return;
    }

    let (spotted, walk_due, canmove_mode, walking) = (
        md.state.spotted,
        diff_tick(md.next_walktime, tick) < 0,
        md.mode().contains(Mode::CANMOVE),
        md.is_walking(),
    );
    // Mobs never seen by a player stay put.
    let chance = if spotted { 1000 } else { 0 };
    if walk_due && canmove_mode && unit::can_move(world, id) {
        if world.rnd() % 1000 < chance {
            ai::randomwalk(world, id, tick);
        }
    } else if !walking {
        if let Some(md) = world.map.mob_mut(id) {
            md.state.skillstate = SkillState::Idle;
        }
        if world.rnd() % 1000 < chance {
            skill::mobskill_use(world, id, tick, skill::SkillEvent::Periodic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BattleConfig;
    use crate::game::mob::tests::{put_mob, put_pc, test_world};
    use crate::timer::ManualClock;

    #[test]
    fn test_hard_pass_marks_mobs_near_players() {
        let clock = ManualClock::new(1_000);
        let mut world = test_world(&clock);
        let near = put_mob(&mut world, Mode::empty(), 5, 5);
        let far = put_mob(&mut world, Mode::empty(), 38, 38);
        put_pc(&mut world, 6, 5);
        ai_hard(&mut world, 1_000);
        let near_md = world.map.mob(near).unwrap();
        assert!(near_md.state.spotted);
        assert_eq!(near_md.last_pcneartime, 1_000);
        assert_eq!(near_md.last_thinktime, 1_000);
        let far_md = world.map.mob(far).unwrap();
        assert!(!far_md.state.spotted);
        assert_eq!(far_md.last_thinktime, 0);
    }

    #[test]
    fn test_lazy_pass_thinks_once_a_second() {
        let clock = ManualClock::new(2_000);
        let mut world = test_world(&clock);
        let id = put_mob(&mut world, Mode::empty(), 5, 5);
        ai_lazy(&mut world, 2_000);
        assert_eq!(world.map.mob(id).unwrap().last_thinktime, 2_000);
        ai_lazy(&mut world, 2_500);
        assert_eq!(world.map.mob(id).unwrap().last_thinktime, 2_000);
        ai_lazy(&mut world, 3_000);
        assert_eq!(world.map.mob(id).unwrap().last_thinktime, 3_000);
    }

    #[test]
    fn test_unspotted_mobs_do_not_wander() {
        let clock = ManualClock::new(10_000);
        let mut world = test_world(&clock);
        let id = put_mob(&mut world, Mode::CANMOVE, 10, 10);
        ai_lazy(&mut world, 10_000);
        assert!(!world.map.mob(id).unwrap().is_walking());

        world.map.mob_mut(id).unwrap().state.spotted = true;
        ai_lazy(&mut world, 11_000);
        let md = world.map.mob(id).unwrap();
        assert!(md.is_walking());
        assert_eq!(md.state.skillstate, SkillState::Walk);
    }

    #[test]
    fn test_active_window_keeps_full_ai() {
        let clock = ManualClock::new(1_000);
        let mut world = test_world(&clock);
        world.battle = BattleConfig { mob_active_time: 5_000, ..BattleConfig::default() };
        let id = put_mob(&mut world, Mode::empty(), 5, 5);
        {
            let md = world.map.mob_mut(id).unwrap();
            md.last_pcneartime = 1_000;
            md.last_thinktime = 1_000;
        }
        // Full AI honours the 100 ms think gap instead of the lazy second.
        ai_sub_lazy(&mut world, id, 1_200);
        assert_eq!(world.map.mob(id).unwrap().last_thinktime, 1_200);
        ai_sub_lazy(&mut world, id, 7_000);
        let md = world.map.mob(id).unwrap();
        assert_eq!(md.last_pcneartime, 0);
        assert_eq!(md.last_thinktime, 7_000);
    }

    #[test]
    fn test_force_hard_runs_full_ai_with_users() {
        let clock = ManualClock::new(1_000);
        let mut world = test_world(&clock);
        world.battle = BattleConfig { mob_ai: mob_ai::FORCE_HARD, ..BattleConfig::default() };
        let far = put_mob(&mut world, Mode::empty(), 38, 38);
        put_pc(&mut world, 1, 1);
        ai_hard(&mut world, 1_000);
        ai_hard(&mut world, 1_100);
        assert_eq!(world.map.mob(far).unwrap().last_thinktime, 1_100);
    }
}
