//! Mob skill selection.
//!
//! Each template carries up to [`MAX_MOBSKILL`](super::MAX_MOBSKILL) skill
//! entries. [`mobskill_use`] walks them, keeps the first one whose state,
//! delay, chance and condition all pass, picks its target and hands the cast
//! to the [`CombatEngine`](crate::game::hooks::CombatEngine). Skill effects
//! are not simulated here, except for summoning and recalling slaves.

use serde::Deserialize;

use crate::config::mob_ai;
use crate::game::hooks::SkillRequest;
use crate::game::mob::{ai, spawn, AiKind, SkillState, MOB_SLAVEDISTANCE};
use crate::game::types::{check_distance_bl, BlockId, BlockList};
use crate::game::world::MapWorld;
use crate::timer::{add_tick, diff_tick, Tick};

/// Summon the slaves listed in the skill's `val`.
pub const NPC_SUMMONSLAVE: u16 = 196;
/// Teleport all slaves back next to the master.
pub const NPC_CALLSLAVE: u16 = 352;

/// When a skill entry may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillCondition {
    #[default]
    Always,
    /// HP at or below `cond2` percent.
    MyHpLtMaxRate,
    /// HP between `cond2` and `val[0]` percent.
    MyHpInRate,
    SlaveLt,
    SlaveLe,
    RudeAttacked,
    Spawn,
    CastTargeted,
    CloseAttacked,
    LongRangeAttacked,
    /// Hit by skill `cond2` (0 = any skill).
    SkillUsed,
    /// The mob's previous skill was `cond2`.
    AfterSkill,
    MasterAttacked,
    Alchemist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillTarget {
    #[default]
    Target,
    #[serde(rename = "self")]
    SelfTarget,
    Master,
    Friend,
    /// A random enemy within skill range.
    Random,
}

fn default_skill_range() -> i32 {
    9
}

/// One skill entry of a mob template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MobSkill {
    pub skill_id: u16,
    pub skill_lv: u16,
    pub state: SkillState,
    /// Chance out of 10000.
    pub permillage: u32,
    #[serde(default)]
    pub casttime: i32,
    /// Minimum time (ms) between two uses.
    #[serde(default)]
    pub delay: i32,
    #[serde(default)]
    pub cancelable: bool,
    #[serde(default)]
    pub target: SkillTarget,
    #[serde(default)]
    pub cond: SkillCondition,
    #[serde(default)]
    pub cond2: i32,
    /// Extra values: upper HP bound for `my_hp_in_rate`, mob classes for summons.
    #[serde(default)]
    pub val: Vec<i32>,
    /// Cast on the ground under the target instead of on the target.
    #[serde(default)]
    pub ground: bool,
    #[serde(default = "default_skill_range")]
    pub range: i32,
    #[serde(default)]
    pub msg: Option<String>,
}

impl MobSkill {
    /// An idle, always-true, self-targeted entry that never fires (0 chance).
    pub fn new(skill_id: u16, skill_lv: u16) -> Self {
        MobSkill {
            skill_id,
            skill_lv,
            state: SkillState::Idle,
            permillage: 0,
            casttime: 0,
            delay: 0,
            cancelable: false,
            target: SkillTarget::SelfTarget,
            cond: SkillCondition::Always,
            cond2: 0,
            val: Vec::new(),
            ground: false,
            range: default_skill_range(),
            msg: None,
        }
    }
}

/// What asks a mob to consider its skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillEvent {
    /// Regular think: every condition is evaluated.
    Periodic,
    /// Only entries with exactly this condition fire.
    Condition(SkillCondition),
    /// The mob was hit by this skill.
    SkillUsed(u16),
}

/// How another unit just interacted with a mob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillTrigger {
    CastTargeted,
    SkillUsed(u16),
    CloseAttack,
    LongRangeAttack,
    Magic,
}

fn hp_percent(hp: i32, max_hp: i32) -> i32 {
    if max_hp <= 0 {
        return 0;
    }
    (i64::from(hp) * 100 / i64::from(max_hp)) as i32
}

/// Number of mobs currently attacking `id`.
fn counttargeted(world: &MapWorld, id: BlockId) -> usize {
    let Some(bl) = world.map.id2bl(id) else {
        return 0;
    };
    world
        .map
        .ids_in_range(bl, world.battle.area_size, crate::game::types::BlType::MOB)
        .into_iter()
        .filter_map(|mid| world.map.mob(mid))
        .filter(|md| md.ud.target == id && md.ud.attacktimer.is_some())
        .count()
}

/// Whether entry `ms` wants to fire for `event`. Returns the friend it
/// should be cast on, when the condition picked one.
fn condition_met(
    world: &mut MapWorld,
    id: BlockId,
    ms: &MobSkill,
    event: SkillEvent,
) -> Option<Option<BlockList>> {
    let fired = match (ms.cond, event) {
        (cond, SkillEvent::Condition(ev)) if cond == ev => true,
        (SkillCondition::SkillUsed, SkillEvent::SkillUsed(sid)) => ms.cond2 == 0 || ms.cond2 == i32::from(sid),
        (_, SkillEvent::Periodic) => return periodic_condition(world, id, ms),
        _ => false,
    };
    fired.then_some(None)
}

fn periodic_condition(world: &mut MapWorld, id: BlockId, ms: &MobSkill) -> Option<Option<BlockList>> {
    let md = world.map.mob(id)?;
    let c2 = ms.cond2;
    let fired = match ms.cond {
        SkillCondition::Always => true,
        SkillCondition::MyHpLtMaxRate => hp_percent(md.status.hp, md.status.max_hp) <= c2,
        SkillCondition::MyHpInRate => {
            let rate = hp_percent(md.status.hp, md.status.max_hp);
            rate >= c2 && rate <= ms.val.first().copied().unwrap_or(100)
        }
        SkillCondition::SlaveLt => (spawn::countslave(world, id) as i32) < c2,
        SkillCondition::SlaveLe => (spawn::countslave(world, id) as i32) <= c2,
        SkillCondition::AfterSkill => i32::from(md.ud.skill_id) == c2,
        SkillCondition::RudeAttacked => {
            if md.attacked_count < super::RUDE_ATTACKED_COUNT {
                return None;
            }
            if let Some(md) = world.map.mob_mut(id) {
                md.attacked_count = 0;
            }
            true
        }
        SkillCondition::MasterAttacked => {
            let master = md.master_id;
            let mbl = world.map.id2bl(master).copied();
            return mbl.filter(|_| master != 0 && counttargeted(world, master) > 0).map(Some);
        }
        SkillCondition::Alchemist => md.state.alchemist,
        SkillCondition::Spawn
        | SkillCondition::CastTargeted
        | SkillCondition::CloseAttacked
        | SkillCondition::LongRangeAttacked
        | SkillCondition::SkillUsed => false,
    };
    fired.then_some(None)
}

/// Random enemy within `range` of mob `id`.
fn random_enemy(world: &mut MapWorld, id: BlockId, range: i32) -> Option<BlockList> {
    let md = world.map.mob(id)?;
    let enemies: Vec<BlockId> = world
        .map
        .ids_in_range(&md.bl, range, md.enemy_type())
        .into_iter()
        .filter(|e| ai::is_enemy(world, id, *e) && ai::can_see(world, id, *e))
        .collect();
    if enemies.is_empty() {
        return None;
    }
    let pick = enemies[world.rnd() as usize % enemies.len()];
    world.map.id2bl(pick).copied()
}

fn skill_target(world: &mut MapWorld, id: BlockId, ms: &MobSkill, friend: Option<BlockList>) -> Option<BlockList> {
    let md = world.map.mob(id)?;
    let me = md.bl;
    match ms.target {
        SkillTarget::Random => random_enemy(world, id, ms.range),
        SkillTarget::Target => world.map.id2bl(md.target_id).copied(),
        SkillTarget::Master if md.master_id != 0 => world.map.id2bl(md.master_id).copied().or(friend).or(Some(me)),
        SkillTarget::Master | SkillTarget::Friend => friend.or(Some(me)),
        SkillTarget::SelfTarget => Some(me),
    }
}

/// Try the template's skills for `event`. Returns true when one was used.
pub fn mobskill_use(world: &mut MapWorld, id: BlockId, tick: Tick, event: SkillEvent) -> bool {
    let Some(md) = world.map.mob(id) else {
        return false;
    };
    let count = md.db.skills.len();
    if world.battle.mob_skill_rate == 0 || count == 0 {
        return false;
    }
    if event == SkillEvent::Periodic && diff_tick(md.ud.canact_tick, tick) > 0 {
        return false;
    }
    let db = md.db.clone();
    let start = if world.battle.has_ai(mob_ai::RANDOM_SKILL) { world.rnd() as usize % count } else { 0 };

    for n in 0..count {
        let i = (start + n) % count;
        let ms = &db.skills[i];
        let Some(md) = world.map.mob(id) else {
            return false;
        };
        if md.skilldelay.get(i).is_some_and(|last| diff_tick(tick, *last) < ms.delay) {
            continue;
        }
        let state = md.state.skillstate;
        if ms.state != state {
            let any_state = state != SkillState::Dead
                && (ms.state == SkillState::Any
                    || (ms.state == SkillState::AnyTarget && md.target_id != 0 && state != SkillState::Loot));
            if !any_state {
                continue;
            }
        }
        if world.rnd() % 10000 > ms.permillage {
            continue;
        }
        let Some(friend) = condition_met(world, id, ms, event) else {
            continue;
        };
        let Some(tbl) = skill_target(world, id, ms, friend) else {
            continue;
        };
        let Some(md) = world.map.mob_mut(id) else {
            return false;
        };
        md.skill_idx = Some(i);
        let me = md.bl;
        if !check_distance_bl(&me, &tbl, ms.range) {
            continue;
        }
        let req = SkillRequest {
            skill_id: ms.skill_id,
            skill_lv: ms.skill_lv,
            target: if ms.ground { 0 } else { tbl.id },
            x: tbl.x,
            y: tbl.y,
            casttime: ms.casttime,
            cancelable: ms.cancelable,
        };
        if !world.combat.try_use_skill(&me, &req, tick) {
            continue;
        }
        tracing::trace!("[mob] {id} used skill {} lv{} on {}", ms.skill_id, ms.skill_lv, tbl.id);

        if let Some(msg) = &ms.msg {
            let name = world.map.mob(id).map(|md| md.name.clone()).unwrap_or_default();
            let shown = name.split('#').next().unwrap_or_default();
            world.notify.notify_message(id, &format!("{shown} : {msg}"));
        }

        let per_slot = world.battle.has_ai(mob_ai::SKILL_DELAY_PER_SLOT);
        if let Some(md) = world.map.mob_mut(id) {
            for (j, other) in db.skills.iter().enumerate() {
                if (per_slot && j == i) || (!per_slot && other.skill_id == ms.skill_id) {
                    if let Some(slot) = md.skilldelay.get_mut(j) {
                        *slot = tick;
                    }
                }
            }
            md.ud.skill_id = ms.skill_id;
            md.ud.skilltarget = req.target;
            md.ud.canact_tick = add_tick(tick, ms.casttime.max(0) + md.status.amotion);
        }

        match ms.skill_id {
            NPC_SUMMONSLAVE => {
                let classes: Vec<u32> = ms.val.iter().filter_map(|c| u32::try_from(*c).ok()).collect();
                spawn::summonslave(world, id, &classes, usize::from(ms.skill_lv), ms.skill_id);
            }
            NPC_CALLSLAVE => {
                spawn::warpslave(world, id, MOB_SLAVEDISTANCE);
            }
            _ => {}
        }
        return true;
    }

    if let Some(md) = world.map.mob_mut(id) {
        md.skill_idx = None;
    }
    false
}

/// A unit did something to mob `id`; give the mob a chance to answer with a skill.
///
/// The attacker becomes the target while the skills are evaluated. It stays
/// the target only if a skill fired and the attacker is an enemy.
pub fn mobskill_event(world: &mut MapWorld, id: BlockId, src: BlockId, tick: Tick, trigger: SkillTrigger) -> bool {
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    if !md.bl.on_map || md.is_dead() {
        return false;
    }
    if md.special.ai == AiKind::Sphere {
        md.state.alchemist = true;
        return mobskill_use(world, id, tick, SkillEvent::Condition(SkillCondition::Alchemist));
    }

    let previous = md.target_id;
    if previous == 0 || world.battle.mob_changetarget_byskill {
        md.target_id = src;
    }
    let event = match trigger {
        SkillTrigger::CastTargeted => Some(SkillEvent::Condition(SkillCondition::CastTargeted)),
        SkillTrigger::SkillUsed(skill_id) => Some(SkillEvent::SkillUsed(skill_id)),
        SkillTrigger::CloseAttack => Some(SkillEvent::Condition(SkillCondition::CloseAttacked)),
        SkillTrigger::LongRangeAttack => Some(SkillEvent::Condition(SkillCondition::LongRangeAttacked)),
        SkillTrigger::Magic => None,
    };
    let used = event.is_some_and(|ev| mobskill_use(world, id, tick, ev));
    if !used || !ai::is_enemy(world, id, src) {
        if let Some(md) = world.map.mob_mut(id) {
            md.target_id = previous;
        }
    }
    used
}
