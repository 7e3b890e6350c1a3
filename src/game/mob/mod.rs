//! Monster agents.
//!
//! [`MobData`] is the per-instance state; behaviour lives in the submodules
//! as free functions over `(&mut MapWorld, BlockId)`. Functions read what
//! they need into locals, call out, then re-resolve the id before writing
//! back, since any call into another subsystem may have removed the mob.

pub mod ai;
pub mod death;
pub mod dispatch;
pub mod guardian;
pub mod skill;
pub mod spawn;

use std::sync::Arc;

use bitflags::bitflags;
use serde::Deserialize;

use crate::config::{mob_ai, BattleConfig};
use crate::database::mob_db::MobTemplate;
use crate::game::item::ItemStack;
use crate::game::path::WalkPath;
use crate::game::pc::KsScope;
use crate::game::types::{check_distance_bl, BlType, BlockId, BlockList};
use crate::timer::{Tick, TimerId};

// ─── Limits and cadence ─────────────────────────────────────────────────────
pub const MAX_MOB_DROP: usize = 10;
pub const MAX_MVP_DROP: usize = 3;
pub const MAX_MOBSKILL: usize = 50;
pub const DAMAGELOG_SIZE: usize = 30;
pub const LOOTITEM_SIZE: usize = 10;
pub const MAX_GUARDIANS: usize = 8;

/// Hard AI period; also the minimum gap between two thinks of one mob.
pub const MIN_MOBTHINKTIME: u32 = 100;
/// Minimum gap between two assist/link calls of one mob.
pub const MIN_MOBLINKTIME: i32 = 1000;
pub const MIN_RANDOMWALKTIME: u32 = 4000;
/// Slaves try to stay within this many cells of their master.
pub const MOB_SLAVEDISTANCE: i32 = 2;
/// Extra cells around a player's view in which mobs get full AI.
pub const ACTIVE_AI_RANGE: i32 = 2;
pub const IDLE_SKILL_INTERVAL: u32 = 10;
pub const WALK_SKILL_INTERVAL: u32 = 5;
/// Skill delays are reset to `tick - MOB_MAX_DELAY` on spawn.
pub const MOB_MAX_DELAY: u32 = 24 * 3600 * 1000;
pub const MAX_MINCHASE: i32 = 30;
pub const RUDE_ATTACKED_COUNT: u32 = 2;
pub const MOB_CLONE_START: u32 = 20020;
pub const MOB_CLONE_END: u32 = 20999;

bitflags! {
    /// Behaviour capabilities of a mob template.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Mode: u32 {
        const CANMOVE            = 0x0001;
        const LOOTER             = 0x0002;
        const AGGRESSIVE         = 0x0004;
        const ASSIST             = 0x0008;
        const CASTSENSOR_IDLE    = 0x0010;
        const BOSS               = 0x0020;
        const PLANT              = 0x0040;
        const CANATTACK          = 0x0080;
        const DETECTOR           = 0x0100;
        const CASTSENSOR_CHASE   = 0x0200;
        const CHANGECHASE        = 0x0400;
        const ANGRY              = 0x0800;
        const CHANGETARGET_MELEE = 0x1000;
        const CHANGETARGET_CHASE = 0x2000;
        const TARGETWEAK         = 0x4000;
        const NOKNOCKBACK        = 0x8000;
    }
}

/// AI state tag. `Any` and `AnyTarget` only appear in skill conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillState {
    #[default]
    Idle,
    Walk,
    Loot,
    Dead,
    /// Retaliating.
    Berserk,
    /// Attacking pre-emptively.
    Angry,
    /// Chasing an attacker.
    Rush,
    /// Chasing a spotted target.
    Follow,
    Any,
    AnyTarget,
}

/// Who controls a mob. Anything but `None` fights on the players' side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiKind {
    #[default]
    None,
    Attack,
    Sphere,
    Flora,
    Zanzou,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnSize {
    #[default]
    Normal,
    Small,
    Big,
}

bitflags! {
    /// Status changes the AI reacts to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MobSc: u32 {
        const HIDING   = 0x01;
        const CLOAKING = 0x02;
        const STONE    = 0x04;
        const FREEZE   = 0x08;
        const STUN     = 0x10;
        const SLEEP    = 0x20;
        const BLIND    = 0x40;
    }
}

impl MobSc {
    /// States that stop a mob from acting at all.
    pub fn is_abnormal(self) -> bool {
        self.intersects(MobSc::STONE | MobSc::FREEZE | MobSc::STUN | MobSc::SLEEP)
    }
}

// ─── Per-instance state ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitState {
    /// A new destination was set while walking; re-path on the next step.
    pub change_walk_target: bool,
    pub attack_continue: bool,
    pub walk_easy: bool,
}

/// Movement and attack bookkeeping shared by walking units.
#[derive(Debug, Clone, Default)]
pub struct UnitData {
    pub walktimer: Option<TimerId>,
    pub attacktimer: Option<TimerId>,
    pub walkpath: WalkPath,
    pub to_x: i32,
    pub to_y: i32,
    /// Attack target.
    pub target: BlockId,
    /// Chase target.
    pub target_to: BlockId,
    pub chaserange: i32,
    pub skill_id: u16,
    pub skilltarget: BlockId,
    pub attackabletime: Tick,
    pub canact_tick: Tick,
    pub canmove_tick: Tick,
    pub walk_count: u32,
    pub dir: u8,
    pub state: UnitState,
}

#[derive(Debug, Clone)]
pub struct MobStatus {
    pub hp: i32,
    pub max_hp: i32,
    pub mode: Mode,
    pub speed: i32,
    pub adelay: i32,
    pub amotion: i32,
    pub dmotion: i32,
    /// Weapon reach.
    pub range: i32,
}

impl MobStatus {
    pub fn from_template(db: &MobTemplate, size: SpawnSize, battle: &BattleConfig) -> Self {
        let mut max_hp = db.max_hp.max(1);
        if battle.mob_size_influence {
            match size {
                SpawnSize::Small => max_hp = (max_hp / 2).max(1),
                SpawnSize::Big => max_hp = max_hp.saturating_mul(2),
                SpawnSize::Normal => {}
            }
        }
        MobStatus {
            hp: max_hp,
            max_hp,
            mode: db.mode,
            speed: db.speed.max(1),
            adelay: db.adelay,
            amotion: db.amotion,
            dmotion: db.dmotion,
            range: db.range,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MobState {
    pub skillstate: SkillState,
    /// Attacks on sight (ANGRY templates) until first hit.
    pub aggressive: bool,
    /// Seen by the hard AI pass at least once.
    pub spotted: bool,
    /// Taunted by this unit; overrides target-change rules.
    pub provoke_flag: BlockId,
    pub npc_killmonster: bool,
    /// Already revived once; no rewards on the second death.
    pub rebirth: bool,
    pub alchemist: bool,
    /// Spawned from a boss spawn line (gets a tomb).
    pub boss: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpecialState {
    pub size: SpawnSize,
    pub ai: AiKind,
}

/// Whose damage a log slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DamageFlag {
    #[default]
    Normal,
    Homun,
    Pet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DamageLog {
    /// Char id of the attacker, 0 = empty slot.
    pub id: u32,
    pub dmg: u32,
    pub flag: DamageFlag,
}

/// Kill-steal protection on a mob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KsProtect {
    pub owner: BlockId,
    pub scope: KsScope,
    pub party_id: u32,
    pub guild_id: u32,
    pub until: Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardianData {
    /// Index into the world's castle table.
    pub castle: usize,
    /// Permanent guardian slot; `None` for temporary ones (emperium, summoned).
    pub number: Option<usize>,
    /// 0 until the owning guild has been resolved.
    pub guild_id: u32,
    pub guardup_lv: i32,
}

pub struct MobData {
    pub bl: BlockList,
    pub ud: UnitData,
    pub class_: u32,
    pub db: Arc<MobTemplate>,
    pub name: String,
    pub level: i32,
    pub status: MobStatus,
    pub sc: MobSc,
    pub state: MobState,
    pub special: SpecialState,
    /// Spawn site in the world's spawn table; `None` for dynamic mobs.
    pub spawn: Option<usize>,

    pub target_id: BlockId,
    pub attacked_id: BlockId,
    pub attacked_count: u32,
    /// Give-up distance for the current chase.
    pub min_chase: i32,
    pub move_fail_count: u32,
    pub walktoxy_fail_count: u32,

    pub last_thinktime: Tick,
    pub last_linktime: Tick,
    pub next_walktime: Tick,
    pub last_pcneartime: Tick,
    pub dmgtick: Tick,

    pub spawn_timer: Option<TimerId>,
    pub deletetimer: Option<TimerId>,

    pub master_id: BlockId,
    pub master_dist: i32,

    /// Slot of the skill used last, if any.
    pub skill_idx: Option<usize>,
    /// Last use tick per template skill slot.
    pub skilldelay: Vec<Tick>,

    pub dmglog: [DamageLog; DAMAGELOG_SIZE],
    pub tdmg: u32,
    pub lootitems: Vec<ItemStack>,

    pub guardian: Option<GuardianData>,
    pub tomb_nid: Option<BlockId>,
    pub npc_event: String,
    pub ks: Option<KsProtect>,
}

impl std::fmt::Debug for MobData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MobData")
            .field("id", &self.bl.id)
            .field("class", &self.class_)
            .field("pos", &(self.bl.m, self.bl.x, self.bl.y))
            .field("hp", &self.status.hp)
            .field("skillstate", &self.state.skillstate)
            .field("target_id", &self.target_id)
            .finish()
    }
}

impl MobData {
    pub fn new(id: BlockId, db: Arc<MobTemplate>, battle: &BattleConfig) -> Self {
        let status = MobStatus::from_template(&db, SpawnSize::Normal, battle);
        MobData {
            bl: BlockList::new(id, BlType::MOB),
            ud: UnitData::default(),
            class_: db.id,
            name: db.name.clone(),
            level: db.lv,
            status,
            sc: MobSc::empty(),
            state: MobState::default(),
            special: SpecialState::default(),
            spawn: None,
            target_id: 0,
            attacked_id: 0,
            attacked_count: 0,
            min_chase: db.range3,
            move_fail_count: 0,
            walktoxy_fail_count: 0,
            last_thinktime: 0,
            last_linktime: 0,
            next_walktime: 0,
            last_pcneartime: 0,
            dmgtick: 0,
            spawn_timer: None,
            deletetimer: None,
            master_id: 0,
            master_dist: 0,
            skill_idx: None,
            skilldelay: vec![0; db.skills.len()],
            dmglog: [DamageLog::default(); DAMAGELOG_SIZE],
            tdmg: 0,
            lootitems: Vec::new(),
            guardian: None,
            tomb_nid: None,
            npc_event: String::new(),
            ks: None,
            db,
        }
    }

    pub fn mode(&self) -> Mode {
        self.status.mode
    }

    pub fn is_boss(&self) -> bool {
        self.status.mode.contains(Mode::BOSS)
    }

    pub fn is_dead(&self) -> bool {
        self.status.hp <= 0
    }

    pub fn is_hidden(&self) -> bool {
        self.sc.intersects(MobSc::HIDING | MobSc::CLOAKING)
    }

    pub fn is_walking(&self) -> bool {
        self.ud.walktimer.is_some()
    }

    pub fn is_clone(&self) -> bool {
        (MOB_CLONE_START..=MOB_CLONE_END).contains(&self.class_)
    }

    /// Object types this mob searches for enemies.
    pub fn enemy_type(&self) -> BlType {
        if self.special.ai == AiKind::None {
            BlType::CHAR
        } else {
            BlType::MOB
        }
    }

    /// Whether the current target may be swapped for `target`.
    pub fn can_changetarget(&self, target: &BlockList, battle: &BattleConfig) -> bool {
        if self.state.provoke_flag != 0 {
            if self.state.provoke_flag == target.id {
                return true;
            }
            if !battle.has_ai(mob_ai::ANY_TARGET) {
                return false;
            }
        }
        let mode = self.status.mode;
        match self.state.skillstate {
            SkillState::Berserk => {
                mode.contains(Mode::CHANGETARGET_MELEE)
                    && (battle.has_ai(mob_ai::ANY_TARGET) || check_distance_bl(&self.bl, target, 3))
            }
            SkillState::Rush => mode.contains(Mode::CHANGETARGET_CHASE),
            SkillState::Follow
            | SkillState::Angry
            | SkillState::Idle
            | SkillState::Walk
            | SkillState::Loot => true,
            SkillState::Dead | SkillState::Any | SkillState::AnyTarget => false,
        }
    }

    /// Add `damage` by `char_id` to the damage log.
    ///
    /// An attacker keeps its slot. A newcomer takes the first free slot; with
    /// the log full it replaces the smallest entry after slot 0, so the first
    /// attacker is never evicted.
    pub fn record_damage(&mut self, char_id: u32, flag: DamageFlag, damage: u32) {
        let mut minpos = DAMAGELOG_SIZE - 1;
        let mut mindmg = u32::MAX;
        for i in 0..DAMAGELOG_SIZE {
            let slot = &mut self.dmglog[i];
            if slot.id == char_id && slot.flag == flag {
                slot.dmg = slot.dmg.saturating_add(damage);
                return;
            }
            if slot.id == 0 {
                *slot = DamageLog { id: char_id, dmg: damage, flag };
                return;
            }
            if i > 0 && slot.dmg < mindmg {
                mindmg = slot.dmg;
                minpos = i;
            }
        }
        self.dmglog[minpos] = DamageLog { id: char_id, dmg: damage, flag };
    }

    /// Filled damage-log slots, in log order.
    pub fn damage_entries(&self) -> impl Iterator<Item = &DamageLog> {
        self.dmglog.iter().take_while(|d| d.id != 0)
    }

    /// Push a looted item, dropping the oldest when the bag is full.
    pub fn push_loot(&mut self, item: ItemStack) -> Option<ItemStack> {
        let evicted = if self.lootitems.len() >= LOOTITEM_SIZE {
            Some(self.lootitems.remove(0))
        } else {
            None
        };
        self.lootitems.push(item);
        evicted
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::game::hooks::ScriptedRandom;
    use crate::game::map::{Block, MapGrid};
    use crate::game::pc::{pc_add, PlayerData};
    use crate::game::world::{MapWorld, MapWorldBuilder};
    use crate::timer::ManualClock;

    /// 40x40 open map, random source pinned to 0.
    pub(crate) fn test_world(clock: &ManualClock) -> MapWorld {
        let mut world = MapWorldBuilder::new()
            .clock(clock.clone())
            .rng(ScriptedRandom::constant(0))
            .build();
        world.map.add_map(MapGrid::open("test", 40, 40));
        world
    }

    /// Place a class 1002 mob with `mode` on map 0.
    pub(crate) fn put_mob(world: &mut MapWorld, mode: Mode, x: i32, y: i32) -> BlockId {
        put_mob_from(world, template(1002, mode), x, y)
    }

    pub(crate) fn put_mob_from(world: &mut MapWorld, db: Arc<MobTemplate>, x: i32, y: i32) -> BlockId {
        let id = world.map.alloc_id(BlType::MOB).unwrap();
        let mut md = MobData::new(id, db, &world.battle);
        md.bl.x = x;
        md.bl.y = y;
        md.ud.to_x = x;
        md.ud.to_y = y;
        world.map.insert(Block::Mob(Box::new(md))).unwrap();
        world.map.addblock(id).unwrap();
        id
    }

    pub(crate) fn put_pc(world: &mut MapWorld, x: i32, y: i32) -> BlockId {
        let id = world.map.players().last().map_or(1, |last| last + 1);
        pc_add(&mut world.map, PlayerData::new(id, id + 150_000, "tester"), 0, x, y).unwrap()
    }

    pub(crate) fn template(id: u32, mode: Mode) -> Arc<MobTemplate> {
        Arc::new(MobTemplate {
            id,
            name: format!("mob{id}"),
            lv: 10,
            max_hp: 100,
            range: 1,
            range2: 10,
            range3: 12,
            mode,
            speed: 200,
            adelay: 1000,
            amotion: 500,
            dmotion: 300,
            ..MobTemplate::default()
        })
    }

    fn mob(state: SkillState, mode: Mode) -> MobData {
        let mut md = MobData::new(1, template(1002, mode), &BattleConfig::default());
        md.bl.x = 10;
        md.bl.y = 10;
        md.state.skillstate = state;
        md
    }

    fn at(x: i32, y: i32) -> BlockList {
        BlockList { x, y, ..BlockList::new(42, BlType::PC) }
    }

    #[test]
    fn test_can_changetarget_table() {
        let battle = BattleConfig::default();
        let near = at(12, 10);
        let far = at(20, 10);

        for state in [SkillState::Follow, SkillState::Angry, SkillState::Idle, SkillState::Walk, SkillState::Loot] {
            assert!(mob(state, Mode::empty()).can_changetarget(&far, &battle), "{state:?}");
        }
        for state in [SkillState::Dead, SkillState::Any, SkillState::AnyTarget] {
            assert!(!mob(state, Mode::all()).can_changetarget(&near, &battle), "{state:?}");
        }

        assert!(!mob(SkillState::Berserk, Mode::empty()).can_changetarget(&near, &battle));
        let berserk = mob(SkillState::Berserk, Mode::CHANGETARGET_MELEE);
        assert!(berserk.can_changetarget(&near, &battle));
        assert!(!berserk.can_changetarget(&far, &battle));
        let any = BattleConfig { mob_ai: mob_ai::ANY_TARGET, ..BattleConfig::default() };
        assert!(berserk.can_changetarget(&far, &any));

        assert!(!mob(SkillState::Rush, Mode::empty()).can_changetarget(&near, &battle));
        assert!(mob(SkillState::Rush, Mode::CHANGETARGET_CHASE).can_changetarget(&far, &battle));
    }

    #[test]
    fn test_provoke_overrides() {
        let battle = BattleConfig::default();
        let mut md = mob(SkillState::Follow, Mode::empty());
        md.state.provoke_flag = 42;
        assert!(md.can_changetarget(&at(20, 20), &battle));
        let other = BlockList { id: 43, ..at(11, 10) };
        assert!(!md.can_changetarget(&other, &battle));
        let any = BattleConfig { mob_ai: mob_ai::ANY_TARGET, ..BattleConfig::default() };
        assert!(md.can_changetarget(&other, &any));
    }

    #[test]
    fn test_damage_log_accumulates() {
        let mut md = mob(SkillState::Idle, Mode::empty());
        md.record_damage(7, DamageFlag::Normal, 10);
        md.record_damage(8, DamageFlag::Normal, 5);
        md.record_damage(7, DamageFlag::Normal, 10);
        md.record_damage(7, DamageFlag::Pet, 1);
        let entries: Vec<_> = md.damage_entries().map(|d| (d.id, d.dmg, d.flag)).collect();
        assert_eq!(
            entries,
            vec![(7, 20, DamageFlag::Normal), (8, 5, DamageFlag::Normal), (7, 1, DamageFlag::Pet)]
        );
    }

    #[test]
    fn test_damage_log_eviction_keeps_first_and_largest() {
        let mut md = mob(SkillState::Idle, Mode::empty());
        // First attacker does the least damage of all.
        md.record_damage(1, DamageFlag::Normal, 1);
        for id in 2..=(DAMAGELOG_SIZE as u32 + 10) {
            md.record_damage(id, DamageFlag::Normal, id * 10);
        }
        assert_eq!(md.dmglog[0].id, 1);
        let mut kept: Vec<u32> = md.dmglog[1..].iter().map(|d| d.dmg).collect();
        kept.sort_unstable();
        let expected: Vec<u32> = (12..=(DAMAGELOG_SIZE as u32 + 10)).map(|id| id * 10).collect();
        assert_eq!(kept, expected);
    }

    #[test]
    fn test_damage_log_small_newcomer_evicts_weakest_entry() {
        let mut md = mob(SkillState::Idle, Mode::empty());
        md.record_damage(1, DamageFlag::Normal, 1);
        for id in 2..=DAMAGELOG_SIZE as u32 {
            md.record_damage(id, DamageFlag::Normal, 100 + id);
        }
        md.record_damage(99, DamageFlag::Normal, 1);

        let ids: Vec<u32> = md.damage_entries().map(|d| d.id).collect();
        assert_eq!(ids.len(), DAMAGELOG_SIZE);
        assert_eq!(md.dmglog[0].id, 1);
        assert!(ids.contains(&99));
        assert!(!ids.contains(&2));
        assert!(ids.contains(&3));
    }

    #[test]
    fn test_loot_bag_pushes_out_oldest() {
        let mut md = mob(SkillState::Idle, Mode::LOOTER);
        for n in 0..LOOTITEM_SIZE as u32 {
            assert!(md.push_loot(ItemStack::new(500 + n, 1)).is_none());
        }
        assert_eq!(md.push_loot(ItemStack::new(999, 1)), Some(ItemStack::new(500, 1)));
        assert_eq!(md.lootitems.len(), LOOTITEM_SIZE);
        assert_eq!(md.lootitems.last().map(|i| i.nameid), Some(999));
    }

    #[test]
    fn test_enemy_type_follows_ai() {
        let mut md = mob(SkillState::Idle, Mode::empty());
        assert_eq!(md.enemy_type(), BlType::CHAR);
        md.special.ai = AiKind::Attack;
        assert_eq!(md.enemy_type(), BlType::MOB);
    }
}
