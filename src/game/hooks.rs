//! Interfaces to subsystems outside the simulation core.
//!
//! The mob engine only calls out through these traits. Every trait has a
//! null implementation used by default; real ones are injected through
//! [`MapWorldBuilder`](crate::game::world::MapWorldBuilder).

use crate::game::item::{FloorItem, ItemStack};
use crate::game::path::WalkPath;
use crate::game::types::{BlockId, BlockList, MapId};
use crate::timer::Tick;

/// How a unit left the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearType {
    OutSight,
    Dead,
    Respawn,
    Teleport,
}

/// Client-facing events. Fire-and-forget.
pub trait NotificationSink {
    fn notify_spawn(&mut self, bl: &BlockList);
    fn notify_move(&mut self, bl: &BlockList, path: &WalkPath);
    fn notify_attack(&mut self, src: &BlockList, target: BlockId, tick: Tick);
    fn notify_hp_bar(&mut self, mob: &BlockList, hp: i32, max_hp: i32, observer: BlockId);
    fn notify_death_effects(&mut self, bl: &BlockList);
    fn notify_clear_unit(&mut self, bl: &BlockList, how: ClearType);
    fn notify_mvp(&mut self, player: BlockId, mob: &BlockList, exp: u64, item: Option<u32>);
    fn notify_floor_item(&mut self, item: &FloorItem);
    fn notify_message(&mut self, target: BlockId, msg: &str);
}

/// A skill a mob asks the combat engine to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillRequest {
    pub skill_id: u16,
    pub skill_lv: u16,
    /// Target unit, or 0 for a ground skill at `(x, y)`.
    pub target: BlockId,
    pub x: i32,
    pub y: i32,
    pub casttime: i32,
    pub cancelable: bool,
}

pub trait CombatEngine {
    /// Perform one normal attack. Returns false if the attack could not be made.
    fn issue_attack(&mut self, attacker: &BlockList, target: &BlockList, tick: Tick) -> bool;
    /// Start a skill. Returns false if the skill failed to start.
    fn try_use_skill(&mut self, caster: &BlockList, req: &SkillRequest, tick: Tick) -> bool;
}

pub trait RewardSink {
    fn gain_exp(&mut self, player: BlockId, base: u64, job: u64, mob: BlockId);
    fn gain_zeny(&mut self, player: BlockId, zeny: u32);
    /// Whether the party splits experience between members.
    fn party_shares_exp(&self, party_id: u32) -> bool;
    /// Split a kill's rewards between the party members on map `m`.
    fn party_exp_share(&mut self, party_id: u32, m: MapId, base: u64, job: u64, zeny: u32, mob: BlockId);
    /// Put an item straight into a player's inventory. False means it must be dropped instead.
    fn give_item(&mut self, player: BlockId, item: &ItemStack) -> bool;
}

pub trait GuildRegistry {
    fn guild_exists(&self, guild_id: u32) -> bool;
    /// Level of the guild's guardian reinforcement skill.
    fn guard_up(&self, guild_id: u32) -> i32;
    fn castle_data_save(&mut self, castle_id: u32, index: usize, value: i32);
}

/// Uniform 32-bit random numbers.
pub trait RandomSource {
    fn rnd(&mut self) -> u32;
}

// ─── Defaults ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct NullNotifier;

impl NotificationSink for NullNotifier {
    fn notify_spawn(&mut self, bl: &BlockList) {
        tracing::trace!("[notify] spawn {}", bl.id);
    }

    fn notify_move(&mut self, bl: &BlockList, path: &WalkPath) {
        tracing::trace!("[notify] move {} steps={}", bl.id, path.len());
    }

    fn notify_attack(&mut self, src: &BlockList, target: BlockId, _tick: Tick) {
        tracing::trace!("[notify] attack {} -> {target}", src.id);
    }

    fn notify_hp_bar(&mut self, mob: &BlockList, hp: i32, max_hp: i32, observer: BlockId) {
        tracing::trace!("[notify] hp {} {hp}/{max_hp} to {observer}", mob.id);
    }

    fn notify_death_effects(&mut self, bl: &BlockList) {
        tracing::trace!("[notify] death {}", bl.id);
    }

    fn notify_clear_unit(&mut self, bl: &BlockList, how: ClearType) {
        tracing::trace!("[notify] clear {} {how:?}", bl.id);
    }

    fn notify_mvp(&mut self, player: BlockId, mob: &BlockList, exp: u64, item: Option<u32>) {
        tracing::trace!("[notify] mvp {player} on {} exp={exp} item={item:?}", mob.id);
    }

    fn notify_floor_item(&mut self, item: &FloorItem) {
        tracing::trace!("[notify] floor item {} ({})", item.bl.id, item.item.nameid);
    }

    fn notify_message(&mut self, target: BlockId, msg: &str) {
        tracing::trace!("[notify] message to {target}: {msg}");
    }
}

#[derive(Debug, Default)]
pub struct NullCombat;

impl CombatEngine for NullCombat {
    fn issue_attack(&mut self, attacker: &BlockList, target: &BlockList, _tick: Tick) -> bool {
        tracing::trace!("[combat] attack {} -> {}", attacker.id, target.id);
        true
    }

    fn try_use_skill(&mut self, caster: &BlockList, req: &SkillRequest, _tick: Tick) -> bool {
        tracing::trace!("[combat] skill {} lv{} by {}", req.skill_id, req.skill_lv, caster.id);
        true
    }
}

#[derive(Debug, Default)]
pub struct NullRewards;

impl RewardSink for NullRewards {
    fn gain_exp(&mut self, player: BlockId, base: u64, job: u64, mob: BlockId) {
        tracing::trace!("[reward] exp {player} base={base} job={job} from {mob}");
    }

    fn gain_zeny(&mut self, player: BlockId, zeny: u32) {
        tracing::trace!("[reward] zeny {player} +{zeny}");
    }

    fn party_shares_exp(&self, _party_id: u32) -> bool {
        false
    }

    fn party_exp_share(&mut self, party_id: u32, m: MapId, base: u64, job: u64, zeny: u32, mob: BlockId) {
        tracing::trace!("[reward] party {party_id} on map {m} base={base} job={job} zeny={zeny} from {mob}");
    }

    fn give_item(&mut self, _player: BlockId, _item: &ItemStack) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct NullGuilds;

impl GuildRegistry for NullGuilds {
    fn guild_exists(&self, _guild_id: u32) -> bool {
        false
    }

    fn guard_up(&self, _guild_id: u32) -> i32 {
        0
    }

    fn castle_data_save(&mut self, castle_id: u32, index: usize, value: i32) {
        tracing::trace!("[guild] castle {castle_id} data[{index}] = {value}");
    }
}

/// Thread-local generator from `rand`.
#[derive(Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn rnd(&mut self) -> u32 {
        rand::random::<u32>()
    }
}

/// Replays a fixed list of values, wrapping around at the end.
#[derive(Debug, Clone)]
pub struct ScriptedRandom {
    values: Vec<u32>,
    pos: usize,
}

impl ScriptedRandom {
    pub fn cycle(values: Vec<u32>) -> Self {
        ScriptedRandom { values, pos: 0 }
    }

    /// Always returns `value`.
    pub fn constant(value: u32) -> Self {
        Self::cycle(vec![value])
    }
}

impl RandomSource for ScriptedRandom {
    fn rnd(&mut self) -> u32 {
        if self.values.is_empty() {
            return 0;
        }
        let v = self.values[self.pos % self.values.len()];
        self.pos = (self.pos + 1) % self.values.len();
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_random_wraps() {
        let mut rng = ScriptedRandom::cycle(vec![3, 1, 4]);
        let drawn: Vec<_> = (0..5).map(|_| rng.rnd()).collect();
        assert_eq!(drawn, vec![3, 1, 4, 3, 1]);
        assert_eq!(ScriptedRandom::cycle(vec![]).rnd(), 0);
    }

    #[test]
    fn test_null_defaults() {
        let bl = BlockList::new(7, crate::game::types::BlType::MOB);
        assert!(NullCombat.issue_attack(&bl, &bl, 0));
        assert!(!NullRewards.give_item(1, &ItemStack::new(501, 1)));
        assert!(!NullGuilds.guild_exists(1));
    }
}
