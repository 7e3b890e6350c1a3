//! Player characters as seen by the map core.
//!
//! Players are driven from outside (client sessions); the core only needs
//! their position, liveness and the few flags mobs react to.

use bitflags::bitflags;

use crate::game::map::{Block, EntityDirectory, MapError};
use crate::game::types::{BlType, BlockId, BlockList, MapId, PC_START_NUM, MOB_START_NUM};
use crate::timer::Tick;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PcState: u32 {
        const DEAD              = 0x0001;
        const HIDING            = 0x0002;
        const CLOAKING          = 0x0004;
        /// Post-warp / login invulnerability.
        const INVINCIBLE        = 0x0008;
        /// Sitting in a group that non-boss mobs ignore.
        const GANGSTER_PARADISE = 0x0010;
        const WALKING           = 0x0020;
    }
}

/// Who may share kill credit while kill-steal protection is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KsScope {
    #[default]
    None,
    SelfOnly,
    Party,
    Guild,
}

#[derive(Debug, Clone)]
pub struct PlayerData {
    pub bl: BlockList,
    pub char_id: u32,
    pub name: String,
    pub base_level: i32,
    pub hp: i32,
    pub max_hp: i32,
    pub party_id: u32,
    pub guild_id: u32,
    pub state: PcState,
    /// Kill-steal protection this player asked for.
    pub noks: KsScope,
    /// Last time a "mob is protected" message was sent to this player.
    pub ks_floodprotect_tick: Tick,
}

impl PlayerData {
    pub fn new(id: BlockId, char_id: u32, name: &str) -> Self {
        PlayerData {
            bl: BlockList::new(id, BlType::PC),
            char_id,
            name: name.to_string(),
            base_level: 1,
            hp: 100,
            max_hp: 100,
            party_id: 0,
            guild_id: 0,
            state: PcState::empty(),
            noks: KsScope::None,
            ks_floodprotect_tick: 0,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.state.contains(PcState::DEAD) || self.hp <= 0
    }

    pub fn is_hidden(&self) -> bool {
        self.state.intersects(PcState::HIDING | PcState::CLOAKING)
    }

    pub fn is_walking(&self) -> bool {
        self.state.contains(PcState::WALKING)
    }
}

/// Register a player and place them at `(x, y)` on map `m`.
pub fn pc_add(dir: &mut EntityDirectory, mut sd: PlayerData, m: MapId, x: i32, y: i32) -> Result<BlockId, MapError> {
    let id = sd.bl.id;
    if !(PC_START_NUM..MOB_START_NUM).contains(&id) {
        return Err(MapError::IdSpaceExhausted(BlType::PC));
    }
    let grid = dir.map(m).ok_or(MapError::UnknownMap(m))?;
    if !grid.in_bounds(x, y) {
        return Err(MapError::OutOfBounds { m, x, y });
    }
    sd.bl.m = m;
    sd.bl.x = x;
    sd.bl.y = y;
    sd.bl.on_map = false;
    dir.insert(Block::Pc(Box::new(sd)))?;
    dir.addblock(id)?;
    tracing::debug!("[map] pc {id} entered map {m} at ({x},{y})");
    Ok(id)
}

/// Move a player; crossing to another map goes through remove + add.
pub fn pc_move(dir: &mut EntityDirectory, id: BlockId, m: MapId, x: i32, y: i32) -> Result<(), MapError> {
    let bl = *dir.id2bl(id).ok_or(MapError::UnknownBlock(id))?;
    if bl.m == m && bl.on_map {
        return dir.moveblock(id, x, y);
    }
    if dir.map(m).is_none() {
        return Err(MapError::UnknownMap(m));
    }
    dir.delblock(id);
    dir.place(id, m, x, y)?;
    dir.addblock(id)
}

pub fn pc_remove(dir: &mut EntityDirectory, id: BlockId) -> Option<PlayerData> {
    dir.pc(id)?;
    match dir.remove(id) {
        Some(Block::Pc(sd)) => Some(*sd),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::MapGrid;

    #[test]
    fn test_pc_lifecycle() {
        let mut dir = EntityDirectory::new();
        let a = dir.add_map(MapGrid::open("a", 20, 20));
        let b = dir.add_map(MapGrid::open("b", 20, 20));

        pc_add(&mut dir, PlayerData::new(10, 150000, "Alice"), a, 5, 5).unwrap();
        assert_eq!(dir.users(a), 1);

        pc_move(&mut dir, 10, a, 6, 5).unwrap();
        assert_eq!(dir.pc(10).unwrap().bl.x, 6);

        pc_move(&mut dir, 10, b, 1, 1).unwrap();
        assert_eq!(dir.users(a), 0);
        assert_eq!(dir.users(b), 1);

        let sd = pc_remove(&mut dir, 10).unwrap();
        assert_eq!(sd.name, "Alice");
        assert_eq!(dir.users(b), 0);
    }

    #[test]
    fn test_pc_add_rejects_bad_input() {
        let mut dir = EntityDirectory::new();
        let m = dir.add_map(MapGrid::open("a", 20, 20));
        assert!(pc_add(&mut dir, PlayerData::new(MOB_START_NUM, 1, "x"), m, 1, 1).is_err());
        assert_eq!(
            pc_add(&mut dir, PlayerData::new(3, 1, "x"), m, 50, 1),
            Err(MapError::OutOfBounds { m, x: 50, y: 1 })
        );
        assert_eq!(pc_add(&mut dir, PlayerData::new(3, 1, "x"), 4, 1, 1), Err(MapError::UnknownMap(4)));
    }

    #[test]
    fn test_state_flags() {
        let mut sd = PlayerData::new(1, 1, "x");
        assert!(!sd.is_dead());
        sd.state |= PcState::CLOAKING;
        assert!(sd.is_hidden());
        sd.hp = 0;
        assert!(sd.is_dead());
    }
}
