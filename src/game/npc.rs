//! NPC objects the mob core interacts with: warp portals and MVP tombs.

use chrono::{DateTime, Utc};

use crate::game::map::{CellCheck, EntityDirectory};
use crate::game::types::{BlType, BlockId, BlockList, MapId};

#[derive(Debug, Clone, PartialEq)]
pub enum NpcKind {
    /// Stepping on the cell moves the unit to `(x, y)` on `map`.
    Warp { map: MapId, x: i32, y: i32 },
    /// Marker left where a boss died, until it respawns.
    Tomb {
        mob: BlockId,
        killer_name: String,
        kill_time: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct NpcData {
    pub bl: BlockList,
    pub name: String,
    pub kind: NpcKind,
}

impl NpcData {
    pub fn warp(id: BlockId, name: &str, dest: MapId, x: i32, y: i32) -> Self {
        NpcData {
            bl: BlockList::new(id, BlType::NPC),
            name: name.to_string(),
            kind: NpcKind::Warp { map: dest, x, y },
        }
    }

    pub fn tomb(id: BlockId, mob: BlockId, killer_name: Option<&str>) -> Self {
        NpcData {
            bl: BlockList::new(id, BlType::NPC),
            name: "Tomb".to_string(),
            kind: NpcKind::Tomb {
                mob,
                killer_name: killer_name.unwrap_or_default().to_string(),
                kill_time: Utc::now(),
            },
        }
    }

    pub fn warp_dest(&self) -> Option<(MapId, i32, i32)> {
        match self.kind {
            NpcKind::Warp { map, x, y } => Some((map, x, y)),
            NpcKind::Tomb { .. } => None,
        }
    }
}

/// Warp portal on `(x, y)`, if any.
pub fn warp_at(dir: &EntityDirectory, m: MapId, x: i32, y: i32) -> Option<&NpcData> {
    if !dir.getcell(m, x, y, CellCheck::Npc) {
        return None;
    }
    dir.ids_in_area(m, x, y, x, y, BlType::NPC)
        .into_iter()
        .filter_map(|id| dir.npc(id))
        .find(|nd| nd.warp_dest().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::{Block, MapGrid};

    fn with_warp() -> (EntityDirectory, BlockId) {
        let mut dir = EntityDirectory::new();
        dir.add_map(MapGrid::open("a", 20, 20));
        dir.add_map(MapGrid::open("b", 20, 20));
        let id = dir.alloc_id(BlType::NPC).unwrap();
        let mut nd = NpcData::warp(id, "a_b", 1, 3, 4);
        nd.bl.x = 10;
        nd.bl.y = 10;
        dir.insert(Block::Npc(Box::new(nd))).unwrap();
        dir.addblock(id).unwrap();
        (dir, id)
    }

    #[test]
    fn test_warp_lookup() {
        let (dir, id) = with_warp();
        let nd = warp_at(&dir, 0, 10, 10).unwrap();
        assert_eq!(nd.bl.id, id);
        assert_eq!(nd.warp_dest(), Some((1, 3, 4)));
        assert!(warp_at(&dir, 0, 10, 11).is_none());
    }

    #[test]
    fn test_tomb_is_not_a_warp() {
        let nd = NpcData::tomb(5, 9, Some("Bob"));
        assert!(nd.warp_dest().is_none());
        match nd.kind {
            NpcKind::Tomb { killer_name, mob, .. } => {
                assert_eq!(killer_name, "Bob");
                assert_eq!(mob, 9);
            }
            _ => panic!("expected tomb"),
        }
    }
}
