//! Shared game types: object ids, block headers and grid geometry.

use bitflags::bitflags;

pub type BlockId = u32;
pub type MapId = u16;

// ─── Id ranges ──────────────────────────────────────────────────────────────
pub const PC_START_NUM: u32 = 1;
pub const MOB_START_NUM: u32 = 1073741823;
pub const FLOORITEM_START_NUM: u32 = 2047483647;
pub const NPC_START_NUM: u32 = 3221225472;
pub const NPC_END_NUM: u32 = u32::MAX - 1;

bitflags! {
    /// Object type mask used by range queries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlType: u32 {
        const PC   = 0x01;
        const MOB  = 0x02;
        const NPC  = 0x04;
        const ITEM = 0x08;
        const CHAR = Self::PC.bits() | Self::MOB.bits();
        const ALL  = 0x0F;
    }
}

/// Header carried by every object placed in the entity directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockList {
    pub id: BlockId,
    pub bl_type: BlType,
    pub m: MapId,
    pub x: i32,
    pub y: i32,
    /// Linked into its map's spatial blocks.
    pub on_map: bool,
}

impl BlockList {
    pub fn new(id: BlockId, bl_type: BlType) -> Self {
        BlockList { id, bl_type, m: 0, x: 0, y: 0, on_map: false }
    }
}

// ─── Directions ─────────────────────────────────────────────────────────────
// 0 = south, counting clockwise through west. Odd values are diagonals.
pub const DIRX: [i32; 8] = [0, -1, -1, -1, 0, 1, 1, 1];
pub const DIRY: [i32; 8] = [1, 1, 0, -1, -1, -1, 0, 1];

pub fn dir_is_diagonal(dir: u8) -> bool {
    dir & 1 == 1
}

/// Direction from `(x0, y0)` towards `(x1, y1)`.
pub fn calc_dir(x0: i32, y0: i32, x1: i32, y1: i32) -> u8 {
    let dx = x1 - x0;
    let dy = y1 - y0;
    if dx == 0 && dy == 0 {
        0
    } else if dx >= 0 && dy >= 0 {
        if dx * 2 < dy || dx == 0 {
            0
        } else if dx > dy * 2 + 1 || dy == 0 {
            6
        } else {
            7
        }
    } else if dx >= 0 && dy <= 0 {
        if dx * 2 < -dy || dx == 0 {
            4
        } else if dx > -dy * 2 + 1 || dy == 0 {
            6
        } else {
            5
        }
    } else if dy <= 0 {
        if -dx * 2 < -dy || dx == 0 {
            4
        } else if -dx > -dy * 2 + 1 || dy == 0 {
            2
        } else {
            3
        }
    } else if -dx * 2 < dy {
        0
    } else if -dx > dy * 2 + 1 {
        2
    } else {
        1
    }
}

/// Chebyshev distance, the metric used for every range check.
#[inline]
pub fn distance(dx: i32, dy: i32) -> i32 {
    dx.abs().max(dy.abs())
}

#[inline]
pub fn check_distance(dx: i32, dy: i32, range: i32) -> bool {
    distance(dx, dy) <= range
}

pub fn distance_bl(a: &BlockList, b: &BlockList) -> i32 {
    distance(a.x - b.x, a.y - b.y)
}

pub fn check_distance_bl(a: &BlockList, b: &BlockList, range: i32) -> bool {
    check_distance(a.x - b.x, a.y - b.y, range)
}
