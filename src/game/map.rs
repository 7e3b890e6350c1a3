//! Entity directory: per-map grids, the spatial block index and id allocation.
//!
//! Every live object (player, mob, NPC, floor item) is owned by the
//! [`EntityDirectory`] and addressed by its [`BlockId`]. Objects that are
//! "on map" are additionally linked into `BLOCK_SIZE`-cell blocks of their
//! map so that area queries only visit nearby blocks.
//!
//! Range queries return ids in block order and are evaluated against the
//! live index; callers re-resolve each id before touching it, since an
//! earlier step of the same pass may have removed it.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::config::BattleConfig;
use crate::game::hooks::RandomSource;
use crate::game::item::FloorItem;
use crate::game::mob::MobData;
use crate::game::npc::NpcData;
use crate::game::path;
use crate::game::pc::PlayerData;
use crate::game::types::*;

pub const BLOCK_SIZE: i32 = 8;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MapError {
    #[error("unknown map {0}")]
    UnknownMap(MapId),

    #[error("no free object id left in the {0:?} range")]
    IdSpaceExhausted(BlType),

    #[error("({x},{y}) is out of bounds on map {m}")]
    OutOfBounds { m: MapId, x: i32, y: i32 },

    #[error("unknown block {0}")]
    UnknownBlock(BlockId),

    #[error("block id {0} is already in use")]
    DuplicateId(BlockId),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MapFlags: u32 {
        const PVP        = 0x0001;
        const GVG        = 0x0002;
        const GVG_CASTLE = 0x0004;
        /// No MVP tombs on this map.
        const NOTOMB     = 0x0008;
        /// Kill-steal protection disabled.
        const ALLOW_KS   = 0x0010;
        const TOWN       = 0x0020;
    }
}

/// Cell queries understood by [`MapGrid::getcell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellCheck {
    /// Cell can be walked on.
    Pass,
    NoPass,
    /// Like `Pass`; used by reachability searches.
    Reach,
    NoReach,
    /// An NPC (warp portal) covers the cell.
    Npc,
}

#[derive(Debug, Clone, Copy, Default)]
struct CellData {
    walkable: bool,
    npc: u16,
}

#[derive(Debug)]
pub struct MapGrid {
    pub name: String,
    pub index: MapId,
    pub xs: i32,
    pub ys: i32,
    pub bxs: i32,
    pub bys: i32,
    pub flags: MapFlags,
    cells: Vec<CellData>,
    blocks: Vec<Vec<BlockId>>,
    users: i32,
}

impl MapGrid {
    /// A map where every cell is walkable.
    pub fn open(name: &str, xs: i32, ys: i32) -> Self {
        let mut grid = Self::blank(name, xs, ys);
        for cell in &mut grid.cells {
            cell.walkable = true;
        }
        grid
    }

    /// Build from a per-cell pass table; non-zero pass values block movement.
    pub fn from_pass(name: &str, xs: i32, ys: i32, pass: &[u16]) -> Self {
        let mut grid = Self::blank(name, xs, ys);
        for (cell, p) in grid.cells.iter_mut().zip(pass) {
            cell.walkable = *p == 0;
        }
        grid
    }

    fn blank(name: &str, xs: i32, ys: i32) -> Self {
        let xs = xs.max(1);
        let ys = ys.max(1);
        let bxs = (xs + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let bys = (ys + BLOCK_SIZE - 1) / BLOCK_SIZE;
        MapGrid {
            name: name.to_string(),
            index: 0,
            xs,
            ys,
            bxs,
            bys,
            flags: MapFlags::empty(),
            cells: vec![CellData::default(); (xs * ys) as usize],
            blocks: vec![Vec::new(); (bxs * bys) as usize],
            users: 0,
        }
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.xs && y < self.ys
    }

    fn cell_index(&self, x: i32, y: i32) -> usize {
        (x + y * self.xs) as usize
    }

    fn block_index(&self, x: i32, y: i32) -> usize {
        (x / BLOCK_SIZE + (y / BLOCK_SIZE) * self.bxs) as usize
    }

    pub fn getcell(&self, x: i32, y: i32, check: CellCheck) -> bool {
        if !self.in_bounds(x, y) {
            return matches!(check, CellCheck::NoPass | CellCheck::NoReach);
        }
        let cell = self.cells[self.cell_index(x, y)];
        match check {
            CellCheck::Pass | CellCheck::Reach => cell.walkable,
            CellCheck::NoPass | CellCheck::NoReach => !cell.walkable,
            CellCheck::Npc => cell.npc > 0,
        }
    }

    pub fn set_walkable(&mut self, x: i32, y: i32, walkable: bool) {
        if self.in_bounds(x, y) {
            let idx = self.cell_index(x, y);
            self.cells[idx].walkable = walkable;
        }
    }

    fn mark_npc(&mut self, x: i32, y: i32, add: bool) {
        if self.in_bounds(x, y) {
            let idx = self.cell_index(x, y);
            let cell = &mut self.cells[idx];
            cell.npc = if add { cell.npc.saturating_add(1) } else { cell.npc.saturating_sub(1) };
        }
    }

    pub fn users(&self) -> i32 {
        self.users
    }
}

/// Anything that can live in the directory.
pub enum Block {
    Pc(Box<PlayerData>),
    Mob(Box<MobData>),
    Npc(Box<NpcData>),
    Item(Box<FloorItem>),
}

impl Block {
    pub fn bl(&self) -> &BlockList {
        match self {
            Block::Pc(sd) => &sd.bl,
            Block::Mob(md) => &md.bl,
            Block::Npc(nd) => &nd.bl,
            Block::Item(fi) => &fi.bl,
        }
    }

    fn bl_mut(&mut self) -> &mut BlockList {
        match self {
            Block::Pc(sd) => &mut sd.bl,
            Block::Mob(md) => &mut md.bl,
            Block::Npc(nd) => &mut nd.bl,
            Block::Item(fi) => &mut fi.bl,
        }
    }
}

bitflags! {
    /// Options for [`EntityDirectory::search_freecell`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FreeCell: u8 {
        /// Cell must be reachable on foot from the source.
        const REACHABLE     = 0x2;
        /// Prefer cells with no player in view (`no_spawn_on_player`).
        const AVOID_PLAYERS = 0x4;
    }
}

#[derive(Debug, Clone, Copy)]
struct IdRange {
    start: u32,
    end: u32,
    last: u32,
}

impl IdRange {
    fn new(start: u32, end: u32) -> Self {
        IdRange { start, end, last: end }
    }
}

pub struct EntityDirectory {
    maps: Vec<MapGrid>,
    objects: HashMap<BlockId, Block>,
    charids: HashMap<u32, BlockId>,
    mob_ids: IdRange,
    item_ids: IdRange,
    npc_ids: IdRange,
}

impl Default for EntityDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityDirectory {
    pub fn new() -> Self {
        EntityDirectory {
            maps: Vec::new(),
            objects: HashMap::new(),
            charids: HashMap::new(),
            mob_ids: IdRange::new(MOB_START_NUM, FLOORITEM_START_NUM - 1),
            item_ids: IdRange::new(FLOORITEM_START_NUM, NPC_START_NUM - 1),
            npc_ids: IdRange::new(NPC_START_NUM, NPC_END_NUM),
        }
    }

    // ─── Maps ───────────────────────────────────────────────────────────────

    pub fn add_map(&mut self, mut grid: MapGrid) -> MapId {
        let m = self.maps.len() as MapId;
        grid.index = m;
        tracing::debug!("[map] add_map {} -> {m} ({}x{})", grid.name, grid.xs, grid.ys);
        self.maps.push(grid);
        m
    }

    pub fn mapname2mapid(&self, name: &str) -> Option<MapId> {
        self.maps.iter().position(|g| g.name == name).map(|m| m as MapId)
    }

    pub fn map(&self, m: MapId) -> Option<&MapGrid> {
        self.maps.get(m as usize)
    }

    pub fn map_mut(&mut self, m: MapId) -> Option<&mut MapGrid> {
        self.maps.get_mut(m as usize)
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    pub fn getcell(&self, m: MapId, x: i32, y: i32, check: CellCheck) -> bool {
        match self.map(m) {
            Some(grid) => grid.getcell(x, y, check),
            None => matches!(check, CellCheck::NoPass | CellCheck::NoReach),
        }
    }

    /// Number of players on map `m`.
    pub fn users(&self, m: MapId) -> i32 {
        self.map(m).map_or(0, |g| g.users)
    }

    // ─── Id index ───────────────────────────────────────────────────────────

    /// Restrict the id range handed out for one object type.
    pub fn limit_ids(&mut self, bl_type: BlType, start: u32, end: u32) {
        let range = IdRange::new(start, end);
        match bl_type {
            BlType::MOB => self.mob_ids = range,
            BlType::ITEM => self.item_ids = range,
            BlType::NPC => self.npc_ids = range,
            _ => {}
        }
    }

    /// Next free id in the range for `bl_type`, searching forward from the last one handed out.
    pub fn alloc_id(&mut self, bl_type: BlType) -> Result<BlockId, MapError> {
        let range = match bl_type {
            BlType::MOB => self.mob_ids,
            BlType::ITEM => self.item_ids,
            BlType::NPC => self.npc_ids,
            _ => return Err(MapError::IdSpaceExhausted(bl_type)),
        };
        let span = (range.end - range.start) as u64 + 1;
        let mut id = range.last;
        for _ in 0..span {
            id = if id >= range.end { range.start } else { id + 1 };
            if !self.objects.contains_key(&id) {
                let updated = IdRange { last: id, ..range };
                match bl_type {
                    BlType::MOB => self.mob_ids = updated,
                    BlType::ITEM => self.item_ids = updated,
                    _ => self.npc_ids = updated,
                }
                return Ok(id);
            }
        }
        tracing::error!("[map] no free object id for {bl_type:?}");
        Err(MapError::IdSpaceExhausted(bl_type))
    }

    /// Register an object. It is not placed on its map until [`addblock`](Self::addblock).
    pub fn insert(&mut self, block: Block) -> Result<BlockId, MapError> {
        let id = block.bl().id;
        if self.objects.contains_key(&id) {
            return Err(MapError::DuplicateId(id));
        }
        if let Block::Pc(sd) = &block {
            self.charids.insert(sd.char_id, id);
        }
        self.objects.insert(id, block);
        Ok(id)
    }

    /// Unlink from the map and drop the object from the index.
    pub fn remove(&mut self, id: BlockId) -> Option<Block> {
        self.delblock(id);
        let block = self.objects.remove(&id)?;
        if let Block::Pc(sd) = &block {
            self.charids.remove(&sd.char_id);
        }
        Some(block)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.objects.get_mut(&id)
    }

    pub fn id2bl(&self, id: BlockId) -> Option<&BlockList> {
        self.objects.get(&id).map(Block::bl)
    }

    pub fn mob(&self, id: BlockId) -> Option<&MobData> {
        match self.objects.get(&id) {
            Some(Block::Mob(md)) => Some(md),
            _ => None,
        }
    }

    pub fn mob_mut(&mut self, id: BlockId) -> Option<&mut MobData> {
        match self.objects.get_mut(&id) {
            Some(Block::Mob(md)) => Some(md),
            _ => None,
        }
    }

    pub fn pc(&self, id: BlockId) -> Option<&PlayerData> {
        match self.objects.get(&id) {
            Some(Block::Pc(sd)) => Some(sd),
            _ => None,
        }
    }

    pub fn pc_mut(&mut self, id: BlockId) -> Option<&mut PlayerData> {
        match self.objects.get_mut(&id) {
            Some(Block::Pc(sd)) => Some(sd),
            _ => None,
        }
    }

    pub fn npc(&self, id: BlockId) -> Option<&NpcData> {
        match self.objects.get(&id) {
            Some(Block::Npc(nd)) => Some(nd),
            _ => None,
        }
    }

    pub fn item(&self, id: BlockId) -> Option<&FloorItem> {
        match self.objects.get(&id) {
            Some(Block::Item(fi)) => Some(fi),
            _ => None,
        }
    }

    pub fn item_mut(&mut self, id: BlockId) -> Option<&mut FloorItem> {
        match self.objects.get_mut(&id) {
            Some(Block::Item(fi)) => Some(fi),
            _ => None,
        }
    }

    pub fn charid2sd(&self, char_id: u32) -> Option<&PlayerData> {
        self.charids.get(&char_id).and_then(|id| self.pc(*id))
    }

    // ─── Spatial index ──────────────────────────────────────────────────────

    /// Link an object into the blocks of the map its header names.
    pub fn addblock(&mut self, id: BlockId) -> Result<(), MapError> {
        let bl = *self.id2bl(id).ok_or(MapError::UnknownBlock(id))?;
        if bl.on_map {
            tracing::warn!("[map] addblock: {id} already on map {}", bl.m);
            return Ok(());
        }
        let grid = self.maps.get_mut(bl.m as usize).ok_or(MapError::UnknownMap(bl.m))?;
        if !grid.in_bounds(bl.x, bl.y) {
            return Err(MapError::OutOfBounds { m: bl.m, x: bl.x, y: bl.y });
        }
        let b = grid.block_index(bl.x, bl.y);
        grid.blocks[b].push(id);
        if bl.bl_type == BlType::PC {
            grid.users += 1;
        }
        if bl.bl_type == BlType::NPC {
            grid.mark_npc(bl.x, bl.y, true);
        }
        if let Some(block) = self.objects.get_mut(&id) {
            block.bl_mut().on_map = true;
        }
        Ok(())
    }

    /// Unlink an object from its map. No-op when it is not on a map.
    pub fn delblock(&mut self, id: BlockId) -> bool {
        let Some(block) = self.objects.get_mut(&id) else {
            return false;
        };
        let bl = block.bl_mut();
        if !bl.on_map {
            return false;
        }
        bl.on_map = false;
        let bl = *bl;
        let Some(grid) = self.maps.get_mut(bl.m as usize) else {
            return false;
        };
        let b = grid.block_index(bl.x, bl.y);
        if let Some(pos) = grid.blocks[b].iter().position(|e| *e == id) {
            grid.blocks[b].swap_remove(pos);
        }
        if bl.bl_type == BlType::PC {
            grid.users -= 1;
        }
        if bl.bl_type == BlType::NPC {
            grid.mark_npc(bl.x, bl.y, false);
        }
        true
    }

    /// Move an on-map object to `(x, y)` on its current map.
    pub fn moveblock(&mut self, id: BlockId, x: i32, y: i32) -> Result<(), MapError> {
        let bl = *self.id2bl(id).ok_or(MapError::UnknownBlock(id))?;
        let grid = self.maps.get_mut(bl.m as usize).ok_or(MapError::UnknownMap(bl.m))?;
        if !grid.in_bounds(x, y) {
            return Err(MapError::OutOfBounds { m: bl.m, x, y });
        }
        if bl.on_map {
            let from = grid.block_index(bl.x, bl.y);
            let to = grid.block_index(x, y);
            if from != to {
                if let Some(pos) = grid.blocks[from].iter().position(|e| *e == id) {
                    grid.blocks[from].swap_remove(pos);
                }
                grid.blocks[to].push(id);
            }
        }
        if let Some(block) = self.objects.get_mut(&id) {
            let b = block.bl_mut();
            b.x = x;
            b.y = y;
        }
        Ok(())
    }

    /// Set map and position of an object that is not on a map.
    pub fn place(&mut self, id: BlockId, m: MapId, x: i32, y: i32) -> Result<(), MapError> {
        let block = self.objects.get_mut(&id).ok_or(MapError::UnknownBlock(id))?;
        let bl = block.bl_mut();
        debug_assert!(!bl.on_map);
        bl.m = m;
        bl.x = x;
        bl.y = y;
        Ok(())
    }

    /// Ids of on-map objects matching `mask` inside the rectangle, corners inclusive.
    pub fn ids_in_area(&self, m: MapId, x0: i32, y0: i32, x1: i32, y1: i32, mask: BlType) -> Vec<BlockId> {
        let mut out = Vec::new();
        let Some(grid) = self.map(m) else {
            return out;
        };
        let (x0, x1) = (x0.min(x1).max(0), x0.max(x1).min(grid.xs - 1));
        let (y0, y1) = (y0.min(y1).max(0), y0.max(y1).min(grid.ys - 1));
        if x0 > x1 || y0 > y1 {
            return out;
        }
        for by in (y0 / BLOCK_SIZE)..=(y1 / BLOCK_SIZE) {
            for bx in (x0 / BLOCK_SIZE)..=(x1 / BLOCK_SIZE) {
                for id in &grid.blocks[(bx + by * grid.bxs) as usize] {
                    if let Some(bl) = self.id2bl(*id) {
                        if mask.intersects(bl.bl_type)
                            && bl.x >= x0
                            && bl.x <= x1
                            && bl.y >= y0
                            && bl.y <= y1
                        {
                            out.push(*id);
                        }
                    }
                }
            }
        }
        out
    }

    /// Ids within `range` cells (square area) of `center`.
    pub fn ids_in_range(&self, center: &BlockList, range: i32, mask: BlType) -> Vec<BlockId> {
        self.ids_in_area(
            center.m,
            center.x - range,
            center.y - range,
            center.x + range,
            center.y + range,
            mask,
        )
    }

    pub fn ids_in_map(&self, m: MapId, mask: BlType) -> Vec<BlockId> {
        match self.map(m) {
            Some(grid) => self.ids_in_area(m, 0, 0, grid.xs - 1, grid.ys - 1, mask),
            None => Vec::new(),
        }
    }

    /// All registered player ids.
    pub fn players(&self) -> Vec<BlockId> {
        self.ids_of(BlType::PC)
    }

    /// All registered mob ids, on a map or not.
    pub fn mobs(&self) -> Vec<BlockId> {
        self.ids_of(BlType::MOB)
    }

    fn ids_of(&self, t: BlType) -> Vec<BlockId> {
        let mut ids: Vec<_> = self
            .objects
            .iter()
            .filter(|(_, b)| b.bl().bl_type == t)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Pick a random walkable cell around `(cx, cy)` (or anywhere on the map when
    /// `rx`/`ry` are negative). `src` is the walker for [`FreeCell::REACHABLE`].
    #[allow(clippy::too_many_arguments)]
    pub fn search_freecell(
        &self,
        src: Option<&BlockList>,
        m: MapId,
        cx: i32,
        cy: i32,
        rx: i32,
        ry: i32,
        flags: FreeCell,
        rng: &mut dyn RandomSource,
        battle: &BattleConfig,
    ) -> Option<(i32, i32)> {
        let grid = self.map(m)?;
        if rx == 0 && ry == 0 {
            return grid.getcell(cx, cy, CellCheck::Reach).then_some((cx, cy));
        }
        let rx2 = 2 * rx + 1;
        let ry2 = 2 * ry + 1;
        let mut tries = if rx >= 0 && ry >= 0 {
            (rx2 * ry2).min(100)
        } else {
            (grid.xs * grid.ys).min(500)
        };
        let mut spawn = 0u32;
        while tries > 0 {
            tries -= 1;
            let x = if rx >= 0 {
                (rng.rnd() % rx2 as u32) as i32 - rx + cx
            } else {
                (rng.rnd() % (grid.xs - 2).max(1) as u32) as i32 + 1
            };
            let y = if ry >= 0 {
                (rng.rnd() % ry2 as u32) as i32 - ry + cy
            } else {
                (rng.rnd() % (grid.ys - 2).max(1) as u32) as i32 + 1
            };
            if x == cx && y == cy {
                continue;
            }
            if !grid.getcell(x, y, CellCheck::Reach) {
                continue;
            }
            if flags.contains(FreeCell::REACHABLE) {
                if let Some(src) = src {
                    if path::search(grid, src.x, src.y, x, y, 1, CellCheck::NoReach).is_none() {
                        continue;
                    }
                }
            }
            if flags.contains(FreeCell::AVOID_PLAYERS) {
                if spawn >= 100 {
                    return None;
                }
                let area = battle.area_size;
                let crowded = spawn < battle.no_spawn_on_player
                    && !self.ids_in_area(m, x - area, y - area, x + area, y + area, BlType::PC).is_empty();
                spawn += 1;
                if crowded {
                    continue;
                }
            }
            return Some((x, y));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::hooks::ScriptedRandom;
    use crate::game::npc::NpcData;

    fn directory() -> EntityDirectory {
        let mut dir = EntityDirectory::new();
        dir.add_map(MapGrid::open("prontera", 40, 40));
        dir
    }

    fn add_player(dir: &mut EntityDirectory, id: BlockId, x: i32, y: i32) {
        let mut sd = PlayerData::new(id, id + 100, "tester");
        sd.bl.x = x;
        sd.bl.y = y;
        dir.insert(Block::Pc(Box::new(sd))).unwrap();
        dir.addblock(id).unwrap();
    }

    #[test]
    fn test_mapname_lookup() {
        let mut dir = directory();
        let m = dir.add_map(MapGrid::open("geffen", 10, 10));
        assert_eq!(dir.mapname2mapid("geffen"), Some(m));
        assert_eq!(dir.mapname2mapid("payon"), None);
        assert_eq!(dir.map(m).unwrap().index, m);
    }

    #[test]
    fn test_addblock_counts_users() {
        let mut dir = directory();
        add_player(&mut dir, 5, 3, 3);
        assert_eq!(dir.users(0), 1);
        assert_eq!(dir.charid2sd(105).unwrap().bl.id, 5);
        assert!(dir.delblock(5));
        assert!(!dir.delblock(5));
        assert_eq!(dir.users(0), 0);
        dir.remove(5);
        assert!(dir.charid2sd(105).is_none());
    }

    #[test]
    fn test_range_query_follows_moves() {
        let mut dir = directory();
        add_player(&mut dir, 1, 2, 2);
        add_player(&mut dir, 2, 30, 30);
        let origin = BlockList { m: 0, x: 0, y: 0, ..BlockList::new(0, BlType::MOB) };
        assert_eq!(dir.ids_in_range(&origin, 5, BlType::PC), vec![1]);

        dir.moveblock(2, 4, 4).unwrap();
        let mut found = dir.ids_in_range(&origin, 5, BlType::PC);
        found.sort();
        assert_eq!(found, vec![1, 2]);
        assert!(dir.ids_in_range(&origin, 5, BlType::MOB).is_empty());
        assert_eq!(dir.moveblock(2, 99, 0), Err(MapError::OutOfBounds { m: 0, x: 99, y: 0 }));
    }

    #[test]
    fn test_npc_marks_cell() {
        let mut dir = directory();
        let id = dir.alloc_id(BlType::NPC).unwrap();
        let mut nd = NpcData::warp(id, "gate", 1, 10, 10);
        nd.bl.x = 6;
        nd.bl.y = 7;
        dir.insert(Block::Npc(Box::new(nd))).unwrap();
        dir.addblock(id).unwrap();
        assert!(dir.getcell(0, 6, 7, CellCheck::Npc));
        dir.remove(id);
        assert!(!dir.getcell(0, 6, 7, CellCheck::Npc));
    }

    #[test]
    fn test_id_allocation_wraps_and_exhausts() {
        let mut dir = directory();
        dir.limit_ids(BlType::NPC, 100, 102);
        let mut taken = Vec::new();
        for _ in 0..3 {
            let id = dir.alloc_id(BlType::NPC).unwrap();
            dir.insert(Block::Npc(Box::new(NpcData::warp(id, "w", 0, 1, 1)))).unwrap();
            taken.push(id);
        }
        assert_eq!(taken, vec![100, 101, 102]);
        assert_eq!(dir.alloc_id(BlType::NPC), Err(MapError::IdSpaceExhausted(BlType::NPC)));

        dir.remove(101);
        assert_eq!(dir.alloc_id(BlType::NPC), Ok(101));
    }

    #[test]
    fn test_unknown_map_and_block() {
        let mut dir = directory();
        assert_eq!(dir.addblock(77), Err(MapError::UnknownBlock(77)));
        assert!(dir.ids_in_map(9, BlType::ALL).is_empty());
        assert!(dir.getcell(9, 0, 0, CellCheck::NoPass));
    }

    #[test]
    fn test_search_freecell_avoids_walls() {
        let mut dir = directory();
        if let Some(grid) = dir.map_mut(0) {
            for x in 0..40 {
                for y in 0..40 {
                    grid.set_walkable(x, y, x == 12 && y == 11);
                }
            }
        }
        // Draws are consumed as (x, y) pairs: (2, 1) lands on (12, 11).
        let mut rng = ScriptedRandom::cycle(vec![2, 1]);
        let battle = BattleConfig::default();
        let found = dir.search_freecell(None, 0, 11, 11, 1, 1, FreeCell::empty(), &mut rng, &battle);
        assert_eq!(found, Some((12, 11)));

        let none = dir.search_freecell(None, 0, 30, 30, 1, 1, FreeCell::empty(), &mut rng, &battle);
        assert_eq!(none, None);
    }
}
