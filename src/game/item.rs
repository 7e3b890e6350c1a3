//! Floor items: drops lying on a cell until picked up, looted or expired.

use crate::game::hooks::ClearType;
use crate::game::map::{Block, CellCheck};
use crate::game::types::{BlType, BlockId, BlockList, MapId};
use crate::game::world::{MapWorld, TimerData, TimerFunc};
use crate::timer::{add_tick, Tick, TimerId};

/// Pickup priority windows (ms) for the first, second and third owner.
const FIRST_GET_TIME: [i32; 3] = [3000, 1000, 1000];
const MVP_FIRST_GET_TIME: [i32; 3] = [10000, 10000, 2000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemStack {
    pub nameid: u32,
    pub amount: u32,
}

impl ItemStack {
    pub fn new(nameid: u32, amount: u32) -> Self {
        ItemStack { nameid, amount }
    }
}

#[derive(Debug, Clone)]
pub struct FloorItem {
    pub bl: BlockList,
    pub item: ItemStack,
    /// Char ids with pickup priority, best first. 0 = nobody.
    pub first_get_charid: [u32; 3],
    pub first_get_tick: [Tick; 3],
    pub cleartimer: Option<TimerId>,
}

/// Items waiting to hit the floor after a kill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemDropList {
    pub m: MapId,
    pub x: i32,
    pub y: i32,
    pub owners: [u32; 3],
    pub items: Vec<ItemStack>,
}

/// Random walkable cell around `(x, y)` that holds no other floor item.
fn searchrandfreecell(world: &mut MapWorld, m: MapId, x: i32, y: i32, range: i32) -> Option<(i32, i32)> {
    let mut free = Vec::new();
    for dy in -range..=range {
        for dx in -range..=range {
            let (cx, cy) = (x + dx, y + dy);
            if world.map.getcell(m, cx, cy, CellCheck::NoReach) {
                continue;
            }
            if !world.map.ids_in_area(m, cx, cy, cx, cy, BlType::ITEM).is_empty() {
                continue;
            }
            free.push((cx, cy));
        }
    }
    if free.is_empty() {
        return None;
    }
    let pick = world.rnd() as usize % free.len();
    Some(free[pick])
}

/// Drop `item` near `(x, y)`. `owners` are char ids with pickup priority;
/// `mvp` selects the longer priority windows.
pub fn addflooritem(
    world: &mut MapWorld,
    item: ItemStack,
    m: MapId,
    x: i32,
    y: i32,
    owners: [u32; 3],
    mvp: bool,
) -> Option<BlockId> {
    if item.amount == 0 {
        return None;
    }
    let Some((x, y)) = searchrandfreecell(world, m, x, y, 1) else {
        tracing::debug!("[map] addflooritem: no free cell around ({x},{y}) on map {m}");
        return None;
    };
    let id = match world.map.alloc_id(BlType::ITEM) {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("[map] addflooritem: {e}");
            return None;
        }
    };

    let tick = world.gettick();
    let windows = if mvp { MVP_FIRST_GET_TIME } else { FIRST_GET_TIME };
    let mut first_get_tick = [0; 3];
    let mut at = tick;
    for (slot, window) in first_get_tick.iter_mut().zip(windows) {
        at = add_tick(at, window);
        *slot = at;
    }

    let mut fi = FloorItem {
        bl: BlockList { m, x, y, ..BlockList::new(id, BlType::ITEM) },
        item,
        first_get_charid: owners,
        first_get_tick,
        cleartimer: None,
    };
    let lifetime = world.battle.flooritem_lifetime;
    fi.cleartimer = Some(world.timers.add_timer(
        add_tick(tick, lifetime),
        TimerFunc::ClearFloorItem,
        id,
        TimerData::None,
    ));
    world.notify.notify_floor_item(&fi);

    if let Err(e) = world.map.insert(Block::Item(Box::new(fi))).and_then(|_| world.map.addblock(id)) {
        tracing::error!("[map] addflooritem: {e}");
        return None;
    }
    Some(id)
}

/// Take an item off the floor.
pub fn clearflooritem(world: &mut MapWorld, id: BlockId) {
    let Some(fi) = world.map.item_mut(id) else {
        return;
    };
    let bl = fi.bl;
    if let Some(tid) = fi.cleartimer.take() {
        let _ = world.timers.delete_timer(tid, TimerFunc::ClearFloorItem);
    }
    world.notify.notify_clear_unit(&bl, ClearType::OutSight);
    world.map.remove(id);
}

pub fn clearflooritem_timer(world: &mut MapWorld, tid: TimerId, id: BlockId) {
    let Some(fi) = world.map.item_mut(id) else {
        tracing::error!("[map] clearflooritem_timer: {id} is not a floor item");
        return;
    };
    if fi.cleartimer != Some(tid) {
        tracing::error!("[map] clearflooritem_timer: timer mismatch {:?} != {tid}", fi.cleartimer);
        return;
    }
    fi.cleartimer = None;
    clearflooritem(world, id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::MapGrid;
    use crate::game::world::MapWorldBuilder;
    use crate::timer::ManualClock;

    fn world() -> (MapWorld, ManualClock) {
        let clock = ManualClock::new(1000);
        let mut world = MapWorldBuilder::new().clock(clock.clone()).build();
        world.map.add_map(MapGrid::open("drop", 10, 10));
        (world, clock)
    }

    #[test]
    fn test_items_do_not_stack_on_a_cell() {
        let (mut world, _) = world();
        let mut cells = Vec::new();
        for _ in 0..9 {
            let id = addflooritem(&mut world, ItemStack::new(501, 1), 0, 5, 5, [0; 3], false).unwrap();
            let bl = world.map.item(id).unwrap().bl;
            assert!(!cells.contains(&(bl.x, bl.y)));
            cells.push((bl.x, bl.y));
        }
        assert!(addflooritem(&mut world, ItemStack::new(501, 1), 0, 5, 5, [0; 3], false).is_none());
    }

    #[test]
    fn test_owner_windows() {
        let (mut world, _) = world();
        let id = addflooritem(&mut world, ItemStack::new(607, 1), 0, 2, 2, [7, 8, 0], true).unwrap();
        let fi = world.map.item(id).unwrap();
        assert_eq!(fi.first_get_charid, [7, 8, 0]);
        assert_eq!(fi.first_get_tick, [11000, 21000, 23000]);
        assert!(addflooritem(&mut world, ItemStack::new(607, 0), 0, 2, 2, [0; 3], false).is_none());
    }

    #[test]
    fn test_expires_after_lifetime() {
        let (mut world, clock) = world();
        let id = addflooritem(&mut world, ItemStack::new(501, 2), 0, 3, 3, [0; 3], false).unwrap();
        clock.advance(world.battle.flooritem_lifetime as u32 - 1);
        world.pump();
        assert!(world.map.item(id).is_some());
        clock.advance(1);
        world.pump();
        assert!(world.map.item(id).is_none());
        assert_eq!(world.timers.active(), 0);
    }

    #[test]
    fn test_clear_cancels_timer() {
        let (mut world, _) = world();
        let id = addflooritem(&mut world, ItemStack::new(501, 1), 0, 3, 3, [0; 3], false).unwrap();
        clearflooritem(&mut world, id);
        assert!(world.map.item(id).is_none());
        assert_eq!(world.timers.active(), 0);
    }
}
