//! Grid pathfinding.
//!
//! A* over the 8-neighbourhood with diagonal moves costing more than straight
//! ones and no corner cutting. Paths are a list of step directions capped at
//! [`MAX_WALKPATH`].

use std::collections::HashMap;

use crate::game::map::{CellCheck, MapGrid};
use crate::game::types::{dir_is_diagonal, DIRX, DIRY};
use crate::timer::heap::{HeapKey, MinHeap};

pub const MOVE_COST: i32 = 10;
pub const MOVE_DIAGONAL_COST: i32 = 14;
pub const MAX_WALKPATH: usize = 32;

/// Route of a walking unit and how far along it the unit is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkPath {
    pub path: Vec<u8>,
    pub path_pos: usize,
}

impl WalkPath {
    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    pub fn clear(&mut self) {
        self.path.clear();
        self.path_pos = 0;
    }

    /// Direction of the next step, if any remain.
    pub fn next_dir(&self) -> Option<u8> {
        self.path.get(self.path_pos).copied()
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    f: i32,
    g: i32,
    x: i32,
    y: i32,
}

impl HeapKey for Node {
    fn heap_less(&self, other: &Self) -> bool {
        self.f < other.f || (self.f == other.f && self.g > other.g)
    }
}

fn heuristic(x0: i32, y0: i32, x1: i32, y1: i32) -> i32 {
    MOVE_COST * ((x1 - x0).abs() + (y1 - y0).abs())
}

fn blocked(grid: &MapGrid, x: i32, y: i32, cell: CellCheck) -> bool {
    grid.getcell(x, y, cell)
}

/// Whether stepping `dir` from `(x, y)` is allowed.
fn can_step(grid: &MapGrid, x: i32, y: i32, dir: u8, cell: CellCheck) -> bool {
    let dx = DIRX[dir as usize];
    let dy = DIRY[dir as usize];
    if blocked(grid, x + dx, y + dy, cell) {
        return false;
    }
    if dir_is_diagonal(dir) && (blocked(grid, x + dx, y, cell) || blocked(grid, x, y + dy, cell)) {
        return false;
    }
    true
}

/// Find a path from `(x0, y0)` to `(x1, y1)`.
///
/// `flag & 1` asks for a straight-line path only. `cell` is the check that
/// marks a cell as impassable (`NoPass` or `NoReach`). Returns the list of
/// step directions; an empty list when start and goal coincide.
pub fn search(grid: &MapGrid, x0: i32, y0: i32, x1: i32, y1: i32, flag: i32, cell: CellCheck) -> Option<Vec<u8>> {
    if !grid.in_bounds(x0, y0) || blocked(grid, x1, y1, cell) {
        return None;
    }
    if x0 == x1 && y0 == y1 {
        return Some(Vec::new());
    }

    if flag & 1 != 0 {
        return easy_path(grid, x0, y0, x1, y1, cell);
    }

    let limit = MAX_WALKPATH as i32;
    if (x1 - x0).abs() > limit || (y1 - y0).abs() > limit {
        return None;
    }

    let mut open = MinHeap::with_capacity(64);
    // (x, y) -> (best g, parent dir that led here)
    let mut seen: HashMap<(i32, i32), (i32, Option<u8>, bool)> = HashMap::new();
    open.push(Node { f: heuristic(x0, y0, x1, y1), g: 0, x: x0, y: y0 });
    seen.insert((x0, y0), (0, None, false));

    while let Some(node) = open.pop() {
        let Some(entry) = seen.get_mut(&(node.x, node.y)) else {
            continue;
        };
        if entry.2 || entry.0 < node.g {
            continue;
        }
        entry.2 = true;
        if node.x == x1 && node.y == y1 {
            return rebuild(&seen, x0, y0, x1, y1);
        }
        for dir in 0..8u8 {
            if !can_step(grid, node.x, node.y, dir, cell) {
                continue;
            }
            let nx = node.x + DIRX[dir as usize];
            let ny = node.y + DIRY[dir as usize];
            if (nx - x0).abs() > limit || (ny - y0).abs() > limit {
                continue;
            }
            let step = if dir_is_diagonal(dir) { MOVE_DIAGONAL_COST } else { MOVE_COST };
            let g = node.g + step;
            match seen.get(&(nx, ny)) {
                Some((best, _, closed)) if *closed || *best <= g => continue,
                _ => {}
            }
            seen.insert((nx, ny), (g, Some(dir), false));
            open.push(Node { f: g + heuristic(nx, ny, x1, y1), g, x: nx, y: ny });
        }
    }
    None
}

fn rebuild(
    seen: &HashMap<(i32, i32), (i32, Option<u8>, bool)>,
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
) -> Option<Vec<u8>> {
    let mut dirs = Vec::new();
    let (mut x, mut y) = (x1, y1);
    while (x, y) != (x0, y0) {
        let dir = seen.get(&(x, y))?.1?;
        dirs.push(dir);
        if dirs.len() > MAX_WALKPATH {
            return None;
        }
        x -= DIRX[dir as usize];
        y -= DIRY[dir as usize];
    }
    dirs.reverse();
    Some(dirs)
}

fn easy_path(grid: &MapGrid, x0: i32, y0: i32, x1: i32, y1: i32, cell: CellCheck) -> Option<Vec<u8>> {
    let mut dirs = Vec::new();
    let (mut x, mut y) = (x0, y0);
    while (x, y) != (x1, y1) {
        if dirs.len() >= MAX_WALKPATH {
            return None;
        }
        let dx = (x1 - x).signum();
        let dy = (y1 - y).signum();
        let dir = (0..8u8).find(|d| DIRX[*d as usize] == dx && DIRY[*d as usize] == dy)?;
        if !can_step(grid, x, y, dir, cell) {
            return None;
        }
        dirs.push(dir);
        x += dx;
        y += dy;
    }
    Some(dirs)
}

/// Cost of a path in move units.
pub fn path_cost(dirs: &[u8]) -> i32 {
    dirs.iter()
        .map(|d| if dir_is_diagonal(*d) { MOVE_DIAGONAL_COST } else { MOVE_COST })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(x: i32, y: i32, dirs: &[u8]) -> (i32, i32) {
        dirs.iter()
            .fold((x, y), |(x, y), d| (x + DIRX[*d as usize], y + DIRY[*d as usize]))
    }

    #[test]
    fn test_straight_and_diagonal() {
        let grid = MapGrid::open("test", 20, 20);
        let dirs = search(&grid, 2, 2, 6, 2, 0, CellCheck::NoPass).unwrap();
        assert_eq!(dirs.len(), 4);
        assert_eq!(walk(2, 2, &dirs), (6, 2));

        let dirs = search(&grid, 2, 2, 5, 5, 0, CellCheck::NoPass).unwrap();
        assert_eq!(dirs, vec![7, 7, 7]);
        assert_eq!(path_cost(&dirs), 3 * MOVE_DIAGONAL_COST);
    }

    #[test]
    fn test_routes_around_wall() {
        let mut grid = MapGrid::open("test", 20, 20);
        for y in 0..8 {
            grid.set_walkable(5, y, false);
        }
        let dirs = search(&grid, 2, 2, 8, 2, 0, CellCheck::NoPass).unwrap();
        assert_eq!(walk(2, 2, &dirs), (8, 2));
        let (mut x, mut y) = (2, 2);
        for d in &dirs {
            x += DIRX[*d as usize];
            y += DIRY[*d as usize];
            assert!(grid.getcell(x, y, CellCheck::Pass), "stepped into wall at ({x},{y})");
        }
        assert!(search(&grid, 2, 2, 8, 2, 1, CellCheck::NoPass).is_none());
    }

    #[test]
    fn test_no_corner_cutting() {
        let mut grid = MapGrid::open("test", 10, 10);
        grid.set_walkable(3, 2, false);
        let dirs = search(&grid, 2, 2, 3, 3, 0, CellCheck::NoPass).unwrap();
        assert_eq!(dirs.len(), 2);
    }

    #[test]
    fn test_unreachable_and_trivial() {
        let mut grid = MapGrid::open("test", 10, 10);
        grid.set_walkable(7, 7, false);
        assert!(search(&grid, 1, 1, 7, 7, 0, CellCheck::NoPass).is_none());
        assert_eq!(search(&grid, 1, 1, 1, 1, 0, CellCheck::NoPass), Some(vec![]));
        let far = MapGrid::open("big", 100, 100);
        assert!(search(&far, 0, 0, 60, 0, 0, CellCheck::NoPass).is_none());
    }

    #[test]
    fn test_walkpath_cursor() {
        let mut wp = WalkPath { path: vec![0, 6], path_pos: 0 };
        assert_eq!(wp.next_dir(), Some(0));
        wp.path_pos = 2;
        assert_eq!(wp.next_dir(), None);
        wp.clear();
        assert!(wp.is_empty());
    }
}
