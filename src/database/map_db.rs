//! Map list, cell files and castles.
//!
//! The map list names every map this server hosts and the `.map` cell file
//! holding its passability. Cell file format:
//! `[xs: u16 BE][ys: u16 BE]` then `xs*ys` × `(tile u16 BE, pass u16 BE, obj u16 BE)`.
//! A non-zero `pass` blocks the cell.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::MySqlPool;

use crate::game::map::{EntityDirectory, MapFlags, MapGrid};
use crate::game::mob::guardian::Castle;

/// Bytes per cell in a `.map` file.
const CELL_BYTES: usize = 6;

/// One hosted map.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MapEntry {
    pub name: String,
    /// Cell file, relative to `maps_dir`.
    pub file: String,
    /// Flag names such as `pvp` or `notomb`.
    #[serde(default)]
    pub flags: Vec<String>,
}

pub fn parse_map_list(contents: &str) -> Result<Vec<MapEntry>> {
    serde_yaml::from_str(contents).context("Failed to parse map list")
}

pub fn load_map_list<P: AsRef<Path>>(path: P) -> Result<Vec<MapEntry>> {
    let path = path.as_ref();
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read map list: {}", path.display()))?;
    parse_map_list(&contents).with_context(|| format!("in {}", path.display()))
}

/// Maps hosted by `server_id` according to the `Maps` table.
pub async fn load_map_list_sql(pool: &MySqlPool, server_id: i32) -> Result<Vec<MapEntry>> {
    #[derive(sqlx::FromRow)]
    struct MapRow {
        map_name: String,
        map_file: String,
        map_pv_p: u32,
        map_tomb: u32,
    }

    let rows: Vec<MapRow> = sqlx::query_as(
        "SELECT MapName AS map_name, MapFile AS map_file, MapPvP AS map_pv_p, MapTomb AS map_tomb
         FROM Maps WHERE MapServer = ? ORDER BY MapId",
    )
    .bind(server_id)
    .fetch_all(pool)
    .await
    .context("Failed to query Maps")?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let mut flags = Vec::new();
            if row.map_pv_p != 0 {
                flags.push("pvp".to_string());
            }
            if row.map_tomb == 0 {
                flags.push("notomb".to_string());
            }
            MapEntry { name: row.map_name, file: row.map_file, flags }
        })
        .collect())
}

/// Parse the flag names of a map entry; unknown names are skipped with a warning.
pub fn map_flags(entry: &MapEntry) -> MapFlags {
    entry.flags.iter().fold(MapFlags::empty(), |acc, name| match MapFlags::from_name(&name.to_ascii_uppercase()) {
        Some(flag) => acc | flag,
        None => {
            tracing::warn!("[map_db] {}: unknown map flag `{name}`", entry.name);
            acc
        }
    })
}

/// Build a grid from the bytes of a `.map` file.
pub fn parse_map_cells(name: &str, data: &[u8]) -> Result<MapGrid> {
    anyhow::ensure!(data.len() >= 4, "map file too short: {name}");
    let xs = u16::from_be_bytes([data[0], data[1]]) as usize;
    let ys = u16::from_be_bytes([data[2], data[3]]) as usize;
    anyhow::ensure!(xs > 0 && ys > 0, "map {name} has an empty size {xs}x{ys}");

    let expected = 4 + xs * ys * CELL_BYTES;
    anyhow::ensure!(
        data.len() >= expected,
        "map file truncated: {name} (got {} bytes, need {expected})",
        data.len()
    );

    let pass: Vec<u16> = data[4..expected]
        .chunks_exact(CELL_BYTES)
        .map(|cell| u16::from_be_bytes([cell[2], cell[3]]))
        .collect();
    Ok(MapGrid::from_pass(name, xs as i32, ys as i32, &pass))
}

pub fn load_map(entry: &MapEntry, maps_dir: &Path) -> Result<MapGrid> {
    let path = maps_dir.join(&entry.file);
    let data = std::fs::read(&path).with_context(|| format!("map file not found: {}", path.display()))?;
    let mut grid = parse_map_cells(&entry.name, &data)?;
    grid.flags = map_flags(entry);
    Ok(grid)
}

/// Load every listed map into `dir`. Maps whose cell file is missing or
/// broken are skipped with a warning. Returns how many were added.
pub fn load_maps(dir: &mut EntityDirectory, entries: &[MapEntry], maps_dir: &Path) -> usize {
    let mut count = 0;
    for entry in entries {
        if dir.mapname2mapid(&entry.name).is_some() {
            tracing::warn!("[map_db] map {} listed twice", entry.name);
            continue;
        }
        match load_map(entry, maps_dir) {
            Ok(grid) => {
                let m = dir.add_map(grid);
                tracing::debug!("[map_db] {} -> {m}", entry.name);
                count += 1;
            }
            Err(e) => tracing::warn!("[map_db] skipping {}: {e:#}", entry.name),
        }
    }
    tracing::info!("[map_db] read done count={count}");
    count
}

pub fn parse_castles(contents: &str) -> Result<Vec<Castle>> {
    serde_yaml::from_str(contents).context("Failed to parse castles")
}

/// Load the castle table. A missing file means no castles.
pub fn load_castles<P: AsRef<Path>>(path: P) -> Result<Vec<Castle>> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::info!("[map_db] no castle file at {}", path.display());
        return Ok(Vec::new());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read castles: {}", path.display()))?;
    parse_castles(&contents).with_context(|| format!("in {}", path.display()))
}
