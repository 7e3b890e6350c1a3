//! Castle guardians.
//!
//! A castle owns [`MAX_GUARDIANS`] permanent guardian slots plus any number
//! of temporary guardians (the emperium, script-summoned guards). The
//! owning guild is looked up through [`GuildRegistry`]; when it is not
//! known yet the lookup is retried by a [`TimerFunc::MobSpawnGuardian`]
//! timer.
//!
//! [`GuildRegistry`]: crate::game::hooks::GuildRegistry

use serde::Deserialize;

use crate::game::hooks::ClearType;
use crate::game::map::FreeCell;
use crate::game::mob::spawn::{self, SpawnData, SpawnError};
use crate::game::mob::{GuardianData, MAX_GUARDIANS};
use crate::game::types::{BlockId, MapId};
use crate::game::unit;
use crate::game::world::{MapWorld, TimerData, TimerFunc};
use crate::timer::add_tick;

pub const MOBID_EMPERIUM: u32 = 1288;

/// Delay before retrying an unresolved guild (ms).
const GUILD_RETRY_DELAY: i32 = 5000;

/// Castle data index of the owning guild.
const CASTLE_DATA_GUILD: usize = 1;
/// Castle data index of the first guardian's visibility flag.
const CASTLE_DATA_GUARDIAN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuardianSlot {
    /// 0 = nobody in the slot.
    pub id: BlockId,
    pub visible: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Castle {
    pub castle_id: u32,
    pub name: String,
    pub map: String,
    #[serde(default)]
    pub guild_id: u32,
    #[serde(default)]
    pub defense: i32,
    #[serde(skip)]
    pub guardians: [GuardianSlot; MAX_GUARDIANS],
    #[serde(skip)]
    pub temp_guardians: Vec<BlockId>,
}

impl Castle {
    pub fn new(castle_id: u32, name: &str, map: &str) -> Self {
        Castle {
            castle_id,
            name: name.to_string(),
            map: map.to_string(),
            guild_id: 0,
            defense: 0,
            guardians: [GuardianSlot::default(); MAX_GUARDIANS],
            temp_guardians: Vec::new(),
        }
    }
}

/// Index of the castle sitting on map `m`.
pub fn castle_on_map(world: &MapWorld, m: MapId) -> Option<usize> {
    let name = &world.map.map(m)?.name;
    world.castles.iter().position(|c| &c.map == name)
}

/// Make a freshly built emperium a temporary guardian of the castle it
/// stands in. Does nothing outside castles.
pub fn attach_emperium(world: &mut MapWorld, id: BlockId) {
    let Some(m) = world.map.mob(id).map(|md| md.bl.m) else {
        return;
    };
    let Some(castle) = castle_on_map(world, m) else {
        tracing::debug!("[guardian] emperium {id} outside any castle");
        return;
    };
    let guild_id = world.castles[castle].guild_id;
    let guardup_lv = if guild_id != 0 && world.guilds.guild_exists(guild_id) {
        world.guilds.guard_up(guild_id)
    } else {
        0
    };
    if let Some(md) = world.map.mob_mut(id) {
        md.guardian = Some(GuardianData { castle, number: None, guild_id, guardup_lv });
    }
    world.castles[castle].temp_guardians.push(id);
    if guild_id != 0 && !world.guilds.guild_exists(guild_id) {
        retry_guild(world, id, guild_id);
    }
}

fn retry_guild(world: &mut MapWorld, id: BlockId, guild_id: u32) {
    let tick = world.gettick();
    world.timers.add_timer(
        add_tick(tick, GUILD_RETRY_DELAY),
        TimerFunc::MobSpawnGuardian,
        id,
        TimerData::Guild(guild_id),
    );
}

/// Castle defense and guild skill bonuses on top of the template status.
fn apply_bonuses(world: &mut MapWorld, id: BlockId) {
    let Some(gd) = world.map.mob(id).and_then(|md| md.guardian) else {
        return;
    };
    let defense = world.castles.get(gd.castle).map_or(0, |c| c.defense);
    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    if gd.number.is_some() && defense > 0 {
        md.status.max_hp = md.status.max_hp.saturating_add(2000 * defense);
        md.status.hp = md.status.max_hp;
    }
    if gd.guardup_lv > 0 {
        let rate = (1000 - 100 * gd.guardup_lv).max(100);
        md.status.adelay = md.status.adelay * rate / 1000;
        md.status.amotion = md.status.amotion * rate / 1000;
    }
}

/// Spawn a guardian of `class_` in the castle on `map`.
///
/// With `index` it fills that permanent slot, refusing if a guardian of the
/// slot is still alive; without it the guardian is temporary. `x`/`y` of 0
/// pick a random free cell.
#[allow(clippy::too_many_arguments)]
pub fn spawn_guardian(
    world: &mut MapWorld,
    map: &str,
    x: i32,
    y: i32,
    name: &str,
    class_: u32,
    event: &str,
    index: Option<usize>,
) -> Result<BlockId, SpawnError> {
    let m = world.map.mapname2mapid(map).ok_or_else(|| SpawnError::UnknownMap(map.to_string()))?;
    if let Some(n) = index.filter(|n| *n >= MAX_GUARDIANS) {
        return Err(SpawnError::InvalidGuardianIndex(n));
    }
    let (x, y) = if x <= 0 || y <= 0 {
        world
            .search_freecell(None, m, x, y, -1, -1, FreeCell::AVOID_PLAYERS)
            .ok_or(SpawnError::NoFreeCell { class_, m })?
    } else {
        (x, y)
    };

    let mut data = SpawnData::single(m, x, y, class_);
    data.name = name.to_string();
    data.event = event.to_string();
    spawn::parse_dataset(world, &mut data)?;

    let castle = castle_on_map(world, m).ok_or_else(|| SpawnError::NotACastle(map.to_string()))?;
    let guild_id = world.castles[castle].guild_id;
    if guild_id == 0 {
        tracing::warn!("[guardian] spawning guardian {class_} on castle {} with no guild", map);
    }
    if let Some(n) = index {
        let taken = world.castles[castle].guardians[n].id;
        let alive = taken != 0
            && world
                .map
                .mob(taken)
                .and_then(|md| md.guardian)
                .is_some_and(|gd| gd.number == Some(n));
        if alive {
            return Err(SpawnError::SlotTaken { castle: map.to_string(), index: n });
        }
    }

    let id = spawn::spawn_dataset(world, &data, None)?;
    let guild_known = guild_id != 0 && world.guilds.guild_exists(guild_id);
    let guardup_lv = if guild_known { world.guilds.guard_up(guild_id) } else { 0 };
    if let Some(md) = world.map.mob_mut(id) {
        md.guardian = Some(GuardianData { castle, number: index, guild_id, guardup_lv });
    }
    match index {
        Some(n) => {
            let slot = &mut world.castles[castle].guardians[n];
            slot.id = id;
            slot.visible = true;
        }
        None => world.castles[castle].temp_guardians.push(id),
    }
    if guild_id != 0 && !guild_known {
        retry_guild(world, id, guild_id);
    }

    spawn::mob_spawn(world, id);
    apply_bonuses(world, id);
    tracing::debug!("[guardian] {} spawned {id} (class {class_}) slot {:?}", world.castles[castle].name, index);
    Ok(id)
}

/// Deferred guild lookup for guardian `id`.
///
/// If the guild still does not exist the castle is liberated: an emperium
/// forgets its owner, any other guardian is removed.
pub fn spawn_guardian_sub(world: &mut MapWorld, id: BlockId, guild_id: u32) {
    let Some((gd, class_)) = world.map.mob(id).and_then(|md| md.guardian.map(|gd| (gd, md.class_))) else {
        return;
    };
    if !world.guilds.guild_exists(guild_id) {
        if class_ == MOBID_EMPERIUM {
            if let Some(castle) = world.castles.get_mut(gd.castle) {
                let castle_id = castle.castle_id;
                castle.guild_id = 0;
                world.guilds.castle_data_save(castle_id, CASTLE_DATA_GUILD, 0);
            }
            if let Some(g) = world.map.mob_mut(id).and_then(|md| md.guardian.as_mut()) {
                g.guild_id = 0;
                g.guardup_lv = 0;
            }
            tracing::info!("[guardian] guild {guild_id} gone, castle of emperium {id} liberated");
        } else {
            guardian_lost(world, &gd);
            unit::unit_free(world, id, ClearType::OutSight);
        }
        return;
    }
    let guardup_lv = world.guilds.guard_up(guild_id);
    if let Some(g) = world.map.mob_mut(id).and_then(|md| md.guardian.as_mut()) {
        g.guild_id = guild_id;
        g.guardup_lv = guardup_lv;
    }
    if guardup_lv > 0 {
        apply_bonuses(world, id);
    }
}

/// Re-read the castle owner for guardian `id` after the castle changed
/// hands. False when the guardian was removed or lost its guild.
pub fn guardian_guildchange(world: &mut MapWorld, id: BlockId) -> bool {
    let Some((gd, class_)) = world.map.mob(id).and_then(|md| md.guardian.map(|gd| (gd, md.class_))) else {
        return false;
    };
    let Some(guild_id) = world.castles.get(gd.castle).map(|c| c.guild_id) else {
        return false;
    };

    if guild_id == 0 {
        if class_ == MOBID_EMPERIUM {
            if let Some(g) = world.map.mob_mut(id).and_then(|md| md.guardian.as_mut()) {
                g.guild_id = 0;
                g.guardup_lv = 0;
            }
        } else {
            if gd.number.is_some_and(|n| world.castles[gd.castle].guardians[n].visible) {
                guardian_lost(world, &gd);
            }
            unit::unit_free(world, id, ClearType::OutSight);
        }
        return false;
    }

    if !world.guilds.guild_exists(guild_id) {
        tracing::error!("[guardian] castle {} owned by unknown guild {guild_id}", world.castles[gd.castle].name);
        if gd.number.is_some() {
            guardian_lost(world, &gd);
        }
        unit::unit_free(world, id, ClearType::OutSight);
        return false;
    }

    let guardup_lv = world.guilds.guard_up(guild_id);
    if let Some(g) = world.map.mob_mut(id).and_then(|md| md.guardian.as_mut()) {
        g.guild_id = guild_id;
        g.guardup_lv = guardup_lv;
    }
    true
}

/// Hand castle `castle` to `guild_id` (0 = nobody) and update every
/// guardian of it. Returns how many guardians kept their post.
pub fn change_castle_owner(world: &mut MapWorld, castle: usize, guild_id: u32) -> usize {
    let Some(c) = world.castles.get_mut(castle) else {
        return 0;
    };
    c.guild_id = guild_id;
    let castle_id = c.castle_id;
    world.guilds.castle_data_save(castle_id, CASTLE_DATA_GUILD, guild_id as i32);

    let ids: Vec<BlockId> = world
        .map
        .mobs()
        .into_iter()
        .filter(|id| world.map.mob(*id).and_then(|md| md.guardian).is_some_and(|gd| gd.castle == castle))
        .collect();
    ids.into_iter().filter(|id| guardian_guildchange(world, *id)).count()
}

/// A permanent guardian is gone: mark its slot invisible and persist it.
pub fn guardian_lost(world: &mut MapWorld, gd: &GuardianData) {
    let Some(n) = gd.number else {
        return;
    };
    let Some(castle) = world.castles.get_mut(gd.castle) else {
        return;
    };
    castle.guardians[n].visible = false;
    let castle_id = castle.castle_id;
    world.guilds.castle_data_save(castle_id, CASTLE_DATA_GUARDIAN + n, 0);
}

/// Drop `id` from its castle's slot tables.
pub fn release_slot(world: &mut MapWorld, gd: &GuardianData, id: BlockId) {
    let Some(castle) = world.castles.get_mut(gd.castle) else {
        return;
    };
    match gd.number {
        Some(n) if n < MAX_GUARDIANS => {
            if castle.guardians[n].id == id {
                castle.guardians[n].id = 0;
            }
        }
        _ => castle.temp_guardians.retain(|g| *g != id),
    }
}
