//! Monster templates.
//!
//! Templates are read once at startup from a YAML file or the `Mobs`,
//! `MobDrops` and `MobSkills` tables, adjusted by the battle drop rates and
//! then shared read-only by every instance through `Arc`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::de::IntoDeserializer;
use serde::{Deserialize, Deserializer};
use sqlx::MySqlPool;

use crate::config::BattleConfig;
use crate::game::mob::skill::MobSkill;
use crate::game::mob::spawn::SpawnData;
use crate::game::mob::{Mode, MAX_MOBSKILL, MAX_MOB_DROP, MAX_MVP_DROP};

/// Item group a drop belongs to; picks the battle rate applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropKind {
    #[default]
    Common,
    Heal,
    Use,
    Equip,
    Card,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DropEntry {
    pub nameid: u32,
    /// Chance out of 10000.
    pub p: i32,
    #[serde(default)]
    pub kind: DropKind,
}

impl DropEntry {
    pub fn new(nameid: u32, p: i32) -> Self {
        DropEntry { nameid, p, kind: DropKind::Common }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MobTemplate {
    pub id: u32,
    pub name: String,
    #[serde(default = "default_level")]
    pub lv: i32,
    pub max_hp: i32,
    #[serde(default)]
    pub base_exp: u32,
    #[serde(default)]
    pub job_exp: u32,
    /// MVP experience; non-zero makes the template an MVP.
    #[serde(default)]
    pub mexp: u32,
    #[serde(default = "default_range")]
    pub range: i32,
    /// Sight range for aggressive search.
    #[serde(default = "default_range2")]
    pub range2: i32,
    /// Chase give-up range.
    #[serde(default = "default_range3")]
    pub range3: i32,
    #[serde(default, deserialize_with = "deserialize_mode")]
    pub mode: Mode,
    #[serde(default = "default_speed")]
    pub speed: i32,
    #[serde(default = "default_adelay")]
    pub adelay: i32,
    #[serde(default)]
    pub amotion: i32,
    #[serde(default)]
    pub dmotion: i32,
    #[serde(default)]
    pub drops: Vec<DropEntry>,
    #[serde(default)]
    pub mvp_drops: Vec<DropEntry>,
    #[serde(default)]
    pub skills: Vec<MobSkill>,
}

fn default_level() -> i32 {
    1
}

fn default_range() -> i32 {
    1
}

fn default_range2() -> i32 {
    10
}

fn default_range3() -> i32 {
    12
}

fn default_speed() -> i32 {
    200
}

fn default_adelay() -> i32 {
    1000
}

// ─── Mode names ─────────────────────────────────────────────────────────────

/// Mode flag for a YAML name such as `can_move` or `aggressive`.
pub fn mode_from_name(name: &str) -> Option<Mode> {
    let mode = match name.to_ascii_lowercase().as_str() {
        "can_move" | "canmove" => Mode::CANMOVE,
        "looter" => Mode::LOOTER,
        "aggressive" => Mode::AGGRESSIVE,
        "assist" => Mode::ASSIST,
        "cast_sensor_idle" => Mode::CASTSENSOR_IDLE,
        "boss" => Mode::BOSS,
        "plant" => Mode::PLANT,
        "can_attack" | "canattack" => Mode::CANATTACK,
        "detector" => Mode::DETECTOR,
        "cast_sensor_chase" => Mode::CASTSENSOR_CHASE,
        "change_chase" => Mode::CHANGECHASE,
        "angry" => Mode::ANGRY,
        "change_target_melee" => Mode::CHANGETARGET_MELEE,
        "change_target_chase" => Mode::CHANGETARGET_CHASE,
        "target_weak" => Mode::TARGETWEAK,
        "no_knockback" => Mode::NOKNOCKBACK,
        _ => return None,
    };
    Some(mode)
}

/// `mode:` is either a raw bitmask or a list of flag names.
fn deserialize_mode<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Mode, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Bits(u32),
        Names(Vec<String>),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Bits(bits) => Ok(Mode::from_bits_truncate(bits)),
        Repr::Names(names) => names.iter().try_fold(Mode::empty(), |acc, name| {
            mode_from_name(name)
                .map(|m| acc | m)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown mode flag `{name}`")))
        }),
    }
}

// ─── Drop rates ─────────────────────────────────────────────────────────────

/// Scale a base drop rate by `rate_adjust` percent and clamp it.
///
/// With `logarithmic_drops` low rates grow faster than high ones:
/// `rate * (5 - log10(rate)) ^ (ln(adjust / 100) / ln(5))`.
pub fn mob_drop_adjust(battle: &BattleConfig, baserate: i32, rate_adjust: u32, rate_min: u32, rate_max: u32) -> i32 {
    let rate = f64::from(baserate);
    let adjusted = if battle.logarithmic_drops && rate_adjust > 0 && rate_adjust != 100 && baserate > 0 {
        rate * (5.0 - rate.log10()).powf((f64::from(rate_adjust) / 100.0).ln() / 5f64.ln()) + 0.5
    } else {
        rate * f64::from(rate_adjust) / 100.0
    };
    adjusted.clamp(f64::from(rate_min), f64::from(rate_max)) as i32
}

fn drop_group(battle: &BattleConfig, kind: DropKind, boss: bool) -> (u32, u32, u32) {
    let (rate, rate_boss, min, max) = match kind {
        DropKind::Common => (
            battle.item_rate_common,
            battle.item_rate_common_boss,
            battle.item_drop_common_min,
            battle.item_drop_common_max,
        ),
        DropKind::Heal => {
            (battle.item_rate_heal, battle.item_rate_heal_boss, battle.item_drop_heal_min, battle.item_drop_heal_max)
        }
        DropKind::Use => {
            (battle.item_rate_use, battle.item_rate_use_boss, battle.item_drop_use_min, battle.item_drop_use_max)
        }
        DropKind::Equip => (
            battle.item_rate_equip,
            battle.item_rate_equip_boss,
            battle.item_drop_equip_min,
            battle.item_drop_equip_max,
        ),
        DropKind::Card => {
            (battle.item_rate_card, battle.item_rate_card_boss, battle.item_drop_card_min, battle.item_drop_card_max)
        }
    };
    (if boss { rate_boss } else { rate }, min, max)
}

/// Apply the battle drop rates to a template in place.
fn adjust_drops(db: &mut MobTemplate, battle: &BattleConfig) {
    let boss = db.mode.contains(Mode::BOSS);
    for d in db.drops.iter_mut().filter(|d| d.nameid != 0) {
        let (rate, min, max) = drop_group(battle, d.kind, boss);
        d.p = mob_drop_adjust(battle, d.p, rate, min, max);
    }
    for d in db.mvp_drops.iter_mut().filter(|d| d.nameid != 0) {
        d.p = mob_drop_adjust(battle, d.p, battle.item_rate_mvp, battle.item_drop_mvp_min, battle.item_drop_mvp_max);
    }
}

// ─── Validation ─────────────────────────────────────────────────────────────

/// Clamp out-of-range fields, apply drop rates and index by id.
///
/// Templates with id 0 or an id seen earlier are skipped with a warning.
pub fn build_db(templates: Vec<MobTemplate>, battle: &BattleConfig) -> HashMap<u32, Arc<MobTemplate>> {
    let mut out = HashMap::with_capacity(templates.len());
    for mut db in templates {
        if db.id == 0 {
            tracing::warn!("[mob_db] skipping template `{}` with id 0", db.name);
            continue;
        }
        if out.contains_key(&db.id) {
            tracing::warn!("[mob_db] duplicate template {}, keeping the first", db.id);
            continue;
        }
        if db.max_hp <= 0 {
            tracing::warn!("[mob_db] {}: max_hp {} clamped to 1", db.id, db.max_hp);
            db.max_hp = 1;
        }
        db.lv = db.lv.clamp(1, 255);
        db.speed = db.speed.clamp(20, 1000);
        if db.drops.len() > MAX_MOB_DROP {
            tracing::warn!("[mob_db] {}: {} drops, keeping {MAX_MOB_DROP}", db.id, db.drops.len());
            db.drops.truncate(MAX_MOB_DROP);
        }
        if db.mvp_drops.len() > MAX_MVP_DROP {
            tracing::warn!("[mob_db] {}: {} mvp drops, keeping {MAX_MVP_DROP}", db.id, db.mvp_drops.len());
            db.mvp_drops.truncate(MAX_MVP_DROP);
        }
        if db.skills.len() > MAX_MOBSKILL {
            tracing::warn!("[mob_db] {}: {} skills, keeping {MAX_MOBSKILL}", db.id, db.skills.len());
            db.skills.truncate(MAX_MOBSKILL);
        }
        adjust_drops(&mut db, battle);
        out.insert(db.id, Arc::new(db));
    }
    out
}

// ─── YAML source ────────────────────────────────────────────────────────────

pub fn parse_yaml(contents: &str) -> Result<Vec<MobTemplate>> {
    serde_yaml::from_str(contents).context("Failed to parse mob templates")
}

pub fn load_yaml<P: AsRef<Path>>(path: P, battle: &BattleConfig) -> Result<HashMap<u32, Arc<MobTemplate>>> {
    let path = path.as_ref();
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read mob db: {}", path.display()))?;
    let templates = parse_yaml(&contents).with_context(|| format!("in {}", path.display()))?;
    let db = build_db(templates, battle);
    tracing::info!("[mob_db] read {} count={}", path.display(), db.len());
    Ok(db)
}

// ─── SQL source ─────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct MobRow {
    mob_id: u32,
    mob_name: String,
    mob_level: i32,
    mob_vita: i32,
    mob_base_exp: u32,
    mob_job_exp: u32,
    mob_mvp_exp: u32,
    mob_range: i32,
    mob_sight: i32,
    mob_chase: i32,
    mob_mode: u32,
    mob_move_time: i32,
    mob_attack_time: i32,
    mob_attack_motion: i32,
    mob_damage_motion: i32,
}

#[derive(sqlx::FromRow)]
struct DropRow {
    mdr_mob_id: u32,
    mdr_item_id: u32,
    mdr_rate: i32,
    mdr_kind: String,
    mdr_mvp: u8,
}

#[derive(sqlx::FromRow)]
struct SkillRow {
    msk_mob_id: u32,
    msk_skill_id: u16,
    msk_level: u16,
    msk_state: String,
    msk_rate: u32,
    msk_cast_time: i32,
    msk_delay: i32,
    msk_target: String,
    msk_condition: String,
    msk_condition_value: i32,
}

/// Parse a snake_case enum name stored in a text column.
fn enum_column<'de, T: Deserialize<'de>>(value: &'de str) -> Result<T> {
    let de: serde::de::value::StrDeserializer<'de, serde::de::value::Error> = value.into_deserializer();
    T::deserialize(de).map_err(|e| anyhow::anyhow!("`{value}`: {e}"))
}

/// Load templates, drops and skills from MySQL. Rows that fail to parse
/// are skipped with a warning.
pub async fn load_sql(pool: &MySqlPool, battle: &BattleConfig) -> Result<HashMap<u32, Arc<MobTemplate>>> {
    let mobs: Vec<MobRow> = sqlx::query_as(
        "SELECT MobId AS mob_id, MobName AS mob_name, MobLevel AS mob_level, MobVita AS mob_vita,
         MobBaseExp AS mob_base_exp, MobJobExp AS mob_job_exp, MobMvpExp AS mob_mvp_exp,
         MobRange AS mob_range, MobSight AS mob_sight, MobChase AS mob_chase, MobMode AS mob_mode,
         MobMoveTime AS mob_move_time, MobAttackTime AS mob_attack_time,
         MobAttackMotion AS mob_attack_motion, MobDamageMotion AS mob_damage_motion
         FROM Mobs ORDER BY MobId",
    )
    .fetch_all(pool)
    .await
    .context("Failed to query Mobs")?;

    let mut templates: Vec<MobTemplate> = mobs
        .into_iter()
        .map(|r| MobTemplate {
            id: r.mob_id,
            name: r.mob_name,
            lv: r.mob_level,
            max_hp: r.mob_vita,
            base_exp: r.mob_base_exp,
            job_exp: r.mob_job_exp,
            mexp: r.mob_mvp_exp,
            range: r.mob_range,
            range2: r.mob_sight,
            range3: r.mob_chase,
            mode: Mode::from_bits_truncate(r.mob_mode),
            speed: r.mob_move_time,
            adelay: r.mob_attack_time,
            amotion: r.mob_attack_motion,
            dmotion: r.mob_damage_motion,
            ..MobTemplate::default()
        })
        .collect();
    let index: HashMap<u32, usize> = templates.iter().enumerate().map(|(i, t)| (t.id, i)).collect();

    let drops: Vec<DropRow> = sqlx::query_as(
        "SELECT MdrMobId AS mdr_mob_id, MdrItemId AS mdr_item_id, MdrRate AS mdr_rate,
         MdrKind AS mdr_kind, MdrMvp AS mdr_mvp FROM MobDrops ORDER BY MdrMobId, MdrSlot",
    )
    .fetch_all(pool)
    .await
    .context("Failed to query MobDrops")?;
    for row in &drops {
        let Some(&i) = index.get(&row.mdr_mob_id) else {
            tracing::warn!("[mob_db] drop {} for unknown mob {}", row.mdr_item_id, row.mdr_mob_id);
            continue;
        };
        let kind = match enum_column::<DropKind>(&row.mdr_kind) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!("[mob_db] mob {} drop kind {e}", row.mdr_mob_id);
                DropKind::Common
            }
        };
        let entry = DropEntry { nameid: row.mdr_item_id, p: row.mdr_rate, kind };
        if row.mdr_mvp != 0 {
            templates[i].mvp_drops.push(entry);
        } else {
            templates[i].drops.push(entry);
        }
    }

    let skills: Vec<SkillRow> = sqlx::query_as(
        "SELECT MskMobId AS msk_mob_id, MskSkillId AS msk_skill_id, MskLevel AS msk_level,
         MskState AS msk_state, MskRate AS msk_rate, MskCastTime AS msk_cast_time,
         MskDelay AS msk_delay, MskTarget AS msk_target, MskCondition AS msk_condition,
         MskConditionValue AS msk_condition_value FROM MobSkills ORDER BY MskMobId, MskSlot",
    )
    .fetch_all(pool)
    .await
    .context("Failed to query MobSkills")?;
    for row in &skills {
        let Some(&i) = index.get(&row.msk_mob_id) else {
            continue;
        };
        let parsed = (|| -> Result<MobSkill> {
            Ok(MobSkill {
                state: enum_column(&row.msk_state)?,
                target: enum_column(&row.msk_target)?,
                cond: enum_column(&row.msk_condition)?,
                ..MobSkill::new(row.msk_skill_id, row.msk_level)
            })
        })();
        match parsed {
            Ok(skill) => templates[i].skills.push(MobSkill {
                permillage: row.msk_rate,
                casttime: row.msk_cast_time,
                delay: row.msk_delay,
                cond2: row.msk_condition_value,
                ..skill
            }),
            Err(e) => tracing::warn!("[mob_db] mob {} skill {}: {e}", row.msk_mob_id, row.msk_skill_id),
        }
    }

    let db = build_db(templates, battle);
    tracing::info!("[mob_db] read done count={}", db.len());
    Ok(db)
}

// ─── Spawn lists ────────────────────────────────────────────────────────────

pub fn parse_spawns(contents: &str) -> Result<Vec<SpawnData>> {
    serde_yaml::from_str(contents).context("Failed to parse spawn list")
}

pub fn load_spawns<P: AsRef<Path>>(path: P) -> Result<Vec<SpawnData>> {
    let path = path.as_ref();
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read spawn list: {}", path.display()))?;
    parse_spawns(&contents).with_context(|| format!("in {}", path.display()))
}

/// Spawn lines of the maps hosted by `server_id`.
pub async fn load_spawns_sql(pool: &MySqlPool, server_id: i32) -> Result<Vec<SpawnData>> {
    #[derive(sqlx::FromRow)]
    struct SpawnRow {
        map_name: String,
        spn_x: i32,
        spn_y: i32,
        spn_range_x: i32,
        spn_range_y: i32,
        spn_mob_id: u32,
        spn_amount: u32,
        spn_delay1: u32,
        spn_delay2: u32,
        spn_boss: u8,
        spn_event: String,
    }

    let rows: Vec<SpawnRow> = sqlx::query_as(
        "SELECT m.MapName AS map_name, s.SpnX AS spn_x, s.SpnY AS spn_y,
         s.SpnRangeX AS spn_range_x, s.SpnRangeY AS spn_range_y, s.SpnMobId AS spn_mob_id,
         s.SpnAmount AS spn_amount, s.SpnDelay1 AS spn_delay1, s.SpnDelay2 AS spn_delay2,
         s.SpnBoss AS spn_boss, s.SpnEvent AS spn_event
         FROM Spawns s JOIN Maps m ON m.MapId = s.SpnMapId
         WHERE m.MapServer = ? ORDER BY s.SpnId",
    )
    .bind(server_id)
    .fetch_all(pool)
    .await
    .context("Failed to query Spawns")?;

    Ok(rows
        .into_iter()
        .map(|r| SpawnData {
            map: r.map_name,
            xs: r.spn_range_x,
            ys: r.spn_range_y,
            num: r.spn_amount,
            delay1: r.spn_delay1,
            delay2: r.spn_delay2,
            boss: r.spn_boss != 0,
            event: r.spn_event,
            ..SpawnData::single(0, r.spn_x, r.spn_y, r.spn_mob_id)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::mob::skill::SkillCondition;
    use crate::game::mob::SkillState;

    const SAMPLE: &str = r#"
- id: 1002
  name: Poring
  lv: 1
  max_hp: 50
  base_exp: 2
  job_exp: 1
  mode: [can_move, looter]
  drops:
    - { nameid: 909, p: 7000 }
    - { nameid: 4001, p: 10, kind: card }
- id: 1038
  name: Osiris
  lv: 78
  max_hp: 415400
  mexp: 6426
  mode: 165
  mvp_drops:
    - { nameid: 617, p: 2000 }
  skills:
    - skill_id: 196
      skill_lv: 1
      state: idle
      permillage: 1000
      delay: 10000
      cond: slave_lt
      cond2: 2
      val: [1039]
"#;

    #[test]
    fn test_parse_yaml_templates() {
        let templates = parse_yaml(SAMPLE).unwrap();
        assert_eq!(templates.len(), 2);
        let poring = &templates[0];
        assert_eq!(poring.mode, Mode::CANMOVE | Mode::LOOTER);
        assert_eq!(poring.range2, 10);
        assert_eq!(poring.drops[1].kind, DropKind::Card);

        let osiris = &templates[1];
        assert!(osiris.mode.contains(Mode::BOSS));
        assert!(osiris.mode.contains(Mode::CANATTACK));
        assert_eq!(osiris.skills[0].cond, SkillCondition::SlaveLt);
        assert_eq!(osiris.skills[0].state, SkillState::Idle);
        assert_eq!(osiris.skills[0].val, vec![1039]);
    }

    #[test]
    fn test_unknown_mode_name_is_rejected() {
        let bad = "- { id: 1, name: x, max_hp: 1, mode: [flying] }";
        let err = parse_yaml(bad).unwrap_err();
        assert!(format!("{err:?}").contains("flying"));
    }

    #[test]
    fn test_linear_drop_adjust_clamps() {
        let battle = BattleConfig::default();
        assert_eq!(mob_drop_adjust(&battle, 7000, 100, 1, 10000), 7000);
        assert_eq!(mob_drop_adjust(&battle, 7000, 200, 1, 10000), 10000);
        assert_eq!(mob_drop_adjust(&battle, 10, 50, 1, 10000), 5);
        assert_eq!(mob_drop_adjust(&battle, 1, 10, 1, 10000), 1);
    }

    #[test]
    fn test_logarithmic_drop_adjust_favors_rare_items() {
        let battle = BattleConfig { logarithmic_drops: true, ..BattleConfig::default() };
        let rare = mob_drop_adjust(&battle, 10, 500, 1, 10000);
        let common = mob_drop_adjust(&battle, 5000, 500, 1, 10000);
        assert!(rare > 10 * 3, "rare={rare}");
        assert!(common < 5000 * 3, "common={common}");
        // Neutral rate leaves the value alone.
        assert_eq!(mob_drop_adjust(&battle, 1234, 100, 1, 10000), 1234);
    }

    #[test]
    fn test_build_db_applies_groups_and_skips_bad_ids() {
        let battle = BattleConfig { item_rate_card: 300, item_rate_mvp: 50, ..BattleConfig::default() };
        let mut templates = parse_yaml(SAMPLE).unwrap();
        templates.push(MobTemplate { id: 0, name: "nobody".into(), ..MobTemplate::default() });
        templates.push(MobTemplate { id: 1002, name: "dup".into(), max_hp: 1, ..MobTemplate::default() });
        let db = build_db(templates, &battle);
        assert_eq!(db.len(), 2);
        let poring = &db[&1002];
        assert_eq!(poring.name, "Poring");
        assert_eq!(poring.drops[0].p, 7000);
        assert_eq!(poring.drops[1].p, 30);
        assert_eq!(db[&1038].mvp_drops[0].p, 1000);
    }

    #[test]
    fn test_parse_spawns() {
        let spawns = parse_spawns(
            r#"
- { map: prt_fild08, x: 0, y: 0, class: 1002, num: 30, delay1: 5000 }
- { map: pay_dun04, x: 120, y: 110, xs: 5, ys: 5, class: 1150, num: 1, delay1: 3600000, delay2: 600000, boss: true, name: "Moonlight Flower" }
"#,
        )
        .unwrap();
        assert_eq!(spawns.len(), 2);
        assert_eq!(spawns[0].class_, 1002);
        assert_eq!(spawns[0].name, "--en--");
        assert!(spawns[1].boss);
        assert_eq!(spawns[1].name, "Moonlight Flower");
        assert_eq!(spawns[1].active, 0);
    }

    #[test]
    fn test_build_db_truncates_and_clamps() {
        let template = MobTemplate {
            id: 5,
            name: "many".into(),
            max_hp: -3,
            drops: (0..12).map(|i| DropEntry::new(500 + i, 100)).collect(),
            ..MobTemplate::default()
        };
        let db = build_db(vec![template], &BattleConfig::default());
        assert_eq!(db[&5].max_hp, 1);
        assert_eq!(db[&5].drops.len(), MAX_MOB_DROP);
    }
}
