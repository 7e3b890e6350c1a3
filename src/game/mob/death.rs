//! Damage bookkeeping, kill-steal protection and death.
//!
//! `mob_dead` hands out experience, zeny, drops and the MVP prize, then
//! either frees the mob or leaves a tomb and schedules its respawn.

use bitflags::bitflags;

use crate::game::hooks::ClearType;
use crate::game::item::{self, ItemDropList, ItemStack};
use crate::game::map::{Block, MapFlags};
use crate::game::mob::skill::{self, SkillEvent, SkillTrigger};
use crate::game::mob::{ai, guardian, spawn, AiKind, DamageFlag, KsProtect, SkillState, SpawnSize, MAX_MOB_DROP, MAX_MVP_DROP};
use crate::game::npc::NpcData;
use crate::game::pc::KsScope;
use crate::game::types::{check_distance_bl, BlType, BlockId};
use crate::game::unit;
use crate::game::world::{MapWorld, TimerData, TimerFunc};
use crate::timer::{add_tick, diff_tick, Tick};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeathFlags: u32 {
        const NO_DROP = 0x1;
        const NO_EXP  = 0x2;
    }
}

/// Minimum gap between two kill-steal warnings to one player (ms).
const KS_FLOOD_INTERVAL: i32 = 2000;
/// Attacks from this close count as melee for skill triggers.
const CLOSE_ATTACK_RANGE: i32 = 3;
/// Drop chances are out of this.
const DROP_SCALE: u32 = 10000;

// ─── Damage ─────────────────────────────────────────────────────────────────

/// Record `damage` dealt to mob `id` by `src`.
///
/// Negative (absorbed) damage and self damage are ignored, as are zero-damage
/// effects from units the mob does not consider enemies. Damage from a
/// player-controlled mob is credited to the controlling player.
pub fn log_damage(world: &mut MapWorld, id: BlockId, src: BlockId, damage: i32) {
    if damage < 0 || id == src {
        return;
    }
    let Some(md) = world.map.mob(id) else {
        return;
    };
    let enemy_type = md.enemy_type();
    let Some(sbl) = world.map.id2bl(src) else {
        return;
    };
    if damage == 0 && !enemy_type.intersects(sbl.bl_type) {
        return;
    }

    let hit = damage > 0;
    let (char_id, attacked) = match world.map.get(src) {
        Some(Block::Pc(sd)) => (sd.char_id, hit.then_some(src)),
        Some(Block::Mob(md2)) => {
            let char_id = if md2.special.ai != AiKind::None && md2.master_id != 0 {
                world.map.pc(md2.master_id).map_or(0, |sd| sd.char_id)
            } else {
                0
            };
            let attacked = hit.then(|| {
                if md2.master_id != 0 && world.battle.retaliate_to_master {
                    md2.master_id
                } else {
                    src
                }
            });
            (char_id, attacked)
        }
        Some(_) => (0, Some(src)),
        None => return,
    };

    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    if let Some(attacked) = attacked {
        md.attacked_id = attacked;
    }
    if char_id != 0 {
        md.record_damage(char_id, DamageFlag::Normal, damage as u32);
    }
}

/// Players who hit mob `id` and are close enough to see its HP bar.
fn hp_bar_observers(world: &MapWorld, id: BlockId) -> Vec<BlockId> {
    let Some(md) = world.map.mob(id) else {
        return Vec::new();
    };
    if md.is_boss() {
        return Vec::new();
    }
    md.damage_entries()
        .filter_map(|d| world.map.charid2sd(d.id))
        .filter(|sd| sd.bl.m == md.bl.m && check_distance_bl(&md.bl, &sd.bl, world.battle.area_size))
        .map(|sd| sd.bl.id)
        .collect()
}

fn send_hp_bars(world: &mut MapWorld, id: BlockId) {
    let observers = hp_bar_observers(world, id);
    let Some(md) = world.map.mob(id) else {
        return;
    };
    let (bl, hp, max_hp) = (md.bl, md.status.hp, md.status.max_hp);
    for observer in observers {
        world.notify.notify_hp_bar(&bl, hp, max_hp, observer);
    }
}

/// Bookkeeping after mob `id` took `damage` (already subtracted from its HP).
///
/// Total damage is capped at `u32::MAX`; once reached, further damage is
/// not logged. The first hit turns an aggressive mob into a retaliating one.
pub fn mob_damage(world: &mut MapWorld, id: BlockId, src: Option<BlockId>, damage: i32) {
    let tick = world.gettick();
    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    if damage > 0 {
        let logged = (damage as u32).min(u32::MAX - md.tdmg);
        md.tdmg += logged;
        if md.state.aggressive {
            md.state.aggressive = false;
            md.state.skillstate = match md.state.skillstate {
                SkillState::Angry => SkillState::Berserk,
                SkillState::Follow => SkillState::Rush,
                other => other,
            };
        }
        md.dmgtick = tick;
        if let Some(src) = src {
            log_damage(world, id, src, i32::try_from(logged).unwrap_or(i32::MAX));
        }
    }
    if src.is_some() {
        send_hp_bars(world, id);
    }
}

/// Restore `heal` HP, up to the maximum.
pub fn mob_heal(world: &mut MapWorld, id: BlockId, heal: i32) {
    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    if md.is_dead() {
        return;
    }
    md.status.hp = md.status.hp.saturating_add(heal.max(0)).min(md.status.max_hp);
    send_hp_bars(world, id);
}

/// Deal `damage` from `src` to mob `id`. Returns true if the mob died.
///
/// This is the entry point for the combat engine: it applies kill-steal
/// protection, logs the damage, lets the mob answer with a skill and
/// runs [`mob_dead`] when HP runs out.
pub fn apply_damage(world: &mut MapWorld, id: BlockId, src: Option<BlockId>, damage: i32) -> bool {
    if let Some(src) = src {
        if ksprotected(world, src, id) {
            return false;
        }
    }
    let Some(md) = world.map.mob_mut(id) else {
        return false;
    };
    if md.is_dead() || !md.bl.on_map {
        return false;
    }
    md.status.hp = md.status.hp.saturating_sub(damage.max(0));
    let dead = md.is_dead();
    let mbl = md.bl;
    mob_damage(world, id, src, damage);

    if dead {
        mob_dead(world, id, src, DeathFlags::empty());
        return true;
    }
    if let Some(sbl) = src.and_then(|s| world.map.id2bl(s).copied()) {
        let tick = world.gettick();
        let trigger = if check_distance_bl(&mbl, &sbl, CLOSE_ATTACK_RANGE) {
            SkillTrigger::CloseAttack
        } else {
            SkillTrigger::LongRangeAttack
        };
        skill::mobskill_event(world, id, sbl.id, tick, trigger);
    }
    false
}

// ─── Kill-steal protection ──────────────────────────────────────────────────

/// The player behind `id`: itself, or the master of a summoned mob.
fn owner_of(world: &MapWorld, id: BlockId) -> BlockId {
    match world.map.mob(id) {
        Some(md) if md.master_id != 0 => md.master_id,
        _ => id,
    }
}

/// Whether `src` must not damage mob `target` because another player owns it.
///
/// A hit that is allowed starts (or refreshes) protection in favour of the
/// attacking player for `ksprotection` ms.
pub fn ksprotected(world: &mut MapWorld, src: BlockId, target: BlockId) -> bool {
    let duration = world.battle.ksprotection;
    if duration <= 0 {
        return false;
    }
    let Some(md) = world.map.mob(target) else {
        return false;
    };
    let Some(sd) = world.map.pc(owner_of(world, src)) else {
        return false;
    };
    let free_for_all = MapFlags::ALLOW_KS | MapFlags::PVP | MapFlags::GVG | MapFlags::TOWN;
    if world.map.map(md.bl.m).is_some_and(|g| g.flags.intersects(free_for_all)) {
        return false;
    }
    if md.db.mexp > 0 || md.master_id != 0 {
        return false;
    }
    let tick = world.gettick();
    let t_sd = world.map.pc(owner_of(world, md.target_id));
    let (sid, sparty, sguild, snoks, sname) = (sd.bl.id, sd.party_id, sd.guild_id, sd.noks, sd.name.clone());

    if let Some(ks) = md.ks.filter(|ks| diff_tick(ks.until, tick) > 0) {
        let shared = sid == ks.owner
            || (ks.scope == KsScope::Party && sparty != 0 && sparty == ks.party_id)
            || (ks.scope == KsScope::Guild && sguild != 0 && sguild == ks.guild_id);
        let target_elsewhere = t_sd.is_some_and(|t| match ks.scope {
            KsScope::SelfOnly => ks.owner != t.bl.id,
            KsScope::Party => ks.party_id != 0 && ks.party_id != t.party_id,
            KsScope::Guild => ks.guild_id != 0 && ks.guild_id != t.guild_id,
            KsScope::None => false,
        });
        let owner = world.map.pc(ks.owner).filter(|pl| pl.bl.m == md.bl.m);
        if !shared && !target_elsewhere {
            if let Some(owner) = owner {
                if owner.noks == KsScope::None {
                    return false;
                }
                let owner_name = owner.name.clone();
                warn_ks(world, sid, &format!("[KS Warning!! - Owner : {owner_name}]"), tick);
                warn_ks(world, ks.owner, &format!("[Watch out! {sname} is trying to KS you!]"), tick);
                return true;
            }
        }
    }

    if let Some(md) = world.map.mob_mut(target) {
        md.ks = Some(KsProtect {
            owner: sid,
            scope: snoks,
            party_id: sparty,
            guild_id: sguild,
            until: add_tick(tick, duration),
        });
    }
    false
}

fn warn_ks(world: &mut MapWorld, player: BlockId, msg: &str, tick: Tick) {
    let Some(sd) = world.map.pc_mut(player) else {
        return;
    };
    if diff_tick(sd.ks_floodprotect_tick, tick) > 0 {
        return;
    }
    sd.ks_floodprotect_tick = add_tick(tick, KS_FLOOD_INTERVAL);
    world.notify.notify_message(player, msg);
}

// ─── Death ──────────────────────────────────────────────────────────────────

/// A damage-log entry that earns a share of the rewards.
struct Claim {
    slot: usize,
    player: BlockId,
    party_id: u32,
    flag: DamageFlag,
}

/// Running party totals for a shared-exp party.
struct PartyShare {
    party_id: u32,
    base: u64,
    job: u64,
    zeny: u32,
}

fn exp_value(base: u32, per: f64, rate: u32) -> u64 {
    if base == 0 {
        return 0;
    }
    (f64::from(base) * per * f64::from(rate) / 100.0).clamp(1.0, f64::from(u32::MAX)) as u64
}

/// Kill mob `id`. `src` is the killing unit, if any.
pub fn mob_dead(world: &mut MapWorld, id: BlockId, src: Option<BlockId>, flags: DeathFlags) {
    let tick = world.gettick();
    let Some(md) = world.map.mob(id) else {
        return;
    };
    if let Some(gd) = md.guardian {
        guardian::guardian_lost(world, &gd);
    }
    if src.is_some() {
        if let Some(md) = world.map.mob_mut(id) {
            md.state.skillstate = SkillState::Dead;
        }
        skill::mobskill_use(world, id, tick, SkillEvent::Periodic);
    }
    if let Some(s) = src.filter(|s| world.map.mob(*s).is_some()) {
        ai::unlocktarget(world, s, tick);
    }

    let Some(md) = world.map.mob(id) else {
        return;
    };
    let (mbl, db, level, size, ai_kind) = (md.bl, md.db.clone(), md.level, md.special.size, md.special.ai);
    let (master_id, rebirth, max_hp) = (md.master_id, md.state.rebirth, md.status.max_hp);
    let killer = src.filter(|s| world.map.pc(*s).is_some());

    // Eligible attackers and the top three damage dealers.
    let mut claims = Vec::new();
    let mut count: u32 = 0;
    let mut ranks: [Option<BlockId>; 3] = [killer, None, None];
    let mut mvp_damage = 0;
    for (slot, d) in md.damage_entries().enumerate() {
        let Some(tsd) = world.map.charid2sd(d.id) else {
            continue;
        };
        if tsd.bl.m != mbl.m {
            continue;
        }
        count += 1;
        if tsd.is_dead() {
            continue;
        }
        if d.dmg > mvp_damage {
            ranks = [Some(tsd.bl.id), ranks[0], ranks[1]];
            mvp_damage = d.dmg;
        }
        claims.push(Claim { slot, player: tsd.bl.id, party_id: tsd.party_id, flag: d.flag });
    }
    let owners = ranks.map(|r| r.and_then(|p| world.map.pc(p)).map_or(0, |sd| sd.char_id));

    let battle = &world.battle;
    let (calc_by_total, bonus_attacker, bonus_max) =
        (battle.exp_calc_type == 0, battle.exp_bonus_attacker, battle.exp_bonus_max_attacker);
    if calc_by_total && count > 1 {
        if let Some(md) = world.map.mob_mut(id) {
            let first = md.dmglog[0].dmg;
            if u32::MAX - first > md.tdmg {
                md.tdmg += first;
                md.dmglog[0].dmg = first.saturating_mul(2);
            } else {
                md.dmglog[0].dmg = first.saturating_add(u32::MAX - md.tdmg);
                md.tdmg = u32::MAX;
            }
        }
    }

    let pvp = world.map.map(mbl.m).is_some_and(|g| g.flags.contains(MapFlags::PVP));
    if !flags.contains(DeathFlags::NO_EXP) && !pvp && (master_id == 0 || ai_kind == AiKind::None) {
        let Some(md) = world.map.mob(id) else {
            return;
        };
        let shares: Vec<(usize, u32)> = claims.iter().map(|c| (c.slot, md.dmglog[c.slot].dmg)).collect();
        let tdmg = md.tdmg;
        let mut parties: Vec<PartyShare> = Vec::new();
        let bonus = 100.0;
        for (claim, (_, dmg)) in claims.iter().zip(shares) {
            let mut per = if calc_by_total && tdmg > 0 {
                f64::from(dmg) / f64::from(tdmg)
            } else {
                (f64::from(dmg) / f64::from(max_hp.max(1))).min(2.0)
            };
            if count > 1 && bonus_attacker > 0 {
                let c = count.min(bonus_max.max(1));
                per += per * f64::from((c - 1) * bonus_attacker) / 100.0;
            }
            if world.battle.mob_size_influence {
                match size {
                    SpawnSize::Small => per /= 2.0,
                    SpawnSize::Big => per *= 2.0,
                    SpawnSize::Normal => {}
                }
            }

            let mut zeny = 0u32;
            if world.battle.zeny_from_mobs && level > 0 {
                let lv = level as u32;
                let roll = world.rnd() % lv;
                zeny = (f64::from(lv + roll) * per * bonus / 100.0) as u32;
                if db.mexp > 0 {
                    zeny = zeny.saturating_mul(world.rnd() % 250);
                }
            }
            let base = exp_value(db.base_exp, per * bonus / 100.0, world.battle.base_exp_rate);
            let job = if claim.flag == DamageFlag::Homun {
                0
            } else {
                exp_value(db.job_exp, per * bonus / 100.0, world.battle.job_exp_rate)
            };

            if claim.party_id > 0 {
                if let Some(p) = parties.iter_mut().find(|p| p.party_id == claim.party_id) {
                    p.base = p.base.saturating_add(base).min(u64::from(u32::MAX));
                    p.job = p.job.saturating_add(job).min(u64::from(u32::MAX));
                    p.zeny = p.zeny.saturating_add(zeny);
                    continue;
                }
                if world.rewards.party_shares_exp(claim.party_id) {
                    parties.push(PartyShare { party_id: claim.party_id, base, job, zeny });
                    continue;
                }
            }
            if base > 0 || job > 0 {
                world.rewards.gain_exp(claim.player, base, job, id);
            }
            if zeny > 0 {
                world.rewards.gain_zeny(claim.player, zeny);
            }
        }
        for p in parties {
            world.rewards.party_exp_share(p.party_id, mbl.m, p.base, p.job, p.zeny, id);
        }
    }

    // Drops. Looted items come back out whatever else happens.
    let lootitems = world.map.mob(id).map(|md| md.lootitems.clone()).unwrap_or_default();
    let mut drops = ItemDropList { m: mbl.m, x: mbl.x, y: mbl.y, owners, items: Vec::new() };
    if !flags.contains(DeathFlags::NO_DROP) && !rebirth && ai_kind == AiKind::None {
        for d in db.drops.iter().take(MAX_MOB_DROP) {
            if d.nameid == 0 {
                continue;
            }
            let mut rate = d.p;
            if rate <= 0 {
                if world.battle.drop_rate0item {
                    continue;
                }
                rate = 1;
            }
            if world.battle.mob_size_influence {
                match size {
                    SpawnSize::Small if rate >= 2 => rate /= 2,
                    SpawnSize::Big => rate = rate.saturating_mul(2),
                    _ => {}
                }
            }
            if (world.rnd() % DROP_SCALE) as i32 >= rate {
                continue;
            }
            drops.items.push(ItemStack::new(d.nameid, 1));
        }
    }
    drops.items.extend(lootitems);
    if !drops.items.is_empty() {
        let delay = if world.battle.delay_battle_damage { 0 } else { 500 };
        world
            .timers
            .add_timer(add_tick(tick, delay), TimerFunc::MobDelayItemDrop, 0, TimerData::Drops(drops));
    }

    if let (Some(mvp), true, AiKind::None) = (ranks[0], db.mexp > 0, ai_kind) {
        let exp = if flags.contains(DeathFlags::NO_EXP) {
            1
        } else {
            let mut exp = u64::from(db.mexp);
            if count > 1 {
                exp += exp * u64::from(bonus_attacker * (count - 1)) / 100;
            }
            (exp * u64::from(world.battle.mvp_exp_rate) / 100).clamp(1, u64::from(u32::MAX))
        };
        let prize = if flags.contains(DeathFlags::NO_DROP) { None } else { mvp_prize(world, &db.mvp_drops) };
        if let Some(item) = prize {
            if !world.rewards.give_item(mvp, &item) {
                if let Some(sbl) = world.map.id2bl(mvp).copied() {
                    item::addflooritem(world, item, sbl.m, sbl.x, sbl.y, owners, true);
                }
            }
        }
        world.notify.notify_mvp(mvp, &mbl, exp, prize.map(|i| i.nameid));
        world.rewards.gain_exp(mvp, exp, 0, id);
    }

    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    md.status.hp = 0;
    if !md.npc_event.is_empty() && !md.state.npc_killmonster {
        tracing::debug!("[mob] {id} died, event {} for {:?}", md.npc_event, ranks[0]);
    }
    let deletetimer = md.deletetimer.take();
    if let Some(tid) = deletetimer {
        let _ = world.timers.delete_timer(tid, TimerFunc::MobTimerDelete);
    }
    spawn::deleteslave(world, id);
    world.notify.notify_death_effects(&mbl);

    let Some(md) = world.map.mob(id) else {
        return;
    };
    let Some(site) = md.spawn.and_then(|idx| world.spawns.get(idx)) else {
        unit::unit_free(world, id, ClearType::Dead);
        return;
    };
    let notomb = world.map.map(mbl.m).is_some_and(|g| g.flags.contains(MapFlags::NOTOMB));
    if world.battle.mvp_tomb_enabled && site.boss && !notomb {
        let killer_name = ranks[0].and_then(|p| world.map.pc(p)).map(|sd| sd.name.clone());
        mvptomb_create(world, id, killer_name.as_deref());
    }
    unit::remove_map(world, id, ClearType::Dead);
    if let Some(md) = world.map.mob_mut(id) {
        md.sc = Default::default();
        md.ks = None;
    }
    spawn::setdelayspawn(world, id);
}

/// Roll the MVP prize list in random order; the first success wins.
fn mvp_prize(world: &mut MapWorld, list: &[crate::database::mob_db::DropEntry]) -> Option<ItemStack> {
    let mut slots: [Option<(u32, i32)>; MAX_MVP_DROP] = [None; MAX_MVP_DROP];
    for d in list.iter().take(MAX_MVP_DROP).filter(|d| d.nameid != 0) {
        let free: Vec<usize> = (0..MAX_MVP_DROP).filter(|i| slots[*i].is_none()).collect();
        let pick = free[world.rnd() as usize % free.len()];
        slots[pick] = Some((d.nameid, d.p));
    }
    for (nameid, p) in slots.into_iter().flatten() {
        let rate = if p <= 0 && !world.battle.drop_rate0item { 1 } else { p };
        if rate > (world.rnd() % DROP_SCALE) as i32 {
            return Some(ItemStack::new(nameid, 1));
        }
    }
    None
}

/// Kill mob `id` outright, without a killer.
pub fn kill(world: &mut MapWorld, id: BlockId) {
    let Some(md) = world.map.mob_mut(id) else {
        return;
    };
    if md.is_dead() && !md.bl.on_map {
        return;
    }
    md.status.hp = 0;
    mob_dead(world, id, None, DeathFlags::empty());
}

/// Timer callback: put a dead mob's drops on the floor.
pub fn delay_item_drop(world: &mut MapWorld, list: ItemDropList) {
    for stack in list.items {
        item::addflooritem(world, stack, list.m, list.x, list.y, list.owners, false);
    }
}

// ─── Tombs ──────────────────────────────────────────────────────────────────

/// Leave a tomb where boss `id` died.
pub fn mvptomb_create(world: &mut MapWorld, id: BlockId, killer: Option<&str>) {
    let Some(md) = world.map.mob(id) else {
        return;
    };
    let bl = md.bl;
    if md.tomb_nid.is_some() {
        mvptomb_destroy(world, id);
    }
    let nid = match world.map.alloc_id(BlType::NPC) {
        Ok(nid) => nid,
        Err(e) => {
            tracing::error!("[mob] tomb for {id}: {e}");
            return;
        }
    };
    let mut nd = NpcData::tomb(nid, id, killer);
    nd.bl.m = bl.m;
    nd.bl.x = bl.x;
    nd.bl.y = bl.y;
    let tomb_bl = nd.bl;
    if let Err(e) = world.map.insert(Block::Npc(Box::new(nd))).and_then(|_| world.map.addblock(nid)) {
        tracing::error!("[mob] tomb for {id}: {e}");
        return;
    }
    world.notify.notify_spawn(&tomb_bl);
    if let Some(md) = world.map.mob_mut(id) {
        md.tomb_nid = Some(nid);
    }
}

/// Remove tomb NPC `nid` from the world.
pub fn mvptomb_remove(world: &mut MapWorld, nid: BlockId) {
    let Some(nd) = world.map.npc(nid) else {
        return;
    };
    let bl = nd.bl;
    world.notify.notify_clear_unit(&bl, ClearType::OutSight);
    world.map.delblock(nid);
    world.map.remove(nid);
}

/// Remove the tomb of mob `id`, if it has one.
pub fn mvptomb_destroy(world: &mut MapWorld, id: BlockId) {
    let Some(nid) = world.map.mob_mut(id).and_then(|md| md.tomb_nid.take()) else {
        return;
    };
    mvptomb_remove(world, nid);
}
