//! Gear optimizer (spec §4.2): a four-phase greedy search over weapon,
//! defensive slots, accessories, then bag, producing an equipment set and
//! its simulated outcome against one target monster.

use crate::catalog::item::{EffectCode, Item, ItemType};
use crate::catalog::monster::Monster;
use crate::catalog::Catalog;
use crate::combat::{calc_turn_damage, simulate_combat, CombatMode, CombatResult, CombatStats};
use crate::model::character::{EquipSlot, Skill};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Loadout {
    pub slots: HashMap<EquipSlot, String>,
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub loadout: Loadout,
    pub outcome: Option<CombatResult>,
}

/// Candidate source and constraints for one optimization run.
pub struct OptimizeContext<'a> {
    pub catalog: &'a Catalog,
    pub character_level: u32,
    /// Planning mode additionally considers craftable-but-not-owned items.
    pub planning_mode: bool,
    pub equipped: &'a HashMap<EquipSlot, String>,
    pub inventory_counts: &'a HashMap<String, u32>,
    pub bank_counts: &'a HashMap<String, u32>,
}

impl<'a> OptimizeContext<'a> {
    fn owned_copies(&self, code: &str) -> u32 {
        let equipped_count = self.equipped.values().filter(|c| c.as_str() == code).count() as u32;
        let inv = *self.inventory_counts.get(code).unwrap_or(&0);
        let bank = *self.bank_counts.get(code).unwrap_or(&0);
        equipped_count + inv + bank
    }

    fn craftable_now(&self, item: &Item) -> bool {
        self.planning_mode
            && item
                .craft
                .as_ref()
                .map(|c| c.level <= self.character_level)
                .unwrap_or(false)
    }

    /// Total copies "available" to the optimizer: owned, plus one assumed
    /// producible copy in planning mode when craftable and none are owned.
    fn copies_available(&self, code: &str) -> u32 {
        let owned = self.owned_copies(code);
        if owned > 0 {
            return owned;
        }
        match self.catalog.item(code) {
            Some(item) if self.craftable_now(item) => 1,
            _ => 0,
        }
    }

    /// Whether a second copy of `code` could plausibly be equipped
    /// simultaneously (two rings of the same code) — owned duplicates, or a
    /// craftable duplicate assumed producible in planning mode.
    fn has_duplicate(&self, code: &str) -> bool {
        if self.owned_copies(code) >= 2 {
            return true;
        }
        self.planning_mode
            && self
                .catalog
                .item(code)
                .map(|item| self.craftable_now(item))
                .unwrap_or(false)
    }

    fn candidates_for(&self, item_type: ItemType) -> Vec<&'a Item> {
        self.catalog
            .items()
            .filter(|it| it.item_type == item_type && it.level <= self.character_level)
            .filter(|it| self.copies_available(&it.code) > 0)
            .collect()
    }
}

/// Add (or, with `add = false`, remove) one item's combat-relevant effects
/// onto a stat block. Non-combat effects (prospecting, inventory space,
/// restore, haste) are ignored here — they don't feed `CombatStats`.
pub fn apply_item_effects(stats: &mut CombatStats, item: &Item, add: bool) {
    let sign: i32 = if add { 1 } else { -1 };
    for eff in &item.effects {
        match &eff.code {
            EffectCode::Attack(e) => *stats.attack.entry(*e).or_insert(0) += sign * eff.value,
            EffectCode::Dmg(e) => *stats.dmg_bonus.entry(*e).or_insert(0) += sign * eff.value,
            EffectCode::DmgAll => stats.dmg_all_bonus += sign * eff.value,
            EffectCode::Res(e) => *stats.resistance.entry(*e).or_insert(0) += sign * eff.value,
            EffectCode::Hp => {
                let delta = (sign * eff.value) as f64;
                stats.max_hp += delta;
                stats.hp = stats.max_hp;
            }
            EffectCode::CriticalStrike => {
                stats.crit_chance = (stats.crit_chance + sign as f64 * eff.value as f64 / 100.0)
                    .clamp(0.0, 1.0)
            }
            _ => {}
        }
    }
}

fn with_item(base: &CombatStats, item: Option<&Item>) -> CombatStats {
    let mut stats = base.clone();
    if let Some(item) = item {
        apply_item_effects(&mut stats, item, true);
    }
    stats
}

/// Subtract every currently-equipped item's effects from the API-reported
/// stats, giving the "naked" baseline the optimizer builds candidate sets on
/// top of (spec §4.2).
pub fn naked_stats(
    reported: &CombatStats,
    catalog: &Catalog,
    equipped: &HashMap<EquipSlot, String>,
) -> CombatStats {
    let mut stats = reported.clone();
    for code in equipped.values() {
        if let Some(item) = catalog.item(code) {
            apply_item_effects(&mut stats, item, false);
        }
    }
    stats
}

/// Prefers the lexicographically smaller code on ties (spec's "code
/// ascending" tie-break, expressed as "reverse order is greater").
fn code_tiebreak(a: &str, b: &str) -> Ordering {
    b.cmp(a)
}

fn best_by<T, F>(items: Vec<T>, mut cmp: F) -> Option<T>
where
    F: FnMut(&T, &T) -> Ordering,
{
    let mut iter = items.into_iter();
    let mut best = iter.next()?;
    for item in iter {
        if cmp(&item, &best) == Ordering::Greater {
            best = item;
        }
    }
    Some(best)
}

fn outcome_rank(outcome: &CombatResult) -> (i32, i64, i32) {
    // Win beats loss; then higher remaining HP; then fewer turns on wins,
    // more turns on losses (surviving longer is still "less bad").
    let win_rank = if outcome.win { 1 } else { 0 };
    let hp_rank = (outcome.remaining_hp * 1000.0) as i64;
    let turn_rank = if outcome.win {
        -(outcome.turns as i32)
    } else {
        outcome.turns as i32
    };
    (win_rank, hp_rank, turn_rank)
}

/// Phase 1: weapon, chosen by maximum first-turn damage.
fn optimize_weapon<'a>(
    ctx: &OptimizeContext<'a>,
    naked: &CombatStats,
    monster: &CombatStats,
) -> Option<&'a Item> {
    let candidates = ctx.candidates_for(ItemType::Weapon);
    best_by(candidates, |a, b| {
        let dmg_a = calc_turn_damage(&with_item(naked, Some(a)), monster);
        let dmg_b = calc_turn_damage(&with_item(naked, Some(b)), monster);
        dmg_a
            .partial_cmp(&dmg_b)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.level.cmp(&b.level))
            .then_with(|| code_tiebreak(&a.code, &b.code))
    })
}

/// Phases 2-3 share this shape: pick the best candidate (item or empty) for
/// one slot by simulated outcome against `monster`, given the stats
/// accumulated from prior phases (`running`).
fn best_slot_candidate<'a>(
    candidates: Vec<&'a Item>,
    running: &CombatStats,
    monster: &CombatStats,
) -> (Option<&'a Item>, Option<CombatResult>) {
    let empty_outcome = simulate_combat(running, monster, CombatMode::ExpectedValue);

    let mut best: (Option<&Item>, Option<CombatResult>) = (None, empty_outcome);
    for item in candidates {
        let trial = with_item(running, Some(item));
        let trial_outcome = simulate_combat(&trial, monster, CombatMode::ExpectedValue);
        let better = match (&trial_outcome, &best.1) {
            (Some(t), Some(b)) => {
                let ord = outcome_rank(t)
                    .cmp(&outcome_rank(b))
                    .then_with(|| item.level.cmp(&best.0.map(|i| i.level).unwrap_or(0)))
                    .then_with(|| code_tiebreak(&item.code, best.0.map(|i| i.code.as_str()).unwrap_or("")));
                ord == Ordering::Greater
            }
            (Some(_), None) => true,
            _ => false,
        };
        if better {
            best = (Some(item), trial_outcome);
        }
    }
    best
}

/// Run the full four-phase optimization against one monster.
pub fn optimize_for_monster(ctx: &OptimizeContext, character: &CombatStats, monster: &Monster) -> OptimizationResult {
    let naked = naked_stats(character, ctx.catalog, ctx.equipped);
    let monster_stats = monster_combat_stats(monster);

    let mut loadout = Loadout::default();
    let mut running = naked.clone();

    // Phase 1: weapon.
    if let Some(weapon) = optimize_weapon(ctx, &running, &monster_stats) {
        apply_item_effects(&mut running, weapon, true);
        loadout.slots.insert(EquipSlot::Weapon, weapon.code.clone());
    }

    // Phase 2: defensive slots, in order.
    for slot in EquipSlot::DEFENSIVE {
        let candidates = ctx.candidates_for(defensive_item_type(slot));
        let (chosen, _) = best_slot_candidate(candidates, &running, &monster_stats);
        if let Some(item) = chosen {
            apply_item_effects(&mut running, item, true);
            loadout.slots.insert(slot, item.code.clone());
        }
    }

    // Phase 3: accessories, in order (ring2 excludes ring1's code unless a
    // duplicate is available).
    for slot in EquipSlot::ACCESSORY {
        let item_type = match slot {
            EquipSlot::Amulet => ItemType::Amulet,
            EquipSlot::Ring1 | EquipSlot::Ring2 => ItemType::Ring,
            _ => unreachable!(),
        };
        let mut candidates = ctx.candidates_for(item_type);
        if slot == EquipSlot::Ring2 {
            if let Some(ring1_code) = loadout.slots.get(&EquipSlot::Ring1).cloned() {
                if !ctx.has_duplicate(&ring1_code) {
                    candidates.retain(|it| it.code != ring1_code);
                }
            }
        }
        let (chosen, _) = best_slot_candidate(candidates, &running, &monster_stats);
        if let Some(item) = chosen {
            apply_item_effects(&mut running, item, true);
            loadout.slots.insert(slot, item.code.clone());
        }
    }

    let outcome = simulate_combat(&running, &monster_stats, CombatMode::ExpectedValue);

    // Phase 4: bag, by descending inventory_space, then level desc, code asc
    // — independent of combat stats, so evaluated after the outcome.
    let bag_candidates = ctx.candidates_for(ItemType::Bag);
    if let Some(bag) = best_by(bag_candidates, |a, b| {
        a.effect_value(&EffectCode::InventorySpace)
            .cmp(&b.effect_value(&EffectCode::InventorySpace))
            .then_with(|| a.level.cmp(&b.level))
            .then_with(|| code_tiebreak(&a.code, &b.code))
    }) {
        loadout.slots.insert(EquipSlot::Bag, bag.code.clone());
    }

    OptimizationResult { loadout, outcome }
}

fn defensive_item_type(slot: EquipSlot) -> ItemType {
    match slot {
        EquipSlot::Shield => ItemType::Shield,
        EquipSlot::Helmet => ItemType::Helmet,
        EquipSlot::BodyArmor => ItemType::BodyArmor,
        EquipSlot::LegArmor => ItemType::LegArmor,
        EquipSlot::Boots => ItemType::Boots,
        _ => unreachable!(),
    }
}

pub fn monster_combat_stats(monster: &Monster) -> CombatStats {
    CombatStats {
        hp: monster.hp as f64,
        max_hp: monster.hp as f64,
        initiative: monster.initiative,
        attack: monster.attack.clone(),
        resistance: monster.resistance.clone(),
        dmg_bonus: HashMap::new(),
        dmg_all_bonus: 0,
        crit_chance: monster.crit_chance,
    }
}

/// Gathering-tool optimization (spec §4.2): pick the best tool-weapon for a
/// gathering skill, and the candidate maximizing `prospecting` for every
/// other slot (preferring the current item on zero improvement).
pub fn optimize_for_gathering(ctx: &OptimizeContext, skill: Skill) -> Loadout {
    let mut loadout = Loadout::default();

    let tool_candidates: Vec<&Item> = ctx
        .catalog
        .items()
        .filter(|it| it.is_gathering_tool_for(skill) && it.level <= ctx.character_level)
        .filter(|it| ctx.copies_available(&it.code) > 0)
        .collect();
    if let Some(tool) = best_by(tool_candidates, |a, b| {
        a.level
            .cmp(&b.level)
            .then_with(|| code_tiebreak(&a.code, &b.code))
    }) {
        loadout.slots.insert(EquipSlot::Weapon, tool.code.clone());
    }

    for slot in EquipSlot::DEFENSIVE
        .into_iter()
        .chain(EquipSlot::ACCESSORY)
    {
        let item_type = match slot {
            EquipSlot::Ring1 | EquipSlot::Ring2 => ItemType::Ring,
            EquipSlot::Amulet => ItemType::Amulet,
            other => defensive_item_type(other),
        };
        let candidates = ctx.candidates_for(item_type);
        let current_prospecting = ctx
            .equipped
            .get(&slot)
            .and_then(|c| ctx.catalog.item(c))
            .map(|i| i.effect_value(&EffectCode::Prospecting))
            .unwrap_or(0);
        let best = best_by(candidates, |a, b| {
            a.effect_value(&EffectCode::Prospecting)
                .cmp(&b.effect_value(&EffectCode::Prospecting))
                .then_with(|| a.level.cmp(&b.level))
                .then_with(|| code_tiebreak(&a.code, &b.code))
        });
        match best {
            Some(item) if item.effect_value(&EffectCode::Prospecting) > current_prospecting => {
                loadout.slots.insert(slot, item.code.clone());
            }
            _ => {
                if let Some(current) = ctx.equipped.get(&slot) {
                    loadout.slots.insert(slot, current.clone());
                }
            }
        }
    }

    let bag_candidates = ctx.candidates_for(ItemType::Bag);
    if let Some(bag) = best_by(bag_candidates, |a, b| {
        a.effect_value(&EffectCode::InventorySpace)
            .cmp(&b.effect_value(&EffectCode::InventorySpace))
            .then_with(|| a.level.cmp(&b.level))
            .then_with(|| code_tiebreak(&a.code, &b.code))
    }) {
        loadout.slots.insert(EquipSlot::Bag, bag.code.clone());
    }

    loadout
}

/// Enumerate monsters at or below character level, run the optimizer for
/// each, and return the strongest monster whose predicted fight is a win
/// with at most 90% HP lost (spec's uniform viability threshold, §9).
pub const HP_LOST_VIABILITY_THRESHOLD: f64 = 90.0;

pub struct TargetCandidate<'a> {
    pub monster: &'a Monster,
    pub optimization: OptimizationResult,
}

pub fn find_best_combat_target<'a>(
    ctx: &OptimizeContext<'a>,
    character: &CombatStats,
) -> Option<TargetCandidate<'a>> {
    let mut best: Option<TargetCandidate<'a>> = None;
    for monster in ctx.catalog.monsters() {
        if monster.level > ctx.character_level {
            continue;
        }
        let optimization = optimize_for_monster(ctx, character, monster);
        let Some(outcome) = optimization.outcome else { continue };
        if !outcome.win || outcome.hp_lost_percent > HP_LOST_VIABILITY_THRESHOLD {
            continue;
        }
        let better = match &best {
            None => true,
            Some(current) => {
                let cur_outcome = current.optimization.outcome.unwrap();
                (monster.level, -(outcome.turns as i32), outcome.remaining_hp as i64)
                    > (
                        current.monster.level,
                        -(cur_outcome.turns as i32),
                        cur_outcome.remaining_hp as i64,
                    )
            }
        };
        if better {
            best = Some(TargetCandidate { monster, optimization });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::item::{CraftMaterial, CraftRecipe, ItemSubtype};

    fn weapon(code: &str, level: u32, atk: i32) -> Item {
        Item {
            code: code.into(),
            name: code.into(),
            item_type: ItemType::Weapon,
            subtype: None::<ItemSubtype>,
            level,
            effects: vec![crate::catalog::item::Effect {
                code: EffectCode::Attack(crate::catalog::item::Element::Fire),
                value: atk,
            }],
            craft: None,
        }
    }

    fn monster(code: &str, level: u32, hp: u32) -> Monster {
        Monster {
            code: code.into(),
            name: code.into(),
            level,
            hp,
            initiative: 0,
            crit_chance: 0.0,
            attack: HashMap::new(),
            resistance: HashMap::new(),
            status_effects: vec![],
            drops: vec![],
        }
    }

    fn base_character() -> CombatStats {
        CombatStats {
            hp: 100.0,
            max_hp: 100.0,
            initiative: 5,
            attack: HashMap::new(),
            resistance: HashMap::new(),
            dmg_bonus: HashMap::new(),
            dmg_all_bonus: 0,
            crit_chance: 0.0,
        }
    }

    #[test]
    fn weapon_phase_picks_highest_damage() {
        let catalog = Catalog::build(
            vec![weapon("stick", 1, 2), weapon("sword", 1, 20)],
            vec![],
            vec![],
        );
        let mut inv = HashMap::new();
        inv.insert("stick".to_string(), 1);
        inv.insert("sword".to_string(), 1);
        let equipped = HashMap::new();
        let ctx = OptimizeContext {
            catalog: &catalog,
            character_level: 5,
            planning_mode: false,
            equipped: &equipped,
            inventory_counts: &inv,
            bank_counts: &HashMap::new(),
        };
        let naked = base_character();
        let mon = monster_combat_stats(&monster("rat", 1, 10));
        let chosen = optimize_weapon(&ctx, &naked, &mon).unwrap();
        assert_eq!(chosen.code, "sword");
    }

    #[test]
    fn find_best_target_respects_hp_loss_cap() {
        let mut easy = monster("slime", 1, 5);
        easy.attack.insert(crate::catalog::item::Element::Fire, 1);
        let mut brutal = monster("dragon", 1, 5);
        brutal.attack.insert(crate::catalog::item::Element::Fire, 10_000);
        let catalog = Catalog::build(vec![weapon("sword", 1, 50)], vec![easy, brutal], vec![]);
        let mut inv = HashMap::new();
        inv.insert("sword".to_string(), 1);
        let equipped = HashMap::new();
        let ctx = OptimizeContext {
            catalog: &catalog,
            character_level: 5,
            planning_mode: false,
            equipped: &equipped,
            inventory_counts: &inv,
            bank_counts: &HashMap::new(),
        };
        let character = base_character();
        let target = find_best_combat_target(&ctx, &character).unwrap();
        assert_eq!(target.monster.code, "slime");
    }

    #[test]
    fn ring2_excludes_ring1_code_without_duplicate() {
        let ring = Item {
            code: "copper_ring".into(),
            name: "copper ring".into(),
            item_type: ItemType::Ring,
            subtype: None::<ItemSubtype>,
            level: 1,
            effects: vec![],
            craft: Some(CraftRecipe {
                skill: Skill::Jewelrycrafting,
                level: 1,
                yield_quantity: 1,
                materials: vec![CraftMaterial { code: "copper".into(), quantity: 1 }],
            }),
        };
        let catalog = Catalog::build(vec![ring], vec![], vec![]);
        let mut inv = HashMap::new();
        inv.insert("copper_ring".to_string(), 1);
        let equipped = HashMap::new();
        let ctx = OptimizeContext {
            catalog: &catalog,
            character_level: 5,
            planning_mode: false,
            equipped: &equipped,
            inventory_counts: &inv,
            bank_counts: &HashMap::new(),
        };
        assert!(!ctx.has_duplicate("copper_ring"));

        let candidates = ctx.candidates_for(ItemType::Ring);
        let running = base_character();
        let monster_stats = monster_combat_stats(&monster("rat", 1, 10));
        let mut filtered = candidates.clone();
        filtered.retain(|it| it.code != "copper_ring");
        assert!(filtered.is_empty());
        let (chosen, _) = best_slot_candidate(candidates, &running, &monster_stats);
        assert_eq!(chosen.unwrap().code, "copper_ring");
    }
}
