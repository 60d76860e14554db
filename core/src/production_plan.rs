//! Recipe chain resolution: a depth-first walk over craft recipes with an
//! in-progress set for cycle detection, producing an ordered plan of
//! `{gather, craft, fight, bank}` steps that together produce a target item.

use crate::catalog::Catalog;
use crate::error::{EngineError, EngineResult};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStepKind {
    Gather,
    Craft,
    Fight,
    Bank,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub kind: PlanStepKind,
    pub item_code: String,
    pub quantity: u32,
    /// The resource, monster, or recipe code this step resolves against.
    /// `None` for a pure bank withdrawal.
    pub source_code: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProductionPlan {
    pub steps: Vec<PlanStep>,
}

struct Resolver<'a> {
    catalog: &'a Catalog,
    bank_remaining: HashMap<String, u32>,
    in_progress: HashSet<String>,
    steps: Vec<PlanStep>,
}

impl<'a> Resolver<'a> {
    /// Resolve `qty` of `item_code`, pushing every step needed onto `steps`
    /// in dependency order (materials before the craft that consumes them).
    fn resolve(&mut self, item_code: &str, qty: u32) -> EngineResult<()> {
        if qty == 0 {
            return Ok(());
        }
        if self.in_progress.contains(item_code) {
            return Err(EngineError::domain(format!(
                "recipe cycle detected resolving {item_code}"
            )));
        }

        let from_bank = {
            let entry = self.bank_remaining.entry(item_code.to_string()).or_insert(0);
            let taken = (*entry).min(qty);
            *entry -= taken;
            taken
        };
        if from_bank > 0 {
            self.steps.push(PlanStep {
                kind: PlanStepKind::Bank,
                item_code: item_code.to_string(),
                quantity: from_bank,
                source_code: None,
            });
        }
        let deficit = qty - from_bank;
        if deficit == 0 {
            return Ok(());
        }

        let item = self.catalog.item(item_code);

        if let Some(recipe) = item.and_then(|i| i.craft.as_ref()) {
            self.in_progress.insert(item_code.to_string());
            // yield_quantity batches production: round up to whole crafts.
            let batches = deficit.div_ceil(recipe.yield_quantity.max(1));
            for material in &recipe.materials {
                self.resolve(&material.code, material.quantity * batches)?;
            }
            self.in_progress.remove(item_code);
            self.steps.push(PlanStep {
                kind: PlanStepKind::Craft,
                item_code: item_code.to_string(),
                quantity: batches * recipe.yield_quantity.max(1),
                source_code: Some(item_code.to_string()),
            });
            return Ok(());
        }

        if let Some(resource_code) = self
            .catalog
            .resources_dropping(item_code)
            .iter()
            .min_by_key(|c| self.catalog.resource(c).map(|r| r.level).unwrap_or(u32::MAX))
        {
            self.steps.push(PlanStep {
                kind: PlanStepKind::Gather,
                item_code: item_code.to_string(),
                quantity: deficit,
                source_code: Some(resource_code.clone()),
            });
            return Ok(());
        }

        if let Some(monster_code) = self
            .catalog
            .monsters_dropping(item_code)
            .iter()
            .min_by_key(|c| self.catalog.monster(c).map(|m| m.level).unwrap_or(u32::MAX))
        {
            self.steps.push(PlanStep {
                kind: PlanStepKind::Fight,
                item_code: item_code.to_string(),
                quantity: deficit,
                source_code: Some(monster_code.clone()),
            });
            return Ok(());
        }

        Err(EngineError::domain(format!(
            "no production path for {item_code} (not craftable, gatherable, or dropped)"
        )))
    }
}

pub fn resolve_production_plan(
    catalog: &Catalog,
    item_code: &str,
    quantity: u32,
    bank_counts: &HashMap<String, u32>,
) -> EngineResult<ProductionPlan> {
    let mut resolver = Resolver {
        catalog,
        bank_remaining: bank_counts.clone(),
        in_progress: HashSet::new(),
        steps: Vec::new(),
    };
    resolver.resolve(item_code, quantity)?;
    Ok(ProductionPlan { steps: resolver.steps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::item::{CraftMaterial, CraftRecipe, Item, ItemType};
    use crate::model::character::Skill;

    fn craftable(code: &str, materials: &[(&str, u32)]) -> Item {
        Item {
            code: code.into(),
            name: code.into(),
            item_type: ItemType::Weapon,
            subtype: None,
            level: 1,
            effects: vec![],
            craft: Some(CraftRecipe {
                skill: Skill::Weaponcrafting,
                level: 1,
                yield_quantity: 1,
                materials: materials
                    .iter()
                    .map(|(c, q)| CraftMaterial { code: (*c).into(), quantity: *q })
                    .collect(),
            }),
        }
    }

    fn raw(code: &str) -> Item {
        Item {
            code: code.into(),
            name: code.into(),
            item_type: ItemType::Resource,
            subtype: None,
            level: 1,
            effects: vec![],
            craft: None,
        }
    }

    #[test]
    fn bank_only_resolves_to_a_single_bank_step() {
        let catalog = Catalog::build(vec![raw("iron_ore")], vec![], vec![]);
        let bank = HashMap::from([("iron_ore".to_string(), 10)]);
        let plan = resolve_production_plan(&catalog, "iron_ore", 5, &bank).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].kind, PlanStepKind::Bank);
        assert_eq!(plan.steps[0].quantity, 5);
    }

    #[test]
    fn material_with_no_production_path_is_a_domain_error() {
        let catalog = Catalog::build(
            vec![craftable("iron_sword", &[("iron_ore", 2)]), raw("iron_ore")],
            vec![],
            vec![],
        );
        let plan = resolve_production_plan(&catalog, "iron_sword", 1, &HashMap::new());
        assert!(plan.is_err());
    }

    #[test]
    fn craft_chain_with_gatherable_material_resolves_in_dependency_order() {
        use crate::catalog::resource::Resource;
        let resource = Resource {
            code: "iron_rocks".into(),
            name: "iron rocks".into(),
            skill: Skill::Mining,
            level: 1,
            drops: vec![crate::catalog::monster::Drop {
                item_code: "iron_ore".into(),
                rate: 1,
                min_quantity: 1,
                max_quantity: 1,
            }],
            location: None,
        };
        let catalog = Catalog::build(
            vec![craftable("iron_sword", &[("iron_ore", 2)]), raw("iron_ore")],
            vec![],
            vec![resource],
        );
        let plan = resolve_production_plan(&catalog, "iron_sword", 3, &HashMap::new()).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].kind, PlanStepKind::Gather);
        assert_eq!(plan.steps[0].quantity, 6);
        assert_eq!(plan.steps[1].kind, PlanStepKind::Craft);
        assert_eq!(plan.steps[1].quantity, 3);
    }

    #[test]
    fn self_referential_recipe_is_rejected_as_a_cycle() {
        let cyclic = craftable("loop_item", &[("loop_item", 1)]);
        let catalog = Catalog::build(vec![cyclic], vec![], vec![]);
        let result = resolve_production_plan(&catalog, "loop_item", 1, &HashMap::new());
        assert!(result.is_err());
    }
}
