//! Character snapshot — the mutable per-actor record described in spec §3.
//! Exclusive to its character's control loop; exposed read-only to other
//! components through `CharacterSnapshot` clones (a read-only accessor, never
//! a shared mutable reference).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Skill {
    Mining,
    Woodcutting,
    Fishing,
    Cooking,
    Alchemy,
    Weaponcrafting,
    Gearcrafting,
    Jewelrycrafting,
}

pub const GATHERING_SKILLS: [Skill; 4] =
    [Skill::Mining, Skill::Woodcutting, Skill::Fishing, Skill::Alchemy];

pub const CRAFTING_SKILLS: [Skill; 5] = [
    Skill::Cooking,
    Skill::Alchemy,
    Skill::Weaponcrafting,
    Skill::Gearcrafting,
    Skill::Jewelrycrafting,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipSlot {
    Weapon,
    Shield,
    Helmet,
    BodyArmor,
    LegArmor,
    Boots,
    Ring1,
    Ring2,
    Amulet,
    Bag,
    Utility1,
    Utility2,
    Rune,
    Artifact1,
    Artifact2,
    Artifact3,
}

impl EquipSlot {
    pub const ALL: [EquipSlot; 16] = [
        EquipSlot::Weapon,
        EquipSlot::Shield,
        EquipSlot::Helmet,
        EquipSlot::BodyArmor,
        EquipSlot::LegArmor,
        EquipSlot::Boots,
        EquipSlot::Ring1,
        EquipSlot::Ring2,
        EquipSlot::Amulet,
        EquipSlot::Bag,
        EquipSlot::Utility1,
        EquipSlot::Utility2,
        EquipSlot::Rune,
        EquipSlot::Artifact1,
        EquipSlot::Artifact2,
        EquipSlot::Artifact3,
    ];

    /// The five slots the gear optimizer walks in its defensive phase.
    pub const DEFENSIVE: [EquipSlot; 5] = [
        EquipSlot::Shield,
        EquipSlot::Helmet,
        EquipSlot::BodyArmor,
        EquipSlot::LegArmor,
        EquipSlot::Boots,
    ];

    /// The three slots the gear optimizer walks in its accessory phase, in
    /// order — ring2 depends on ring1's pick (duplicate-copy rule).
    pub const ACCESSORY: [EquipSlot; 3] = [EquipSlot::Amulet, EquipSlot::Ring1, EquipSlot::Ring2];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySlot {
    pub code: String,
    pub qty: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    Monsters,
    Items,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub code: String,
    pub task_type: TaskType,
    pub progress: u32,
    pub total: u32,
    pub coins: u32,
}

/// One full server-reported state of a character. Refreshed after every
/// action via `applyActionResult`/`updateCharacter` on the Inventory Mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    pub name: String,
    pub position: Position,
    pub level: u32,
    pub hp: u32,
    pub max_hp: u32,
    pub xp: u64,
    pub skill_levels: HashMap<Skill, u32>,
    pub equipped: HashMap<EquipSlot, String>,
    /// Quantity carried in a utility slot (potions stack there).
    pub utility_qty: HashMap<EquipSlot, u32>,
    pub inventory_capacity: usize,
    pub inventory: Vec<InventorySlot>,
    pub task: Option<TaskState>,
    pub cooldown_expiration: DateTime<Utc>,
    pub gold: u64,
}

impl CharacterSnapshot {
    pub fn skill_level(&self, skill: Skill) -> u32 {
        self.skill_levels.get(&skill).copied().unwrap_or(0)
    }

    pub fn hp_percent(&self) -> f64 {
        if self.max_hp == 0 {
            return 0.0;
        }
        (self.hp as f64 / self.max_hp as f64) * 100.0
    }

    pub fn item_count(&self, code: &str) -> u32 {
        self.inventory
            .iter()
            .filter(|s| s.code == code)
            .map(|s| s.qty)
            .sum()
    }

    pub fn has_item(&self, code: &str, qty: u32) -> bool {
        self.item_count(code) >= qty
    }

    pub fn inventory_used_slots(&self) -> usize {
        self.inventory.len()
    }

    pub fn inventory_full(&self) -> bool {
        self.inventory_used_slots() >= self.inventory_capacity
    }

    pub fn equipped_code(&self, slot: EquipSlot) -> Option<&str> {
        self.equipped.get(&slot).map(|s| s.as_str())
    }

    pub fn on_cooldown_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.cooldown_expiration > now {
            Some(self.cooldown_expiration)
        } else {
            None
        }
    }

    pub fn has_task(&self) -> bool {
        self.task.is_some()
    }

    pub fn task_complete(&self) -> bool {
        self.task
            .as_ref()
            .map(|t| t.progress >= t.total)
            .unwrap_or(false)
    }

    pub fn task_coins(&self) -> u32 {
        self.task.as_ref().map(|t| t.coins).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap() -> CharacterSnapshot {
        CharacterSnapshot {
            name: "alice".into(),
            position: Position { x: 0, y: 0 },
            level: 5,
            hp: 50,
            max_hp: 100,
            xp: 0,
            skill_levels: HashMap::new(),
            equipped: HashMap::new(),
            utility_qty: HashMap::new(),
            inventory_capacity: 10,
            inventory: vec![InventorySlot { code: "iron_ore".into(), qty: 3 }],
            task: None,
            cooldown_expiration: Utc::now() - chrono::Duration::seconds(1),
            gold: 0,
        }
    }

    #[test]
    fn hp_percent_computed() {
        assert_eq!(snap().hp_percent(), 50.0);
    }

    #[test]
    fn item_count_sums_across_slots() {
        let mut s = snap();
        s.inventory.push(InventorySlot { code: "iron_ore".into(), qty: 2 });
        assert_eq!(s.item_count("iron_ore"), 5);
        assert!(s.has_item("iron_ore", 5));
        assert!(!s.has_item("iron_ore", 6));
    }

    #[test]
    fn cooldown_in_past_is_not_active() {
        let s = snap();
        assert!(s.on_cooldown_until(Utc::now()).is_none());
    }
}
