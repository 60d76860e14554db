use super::item::Element;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEffect {
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drop {
    pub item_code: String,
    /// 1-in-N drop rate.
    pub rate: u32,
    pub min_quantity: u32,
    pub max_quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monster {
    pub code: String,
    pub name: String,
    pub level: u32,
    pub hp: u32,
    pub initiative: i32,
    pub crit_chance: f64,
    pub attack: std::collections::HashMap<Element, i32>,
    pub resistance: std::collections::HashMap<Element, i32>,
    pub status_effects: Vec<StatusEffect>,
    pub drops: Vec<Drop>,
}

impl Monster {
    pub fn attack_value(&self, element: Element) -> i32 {
        self.attack.get(&element).copied().unwrap_or(0)
    }

    pub fn resistance_value(&self, element: Element) -> i32 {
        self.resistance.get(&element).copied().unwrap_or(0)
    }

    pub fn drops_item(&self, code: &str) -> bool {
        self.drops.iter().any(|d| d.item_code == code)
    }

    /// Coarse monster tier used only to gate potion config (`monster_types`,
    /// spec §4.7/§6). The catalog has no dedicated type field, so this is a
    /// derived heuristic (not server ground truth) from HP-per-level and the
    /// presence of status effects: a monster hitting well above its level's
    /// baseline HP, or carrying a status effect (poison, stun, ...), reads as
    /// tougher than a plain wild monster of the same level.
    pub fn category(&self) -> &'static str {
        let hp_per_level = if self.level == 0 { self.hp as f64 } else { self.hp as f64 / self.level as f64 };
        if hp_per_level >= 40.0 && !self.status_effects.is_empty() {
            "boss"
        } else if hp_per_level >= 20.0 || !self.status_effects.is_empty() {
            "elite"
        } else {
            "normal"
        }
    }
}
