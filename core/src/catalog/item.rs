use crate::model::character::EquipSlot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Weapon,
    Shield,
    Helmet,
    BodyArmor,
    LegArmor,
    Boots,
    Ring,
    Amulet,
    Bag,
    Consumable,
    Utility,
    Resource,
    Rune,
    Artifact,
    /// Any wire item type the catalog loader doesn't recognize; treated as
    /// non-equipment and sorted into the order board's `resource` bucket.
    Other,
}

impl ItemType {
    /// The equip slot family this item type occupies, if any (rings and the
    /// two utility slots have more than one physical slot; callers resolve
    /// the specific slot index separately).
    pub fn equip_slot(self) -> Option<EquipSlot> {
        match self {
            ItemType::Weapon => Some(EquipSlot::Weapon),
            ItemType::Shield => Some(EquipSlot::Shield),
            ItemType::Helmet => Some(EquipSlot::Helmet),
            ItemType::BodyArmor => Some(EquipSlot::BodyArmor),
            ItemType::LegArmor => Some(EquipSlot::LegArmor),
            ItemType::Boots => Some(EquipSlot::Boots),
            ItemType::Ring => Some(EquipSlot::Ring1),
            ItemType::Amulet => Some(EquipSlot::Amulet),
            ItemType::Bag => Some(EquipSlot::Bag),
            ItemType::Rune => Some(EquipSlot::Rune),
            _ => None,
        }
    }

    /// Equipment-bearing types (as opposed to consumables/resources/utility).
    pub fn is_equipment(self) -> bool {
        matches!(
            self,
            ItemType::Weapon
                | ItemType::Shield
                | ItemType::Helmet
                | ItemType::BodyArmor
                | ItemType::LegArmor
                | ItemType::Boots
                | ItemType::Ring
                | ItemType::Amulet
                | ItemType::Bag
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSubtype {
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectCode {
    /// Elemental or flat attack value, e.g. `attack_fire`.
    Attack(Element),
    /// Elemental or flat damage-bonus percentage, e.g. `dmg_fire`.
    Dmg(Element),
    /// Flat, non-elemental damage bonus percentage.
    DmgAll,
    /// Elemental resistance percentage.
    Res(Element),
    Hp,
    Haste,
    Prospecting,
    InventorySpace,
    Restore,
    SplashRestore,
    /// A gathering-skill tool marker, e.g. `mining` on a tool-subtype weapon.
    ToolFor(crate::model::character::Skill),
    CriticalStrike,
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Element {
    Fire,
    Earth,
    Water,
    Air,
}

pub const ELEMENTS: [Element; 4] = [Element::Fire, Element::Earth, Element::Water, Element::Air];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Effect {
    pub code: EffectCode,
    pub value: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CraftMaterial {
    pub code: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CraftRecipe {
    pub skill: crate::model::character::Skill,
    pub level: u32,
    pub yield_quantity: u32,
    pub materials: Vec<CraftMaterial>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub code: String,
    pub name: String,
    pub item_type: ItemType,
    pub subtype: Option<ItemSubtype>,
    pub level: u32,
    pub effects: Vec<Effect>,
    pub craft: Option<CraftRecipe>,
}

impl Item {
    pub fn effect_value(&self, code: &EffectCode) -> i32 {
        self.effects
            .iter()
            .filter(|e| &e.code == code)
            .map(|e| e.value)
            .sum()
    }

    pub fn is_gathering_tool_for(&self, skill: crate::model::character::Skill) -> bool {
        self.subtype == Some(ItemSubtype::Tool)
            && self.item_type == ItemType::Weapon
            && self
                .effects
                .iter()
                .any(|e| matches!(&e.code, EffectCode::ToolFor(s) if *s == skill))
    }

    pub fn is_craftable(&self) -> bool {
        self.craft.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equip_slot_mapping() {
        assert_eq!(ItemType::Weapon.equip_slot(), Some(EquipSlot::Weapon));
        assert_eq!(ItemType::Consumable.equip_slot(), None);
    }

    #[test]
    fn effect_value_sums_matching_codes() {
        let item = Item {
            code: "x".into(),
            name: "X".into(),
            item_type: ItemType::Weapon,
            subtype: None,
            level: 1,
            effects: vec![
                Effect { code: EffectCode::Attack(Element::Fire), value: 10 },
                Effect { code: EffectCode::Attack(Element::Fire), value: 5 },
                Effect { code: EffectCode::Attack(Element::Water), value: 3 },
            ],
            craft: None,
        };
        assert_eq!(item.effect_value(&EffectCode::Attack(Element::Fire)), 15);
    }
}
