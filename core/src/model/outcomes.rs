//! Sum types over action results (design note §9). Rather than untyped
//! result-dict inspection, every server action produces one tagged variant
//! carrying exactly the fields executors read.

use super::character::{CharacterSnapshot, Position};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct FightOutcome {
    pub win: bool,
    pub turns: u32,
    pub xp: u64,
    pub gold: u64,
    pub drops: Vec<(String, u32)>,
    pub final_hp: u32,
}

#[derive(Debug, Clone)]
pub struct GatherOutcome {
    pub items: Vec<(String, u32)>,
    pub xp: u64,
}

#[derive(Debug, Clone)]
pub struct CraftOutcome {
    pub item_code: String,
    pub quantity: u32,
    pub xp: u64,
}

#[derive(Debug, Clone)]
pub struct EquipOutcome {
    pub slot: super::character::EquipSlot,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct RestOutcome {
    pub hp: u32,
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub accepted: bool,
    pub completed: bool,
    pub cancelled: bool,
    pub coins_gained: u32,
}

#[derive(Debug, Clone)]
pub struct BankOutcome {
    pub deposited: Vec<(String, u32)>,
    pub withdrawn: Vec<(String, u32)>,
    pub gold_delta: i64,
}

#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub coins_spent: u32,
    pub item_code: String,
    pub quantity_gained: u32,
}

/// Every action an executor can issue produces one of these, always paired
/// with the resulting full snapshot (the server's authoritative refresh) and
/// the cooldown expiration to wait out before the next action.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Fight(FightOutcome),
    Gather(GatherOutcome),
    Craft(CraftOutcome),
    Equip(EquipOutcome),
    Move(MoveOutcome),
    Rest(RestOutcome),
    Task(TaskOutcome),
    Bank(BankOutcome),
    Exchange(ExchangeOutcome),
}

#[derive(Debug, Clone)]
pub struct ActionResult {
    pub outcome: ActionOutcome,
    pub snapshot: CharacterSnapshot,
    pub cooldown_expiration: DateTime<Utc>,
}
