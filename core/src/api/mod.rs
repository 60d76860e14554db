//! HTTP collaborator for the game API (spec §6): one typed method per action
//! and catalog/account endpoint, translating wire DTOs into the domain types
//! under `crate::model` and `crate::catalog`. Retries transient failures
//! internally via `retry`; callers only ever see a final success or a single
//! [`EngineError`].

pub mod retry;

use crate::catalog::item::{CraftMaterial, CraftRecipe, Effect, EffectCode, Element, Item, ItemSubtype, ItemType};
use crate::catalog::monster::{Drop, Monster};
use crate::catalog::resource::Resource;
use crate::error::{EngineError, EngineResult};
use crate::model::character::{CharacterSnapshot, EquipSlot, InventorySlot, Position, Skill, TaskState, TaskType};
use crate::model::outcomes::{
    ActionOutcome, ActionResult, BankOutcome, CraftOutcome, EquipOutcome, ExchangeOutcome,
    FightOutcome, GatherOutcome, MoveOutcome, RestOutcome, TaskOutcome,
};
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Thin wrapper over `reqwest::Client`; one instance is shared across every
/// character loop (the underlying connection pool is already cheap to clone,
/// but we hand out `&GameClient` rather than cloning it per call).
pub struct GameClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl GameClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    async fn send<B: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> EngineResult<R> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;
        loop {
            let mut req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.token);
            if let Some(body) = body {
                req = req.json(body);
            }

            let response = req.send().await?;
            let status = response.status();

            if status.is_success() {
                let wrapper: Wrapper<R> = response.json().await?;
                return Ok(wrapper.data);
            }

            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(retry::parse_retry_after);

            let (code, message) = parse_error_body(response).await;

            if attempt < retry::MAX_RETRIES && retry::is_retryable_status(status.as_u16()) {
                let delay = retry::backoff_delay(attempt, retry_after);
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Err(EngineError::api(status.as_u16(), code, message));
        }
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> EngineResult<R> {
        self.send::<(), R>(Method::GET, path, None).await
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> EngineResult<R> {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn post_empty<R: DeserializeOwned>(&self, path: &str) -> EngineResult<R> {
        self.send::<(), R>(Method::POST, path, None).await
    }

    // ── Character ────────────────────────────────────────────────────────

    pub async fn character(&self, name: &str) -> EngineResult<CharacterSnapshot> {
        let wire: CharacterWire = self.get(&format!("/characters/{name}")).await?;
        Ok(wire.into())
    }

    // ── Actions ──────────────────────────────────────────────────────────

    pub async fn r#move(&self, name: &str, x: i32, y: i32) -> EngineResult<ActionResult> {
        let wire: MoveWire = self
            .post(&format!("/my/{name}/action/move"), &MoveRequest { x, y })
            .await?;
        Ok(into_action_result(
            ActionOutcome::Move(MoveOutcome {
                position: Position { x: wire.character.x, y: wire.character.y },
            }),
            wire.character.clone().into(),
            wire.cooldown,
        ))
    }

    pub async fn fight(&self, name: &str) -> EngineResult<ActionResult> {
        let wire: FightWire = self.post_empty(&format!("/my/{name}/action/fight")).await?;
        let outcome = FightOutcome {
            win: wire.fight.result == "win",
            turns: wire.fight.turns,
            xp: wire.fight.xp,
            gold: wire.fight.gold,
            drops: wire.fight.drops.into_iter().map(|d| (d.code, d.quantity)).collect(),
            final_hp: wire.character.hp,
        };
        Ok(into_action_result(ActionOutcome::Fight(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn gather(&self, name: &str) -> EngineResult<ActionResult> {
        let wire: GatherWire = self.post_empty(&format!("/my/{name}/action/gathering")).await?;
        let outcome = GatherOutcome {
            items: wire.details.items.into_iter().map(|i| (i.code, i.quantity)).collect(),
            xp: wire.details.xp,
        };
        Ok(into_action_result(ActionOutcome::Gather(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn rest(&self, name: &str) -> EngineResult<ActionResult> {
        let wire: RestWire = self.post_empty(&format!("/my/{name}/action/rest")).await?;
        let outcome = RestOutcome { hp: wire.character.hp };
        Ok(into_action_result(ActionOutcome::Rest(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn equip(&self, name: &str, code: &str, slot: EquipSlot) -> EngineResult<ActionResult> {
        self.equip_with_quantity(name, code, slot, None).await
    }

    /// Utility slots stack (spec §3 "utility slot quantity"): equipping a
    /// potion there takes how many copies to load in one call, unlike every
    /// other slot which only ever holds one item.
    pub async fn equip_with_quantity(
        &self,
        name: &str,
        code: &str,
        slot: EquipSlot,
        quantity: Option<u32>,
    ) -> EngineResult<ActionResult> {
        let wire: EquipWire = self
            .post(
                &format!("/my/{name}/action/equip"),
                &EquipRequest { code: code.to_string(), slot: slot_to_wire(slot), quantity },
            )
            .await?;
        let outcome = EquipOutcome { slot, code: code.to_string() };
        Ok(into_action_result(ActionOutcome::Equip(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn unequip(&self, name: &str, slot: EquipSlot) -> EngineResult<ActionResult> {
        let wire: UnequipWire = self
            .post(
                &format!("/my/{name}/action/unequip"),
                &UnequipRequest { slot: slot_to_wire(slot) },
            )
            .await?;
        let code = wire.item.code.clone();
        let outcome = EquipOutcome { slot, code };
        Ok(into_action_result(ActionOutcome::Equip(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn use_item(&self, name: &str, code: &str, quantity: u32) -> EngineResult<ActionResult> {
        let wire: UseItemWire = self
            .post(
                &format!("/my/{name}/action/use"),
                &UseItemRequest { code: code.to_string(), quantity },
            )
            .await?;
        let outcome = RestOutcome { hp: wire.character.hp };
        Ok(into_action_result(ActionOutcome::Rest(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn craft(&self, name: &str, code: &str, quantity: u32) -> EngineResult<ActionResult> {
        let wire: CraftWire = self
            .post(
                &format!("/my/{name}/action/crafting"),
                &CraftRequest { code: code.to_string(), quantity },
            )
            .await?;
        let outcome = CraftOutcome {
            item_code: code.to_string(),
            quantity: wire.details.xp.max(1).min(quantity.max(1)).min(quantity),
            xp: wire.details.xp,
        };
        Ok(into_action_result(ActionOutcome::Craft(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn recycle(&self, name: &str, code: &str, quantity: u32) -> EngineResult<ActionResult> {
        let wire: CraftWire = self
            .post(
                &format!("/my/{name}/action/recycling"),
                &CraftRequest { code: code.to_string(), quantity },
            )
            .await?;
        let outcome = CraftOutcome { item_code: code.to_string(), quantity, xp: wire.details.xp };
        Ok(into_action_result(ActionOutcome::Craft(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn accept_task(&self, name: &str) -> EngineResult<ActionResult> {
        let wire: TaskWire = self.post_empty(&format!("/my/{name}/action/task/new")).await?;
        let outcome = TaskOutcome { accepted: true, completed: false, cancelled: false, coins_gained: 0 };
        Ok(into_action_result(ActionOutcome::Task(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn complete_task(&self, name: &str) -> EngineResult<ActionResult> {
        let wire: TaskRewardWire = self.post_empty(&format!("/my/{name}/action/task/complete")).await?;
        let outcome = TaskOutcome {
            accepted: false,
            completed: true,
            cancelled: false,
            coins_gained: wire.reward.gold,
        };
        Ok(into_action_result(ActionOutcome::Task(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn cancel_task(&self, name: &str) -> EngineResult<ActionResult> {
        let wire: TaskWire = self.post_empty(&format!("/my/{name}/action/task/cancel")).await?;
        let outcome = TaskOutcome { accepted: false, completed: false, cancelled: true, coins_gained: 0 };
        Ok(into_action_result(ActionOutcome::Task(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn task_exchange(&self, name: &str) -> EngineResult<ActionResult> {
        let wire: TaskExchangeWire = self.post_empty(&format!("/my/{name}/action/task/exchange")).await?;
        let outcome = ExchangeOutcome {
            coins_spent: wire.exchange_cost,
            item_code: wire.reward.code.clone(),
            quantity_gained: wire.reward.quantity,
        };
        Ok(into_action_result(ActionOutcome::Exchange(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn task_trade(&self, name: &str, code: &str, quantity: u32) -> EngineResult<ActionResult> {
        let wire: TaskWire = self
            .post(
                &format!("/my/{name}/action/task/trade"),
                &TaskTradeRequest { code: code.to_string(), quantity },
            )
            .await?;
        let outcome = TaskOutcome { accepted: false, completed: false, cancelled: false, coins_gained: 0 };
        Ok(into_action_result(ActionOutcome::Task(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn deposit_bank(&self, name: &str, code: &str, quantity: u32) -> EngineResult<ActionResult> {
        let wire: BankWire = self
            .post(
                &format!("/my/{name}/action/bank/deposit"),
                &ItemQuantityRequest { code: code.to_string(), quantity },
            )
            .await?;
        let outcome = BankOutcome { deposited: vec![(code.to_string(), quantity)], withdrawn: vec![], gold_delta: 0 };
        Ok(into_action_result(ActionOutcome::Bank(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn withdraw_bank(&self, name: &str, code: &str, quantity: u32) -> EngineResult<ActionResult> {
        let wire: BankWire = self
            .post(
                &format!("/my/{name}/action/bank/withdraw"),
                &ItemQuantityRequest { code: code.to_string(), quantity },
            )
            .await?;
        let outcome = BankOutcome { deposited: vec![], withdrawn: vec![(code.to_string(), quantity)], gold_delta: 0 };
        Ok(into_action_result(ActionOutcome::Bank(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn deposit_gold(&self, name: &str, quantity: u64) -> EngineResult<ActionResult> {
        let wire: BankWire = self
            .post(&format!("/my/{name}/action/bank/deposit/gold"), &GoldRequest { quantity })
            .await?;
        let outcome = BankOutcome { deposited: vec![], withdrawn: vec![], gold_delta: -(quantity as i64) };
        Ok(into_action_result(ActionOutcome::Bank(outcome), wire.character.clone().into(), wire.cooldown))
    }

    pub async fn withdraw_gold(&self, name: &str, quantity: u64) -> EngineResult<ActionResult> {
        let wire: BankWire = self
            .post(&format!("/my/{name}/action/bank/withdraw/gold"), &GoldRequest { quantity })
            .await?;
        let outcome = BankOutcome { deposited: vec![], withdrawn: vec![], gold_delta: quantity as i64 };
        Ok(into_action_result(ActionOutcome::Bank(outcome), wire.character.clone().into(), wire.cooldown))
    }

    // ── Catalog (paginated, fetched in full) ────────────────────────────

    pub async fn items(&self) -> EngineResult<Vec<Item>> {
        let pages: Vec<ItemWire> = self.fetch_all_pages("/items").await?;
        Ok(pages.into_iter().map(Into::into).collect())
    }

    pub async fn monsters(&self) -> EngineResult<Vec<Monster>> {
        let pages: Vec<MonsterWire> = self.fetch_all_pages("/monsters").await?;
        Ok(pages.into_iter().map(Into::into).collect())
    }

    pub async fn resources(&self) -> EngineResult<Vec<Resource>> {
        let pages: Vec<ResourceWire> = self.fetch_all_pages("/resources").await?;
        Ok(pages.into_iter().map(Into::into).collect())
    }

    pub async fn maps(&self) -> EngineResult<Vec<MapLocation>> {
        self.fetch_all_pages("/maps").await
    }

    pub async fn task_rewards(&self) -> EngineResult<Vec<TaskReward>> {
        self.fetch_all_pages("/tasks/rewards").await
    }

    pub async fn bank_items(&self) -> EngineResult<HashMap<String, u32>> {
        let rows: Vec<BankItemRow> = self.fetch_all_pages("/my/bank/items").await?;
        Ok(rows.into_iter().map(|r| (r.code, r.quantity)).collect())
    }

    // ── Account ──────────────────────────────────────────────────────────

    pub async fn account_details(&self) -> EngineResult<AccountDetails> {
        self.get("/my/details").await
    }

    pub async fn account_achievements(&self) -> EngineResult<Vec<AchievementProgress>> {
        self.fetch_all_pages("/my/achievements").await
    }

    async fn fetch_all_pages<R: DeserializeOwned>(&self, path: &str) -> EngineResult<Vec<R>> {
        let mut page = 1u32;
        let mut all = Vec::new();
        loop {
            let url = format!("{path}?page={page}&size=100");
            let wrapper: PagedWrapper<R> = self.get(&url).await?;
            let got = wrapper.data.len();
            all.extend(wrapper.data);
            if got < 100 || wrapper.pages.map(|p| page >= p).unwrap_or(got == 0) {
                break;
            }
            page += 1;
        }
        Ok(all)
    }
}

async fn parse_error_body(response: reqwest::Response) -> (Option<u32>, String) {
    let status = response.status();
    match response.json::<ErrorWrapper>().await {
        Ok(body) => (Some(body.error.code), body.error.message),
        Err(_) => (None, status.canonical_reason().unwrap_or("unknown error").to_string()),
    }
}

fn into_action_result(
    outcome: ActionOutcome,
    snapshot: CharacterSnapshot,
    cooldown: CooldownWire,
) -> ActionResult {
    ActionResult { outcome, snapshot, cooldown_expiration: cooldown.expiration }
}

// ── Wire envelope ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Wrapper<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct PagedWrapper<T> {
    data: Vec<T>,
    pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: u32,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CooldownWire {
    expiration: DateTime<Utc>,
}

// ── Character wire shape ─────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct CharacterWire {
    name: String,
    x: i32,
    y: i32,
    level: u32,
    hp: u32,
    max_hp: u32,
    xp: u64,
    gold: u64,
    inventory_max_items: usize,
    mining_level: u32,
    woodcutting_level: u32,
    fishing_level: u32,
    cooking_level: u32,
    alchemy_level: u32,
    weaponcrafting_level: u32,
    gearcrafting_level: u32,
    jewelrycrafting_level: u32,
    weapon_slot: String,
    shield_slot: String,
    helmet_slot: String,
    body_armor_slot: String,
    leg_armor_slot: String,
    boots_slot: String,
    ring1_slot: String,
    ring2_slot: String,
    amulet_slot: String,
    bag_slot: String,
    utility1_slot: String,
    utility1_slot_quantity: u32,
    utility2_slot: String,
    utility2_slot_quantity: u32,
    rune_slot: String,
    artifact1_slot: String,
    artifact2_slot: String,
    artifact3_slot: String,
    inventory: Vec<InventorySlotWire>,
    task: String,
    task_type: String,
    task_progress: u32,
    task_total: u32,
    cooldown_expiration: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
struct InventorySlotWire {
    code: String,
    quantity: u32,
}

impl From<CharacterWire> for CharacterSnapshot {
    fn from(w: CharacterWire) -> Self {
        let mut skill_levels = HashMap::new();
        skill_levels.insert(Skill::Mining, w.mining_level);
        skill_levels.insert(Skill::Woodcutting, w.woodcutting_level);
        skill_levels.insert(Skill::Fishing, w.fishing_level);
        skill_levels.insert(Skill::Cooking, w.cooking_level);
        skill_levels.insert(Skill::Alchemy, w.alchemy_level);
        skill_levels.insert(Skill::Weaponcrafting, w.weaponcrafting_level);
        skill_levels.insert(Skill::Gearcrafting, w.gearcrafting_level);
        skill_levels.insert(Skill::Jewelrycrafting, w.jewelrycrafting_level);

        let mut equipped = HashMap::new();
        let mut insert_slot = |slot: EquipSlot, code: &str| {
            if !code.is_empty() {
                equipped.insert(slot, code.to_string());
            }
        };
        insert_slot(EquipSlot::Weapon, &w.weapon_slot);
        insert_slot(EquipSlot::Shield, &w.shield_slot);
        insert_slot(EquipSlot::Helmet, &w.helmet_slot);
        insert_slot(EquipSlot::BodyArmor, &w.body_armor_slot);
        insert_slot(EquipSlot::LegArmor, &w.leg_armor_slot);
        insert_slot(EquipSlot::Boots, &w.boots_slot);
        insert_slot(EquipSlot::Ring1, &w.ring1_slot);
        insert_slot(EquipSlot::Ring2, &w.ring2_slot);
        insert_slot(EquipSlot::Amulet, &w.amulet_slot);
        insert_slot(EquipSlot::Bag, &w.bag_slot);
        insert_slot(EquipSlot::Utility1, &w.utility1_slot);
        insert_slot(EquipSlot::Utility2, &w.utility2_slot);
        insert_slot(EquipSlot::Rune, &w.rune_slot);
        insert_slot(EquipSlot::Artifact1, &w.artifact1_slot);
        insert_slot(EquipSlot::Artifact2, &w.artifact2_slot);
        insert_slot(EquipSlot::Artifact3, &w.artifact3_slot);

        let mut utility_qty = HashMap::new();
        if !w.utility1_slot.is_empty() {
            utility_qty.insert(EquipSlot::Utility1, w.utility1_slot_quantity);
        }
        if !w.utility2_slot.is_empty() {
            utility_qty.insert(EquipSlot::Utility2, w.utility2_slot_quantity);
        }

        let task = if w.task.is_empty() {
            None
        } else {
            Some(TaskState {
                code: w.task,
                task_type: if w.task_type == "monsters" { TaskType::Monsters } else { TaskType::Items },
                progress: w.task_progress,
                total: w.task_total,
                coins: 0,
            })
        };

        CharacterSnapshot {
            name: w.name,
            position: Position { x: w.x, y: w.y },
            level: w.level,
            hp: w.hp,
            max_hp: w.max_hp,
            xp: w.xp,
            skill_levels,
            equipped,
            utility_qty,
            inventory_capacity: w.inventory_max_items,
            inventory: w
                .inventory
                .into_iter()
                .filter(|s| !s.code.is_empty())
                .map(|s| InventorySlot { code: s.code, qty: s.quantity })
                .collect(),
            task,
            cooldown_expiration: w.cooldown_expiration,
            gold: w.gold,
        }
    }
}

fn slot_to_wire(slot: EquipSlot) -> &'static str {
    match slot {
        EquipSlot::Weapon => "weapon",
        EquipSlot::Shield => "shield",
        EquipSlot::Helmet => "helmet",
        EquipSlot::BodyArmor => "body_armor",
        EquipSlot::LegArmor => "leg_armor",
        EquipSlot::Boots => "boots",
        EquipSlot::Ring1 => "ring1",
        EquipSlot::Ring2 => "ring2",
        EquipSlot::Amulet => "amulet",
        EquipSlot::Bag => "bag",
        EquipSlot::Utility1 => "utility1",
        EquipSlot::Utility2 => "utility2",
        EquipSlot::Rune => "rune",
        EquipSlot::Artifact1 => "artifact1",
        EquipSlot::Artifact2 => "artifact2",
        EquipSlot::Artifact3 => "artifact3",
    }
}

// ── Action request/response bodies ───────────────────────────────────────

#[derive(Debug, Serialize)]
struct MoveRequest {
    x: i32,
    y: i32,
}

#[derive(Debug, Deserialize)]
struct MoveWire {
    cooldown: CooldownWire,
    character: CharacterWire,
}

#[derive(Debug, Deserialize)]
struct FightDetails {
    result: String,
    turns: u32,
    xp: u64,
    gold: u64,
    #[serde(default)]
    drops: Vec<DropRow>,
}

#[derive(Debug, Deserialize)]
struct DropRow {
    code: String,
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct FightWire {
    cooldown: CooldownWire,
    character: CharacterWire,
    fight: FightDetails,
}

#[derive(Debug, Deserialize)]
struct GatherDetails {
    xp: u64,
    #[serde(default)]
    items: Vec<DropRow>,
}

#[derive(Debug, Deserialize)]
struct GatherWire {
    cooldown: CooldownWire,
    character: CharacterWire,
    details: GatherDetails,
}

#[derive(Debug, Deserialize)]
struct RestWire {
    cooldown: CooldownWire,
    character: CharacterWire,
}

#[derive(Debug, Serialize)]
struct EquipRequest {
    code: String,
    slot: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quantity: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EquipWire {
    cooldown: CooldownWire,
    character: CharacterWire,
}

#[derive(Debug, Serialize)]
struct UnequipRequest {
    slot: &'static str,
}

#[derive(Debug, Deserialize)]
struct UnequipItem {
    code: String,
}

#[derive(Debug, Deserialize)]
struct UnequipWire {
    cooldown: CooldownWire,
    character: CharacterWire,
    item: UnequipItem,
}

#[derive(Debug, Serialize)]
struct UseItemRequest {
    code: String,
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct UseItemWire {
    cooldown: CooldownWire,
    character: CharacterWire,
}

#[derive(Debug, Serialize)]
struct CraftRequest {
    code: String,
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct CraftDetails {
    #[serde(default)]
    xp: u64,
}

#[derive(Debug, Deserialize)]
struct CraftWire {
    cooldown: CooldownWire,
    character: CharacterWire,
    details: CraftDetails,
}

#[derive(Debug, Deserialize)]
struct TaskWire {
    cooldown: CooldownWire,
    character: CharacterWire,
}

#[derive(Debug, Deserialize)]
struct TaskRewardDetails {
    gold: u32,
}

#[derive(Debug, Deserialize)]
struct TaskRewardWire {
    cooldown: CooldownWire,
    character: CharacterWire,
    reward: TaskRewardDetails,
}

#[derive(Debug, Deserialize)]
struct TaskExchangeReward {
    code: String,
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct TaskExchangeWire {
    cooldown: CooldownWire,
    character: CharacterWire,
    #[serde(default)]
    exchange_cost: u32,
    reward: TaskExchangeReward,
}

#[derive(Debug, Serialize)]
struct TaskTradeRequest {
    code: String,
    quantity: u32,
}

#[derive(Debug, Serialize)]
struct ItemQuantityRequest {
    code: String,
    quantity: u32,
}

#[derive(Debug, Serialize)]
struct GoldRequest {
    quantity: u64,
}

#[derive(Debug, Deserialize)]
struct BankWire {
    cooldown: CooldownWire,
    character: CharacterWire,
}

// ── Catalog wire shapes ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EffectWire {
    code: String,
    value: i32,
}

#[derive(Debug, Deserialize)]
struct CraftMaterialWire {
    code: String,
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct CraftWireInfo {
    skill: String,
    level: u32,
    #[serde(default = "default_yield")]
    quantity: u32,
    items: Vec<CraftMaterialWire>,
}

fn default_yield() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct ItemWire {
    code: String,
    name: String,
    #[serde(rename = "type")]
    item_type: String,
    subtype: Option<String>,
    level: u32,
    #[serde(default)]
    effects: Vec<EffectWire>,
    craft: Option<CraftWireInfo>,
}

impl From<ItemWire> for Item {
    fn from(w: ItemWire) -> Self {
        Item {
            code: w.code,
            name: w.name,
            item_type: item_type_from_wire(&w.item_type),
            subtype: w.subtype.as_deref().and_then(subtype_from_wire),
            level: w.level,
            effects: w.effects.into_iter().filter_map(effect_from_wire).collect(),
            craft: w.craft.map(|c| CraftRecipe {
                skill: skill_from_wire(&c.skill),
                level: c.level,
                yield_quantity: c.quantity,
                materials: c
                    .items
                    .into_iter()
                    .map(|m| CraftMaterial { code: m.code, quantity: m.quantity })
                    .collect(),
            }),
        }
    }
}

fn item_type_from_wire(s: &str) -> ItemType {
    match s {
        "weapon" => ItemType::Weapon,
        "shield" => ItemType::Shield,
        "helmet" => ItemType::Helmet,
        "body_armor" => ItemType::BodyArmor,
        "leg_armor" => ItemType::LegArmor,
        "boots" => ItemType::Boots,
        "amulet" => ItemType::Amulet,
        "ring" => ItemType::Ring,
        "bag" => ItemType::Bag,
        "utility" => ItemType::Utility,
        "resource" => ItemType::Resource,
        "consumable" => ItemType::Consumable,
        _ => ItemType::Other,
    }
}

fn subtype_from_wire(s: &str) -> Option<ItemSubtype> {
    match s {
        "mining" | "woodcutting" | "fishing" | "alchemy" => Some(ItemSubtype::Tool),
        _ => None,
    }
}

/// Tool-subtype weapons carry their gathering skill as a wire effect code
/// of the same name (`mining`, `woodcutting`, `fishing`, `alchemy`); the
/// domain model represents that as `EffectCode::ToolFor`.
fn gathering_skill_from_wire(s: &str) -> Option<Skill> {
    match s {
        "mining" => Some(Skill::Mining),
        "woodcutting" => Some(Skill::Woodcutting),
        "fishing" => Some(Skill::Fishing),
        "alchemy" => Some(Skill::Alchemy),
        _ => None,
    }
}

fn skill_from_wire(s: &str) -> Skill {
    match s {
        "mining" => Skill::Mining,
        "woodcutting" => Skill::Woodcutting,
        "fishing" => Skill::Fishing,
        "cooking" => Skill::Cooking,
        "alchemy" => Skill::Alchemy,
        "weaponcrafting" => Skill::Weaponcrafting,
        "gearcrafting" => Skill::Gearcrafting,
        _ => Skill::Jewelrycrafting,
    }
}

fn effect_from_wire(w: EffectWire) -> Option<Effect> {
    let code = match w.code.as_str() {
        "attack_fire" => EffectCode::Attack(Element::Fire),
        "attack_earth" => EffectCode::Attack(Element::Earth),
        "attack_water" => EffectCode::Attack(Element::Water),
        "attack_air" => EffectCode::Attack(Element::Air),
        "dmg_fire" => EffectCode::Dmg(Element::Fire),
        "dmg_earth" => EffectCode::Dmg(Element::Earth),
        "dmg_water" => EffectCode::Dmg(Element::Water),
        "dmg_air" => EffectCode::Dmg(Element::Air),
        "dmg" => EffectCode::DmgAll,
        "res_fire" => EffectCode::Res(Element::Fire),
        "res_earth" => EffectCode::Res(Element::Earth),
        "res_water" => EffectCode::Res(Element::Water),
        "res_air" => EffectCode::Res(Element::Air),
        "hp" => EffectCode::Hp,
        "haste" => EffectCode::Haste,
        "prospecting" => EffectCode::Prospecting,
        "critical_strike" => EffectCode::CriticalStrike,
        "restore" => EffectCode::Restore,
        "splash_restore" => EffectCode::SplashRestore,
        "boost_inventory_space" => EffectCode::InventorySpace,
        other => match gathering_skill_from_wire(other) {
            Some(skill) => EffectCode::ToolFor(skill),
            None => EffectCode::Other(other.to_string()),
        },
    };
    Some(Effect { code, value: w.value })
}

#[derive(Debug, Deserialize)]
struct MonsterWire {
    code: String,
    name: String,
    level: u32,
    hp: u32,
    #[serde(default)]
    attack_fire: i32,
    #[serde(default)]
    attack_earth: i32,
    #[serde(default)]
    attack_water: i32,
    #[serde(default)]
    attack_air: i32,
    #[serde(default)]
    res_fire: i32,
    #[serde(default)]
    res_earth: i32,
    #[serde(default)]
    res_water: i32,
    #[serde(default)]
    res_air: i32,
    #[serde(default)]
    critical_strike: i32,
    #[serde(default)]
    drops: Vec<MonsterDropWire>,
}

#[derive(Debug, Deserialize)]
struct MonsterDropWire {
    code: String,
    rate: u32,
    min_quantity: u32,
    max_quantity: u32,
}

impl From<MonsterWire> for Monster {
    fn from(w: MonsterWire) -> Self {
        let mut attack = HashMap::new();
        attack.insert(Element::Fire, w.attack_fire);
        attack.insert(Element::Earth, w.attack_earth);
        attack.insert(Element::Water, w.attack_water);
        attack.insert(Element::Air, w.attack_air);

        let mut resistance = HashMap::new();
        resistance.insert(Element::Fire, w.res_fire);
        resistance.insert(Element::Earth, w.res_earth);
        resistance.insert(Element::Water, w.res_water);
        resistance.insert(Element::Air, w.res_air);

        Monster {
            code: w.code,
            name: w.name,
            level: w.level,
            hp: w.hp,
            initiative: 0,
            crit_chance: w.critical_strike as f64,
            attack,
            resistance,
            status_effects: Vec::new(),
            drops: w
                .drops
                .into_iter()
                .map(|d| Drop {
                    item_code: d.code,
                    rate: d.rate,
                    min_quantity: d.min_quantity,
                    max_quantity: d.max_quantity,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResourceWire {
    code: String,
    name: String,
    skill: String,
    level: u32,
    #[serde(default)]
    drops: Vec<MonsterDropWire>,
}

impl From<ResourceWire> for Resource {
    fn from(w: ResourceWire) -> Self {
        Resource {
            code: w.code,
            name: w.name,
            skill: skill_from_wire(&w.skill),
            level: w.level,
            drops: w
                .drops
                .into_iter()
                .map(|d| Drop {
                    item_code: d.code,
                    rate: d.rate,
                    min_quantity: d.min_quantity,
                    max_quantity: d.max_quantity,
                })
                .collect(),
            location: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapLocation {
    pub x: i32,
    pub y: i32,
    pub content_type: Option<String>,
    pub content_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskReward {
    pub code: String,
    pub rate: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct BankItemRow {
    code: String,
    quantity: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountDetails {
    pub username: String,
    pub gold: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AchievementProgress {
    pub code: String,
    pub completed: bool,
    #[serde(default)]
    pub current: u32,
    #[serde(default)]
    pub total: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_wire_names_round_trip_through_known_set() {
        for slot in EquipSlot::ALL {
            let name = slot_to_wire(slot);
            assert!(!name.is_empty());
        }
    }

    #[test]
    fn item_type_unknown_falls_back_to_other() {
        assert_eq!(item_type_from_wire("something_new"), ItemType::Other);
        assert_eq!(item_type_from_wire("weapon"), ItemType::Weapon);
    }

    #[test]
    fn effect_parses_known_code_and_skips_unknown() {
        assert!(effect_from_wire(EffectWire { code: "attack_fire".into(), value: 10 }).is_some());
        assert!(effect_from_wire(EffectWire { code: "nonsense".into(), value: 1 }).is_none());
    }

    #[test]
    fn character_wire_skips_empty_equip_slots() {
        let w = CharacterWire {
            name: "alice".into(),
            x: 0,
            y: 0,
            level: 1,
            hp: 10,
            max_hp: 10,
            xp: 0,
            gold: 0,
            inventory_max_items: 20,
            mining_level: 1,
            woodcutting_level: 1,
            fishing_level: 1,
            cooking_level: 1,
            alchemy_level: 1,
            weaponcrafting_level: 1,
            gearcrafting_level: 1,
            jewelrycrafting_level: 1,
            weapon_slot: "sticky_sword".into(),
            shield_slot: "".into(),
            helmet_slot: "".into(),
            body_armor_slot: "".into(),
            leg_armor_slot: "".into(),
            boots_slot: "".into(),
            ring1_slot: "".into(),
            ring2_slot: "".into(),
            amulet_slot: "".into(),
            bag_slot: "".into(),
            utility1_slot: "".into(),
            utility1_slot_quantity: 0,
            utility2_slot: "".into(),
            utility2_slot_quantity: 0,
            rune_slot: "".into(),
            artifact1_slot: "".into(),
            artifact2_slot: "".into(),
            artifact3_slot: "".into(),
            inventory: vec![],
            task: "".into(),
            task_type: "".into(),
            task_progress: 0,
            task_total: 0,
            cooldown_expiration: Utc::now(),
        };
        let snapshot: CharacterSnapshot = w.into();
        assert_eq!(snapshot.equipped.len(), 1);
        assert!(snapshot.equipped.contains_key(&EquipSlot::Weapon));
        assert!(snapshot.task.is_none());
    }
}
