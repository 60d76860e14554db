//! Order Board (spec §4.4): a cross-character work queue with merge-on-submit
//! and leased exclusive claims. Characters publish "I need N of code X" and
//! any character can claim the resulting order and work it down.

use crate::catalog::item::{Item, ItemSubtype, ItemType};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Gather,
    Craft,
    Fight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    Claimed,
    Blocked,
    Fulfilled,
}

/// Claim-priority bucket, ascending — tool orders drain first because a
/// missing tool blocks a character's whole gathering skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClaimBucket {
    Tool,
    Resource,
    Weapon,
    Gear,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: Uuid,
    pub created_at_ms: i64,
    pub requester_name: String,
    pub recipe_code: Option<String>,
    pub item_code: String,
    pub source_type: SourceType,
    pub source_code: String,
    pub skill: Option<String>,
    pub source_level: u32,
    pub quantity: u32,
    pub remaining_qty: u32,
    /// `"requester::recipe" → qty contributed`
    pub contributions: HashMap<String, u32>,
    pub merge_key: String,
    pub status: OrderStatus,
    pub claimer: Option<String>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub blocked_until_ms: Option<i64>,
    pub block_reasons: Vec<String>,
}

fn merge_key(source_type: SourceType, source_code: &str, item_code: &str) -> String {
    let st = match source_type {
        SourceType::Gather => "gather",
        SourceType::Craft => "craft",
        SourceType::Fight => "fight",
    };
    format!("{st}:{source_code}:{item_code}")
}

pub struct NewOrder {
    pub requester_name: String,
    pub recipe_code: Option<String>,
    pub item_code: String,
    pub source_type: SourceType,
    pub source_code: String,
    pub skill: Option<String>,
    pub source_level: u32,
    pub quantity: u32,
    pub now_ms: i64,
}

#[derive(Default)]
pub struct OrderBoard {
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl OrderBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn contribution_key(requester: &str, recipe: Option<&str>) -> String {
        format!("{requester}::{}", recipe.unwrap_or(""))
    }

    /// Creates a new order, or — if an open order shares the same mergeKey —
    /// folds this submission into it instead.
    pub fn create_or_merge_order(&self, payload: NewOrder) -> Uuid {
        let key = merge_key(payload.source_type, &payload.source_code, &payload.item_code);
        let mut orders = self.orders.lock();

        if let Some(existing) = orders
            .values_mut()
            .find(|o| o.merge_key == key && o.status == OrderStatus::Open)
        {
            existing.remaining_qty += payload.quantity;
            let ck = Self::contribution_key(&payload.requester_name, payload.recipe_code.as_deref());
            *existing.contributions.entry(ck).or_insert(0) += payload.quantity;
            return existing.id;
        }

        let id = Uuid::new_v4();
        let ck = Self::contribution_key(&payload.requester_name, payload.recipe_code.as_deref());
        let order = Order {
            id,
            created_at_ms: payload.now_ms,
            requester_name: payload.requester_name,
            recipe_code: payload.recipe_code,
            item_code: payload.item_code,
            source_type: payload.source_type,
            source_code: payload.source_code,
            skill: payload.skill,
            source_level: payload.source_level,
            quantity: payload.quantity,
            remaining_qty: payload.quantity,
            contributions: HashMap::from([(ck, payload.quantity)]),
            merge_key: key,
            status: OrderStatus::Open,
            claimer: None,
            claim_expires_at: None,
            blocked_until_ms: None,
            block_reasons: Vec::new(),
        };
        orders.insert(id, order);
        id
    }

    fn revert_expired_claim(order: &mut Order, now: DateTime<Utc>) {
        if order.status == OrderStatus::Claimed {
            if let Some(expires) = order.claim_expires_at {
                if expires <= now {
                    order.status = OrderStatus::Open;
                    order.claimer = None;
                    order.claim_expires_at = None;
                }
            }
        }
    }

    fn revert_expired_block(order: &mut Order, now_ms: i64) {
        if order.status == OrderStatus::Blocked {
            if let Some(until) = order.blocked_until_ms {
                if now_ms >= until {
                    order.status = OrderStatus::Open;
                    order.blocked_until_ms = None;
                }
            }
        }
    }

    fn settle_lazily(order: &mut Order, now: DateTime<Utc>, now_ms: i64) {
        Self::revert_expired_claim(order, now);
        Self::revert_expired_block(order, now_ms);
    }

    /// Succeeds only if the order is open, unblocked, and has remaining
    /// quantity. Idempotent when the same holder re-claims.
    pub fn claim_order(&self, order_id: Uuid, character: &str, lease: chrono::Duration, now: DateTime<Utc>, now_ms: i64) -> bool {
        let mut orders = self.orders.lock();
        let Some(order) = orders.get_mut(&order_id) else { return false };
        Self::settle_lazily(order, now, now_ms);

        if order.status == OrderStatus::Claimed && order.claimer.as_deref() == Some(character) {
            order.claim_expires_at = Some(now + lease);
            return true;
        }
        if order.status != OrderStatus::Open || order.remaining_qty == 0 {
            return false;
        }
        order.status = OrderStatus::Claimed;
        order.claimer = Some(character.to_string());
        order.claim_expires_at = Some(now + lease);
        true
    }

    pub fn release_claim(&self, order_id: Uuid) {
        let mut orders = self.orders.lock();
        if let Some(order) = orders.get_mut(&order_id) {
            if order.status == OrderStatus::Claimed {
                order.status = OrderStatus::Open;
                order.claimer = None;
                order.claim_expires_at = None;
            }
        }
    }

    /// Subtracts from `remainingQty`; fulfilled once it reaches zero.
    pub fn apply_progress(&self, order_id: Uuid, delta: u32) {
        let mut orders = self.orders.lock();
        if let Some(order) = orders.get_mut(&order_id) {
            order.remaining_qty = order.remaining_qty.saturating_sub(delta);
            if order.remaining_qty == 0 {
                order.status = OrderStatus::Fulfilled;
                order.claimer = None;
                order.claim_expires_at = None;
            }
        }
    }

    pub fn block_claim(&self, order_id: Uuid, reason: &str, retry_ms: i64, now_ms: i64) {
        let mut orders = self.orders.lock();
        if let Some(order) = orders.get_mut(&order_id) {
            order.status = OrderStatus::Blocked;
            order.claimer = None;
            order.claim_expires_at = None;
            order.blocked_until_ms = Some(now_ms + retry_ms);
            order.block_reasons.push(reason.to_string());
        }
    }

    pub fn order(&self, order_id: Uuid) -> Option<Order> {
        let mut orders = self.orders.lock();
        let order = orders.get_mut(&order_id)?;
        Self::settle_lazily(order, Utc::now(), Utc::now().timestamp_millis());
        Some(order.clone())
    }

    /// Claimable orders (status `open`, `remainingQty > 0`, after lazily
    /// settling expired claims/blocks), sorted by bucket, then FIFO, then id.
    pub fn claimable_orders_sorted(&self, catalog: &crate::catalog::Catalog, now: DateTime<Utc>, now_ms: i64) -> Vec<Order> {
        let mut orders = self.orders.lock();
        for order in orders.values_mut() {
            Self::settle_lazily(order, now, now_ms);
        }
        let mut open: Vec<Order> = orders
            .values()
            .filter(|o| o.status == OrderStatus::Open && o.remaining_qty > 0)
            .cloned()
            .collect();
        open.sort_by(|a, b| {
            let ba = bucket_for(catalog, &a.item_code);
            let bb = bucket_for(catalog, &b.item_code);
            ba.cmp(&bb)
                .then(a.created_at_ms.cmp(&b.created_at_ms))
                .then(a.id.cmp(&b.id))
        });
        open
    }
}

/// Bucket is derived from the item's type/subtype. Unknown codes fall back
/// to `Resource`.
pub fn bucket_for(catalog: &crate::catalog::Catalog, item_code: &str) -> ClaimBucket {
    let Some(item) = catalog.item(item_code) else {
        return ClaimBucket::Resource;
    };
    bucket_for_item(item)
}

fn bucket_for_item(item: &Item) -> ClaimBucket {
    if item.item_type == ItemType::Weapon && item.subtype == Some(ItemSubtype::Tool) {
        return ClaimBucket::Tool;
    }
    match item.item_type {
        ItemType::Weapon => ClaimBucket::Weapon,
        ItemType::Shield
        | ItemType::Helmet
        | ItemType::BodyArmor
        | ItemType::LegArmor
        | ItemType::Boots
        | ItemType::Ring
        | ItemType::Amulet
        | ItemType::Bag => ClaimBucket::Gear,
        _ => ClaimBucket::Resource,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn payload(requester: &str, qty: u32, now_ms: i64) -> NewOrder {
        NewOrder {
            requester_name: requester.into(),
            recipe_code: Some("iron_sword".into()),
            item_code: "iron_ore".into(),
            source_type: SourceType::Gather,
            source_code: "iron_rocks".into(),
            skill: Some("mining".into()),
            source_level: 5,
            quantity: qty,
            now_ms,
        }
    }

    #[test]
    fn merging_same_merge_key_accumulates_remaining_qty() {
        let board = OrderBoard::new();
        let id1 = board.create_or_merge_order(payload("alice", 5, 1000));
        let id2 = board.create_or_merge_order(payload("bob", 3, 1001));
        assert_eq!(id1, id2);
        let order = board.order(id1).unwrap();
        assert_eq!(order.remaining_qty, 8);
        assert_eq!(
            order.contributions.get("alice::iron_sword").copied(),
            Some(5)
        );
        assert_eq!(order.contributions.get("bob::iron_sword").copied(), Some(3));
    }

    #[test]
    fn claim_fifo_inside_a_bucket() {
        // Scenario 1: two resource orders for different items, claimable by
        // creation order when buckets tie.
        let board = OrderBoard::new();
        let catalog = Catalog::build(vec![], vec![], vec![]);
        let id_a = board.create_or_merge_order(NewOrder {
            requester_name: "alice".into(),
            recipe_code: None,
            item_code: "copper_ore".into(),
            source_type: SourceType::Gather,
            source_code: "copper_rocks".into(),
            skill: Some("mining".into()),
            source_level: 1,
            quantity: 1,
            now_ms: 1000,
        });
        let id_b = board.create_or_merge_order(NewOrder {
            requester_name: "bob".into(),
            recipe_code: None,
            item_code: "iron_ore".into(),
            source_type: SourceType::Gather,
            source_code: "iron_rocks".into(),
            skill: Some("mining".into()),
            source_level: 5,
            quantity: 1,
            now_ms: 2000,
        });
        let now = Utc::now();
        let sorted = board.claimable_orders_sorted(&catalog, now, 3000);
        assert_eq!(sorted[0].id, id_a);
        assert_eq!(sorted[1].id, id_b);
    }

    #[test]
    fn claim_lease_expires_and_reverts_to_open() {
        let board = OrderBoard::new();
        let id = board.create_or_merge_order(payload("alice", 5, 1000));
        let now = Utc::now();
        assert!(board.claim_order(id, "alice", chrono::Duration::milliseconds(1), now, 1000));
        let later = now + chrono::Duration::milliseconds(5);
        let order = {
            let mut orders = board.orders.lock();
            let o = orders.get_mut(&id).unwrap();
            OrderBoard::settle_lazily(o, later, 1005);
            o.clone()
        };
        assert_eq!(order.status, OrderStatus::Open);
        assert!(order.claimer.is_none());
    }

    #[test]
    fn claim_is_idempotent_for_same_holder() {
        let board = OrderBoard::new();
        let id = board.create_or_merge_order(payload("alice", 5, 1000));
        let now = Utc::now();
        assert!(board.claim_order(id, "alice", chrono::Duration::seconds(30), now, 1000));
        assert!(board.claim_order(id, "alice", chrono::Duration::seconds(30), now, 1000));
        assert!(!board.claim_order(id, "bob", chrono::Duration::seconds(30), now, 1000));
    }

    #[test]
    fn apply_progress_to_zero_fulfills_order() {
        let board = OrderBoard::new();
        let id = board.create_or_merge_order(payload("alice", 5, 1000));
        board.apply_progress(id, 5);
        let order = board.order(id).unwrap();
        assert_eq!(order.status, OrderStatus::Fulfilled);
    }

    #[test]
    fn block_claim_sets_retry_deadline_and_reverts() {
        let board = OrderBoard::new();
        let id = board.create_or_merge_order(payload("alice", 5, 1000));
        let now = Utc::now();
        board.claim_order(id, "alice", chrono::Duration::seconds(30), now, 1000);
        board.block_claim(id, "unreachable resource", 500, 1000);
        let order = board.order(id).unwrap();
        assert_eq!(order.status, OrderStatus::Blocked);
        assert_eq!(order.block_reasons, vec!["unreachable resource".to_string()]);
        let settled = {
            let mut orders = board.orders.lock();
            let o = orders.get_mut(&id).unwrap();
            OrderBoard::settle_lazily(o, now, 2000);
            o.clone()
        };
        assert_eq!(settled.status, OrderStatus::Open);
    }
}
