//! Inventory Mirror (spec §4.3): process-wide accounting of every character's
//! equipment and inventory, the bank, and short-lived exclusive reservations
//! against bank stock.

use crate::cache::TtlCache;
use crate::error::EngineResult;
use crate::model::outcomes::{ActionOutcome, ActionResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: Uuid,
    pub code: String,
    pub qty: u32,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    /// character name -> code -> qty
    equipped: HashMap<String, HashMap<String, u32>>,
    /// character name -> code -> qty
    inventory: HashMap<String, HashMap<String, u32>>,
    bank: HashMap<String, u32>,
    bank_revision: u64,
    reservations: HashMap<Uuid, Reservation>,
}

pub struct InventoryMirror {
    inner: Mutex<Inner>,
    bank_fetch_cache: TtlCache<HashMap<String, u32>>,
}

impl Default for InventoryMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryMirror {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            bank_fetch_cache: TtlCache::new(Duration::from_secs(5)),
        }
    }

    /// Full replace of one character's inventory and equipment maps — never
    /// a partial merge, so stale per-character counts cannot leak.
    pub fn update_character(
        &self,
        name: &str,
        equipped: HashMap<String, u32>,
        inventory: HashMap<String, u32>,
    ) {
        let mut inner = self.inner.lock();
        inner.equipped.insert(name.to_string(), equipped);
        inner.inventory.insert(name.to_string(), inventory);
    }

    /// Folds a fresh server snapshot into the mirror (full replace) and, for
    /// bank-touching outcomes, applies the matching bank delta in the same
    /// call so the two never drift out of sync.
    pub fn apply_action_result(&self, name: &str, result: &ActionResult) {
        let mut equipped = HashMap::new();
        for code in result.snapshot.equipped.values() {
            *equipped.entry(code.clone()).or_insert(0u32) += 1;
        }
        let inventory: HashMap<String, u32> = result
            .snapshot
            .inventory
            .iter()
            .map(|s| (s.code.clone(), s.qty))
            .collect();
        self.update_character(name, equipped, inventory);

        if let ActionOutcome::Bank(b) = &result.outcome {
            let mut deltas: Vec<(String, i64)> = Vec::new();
            for (code, qty) in &b.deposited {
                deltas.push((code.clone(), *qty as i64));
            }
            for (code, qty) in &b.withdrawn {
                deltas.push((code.clone(), -(*qty as i64)));
            }
            if !deltas.is_empty() {
                self.apply_bank_delta(&deltas, "action_result");
            }
        }
    }

    pub fn equipped_count(&self, name: &str, code: &str) -> u32 {
        let inner = self.inner.lock();
        inner
            .equipped
            .get(name)
            .and_then(|m| m.get(code))
            .copied()
            .unwrap_or(0)
    }

    pub fn inventory_count(&self, name: &str, code: &str) -> u32 {
        let inner = self.inner.lock();
        inner
            .inventory
            .get(name)
            .and_then(|m| m.get(code))
            .copied()
            .unwrap_or(0)
    }

    pub fn bank_count(&self, code: &str) -> u32 {
        let inner = self.inner.lock();
        inner.bank.get(code).copied().unwrap_or(0)
    }

    pub fn bank_revision(&self) -> u64 {
        self.inner.lock().bank_revision
    }

    /// `globalCount(c) = bankCount(c) + Σ inventoryCount(c) + Σ equippedCount(c)`.
    pub fn global_count(&self, code: &str) -> u32 {
        let inner = self.inner.lock();
        let bank = inner.bank.get(code).copied().unwrap_or(0);
        let inv: u32 = inner
            .inventory
            .values()
            .map(|m| m.get(code).copied().unwrap_or(0))
            .sum();
        let eq: u32 = inner
            .equipped
            .values()
            .map(|m| m.get(code).copied().unwrap_or(0))
            .sum();
        bank + inv + eq
    }

    fn harvest_expired(inner: &mut Inner) {
        let now = Utc::now();
        inner.reservations.retain(|_, r| r.expires_at > now);
    }

    fn reserved_qty_excluding(inner: &Inner, code: &str, excluding_holder: Option<&str>, now: DateTime<Utc>) -> u32 {
        inner
            .reservations
            .values()
            .filter(|r| r.code == code && r.expires_at > now)
            .filter(|r| excluding_holder.map(|h| r.holder != h).unwrap_or(true))
            .map(|r| r.qty)
            .sum()
    }

    /// `availableBankCount(c, excluding H) = bankCount(c) − Σ non-expired
    /// reservations of c held by anyone ≠ H`. Never negative.
    pub fn available_bank_count(&self, code: &str, excluding_holder: Option<&str>) -> u32 {
        let mut inner = self.inner.lock();
        Self::harvest_expired(&mut inner);
        let bank = inner.bank.get(code).copied().unwrap_or(0);
        let now = Utc::now();
        let reserved = Self::reserved_qty_excluding(&inner, code, excluding_holder, now);
        bank.saturating_sub(reserved)
    }

    /// Atomic: succeeds only if `availableBankCount(code, excluding: holder)
    /// >= qty`.
    pub fn reserve(&self, code: &str, qty: u32, holder: &str, ttl: Duration) -> Option<Uuid> {
        let mut inner = self.inner.lock();
        Self::harvest_expired(&mut inner);
        let bank = inner.bank.get(code).copied().unwrap_or(0);
        let now = Utc::now();
        let reserved = Self::reserved_qty_excluding(&inner, code, Some(holder), now);
        if bank.saturating_sub(reserved) < qty {
            return None;
        }
        let id = Uuid::new_v4();
        inner.reservations.insert(
            id,
            Reservation {
                id,
                code: code.to_string(),
                qty,
                holder: holder.to_string(),
                expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
            },
        );
        Some(id)
    }

    /// All-or-nothing: on partial failure no reservation is created.
    pub fn reserve_many(
        &self,
        items: &[(String, u32)],
        holder: &str,
        ttl: Duration,
    ) -> Option<Vec<Uuid>> {
        let mut inner = self.inner.lock();
        Self::harvest_expired(&mut inner);
        let now = Utc::now();
        for (code, qty) in items {
            let bank = inner.bank.get(code).copied().unwrap_or(0);
            let reserved = Self::reserved_qty_excluding(&inner, code, Some(holder), now);
            if bank.saturating_sub(reserved) < *qty {
                return None;
            }
        }
        let mut ids = Vec::with_capacity(items.len());
        for (code, qty) in items {
            let id = Uuid::new_v4();
            inner.reservations.insert(
                id,
                Reservation {
                    id,
                    code: code.clone(),
                    qty: *qty,
                    holder: holder.to_string(),
                    expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
                },
            );
            ids.push(id);
        }
        Some(ids)
    }

    pub fn release(&self, id: Uuid) {
        self.inner.lock().reservations.remove(&id);
    }

    pub fn release_all_for_char(&self, holder: &str) {
        self.inner.lock().reservations.retain(|_, r| r.holder != holder);
    }

    pub fn cleanup_expired_reservations(&self) {
        let mut inner = self.inner.lock();
        Self::harvest_expired(&mut inner);
    }

    /// Claims (reservation quantities) currently held, summed globally —
    /// protects scarce items from other routines, e.g. recyclers.
    pub fn claimed_total(&self, code: &str) -> u32 {
        let mut inner = self.inner.lock();
        Self::harvest_expired(&mut inner);
        inner
            .reservations
            .values()
            .filter(|r| r.code == code)
            .map(|r| r.qty)
            .sum()
    }

    /// Applies a confirmed bank delta (clamped at zero) and bumps the bank
    /// revision. Deposits apply only after the server confirms; withdraws
    /// likewise — reservations exist precisely so the withdraw call can be
    /// made safely beforehand.
    pub fn apply_bank_delta(&self, items: &[(String, i64)], reason: &str) {
        let mut inner = self.inner.lock();
        for (code, delta) in items {
            let entry = inner.bank.entry(code.clone()).or_insert(0);
            *entry = (*entry as i64 + delta).max(0) as u32;
        }
        inner.bank_revision += 1;
        log::debug!("[inventory-mirror] bank delta applied ({reason}), revision={}", inner.bank_revision);
    }

    /// Drop the bank read cache so the next read re-fetches.
    pub fn invalidate_bank(&self, reason: &str) {
        log::debug!("[inventory-mirror] bank cache invalidated: {reason}");
        self.bank_fetch_cache.invalidate();
    }

    /// Read (or, on cache miss, fetch-and-cache) the full bank map.
    /// Concurrent misses share a single in-flight fetch.
    pub async fn bank_snapshot<F, Fut>(&self, fetch: F) -> EngineResult<HashMap<String, u32>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = EngineResult<HashMap<String, u32>>>,
    {
        let arc = self.bank_fetch_cache.get_or_fetch(fetch).await?;
        Ok((*arc).clone())
    }

    /// Seed the bank map directly (startup load), bumping the revision.
    pub fn seed_bank(&self, bank: HashMap<String, u32>) {
        let mut inner = self.inner.lock();
        inner.bank = bank;
        inner.bank_revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_count_invariant() {
        let mirror = InventoryMirror::new();
        mirror.seed_bank(HashMap::from([("iron_ore".to_string(), 10)]));
        mirror.update_character(
            "alice",
            HashMap::new(),
            HashMap::from([("iron_ore".to_string(), 3)]),
        );
        mirror.update_character(
            "bob",
            HashMap::from([("iron_ore".to_string(), 1)]),
            HashMap::new(),
        );
        assert_eq!(mirror.global_count("iron_ore"), 10 + 3 + 1);
    }

    #[test]
    fn reserve_race_scenario() {
        // Scenario 4: bank has 8 wooden_shield.
        let mirror = InventoryMirror::new();
        mirror.seed_bank(HashMap::from([("wooden_shield".to_string(), 8)]));
        let ttl = Duration::from_secs(60);
        let a = mirror.reserve("wooden_shield", 2, "A", ttl);
        assert!(a.is_some());
        let b = mirror.reserve("wooden_shield", 7, "B", ttl);
        assert!(b.is_none());
        assert_eq!(mirror.available_bank_count("wooden_shield", None), 6);
        assert_eq!(mirror.available_bank_count("wooden_shield", Some("A")), 8);
    }

    #[test]
    fn reserve_many_is_all_or_nothing() {
        let mirror = InventoryMirror::new();
        mirror.seed_bank(HashMap::from([
            ("ore".to_string(), 5),
            ("coal".to_string(), 0),
        ]));
        let result = mirror.reserve_many(
            &[("ore".to_string(), 2), ("coal".to_string(), 1)],
            "A",
            Duration::from_secs(30),
        );
        assert!(result.is_none());
        // no reservation leaked from the failed call
        assert_eq!(mirror.available_bank_count("ore", None), 5);
    }

    #[test]
    fn expired_reservations_are_harvested_lazily() {
        let mirror = InventoryMirror::new();
        mirror.seed_bank(HashMap::from([("plank".to_string(), 4)]));
        let id = mirror
            .reserve("plank", 4, "A", Duration::from_millis(1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(mirror.available_bank_count("plank", None), 4);
        mirror.release(id); // no-op, already expired
        assert_eq!(mirror.claimed_total("plank"), 0);
    }

    #[test]
    fn available_bank_count_never_negative() {
        let mirror = InventoryMirror::new();
        mirror.seed_bank(HashMap::from([("gem".to_string(), 1)]));
        mirror.reserve("gem", 1, "A", Duration::from_secs(60));
        // A second reservation over-claims relative to bank — should fail,
        // not drive availability negative.
        assert!(mirror.reserve("gem", 1, "B", Duration::from_secs(60)).is_none());
        assert_eq!(mirror.available_bank_count("gem", None), 0);
    }

    #[test]
    fn apply_action_result_folds_bank_delta_and_snapshot() {
        use crate::model::character::{CharacterSnapshot, InventorySlot, Position};
        use crate::model::outcomes::{ActionOutcome, ActionResult, BankOutcome};

        let mirror = InventoryMirror::new();
        mirror.seed_bank(HashMap::from([("iron_ore".to_string(), 10)]));

        let snapshot = CharacterSnapshot {
            name: "alice".into(),
            position: Position { x: 0, y: 0 },
            level: 1,
            hp: 10,
            max_hp: 10,
            xp: 0,
            skill_levels: HashMap::new(),
            equipped: HashMap::new(),
            utility_qty: HashMap::new(),
            inventory_capacity: 10,
            inventory: vec![InventorySlot { code: "iron_ore".into(), qty: 5 }],
            task: None,
            cooldown_expiration: Utc::now(),
            gold: 0,
        };
        let result = ActionResult {
            outcome: ActionOutcome::Bank(BankOutcome {
                deposited: vec![("iron_ore".to_string(), 5)],
                withdrawn: vec![],
                gold_delta: 0,
            }),
            snapshot,
            cooldown_expiration: Utc::now(),
        };
        mirror.apply_action_result("alice", &result);
        assert_eq!(mirror.inventory_count("alice", "iron_ore"), 5);
        assert_eq!(mirror.bank_count("iron_ore"), 15);
    }

    #[tokio::test]
    async fn bank_snapshot_shares_in_flight_fetch() {
        let mirror = InventoryMirror::new();
        let snap = mirror
            .bank_snapshot(|| async { Ok(HashMap::from([("x".to_string(), 1)])) })
            .await
            .unwrap();
        assert_eq!(snap.get("x"), Some(&1));
    }
}
