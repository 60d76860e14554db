//! `CharacterContext` and `SharedServices` (design note §9): the capability
//! set every routine and executor is polymorphic over, and the process-wide
//! services bundle passed to every per-character task. Neither is a hidden
//! global — both are ordinary value types constructed once at startup and
//! threaded through by `Arc`, matching the teacher's `EngineState` pattern
//! minus its `LazyLock` registry (SPEC_FULL.md §2).

use crate::api::{AchievementProgress, GameClient};
use crate::cache::TtlCache;
use crate::catalog::Catalog;
use crate::config::CharacterConfig;
use crate::error::EngineResult;
use crate::gear_state::GearState;
use crate::inventory_mirror::InventoryMirror;
use crate::model::character::{CharacterSnapshot, Skill};
use crate::model::outcomes::ActionResult;
use crate::order_board::OrderBoard;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// The three account-wide mutable services, plus the two process-wide
/// immutable/near-immutable collaborators (catalog, HTTP client). Built once
/// at startup and shared via `Arc` across every character task.
pub struct SharedServices {
    pub catalog: Catalog,
    pub client: GameClient,
    pub mirror: InventoryMirror,
    pub board: OrderBoard,
    pub gear: Arc<GearState>,
    /// Serializes task-exchange across every character (spec §4.8: "only
    /// one character may exchange at a time").
    pub exchange_lock: tokio::sync::Mutex<()>,
    /// Process-wide unreachable-location blacklist (`NoPathError` handling,
    /// spec §4.7/§7): `(content_type, code)` pairs marked unreachable.
    pub unreachable: Mutex<std::collections::HashSet<(String, String)>>,
    /// Account-wide achievement progress, TTL-cached (design note §9 cache
    /// list: "bank fetch cache, gear cache, achievements cache").
    pub achievements: TtlCache<Vec<AchievementProgress>>,
    /// Proactive task-exchange cool-off (spec §4.8): epoch ms before which a
    /// non-terminal character-triggered exchange attempt should not retry.
    pub task_exchange_backoff_until_ms: Mutex<i64>,
}

impl SharedServices {
    /// The achievements cache's TTL — account achievements change slowly
    /// enough that a minute-scale cache is appropriate, unlike the 5s bank
    /// cache.
    pub const ACHIEVEMENTS_TTL: Duration = Duration::from_secs(60);
}

impl SharedServices {
    pub fn mark_unreachable(&self, content_type: &str, code: &str) {
        self.unreachable
            .lock()
            .insert((content_type.to_string(), code.to_string()));
        log::warn!("[shared] marking {content_type}:{code} unreachable process-wide");
    }

    pub fn is_unreachable(&self, content_type: &str, code: &str) -> bool {
        self.unreachable
            .lock()
            .contains(&(content_type.to_string(), code.to_string()))
    }
}

struct State {
    snapshot: CharacterSnapshot,
    consecutive_losses: HashMap<String, u32>,
}

/// Per-character capability set (design note §9). Owned exclusively by one
/// character's control-loop task; read-only access to the rest of the world
/// goes through `shared`. Interior mutability (`parking_lot::Mutex`) exists
/// only so routines can hold a shared `&CharacterContext` without every
/// method needing `&mut self` — there is never more than one task mutating a
/// given context.
pub struct CharacterContext {
    pub name: String,
    pub config: CharacterConfig,
    pub shared: Arc<SharedServices>,
    pub shutdown: tokio::sync::watch::Receiver<bool>,
    state: Mutex<State>,
}

impl CharacterContext {
    pub fn new(
        config: CharacterConfig,
        shared: Arc<SharedServices>,
        initial: CharacterSnapshot,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        let name = config.name.clone();
        shared.mirror.update_character(
            &name,
            equipped_counts(&initial),
            inventory_counts(&initial),
        );
        Self {
            name,
            config,
            shared,
            shutdown,
            state: Mutex::new(State {
                snapshot: initial,
                consecutive_losses: HashMap::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> CharacterSnapshot {
        self.state.lock().snapshot.clone()
    }

    pub fn hp_percent(&self) -> f64 {
        self.state.lock().snapshot.hp_percent()
    }

    pub fn skill_level(&self, skill: Skill) -> u32 {
        self.state.lock().snapshot.skill_level(skill)
    }

    pub fn has_item(&self, code: &str, qty: u32) -> bool {
        self.state.lock().snapshot.has_item(code, qty)
    }

    pub fn item_count(&self, code: &str) -> u32 {
        self.state.lock().snapshot.item_count(code)
    }

    pub fn inventory_count(&self) -> usize {
        self.state.lock().snapshot.inventory_used_slots()
    }

    pub fn inventory_capacity(&self) -> usize {
        self.state.lock().snapshot.inventory_capacity
    }

    pub fn inventory_full(&self) -> bool {
        self.state.lock().snapshot.inventory_full()
    }

    pub fn has_task(&self) -> bool {
        self.state.lock().snapshot.has_task()
    }

    pub fn task_complete(&self) -> bool {
        self.state.lock().snapshot.task_complete()
    }

    pub fn task_coins(&self) -> u32 {
        self.state.lock().snapshot.task_coins()
    }

    /// The character's current combat stat block: full HP plus every
    /// currently-equipped item's effects folded on top of a bare baseline.
    /// The game API reports only level/hp/skills directly, not derived
    /// combat stats, so this is the one place those get assembled.
    pub fn combat_stats(&self) -> crate::combat::CombatStats {
        let snapshot = self.snapshot();
        let mut stats = crate::combat::CombatStats {
            hp: snapshot.max_hp as f64,
            max_hp: snapshot.max_hp as f64,
            ..Default::default()
        };
        for code in snapshot.equipped.values() {
            if let Some(item) = self.shared.catalog.item(code) {
                crate::gear_optimizer::apply_item_effects(&mut stats, item, true);
            }
        }
        stats
    }

    /// Folds a fresh action result into both this context's own snapshot and
    /// the process-wide Inventory Mirror (spec §4.3 `applyActionResult`).
    pub fn apply_action_result(&self, result: ActionResult) {
        self.shared.mirror.apply_action_result(&self.name, &result);
        self.state.lock().snapshot = result.snapshot;
    }

    /// Re-fetches the character from the game API and folds the snapshot in,
    /// independent of any action (e.g. on scheduler resume after an error
    /// backoff).
    pub async fn refresh(&self) -> EngineResult<()> {
        let snapshot = self.shared.client.character(&self.name).await?;
        self.shared.mirror.update_character(
            &self.name,
            equipped_counts(&snapshot),
            inventory_counts(&snapshot),
        );
        self.state.lock().snapshot = snapshot;
        Ok(())
    }

    pub fn record_loss(&self, monster_code: &str) -> u32 {
        let mut state = self.state.lock();
        let count = state
            .consecutive_losses
            .entry(monster_code.to_string())
            .or_insert(0);
        *count += 1;
        *count
    }

    pub fn clear_losses(&self, monster_code: &str) {
        self.state.lock().consecutive_losses.remove(monster_code);
    }

    pub fn consecutive_losses(&self, monster_code: &str) -> u32 {
        self.state
            .lock()
            .consecutive_losses
            .get(monster_code)
            .copied()
            .unwrap_or(0)
    }

    /// Whether a shutdown has been requested; checked at every suspension
    /// point (spec §5: "the cooldown wait honors external cancellation").
    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Design note §9: "coroutine-like sequencing of action → cooldown →
    /// refresh". Runs one server action, folds its result in, then sleeps
    /// until the server-reported cooldown expires (or a shutdown signal
    /// fires) — executors call this and never manually sleep.
    pub async fn act_and_settle<F, Fut>(&self, action: F) -> EngineResult<ActionResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<ActionResult>>,
    {
        let result = action().await?;
        self.apply_action_result_ref(&result);
        self.wait_for_cooldown(result.cooldown_expiration).await;
        Ok(result)
    }

    fn apply_action_result_ref(&self, result: &ActionResult) {
        self.shared.mirror.apply_action_result(&self.name, result);
        self.state.lock().snapshot = result.snapshot.clone();
    }

    /// Sleeps until `expiration`, honoring shutdown cancellation (spec §5
    /// suspension points). A no-op if the expiration is already past.
    pub async fn wait_for_cooldown(&self, expiration: chrono::DateTime<chrono::Utc>) {
        let mut shutdown = self.shutdown.clone();
        loop {
            let now = chrono::Utc::now();
            if expiration <= now || *shutdown.borrow() {
                return;
            }
            let remaining = (expiration - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_millis(0));
            tokio::select! {
                _ = tokio::time::sleep(remaining) => return,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

fn equipped_counts(snapshot: &CharacterSnapshot) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for code in snapshot.equipped.values() {
        *counts.entry(code.clone()).or_insert(0u32) += 1;
    }
    counts
}

fn inventory_counts(snapshot: &CharacterSnapshot) -> HashMap<String, u32> {
    snapshot
        .inventory
        .iter()
        .map(|s| (s.code.clone(), s.qty))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CharacterConfig;
    use crate::model::character::{InventorySlot, Position};

    fn snapshot() -> CharacterSnapshot {
        CharacterSnapshot {
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
            inventory: vec![InventorySlot { code: "iron_ore".into(), qty: 2 }],
            task: None,
            cooldown_expiration: chrono::Utc::now() - chrono::Duration::seconds(1),
            gold: 0,
        }
    }

    fn shared() -> Arc<SharedServices> {
        Arc::new(SharedServices {
            catalog: Catalog::build(vec![], vec![], vec![]),
            client: GameClient::new("http://localhost", "token").unwrap(),
            mirror: InventoryMirror::new(),
            board: OrderBoard::new(),
            gear: Arc::new(GearState::new(std::env::temp_dir().join("cohort-ctx-test.json"))),
            exchange_lock: tokio::sync::Mutex::new(()),
            unreachable: Mutex::new(Default::default()),
            achievements: TtlCache::new(SharedServices::ACHIEVEMENTS_TTL),
            task_exchange_backoff_until_ms: Mutex::new(0),
        })
    }

    #[test]
    fn loss_tracking_increments_and_clears() {
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let ctx = CharacterContext::new(
            CharacterConfig { name: "alice".into(), ..Default::default() },
            shared(),
            snapshot(),
            rx,
        );
        assert_eq!(ctx.consecutive_losses("rat"), 0);
        assert_eq!(ctx.record_loss("rat"), 1);
        assert_eq!(ctx.record_loss("rat"), 2);
        ctx.clear_losses("rat");
        assert_eq!(ctx.consecutive_losses("rat"), 0);
    }

    #[test]
    fn snapshot_capability_reads_reflect_initial_state() {
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let ctx = CharacterContext::new(
            CharacterConfig { name: "alice".into(), ..Default::default() },
            shared(),
            snapshot(),
            rx,
        );
        assert!(ctx.has_item("iron_ore", 2));
        assert!(!ctx.has_item("iron_ore", 3));
        assert_eq!(ctx.inventory_capacity(), 10);
        assert!(!ctx.inventory_full());
    }
}
