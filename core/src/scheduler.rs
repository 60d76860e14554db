//! Per-character Scheduler (spec §4.9): an ordered list of routines,
//! selected by descending priority each tick, with loop continuation and
//! preemption. One `Scheduler::run` call is one character's entire control
//! loop — parallelism across characters comes from running one per spawned
//! task (spec §5: "per-character parallel control loops").

use crate::context::CharacterContext;
use crate::error::EngineResult;
use crate::executors::{self, deposit_surplus, execute_rotation_target};
use crate::model::character::TaskType;
use crate::routine::Routine;
use crate::skill_rotation::{RotationSkill, RotationTarget, SkillRotation};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How many inventory slots free before `DepositBank` kicks in.
const DEPOSIT_FREE_SLOT_THRESHOLD: usize = 3;

/// Idle delay when no routine can run at all (should be rare — `SkillRotation`
/// is the catch-all and is always runnable).
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// On an uncaught routine error the character backs off briefly before the
/// next tick re-evaluates from scratch (spec §4.9 step 4, §7 "error status").
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

struct RestRoutine;

#[async_trait]
impl Routine for RestRoutine {
    fn name(&self) -> &'static str {
        "rest"
    }
    fn priority(&self) -> i32 {
        100
    }
    fn is_loop(&self) -> bool {
        false
    }
    async fn can_run(&self, ctx: &CharacterContext) -> bool {
        ctx.hp_percent() < 99.0
    }
    async fn execute(&self, ctx: &CharacterContext) -> EngineResult<bool> {
        executors::rest_to_full(ctx).await?;
        Ok(false)
    }
}

struct CompleteNpcTaskRoutine;

#[async_trait]
impl Routine for CompleteNpcTaskRoutine {
    fn name(&self) -> &'static str {
        "complete_npc_task"
    }
    fn priority(&self) -> i32 {
        60
    }
    fn is_loop(&self) -> bool {
        false
    }
    async fn can_run(&self, ctx: &CharacterContext) -> bool {
        ctx.has_task() && ctx.task_complete() && matches!(ctx.snapshot().task.map(|t| t.task_type), Some(TaskType::Monsters))
    }
    async fn execute(&self, ctx: &CharacterContext) -> EngineResult<bool> {
        ctx.act_and_settle(|| ctx.shared.client.complete_task(&ctx.name)).await?;
        if let Err(e) = crate::task_exchange::run_task_exchange(ctx, &HashMap::new()).await {
            log::warn!("[scheduler] task exchange after completing npc task failed for {}: {e}", ctx.name);
        }
        Ok(false)
    }
}

struct DepositBankRoutine;

#[async_trait]
impl Routine for DepositBankRoutine {
    fn name(&self) -> &'static str {
        "deposit_bank"
    }
    fn priority(&self) -> i32 {
        50
    }
    fn is_loop(&self) -> bool {
        true
    }
    async fn can_run(&self, ctx: &CharacterContext) -> bool {
        ctx.inventory_capacity().saturating_sub(ctx.inventory_count()) < DEPOSIT_FREE_SLOT_THRESHOLD
    }
    async fn execute(&self, ctx: &CharacterContext) -> EngineResult<bool> {
        let keep = ctx.shared.gear.owned_keep_by_code_for_inventory(&ctx.name, &ctx.snapshot().equipped);
        let deposited = deposit_surplus(ctx, &keep).await?;
        Ok(deposited && ctx.inventory_capacity().saturating_sub(ctx.inventory_count()) < DEPOSIT_FREE_SLOT_THRESHOLD)
    }
}

struct AutoEquipRoutine;

impl AutoEquipRoutine {
    /// A `required` code already held (inventory or bank) but not yet
    /// equipped. Preferred over a bank withdrawal since it costs no action.
    fn find_missing(&self, ctx: &CharacterContext) -> Option<String> {
        let row = ctx.shared.gear.row(&ctx.name)?;
        let snapshot = ctx.snapshot();
        row.required.into_keys().find(|code| {
            let already_equipped = snapshot.equipped.values().any(|c| c == code);
            !already_equipped && ctx.has_item(code, 1)
        })
    }

    /// A `required` code this character is entitled to (spec §4.5's
    /// `getOwnedDeficitRequests`) but holds neither in inventory nor
    /// equipped — needs a bank withdrawal before it can be equipped.
    fn find_withdrawable(&self, ctx: &CharacterContext) -> Option<String> {
        let snapshot = ctx.snapshot();
        let held: HashMap<String, u32> = snapshot.inventory.iter().map(|s| (s.code.clone(), s.qty)).collect();
        let deficits = ctx.shared.gear.owned_deficit_requests(&ctx.name, &held, &snapshot.equipped);
        deficits
            .into_iter()
            .find(|(code, qty)| *qty > 0 && ctx.shared.mirror.available_bank_count(code, None) > 0)
            .map(|(code, _)| code)
    }
}

#[async_trait]
impl Routine for AutoEquipRoutine {
    fn name(&self) -> &'static str {
        "auto_equip"
    }
    fn priority(&self) -> i32 {
        45
    }
    fn is_loop(&self) -> bool {
        true
    }
    async fn can_run(&self, ctx: &CharacterContext) -> bool {
        self.find_missing(ctx).is_some() || self.find_withdrawable(ctx).is_some()
    }
    async fn execute(&self, ctx: &CharacterContext) -> EngineResult<bool> {
        if let Some(code) = self.find_missing(ctx) {
            let Some(item) = ctx.shared.catalog.item(&code) else {
                return Ok(false);
            };
            let Some(slot) = item.item_type.equip_slot() else {
                return Ok(false);
            };
            if ctx.snapshot().equipped_code(slot).is_some() {
                ctx.act_and_settle(|| ctx.shared.client.unequip(&ctx.name, slot)).await?;
            }
            ctx.act_and_settle(|| ctx.shared.client.equip(&ctx.name, &code, slot)).await?;
            return Ok(self.find_missing(ctx).is_some() || self.find_withdrawable(ctx).is_some());
        }

        let Some(code) = self.find_withdrawable(ctx) else {
            return Ok(false);
        };
        let Some(reservation) = ctx.shared.mirror.reserve(&code, 1, &ctx.name, Duration::from_secs(60)) else {
            return Ok(false);
        };
        let withdrawn = ctx.act_and_settle(|| ctx.shared.client.withdraw_bank(&ctx.name, &code, 1)).await;
        ctx.shared.mirror.cleanup_expired_reservations();
        let _ = reservation;
        withdrawn?;
        ctx.shared.mirror.invalidate_bank("auto_equip_withdraw");
        Ok(self.find_missing(ctx).is_some() || self.find_withdrawable(ctx).is_some())
    }
}

struct AcceptNpcTaskRoutine;

#[async_trait]
impl Routine for AcceptNpcTaskRoutine {
    fn name(&self) -> &'static str {
        "accept_npc_task"
    }
    fn priority(&self) -> i32 {
        15
    }
    fn is_loop(&self) -> bool {
        false
    }
    async fn can_run(&self, ctx: &CharacterContext) -> bool {
        !ctx.has_task()
    }
    async fn execute(&self, ctx: &CharacterContext) -> EngineResult<bool> {
        ctx.act_and_settle(|| ctx.shared.client.accept_task(&ctx.name)).await?;
        Ok(false)
    }
}

struct ActiveRotation {
    rs: RotationSkill,
    target: RotationTarget,
    cursor: usize,
}

/// The catch-all routine (folds the example table's separate "GatherMaterials"
/// (11), "Combat/Gather targets" (10), and "SkillRotation" (5) priority slots
/// into one): whatever `SkillRotation` picked, this is what actually advances
/// it, one server action per tick, via the executors module.
pub struct RotationRoutine {
    rotation: Arc<SkillRotation>,
    active: tokio::sync::Mutex<Option<ActiveRotation>>,
}

impl RotationRoutine {
    pub fn new(rotation: Arc<SkillRotation>) -> Self {
        Self { rotation, active: tokio::sync::Mutex::new(None) }
    }
}

#[async_trait]
impl Routine for RotationRoutine {
    fn name(&self) -> &'static str {
        "skill_rotation"
    }
    fn priority(&self) -> i32 {
        10
    }
    fn is_loop(&self) -> bool {
        true
    }
    async fn can_run(&self, _ctx: &CharacterContext) -> bool {
        true
    }
    async fn execute(&self, ctx: &CharacterContext) -> EngineResult<bool> {
        let mut guard = self.active.lock().await;
        if guard.is_none() {
            let Some((rs, target)) = self.rotation.pick_next(ctx).await else {
                return Ok(false);
            };
            *guard = Some(ActiveRotation { rs, target, cursor: 0 });
        }

        let (rs, keep_going) = {
            let state = guard.as_mut().expect("just populated above");
            let keep_going =
                execute_rotation_target(ctx, &self.rotation, state.rs, &state.target, &mut state.cursor).await?;
            (state.rs, keep_going)
        };

        if !keep_going {
            if self.rotation.goal_met(ctx, rs) {
                self.rotation.reset_goal(rs);
            }
            *guard = match self.rotation.force_rotate(ctx).await {
                Some((next_rs, next_target)) => Some(ActiveRotation { rs: next_rs, target: next_target, cursor: 0 }),
                None => None,
            };
        }

        Ok(keep_going)
    }
}

/// Builds the default routine list in descending-priority order: Rest (100),
/// CompleteNpcTask (60), DepositBank (50), AutoEquip (45), AcceptNpcTask (15),
/// then the unified rotation catch-all (10).
pub fn default_routines(rotation: Arc<SkillRotation>) -> Vec<Arc<dyn Routine>> {
    vec![
        Arc::new(RestRoutine),
        Arc::new(CompleteNpcTaskRoutine),
        Arc::new(DepositBankRoutine),
        Arc::new(AutoEquipRoutine),
        Arc::new(AcceptNpcTaskRoutine),
        Arc::new(RotationRoutine::new(rotation)),
    ]
}

/// Drives one character's control loop to completion (shutdown). Built from
/// an ordered, descending-priority routine list; `default_routines` supplies
/// the standard one but tests substitute smaller lists.
pub struct Scheduler {
    routines: Vec<Arc<dyn Routine>>,
}

impl Scheduler {
    pub fn new(routines: Vec<Arc<dyn Routine>>) -> Self {
        let mut routines = routines;
        routines.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self { routines }
    }

    /// Index (in priority order) of the highest-priority routine whose
    /// `can_run` currently holds, or `None` if nothing is runnable.
    async fn select(&self, ctx: &CharacterContext) -> Option<usize> {
        for (i, routine) in self.routines.iter().enumerate() {
            if routine.can_run(ctx).await {
                return Some(i);
            }
        }
        None
    }

    /// Whether any routine strictly above `idx` in priority order is
    /// currently runnable (spec §4.9 step 3: loop continuation is bypassed
    /// the moment something higher-priority becomes newly runnable).
    async fn higher_priority_runnable(&self, ctx: &CharacterContext, idx: usize) -> bool {
        for routine in &self.routines[..idx] {
            if routine.can_run(ctx).await {
                return true;
            }
        }
        false
    }

    pub async fn run(&self, ctx: Arc<CharacterContext>) {
        let mut active: Option<usize> = None;

        loop {
            if ctx.shutdown_requested() {
                return;
            }

            let cooldown = ctx.snapshot().cooldown_expiration;
            ctx.wait_for_cooldown(cooldown).await;
            if ctx.shutdown_requested() {
                return;
            }

            let idx = if let Some(active_idx) = active {
                let routine = &self.routines[active_idx];
                let must_continue = !routine.can_be_preempted(&ctx).await;
                let higher_runnable = self.higher_priority_runnable(&ctx, active_idx).await;
                if routine.is_loop() && routine.can_run(&ctx).await && (must_continue || !higher_runnable) {
                    Some(active_idx)
                } else {
                    self.select(&ctx).await
                }
            } else {
                self.select(&ctx).await
            };

            let Some(idx) = idx else {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                    _ = wait_for_shutdown(&ctx) => return,
                }
                continue;
            };

            let routine = &self.routines[idx];
            match routine.execute(&ctx).await {
                Ok(keep_going) if routine.is_loop() && keep_going => {
                    active = Some(idx);
                }
                Ok(_) => {
                    active = None;
                }
                Err(e) => {
                    log::error!("[scheduler] {} entered error status in {}: {e}", ctx.name, routine.name());
                    active = None;
                    tokio::select! {
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                        _ = wait_for_shutdown(&ctx) => return,
                    }
                }
            }
        }
    }
}

async fn wait_for_shutdown(ctx: &CharacterContext) {
    let mut shutdown = ctx.shutdown.clone();
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysRun(i32, bool);

    #[async_trait]
    impl Routine for AlwaysRun {
        fn name(&self) -> &'static str {
            "always"
        }
        fn priority(&self) -> i32 {
            self.0
        }
        fn is_loop(&self) -> bool {
            self.1
        }
        async fn can_run(&self, _ctx: &CharacterContext) -> bool {
            true
        }
        async fn execute(&self, _ctx: &CharacterContext) -> EngineResult<bool> {
            Ok(true)
        }
    }

    #[test]
    fn routines_sorted_descending_by_priority() {
        let scheduler = Scheduler::new(vec![
            Arc::new(AlwaysRun(5, false)),
            Arc::new(AlwaysRun(100, false)),
            Arc::new(AlwaysRun(45, false)),
        ]);
        let priorities: Vec<i32> = scheduler.routines.iter().map(|r| r.priority()).collect();
        assert_eq!(priorities, vec![100, 45, 5]);
    }
}
