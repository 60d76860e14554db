//! The `Routine` trait (design note §9 `BaseRoutine`) and the status enums
//! surfaced to operators per spec §7. A routine is one named, prioritized
//! behavior a character can run; the scheduler (§4.9) owns an ordered list
//! of them and decides which one gets to act on each tick.

use crate::context::CharacterContext;
use crate::error::EngineResult;
use async_trait::async_trait;

/// Character-level status surfaced to operators (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterStatus {
    Starting,
    Running,
    Error,
}

/// The currently-selected routine's own phase (spec §7), alongside
/// `CharacterStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutinePhase {
    Idle,
    Running,
    Error,
}

/// One selectable behavior in the per-character scheduler (spec §4.9).
/// `execute` performs **exactly one** server-advancing action (or decides to
/// yield without acting) and returns whether the scheduler should re-enter
/// this same routine immediately next tick, bypassing selection — the "loop"
/// continuation signal.
#[async_trait]
pub trait Routine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Higher priority values preempt lower ones (spec §4.9 example table).
    fn priority(&self) -> i32;

    /// Whether this routine, once selected, keeps re-entering itself while
    /// `execute` returns `true` rather than falling back to full selection
    /// every tick.
    fn is_loop(&self) -> bool;

    /// Whether this routine's preconditions currently hold (e.g. HP low
    /// enough to rest, bank deposit overdue, a task is complete).
    async fn can_run(&self, ctx: &CharacterContext) -> bool;

    /// Whether a currently-running instance of this routine may be preempted
    /// by a higher-priority one mid-loop. Most routines yield between every
    /// action anyway (every action is a suspension point), so this is mostly
    /// relevant to routines with multi-step atomic sequences.
    async fn can_be_preempted(&self, ctx: &CharacterContext) -> bool {
        let _ = ctx;
        true
    }

    /// Perform one server-advancing action (or a no-op decision). Returns
    /// `Ok(true)` to request immediate re-entry (only meaningful when
    /// `is_loop()`), `Ok(false)` to fall back to full selection next tick.
    /// Domain-level failures (spec §7) must be swallowed here and turned
    /// into a rotation signal; only invariant violations propagate.
    async fn execute(&self, ctx: &CharacterContext) -> EngineResult<bool>;
}
