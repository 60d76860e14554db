//! Skill Rotation (spec §4.6): a per-character state machine selecting what
//! the character is currently "trying to do" — gather, craft, fight, run a
//! task, or chase an achievement — and tracking goal progress against it.

use crate::combat::{simulate_combat, CombatMode, CombatStats};
use crate::context::{CharacterContext, SharedServices};
use crate::gear_optimizer::{self, Loadout, OptimizeContext, TargetCandidate};
use crate::model::character::{Position, Skill, CRAFTING_SKILLS, GATHERING_SKILLS};
use crate::order_board::{NewOrder, SourceType};
use crate::production_plan::{resolve_production_plan, PlanStep, PlanStepKind, ProductionPlan};
use crate::rng::weighted_shuffle;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RotationSkill {
    Gather(Skill),
    Craft(Skill),
    Combat,
    NpcTask,
    ItemTask,
    Achievement,
}

impl RotationSkill {
    /// The key used to look up both `skillWeights` and `goalOverrides` in
    /// per-character config.
    fn config_key(&self) -> String {
        match self {
            RotationSkill::Gather(s) => skill_name(*s).to_string(),
            RotationSkill::Craft(s) => skill_name(*s).to_string(),
            RotationSkill::Combat => "combat".to_string(),
            RotationSkill::NpcTask => "npc_task".to_string(),
            RotationSkill::ItemTask => "item_task".to_string(),
            RotationSkill::Achievement => "achievement".to_string(),
        }
    }
}

fn skill_name(s: Skill) -> &'static str {
    match s {
        Skill::Mining => "mining",
        Skill::Woodcutting => "woodcutting",
        Skill::Fishing => "fishing",
        Skill::Cooking => "cooking",
        Skill::Alchemy => "alchemy",
        Skill::Weaponcrafting => "weaponcrafting",
        Skill::Gearcrafting => "gearcrafting",
        Skill::Jewelrycrafting => "jewelrycrafting",
    }
}

fn default_goal_target(rs: RotationSkill) -> u32 {
    match rs {
        RotationSkill::Gather(_) | RotationSkill::Craft(_) => 20,
        RotationSkill::Combat => 10,
        RotationSkill::NpcTask | RotationSkill::ItemTask | RotationSkill::Achievement => 1,
    }
}

/// What the rotation settled on: enough for an executor to act without
/// re-deriving the decision.
#[derive(Debug, Clone)]
pub enum RotationTarget {
    Gather {
        skill: Skill,
        resource_code: String,
        item_code: String,
        position: Option<Position>,
    },
    Craft {
        skill: Skill,
        recipe_code: String,
        plan: ProductionPlan,
    },
    Combat {
        monster_code: String,
        loadout: Loadout,
        position: Option<Position>,
    },
    NpcTask,
    ItemTask,
    Achievement {
        code: String,
    },
}

#[derive(Debug, Clone, Copy, Default)]
struct GoalState {
    progress: u32,
}

pub struct SkillRotation {
    rng: Mutex<StdRng>,
    current: Mutex<Option<RotationSkill>>,
    goals: Mutex<HashMap<RotationSkill, GoalState>>,
    /// `(skill, recipe code) -> blocked-until epoch ms`. Self-prunes on
    /// access (spec §4.6: "the map self-prunes on access").
    recipe_block: Mutex<HashMap<(Skill, String), i64>>,
}

impl SkillRotation {
    pub fn new(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            current: Mutex::new(None),
            goals: Mutex::new(HashMap::new()),
            recipe_block: Mutex::new(HashMap::new()),
        }
    }

    pub fn current(&self) -> Option<RotationSkill> {
        *self.current.lock()
    }

    /// Weight-biased shuffle over every enabled skill; the first one whose
    /// setup finds a viable target wins.
    pub async fn pick_next(&self, ctx: &CharacterContext) -> Option<(RotationSkill, RotationTarget)> {
        self.select(ctx, None).await
    }

    /// Same as `pick_next` but excludes the currently-selected skill, used
    /// when a routine decides its current skill is done or stuck.
    pub async fn force_rotate(&self, ctx: &CharacterContext) -> Option<(RotationSkill, RotationTarget)> {
        let exclude = *self.current.lock();
        self.select(ctx, exclude).await
    }

    async fn select(
        &self,
        ctx: &CharacterContext,
        exclude: Option<RotationSkill>,
    ) -> Option<(RotationSkill, RotationTarget)> {
        let candidates = enabled_skills(exclude);
        let weighted: Vec<(RotationSkill, f64)> = candidates
            .into_iter()
            .map(|rs| {
                let weight = ctx.config.skill_weight(&rs.config_key());
                (rs, weight)
            })
            .collect();
        let order = {
            let mut rng = self.rng.lock();
            weighted_shuffle(&mut *rng, weighted)
        };
        for rs in order {
            if let Some(target) = self.setup_skill(ctx, rs).await {
                *self.current.lock() = Some(rs);
                self.goals.lock().entry(rs).or_default();
                return Some((rs, target));
            }
        }
        None
    }

    async fn setup_skill(&self, ctx: &CharacterContext, rs: RotationSkill) -> Option<RotationTarget> {
        match rs {
            RotationSkill::Gather(skill) => setup_gather(ctx, skill),
            RotationSkill::Craft(skill) => self.setup_craft(ctx, skill),
            RotationSkill::Combat => setup_combat(ctx),
            RotationSkill::NpcTask => setup_npc_task(ctx),
            RotationSkill::ItemTask => setup_item_task(ctx),
            RotationSkill::Achievement => self.setup_achievement(ctx).await,
        }
    }

    fn setup_craft(&self, ctx: &CharacterContext, skill: Skill) -> Option<RotationTarget> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let char_level = ctx.skill_level(skill);
        let bank = bank_counts_snapshot(ctx);

        let mut scored: Vec<(CraftCandidate, f64)> = Vec::new();
        for item in ctx.shared.catalog.items() {
            let Some(recipe) = &item.craft else { continue };
            if recipe.skill != skill || recipe.level > char_level {
                continue;
            }
            if ctx.config.is_recipe_blacklisted(&item.code) {
                continue;
            }
            if self.is_recipe_blocked(skill, &item.code, now_ms) {
                continue;
            }

            let plan = match resolve_production_plan(&ctx.shared.catalog, &item.code, 1, &bank) {
                Ok(plan) => plan,
                Err(_) => continue,
            };

            let mut viable = true;
            let mut blocked_unwinnable = false;
            for step in &plan.steps {
                match step.kind {
                    PlanStepKind::Gather => {
                        let Some(src) = &step.source_code else { continue };
                        let Some(resource) = ctx.shared.catalog.resource(src) else {
                            viable = false;
                            continue;
                        };
                        let skill_deficit = ctx.skill_level(resource.skill) < resource.level;
                        let unreachable = ctx.shared.is_unreachable("resource", src);
                        if skill_deficit || unreachable {
                            viable = false;
                        }
                        if skill_deficit && ctx.config.order_board.create_orders {
                            emit_order(
                                ctx,
                                &item.code,
                                step,
                                SourceType::Gather,
                                Some(resource.skill),
                                resource.level,
                                now_ms,
                            );
                        }
                    }
                    PlanStepKind::Fight => {
                        let Some(src) = &step.source_code else { continue };
                        let Some(monster) = ctx.shared.catalog.monster(src) else {
                            viable = false;
                            continue;
                        };
                        let reachable = !ctx.shared.is_unreachable("monster", src);
                        let wins = reachable && {
                            let stats = ctx.combat_stats();
                            let mstats = gear_optimizer::monster_combat_stats(monster);
                            simulate_combat(&stats, &mstats, CombatMode::ExpectedValue)
                                .map(|r| {
                                    r.win && r.hp_lost_percent <= gear_optimizer::HP_LOST_VIABILITY_THRESHOLD
                                })
                                .unwrap_or(false)
                        };
                        if !wins {
                            viable = false;
                            blocked_unwinnable = true;
                            if ctx.config.order_board.create_orders {
                                emit_order(
                                    ctx,
                                    &item.code,
                                    step,
                                    SourceType::Fight,
                                    None,
                                    monster.level,
                                    now_ms,
                                );
                            }
                        }
                    }
                    PlanStepKind::Bank | PlanStepKind::Craft => {}
                }
            }

            if blocked_unwinnable {
                self.block_recipe(skill, &item.code, ctx.config.recipe_block_ms, now_ms);
            }
            if !viable {
                continue;
            }

            let bank_only = plan
                .steps
                .iter()
                .all(|s| s.kind != PlanStepKind::Gather && s.kind != PlanStepKind::Fight);
            let availability = plan_availability(&plan);
            scored.push((
                CraftCandidate {
                    recipe_code: item.code.clone(),
                    plan,
                    level: recipe.level,
                    bank_only,
                },
                availability,
            ));
        }

        // Prefer bank-only candidates outright when any exist, then craft
        // level desc, then material availability desc.
        scored.sort_by(|x, y| {
            y.0.bank_only
                .cmp(&x.0.bank_only)
                .then(y.0.level.cmp(&x.0.level))
                .then(y.1.partial_cmp(&x.1).unwrap_or(Ordering::Equal))
        });

        scored.into_iter().next().map(|(c, _)| RotationTarget::Craft {
            skill,
            recipe_code: c.recipe_code,
            plan: c.plan,
        })
    }

    /// Scores incomplete account achievements and picks the easiest one.
    ///
    /// The live achievement feed reports only `{code, completed, current,
    /// total}` — no objective type or level — so the exact `level ×
    /// remaining` effort formula can't be computed here. This approximates
    /// "easiest" by smallest remaining quantity (`total - current`) among
    /// non-blacklisted, non-completed achievements, optionally filtered to
    /// codes matching a configured type substring.
    async fn setup_achievement(&self, ctx: &CharacterContext) -> Option<RotationTarget> {
        let achievements = ctx
            .shared
            .achievements
            .get_or_fetch(|| async { ctx.shared.client.account_achievements().await })
            .await
            .ok()?;

        let best = achievements
            .iter()
            .filter(|a| !a.completed)
            .filter(|a| !ctx.config.achievement_blacklist.iter().any(|b| b == &a.code))
            .filter(|a| {
                ctx.config.achievement_types.is_empty()
                    || ctx
                        .config
                        .achievement_types
                        .iter()
                        .any(|t| a.code.contains(t.as_str()))
            })
            .min_by_key(|a| a.total.saturating_sub(a.current))?;

        Some(RotationTarget::Achievement { code: best.code.clone() })
    }

    fn is_recipe_blocked(&self, skill: Skill, code: &str, now_ms: i64) -> bool {
        let mut map = self.recipe_block.lock();
        let key = (skill, code.to_string());
        if let Some(&until) = map.get(&key) {
            if until > now_ms {
                return true;
            }
            map.remove(&key);
        }
        false
    }

    fn block_recipe(&self, skill: Skill, code: &str, block_ms: i64, now_ms: i64) {
        self.recipe_block
            .lock()
            .insert((skill, code.to_string()), now_ms + block_ms);
    }

    pub fn goal_progress(&self, rs: RotationSkill) -> u32 {
        self.goals.lock().get(&rs).map(|g| g.progress).unwrap_or(0)
    }

    pub fn goal_target(&self, ctx: &CharacterContext, rs: RotationSkill) -> u32 {
        ctx.config.goal_target(&rs.config_key(), default_goal_target(rs))
    }

    pub fn goal_met(&self, ctx: &CharacterContext, rs: RotationSkill) -> bool {
        self.goal_progress(rs) >= self.goal_target(ctx, rs)
    }

    pub fn record_progress(&self, rs: RotationSkill, n: u32) {
        self.goals.lock().entry(rs).or_default().progress += n;
    }

    pub fn reset_goal(&self, rs: RotationSkill) {
        self.goals.lock().remove(&rs);
    }
}

struct CraftCandidate {
    recipe_code: String,
    plan: ProductionPlan,
    level: u32,
    bank_only: bool,
}

fn enabled_skills(exclude: Option<RotationSkill>) -> Vec<RotationSkill> {
    let mut v = Vec::with_capacity(GATHERING_SKILLS.len() + CRAFTING_SKILLS.len() + 4);
    for s in GATHERING_SKILLS {
        v.push(RotationSkill::Gather(s));
    }
    for s in CRAFTING_SKILLS {
        v.push(RotationSkill::Craft(s));
    }
    v.push(RotationSkill::Combat);
    v.push(RotationSkill::NpcTask);
    v.push(RotationSkill::ItemTask);
    v.push(RotationSkill::Achievement);
    if let Some(ex) = exclude {
        v.retain(|rs| *rs != ex);
    }
    v
}

fn setup_gather(ctx: &CharacterContext, skill: Skill) -> Option<RotationTarget> {
    let char_level = ctx.skill_level(skill);
    let mut candidates: Vec<&crate::catalog::resource::Resource> = ctx
        .shared
        .catalog
        .resources()
        .filter(|r| r.skill == skill && r.level <= char_level)
        .filter(|r| !ctx.shared.is_unreachable("resource", &r.code))
        .collect();
    candidates.sort_by(|a, b| b.level.cmp(&a.level));
    let resource = candidates.into_iter().next()?;
    let item_code = resource.drops.first()?.item_code.clone();
    let position = ctx.shared.catalog.resource_location(&resource.code);
    Some(RotationTarget::Gather {
        skill,
        resource_code: resource.code.clone(),
        item_code,
        position,
    })
}

fn setup_combat(ctx: &CharacterContext) -> Option<RotationTarget> {
    let snapshot = ctx.snapshot();
    let stats = ctx.combat_stats();
    let bank = bank_counts_snapshot(ctx);
    let inventory = inventory_counts_map(ctx);
    let opt_ctx = OptimizeContext {
        catalog: &ctx.shared.catalog,
        character_level: snapshot.level,
        planning_mode: false,
        equipped: &snapshot.equipped,
        inventory_counts: &inventory,
        bank_counts: &bank,
    };
    let candidate = best_reachable_combat_target(&opt_ctx, &stats, &ctx.shared)?;
    let position = ctx.shared.catalog.monster_location(&candidate.monster.code);
    Some(RotationTarget::Combat {
        monster_code: candidate.monster.code.clone(),
        loadout: candidate.optimization.loadout,
        position,
    })
}

/// `gear_optimizer::find_best_combat_target` with one addition: monsters
/// marked process-wide unreachable are skipped so the rotation tries the
/// next-best winnable target instead of stalling on one it can't path to.
fn best_reachable_combat_target<'a>(
    opt_ctx: &OptimizeContext<'a>,
    character: &CombatStats,
    shared: &SharedServices,
) -> Option<TargetCandidate<'a>> {
    let mut best: Option<TargetCandidate<'a>> = None;
    for monster in opt_ctx.catalog.monsters() {
        if monster.level > opt_ctx.character_level {
            continue;
        }
        if shared.is_unreachable("monster", &monster.code) {
            continue;
        }
        let optimization = gear_optimizer::optimize_for_monster(opt_ctx, character, monster);
        let Some(outcome) = optimization.outcome else { continue };
        if !outcome.win || outcome.hp_lost_percent > gear_optimizer::HP_LOST_VIABILITY_THRESHOLD {
            continue;
        }
        let better = match &best {
            None => true,
            Some(current) => {
                let cur = current.optimization.outcome.unwrap();
                (monster.level, -(outcome.turns as i32), outcome.remaining_hp as i64)
                    > (current.monster.level, -(cur.turns as i32), cur.remaining_hp as i64)
            }
        };
        if better {
            best = Some(TargetCandidate { monster, optimization });
        }
    }
    best
}

fn setup_npc_task(ctx: &CharacterContext) -> Option<RotationTarget> {
    let _ = ctx;
    Some(RotationTarget::NpcTask)
}

fn setup_item_task(ctx: &CharacterContext) -> Option<RotationTarget> {
    let _ = ctx;
    Some(RotationTarget::ItemTask)
}

fn emit_order(
    ctx: &CharacterContext,
    recipe_code: &str,
    step: &PlanStep,
    source_type: SourceType,
    skill: Option<Skill>,
    source_level: u32,
    now_ms: i64,
) {
    let Some(source_code) = step.source_code.clone() else { return };
    ctx.shared.board.create_or_merge_order(NewOrder {
        requester_name: ctx.name.clone(),
        recipe_code: Some(recipe_code.to_string()),
        item_code: step.item_code.clone(),
        source_type,
        source_code,
        skill: skill.map(|s| skill_name(s).to_string()),
        source_level,
        quantity: step.quantity,
        now_ms,
    });
}

/// Fraction of a plan's total (non-intermediate) quantity already covered by
/// a bank step — the "availability" score the crafting setup sorts by.
fn plan_availability(plan: &ProductionPlan) -> f64 {
    let mut bank_qty = 0u32;
    let mut total_qty = 0u32;
    for step in &plan.steps {
        match step.kind {
            PlanStepKind::Bank => {
                bank_qty += step.quantity;
                total_qty += step.quantity;
            }
            PlanStepKind::Gather | PlanStepKind::Fight => total_qty += step.quantity,
            PlanStepKind::Craft => {}
        }
    }
    if total_qty == 0 {
        1.0
    } else {
        bank_qty as f64 / total_qty as f64
    }
}

fn bank_counts_snapshot(ctx: &CharacterContext) -> HashMap<String, u32> {
    ctx.shared
        .catalog
        .items()
        .filter_map(|item| {
            let count = ctx.shared.mirror.bank_count(&item.code);
            if count > 0 {
                Some((item.code.clone(), count))
            } else {
                None
            }
        })
        .collect()
}

fn inventory_counts_map(ctx: &CharacterContext) -> HashMap<String, u32> {
    ctx.snapshot()
        .inventory
        .iter()
        .map(|s| (s.code.clone(), s.qty))
        .collect()
}
