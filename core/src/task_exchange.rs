//! Task Exchange (spec §4.8): spending accumulated task coins, six at a
//! time, against the task-rewards table to chase a target item map. Only
//! one character exchanges at a time account-wide — `SharedServices::
//! exchange_lock` serializes it — and a proactive (non-terminal) invocation
//! backs off once it stops making progress so every character's tick
//! doesn't retry the same dead end.

use crate::context::CharacterContext;
use crate::error::EngineResult;
use std::collections::HashMap;
use std::time::Duration;

const COINS_PER_EXCHANGE: u32 = 6;
const MIN_FREE_SLOTS: usize = 2;
const PROACTIVE_EXCHANGE_BACKOFF_MS: i64 = 60_000;

/// Runs the exchange loop to exhaustion against `extra_targets` merged with
/// this character's configured `task_collection_targets`. `extra_targets`
/// lets a caller (e.g. the crafting executor, when a bank-only step happens
/// to be a task-reward item) fold in a dynamically discovered need without
/// a config round trip.
///
/// `proactive` invocations (not immediately following a task completion)
/// respect the cool-off timer and return early without touching the API
/// when still backed off.
pub async fn run_task_exchange(ctx: &CharacterContext, extra_targets: &HashMap<String, u32>) -> EngineResult<()> {
    run(ctx, extra_targets, false).await
}

/// A proactive call: skipped while inside the backoff window set by a
/// previous call that made no progress.
pub async fn run_task_exchange_proactive(ctx: &CharacterContext, extra_targets: &HashMap<String, u32>) -> EngineResult<()> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    if *ctx.shared.task_exchange_backoff_until_ms.lock() > now_ms {
        return Ok(());
    }
    run(ctx, extra_targets, true).await
}

fn unmet_targets(
    ctx: &CharacterContext,
    extra_targets: &HashMap<String, u32>,
) -> HashMap<String, u32> {
    let mut targets = ctx.config.task_collection_targets.clone();
    for (code, qty) in extra_targets {
        let entry = targets.entry(code.clone()).or_insert(0);
        *entry = (*entry).max(*qty);
    }
    targets
        .into_iter()
        .filter(|(code, qty)| ctx.shared.mirror.bank_count(code) < *qty)
        .collect()
}

async fn run(ctx: &CharacterContext, extra_targets: &HashMap<String, u32>, proactive: bool) -> EngineResult<()> {
    let _guard = ctx.shared.exchange_lock.lock().await;

    let mut made_progress = false;
    loop {
        let remaining = unmet_targets(ctx, extra_targets);
        if remaining.is_empty() {
            break;
        }

        if ctx.task_coins() < COINS_PER_EXCHANGE {
            let bank_coins = ctx.shared.mirror.bank_count("task_coin") as u32;
            let held = ctx.item_count("task_coin");
            let needed = COINS_PER_EXCHANGE.saturating_sub(held);
            if bank_coins < needed {
                break;
            }
            let Some(reservation) = ctx.shared.mirror.reserve("task_coin", needed, &ctx.name, Duration::from_secs(60)) else {
                break;
            };
            let withdraw = ctx
                .act_and_settle(|| ctx.shared.client.withdraw_bank(&ctx.name, "task_coin", needed))
                .await;
            ctx.shared.mirror.release(reservation);
            match withdraw {
                Ok(_) => ctx.shared.mirror.invalidate_bank("task_coin_withdraw"),
                Err(e) => {
                    log::warn!("[task_exchange] {} failed withdrawing task coins: {e}", ctx.name);
                    break;
                }
            }
        }

        if ctx.inventory_capacity().saturating_sub(ctx.inventory_count()) < MIN_FREE_SLOTS {
            break;
        }

        let result = match ctx.act_and_settle(|| ctx.shared.client.task_exchange(&ctx.name)).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("[task_exchange] {} exchange call failed: {e}", ctx.name);
                break;
            }
        };

        let crate::model::outcomes::ActionOutcome::Exchange(exchange) = &result.outcome else {
            break;
        };

        if remaining.contains_key(&exchange.item_code) && exchange.quantity_gained > 0 {
            if ctx
                .act_and_settle(|| {
                    ctx.shared
                        .client
                        .deposit_bank(&ctx.name, &exchange.item_code, exchange.quantity_gained)
                })
                .await
                .is_ok()
            {
                ctx.shared.mirror.invalidate_bank("task_exchange_deposit");
                made_progress = true;
            }
        } else {
            made_progress = true;
        }

        ctx.shared.mirror.invalidate_bank("task_exchange");
    }

    if proactive && !made_progress {
        let now_ms = chrono::Utc::now().timestamp_millis();
        *ctx.shared.task_exchange_backoff_until_ms.lock() = now_ms + PROACTIVE_EXCHANGE_BACKOFF_MS;
    } else if made_progress {
        *ctx.shared.task_exchange_backoff_until_ms.lock() = 0;
    }

    Ok(())
}
