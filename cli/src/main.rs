//! Cohort CLI: config loading, catalog bootstrap, process wiring, and the
//! Ctrl-C shutdown handshake. Everything decision-relevant lives in
//! `cohort-core`; this binary only assembles the collaborators §6 lists as
//! out-of-core (HTTP transport already lives in core as `GameClient`, but
//! *constructing* it from config/env, spawning one task per character, and
//! reporting status is ambient process glue per SPEC_FULL.md §2/§10).

use clap::{Parser, Subcommand};
use cohort_core::api::GameClient;
use cohort_core::catalog::Catalog;
use cohort_core::config::GameConfig;
use cohort_core::context::{CharacterContext, SharedServices};
use cohort_core::gear_state::{CharacterGearInput, GearState};
use cohort_core::inventory_mirror::InventoryMirror;
use cohort_core::model::character::EquipSlot;
use cohort_core::order_board::OrderBoard;
use cohort_core::scheduler::{default_routines, Scheduler};
use cohort_core::skill_rotation::SkillRotation;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How often the controller recomputes Gear State across all characters.
/// `GearState::refresh` itself no-ops unless the bank revision or a
/// character's level actually changed (spec §4.5), so a short poll here is
/// cheap.
const GEAR_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// How often a one-line status summary is logged per character (spec §7:
/// "stale detection declares a character stale after 120s").
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);
const STALE_AFTER: Duration = Duration::from_secs(120);

#[derive(Parser)]
#[command(name = "cohort", about = "Multi-character game automation controller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load config, bootstrap the catalog and shared services, and drive
    /// every configured character until Ctrl-C.
    Run {
        #[arg(long)]
        config: PathBuf,
        /// Opaque to the core; only used here to construct `GameClient`.
        #[arg(long, env = "COHORT_API_TOKEN")]
        api_token: String,
    },
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Command::Run { config, api_token } = cli.command;

    match run(config, api_token).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::error!("[cohort] fatal init error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(config_path: PathBuf, api_token: String) -> cohort_core::EngineResult<()> {
    let config = GameConfig::load(&config_path)?;
    log::info!("[cohort] loaded config for {} characters", config.characters.len());

    let client = GameClient::new(config.api_base_url.clone(), api_token)?;

    log::info!("[cohort] fetching catalog (items, monsters, resources, maps)...");
    let items = client.items().await?;
    let monsters = client.monsters().await?;
    let resources = client.resources().await?;
    let maps = client.maps().await?;

    let mut catalog = Catalog::build(items, monsters, resources);
    let locations: Vec<(String, String, cohort_core::model::character::Position)> = maps
        .into_iter()
        .filter_map(|m| {
            let content_type = m.content_type?;
            let content_code = m.content_code?;
            Some((content_type, content_code, cohort_core::model::character::Position { x: m.x, y: m.y }))
        })
        .collect();
    catalog.index_locations(&locations);

    let mirror = InventoryMirror::new();
    let bank = client.bank_items().await?;
    mirror.seed_bank(bank);

    let gear_state_path = resolve_gear_state_path(&config);
    let gear = Arc::new(GearState::new(gear_state_path.clone()));
    match GearState::load(&gear_state_path) {
        Ok(rows) => gear.seed_rows(rows),
        Err(e) => log::warn!("[cohort] could not load persisted gear state ({gear_state_path:?}): {e}"),
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let shared = Arc::new(SharedServices {
        catalog,
        client,
        mirror,
        board: OrderBoard::new(),
        gear: gear.clone(),
        exchange_lock: tokio::sync::Mutex::new(()),
        unreachable: parking_lot::Mutex::new(Default::default()),
        achievements: cohort_core::cache::TtlCache::new(SharedServices::ACHIEVEMENTS_TTL),
        task_exchange_backoff_until_ms: parking_lot::Mutex::new(0),
    });

    gear.spawn_persistence_loop();

    let mut contexts = Vec::new();
    for (idx, char_config) in config.characters.iter().enumerate() {
        let snapshot = shared.client.character(&char_config.name).await?;
        let ctx = Arc::new(CharacterContext::new(
            char_config.clone(),
            shared.clone(),
            snapshot,
            shutdown_rx.clone(),
        ));
        // Each character's weighted-shuffle draw gets its own RNG stream so
        // one character's draws don't perturb another's, while still being
        // reproducible per-character under a fixed seed derived from its
        // position in config order (design note §9: seedable, inspectable).
        let rotation = Arc::new(SkillRotation::new(rand::rngs::StdRng::seed_from_u64(
            0x636f_686f_7274_0000 ^ idx as u64,
        )));
        contexts.push((ctx, rotation));
    }

    log::info!("[cohort] starting {} character control loops", contexts.len());

    let mut handles = Vec::new();
    for (ctx, rotation) in &contexts {
        let ctx = ctx.clone();
        let scheduler = Scheduler::new(default_routines(rotation.clone()));
        handles.push(tokio::spawn(async move {
            scheduler.run(ctx).await;
        }));
    }

    let gear_loop = tokio::spawn(spawn_gear_refresh_loop(
        shared.clone(),
        contexts.iter().map(|(ctx, _)| ctx.clone()).collect(),
        shutdown_rx.clone(),
    ));
    let status_loop = tokio::spawn(spawn_status_loop(
        contexts.iter().map(|(ctx, _)| ctx.clone()).collect(),
        shutdown_rx.clone(),
    ));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                log::error!("[cohort] failed installing Ctrl-C handler: {e}");
            }
            log::info!("[cohort] shutdown requested, draining character loops...");
        }
    }

    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
    gear_loop.abort();
    status_loop.abort();

    if let Err(e) = gear.flush().await {
        log::warn!("[cohort] final gear-state flush failed: {e}");
    }

    log::info!("[cohort] clean shutdown");
    Ok(())
}

fn resolve_gear_state_path(config: &GameConfig) -> PathBuf {
    PathBuf::from(&config.gear_state_path)
}

/// Periodically recomputes Gear State across every character (spec §4.5).
/// Each tick reads the *current* in-memory snapshot via `CharacterContext`,
/// never re-fetching — the per-character scheduler already keeps those
/// snapshots fresh via `applyActionResult`.
async fn spawn_gear_refresh_loop(
    shared: Arc<SharedServices>,
    contexts: Vec<Arc<CharacterContext>>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(GEAR_REFRESH_INTERVAL) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
        if *shutdown.borrow() {
            return;
        }

        let inputs: Vec<CharacterGearInput> = contexts
            .iter()
            .map(|ctx| {
                let snapshot = ctx.snapshot();
                let inventory_counts: HashMap<String, u32> = snapshot
                    .inventory
                    .iter()
                    .map(|s| (s.code.clone(), s.qty))
                    .collect();
                let equipped: HashMap<EquipSlot, String> = snapshot.equipped.clone();
                CharacterGearInput {
                    name: ctx.name.clone(),
                    level: snapshot.level,
                    stats: ctx.combat_stats(),
                    equipped,
                    inventory_capacity: snapshot.inventory_capacity,
                    inventory_counts,
                }
            })
            .collect();

        if let Err(e) = shared.gear.refresh(&shared.catalog, &shared.mirror, &inputs, false) {
            log::error!("[cohort] gear state refresh failed: {e}");
        }
    }
}

/// Logs a one-line status per character on an interval (spec §7: a terminal
/// status reporter, not a GUI dashboard, is the ambient collaborator here).
async fn spawn_status_loop(
    contexts: Vec<Arc<CharacterContext>>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let last_seen: Vec<parking_lot::Mutex<chrono::DateTime<chrono::Utc>>> = contexts
        .iter()
        .map(|_| parking_lot::Mutex::new(chrono::Utc::now()))
        .collect();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(STATUS_LOG_INTERVAL) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
        if *shutdown.borrow() {
            return;
        }

        let now = chrono::Utc::now();
        for (ctx, seen) in contexts.iter().zip(last_seen.iter()) {
            let snapshot = ctx.snapshot();
            let cooldown_active = snapshot.cooldown_expiration > now;
            if !cooldown_active {
                *seen.lock() = now;
            }
            let stale = !cooldown_active && (now - *seen.lock()) > chrono::Duration::from_std(STALE_AFTER).unwrap();
            log::info!(
                "[cohort] {} lvl {} hp {}/{} pos ({}, {}){}",
                ctx.name,
                snapshot.level,
                snapshot.hp,
                snapshot.max_hp,
                snapshot.position.x,
                snapshot.position.y,
                if stale { " [STALE]" } else { "" },
            );
        }
    }
}
