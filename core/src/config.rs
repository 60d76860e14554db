//! Runtime configuration, deserialized from TOML. Every option the core
//! consumes is enumerated here explicitly; an unrecognized top-level or
//! per-character key is ignored with a warning rather than rejected, so a
//! config written against a newer version of the controller still loads.

use crate::error::EngineResult;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

fn default_lease_ms() -> u64 {
    180_000
}

fn default_blocked_retry_ms() -> i64 {
    600_000
}

fn default_recipe_block_ms() -> i64 {
    300_000
}

fn default_max_losses() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct CombatPotionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub refill_below: u32,
    #[serde(default)]
    pub target_quantity: u32,
    #[serde(default)]
    pub respect_non_potion_utility: bool,
    #[serde(default)]
    pub monster_types: Vec<String>,
    #[serde(default)]
    pub poison_bias: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PotionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub combat: CombatPotionConfig,
}

impl Default for CombatPotionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            refill_below: 0,
            target_quantity: 0,
            respect_non_potion_utility: false,
            monster_types: Vec::new(),
            poison_bias: false,
        }
    }
}

impl Default for PotionConfig {
    fn default() -> Self {
        Self { enabled: false, combat: CombatPotionConfig::default() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderBoardConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub create_orders: bool,
    #[serde(default)]
    pub fulfill_orders: bool,
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
    #[serde(default = "default_blocked_retry_ms")]
    pub blocked_retry_ms: i64,
}

impl Default for OrderBoardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            create_orders: false,
            fulfill_orders: false,
            lease_ms: default_lease_ms(),
            blocked_retry_ms: default_blocked_retry_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CharacterConfig {
    pub name: String,
    /// Per-skill weight used by the rotation's weighted shuffle; missing
    /// entries default to 1.0 in `weight_for`.
    #[serde(default)]
    pub skill_weights: HashMap<String, f64>,
    /// Per-skill goal overrides; missing entries fall back to built-in
    /// defaults (20 for gathering/crafting, 10 for combat, 1 for tasks).
    #[serde(default)]
    pub goal_overrides: HashMap<String, u32>,
    #[serde(default = "default_max_losses")]
    pub max_losses: u32,
    #[serde(default)]
    pub recipe_blacklist: Vec<String>,
    #[serde(default)]
    pub task_collection_targets: HashMap<String, u32>,
    #[serde(default)]
    pub potions: PotionConfig,
    #[serde(default)]
    pub order_board: OrderBoardConfig,
    #[serde(default)]
    pub achievement_types: Vec<String>,
    #[serde(default)]
    pub achievement_blacklist: Vec<String>,
    #[serde(default = "default_recipe_block_ms")]
    pub recipe_block_ms: i64,

    /// Keys present in the raw TOML table but not recognized above. Kept so
    /// `load` can warn about them without failing to parse.
    #[serde(flatten)]
    pub extra: HashMap<String, toml::Value>,
}

impl CharacterConfig {
    pub fn skill_weight(&self, skill: &str) -> f64 {
        self.skill_weights.get(skill).copied().unwrap_or(1.0)
    }

    pub fn goal_target(&self, skill: &str, default: u32) -> u32 {
        self.goal_overrides.get(skill).copied().unwrap_or(default)
    }

    pub fn is_recipe_blacklisted(&self, code: &str) -> bool {
        self.recipe_blacklist.iter().any(|c| c == code)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameConfig {
    pub characters: Vec<CharacterConfig>,
    /// Path to the debounced gear-state JSON file. Overridable by the
    /// `GEAR_STATE_PATH` environment variable.
    #[serde(default = "default_gear_state_path")]
    pub gear_state_path: String,
    /// Base API endpoint for the game server.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(flatten)]
    pub extra: HashMap<String, toml::Value>,
}

fn default_gear_state_path() -> String {
    "gear_state.json".to_string()
}

fn default_api_base_url() -> String {
    "https://api.example-game.test".to_string()
}

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["characters", "gear_state_path", "api_base_url"];
const KNOWN_CHARACTER_KEYS: &[&str] = &[
    "name",
    "skill_weights",
    "goal_overrides",
    "max_losses",
    "recipe_blacklist",
    "task_collection_targets",
    "potions",
    "order_board",
    "achievement_types",
    "achievement_blacklist",
    "recipe_block_ms",
];

impl GameConfig {
    pub fn load(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: GameConfig = toml::from_str(&raw)?;

        for key in config.extra.keys() {
            if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
                log::warn!("ignoring unrecognized top-level config key: {key}");
            }
        }
        for ch in &config.characters {
            for key in ch.extra.keys() {
                if !KNOWN_CHARACTER_KEYS.contains(&key.as_str()) {
                    log::warn!(
                        "ignoring unrecognized config key for character {}: {key}",
                        ch.name
                    );
                }
            }
        }

        if let Ok(path_override) = std::env::var("GEAR_STATE_PATH") {
            config.gear_state_path = path_override;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_are_collected_not_rejected() {
        let toml_str = r#"
            gear_state_path = "state.json"
            made_up_global = true

            [[characters]]
            name = "alice"
            max_losses = 5
            made_up_local = 1
        "#;
        let config: GameConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.characters[0].name, "alice");
        assert_eq!(config.characters[0].max_losses, 5);
        assert!(config.extra.contains_key("made_up_global"));
        assert!(config.characters[0].extra.contains_key("made_up_local"));
    }

    #[test]
    fn skill_weight_defaults_to_one() {
        let ch = CharacterConfig { name: "bob".into(), ..Default::default() };
        assert_eq!(ch.skill_weight("mining"), 1.0);
    }

    #[test]
    fn goal_target_falls_back_to_default() {
        let ch = CharacterConfig { name: "bob".into(), ..Default::default() };
        assert_eq!(ch.goal_target("mining", 20), 20);
    }
}
