//! Process-wide, immutable-after-startup game data: items, monsters,
//! resources, and the two reverse indices (`item drop → source resource`,
//! `item drop → source monster`) materialized once at load time (spec §3).

pub mod item;
pub mod monster;
pub mod resource;

use crate::model::character::Position;
use item::Item;
use monster::Monster;
use resource::Resource;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Catalog {
    items: HashMap<String, Item>,
    monsters: HashMap<String, Monster>,
    resources: HashMap<String, Resource>,
    /// item code -> resources that can drop it
    drop_to_resources: HashMap<String, Vec<String>>,
    /// item code -> monsters that can drop it
    drop_to_monsters: HashMap<String, Vec<String>>,
    /// resource code -> world position, resolved lazily from the map index.
    resource_locations: HashMap<String, Position>,
    /// monster code -> world position, resolved lazily from the map index.
    monster_locations: HashMap<String, Position>,
}

impl Catalog {
    pub fn build(items: Vec<Item>, monsters: Vec<Monster>, resources: Vec<Resource>) -> Self {
        let mut drop_to_resources: HashMap<String, Vec<String>> = HashMap::new();
        for r in &resources {
            for d in &r.drops {
                drop_to_resources
                    .entry(d.item_code.clone())
                    .or_default()
                    .push(r.code.clone());
            }
        }
        let mut drop_to_monsters: HashMap<String, Vec<String>> = HashMap::new();
        for m in &monsters {
            for d in &m.drops {
                drop_to_monsters
                    .entry(d.item_code.clone())
                    .or_default()
                    .push(m.code.clone());
            }
        }
        Self {
            items: items.into_iter().map(|i| (i.code.clone(), i)).collect(),
            monsters: monsters.into_iter().map(|m| (m.code.clone(), m)).collect(),
            resources: resources.into_iter().map(|r| (r.code.clone(), r)).collect(),
            drop_to_resources,
            drop_to_monsters,
            resource_locations: HashMap::new(),
            monster_locations: HashMap::new(),
        }
    }

    /// Populate the resource/monster world-position indices from the map
    /// endpoint (spec §4.6: "resolve its world location" — resolved lazily,
    /// once, at startup rather than per-lookup). `locations` is
    /// `(content_type, content_code, position)`; unrecognized content types
    /// are ignored. The first position seen for a code wins.
    pub fn index_locations(&mut self, locations: &[(String, String, Position)]) {
        for (content_type, code, pos) in locations {
            match content_type.as_str() {
                "resource" => {
                    self.resource_locations.entry(code.clone()).or_insert(*pos);
                }
                "monster" => {
                    self.monster_locations.entry(code.clone()).or_insert(*pos);
                }
                _ => {}
            }
        }
    }

    pub fn resource_location(&self, code: &str) -> Option<Position> {
        self.resource_locations.get(code).copied()
    }

    pub fn monster_location(&self, code: &str) -> Option<Position> {
        self.monster_locations.get(code).copied()
    }

    pub fn item(&self, code: &str) -> Option<&Item> {
        self.items.get(code)
    }

    pub fn monster(&self, code: &str) -> Option<&Monster> {
        self.monsters.get(code)
    }

    pub fn resource(&self, code: &str) -> Option<&Resource> {
        self.resources.get(code)
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn monsters(&self) -> impl Iterator<Item = &Monster> {
        self.monsters.values()
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn resources_dropping(&self, item_code: &str) -> &[String] {
        self.drop_to_resources
            .get(item_code)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn monsters_dropping(&self, item_code: &str) -> &[String] {
        self.drop_to_monsters
            .get(item_code)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}
