use super::monster::Drop;
use crate::model::character::{Position, Skill};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub code: String,
    pub name: String,
    pub skill: Skill,
    pub level: u32,
    pub drops: Vec<Drop>,
    /// Resolved lazily — not every resource's map location matters until a
    /// routine actually needs to path to it.
    pub location: Option<Position>,
}

impl Resource {
    pub fn drops_item(&self, code: &str) -> bool {
        self.drops.iter().any(|d| d.item_code == code)
    }
}
