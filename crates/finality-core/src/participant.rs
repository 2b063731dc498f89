use serde::{Deserialize, Serialize};

use crate::geometry::Location;

/// Unique identifier for a character in the host world.
pub type ParticipantId = u64;

/// Stable identifier of a participant group (party).
pub type GroupId = u64;

/// Identifier of a spawned creature or NPC.
pub type EntityId = u64;

/// Identifier of an item template (e.g. the trial marker token).
pub type ItemId = u32;

/// Identifier of a creature template.
pub type TemplateId = u32;

/// Snapshot of a participant as reported by the host simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub id: ParticipantId,
    pub name: String,
    pub level: u8,
    pub online: bool,
    pub alive: bool,
    /// Privileged (game master) account.
    pub is_gm: bool,
    pub location: Location,
    pub group: Option<GroupId>,
    /// Tracked items currently carried (only those the server cares about).
    #[serde(default)]
    pub items: Vec<ItemId>,
}

impl ParticipantView {
    /// Online and alive.
    pub fn is_present(&self) -> bool {
        self.online && self.alive
    }

    pub fn carries(&self, item: ItemId) -> bool {
        self.items.contains(&item)
    }
}
