use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use finality_core::participant::{EntityId, GroupId, ParticipantId};

/// Identity of one active run, minted when the run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a run is in its wave sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "wave")]
pub enum WavePhase {
    NotStarted,
    /// Wave announced (or scheduled for announcement), enemies not yet spawned.
    Preparing(u32),
    Active(u32),
    Concluded,
}

/// A run waiting for every member to acknowledge.
#[derive(Debug, Clone)]
pub struct PendingRun {
    pub group: GroupId,
    pub initiator: ParticipantId,
    /// Initiator first, then the rest of the group in host order.
    pub roster: Vec<ParticipantId>,
    pub to_confirm: BTreeSet<ParticipantId>,
    pub accepted: BTreeSet<ParticipantId>,
    pub created_at: Duration,
    pub highest_level: u8,
}

impl PendingRun {
    pub fn is_fully_confirmed(&self) -> bool {
        self.accepted == self.to_confirm
    }
}

#[derive(Debug, Clone)]
pub struct ForfeitVote {
    pub started_at: Duration,
    pub voted: BTreeSet<ParticipantId>,
}

/// Live state of one in-progress run.
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub id: RunId,
    pub group: GroupId,
    pub initiator: ParticipantId,
    /// Fixed at start.
    pub members: Vec<ParticipantId>,
    pub highest_level: u8,
    pub started_at: Duration,
    pub current_wave: u32,
    pub phase: WavePhase,
    pub active_enemies: BTreeSet<EntityId>,
    pub downed: BTreeMap<ParticipantId, Duration>,
    pub permanently_failed: BTreeSet<ParticipantId>,
    pub warned_for_boundary: BTreeSet<ParticipantId>,
    pub forfeit_vote: Option<ForfeitVote>,
    /// The group was created for this run and is disbanded on teardown.
    pub is_ephemeral_roster: bool,
    pub narrator: Option<EntityId>,
}

impl ActiveRun {
    pub fn new(pending: PendingRun, started_at: Duration, ephemeral: bool) -> Self {
        Self {
            id: RunId::new(),
            group: pending.group,
            initiator: pending.initiator,
            members: pending.roster,
            highest_level: pending.highest_level,
            started_at,
            current_wave: 0,
            phase: WavePhase::NotStarted,
            active_enemies: BTreeSet::new(),
            downed: BTreeMap::new(),
            permanently_failed: BTreeSet::new(),
            warned_for_boundary: BTreeSet::new(),
            forfeit_vote: None,
            is_ephemeral_roster: ephemeral,
            narrator: None,
        }
    }

    pub fn is_member(&self, participant: ParticipantId) -> bool {
        self.members.contains(&participant)
    }

    pub fn is_failed(&self, participant: ParticipantId) -> bool {
        self.permanently_failed.contains(&participant)
    }

    pub fn is_downed(&self, participant: ParticipantId) -> bool {
        self.downed.contains_key(&participant)
    }

    /// Members that have not permanently failed.
    pub fn survivors(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.members
            .iter()
            .copied()
            .filter(|m| !self.permanently_failed.contains(m))
    }

    /// Members still able to act, given a predicate for "online".
    pub fn active_members(&self, is_online: impl Fn(ParticipantId) -> bool) -> Vec<ParticipantId> {
        self.survivors()
            .filter(|m| !self.downed.contains_key(m) && is_online(*m))
            .collect()
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed { reason: String },
    /// Unanimous forfeit vote; nobody is penalised.
    Forfeited,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { reason } => write!(f, "failed ({reason})"),
            Self::Forfeited => write!(f, "forfeited"),
        }
    }
}

/// What a spawned entity means to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRole {
    Narrator { group: GroupId },
    WaveEnemy { group: GroupId, wave: u32 },
}
