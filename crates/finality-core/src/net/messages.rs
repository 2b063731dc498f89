use serde::{Deserialize, Serialize};

use crate::geometry::Location;
use crate::participant::{EntityId, GroupId, ItemId, ParticipantId, ParticipantView, TemplateId};

/// Network message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Host simulation -> Server (world state)
    Hello = 0x01,
    ParticipantUpdate = 0x02,
    ParticipantRemoved = 0x03,
    GroupUpdate = 0x04,
    GroupDisbanded = 0x05,

    // Host simulation -> Server (player actions and combat hooks)
    TrialRequest = 0x10,
    ConfirmationResponse = 0x11,
    ForfeitVote = 0x12,
    CreatureDefeated = 0x13,
    ParticipantDied = 0x14,
    ParticipantResurrected = 0x15,
    ParticipantLogin = 0x16,
    ParticipantLogout = 0x17,

    // Server -> Host simulation
    Welcome = 0x20,
    Relocate = 0x21,
    SpawnCreature = 0x22,
    Despawn = 0x23,
    Announce = 0x24,
    GrantItem = 0x25,
    RemoveItem = 0x26,
    SetProgression = 0x27,
    GrantCurrency = 0x28,
    GrantTitle = 0x29,
    Notify = 0x2A,
    Broadcast = 0x2B,
    PromptConfirmation = 0x2C,
    CreateGroup = 0x2D,
    DisbandGroup = 0x2E,
    Celebrate = 0x2F,
    Disconnect = 0x30,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => Self::Hello,
            0x02 => Self::ParticipantUpdate,
            0x03 => Self::ParticipantRemoved,
            0x04 => Self::GroupUpdate,
            0x05 => Self::GroupDisbanded,
            0x10 => Self::TrialRequest,
            0x11 => Self::ConfirmationResponse,
            0x12 => Self::ForfeitVote,
            0x13 => Self::CreatureDefeated,
            0x14 => Self::ParticipantDied,
            0x15 => Self::ParticipantResurrected,
            0x16 => Self::ParticipantLogin,
            0x17 => Self::ParticipantLogout,
            0x20 => Self::Welcome,
            0x21 => Self::Relocate,
            0x22 => Self::SpawnCreature,
            0x23 => Self::Despawn,
            0x24 => Self::Announce,
            0x25 => Self::GrantItem,
            0x26 => Self::RemoveItem,
            0x27 => Self::SetProgression,
            0x28 => Self::GrantCurrency,
            0x29 => Self::GrantTitle,
            0x2A => Self::Notify,
            0x2B => Self::Broadcast,
            0x2C => Self::PromptConfirmation,
            0x2D => Self::CreateGroup,
            0x2E => Self::DisbandGroup,
            0x2F => Self::Celebrate,
            0x30 => Self::Disconnect,
            _ => return None,
        })
    }

    /// Whether this message type may only be sent by the server.
    pub fn is_server_only(self) -> bool {
        (self as u8) >= 0x20
    }
}

// ============================================================================
// Host -> Server
// ============================================================================

/// First message on a host connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMsg {
    pub protocol_version: u8,
    pub realm: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRefMsg {
    pub participant: ParticipantId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRefMsg {
    pub group: GroupId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRefMsg {
    pub entity: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUpdateMsg {
    pub group: GroupId,
    pub members: Vec<ParticipantId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationResponseMsg {
    pub participant: ParticipantId,
    pub accept: bool,
}

/// All messages the host simulation sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostMessage {
    Hello(HelloMsg),
    ParticipantUpdate(ParticipantView),
    ParticipantRemoved(ParticipantRefMsg),
    GroupUpdate(GroupUpdateMsg),
    GroupDisbanded(GroupRefMsg),
    TrialRequest(ParticipantRefMsg),
    ConfirmationResponse(ConfirmationResponseMsg),
    ForfeitVote(ParticipantRefMsg),
    CreatureDefeated(EntityRefMsg),
    ParticipantDied(ParticipantRefMsg),
    ParticipantResurrected(ParticipantRefMsg),
    ParticipantLogin(ParticipantRefMsg),
    ParticipantLogout(ParticipantRefMsg),
}

// ============================================================================
// Server -> Host
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeMsg {
    pub protocol_version: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelocateMsg {
    pub participant: ParticipantId,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnCreatureMsg {
    /// Server-assigned identity; the host reports defeats against it.
    pub entity: EntityId,
    pub template: TemplateId,
    pub location: Location,
    pub level: u8,
    pub health_multiplier: f32,
    pub buffs: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceMsg {
    pub entity: EntityId,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMsg {
    pub participant: ParticipantId,
    pub item: ItemId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionMsg {
    pub participant: ParticipantId,
    pub suppressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyMsg {
    pub participant: ParticipantId,
    pub amount: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleMsg {
    pub participant: ParticipantId,
    pub title: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyMsg {
    pub participant: ParticipantId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMsg {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConfirmationMsg {
    pub participant: ParticipantId,
    pub initiator_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGroupMsg {
    pub group: GroupId,
    pub leader: ParticipantId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CelebrateMsg {
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectMsg {
    pub participant: ParticipantId,
    pub reason: String,
}

/// All messages the server sends to the host simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Welcome(WelcomeMsg),
    Relocate(RelocateMsg),
    SpawnCreature(SpawnCreatureMsg),
    Despawn(EntityRefMsg),
    Announce(AnnounceMsg),
    GrantItem(ItemMsg),
    RemoveItem(ItemMsg),
    SetProgression(ProgressionMsg),
    GrantCurrency(CurrencyMsg),
    GrantTitle(TitleMsg),
    Notify(NotifyMsg),
    Broadcast(BroadcastMsg),
    PromptConfirmation(PromptConfirmationMsg),
    CreateGroup(CreateGroupMsg),
    DisbandGroup(GroupRefMsg),
    Celebrate(CelebrateMsg),
    Disconnect(DisconnectMsg),
}
