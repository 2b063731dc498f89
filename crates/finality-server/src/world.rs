use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;

use finality_core::geometry::Location;
use finality_core::net::messages::{
    AnnounceMsg, BroadcastMsg, CelebrateMsg, CreateGroupMsg, CurrencyMsg, DisconnectMsg,
    EntityRefMsg, GroupRefMsg, ItemMsg, NotifyMsg, ProgressionMsg, PromptConfirmationMsg,
    RelocateMsg, ServerMessage, SpawnCreatureMsg, TitleMsg,
};
use finality_core::net::protocol::encode_server_message;
use finality_core::participant::{
    EntityId, GroupId, ItemId, ParticipantId, ParticipantView, TemplateId,
};
use finality_trial::{EnemySpawn, TrialHost};

/// Entity ids minted by the server start here so they never collide with
/// host-side GUIDs in logs.
const FIRST_ENTITY_ID: EntityId = 1 << 40;
/// Server-created solo groups live above every host group id.
const FIRST_GROUP_ID: GroupId = 1 << 48;

/// Server-side mirror of the host simulation.
///
/// Queries answer from the snapshots the host streams in; commands are
/// encoded and queued for the host connection, and optimistically applied
/// to the mirror so the coordinator sees its own effects before the host
/// echoes them back.
#[derive(Debug, Default)]
pub struct RemoteWorld {
    participants: HashMap<ParticipantId, ParticipantView>,
    groups: HashMap<GroupId, Vec<ParticipantId>>,
    outbound: Option<mpsc::Sender<Bytes>>,
    next_entity: EntityId,
    next_group: GroupId,
    dropped: u64,
}

impl RemoteWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn attach(&mut self, outbound: mpsc::Sender<Bytes>) {
        self.outbound = Some(outbound);
    }

    pub fn detach(&mut self) {
        self.outbound = None;
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Commands that could not be delivered since startup.
    pub fn dropped_commands(&self) -> u64 {
        self.dropped
    }

    /// Replace the snapshot of one participant, keeping group rosters in sync.
    pub fn upsert_participant(&mut self, view: ParticipantView) {
        let previous_group = self.participants.get(&view.id).and_then(|p| p.group);
        if previous_group != view.group {
            if let Some(old) = previous_group {
                self.remove_from_group(old, view.id);
            }
            if let Some(new) = view.group {
                let members = self.groups.entry(new).or_default();
                if !members.contains(&view.id) {
                    members.push(view.id);
                }
            }
        }
        self.participants.insert(view.id, view);
    }

    pub fn remove_participant(&mut self, id: ParticipantId) {
        if let Some(view) = self.participants.remove(&id)
            && let Some(group) = view.group
        {
            self.remove_from_group(group, id);
        }
    }

    pub fn set_online(&mut self, id: ParticipantId, online: bool) {
        if let Some(p) = self.participants.get_mut(&id) {
            p.online = online;
        }
    }

    /// Replace a group's roster. Members listed here are assigned to the group.
    pub fn set_group(&mut self, group: GroupId, members: Vec<ParticipantId>) {
        if let Some(old) = self.groups.get(&group) {
            for id in old.iter().filter(|id| !members.contains(id)) {
                if let Some(p) = self.participants.get_mut(id)
                    && p.group == Some(group)
                {
                    p.group = None;
                }
            }
        }
        for id in &members {
            let previous = self
                .participants
                .get_mut(id)
                .and_then(|p| p.group.replace(group));
            if let Some(prev) = previous
                && prev != group
            {
                self.remove_from_group(prev, *id);
            }
        }
        self.groups.insert(group, members);
    }

    pub fn remove_group(&mut self, group: GroupId) {
        for id in self.groups.remove(&group).unwrap_or_default() {
            if let Some(p) = self.participants.get_mut(&id)
                && p.group == Some(group)
            {
                p.group = None;
            }
        }
    }

    fn remove_from_group(&mut self, group: GroupId, id: ParticipantId) {
        if let Some(members) = self.groups.get_mut(&group) {
            members.retain(|m| *m != id);
            if members.is_empty() {
                self.groups.remove(&group);
            }
        }
    }

    fn send(&mut self, msg: ServerMessage) {
        let Some(tx) = &self.outbound else {
            self.dropped += 1;
            tracing::debug!(?msg, "No host connected, command dropped");
            return;
        };
        let data = match encode_server_message(&msg) {
            Ok(data) => data,
            Err(e) => {
                self.dropped += 1;
                tracing::error!(error = %e, "Failed to encode host command");
                return;
            },
        };
        if let Err(e) = tx.try_send(Bytes::from(data)) {
            self.dropped += 1;
            tracing::warn!(error = %e, "Host command buffer unavailable, command dropped");
        }
    }

    fn mint_entity(&mut self) -> EntityId {
        self.next_entity += 1;
        FIRST_ENTITY_ID + self.next_entity
    }
}

impl TrialHost for RemoteWorld {
    fn participant(&self, id: ParticipantId) -> Option<ParticipantView> {
        self.participants.get(&id).cloned()
    }

    fn group_members(&self, group: GroupId) -> Vec<ParticipantId> {
        self.groups.get(&group).cloned().unwrap_or_default()
    }

    fn create_solo_group(&mut self, leader: ParticipantId) -> Option<GroupId> {
        if !self.participants.contains_key(&leader) || !self.is_connected() {
            return None;
        }
        self.next_group += 1;
        let group = FIRST_GROUP_ID + self.next_group;
        self.set_group(group, vec![leader]);
        self.send(ServerMessage::CreateGroup(CreateGroupMsg { group, leader }));
        Some(group)
    }

    fn disband_group(&mut self, group: GroupId) {
        self.remove_group(group);
        self.send(ServerMessage::DisbandGroup(GroupRefMsg { group }));
    }

    fn is_map_available(&self, _map: u32) -> bool {
        self.is_connected()
    }

    fn relocate(&mut self, participant: ParticipantId, location: Location) {
        if let Some(p) = self.participants.get_mut(&participant) {
            p.location = location;
        }
        self.send(ServerMessage::Relocate(RelocateMsg {
            participant,
            location,
        }));
    }

    fn spawn_enemy(&mut self, spawn: &EnemySpawn) -> Option<EntityId> {
        if !self.is_connected() {
            return None;
        }
        let entity = self.mint_entity();
        self.send(ServerMessage::SpawnCreature(SpawnCreatureMsg {
            entity,
            template: spawn.template,
            location: spawn.location,
            level: spawn.level,
            health_multiplier: spawn.health_multiplier,
            buffs: spawn.buffs.clone(),
        }));
        Some(entity)
    }

    fn spawn_narrator(&mut self, template: TemplateId, location: Location) -> Option<EntityId> {
        if !self.is_connected() {
            return None;
        }
        let entity = self.mint_entity();
        self.send(ServerMessage::SpawnCreature(SpawnCreatureMsg {
            entity,
            template,
            location,
            level: 0,
            health_multiplier: 1.0,
            buffs: Vec::new(),
        }));
        Some(entity)
    }

    fn despawn(&mut self, entity: EntityId) {
        self.send(ServerMessage::Despawn(EntityRefMsg { entity }));
    }

    fn announce(&mut self, entity: EntityId, text: &str) {
        self.send(ServerMessage::Announce(AnnounceMsg {
            entity,
            text: text.to_string(),
        }));
    }

    fn grant_item(&mut self, participant: ParticipantId, item: ItemId) {
        if let Some(p) = self.participants.get_mut(&participant)
            && !p.items.contains(&item)
        {
            p.items.push(item);
        }
        self.send(ServerMessage::GrantItem(ItemMsg { participant, item }));
    }

    fn remove_item(&mut self, participant: ParticipantId, item: ItemId) {
        if let Some(p) = self.participants.get_mut(&participant) {
            p.items.retain(|i| *i != item);
        }
        self.send(ServerMessage::RemoveItem(ItemMsg { participant, item }));
    }

    fn set_progression_suppressed(&mut self, participant: ParticipantId, suppressed: bool) {
        self.send(ServerMessage::SetProgression(ProgressionMsg {
            participant,
            suppressed,
        }));
    }

    fn grant_currency(&mut self, participant: ParticipantId, amount: u64) {
        self.send(ServerMessage::GrantCurrency(CurrencyMsg {
            participant,
            amount,
        }));
    }

    fn grant_title(&mut self, participant: ParticipantId, title: u32) {
        self.send(ServerMessage::GrantTitle(TitleMsg { participant, title }));
    }

    fn broadcast(&mut self, text: &str) {
        self.send(ServerMessage::Broadcast(BroadcastMsg {
            text: text.to_string(),
        }));
    }

    fn notify(&mut self, participant: ParticipantId, text: &str) {
        self.send(ServerMessage::Notify(NotifyMsg {
            participant,
            text: text.to_string(),
        }));
    }

    fn request_confirmation(&mut self, participant: ParticipantId, initiator_name: &str) {
        self.send(ServerMessage::PromptConfirmation(PromptConfirmationMsg {
            participant,
            initiator_name: initiator_name.to_string(),
        }));
    }

    fn celebrate(&mut self, location: Location) {
        self.send(ServerMessage::Celebrate(CelebrateMsg { location }));
    }

    fn disconnect(&mut self, participant: ParticipantId, reason: &str) {
        self.set_online(participant, false);
        self.send(ServerMessage::Disconnect(DisconnectMsg {
            participant,
            reason: reason.to_string(),
        }));
    }
}
