use finality_core::geometry::Location;
use finality_core::participant::{
    EntityId, GroupId, ItemId, ParticipantId, ParticipantView, TemplateId,
};

/// One enemy the wave state machine asks the host to create.
#[derive(Debug, Clone, PartialEq)]
pub struct EnemySpawn {
    pub template: TemplateId,
    pub location: Location,
    pub level: u8,
    pub health_multiplier: f32,
    pub buffs: Vec<u32>,
}

/// Everything the engine needs from the surrounding game simulation.
///
/// Queries take `&self`; commands take `&mut self` and are fire-and-forget
/// unless they return an identity.
pub trait TrialHost {
    fn participant(&self, id: ParticipantId) -> Option<ParticipantView>;

    /// Current members of a group. Empty when the group no longer exists.
    fn group_members(&self, group: GroupId) -> Vec<ParticipantId>;

    /// Create a single-member group led by `leader`.
    fn create_solo_group(&mut self, leader: ParticipantId) -> Option<GroupId>;

    fn disband_group(&mut self, group: GroupId);

    fn is_map_available(&self, map: u32) -> bool;

    fn relocate(&mut self, participant: ParticipantId, location: Location);

    /// Returns `None` if the host could not place the creature.
    fn spawn_enemy(&mut self, spawn: &EnemySpawn) -> Option<EntityId>;

    fn spawn_narrator(&mut self, template: TemplateId, location: Location) -> Option<EntityId>;

    fn despawn(&mut self, entity: EntityId);

    /// Make an NPC speak to everyone nearby.
    fn announce(&mut self, entity: EntityId, text: &str);

    fn has_item(&self, participant: ParticipantId, item: ItemId) -> bool {
        self.participant(participant)
            .is_some_and(|p| p.carries(item))
    }

    fn grant_item(&mut self, participant: ParticipantId, item: ItemId);

    fn remove_item(&mut self, participant: ParticipantId, item: ItemId);

    /// Stop (or resume) experience gain.
    fn set_progression_suppressed(&mut self, participant: ParticipantId, suppressed: bool);

    fn grant_currency(&mut self, participant: ParticipantId, amount: u64);

    fn grant_title(&mut self, participant: ParticipantId, title: u32);

    /// World-wide message.
    fn broadcast(&mut self, text: &str);

    fn notify(&mut self, participant: ParticipantId, text: &str);

    /// Ask a participant to accept or decline joining a run.
    fn request_confirmation(&mut self, participant: ParticipantId, initiator_name: &str);

    fn celebrate(&mut self, location: Location);

    /// Forcibly end a participant's session.
    fn disconnect(&mut self, participant: ParticipantId, reason: &str);
}
