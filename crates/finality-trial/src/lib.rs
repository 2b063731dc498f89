pub mod boundary;
pub mod config;
pub mod confirmation;
pub mod coordinator;
pub mod error;
pub mod finalizer;
pub mod forfeit;
pub mod host;
pub mod participants;
pub mod run;
pub mod schedule;
pub mod store;
pub mod waves;

#[cfg(test)]
mod scenarios;

pub use config::{ConfigError, TrialConfig};
pub use coordinator::{Coordinator, InitiateOutcome, TrialStatus};
pub use error::TrialError;
pub use host::{EnemySpawn, TrialHost};
pub use participants::LoginVerdict;
pub use run::{RunId, RunOutcome, WavePhase};
pub use store::{AnyPenaltyStore, FilePenaltyStore, MemoryPenaltyStore, PenaltyRecord, PenaltyStore, StoreError};

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_support {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;

    use finality_core::geometry::Location;
    use finality_core::participant::{
        EntityId, GroupId, ItemId, ParticipantId, ParticipantView, TemplateId,
    };
    use finality_core::test_helpers::{at, make_group};

    use crate::config::TrialConfig;
    use crate::coordinator::Coordinator;
    use crate::host::{EnemySpawn, TrialHost};
    use crate::run::{EntityRole, WavePhase};
    use crate::store::MemoryPenaltyStore;

    pub type TestCoordinator = Coordinator<FakeHost, MemoryPenaltyStore>;

    /// In-memory world that records every command it receives.
    #[derive(Debug, Default)]
    pub struct FakeHost {
        pub participants: BTreeMap<ParticipantId, ParticipantView>,
        pub groups: BTreeMap<GroupId, Vec<ParticipantId>>,
        pub unavailable_maps: BTreeSet<u32>,
        pub refuse_spawns: bool,
        pub spawned: Vec<(EntityId, EnemySpawn)>,
        pub narrators: Vec<EntityId>,
        pub despawned: Vec<EntityId>,
        pub announcements: Vec<(EntityId, String)>,
        pub notifications: Vec<(ParticipantId, String)>,
        pub broadcasts: Vec<String>,
        pub prompts: Vec<(ParticipantId, String)>,
        pub currency: BTreeMap<ParticipantId, u64>,
        pub titles: Vec<(ParticipantId, u32)>,
        pub suppressed: BTreeSet<ParticipantId>,
        pub celebrations: usize,
        pub disconnected: Vec<ParticipantId>,
        pub disbanded: Vec<GroupId>,
        next_entity: EntityId,
        next_group: GroupId,
    }

    impl FakeHost {
        /// `n` participants with ids 1..=n grouped under `group`.
        pub fn with_group(n: usize, group: GroupId, level: u8) -> Self {
            let mut host = Self::default();
            for p in make_group(n, group, level) {
                host.add(p);
            }
            host
        }

        pub fn add(&mut self, view: ParticipantView) {
            if let Some(g) = view.group {
                self.groups.entry(g).or_default().push(view.id);
            }
            self.participants.insert(view.id, view);
        }

        /// Add participants with the given ids as a new group.
        pub fn add_group(&mut self, ids: &[ParticipantId], group: GroupId, level: u8) {
            for id in ids {
                let mut p = finality_core::test_helpers::make_participant(*id, level);
                p.group = Some(group);
                self.add(p);
            }
        }

        /// # Panics
        /// If the participant does not exist.
        pub fn participant_mut(&mut self, id: ParticipantId) -> &mut ParticipantView {
            self.participants
                .get_mut(&id)
                .unwrap_or_else(|| panic!("no participant {id}"))
        }

        /// Remove a group as if the host dissolved it.
        pub fn disband(&mut self, group: GroupId) {
            for id in self.groups.remove(&group).unwrap_or_default() {
                if let Some(p) = self.participants.get_mut(&id) {
                    p.group = None;
                }
            }
        }

        pub fn notes_for(&self, id: ParticipantId) -> Vec<&str> {
            self.notifications
                .iter()
                .filter(|(p, _)| *p == id)
                .map(|(_, t)| t.as_str())
                .collect()
        }

        /// Spawned enemies not yet despawned.
        pub fn live_enemies(&self) -> Vec<(EntityId, EnemySpawn)> {
            self.spawned
                .iter()
                .filter(|(e, _)| !self.despawned.contains(e))
                .cloned()
                .collect()
        }

        fn mint_entity(&mut self) -> EntityId {
            self.next_entity += 1;
            1000 + self.next_entity
        }
    }

    impl TrialHost for FakeHost {
        fn participant(&self, id: ParticipantId) -> Option<ParticipantView> {
            self.participants.get(&id).cloned()
        }

        fn group_members(&self, group: GroupId) -> Vec<ParticipantId> {
            self.groups.get(&group).cloned().unwrap_or_default()
        }

        fn create_solo_group(&mut self, leader: ParticipantId) -> Option<GroupId> {
            self.next_group += 1;
            let group = 90_000 + self.next_group;
            self.participants.get_mut(&leader)?.group = Some(group);
            self.groups.insert(group, vec![leader]);
            Some(group)
        }

        fn disband_group(&mut self, group: GroupId) {
            self.disband(group);
            self.disbanded.push(group);
        }

        fn is_map_available(&self, map: u32) -> bool {
            !self.unavailable_maps.contains(&map)
        }

        fn relocate(&mut self, participant: ParticipantId, location: Location) {
            if let Some(p) = self.participants.get_mut(&participant) {
                p.location = location;
            }
        }

        fn spawn_enemy(&mut self, spawn: &EnemySpawn) -> Option<EntityId> {
            if self.refuse_spawns {
                return None;
            }
            let id = self.mint_entity();
            self.spawned.push((id, spawn.clone()));
            Some(id)
        }

        fn spawn_narrator(&mut self, _template: TemplateId, _location: Location) -> Option<EntityId> {
            let id = self.mint_entity();
            self.narrators.push(id);
            Some(id)
        }

        fn despawn(&mut self, entity: EntityId) {
            self.despawned.push(entity);
        }

        fn announce(&mut self, entity: EntityId, text: &str) {
            self.announcements.push((entity, text.to_string()));
        }

        fn grant_item(&mut self, participant: ParticipantId, item: ItemId) {
            if let Some(p) = self.participants.get_mut(&participant)
                && !p.items.contains(&item)
            {
                p.items.push(item);
            }
        }

        fn remove_item(&mut self, participant: ParticipantId, item: ItemId) {
            if let Some(p) = self.participants.get_mut(&participant) {
                p.items.retain(|i| *i != item);
            }
        }

        fn set_progression_suppressed(&mut self, participant: ParticipantId, suppressed: bool) {
            if suppressed {
                self.suppressed.insert(participant);
            } else {
                self.suppressed.remove(&participant);
            }
        }

        fn grant_currency(&mut self, participant: ParticipantId, amount: u64) {
            *self.currency.entry(participant).or_default() += amount;
        }

        fn grant_title(&mut self, participant: ParticipantId, title: u32) {
            self.titles.push((participant, title));
        }

        fn broadcast(&mut self, text: &str) {
            self.broadcasts.push(text.to_string());
        }

        fn notify(&mut self, participant: ParticipantId, text: &str) {
            self.notifications.push((participant, text.to_string()));
        }

        fn request_confirmation(&mut self, participant: ParticipantId, initiator_name: &str) {
            self.prompts.push((participant, initiator_name.to_string()));
        }

        fn celebrate(&mut self, _location: Location) {
            self.celebrations += 1;
        }

        fn disconnect(&mut self, participant: ParticipantId, _reason: &str) {
            if let Some(p) = self.participants.get_mut(&participant) {
                p.online = false;
            }
            self.disconnected.push(participant);
        }
    }

    /// Arena around the fixture origin with short, test-friendly delays.
    pub fn test_config() -> TrialConfig {
        let mut cfg = TrialConfig {
            first_wave_delay_ms: 3_000,
            announce_delay_ms: 1_000,
            inter_wave_delay_ms: 2_000,
            pending_sweep_interval_ms: 500,
            boundary_check_interval_ms: 500,
            vote_sweep_interval_ms: 500,
            confirmation_timeout_secs: 30,
            forfeit_vote_timeout_secs: 10,
            rng_seed: Some(7),
            ..TrialConfig::default()
        };
        cfg.arena.center = at(0.0, 0.0);
        cfg.arena.radius = 50.0;
        cfg.arena.entrance = at(0.0, 0.0);
        cfg.arena.exit = at(200.0, 200.0);
        cfg.arena.spawn_points = vec![
            at(10.0, 10.0),
            at(-10.0, 10.0),
            at(10.0, -10.0),
            at(-10.0, -10.0),
            at(20.0, 0.0),
            at(-20.0, 0.0),
        ];
        cfg
    }

    pub fn coordinator(config: TrialConfig, host: FakeHost) -> TestCoordinator {
        Coordinator::new(Arc::new(config), host, MemoryPenaltyStore::new())
    }

    /// Report every live enemy of the group's current wave as defeated.
    pub fn defeat_all(c: &mut TestCoordinator, group: GroupId) {
        let enemies: Vec<EntityId> = c
            .active_run(group)
            .map(|r| r.active_enemies.iter().copied().collect())
            .unwrap_or_default();
        for e in enemies {
            c.on_enemy_defeated(e);
        }
    }

    /// Start the group's run (the first host-listed member initiates, the
    /// `confirmers` accept) and play until `wave` has spawned.
    ///
    /// # Panics
    /// If the run cannot be started or ends before reaching `wave`.
    pub fn advance_to_wave(
        c: &mut TestCoordinator,
        group: GroupId,
        confirmers: &[ParticipantId],
        wave: u32,
    ) {
        let initiator = c.host().group_members(group)[0];
        c.initiate(initiator).unwrap_or_else(|e| panic!("initiate failed: {e}"));
        for p in confirmers {
            c.on_confirmation_received(*p, true)
                .unwrap_or_else(|e| panic!("confirm failed: {e}"));
        }
        let cfg = c.config().clone();
        c.tick(cfg.first_wave_delay());
        c.tick(cfg.announce_delay());
        for _ in 1..wave {
            defeat_all(c, group);
            c.tick(cfg.inter_wave_delay());
            c.tick(cfg.announce_delay());
        }
        let run = c
            .active_run(group)
            .unwrap_or_else(|| panic!("run for group {group} ended early"));
        assert_eq!(run.phase, WavePhase::Active(wave));
        debug_assert!(
            run.active_enemies
                .iter()
                .all(|e| matches!(c.entity_role(*e), Some(EntityRole::WaveEnemy { .. })))
        );
    }
}
