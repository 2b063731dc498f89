use finality_core::participant::{GroupId, ParticipantId};

use crate::coordinator::Coordinator;
use crate::host::TrialHost;
use crate::store::PenaltyStore;

impl<H: TrialHost, S: PenaltyStore> Coordinator<H, S> {
    /// Periodic containment check for every run past its first announcement.
    pub(crate) fn sweep_boundaries(&mut self) {
        let groups: Vec<GroupId> = self
            .active
            .values()
            .filter(|r| r.current_wave > 0)
            .map(|r| r.group)
            .collect();
        for group in groups {
            self.check_boundaries(group);
        }
    }

    /// Warn first-time leavers; forfeit repeat leavers.
    pub(crate) fn check_boundaries(&mut self, group: GroupId) {
        let Some(run) = self.active.get(&group) else {
            return;
        };
        let arena = &self.config.arena;
        let mut warn = Vec::new();
        let mut forfeit = Vec::new();
        for m in run.members.iter().copied() {
            if run.is_failed(m) || run.is_downed(m) {
                continue;
            }
            let Some(view) = self.host.participant(m) else {
                continue;
            };
            if !view.is_present() || (view.is_gm && self.config.gm_boundary_exempt) {
                continue;
            }
            if view.location.is_within(&arena.center, arena.radius) {
                continue;
            }
            if run.warned_for_boundary.contains(&m) {
                forfeit.push((m, view.name));
            } else {
                warn.push(m);
            }
        }

        let forfeited_any = !forfeit.is_empty();
        for m in warn {
            self.warn_boundary(group, m);
        }
        for (m, name) in forfeit {
            self.forfeit_by_boundary(group, m, &name);
        }
        if forfeited_any
            && self.active.contains_key(&group)
            && self.active_participants(group).is_empty()
        {
            self.fail(group, "forfeited by leaving arena");
        }
    }

    fn warn_boundary(&mut self, group: GroupId, participant: ParticipantId) {
        if let Some(run) = self.active.get_mut(&group) {
            run.warned_for_boundary.insert(participant);
        }
        self.host.relocate(participant, self.config.arena.entrance);
        self.host.notify(
            participant,
            "You strayed from the arena and have been returned. Leave again and you forfeit the trial, permanently.",
        );
        tracing::warn!(group, participant, "Boundary warning issued");
    }

    fn forfeit_by_boundary(&mut self, group: GroupId, participant: ParticipantId, name: &str) {
        self.apply_penalty(group, participant, "left the arena");
        let text = format!("{name} has forfeited the Trial of Finality by leaving the arena.");
        let members = self
            .active
            .get(&group)
            .map(|r| r.members.clone())
            .unwrap_or_default();
        for m in members.into_iter().filter(|m| *m != participant) {
            self.host.notify(m, &text);
        }
        tracing::warn!(group, participant, "Participant forfeited by leaving the arena");
    }

    /// Members online, not downed and not permanently failed.
    pub(crate) fn active_participants(&self, group: GroupId) -> Vec<ParticipantId> {
        self.active.get(&group).map_or_else(Vec::new, |run| {
            run.active_members(|p| self.host.participant(p).is_some_and(|v| v.online))
        })
    }
}
