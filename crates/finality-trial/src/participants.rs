use serde::{Deserialize, Serialize};

use finality_core::participant::{GroupId, ParticipantId};

use crate::coordinator::Coordinator;
use crate::host::TrialHost;
use crate::store::PenaltyStore;

/// What happened when a participant logged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginVerdict {
    /// Carries a persisted penalty; the session was ended.
    Rejected,
    /// Returned to an active run.
    Rejoined,
    /// Held a marker from a run that ended while they were away.
    MarkerCleared,
    Allowed,
}

impl<H: TrialHost, S: PenaltyStore> Coordinator<H, S> {
    /// Group of the active run `participant` is a live (not permanently
    /// failed) member of.
    fn live_member_group(&self, participant: ParticipantId) -> Option<GroupId> {
        let group = self.participant_index.get(&participant).copied()?;
        let run = self.active.get(&group)?;
        (run.is_member(participant) && !run.is_failed(participant)).then_some(group)
    }

    pub fn on_participant_downed(&mut self, participant: ParticipantId) {
        let Some(group) = self.live_member_group(participant) else {
            tracing::debug!(participant, "Downed participant is not in a run");
            return;
        };
        let now = self.now;
        let Some(run) = self.active.get_mut(&group) else {
            return;
        };
        if run.is_downed(participant) {
            return;
        }
        run.downed.insert(participant, now);
        tracing::info!(group, participant, wave = run.current_wave, "Participant downed");
        self.host.notify(
            participant,
            "You have fallen! If your allies clear this wave before you are revived, your fall is permanent.",
        );
        self.check_full_wipe(group);
    }

    pub fn on_participant_resurrected(&mut self, participant: ParticipantId) {
        let Some(group) = self.live_member_group(participant) else {
            tracing::debug!(participant, "Resurrected participant is not in a run");
            return;
        };
        let Some(run) = self.active.get_mut(&group) else {
            return;
        };
        if run.downed.remove(&participant).is_some() {
            tracing::info!(group, participant, "Participant resurrected");
        } else {
            tracing::debug!(group, participant, "Resurrection of participant who was not downed");
        }
    }

    /// Going offline mid-run counts as being downed.
    pub fn on_participant_disconnected(&mut self, participant: ParticipantId) {
        let Some(group) = self.live_member_group(participant) else {
            return;
        };
        let now = self.now;
        let Some(run) = self.active.get_mut(&group) else {
            return;
        };
        if run.is_downed(participant) {
            return;
        }
        run.downed.insert(participant, now);
        tracing::info!(group, participant, "Participant disconnected mid-run, treated as downed");
        self.check_full_wipe(group);
    }

    /// Gate a login: turn away the permanently failed, put returning members
    /// back into their run, and clean up markers from runs that ended.
    pub fn on_participant_login(&mut self, participant: ParticipantId) -> LoginVerdict {
        if self.store.is_flagged(participant) {
            tracing::info!(participant, "Rejecting login of permanently failed participant");
            self.host.notify(
                participant,
                "You died in the Trial of Finality. Your journey is over.",
            );
            self.host.disconnect(participant, "Your journey is over");
            return LoginVerdict::Rejected;
        }

        if let Some(group) = self.live_member_group(participant) {
            self.apply_entry_effects(participant);
            self.host
                .notify(participant, "You return to the Trial of Finality.");
            tracing::info!(group, participant, "Participant rejoined run");
            return LoginVerdict::Rejoined;
        }

        let marker = self.config.marker_item_id;
        if self.host.has_item(participant, marker) {
            self.host.remove_item(participant, marker);
            self.host.set_progression_suppressed(participant, false);
            self.host.relocate(participant, self.config.arena.exit);
            self.host.notify(
                participant,
                "Your Trial of Finality ended while you were away.",
            );
            tracing::info!(participant, "Cleared marker left over from a finished run");
            return LoginVerdict::MarkerCleared;
        }

        LoginVerdict::Allowed
    }

    /// Every member not permanently failed is downed or offline.
    pub(crate) fn check_full_wipe(&mut self, group: GroupId) {
        let Some(run) = self.active.get(&group) else {
            return;
        };
        let wiped = run.survivors().all(|m| {
            run.is_downed(m) || !self.host.participant(m).is_some_and(|v| v.online)
        });
        if wiped {
            self.fail(group, "full wipe");
        }
    }
}
