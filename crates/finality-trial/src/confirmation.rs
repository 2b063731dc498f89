use finality_core::participant::{GroupId, ParticipantId};

use crate::coordinator::Coordinator;
use crate::error::TrialError;
use crate::host::TrialHost;
use crate::run::{ActiveRun, EntityRole, PendingRun, RunId, RunOutcome, WavePhase};
use crate::schedule::TaskKind;
use crate::store::PenaltyStore;

impl<H: TrialHost, S: PenaltyStore> Coordinator<H, S> {
    /// A participant accepted or declined a pending run.
    pub fn on_confirmation_received(
        &mut self,
        participant: ParticipantId,
        accept: bool,
    ) -> Result<(), TrialError> {
        let group = self
            .pending
            .values()
            .find(|p| p.to_confirm.contains(&participant))
            .map(|p| p.group)
            .ok_or(TrialError::NotAwaitingConfirmation)?;
        let name = self.display_name(participant);

        if !accept {
            self.abort_pending(group, &format!("declined by {name}"));
            return Ok(());
        }

        let Some(pending) = self.pending.get_mut(&group) else {
            return Err(TrialError::NotAwaitingConfirmation);
        };
        if !pending.accepted.insert(participant) {
            return Err(TrialError::AlreadyConfirmed);
        }
        let initiator = pending.initiator;
        let progress = format!(
            "{name} accepted the Trial of Finality ({}/{})",
            pending.accepted.len(),
            pending.to_confirm.len()
        );
        let ready = pending.is_fully_confirmed();
        tracing::info!(group, participant, "Trial confirmation accepted");
        self.host.notify(initiator, &progress);

        if ready && let Some(pending) = self.pending.remove(&group) {
            if let Some(who) = self.first_unready_member(&pending) {
                self.notify_aborted(&pending, &format!("{who} can no longer enter"));
                return Ok(());
            }
            self.start_run(pending, false);
        }
        Ok(())
    }

    /// Abort a pending run and tell everyone involved.
    pub(crate) fn abort_pending(&mut self, group: GroupId, reason: &str) {
        if let Some(pending) = self.pending.remove(&group) {
            self.notify_aborted(&pending, reason);
        }
    }

    fn notify_aborted(&mut self, pending: &PendingRun, reason: &str) {
        tracing::info!(group = pending.group, reason, "Pending trial aborted");
        let text = format!("The Trial of Finality was cancelled: {reason}");
        for p in &pending.roster {
            self.host.notify(*p, &text);
        }
    }

    /// Between prompt and start a member may have gone offline or been
    /// flagged. Returns the name of the first such member.
    fn first_unready_member(&self, pending: &PendingRun) -> Option<String> {
        pending.roster.iter().find_map(|id| match self.host.participant(*id) {
            Some(v) if v.online && !self.store.is_flagged(*id) => None,
            Some(v) => Some(v.name),
            None => Some(id.to_string()),
        })
    }

    /// Time out stale pending runs and drop those whose group vanished.
    pub(crate) fn sweep_pending(&mut self) {
        let timeout = self.config.confirmation_timeout();
        let mut expired = Vec::new();
        let mut orphaned = Vec::new();
        for (group, pending) in &self.pending {
            if self.now.saturating_sub(pending.created_at) > timeout {
                expired.push(*group);
            } else if self.host.group_members(*group).is_empty() {
                orphaned.push(*group);
            }
        }
        for group in expired {
            self.abort_pending(group, "timed out");
        }
        for group in orphaned {
            self.abort_pending(group, "the group disbanded");
        }
    }

    /// Turn a fully confirmed pending run into an active one.
    pub(crate) fn start_run(&mut self, pending: PendingRun, ephemeral: bool) -> RunId {
        let group = pending.group;
        let mut run = ActiveRun::new(pending, self.now, ephemeral);
        let run_id = run.id;
        for m in &run.members {
            self.participant_index.insert(*m, group);
        }

        let arena = self.config.arena.clone();
        if !self.host.is_map_available(arena.center.map) {
            tracing::error!(group, run = %run_id, map = arena.center.map, "Arena map unavailable");
            for m in &run.members {
                self.host.notify(
                    *m,
                    "The arena could not be prepared. The trial has been called off, we apologise for the inconvenience.",
                );
            }
            self.active.insert(group, run);
            self.finalize(
                group,
                RunOutcome::Failed {
                    reason: "arena unavailable".to_string(),
                },
            );
            return run_id;
        }

        for m in &run.members {
            self.apply_entry_effects(*m);
        }

        run.narrator = self
            .host
            .spawn_narrator(self.config.narrator_template, arena.center);
        if let Some(narrator) = run.narrator {
            self.entity_index
                .insert(narrator, EntityRole::Narrator { group });
            self.host.announce(
                narrator,
                &format!(
                    "Welcome, challengers, to the Trial of Finality! {} waves stand between you and glory. Fall, and you fall forever.",
                    self.config.total_waves
                ),
            );
        }

        run.phase = WavePhase::Preparing(1);
        let delay = self.config.first_wave_delay();
        self.schedule_task(run_id, group, 1, TaskKind::PrepareWave, delay);
        tracing::info!(group, run = %run_id, members = run.members.len(), "Trial run started");
        self.active.insert(group, run);
        run_id
    }

    /// Put a participant into the arena with the run's entry effects.
    pub(crate) fn apply_entry_effects(&mut self, participant: ParticipantId) {
        let marker = self.config.marker_item_id;
        self.host.relocate(participant, self.config.arena.entrance);
        if !self.host.has_item(participant, marker) {
            self.host.grant_item(participant, marker);
        }
        self.host.set_progression_suppressed(participant, true);
    }

    pub(crate) fn display_name(&self, participant: ParticipantId) -> String {
        self.host
            .participant(participant)
            .map(|v| v.name)
            .unwrap_or_else(|| participant.to_string())
    }
}
