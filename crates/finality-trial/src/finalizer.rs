use finality_core::participant::{GroupId, ParticipantId};
use finality_core::time::unix_millis;

use crate::coordinator::Coordinator;
use crate::host::TrialHost;
use crate::run::{EntityRole, RunOutcome, WavePhase};
use crate::store::{PenaltyRecord, PenaltyStore};

impl<H: TrialHost, S: PenaltyStore> Coordinator<H, S> {
    /// Resolve a run and remove it. Calling again for a finished run is a
    /// no-op.
    pub fn finalize(&mut self, group: GroupId, outcome: RunOutcome) {
        let Some(run) = self.active.get_mut(&group) else {
            tracing::debug!(group, %outcome, "Finalize for missing run ignored");
            return;
        };
        if run.phase == WavePhase::Concluded {
            return;
        }
        run.phase = WavePhase::Concluded;
        run.forfeit_vote = None;
        let run_id = run.id;
        let wave = run.current_wave;

        match &outcome {
            RunOutcome::Failed { reason } => {
                let fallen: Vec<ParticipantId> =
                    std::mem::take(&mut run.downed).into_keys().collect();
                for p in fallen {
                    self.apply_penalty(group, p, reason);
                }
                self.notify_members(
                    group,
                    &format!("The Trial of Finality has ended in failure: {reason}."),
                );
            },
            RunOutcome::Succeeded => self.grant_rewards(group),
            RunOutcome::Forfeited => {
                self.notify_members(
                    group,
                    "Your group has forfeited the Trial of Finality. No one bears its curse.",
                );
            },
        }

        self.teardown(group);
        self.schedule.cancel_run(run_id);
        if let Some(run) = self.active.remove(&group) {
            tracing::info!(
                group,
                run = %run_id,
                wave,
                %outcome,
                failed = run.permanently_failed.len(),
                "Trial run finalized"
            );
        }
    }

    /// Permanently fail one participant of a run. Safe to call repeatedly.
    pub(crate) fn apply_penalty(&mut self, group: GroupId, participant: ParticipantId, reason: &str) {
        let Some(run) = self.active.get_mut(&group) else {
            return;
        };
        if !run.permanently_failed.insert(participant) {
            return;
        }
        run.downed.remove(&participant);

        let view = self.host.participant(participant);
        let exempt =
            self.config.gm_penalty_exempt && view.as_ref().is_some_and(|v| v.is_gm);
        if exempt {
            tracing::info!(group, participant, reason, "GM exempt from permanent penalty");
        } else {
            let record = PenaltyRecord {
                participant,
                name: view
                    .as_ref()
                    .map(|v| v.name.clone())
                    .unwrap_or_else(|| participant.to_string()),
                reason: reason.to_string(),
                recorded_at_ms: unix_millis(),
            };
            match self.store.flag(record) {
                Ok(()) => tracing::warn!(group, participant, reason, "Permanent penalty applied"),
                Err(e) => tracing::error!(
                    group,
                    participant,
                    error = %e,
                    "Failed to persist permanent penalty"
                ),
            }
        }

        self.host
            .remove_item(participant, self.config.marker_item_id);
        if view.is_some_and(|v| v.online) {
            let text = if exempt {
                "You have fallen in the Trial of Finality. As a GM, your character is spared."
            } else {
                "You have fallen in the Trial of Finality. This character is now retired."
            };
            self.host.notify(participant, text);
        }
    }

    fn grant_rewards(&mut self, group: GroupId) {
        let Some(run) = self.active.get(&group) else {
            return;
        };
        let survivors: Vec<ParticipantId> = run.survivors().collect();
        let initiator = run.initiator;
        let rewards = self.config.rewards.clone();

        let mut names = Vec::with_capacity(survivors.len());
        for p in &survivors {
            if rewards.currency > 0 {
                self.host.grant_currency(*p, rewards.currency);
            }
            if rewards.title > 0 {
                self.host.grant_title(*p, rewards.title);
            }
            self.host.notify(
                *p,
                "You have conquered the Trial of Finality! Your name will be remembered.",
            );
            names.push(self.display_name(*p));
        }

        if self.config.announcement.enabled {
            let text = self
                .config
                .announcement
                .template
                .replace("{initiator}", &self.display_name(initiator))
                .replace("{roster}", &names.join(", "));
            self.host.broadcast(&text);
        }
        if self.config.celebration_enabled {
            self.host.celebrate(self.config.arena.center);
        }
        tracing::info!(group, survivors = survivors.len(), "Trial rewards granted");
    }

    /// Remove every trace of the run from the world and the indexes.
    fn teardown(&mut self, group: GroupId) {
        let Some(run) = self.active.get_mut(&group) else {
            return;
        };
        let enemies = std::mem::take(&mut run.active_enemies);
        let narrator = run.narrator.take();
        let members = run.members.clone();
        let failed = run.permanently_failed.clone();
        let ephemeral = run.is_ephemeral_roster;

        for entity in enemies.into_iter().chain(narrator) {
            self.host.despawn(entity);
            self.entity_index.remove(&entity);
        }
        // Enemies of earlier waves are already gone; drop any index leftovers.
        self.entity_index.retain(|_, role| match role {
            EntityRole::Narrator { group: g } | EntityRole::WaveEnemy { group: g, .. } => {
                *g != group
            },
        });

        let marker = self.config.marker_item_id;
        let exit = self.config.arena.exit;
        for m in &members {
            self.host.remove_item(*m, marker);
            self.host.set_progression_suppressed(*m, false);
            if !failed.contains(m) {
                self.host.relocate(*m, exit);
            }
            if self.participant_index.get(m) == Some(&group) {
                self.participant_index.remove(m);
            }
        }
        if ephemeral {
            self.host.disband_group(group);
        }
    }

    fn notify_members(&mut self, group: GroupId, text: &str) {
        let members = self
            .active
            .get(&group)
            .map(|r| r.members.clone())
            .unwrap_or_default();
        for m in members {
            if self.host.participant(m).is_some_and(|v| v.online) {
                self.host.notify(m, text);
            }
        }
    }
}
