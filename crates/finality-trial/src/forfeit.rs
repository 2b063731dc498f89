use std::collections::BTreeSet;

use finality_core::participant::{GroupId, ParticipantId};

use crate::coordinator::Coordinator;
use crate::host::TrialHost;
use crate::run::{ForfeitVote, RunOutcome};
use crate::store::PenaltyStore;

/// Fewest active participants for which a vote is meaningful.
const MIN_VOTERS: usize = 2;

impl<H: TrialHost, S: PenaltyStore> Coordinator<H, S> {
    /// A participant voted to abandon their run without penalty.
    pub fn on_forfeit_vote_cast(&mut self, participant: ParticipantId) {
        let Some(group) = self.participant_index.get(&participant).copied() else {
            tracing::debug!(participant, "Forfeit vote from participant not in a run");
            return;
        };
        let active = self.active_participants(group);
        if !active.contains(&participant) {
            tracing::debug!(group, participant, "Forfeit vote from inactive participant ignored");
            return;
        }
        let now = self.now;
        let Some(run) = self.active.get_mut(&group) else {
            return;
        };

        match &mut run.forfeit_vote {
            Some(vote) => {
                if !vote.voted.insert(participant) {
                    return;
                }
            },
            None => {
                if active.len() < MIN_VOTERS {
                    self.host.notify(
                        participant,
                        "A forfeit vote needs at least two participants still standing.",
                    );
                    return;
                }
                run.forfeit_vote = Some(ForfeitVote {
                    started_at: now,
                    voted: BTreeSet::from([participant]),
                });
                tracing::info!(group, participant, "Forfeit vote started");
            },
        }

        let tally = Self::tally(run.forfeit_vote.as_ref(), &active);
        let text = format!(
            "Forfeit vote: {tally}/{} agree to abandon the Trial of Finality.",
            active.len()
        );
        for p in &active {
            self.host.notify(*p, &text);
        }
        if tally >= active.len() {
            self.conclude_vote(group);
        }
    }

    fn tally(vote: Option<&ForfeitVote>, active: &[ParticipantId]) -> usize {
        vote.map_or(0, |v| active.iter().filter(|p| v.voted.contains(p)).count())
    }

    fn conclude_vote(&mut self, group: GroupId) {
        tracing::info!(group, "Forfeit vote passed");
        self.finalize(group, RunOutcome::Forfeited);
    }

    /// Expire votes that timed out or lost their quorum, and conclude votes
    /// that became unanimous because a non-voter dropped out.
    pub(crate) fn sweep_votes(&mut self) {
        let timeout = self.config.forfeit_vote_timeout();
        let groups: Vec<GroupId> = self
            .active
            .values()
            .filter(|r| r.forfeit_vote.is_some())
            .map(|r| r.group)
            .collect();

        for group in groups {
            let active = self.active_participants(group);
            let Some(run) = self.active.get(&group) else {
                continue;
            };
            let Some(vote) = run.forfeit_vote.as_ref() else {
                continue;
            };
            let cancel_reason = if self.now.saturating_sub(vote.started_at) > timeout {
                Some("timed out")
            } else if active.len() < MIN_VOTERS {
                Some("not enough participants standing")
            } else {
                None
            };
            let unanimous = Self::tally(Some(vote), &active) >= active.len();

            match cancel_reason {
                Some(reason) => self.cancel_vote(group, &active, reason),
                None if unanimous => self.conclude_vote(group),
                None => {},
            }
        }
    }

    fn cancel_vote(&mut self, group: GroupId, active: &[ParticipantId], reason: &str) {
        if let Some(run) = self.active.get_mut(&group) {
            run.forfeit_vote = None;
        }
        tracing::info!(group, reason, "Forfeit vote cancelled");
        let text = format!("The forfeit vote was cancelled: {reason}.");
        for p in active {
            self.host.notify(*p, &text);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::{FakeHost, advance_to_wave, coordinator, test_config};

    #[test]
    fn unanimous_vote_ends_without_penalty() {
        let mut c = coordinator(test_config(), FakeHost::with_group(3, 10, 80));
        advance_to_wave(&mut c, 10, &[2, 3], 1);
        c.on_participant_downed(3);
        c.on_forfeit_vote_cast(1);
        assert!(c.active_run(10).is_some());
        c.on_forfeit_vote_cast(2);

        assert!(c.active_run(10).is_none());
        assert_eq!(c.store().flagged_count(), 0);
        let exit = c.config().arena.exit;
        for id in 1..=3 {
            assert_eq!(c.host().participants[&id].location, exit);
        }
    }

    #[test]
    fn solo_participant_cannot_start_vote() {
        let mut c = coordinator(test_config(), FakeHost::with_group(1, 10, 80));
        advance_to_wave(&mut c, 10, &[], 1);
        c.on_forfeit_vote_cast(1);
        let run = c.active_run(10).unwrap();
        assert!(run.forfeit_vote.is_none());
    }

    #[test]
    fn downed_and_duplicate_votes_ignored() {
        let mut c = coordinator(test_config(), FakeHost::with_group(3, 10, 80));
        advance_to_wave(&mut c, 10, &[2, 3], 1);
        c.on_participant_downed(3);
        c.on_forfeit_vote_cast(3);
        assert!(c.active_run(10).unwrap().forfeit_vote.is_none());

        c.on_forfeit_vote_cast(1);
        c.on_forfeit_vote_cast(1);
        let vote = c.active_run(10).unwrap().forfeit_vote.as_ref().unwrap();
        assert_eq!(vote.voted.len(), 1);
    }

    #[test]
    fn vote_times_out() {
        let mut c = coordinator(test_config(), FakeHost::with_group(2, 10, 80));
        advance_to_wave(&mut c, 10, &[2], 1);
        c.on_forfeit_vote_cast(1);
        let timeout = c.config().forfeit_vote_timeout();
        c.tick(timeout + Duration::from_secs(1));

        let run = c.active_run(10).unwrap();
        assert!(run.forfeit_vote.is_none());
        assert!(c.host().notes_for(2).iter().any(|n| n.contains("timed out")));
    }

    #[test]
    fn vote_cancelled_when_quorum_lost() {
        let mut c = coordinator(test_config(), FakeHost::with_group(3, 10, 80));
        advance_to_wave(&mut c, 10, &[2, 3], 1);
        c.on_forfeit_vote_cast(1);
        c.on_participant_downed(2);
        c.on_participant_downed(3);
        let interval = Duration::from_millis(c.config().vote_sweep_interval_ms);
        c.tick(interval);
        assert!(c.active_run(10).unwrap().forfeit_vote.is_none());
    }

    #[test]
    fn vote_concludes_when_holdout_goes_down() {
        let mut c = coordinator(test_config(), FakeHost::with_group(3, 10, 80));
        advance_to_wave(&mut c, 10, &[2, 3], 1);
        c.on_forfeit_vote_cast(1);
        c.on_forfeit_vote_cast(2);
        c.on_participant_downed(3);
        let interval = Duration::from_millis(c.config().vote_sweep_interval_ms);
        c.tick(interval);
        assert!(c.active_run(10).is_none());
        assert_eq!(c.store().flagged_count(), 0);
    }
}
