use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use finality_core::participant::{EntityId, GroupId, ParticipantId};
use finality_core::time::millis;

use crate::config::TrialConfig;
use crate::error::TrialError;
use crate::host::TrialHost;
use crate::run::{ActiveRun, EntityRole, PendingRun, RunId, WavePhase};
use crate::schedule::{Schedule, ScheduledTask, SweepTimer, TaskKind};
use crate::store::PenaltyStore;

/// Result of a successful initiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiateOutcome {
    /// Prompts went out; the run starts when everyone accepts.
    AwaitingConfirmation {
        group: GroupId,
        pending: Vec<ParticipantId>,
    },
    Started { group: GroupId, run: RunId },
}

/// Top-level owner of every pending and active run.
///
/// Single-threaded: every entry point takes `&mut self`. Time only moves
/// through [`Coordinator::tick`].
pub struct Coordinator<H, S> {
    pub(crate) config: Arc<TrialConfig>,
    pub(crate) host: H,
    pub(crate) store: S,
    pub(crate) now: Duration,
    pub(crate) pending: BTreeMap<GroupId, PendingRun>,
    pub(crate) active: BTreeMap<GroupId, ActiveRun>,
    /// Active-run members to their run's group.
    pub(crate) participant_index: HashMap<ParticipantId, GroupId>,
    pub(crate) entity_index: HashMap<EntityId, EntityRole>,
    pub(crate) schedule: Schedule,
    pub(crate) rng: StdRng,
    pending_sweep: SweepTimer,
    boundary_sweep: SweepTimer,
    vote_sweep: SweepTimer,
}

impl<H: TrialHost, S: PenaltyStore> Coordinator<H, S> {
    pub fn new(config: Arc<TrialConfig>, host: H, store: S) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            pending_sweep: SweepTimer::new(Duration::from_millis(config.pending_sweep_interval_ms)),
            boundary_sweep: SweepTimer::new(Duration::from_millis(
                config.boundary_check_interval_ms,
            )),
            vote_sweep: SweepTimer::new(Duration::from_millis(config.vote_sweep_interval_ms)),
            config,
            host,
            store,
            now: Duration::ZERO,
            pending: BTreeMap::new(),
            active: BTreeMap::new(),
            participant_index: HashMap::new(),
            entity_index: HashMap::new(),
            schedule: Schedule::default(),
            rng,
        }
    }

    pub fn config(&self) -> &TrialConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Coordinator clock: total time ticked so far.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn pending_run(&self, group: GroupId) -> Option<&PendingRun> {
        self.pending.get(&group)
    }

    pub fn active_run(&self, group: GroupId) -> Option<&ActiveRun> {
        self.active.get(&group)
    }

    /// Group of the active run `participant` belongs to.
    pub fn run_group_of(&self, participant: ParticipantId) -> Option<GroupId> {
        self.participant_index.get(&participant).copied()
    }

    pub fn entity_role(&self, entity: EntityId) -> Option<EntityRole> {
        self.entity_index.get(&entity).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Advance the clock, fire due tasks, then run the throttled sweeps.
    pub fn tick(&mut self, elapsed: Duration) {
        self.now += elapsed;

        while let Some(task) = self.schedule.pop_due(self.now) {
            self.run_task(task);
        }

        if self.pending_sweep.due(self.now) {
            self.sweep_pending();
        }
        if self.boundary_sweep.due(self.now) {
            self.sweep_boundaries();
        }
        if self.vote_sweep.due(self.now) {
            self.sweep_votes();
        }
    }

    pub(crate) fn schedule_task(
        &mut self,
        run_id: RunId,
        group: GroupId,
        wave: u32,
        kind: TaskKind,
        delay: Duration,
    ) {
        self.schedule.push(ScheduledTask {
            fire_at: self.now + delay,
            run_id,
            group,
            wave,
            kind,
        });
    }

    fn run_task(&mut self, task: ScheduledTask) {
        let expected_phase = WavePhase::Preparing(task.wave);
        let live = self.active.get(&task.group).is_some_and(|run| {
            run.id == task.run_id
                && run.phase == expected_phase
                && (task.kind == TaskKind::PrepareWave || run.current_wave == task.wave)
        });
        if !live {
            tracing::debug!(
                group = task.group,
                run = %task.run_id,
                wave = task.wave,
                kind = ?task.kind,
                "Dropping stale scheduled task"
            );
            return;
        }
        match task.kind {
            TaskKind::PrepareWave => {
                let delay = self.config.announce_delay();
                self.prepare_wave(task.group, task.wave, delay);
            },
            TaskKind::SpawnWave => self.spawn_wave(task.group, task.wave),
        }
    }

    /// Validate preconditions and either start the run or ask the group to
    /// confirm. A refusal is also delivered to the initiator.
    pub fn initiate(&mut self, initiator: ParticipantId) -> Result<InitiateOutcome, TrialError> {
        let result = self.try_initiate(initiator);
        if let Err(e) = &result {
            tracing::warn!(participant = initiator, error = %e, "Trial initiation refused");
            self.host.notify(initiator, &e.to_string());
        }
        result
    }

    fn try_initiate(&mut self, initiator: ParticipantId) -> Result<InitiateOutcome, TrialError> {
        if !self.config.enabled {
            return Err(TrialError::TrialsDisabled);
        }
        let view = self
            .host
            .participant(initiator)
            .ok_or(TrialError::UnknownParticipant(initiator))?;
        if !view.online {
            return Err(TrialError::ParticipantOffline(initiator));
        }
        let group = view.group.ok_or(TrialError::NotInGroup)?;
        if self.pending.contains_key(&group) || self.active.contains_key(&group) {
            return Err(TrialError::AlreadyInTrial);
        }

        let member_ids = self.host.group_members(group);
        let size = member_ids.len();
        if size < self.config.min_group_size || size > self.config.max_group_size {
            return Err(TrialError::GroupSize {
                size,
                min: self.config.min_group_size,
                max: self.config.max_group_size,
            });
        }

        let mut members = Vec::with_capacity(size);
        for id in &member_ids {
            match self.host.participant(*id) {
                Some(m) if m.online => members.push(m),
                Some(m) => return Err(TrialError::MemberOffline(m.name)),
                None => return Err(TrialError::MemberOffline(id.to_string())),
            }
        }

        let highest_level = members.iter().map(|m| m.level).max().unwrap_or(view.level);
        let lowest_level = members.iter().map(|m| m.level).min().unwrap_or(view.level);
        let spread = highest_level - lowest_level;
        if spread > self.config.max_level_difference {
            return Err(TrialError::LevelSpread {
                spread,
                max: self.config.max_level_difference,
            });
        }

        for m in &members {
            if self.host.has_item(m.id, self.config.marker_item_id) {
                return Err(TrialError::MemberHoldsMarker(m.name.clone()));
            }
            if self.store.is_flagged(m.id) {
                return Err(TrialError::MemberPermanentlyFailed(m.name.clone()));
            }
            let in_other_pending = self
                .pending
                .values()
                .any(|p| p.roster.contains(&m.id));
            if self.participant_index.contains_key(&m.id) || in_other_pending {
                return Err(TrialError::MemberInOtherRun(m.name.clone()));
            }
        }

        let mut roster = vec![initiator];
        roster.extend(member_ids.iter().copied().filter(|id| *id != initiator));
        let to_confirm: BTreeSet<ParticipantId> = roster[1..].iter().copied().collect();

        let mut pending = PendingRun {
            group,
            initiator,
            roster,
            to_confirm,
            accepted: BTreeSet::new(),
            created_at: self.now,
            highest_level,
        };

        if !self.config.confirmation_enabled || pending.to_confirm.is_empty() {
            pending.accepted = pending.to_confirm.clone();
            let run = self.start_run(pending, false);
            return Ok(InitiateOutcome::Started { group, run });
        }

        for p in &pending.to_confirm {
            self.host.request_confirmation(*p, &view.name);
        }
        self.host.notify(
            initiator,
            &format!(
                "Waiting for {} group member(s) to accept the Trial of Finality",
                pending.to_confirm.len()
            ),
        );
        let waiting: Vec<ParticipantId> = pending.to_confirm.iter().copied().collect();
        tracing::info!(group, participant = initiator, waiting = waiting.len(), "Trial awaiting confirmation");
        self.pending.insert(group, pending);
        Ok(InitiateOutcome::AwaitingConfirmation {
            group,
            pending: waiting,
        })
    }

    /// Lift a persisted permanent-failure flag. Returns whether one existed.
    pub fn reset_permanent_failure(&mut self, participant: ParticipantId) -> Result<bool, TrialError> {
        let cleared = self.store.clear(participant)?;
        tracing::info!(participant, cleared, "Permanent failure reset");
        Ok(cleared)
    }

    /// Start a solo run for an ungrouped participant, skipping confirmation
    /// and group-size checks. The synthetic group is disbanded on teardown.
    pub fn force_start_test_run(&mut self, participant: ParticipantId) -> Result<GroupId, TrialError> {
        let view = self
            .host
            .participant(participant)
            .ok_or(TrialError::UnknownParticipant(participant))?;
        if !view.online {
            return Err(TrialError::ParticipantOffline(participant));
        }
        if view.group.is_some() {
            return Err(TrialError::AlreadyGrouped);
        }
        if self.participant_index.contains_key(&participant) {
            return Err(TrialError::MemberInOtherRun(view.name));
        }
        if self.store.is_flagged(participant) {
            return Err(TrialError::MemberPermanentlyFailed(view.name));
        }
        if self.host.has_item(participant, self.config.marker_item_id) {
            return Err(TrialError::MemberHoldsMarker(view.name));
        }
        let group = self
            .host
            .create_solo_group(participant)
            .ok_or(TrialError::GroupUnavailable)?;
        if self.pending.contains_key(&group) || self.active.contains_key(&group) {
            return Err(TrialError::AlreadyInTrial);
        }

        let pending = PendingRun {
            group,
            initiator: participant,
            roster: vec![participant],
            to_confirm: BTreeSet::new(),
            accepted: BTreeSet::new(),
            created_at: self.now,
            highest_level: view.level,
        };
        let run = self.start_run(pending, true);
        tracing::info!(group, participant, run = %run, "Test run force-started");
        Ok(group)
    }

    /// Serialisable view of every pending and active run.
    pub fn status(&self) -> TrialStatus {
        let pending = self
            .pending
            .values()
            .map(|p| PendingRunStatus {
                group: p.group,
                initiator: p.initiator,
                to_confirm: p.to_confirm.iter().copied().collect(),
                accepted: p.accepted.iter().copied().collect(),
                age_ms: millis(self.now.saturating_sub(p.created_at)),
            })
            .collect();
        let active = self
            .active
            .values()
            .map(|r| ActiveRunStatus {
                run: r.id,
                group: r.group,
                initiator: r.initiator,
                members: r.members.clone(),
                current_wave: r.current_wave,
                total_waves: self.config.total_waves,
                phase: r.phase,
                enemies_remaining: r.active_enemies.len(),
                downed: r.downed.keys().copied().collect(),
                permanently_failed: r.permanently_failed.iter().copied().collect(),
                warned_for_boundary: r.warned_for_boundary.iter().copied().collect(),
                forfeit_votes: r.forfeit_vote.as_ref().map(|v| v.voted.len()),
                ephemeral: r.is_ephemeral_roster,
                elapsed_ms: millis(self.now.saturating_sub(r.started_at)),
            })
            .collect();
        TrialStatus {
            enabled: self.config.enabled,
            clock_ms: millis(self.now),
            pending,
            active,
            flagged_participants: self.store.flagged_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialStatus {
    pub enabled: bool,
    pub clock_ms: u64,
    pub pending: Vec<PendingRunStatus>,
    pub active: Vec<ActiveRunStatus>,
    pub flagged_participants: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRunStatus {
    pub group: GroupId,
    pub initiator: ParticipantId,
    pub to_confirm: Vec<ParticipantId>,
    pub accepted: Vec<ParticipantId>,
    pub age_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRunStatus {
    pub run: RunId,
    pub group: GroupId,
    pub initiator: ParticipantId,
    pub members: Vec<ParticipantId>,
    pub current_wave: u32,
    pub total_waves: u32,
    pub phase: WavePhase,
    pub enemies_remaining: usize,
    pub downed: Vec<ParticipantId>,
    pub permanently_failed: Vec<ParticipantId>,
    pub warned_for_boundary: Vec<ParticipantId>,
    pub forfeit_votes: Option<usize>,
    pub ephemeral: bool,
    pub elapsed_ms: u64,
}
