use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;

use finality_core::participant::{EntityId, GroupId, TemplateId};

use crate::coordinator::Coordinator;
use crate::host::{EnemySpawn, TrialHost};
use crate::run::{EntityRole, RunOutcome, WavePhase};
use crate::schedule::TaskKind;
use crate::store::PenaltyStore;

/// Enemies to spawn for a wave, scaled by how many participants are still
/// able to fight.
///
/// `clamp(round(max_per_wave * active / starting), 1, min(max_per_wave, spawn_points))`
pub fn requested_enemy_count(
    max_per_wave: usize,
    active: usize,
    starting: usize,
    spawn_points: usize,
) -> usize {
    let upper = max_per_wave.min(spawn_points).max(1);
    let starting = starting.max(1);
    let scaled = (max_per_wave as f64 * active as f64 / starting as f64).round() as usize;
    scaled.clamp(1, upper)
}

/// Shuffle the pool and cycle through it until `count` templates are chosen.
pub fn compose_wave<R: Rng + ?Sized>(
    pool: &[TemplateId],
    count: usize,
    rng: &mut R,
) -> Vec<TemplateId> {
    if pool.is_empty() {
        return Vec::new();
    }
    let mut shuffled = pool.to_vec();
    shuffled.shuffle(rng);
    shuffled.into_iter().cycle().take(count).collect()
}

impl<H: TrialHost, S: PenaltyStore> Coordinator<H, S> {
    /// Announce wave `wave` and schedule its spawn after `delay`.
    pub(crate) fn prepare_wave(&mut self, group: GroupId, wave: u32, delay: Duration) {
        self.check_boundaries(group);
        let total = self.config.total_waves;
        let Some(run) = self.active.get_mut(&group) else {
            tracing::debug!(group, wave, "Run ended during boundary check before wave");
            return;
        };
        if !run.active_enemies.is_empty() {
            tracing::warn!(
                group,
                wave,
                remaining = run.active_enemies.len(),
                "Refusing to prepare wave while enemies remain"
            );
            return;
        }
        if wave < run.current_wave {
            tracing::warn!(group, wave, current = run.current_wave, "Refusing to rewind wave");
            return;
        }
        run.current_wave = wave;
        run.phase = WavePhase::Preparing(wave);
        let (run_id, narrator) = (run.id, run.narrator);

        if let Some(narrator) = narrator {
            let text = if wave == total {
                "The final wave approaches! Stand together or fall forever!".to_string()
            } else {
                format!("Wave {wave} of {total} approaches! Prepare yourselves!")
            };
            self.host.announce(narrator, &text);
        }
        self.schedule_task(run_id, group, wave, TaskKind::SpawnWave, delay);
        tracing::info!(group, wave, "Wave prepared");
    }

    pub(crate) fn spawn_wave(&mut self, group: GroupId, wave: u32) {
        let Some(run) = self.active.get(&group) else {
            return;
        };
        let active = run
            .active_members(|p| self.host.participant(p).is_some_and(|v| v.online))
            .len();
        if active == 0 {
            self.fail(group, "internal error: no participants at spawn");
            return;
        }

        let spawn_points = self.config.arena.spawn_points.clone();
        let count = requested_enemy_count(
            self.config.max_enemies_per_wave,
            active,
            run.members.len(),
            spawn_points.len(),
        );
        let level = run.highest_level;
        let Some(tier) = self.config.tier_for(wave).cloned() else {
            self.fail(group, "internal error: no tier for wave");
            return;
        };
        let templates = compose_wave(&tier.templates, count, &mut self.rng);

        let mut spawned: Vec<EntityId> = Vec::with_capacity(templates.len());
        for (template, location) in templates.into_iter().zip(spawn_points.iter().cycle()) {
            let spawn = EnemySpawn {
                template,
                location: *location,
                level,
                health_multiplier: tier.health_multiplier,
                buffs: tier.buffs.clone(),
            };
            match self.host.spawn_enemy(&spawn) {
                Some(entity) => spawned.push(entity),
                None => tracing::warn!(group, wave, template, "Host failed to spawn enemy"),
            }
        }
        if spawned.is_empty() {
            self.fail(group, "internal error: wave spawn failed");
            return;
        }

        for entity in &spawned {
            self.entity_index
                .insert(*entity, EntityRole::WaveEnemy { group, wave });
        }
        if let Some(run) = self.active.get_mut(&group) {
            run.active_enemies.extend(spawned.iter().copied());
            run.phase = WavePhase::Active(wave);
        }
        tracing::info!(group, wave, requested = count, spawned = spawned.len(), active, "Wave spawned");
    }

    /// A creature died in the world.
    pub fn on_enemy_defeated(&mut self, entity: EntityId) {
        let Some(role) = self.entity_index.get(&entity).copied() else {
            tracing::warn!(entity, "Defeat reported for unknown entity");
            return;
        };
        let (group, wave) = match role {
            EntityRole::WaveEnemy { group, wave } => (group, wave),
            EntityRole::Narrator { group } => {
                tracing::debug!(entity, group, "Narrator defeat ignored");
                return;
            },
        };
        self.entity_index.remove(&entity);
        let Some(run) = self.active.get_mut(&group) else {
            tracing::debug!(entity, group, "Enemy defeat for finished run");
            return;
        };
        run.active_enemies.remove(&entity);
        if run.active_enemies.is_empty() && run.phase == WavePhase::Active(wave) {
            self.on_wave_cleared(group, wave);
        }
    }

    fn on_wave_cleared(&mut self, group: GroupId, wave: u32) {
        let Some(run) = self.active.get_mut(&group) else {
            return;
        };
        let fallen: Vec<_> = std::mem::take(&mut run.downed).into_keys().collect();
        for p in fallen {
            self.apply_penalty(group, p, &format!("fell during wave {wave}"));
        }

        let Some(run) = self.active.get_mut(&group) else {
            return;
        };
        let remaining = run.survivors().count();
        tracing::info!(group, wave, remaining, "Wave cleared");
        if remaining == 0 {
            self.fail(group, "no active participants remaining");
            return;
        }
        if wave >= self.config.total_waves {
            self.finalize(group, RunOutcome::Succeeded);
            return;
        }

        let next = wave + 1;
        run.phase = WavePhase::Preparing(next);
        let (run_id, narrator) = (run.id, run.narrator);
        if let Some(narrator) = narrator {
            self.host.announce(
                narrator,
                &format!("Wave {wave} has fallen. Catch your breath, the next one is coming."),
            );
        }
        let delay = self.config.inter_wave_delay();
        self.schedule_task(run_id, group, next, TaskKind::PrepareWave, delay);
    }

    pub(crate) fn fail(&mut self, group: GroupId, reason: &str) {
        self.finalize(
            group,
            RunOutcome::Failed {
                reason: reason.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::test_support::{FakeHost, advance_to_wave, coordinator, defeat_all, test_config};

    #[test]
    fn full_group_gets_full_wave() {
        assert_eq!(requested_enemy_count(6, 3, 3, 6), 6);
        assert_eq!(requested_enemy_count(6, 2, 3, 6), 4);
        assert_eq!(requested_enemy_count(6, 1, 3, 6), 2);
        assert_eq!(requested_enemy_count(6, 1, 5, 6), 1);
        assert_eq!(requested_enemy_count(6, 3, 3, 4), 4);
    }

    #[test]
    fn degenerate_inputs_still_spawn_one() {
        assert_eq!(requested_enemy_count(6, 0, 3, 6), 1);
        assert_eq!(requested_enemy_count(6, 3, 0, 6), 6);
        assert_eq!(requested_enemy_count(6, 3, 3, 0), 1);
    }

    proptest! {
        #[test]
        fn enemy_count_matches_formula(
            max in 1usize..20,
            starting in 1usize..10,
            active_frac in 0usize..=100,
            spawn_points in 1usize..20,
        ) {
            let active = starting * active_frac / 100;
            let n = requested_enemy_count(max, active, starting, spawn_points);
            let upper = max.min(spawn_points);
            prop_assert!(n >= 1);
            prop_assert!(n <= upper);
            let exact = (max as f64 * active as f64 / starting as f64).round() as usize;
            prop_assert_eq!(n, exact.clamp(1, upper));
        }

        #[test]
        fn enemy_count_monotonic_in_active(
            max in 1usize..20,
            starting in 1usize..10,
            spawn_points in 1usize..20,
        ) {
            let counts: Vec<usize> = (0..=starting)
                .map(|a| requested_enemy_count(max, a, starting, spawn_points))
                .collect();
            prop_assert!(counts.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn compose_cycles_the_whole_pool() {
        let mut rng = StdRng::seed_from_u64(3);
        let picked = compose_wave(&[1, 2, 3], 7, &mut rng);
        assert_eq!(picked.len(), 7);
        for t in [1, 2, 3] {
            let n = picked.iter().filter(|p| **p == t).count();
            assert!((2..=3).contains(&n), "template {t} picked {n} times");
        }
        assert!(compose_wave(&[], 4, &mut rng).is_empty());
    }

    #[test]
    fn wave_spawns_after_first_delay_and_announce() {
        let mut c = coordinator(test_config(), FakeHost::with_group(1, 10, 80));
        c.initiate(1).unwrap();
        let cfg = c.config().clone();

        c.tick(cfg.first_wave_delay());
        let run = c.active_run(10).unwrap();
        assert_eq!(run.current_wave, 1);
        assert_eq!(run.phase, WavePhase::Preparing(1));
        assert!(run.active_enemies.is_empty());
        assert!(c.host().announcements.iter().any(|(_, t)| t.contains("Wave 1 of 5")));

        c.tick(cfg.announce_delay());
        let run = c.active_run(10).unwrap();
        assert_eq!(run.phase, WavePhase::Active(1));
        assert_eq!(run.active_enemies.len(), 6);
        let spawns = c.host().live_enemies();
        assert_eq!(spawns.len(), 6);
        let tier = cfg.tier_for(1).unwrap();
        for (_, spawn) in &spawns {
            assert_eq!(spawn.level, 80);
            assert!(tier.templates.contains(&spawn.template));
            assert!(cfg.arena.spawn_points.contains(&spawn.location));
        }
    }

    #[test]
    fn clearing_last_enemy_schedules_next_wave() {
        let mut c = coordinator(test_config(), FakeHost::with_group(2, 10, 80));
        advance_to_wave(&mut c, 10, &[2], 1);
        defeat_all(&mut c, 10);

        let run = c.active_run(10).unwrap();
        assert_eq!(run.phase, WavePhase::Preparing(2));
        assert_eq!(run.current_wave, 1);

        let delay = c.config().inter_wave_delay();
        c.tick(delay);
        assert_eq!(c.active_run(10).unwrap().current_wave, 2);
    }

    #[test]
    fn unknown_enemy_defeat_is_ignored() {
        let mut c = coordinator(test_config(), FakeHost::with_group(1, 10, 80));
        advance_to_wave(&mut c, 10, &[], 1);
        let before = c.active_run(10).unwrap().active_enemies.len();
        c.on_enemy_defeated(987_654);
        assert_eq!(c.active_run(10).unwrap().active_enemies.len(), before);
    }

    #[test]
    fn no_next_wave_while_enemies_remain() {
        let mut c = coordinator(test_config(), FakeHost::with_group(1, 10, 80));
        advance_to_wave(&mut c, 10, &[], 1);
        c.prepare_wave(10, 2, Duration::ZERO);
        let run = c.active_run(10).unwrap();
        assert_eq!(run.current_wave, 1);
        assert_eq!(run.phase, WavePhase::Active(1));
    }

    #[test]
    fn spawn_failure_fails_run() {
        let mut host = FakeHost::with_group(1, 10, 80);
        host.refuse_spawns = true;
        let mut c = coordinator(test_config(), host);
        c.initiate(1).unwrap();
        let cfg = c.config().clone();
        c.tick(cfg.first_wave_delay());
        c.tick(cfg.announce_delay());
        assert!(c.active_run(10).is_none());
        assert!(
            c.host()
                .notes_for(1)
                .iter()
                .any(|n| n.contains("wave spawn failed"))
        );
        // Nobody was downed, so nobody is penalised.
        assert_eq!(c.store().flagged_count(), 0);
    }

    #[test]
    fn nobody_left_at_spawn_fails_run() {
        let mut c = coordinator(test_config(), FakeHost::with_group(3, 10, 80));
        advance_to_wave(&mut c, 10, &[2, 3], 1);
        c.on_participant_downed(1);
        defeat_all(&mut c, 10);
        assert!(c.store().is_flagged(1));

        let cfg = c.config().clone();
        c.tick(cfg.inter_wave_delay());
        assert_eq!(c.active_run(10).unwrap().phase, WavePhase::Preparing(2));
        c.on_participant_downed(2);
        // Drops without the host reporting a disconnect.
        c.host_mut().participant_mut(3).online = false;

        c.tick(cfg.announce_delay());
        assert!(c.active_run(10).is_none());
        assert!(
            c.host()
                .notes_for(2)
                .iter()
                .any(|n| n.contains("no participants at spawn"))
        );
        assert!(c.store().is_flagged(2));
        assert!(!c.store().is_flagged(3));
    }

    #[test]
    fn clearing_final_wave_succeeds() {
        let mut c = coordinator(test_config(), FakeHost::with_group(2, 10, 80));
        advance_to_wave(&mut c, 10, &[2], 1);
        for wave in 1..=5 {
            assert_eq!(c.active_run(10).unwrap().current_wave, wave);
            defeat_all(&mut c, 10);
            if wave < 5 {
                let cfg = c.config().clone();
                c.tick(cfg.inter_wave_delay());
                c.tick(cfg.announce_delay());
            }
        }
        assert!(c.active_run(10).is_none());
        let reward = c.config().rewards.currency;
        assert_eq!(c.host().currency.get(&1), Some(&reward));
        assert_eq!(c.host().currency.get(&2), Some(&reward));
        assert_eq!(c.host().broadcasts.len(), 1);
        assert!(c.host().broadcasts[0].contains("Hero1"));
    }
}
