//! End-to-end runs through the coordinator against the fake host.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use finality_core::participant::ParticipantId;
use finality_core::test_helpers::at;

use crate::coordinator::Coordinator;
use crate::participants::LoginVerdict;
use crate::store::{FilePenaltyStore, PenaltyStore};
use crate::test_support::{FakeHost, advance_to_wave, coordinator, defeat_all, test_config};

#[test]
fn full_wipe_fails_before_clear_and_spares_gm_flag() {
    let mut host = FakeHost::with_group(3, 10, 80);
    host.participant_mut(3).is_gm = true;
    let mut c = coordinator(test_config(), host);
    advance_to_wave(&mut c, 10, &[2, 3], 2);
    let enemies_left = c.active_run(10).unwrap().active_enemies.len();
    assert!(enemies_left > 0);

    c.on_participant_downed(1);
    c.on_participant_downed(2);
    assert!(c.active_run(10).is_some());
    c.on_participant_downed(3);

    assert!(c.active_run(10).is_none());
    assert!(c.store().is_flagged(1));
    assert!(c.store().is_flagged(2));
    assert!(!c.store().is_flagged(3));
    assert!(c.host().notes_for(3).iter().any(|n| n.contains("spared")));
    for id in 1..=3 {
        assert!(
            c.host()
                .notes_for(id)
                .iter()
                .any(|n| n.contains("full wipe"))
        );
    }
    assert!(c.host().live_enemies().is_empty());
    assert!(c.host().currency.is_empty());
}

#[test]
fn forfeit_after_one_member_left_spares_the_downed() {
    let mut c = coordinator(test_config(), FakeHost::with_group(4, 10, 80));
    advance_to_wave(&mut c, 10, &[2, 3, 4], 1);

    for _ in 0..2 {
        c.host_mut().participant_mut(4).location = at(300.0, 0.0);
        c.check_boundaries(10);
    }
    assert!(c.active_run(10).unwrap().is_failed(4));
    c.on_participant_downed(3);

    c.on_forfeit_vote_cast(1);
    c.on_forfeit_vote_cast(2);

    assert!(c.active_run(10).is_none());
    assert_eq!(c.store().flagged_count(), 1);
    assert!(c.store().is_flagged(4));
    assert!(!c.store().is_flagged(3));
    assert_eq!(c.run_group_of(3), None);
}

#[test]
fn decline_leaves_group_free_to_retry() {
    let mut c = coordinator(test_config(), FakeHost::with_group(3, 10, 80));
    c.initiate(1).unwrap();
    c.on_confirmation_received(3, false).unwrap();
    assert_eq!(c.pending_count(), 0);
    assert_eq!(c.active_count(), 0);

    c.initiate(1).unwrap();
    c.on_confirmation_received(2, true).unwrap();
    c.on_confirmation_received(3, true).unwrap();
    assert_eq!(c.active_count(), 1);
}

#[test]
fn successful_run_rewards_survivors_only() {
    let mut c = coordinator(test_config(), FakeHost::with_group(3, 10, 80));
    advance_to_wave(&mut c, 10, &[2, 3], 1);
    c.on_participant_downed(3);
    let cfg = c.config().clone();
    for wave in 1..=cfg.total_waves {
        defeat_all(&mut c, 10);
        if wave < cfg.total_waves {
            c.tick(cfg.inter_wave_delay());
            c.tick(cfg.announce_delay());
        }
    }
    assert!(c.active_run(10).is_none());
    assert!(c.store().is_flagged(3));
    assert_eq!(c.host().currency.get(&3), None);
    assert_eq!(c.host().currency.get(&1), Some(&cfg.rewards.currency));
    assert!(c.host().broadcasts[0].contains("Hero1, Hero2"));
    assert!(!c.host().broadcasts[0].contains("Hero3"));
    assert_eq!(c.host().celebrations, 1);
    assert_eq!(c.host().participants[&1].location, cfg.arena.exit);
}

#[test]
fn flag_survives_reopen_and_gates_login_until_reset() {
    let path = std::env::temp_dir().join(format!("finality-scenario-{}.json", uuid::Uuid::new_v4()));
    let config = Arc::new(test_config());

    {
        let store = FilePenaltyStore::open(&path).unwrap();
        let mut c = Coordinator::new(Arc::clone(&config), FakeHost::with_group(1, 10, 80), store);
        c.initiate(1).unwrap();
        c.tick(config.first_wave_delay());
        c.tick(config.announce_delay());
        c.on_participant_downed(1);
        assert!(c.active_run(10).is_none());
        assert!(c.store().is_flagged(1));
    }

    let store = FilePenaltyStore::open(&path).unwrap();
    assert!(store.is_flagged(1));
    let mut c = Coordinator::new(Arc::clone(&config), FakeHost::with_group(1, 10, 80), store);
    assert_eq!(c.on_participant_login(1), LoginVerdict::Rejected);
    assert!(c.initiate(1).is_err());

    assert_eq!(c.reset_permanent_failure(1), Ok(true));
    c.host_mut().participant_mut(1).online = true;
    assert_eq!(c.on_participant_login(1), LoginVerdict::Allowed);

    let reopened = FilePenaltyStore::open(&path).unwrap();
    assert!(!reopened.is_flagged(1));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn wave_never_spawns_over_live_enemies() {
    let mut c = coordinator(test_config(), FakeHost::with_group(2, 10, 80));
    advance_to_wave(&mut c, 10, &[2], 1);
    let first: BTreeSet<_> = c.active_run(10).unwrap().active_enemies.clone();
    c.tick(Duration::from_secs(120));
    let run = c.active_run(10).unwrap();
    assert_eq!(run.current_wave, 1);
    assert_eq!(run.active_enemies, first);
}

#[derive(Debug, Clone)]
enum Op {
    Initiate(ParticipantId),
    Confirm(ParticipantId, bool),
    Downed(ParticipantId),
    Resurrect(ParticipantId),
    Vote(ParticipantId),
    Wander(ParticipantId),
    DefeatOne,
    Tick(u64),
}

fn op() -> impl Strategy<Value = Op> {
    let who = 1u64..=4;
    prop_oneof![
        who.clone().prop_map(Op::Initiate),
        (who.clone(), any::<bool>()).prop_map(|(p, a)| Op::Confirm(p, a)),
        who.clone().prop_map(Op::Downed),
        who.clone().prop_map(Op::Resurrect),
        who.clone().prop_map(Op::Vote),
        who.prop_map(Op::Wander),
        Just(Op::DefeatOne),
        (100u64..5_000).prop_map(Op::Tick),
    ]
}

proptest! {
    #[test]
    fn invariants_hold_under_random_events(ops in prop::collection::vec(op(), 1..80)) {
        let mut host = FakeHost::with_group(3, 10, 80);
        host.add_group(&[4], 20, 80);
        let mut c = coordinator(test_config(), host);
        let mut last_wave = [0u32; 2];
        let mut failed_seen: [BTreeSet<ParticipantId>; 2] = Default::default();
        let mut run_ids = [None, None];

        for op in ops {
            match op {
                Op::Initiate(p) => { let _ = c.initiate(p); },
                Op::Confirm(p, accept) => { let _ = c.on_confirmation_received(p, accept); },
                Op::Downed(p) => c.on_participant_downed(p),
                Op::Resurrect(p) => c.on_participant_resurrected(p),
                Op::Vote(p) => c.on_forfeit_vote_cast(p),
                Op::Wander(p) => c.host_mut().participant_mut(p).location = at(400.0, 0.0),
                Op::DefeatOne => {
                    let enemy = c
                        .active_run(10)
                        .or_else(|| c.active_run(20))
                        .and_then(|r| r.active_enemies.iter().next().copied());
                    if let Some(e) = enemy {
                        c.on_enemy_defeated(e);
                    }
                },
                Op::Tick(ms) => c.tick(Duration::from_millis(ms)),
            }

            for (i, group) in [10u64, 20].into_iter().enumerate() {
                prop_assert!(!(c.pending_run(group).is_some() && c.active_run(group).is_some()));
                match c.active_run(group) {
                    Some(run) => {
                        if run_ids[i] != Some(run.id) {
                            run_ids[i] = Some(run.id);
                            last_wave[i] = 0;
                            failed_seen[i].clear();
                        }
                        prop_assert!(run.current_wave >= last_wave[i]);
                        prop_assert!(run.current_wave <= c.config().total_waves);
                        prop_assert!(failed_seen[i].is_subset(&run.permanently_failed));
                        prop_assert!(run.downed.keys().all(|p| !run.permanently_failed.contains(p)));
                        last_wave[i] = run.current_wave;
                        failed_seen[i] = run.permanently_failed.clone();
                    },
                    None => run_ids[i] = None,
                }
            }
        }
    }
}
