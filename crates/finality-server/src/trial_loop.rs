use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use finality_core::net::messages::HostMessage;
use finality_core::participant::{GroupId, ParticipantId};
use finality_trial::{
    AnyPenaltyStore, Coordinator, LoginVerdict, TrialError, TrialHost, TrialStatus,
};

use crate::world::RemoteWorld;

pub type ServerCoordinator = Coordinator<RemoteWorld, AnyPenaltyStore>;

/// Commands sent from the socket and admin handlers to the trial loop.
#[derive(Debug)]
pub enum TrialCommand {
    HostConnected {
        outbound: mpsc::Sender<Bytes>,
    },
    HostDisconnected,
    Host(HostMessage),
    ResetParticipant {
        participant: ParticipantId,
        reply: oneshot::Sender<Result<bool, TrialError>>,
    },
    StartTestRun {
        participant: ParticipantId,
        reply: oneshot::Sender<Result<GroupId, TrialError>>,
    },
    Status {
        reply: oneshot::Sender<TrialStatus>,
    },
}

/// Spawn the task that owns the coordinator.
/// Returns the command sender and the task handle.
pub fn spawn_trial_loop(
    coordinator: ServerCoordinator,
    tick: Duration,
    cancel: CancellationToken,
) -> (mpsc::UnboundedSender<TrialCommand>, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        run_trial_loop(coordinator, tick, cmd_rx, cancel).await;
    });
    (cmd_tx, handle)
}

async fn run_trial_loop(
    mut coordinator: ServerCoordinator,
    tick: Duration,
    mut cmd_rx: mpsc::UnboundedReceiver<TrialCommand>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();

    tracing::info!(tick_ms = tick.as_millis() as u64, "Trial loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let now = Instant::now();
                coordinator.tick(now.duration_since(last_tick));
                last_tick = now;
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => handle_command(&mut coordinator, cmd),
                    None => break,
                }
            }
        }
    }

    tracing::info!(
        active = coordinator.active_count(),
        pending = coordinator.pending_count(),
        "Trial loop stopped"
    );
}

fn handle_command(coordinator: &mut ServerCoordinator, cmd: TrialCommand) {
    match cmd {
        TrialCommand::HostConnected { outbound } => {
            coordinator.host_mut().attach(outbound);
            tracing::info!("Host simulation attached");
        },
        TrialCommand::HostDisconnected => {
            coordinator.host_mut().detach();
            tracing::warn!(
                active = coordinator.active_count(),
                "Host simulation detached"
            );
        },
        TrialCommand::Host(msg) => apply_host_message(coordinator, msg),
        TrialCommand::ResetParticipant { participant, reply } => {
            let _ = reply.send(coordinator.reset_permanent_failure(participant));
        },
        TrialCommand::StartTestRun { participant, reply } => {
            let _ = reply.send(coordinator.force_start_test_run(participant));
        },
        TrialCommand::Status { reply } => {
            let _ = reply.send(coordinator.status());
        },
    }
}

/// Route one host event into the world mirror and the coordinator.
pub fn apply_host_message(coordinator: &mut ServerCoordinator, msg: HostMessage) {
    match msg {
        HostMessage::Hello(hello) => {
            tracing::debug!(realm = %hello.realm, "Ignoring repeated Hello");
        },
        HostMessage::ParticipantUpdate(view) => {
            let id = view.id;
            let went_offline = !view.online
                && coordinator
                    .host()
                    .participant(id)
                    .is_some_and(|p| p.online);
            coordinator.host_mut().upsert_participant(view);
            if went_offline {
                coordinator.on_participant_disconnected(id);
            }
        },
        HostMessage::ParticipantRemoved(m) => {
            coordinator.host_mut().set_online(m.participant, false);
            coordinator.on_participant_disconnected(m.participant);
            coordinator.host_mut().remove_participant(m.participant);
        },
        HostMessage::GroupUpdate(m) => coordinator.host_mut().set_group(m.group, m.members),
        HostMessage::GroupDisbanded(m) => coordinator.host_mut().remove_group(m.group),
        HostMessage::TrialRequest(m) => {
            // Refusals are delivered to the initiator by the coordinator.
            let _ = coordinator.initiate(m.participant);
        },
        HostMessage::ConfirmationResponse(m) => {
            if let Err(e) = coordinator.on_confirmation_received(m.participant, m.accept) {
                tracing::debug!(participant = m.participant, error = %e, "Confirmation ignored");
                coordinator.host_mut().notify(m.participant, &e.to_string());
            }
        },
        HostMessage::ForfeitVote(m) => coordinator.on_forfeit_vote_cast(m.participant),
        HostMessage::CreatureDefeated(m) => coordinator.on_enemy_defeated(m.entity),
        HostMessage::ParticipantDied(m) => coordinator.on_participant_downed(m.participant),
        HostMessage::ParticipantResurrected(m) => {
            coordinator.on_participant_resurrected(m.participant);
        },
        HostMessage::ParticipantLogin(m) => {
            coordinator.host_mut().set_online(m.participant, true);
            let verdict = coordinator.on_participant_login(m.participant);
            if verdict != LoginVerdict::Allowed {
                tracing::info!(participant = m.participant, ?verdict, "Login handled");
            }
        },
        HostMessage::ParticipantLogout(m) => {
            coordinator.host_mut().set_online(m.participant, false);
            coordinator.on_participant_disconnected(m.participant);
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use finality_core::net::messages::{
        ConfirmationResponseMsg, EntityRefMsg, GroupUpdateMsg, ParticipantRefMsg, ServerMessage,
    };
    use finality_core::net::protocol::decode_server_message;
    use finality_core::test_helpers::{at, make_participant};
    use finality_trial::{MemoryPenaltyStore, TrialConfig};

    use super::*;

    fn test_config() -> TrialConfig {
        let mut cfg = TrialConfig {
            first_wave_delay_ms: 0,
            announce_delay_ms: 0,
            rng_seed: Some(3),
            ..TrialConfig::default()
        };
        cfg.arena.center = at(0.0, 0.0);
        cfg.arena.entrance = at(0.0, 0.0);
        cfg.arena.exit = at(500.0, 500.0);
        cfg.arena.spawn_points = vec![at(1.0, 1.0), at(2.0, 2.0)];
        cfg
    }

    fn coordinator_with_host() -> (ServerCoordinator, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(1024);
        let mut world = RemoteWorld::new();
        world.attach(tx);
        let store = AnyPenaltyStore::Memory(MemoryPenaltyStore::new());
        (Coordinator::new(Arc::new(test_config()), world, store), rx)
    }

    fn seed_group(c: &mut ServerCoordinator, ids: &[ParticipantId], group: GroupId) {
        for id in ids {
            apply_host_message(c, HostMessage::ParticipantUpdate(make_participant(*id, 80)));
        }
        apply_host_message(
            c,
            HostMessage::GroupUpdate(GroupUpdateMsg {
                group,
                members: ids.to_vec(),
            }),
        );
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(data) = rx.try_recv() {
            out.push(decode_server_message(&data).unwrap());
        }
        out
    }

    #[test]
    fn trial_request_prompts_group() {
        let (mut c, mut rx) = coordinator_with_host();
        seed_group(&mut c, &[1, 2], 30);
        apply_host_message(&mut c, HostMessage::TrialRequest(ParticipantRefMsg { participant: 1 }));

        assert_eq!(c.pending_count(), 1);
        let sent = drain(&mut rx);
        assert!(sent.iter().any(|m| matches!(
            m,
            ServerMessage::PromptConfirmation(p) if p.participant == 2 && p.initiator_name == "Hero1"
        )));
    }

    #[test]
    fn confirmation_starts_run_and_spawns() {
        let (mut c, mut rx) = coordinator_with_host();
        seed_group(&mut c, &[1, 2], 30);
        apply_host_message(&mut c, HostMessage::TrialRequest(ParticipantRefMsg { participant: 1 }));
        apply_host_message(
            &mut c,
            HostMessage::ConfirmationResponse(ConfirmationResponseMsg {
                participant: 2,
                accept: true,
            }),
        );
        assert_eq!(c.active_count(), 1);

        c.tick(Duration::from_millis(1));
        c.tick(Duration::from_millis(1));
        let run = c.active_run(30).unwrap();
        assert_eq!(run.current_wave, 1);
        let enemies = run.active_enemies.clone();
        assert!(!enemies.is_empty());

        let sent = drain(&mut rx);
        let spawned = sent
            .iter()
            .filter(|m| matches!(m, ServerMessage::SpawnCreature(s) if enemies.contains(&s.entity)))
            .count();
        assert_eq!(spawned, enemies.len());
        assert!(sent.iter().any(|m| matches!(m, ServerMessage::GrantItem(_))));

        for e in enemies {
            apply_host_message(&mut c, HostMessage::CreatureDefeated(EntityRefMsg { entity: e }));
        }
        assert!(c.active_run(30).unwrap().active_enemies.is_empty());
    }

    #[test]
    fn stray_confirmation_is_answered() {
        let (mut c, mut rx) = coordinator_with_host();
        seed_group(&mut c, &[1], 30);
        apply_host_message(
            &mut c,
            HostMessage::ConfirmationResponse(ConfirmationResponseMsg {
                participant: 1,
                accept: true,
            }),
        );
        let sent = drain(&mut rx);
        assert!(matches!(&sent[..], [ServerMessage::Notify(n)] if n.participant == 1));
    }

    #[test]
    fn logout_mid_run_counts_as_downed() {
        let (mut c, _rx) = coordinator_with_host();
        seed_group(&mut c, &[1, 2], 30);
        apply_host_message(&mut c, HostMessage::TrialRequest(ParticipantRefMsg { participant: 1 }));
        apply_host_message(
            &mut c,
            HostMessage::ConfirmationResponse(ConfirmationResponseMsg {
                participant: 2,
                accept: true,
            }),
        );
        apply_host_message(
            &mut c,
            HostMessage::ParticipantLogout(ParticipantRefMsg { participant: 2 }),
        );
        assert!(c.active_run(30).unwrap().is_downed(2));
    }

    #[tokio::test]
    async fn loop_answers_status_and_stops_on_cancel() {
        let (c, _rx) = coordinator_with_host();
        let cancel = CancellationToken::new();
        let (tx, handle) = spawn_trial_loop(c, Duration::from_millis(10), cancel.clone());

        let (reply, rx) = oneshot::channel();
        tx.send(TrialCommand::Status { reply }).unwrap();
        let status = rx.await.unwrap();
        assert!(status.enabled);
        assert!(status.active.is_empty());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn loop_advances_coordinator_clock() {
        let (c, _rx) = coordinator_with_host();
        let (tx, _handle) =
            spawn_trial_loop(c, Duration::from_millis(5), CancellationToken::new());
        tokio::time::sleep(Duration::from_millis(60)).await;

        let (reply, rx) = oneshot::channel();
        tx.send(TrialCommand::Status { reply }).unwrap();
        assert!(rx.await.unwrap().clock_ms > 0);
    }
}
