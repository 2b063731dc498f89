use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use finality_trial::{
    AnyPenaltyStore, Coordinator, FilePenaltyStore, MemoryPenaltyStore, StoreError,
};

use crate::auth::AuthConfig;
use crate::config::ServerConfig;
use crate::trial_loop::{TrialCommand, spawn_trial_loop};
use crate::world::RemoteWorld;

#[derive(Clone)]
pub struct AppState {
    pub trial: mpsc::UnboundedSender<TrialCommand>,
    pub auth: AuthConfig,
    /// Set while a host simulation holds the socket.
    pub host_connected: Arc<AtomicBool>,
    pub config: Arc<ServerConfig>,
    /// Cancelled to stop the trial loop.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Open the penalty store and spawn the trial loop. Must run inside a
    /// tokio runtime.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store = match &config.penalty_store {
            Some(path) => AnyPenaltyStore::File(FilePenaltyStore::open(path)?),
            None => AnyPenaltyStore::Memory(MemoryPenaltyStore::new()),
        };
        let coordinator =
            Coordinator::new(Arc::new(config.trial.clone()), RemoteWorld::new(), store);
        let shutdown = CancellationToken::new();
        let (trial, _handle) =
            spawn_trial_loop(coordinator, config.limits.tick(), shutdown.clone());

        let auth = AuthConfig {
            bearer_token: config.auth.bearer_token.clone(),
        };
        Ok(Self {
            trial,
            auth,
            host_connected: Arc::new(AtomicBool::new(false)),
            config: Arc::new(config),
            shutdown,
        })
    }
}

/// Exclusive claim on the host socket. Released on drop.
pub struct HostSlot {
    flag: Arc<AtomicBool>,
}

impl HostSlot {
    /// `None` if another host is already connected.
    pub fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for HostSlot {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
