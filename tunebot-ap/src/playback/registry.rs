//! Session registry
//!
//! Maps session ids to running session actors. A session is created on
//! first use and removed on disconnect or when its actor exits on its own
//! (idle expiry).

use super::session::{SessionActor, SessionCommand, SessionContext};
use super::state::SessionStatus;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cloneable reference to a running session actor
#[derive(Clone)]
pub struct SessionHandle {
    instance: u64,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
    status_rx: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub fn send(&self, cmd: SessionCommand) -> Result<(), SessionCommand> {
        self.cmd_tx.send(cmd).map_err(|e| e.0)
    }

    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed() || self.cancel.is_cancelled()
    }

    /// Cancel pending work and wait for the actor to release the transport
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        // Resolves once the actor drops its status sender
        while self.status_rx.changed().await.is_ok() {}
    }
}

type SessionMap = HashMap<String, SessionHandle>;

pub struct SessionRegistry {
    ctx: Arc<SessionContext>,
    sessions: Arc<Mutex<SessionMap>>,
    next_instance: AtomicU64,
}

impl SessionRegistry {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            ctx,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_instance: AtomicU64::new(1),
        }
    }

    fn lock(sessions: &Mutex<SessionMap>) -> MutexGuard<'_, SessionMap> {
        sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Running session for `session_id`, spawning one if needed
    pub fn get_or_create(&self, session_id: &str) -> SessionHandle {
        let mut sessions = Self::lock(&self.sessions);

        if let Some(handle) = sessions.get(session_id) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }

        let handle = self.spawn(session_id);
        sessions.insert(session_id.to_string(), handle.clone());
        handle
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        Self::lock(&self.sessions)
            .get(session_id)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Remove a session from the registry (the caller shuts it down)
    pub fn remove(&self, session_id: &str) -> Option<SessionHandle> {
        Self::lock(&self.sessions).remove(session_id)
    }

    /// Remove every session
    pub fn drain(&self) -> Vec<SessionHandle> {
        Self::lock(&self.sessions).drain().map(|(_, handle)| handle).collect()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Self::lock(&self.sessions)
            .iter()
            .filter(|(_, handle)| !handle.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn spawn(&self, session_id: &str) -> SessionHandle {
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::disconnected(session_id));
        let cancel = CancellationToken::new();

        let actor = SessionActor::new(
            session_id.to_string(),
            Arc::clone(&self.ctx),
            cmd_tx.downgrade(),
            status_tx,
            cancel.clone(),
        );

        let sessions = Arc::clone(&self.sessions);
        let id = session_id.to_string();
        tokio::spawn(async move {
            actor.run(cmd_rx).await;

            // Only forget the entry if it still belongs to this actor
            let mut sessions = Self::lock(&sessions);
            if sessions.get(&id).map(|h| h.instance) == Some(instance) {
                sessions.remove(&id);
                debug!(session = %id, instance, "Session removed from registry");
            }
        });

        debug!(session = %session_id, instance, "Session created");

        SessionHandle {
            instance,
            cmd_tx,
            cancel,
            status_rx,
        }
    }
}
