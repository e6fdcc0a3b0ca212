//! Local player transport
//!
//! Plays each artifact through an external player process (ffplay by
//! default). One child per playback; its exit ends the playback.

use super::{ChannelRef, CompletionCallback, Transport, TransportHandle};
use crate::config::TransportConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct ActivePlay {
    play_id: u64,
    stop_tx: oneshot::Sender<()>,
}

/// Connected handles; `Some` while a child is playing
type Slots = HashMap<Uuid, Option<ActivePlay>>;

pub struct CommandTransport {
    command: Vec<String>,
    slots: Arc<Mutex<Slots>>,
    next_play_id: AtomicU64,
}

impl CommandTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            command: config.player_command.clone(),
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_play_id: AtomicU64::new(1),
        }
    }

    fn lock_slots(slots: &Mutex<Slots>) -> std::sync::MutexGuard<'_, Slots> {
        slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_active(&self, handle: &TransportHandle) -> Option<ActivePlay> {
        Self::lock_slots(&self.slots)
            .get_mut(&handle.id)
            .and_then(Option::take)
    }
}

#[async_trait]
impl Transport for CommandTransport {
    async fn connect(&self, channel: &ChannelRef) -> Result<TransportHandle, TransportError> {
        if self.command.is_empty() {
            return Err(TransportError::ConnectFailed(
                "No player command configured".to_string(),
            ));
        }

        let handle = TransportHandle::new(channel.clone());
        Self::lock_slots(&self.slots).insert(handle.id, None);
        info!(channel = %channel, handle = %handle.id, "Local player connected");
        Ok(handle)
    }

    async fn play(
        &self,
        handle: &TransportHandle,
        artifact: &Path,
        on_complete: CompletionCallback,
    ) -> Result<(), TransportError> {
        if !Self::lock_slots(&self.slots).contains_key(&handle.id) {
            return Err(TransportError::LostConnection("Handle is not connected".to_string()));
        }

        // Replaces whatever was playing on this handle
        if let Some(previous) = self.take_active(handle) {
            let _ = previous.stop_tx.send(());
        }

        let (program, leading_args) = self
            .command
            .split_first()
            .ok_or_else(|| TransportError::LostConnection("No player command configured".to_string()))?;

        let mut child = Command::new(program)
            .args(leading_args)
            .arg(artifact)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::LostConnection(format!("Failed to start {}: {}", program, e)))?;

        let play_id = self.next_play_id.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = oneshot::channel();
        Self::lock_slots(&self.slots).insert(handle.id, Some(ActivePlay { play_id, stop_tx }));

        debug!(handle = %handle.id, play_id, path = %artifact.display(), "Player started");

        let slots = Arc::clone(&self.slots);
        let handle_id = handle.id;
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if !status.success() => {
                        warn!(handle = %handle_id, %status, "Player exited with error");
                    }
                    Err(e) => warn!(handle = %handle_id, error = %e, "Failed to wait for player"),
                    Ok(_) => {}
                },
                _ = stop_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(handle = %handle_id, error = %e, "Failed to kill player");
                    }
                }
            }

            {
                let mut slots = Self::lock_slots(&slots);
                if let Some(slot) = slots.get_mut(&handle_id) {
                    if slot.as_ref().map(|a| a.play_id) == Some(play_id) {
                        *slot = None;
                    }
                }
            }

            debug!(handle = %handle_id, play_id, "Player finished");
            on_complete(None);
        });

        Ok(())
    }

    async fn stop(&self, handle: &TransportHandle) {
        if let Some(active) = self.take_active(handle) {
            let _ = active.stop_tx.send(());
        }
    }

    async fn disconnect(&self, handle: &TransportHandle) {
        let removed = Self::lock_slots(&self.slots).remove(&handle.id);
        if let Some(Some(active)) = removed {
            let _ = active.stop_tx.send(());
        }
        info!(channel = %handle.channel, handle = %handle.id, "Local player disconnected");
    }

    async fn is_playing(&self, handle: &TransportHandle) -> bool {
        matches!(Self::lock_slots(&self.slots).get(&handle.id), Some(Some(_)))
    }
}
