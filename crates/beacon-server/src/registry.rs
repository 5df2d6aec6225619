//! Subscription registry: tracks live subscriber sessions per channel.
//!
//! The registry exclusively owns the channel → subscriber mapping. The
//! ingestion path reads it (via the dispatcher) while the session lifecycle
//! path writes it, so all three maps live behind `tokio::sync::RwLock` and
//! are only ever touched through the methods here. No lock is held across an
//! await on delivery: the dispatcher works on snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Identifier for one subscriber session.
pub type SessionId = Uuid;

/// Lifecycle state of a registered session.
///
/// `Connecting` never appears here: a session is registered only once its
/// transport handshake has completed. `Disconnected` is represented by
/// absence from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// May subscribe, unsubscribe, and receive events.
    Active,
    /// Graceful shutdown in progress; receives no further events.
    Draining,
}

/// A live session's delivery handle.
#[derive(Debug, Clone)]
struct SessionHandle {
    sender: mpsc::Sender<String>,
    state: SessionState,
}

/// Type alias for the session map to satisfy clippy complexity checks.
type SessionMap = HashMap<SessionId, SessionHandle>;

/// Manages active subscriber sessions and their channel subscriptions.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    /// Active sessions: session_id -> delivery handle.
    sessions: Arc<RwLock<SessionMap>>,
    /// Subscriptions: channel -> set of session_ids.
    channel_subscriptions: Arc<RwLock<HashMap<String, HashSet<SessionId>>>>,
    /// Reverse mapping: session_id -> set of channels.
    session_subscriptions: Arc<RwLock<HashMap<SessionId, HashSet<String>>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session and returns its unique ID.
    ///
    /// The session enters the registry in `Active` state; channels are
    /// attached separately via [`subscribe`](Self::subscribe).
    pub async fn add_session(&self, sender: mpsc::Sender<String>) -> SessionId {
        let session_id = Uuid::new_v4();
        self.sessions.write().await.insert(
            session_id,
            SessionHandle {
                sender,
                state: SessionState::Active,
            },
        );
        session_id
    }

    /// Subscribes a session to a channel. Idempotent.
    ///
    /// Returns `false` if the session is unknown or draining, in which case
    /// no subscription is recorded.
    pub async fn subscribe(&self, session_id: SessionId, channel: &str) -> bool {
        {
            let sessions = self.sessions.read().await;
            match sessions.get(&session_id) {
                Some(handle) if handle.state == SessionState::Active => {}
                _ => return false,
            }
        }

        // Lock ordering: channel_subscriptions -> session_subscriptions,
        // matching unsubscribe and drop_session.
        let mut chan_subs = self.channel_subscriptions.write().await;
        chan_subs
            .entry(channel.to_string())
            .or_default()
            .insert(session_id);
        drop(chan_subs);

        let mut session_subs = self.session_subscriptions.write().await;
        session_subs
            .entry(session_id)
            .or_default()
            .insert(channel.to_string());
        true
    }

    /// Unsubscribes a session from a channel. Safe when not subscribed.
    pub async fn unsubscribe(&self, session_id: SessionId, channel: &str) {
        let mut chan_subs = self.channel_subscriptions.write().await;
        if let Some(listeners) = chan_subs.get_mut(channel) {
            listeners.remove(&session_id);
            if listeners.is_empty() {
                chan_subs.remove(channel);
            }
        }
        drop(chan_subs);

        let mut session_subs = self.session_subscriptions.write().await;
        if let Some(channels) = session_subs.get_mut(&session_id) {
            channels.remove(channel);
            if channels.is_empty() {
                session_subs.remove(&session_id);
            }
        }
    }

    /// Snapshots the live, non-draining subscribers of a channel.
    ///
    /// Returns owned senders so the caller delivers without holding any
    /// registry lock.
    pub async fn subscribers_of(&self, channel: &str) -> Vec<(SessionId, mpsc::Sender<String>)> {
        let chan_subs = self.channel_subscriptions.read().await;
        let Some(listeners) = chan_subs.get(channel) else {
            return Vec::new();
        };

        let sessions = self.sessions.read().await;
        listeners
            .iter()
            .filter_map(|id| {
                sessions.get(id).and_then(|handle| {
                    (handle.state == SessionState::Active)
                        .then(|| (*id, handle.sender.clone()))
                })
            })
            .collect()
    }

    /// Removes a session and all of its subscriptions.
    ///
    /// Called on disconnect, heartbeat timeout, or by the dispatcher when a
    /// session fails all delivery attempts. Safe to call for a session that
    /// was never subscribed to anything, and safe to call twice.
    pub async fn drop_session(&self, session_id: SessionId) {
        // 1. Remove from sessions (independent lock, always acquired first).
        {
            let mut sessions = self.sessions.write().await;
            if sessions.remove(&session_id).is_none() {
                return; // Already removed
            }
        }

        // 2. Collect the channels this session was subscribed to.
        let channels = {
            let session_subs = self.session_subscriptions.read().await;
            session_subs.get(&session_id).cloned()
        };

        // 3. Remove from channel_subscriptions first (consistent with
        //    subscribe/unsubscribe ordering).
        if let Some(ref channels) = channels {
            let mut chan_subs = self.channel_subscriptions.write().await;
            for channel in channels {
                if let Some(listeners) = chan_subs.get_mut(channel) {
                    listeners.remove(&session_id);
                    if listeners.is_empty() {
                        chan_subs.remove(channel);
                    }
                }
            }
        }

        // 4. Remove from session_subscriptions last.
        if channels.is_some() {
            let mut session_subs = self.session_subscriptions.write().await;
            session_subs.remove(&session_id);
        }
    }

    /// Marks every session as draining and pushes the given frame to each.
    ///
    /// Used during graceful shutdown: draining sessions receive no further
    /// events, and the frame tells clients to reconnect elsewhere. Returns
    /// the number of sessions notified.
    pub async fn drain_all(&self, frame_json: &str) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut notified = 0;
        for (session_id, handle) in sessions.iter_mut() {
            if handle.state == SessionState::Draining {
                continue;
            }
            handle.state = SessionState::Draining;
            if handle.sender.try_send(frame_json.to_string()).is_err() {
                tracing::warn!(session_id = %session_id, "failed to push drain frame");
            } else {
                notified += 1;
            }
        }
        notified
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Number of subscribers currently attached to a channel.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channel_subscriptions
            .read()
            .await
            .get(channel)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}
