//! Broadcast dispatcher: fans committed events out to channel subscribers.
//!
//! The dispatcher assigns a per-channel monotonically increasing sequence
//! number to each published event and delivers it to every live subscriber
//! with a small bounded retry. It never persists undelivered events; a
//! reconnecting subscriber catches up through the incident query API.

use crate::api_ws::OutgoingFrame;
use crate::config::DeliveryConfig;
use crate::registry::{SessionId, SubscriberRegistry};
use beacon_incidents::Incident;
use beacon_types::EventKind;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex};

/// An immutable notification payload derived from a committed incident.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub incident: Incident,
}

impl Event {
    /// Event for a freshly committed incident report.
    pub fn reported(incident: Incident) -> Self {
        Self {
            kind: EventKind::IncidentReported,
            incident,
        }
    }

    /// Event for a committed status change.
    pub fn status_changed(incident: Incident) -> Self {
        Self {
            kind: EventKind::IncidentStatusChanged,
            incident,
        }
    }
}

/// Retry behavior for delivery to a single subscriber.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    /// Attempts per subscriber before the session is declared dead.
    pub max_attempts: u32,
    /// Base backoff between attempts. Doubles per retry.
    pub retry_backoff: Duration,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl DeliveryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

/// Outcome of one publish call.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub channel: String,
    /// Sequence number assigned to this event on its channel.
    pub sequence: u64,
    /// Subscribers attached at publish time.
    pub subscribers: usize,
    /// Subscribers that accepted the event.
    pub delivered: usize,
    /// Sessions that exhausted all delivery attempts and were dropped.
    pub failed: Vec<SessionId>,
}

impl DeliveryReport {
    /// Whether any subscriber missed the event.
    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Fans published events out to the current subscribers of a channel.
#[derive(Clone)]
pub struct Dispatcher {
    registry: SubscriberRegistry,
    /// Per-channel sequence counters. The outer lock only guards map access;
    /// the inner per-channel lock is held across delivery to preserve
    /// publish order, so distinct channels never serialize against each
    /// other.
    channels: Arc<Mutex<HashMap<String, Arc<Mutex<u64>>>>>,
    policy: DeliveryPolicy,
}

impl Dispatcher {
    pub fn new(registry: SubscriberRegistry, policy: DeliveryPolicy) -> Self {
        Self {
            registry,
            channels: Arc::new(Mutex::new(HashMap::new())),
            policy,
        }
    }

    /// Publishes an event to all current subscribers of `channel`.
    ///
    /// Delivery to each subscriber runs concurrently with bounded retry; a
    /// session that fails every attempt is dropped from the registry so one
    /// dead client cannot wedge fanout for the rest. The report never
    /// represents a hard failure: durability was already settled by the
    /// caller before publish.
    pub async fn publish(&self, channel: &str, event: Event) -> DeliveryReport {
        let seq_cell = {
            let mut channels = self.channels.lock().await;
            channels.entry(channel.to_string()).or_default().clone()
        };

        // Held across delivery: the next publish on this channel cannot
        // start until every subscriber has seen (or definitively missed)
        // this event.
        let mut seq = seq_cell.lock().await;
        *seq += 1;
        let sequence = *seq;

        let frame = OutgoingFrame::Event {
            channel: channel.to_string(),
            sequence,
            event,
        };
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(channel, sequence, "failed to serialize event frame: {}", e);
                return DeliveryReport {
                    channel: channel.to_string(),
                    sequence,
                    subscribers: 0,
                    delivered: 0,
                    failed: Vec::new(),
                };
            }
        };

        let subscribers = self.registry.subscribers_of(channel).await;
        let total = subscribers.len();

        let outcomes =
            futures_util::future::join_all(subscribers.into_iter().map(|(session_id, sender)| {
                let json = json.clone();
                let policy = self.policy;
                async move { (session_id, deliver_with_retry(&sender, json, policy).await) }
            }))
            .await;

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (session_id, ok) in outcomes {
            if ok {
                delivered += 1;
            } else {
                failed.push(session_id);
            }
        }

        for session_id in &failed {
            tracing::warn!(
                session_id = %session_id,
                channel,
                sequence,
                "dropping subscriber session after exhausted delivery attempts"
            );
            self.registry.drop_session(*session_id).await;
        }

        if total > 0 {
            tracing::debug!(channel, sequence, delivered, total, "event published");
        }

        DeliveryReport {
            channel: channel.to_string(),
            sequence,
            subscribers: total,
            delivered,
            failed,
        }
    }
}

/// Attempts delivery to one subscriber with bounded retry.
///
/// A full buffer is transient (the client may drain it); a closed channel is
/// terminal and not worth retrying.
async fn deliver_with_retry(
    sender: &mpsc::Sender<String>,
    frame: String,
    policy: DeliveryPolicy,
) -> bool {
    let mut backoff = policy.retry_backoff;
    for attempt in 1..=policy.max_attempts {
        match sender.send_timeout(frame.clone(), policy.attempt_timeout).await {
            Ok(()) => return true,
            Err(SendTimeoutError::Closed(_)) => return false,
            Err(SendTimeoutError::Timeout(_)) => {
                if attempt < policy.max_attempts {
                    tracing::debug!(attempt, "delivery attempt timed out, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
    false
}
