// Session membership registry and broadcast engine.
//
// One registry instance is constructed at startup and shared by every
// connection task. Membership mutation (join, leave, eviction) happens
// under a single write lock; broadcast iterates over a snapshot taken
// under the read lock so eviction never corrupts the iteration.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::metrics;

/// Username reported for connections the registry no longer knows.
pub const UNKNOWN_USERNAME: &str = "Unknown";

/// Opaque handle for one live connection, unique for the process
/// lifetime. Issued at join time; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identity stored for a connection at join time.
///
/// `username` here is only the connect-time default; chat and file
/// payloads may assert their own username per event.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ConnectionRecord {
    identity: Identity,
    outbound: mpsc::UnboundedSender<String>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// Session id -> member connection ids, in join order.
    sessions: HashMap<String, Vec<ConnectionId>>,
    connections: HashMap<ConnectionId, ConnectionRecord>,
}

impl RegistryInner {
    fn get_or_create(&mut self, session_id: &str) -> &mut Vec<ConnectionId> {
        self.sessions.entry(session_id.to_owned()).or_default()
    }

    /// Drop the session key once its member set is empty. Runs under the
    /// same lock as membership mutation, so an empty set can never race
    /// with a concurrent join of the same id.
    fn remove_if_empty(&mut self, session_id: &str) {
        if self.sessions.get(session_id).is_some_and(Vec::is_empty) {
            self.sessions.remove(session_id);
        }
    }

    fn remove_member(&mut self, id: ConnectionId) -> Option<Identity> {
        let record = self.connections.remove(&id)?;
        if let Some(members) = self.sessions.get_mut(&record.identity.session_id) {
            members.retain(|member| *member != id);
        }
        self.remove_if_empty(&record.identity.session_id);
        Some(record.identity)
    }
}

/// Maps session ids to their live member connections.
///
/// A connection is present in its session's member set iff it is
/// eligible to receive broadcasts for that session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
    next_connection_id: AtomicU64,
}

impl SessionRegistry {
    /// Add a connection to a session, creating the session entry if
    /// absent. Each accepted socket joins exactly once. Returns the
    /// issued handle and the identity actually stored.
    pub async fn join(
        &self,
        session_id: &str,
        outbound: mpsc::UnboundedSender<String>,
        user_id: Option<String>,
        username: Option<String>,
    ) -> (ConnectionId, Identity) {
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let user_id = user_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let username = username.unwrap_or_else(|| default_username(&user_id));
        let identity = Identity {
            user_id,
            username,
            session_id: session_id.to_owned(),
            connected_at: Utc::now(),
        };

        let mut guard = self.inner.write().await;
        guard.get_or_create(session_id).push(id);
        guard.connections.insert(id, ConnectionRecord { identity: identity.clone(), outbound });

        (id, identity)
    }

    /// Remove a connection from its session and drop its identity
    /// record. Idempotent: leaving a connection the registry no longer
    /// knows is a no-op that returns [`UNKNOWN_USERNAME`].
    pub async fn leave(&self, id: ConnectionId) -> String {
        let mut guard = self.inner.write().await;
        guard
            .remove_member(id)
            .map(|identity| identity.username)
            .unwrap_or_else(|| UNKNOWN_USERNAME.to_owned())
    }

    /// Snapshot of current member usernames, in join order. Empty if the
    /// session is unknown.
    pub async fn active_users(&self, session_id: &str) -> Vec<String> {
        let guard = self.inner.read().await;
        let Some(members) = guard.sessions.get(session_id) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|member| guard.connections.get(member))
            .map(|record| record.identity.username.clone())
            .collect()
    }

    /// Stored identity for a live connection.
    pub async fn identity(&self, id: ConnectionId) -> Option<Identity> {
        self.inner.read().await.connections.get(&id).map(|record| record.identity.clone())
    }

    /// Deliver `frame` to every member of `session_id` except `exclude`.
    ///
    /// Best-effort fan-out: a member whose outbound channel is closed is
    /// evicted from the session (membership and identity dropped) and
    /// delivery continues to the remaining members. Never fails.
    /// Returns the number of members the frame was handed to.
    pub async fn broadcast(
        &self,
        session_id: &str,
        frame: &str,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let mut recipients = Vec::new();
        {
            let guard = self.inner.read().await;
            let Some(members) = guard.sessions.get(session_id) else {
                return 0;
            };
            for member in members {
                if Some(*member) == exclude {
                    continue;
                }
                if let Some(record) = guard.connections.get(member) {
                    recipients.push((*member, record.outbound.clone()));
                }
            }
        }

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (member, sender) in recipients {
            if sender.send(frame.to_owned()).is_ok() {
                delivered += 1;
            } else {
                failed.push(member);
            }
        }

        if !failed.is_empty() {
            let mut guard = self.inner.write().await;
            for member in failed {
                if let Some(identity) = guard.remove_member(member) {
                    warn!(
                        connection_id = %member,
                        session_id = %identity.session_id,
                        username = %identity.username,
                        "evicted connection with closed outbound channel"
                    );
                    metrics::increment_evicted_connections();
                }
            }
        }

        metrics::add_broadcast_deliveries(delivered as u64);
        delivered
    }
}

/// Default display name derived from a user id: `User_` plus the first
/// eight characters of the id.
pub fn default_username(user_id: &str) -> String {
    let prefix: String = user_id.chars().take(8).collect();
    format!("User_{prefix}")
}
