// Presence notifications, built on the broadcast engine.

use chrono::Utc;
use drawbridge_common::protocol::ws::{PresenceAction, ServerEvent};
use tracing::warn;

use crate::registry::SessionRegistry;

/// Broadcast a `presence` event to the whole session (no exclusion).
///
/// Best effort: a failure to announce never propagates to the join or
/// leave operation that triggered it.
pub async fn announce(
    registry: &SessionRegistry,
    session_id: &str,
    action: PresenceAction,
    username: &str,
) {
    let event = ServerEvent::Presence {
        action,
        username: username.to_owned(),
        timestamp: Utc::now(),
    };
    let frame = match serde_json::to_string(&event) {
        Ok(frame) => frame,
        Err(error) => {
            warn!(%session_id, ?error, "failed to encode presence event");
            return;
        }
    };
    registry.broadcast(session_id, &frame, None).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn announce_reaches_every_member_including_the_subject() {
        let registry = SessionRegistry::default();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.join("s1", tx_a, None, Some("Alice".into())).await;
        registry.join("s1", tx_b, None, Some("Bob".into())).await;

        announce(&registry, "s1", PresenceAction::Joined, "Bob").await;

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = rx.recv().await.expect("presence frame");
            let value: Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(value["type"], "presence");
            assert_eq!(value["action"], "joined");
            assert_eq!(value["username"], "Bob");
            assert!(value["timestamp"].is_string());
        }
    }

    #[tokio::test]
    async fn announce_to_empty_session_is_a_noop() {
        let registry = SessionRegistry::default();
        announce(&registry, "nobody-here", PresenceAction::Left, "Alice").await;
    }
}
