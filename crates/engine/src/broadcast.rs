use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Outbound update hook.
///
/// Emission is fire-and-forget: implementations swallow their own failures
/// (logging at most) and must never block turn processing.
pub trait UpdateSink: Send + Sync {
    fn broadcast(&self, evaluation_id: Uuid, update_type: &str, payload: Value);
}

/// Discards every update. The default sink.
pub struct NoopSink;

impl UpdateSink for NoopSink {
    fn broadcast(&self, _evaluation_id: Uuid, _update_type: &str, _payload: Value) {}
}

/// One emitted update, as seen by channel subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct EvalUpdate {
    pub evaluation_id: Uuid,
    pub update_type: String,
    pub payload: Value,
}

/// Fans updates out over a tokio broadcast channel so embedders (a
/// WebSocket layer, a progress bar) can subscribe.
pub struct ChannelSink {
    tx: broadcast::Sender<EvalUpdate>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EvalUpdate> {
        self.tx.subscribe()
    }
}

impl UpdateSink for ChannelSink {
    fn broadcast(&self, evaluation_id: Uuid, update_type: &str, payload: Value) {
        let update = EvalUpdate {
            evaluation_id,
            update_type: update_type.to_owned(),
            payload,
        };
        // A send error just means nobody is subscribed right now.
        if self.tx.send(update).is_err() {
            tracing::debug!(%evaluation_id, update_type, "update dropped: no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_updates() {
        let sink = ChannelSink::new(8);
        let mut rx = sink.subscribe();
        let eval_id = Uuid::new_v4();

        sink.broadcast(eval_id, "update", json!({"turn": 1}));

        let update = rx.recv().await.unwrap();
        assert_eq!(update.evaluation_id, eval_id);
        assert_eq!(update.update_type, "update");
        assert_eq!(update.payload["turn"], 1);
    }

    #[test]
    fn broadcast_without_subscribers_does_not_panic() {
        let sink = ChannelSink::new(8);
        sink.broadcast(Uuid::new_v4(), "update", json!({}));
        NoopSink.broadcast(Uuid::new_v4(), "update", json!({}));
    }
}
