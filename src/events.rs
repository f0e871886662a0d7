//! Typed event surface of the runtime.
//!
//! Events are fanned out through a `tokio::sync::broadcast` channel so any
//! number of listeners can subscribe without a process-wide event bus.

use tokio::sync::broadcast;
use tracing::debug;

use crate::protocol::{NodeStats, TrackEndReason, TrackException};
use crate::track::Track;

/// Why a player session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    NodeDestroy,
    NodeReconnect,
    Disconnected,
    ChannelDeleted,
    QueueEmpty,
    TrackStuck,
    TrackError,
    Cleanup,
}

/// Domain events emitted by the [`Manager`](crate::manager::Manager).
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    NodeConnect { node: String },
    NodeReady { node: String, resumed: bool },
    NodeDisconnect { node: String, reason: String },
    NodeError { node: String, message: String },
    NodeStats { node: String, stats: NodeStats },

    PlayerCreate { guild_id: String },
    PlayerDestroy { guild_id: String, reason: DestroyReason },
    PlayerMove { guild_id: String, old_channel: String, new_channel: String },
    PlayerDisconnect { guild_id: String, channel: String },

    TrackStart { guild_id: String, track: Track },
    TrackEnd { guild_id: String, track: Track, reason: TrackEndReason },
    TrackStuck { guild_id: String, track: Track, threshold_ms: u64 },
    TrackError { guild_id: String, track: Track, exception: TrackException },
    AutoplayTrack { guild_id: String, track: Track },
    QueueEnd { guild_id: String },

    /// Diagnostic only; the voice socket between node and gateway closed.
    SocketClosed { guild_id: String, code: u16, reason: String, by_remote: bool },
}

/// Broadcast wrapper that tolerates having no listeners.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ManagerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ManagerEvent) {
        // Err solo significa que nadie está escuchando.
        if self.sender.send(event).is_err() {
            debug!("event dropped: no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.emit(ManagerEvent::QueueEnd {
            guild_id: "1".to_string(),
        });
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_events() {
        let bus = EventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(ManagerEvent::NodeConnect {
            node: "main".to_string(),
        });

        for receiver in [&mut first, &mut second] {
            match receiver.recv().await.unwrap() {
                ManagerEvent::NodeConnect { node } => assert_eq!(node, "main"),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }
}
