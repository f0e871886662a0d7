//! Per-guild player session.
//!
//! A session pairs a guild with the node that hosts its server-side player,
//! owns the guild's [`Queue`] and merges the two halves of the voice
//! handshake (state + server) before handing them to the node. All playback
//! operations translate to partial player patches over REST.

pub mod filters;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ConnectOptions, PlayOptions, SendGatewayPayload};
use crate::error::{Error, Result};
use crate::events::{DestroyReason, EventBus, ManagerEvent};
use crate::node::NodeClient;
use crate::protocol::{
    PlayerStateSnapshot, PlayerUpdate, TrackPatch, VoiceServerPayload, VoiceStatePayload,
    VoiceUpdateData,
};
use crate::queue::Queue;
use crate::track::Track;

pub use filters::FilterChain;

/// Highest volume the node accepts.
pub const MAX_VOLUME: u16 = 1000;

/// Policy hook applied to every requested volume before it reaches the node.
///
/// Host applications can inject their own curve (perceptual loudness, per
/// guild caps); the default just clamps into the node's accepted range.
pub trait VolumeNormalizer: Send + Sync {
    fn normalize(&self, volume: u16) -> u16;
}

/// Default normalizer: clamp into `0..=1000`.
#[derive(Debug, Default)]
pub struct ClampNormalizer;

impl VolumeNormalizer for ClampNormalizer {
    fn normalize(&self, volume: u16) -> u16 {
        volume.min(MAX_VOLUME)
    }
}

/// Everything needed to build a session; assembled by the manager.
pub struct PlayerContext {
    pub guild_id: String,
    pub voice_channel_id: String,
    pub text_channel_id: Option<String>,
    pub node: Arc<NodeClient>,
    pub queue: Arc<Queue>,
    pub bus: EventBus,
    pub send_payload: SendGatewayPayload,
    pub volume: u16,
    pub self_deaf: bool,
    pub self_mute: bool,
    pub autoplay: bool,
    pub no_replace_on_skip: bool,
    pub volume_normalizer: Arc<dyn VolumeNormalizer>,
}

/// Both halves of the voice handshake, merged as they arrive.
#[derive(Debug, Default)]
struct PendingVoice {
    session_id: Option<String>,
    token: Option<String>,
    endpoint: Option<String>,
}

impl PendingVoice {
    fn complete(&self) -> Option<VoiceUpdateData> {
        Some(VoiceUpdateData {
            token: self.token.clone()?,
            endpoint: self.endpoint.clone()?,
            session_id: self.session_id.clone()?,
        })
    }
}

pub struct PlayerSession {
    guild_id: String,
    node: Mutex<Arc<NodeClient>>,
    queue: Arc<Queue>,
    bus: EventBus,
    send_payload: SendGatewayPayload,
    no_replace_on_skip: bool,
    volume_normalizer: Arc<dyn VolumeNormalizer>,

    voice_channel_id: Mutex<Option<String>>,
    text_channel_id: Mutex<Option<String>>,
    voice: Mutex<PendingVoice>,

    self_deaf: AtomicBool,
    self_mute: AtomicBool,
    autoplay: AtomicBool,
    connected: AtomicBool,
    paused: AtomicBool,
    playing: AtomicBool,
    volume: AtomicU16,

    filters: Mutex<FilterChain>,
    last_state: Mutex<Option<(PlayerStateSnapshot, Instant)>>,
    last_played: Mutex<Option<Track>>,
}

impl PlayerSession {
    pub fn new(ctx: PlayerContext) -> Arc<Self> {
        Arc::new(Self {
            guild_id: ctx.guild_id,
            node: Mutex::new(ctx.node),
            queue: ctx.queue,
            bus: ctx.bus,
            send_payload: ctx.send_payload,
            no_replace_on_skip: ctx.no_replace_on_skip,
            volume_normalizer: ctx.volume_normalizer,
            voice_channel_id: Mutex::new(Some(ctx.voice_channel_id)),
            text_channel_id: Mutex::new(ctx.text_channel_id),
            voice: Mutex::new(PendingVoice::default()),
            self_deaf: AtomicBool::new(ctx.self_deaf),
            self_mute: AtomicBool::new(ctx.self_mute),
            autoplay: AtomicBool::new(ctx.autoplay),
            connected: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            volume: AtomicU16::new(ctx.volume.min(MAX_VOLUME)),
            filters: Mutex::new(FilterChain::new()),
            last_state: Mutex::new(None),
            last_played: Mutex::new(None),
        })
    }

    // --- Accessors ---

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub fn node(&self) -> Arc<NodeClient> {
        self.node.lock().clone()
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn current(&self) -> Option<Track> {
        self.queue.current()
    }

    pub fn voice_channel_id(&self) -> Option<String> {
        self.voice_channel_id.lock().clone()
    }

    pub fn text_channel_id(&self) -> Option<String> {
        self.text_channel_id.lock().clone()
    }

    pub fn set_text_channel_id(&self, channel_id: Option<String>) {
        *self.text_channel_id.lock() = channel_id;
    }

    pub fn volume(&self) -> u16 {
        self.volume.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn autoplay_enabled(&self) -> bool {
        self.autoplay.load(Ordering::SeqCst)
    }

    pub fn set_autoplay(&self, enabled: bool) {
        self.autoplay.store(enabled, Ordering::SeqCst);
    }

    pub fn filters(&self) -> FilterChain {
        self.filters.lock().clone()
    }

    /// Track most recently started on this session, autoplay's seed.
    pub fn last_played(&self) -> Option<Track> {
        self.last_played.lock().clone()
    }

    /// Voice latency in milliseconds as last reported by the node (-1 when
    /// unknown).
    pub fn ping(&self) -> i64 {
        self.last_state.lock().map_or(-1, |(state, _)| state.ping)
    }

    /// Blocks until the persisted queue snapshot has been loaded.
    pub async fn wait_for_queue_ready(&self) {
        self.queue.ensure_loaded().await;
    }

    pub(crate) fn record_track_start(&self, track: Track) {
        self.playing.store(true, Ordering::SeqCst);
        *self.last_played.lock() = Some(track);
    }

    pub(crate) fn record_track_end(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    /// Playback position in milliseconds, interpolated between node updates.
    pub fn position(&self) -> u64 {
        let guard = self.last_state.lock();
        match *guard {
            Some((state, at)) => {
                if self.is_playing() && !self.is_paused() {
                    state.position + at.elapsed().as_millis() as u64
                } else {
                    state.position
                }
            }
            None => 0,
        }
    }

    // --- Voice plumbing ---

    /// Asks the host gateway to join (or move within) the voice channel.
    pub fn connect(&self, options: ConnectOptions) -> Result<()> {
        let channel_id = self
            .voice_channel_id()
            .ok_or(Error::NoVoiceChannel)?;
        if let Some(deaf) = options.deaf {
            self.self_deaf.store(deaf, Ordering::SeqCst);
        }
        if let Some(mute) = options.mute {
            self.self_mute.store(mute, Ordering::SeqCst);
        }
        // Any half-finished handshake belongs to the previous channel.
        *self.voice.lock() = PendingVoice::default();
        // Optimistic; the node's player updates own this flag afterwards.
        self.connected.store(true, Ordering::SeqCst);
        debug!(guild_id = %self.guild_id, channel_id, "joining voice channel");
        self.send_voice_state(Some(&channel_id));
        Ok(())
    }

    /// Asks the host gateway to leave the voice channel.
    pub fn disconnect(&self) {
        debug!(guild_id = %self.guild_id, "leaving voice channel");
        self.send_voice_state(None);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn send_voice_state(&self, channel_id: Option<&str>) {
        let payload = serde_json::json!({
            "op": 4,
            "d": {
                "guild_id": self.guild_id,
                "channel_id": channel_id,
                "self_deaf": self.self_deaf.load(Ordering::SeqCst),
                "self_mute": self.self_mute.load(Ordering::SeqCst),
            }
        });
        (self.send_payload)(&self.guild_id, payload);
    }

    /// Folds a gateway voice-state update into the pending handshake.
    ///
    /// Returns the completed voice data once both halves are known.
    pub fn apply_voice_state(&self, payload: &VoiceStatePayload) -> Option<VoiceUpdateData> {
        match payload.channel_id.as_deref() {
            None => {
                // Kicked or left; the handshake has to start over.
                let channel = self.voice_channel_id.lock().take().unwrap_or_default();
                *self.voice.lock() = PendingVoice::default();
                self.connected.store(false, Ordering::SeqCst);
                self.bus.emit(ManagerEvent::PlayerDisconnect {
                    guild_id: self.guild_id.clone(),
                    channel,
                });
                None
            }
            Some(channel_id) => {
                {
                    let mut current = self.voice_channel_id.lock();
                    if let Some(old) = current.as_deref() {
                        if old != channel_id {
                            self.bus.emit(ManagerEvent::PlayerMove {
                                guild_id: self.guild_id.clone(),
                                old_channel: old.to_string(),
                                new_channel: channel_id.to_string(),
                            });
                        }
                    }
                    *current = Some(channel_id.to_string());
                }
                let mut voice = self.voice.lock();
                voice.session_id = payload.session_id.clone();
                voice.complete()
            }
        }
    }

    /// Folds a gateway voice-server update into the pending handshake.
    pub fn apply_voice_server(&self, payload: &VoiceServerPayload) -> Option<VoiceUpdateData> {
        let mut voice = self.voice.lock();
        voice.token = Some(payload.token.clone());
        // A null endpoint means the voice region is failing over; wait for
        // the follow-up update instead of sending a dead endpoint.
        voice.endpoint = payload.endpoint.clone();
        voice.complete()
    }

    pub async fn handle_voice_state(&self, payload: &VoiceStatePayload) -> Result<()> {
        if let Some(voice) = self.apply_voice_state(payload) {
            self.submit_voice(voice).await?;
        }
        Ok(())
    }

    pub async fn handle_voice_server(&self, payload: &VoiceServerPayload) -> Result<()> {
        if let Some(voice) = self.apply_voice_server(payload) {
            self.submit_voice(voice).await?;
        }
        Ok(())
    }

    async fn submit_voice(&self, voice: VoiceUpdateData) -> Result<()> {
        debug!(guild_id = %self.guild_id, endpoint = %voice.endpoint, "voice handshake complete");
        self.connected.store(true, Ordering::SeqCst);
        let update = PlayerUpdate {
            voice: Some(voice),
            ..Default::default()
        };
        self.node().update_player(&self.guild_id, &update, false).await
    }

    // --- Playback ---

    /// Plays `track`, persisting it as the queue's current first.
    pub async fn play(&self, track: Track, options: PlayOptions) -> Result<()> {
        self.queue.set_current(Some(track.clone())).await?;

        if let Some(volume) = options.volume {
            self.volume.store(volume.min(MAX_VOLUME), Ordering::SeqCst);
        }
        let update = PlayerUpdate {
            track: Some(TrackPatch {
                encoded: Some(track.encoded.clone()),
            }),
            position: options.start_time,
            end_time: options.end_time,
            volume: Some(self.volume()),
            paused: options.pause,
            ..Default::default()
        };
        let no_replace = options.no_replace.unwrap_or(false);
        self.node()
            .update_player(&self.guild_id, &update, no_replace)
            .await?;

        self.playing.store(true, Ordering::SeqCst);
        self.paused
            .store(options.pause.unwrap_or(false), Ordering::SeqCst);
        info!(guild_id = %self.guild_id, title = %track.title(), "▶️ Reproduciendo");
        Ok(())
    }

    /// Starts playback from the queue: the current track if one is set,
    /// otherwise the queue head. Fails with `QueueEmpty` when neither exists.
    pub async fn play_from_queue(&self, options: PlayOptions) -> Result<Track> {
        self.queue.ensure_loaded().await;
        let track = match self.queue.current() {
            Some(track) => track,
            None => self.queue.next().await?.ok_or(Error::QueueEmpty)?,
        };
        self.play(track.clone(), options).await?;
        Ok(track)
    }

    /// Stops the current track without touching the queue; playing, paused
    /// and the position snapshot are all reset.
    pub async fn stop(&self) -> Result<()> {
        let update = PlayerUpdate {
            track: Some(TrackPatch { encoded: None }),
            ..Default::default()
        };
        self.node().update_player(&self.guild_id, &update, false).await?;
        self.playing.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        *self.last_state.lock() = None;
        Ok(())
    }

    pub async fn pause(&self, paused: bool) -> Result<()> {
        let update = PlayerUpdate {
            paused: Some(paused),
            ..Default::default()
        };
        self.node().update_player(&self.guild_id, &update, false).await?;
        self.paused.store(paused, Ordering::SeqCst);
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        self.pause(false).await
    }

    /// Seeks within the current track; fails when nothing is playing.
    pub async fn seek(&self, position_ms: u64) -> Result<()> {
        if self.current().is_none() {
            return Err(Error::NothingPlaying);
        }
        let update = PlayerUpdate {
            position: Some(position_ms),
            ..Default::default()
        };
        self.node().update_player(&self.guild_id, &update, false).await
    }

    /// Sets the player volume, normalized and clamped to `0..=1000`.
    pub async fn set_volume(&self, volume: u16) -> Result<()> {
        let volume = self.volume_normalizer.normalize(volume).min(MAX_VOLUME);
        let update = PlayerUpdate {
            volume: Some(volume),
            ..Default::default()
        };
        self.node().update_player(&self.guild_id, &update, false).await?;
        self.volume.store(volume, Ordering::SeqCst);
        Ok(())
    }

    /// Replaces the filter chain and pushes the full payload to the node.
    pub async fn set_filters(&self, chain: FilterChain) -> Result<()> {
        let update = PlayerUpdate {
            filters: Some(chain.payload().clone()),
            ..Default::default()
        };
        self.node().update_player(&self.guild_id, &update, false).await?;
        *self.filters.lock() = chain;
        Ok(())
    }

    /// Advances to the next queued track; stops playback when the queue is
    /// drained and returns `None`.
    pub async fn skip(&self) -> Result<Option<Track>> {
        match self.queue.next().await? {
            Some(track) => {
                let options = PlayOptions {
                    no_replace: Some(self.no_replace_on_skip),
                    ..Default::default()
                };
                self.play(track.clone(), options).await?;
                Ok(Some(track))
            }
            None => {
                self.stop().await?;
                Ok(None)
            }
        }
    }

    /// Position/connection snapshot pushed by the node.
    pub fn handle_state_update(&self, state: PlayerStateSnapshot) {
        self.connected.store(state.connected, Ordering::SeqCst);
        *self.last_state.lock() = Some((state, Instant::now()));
    }

    /// Tears the session down: server-side player, queue and voice channel.
    ///
    /// REST failures are logged but never abort the local cleanup.
    pub async fn destroy(&self, reason: DestroyReason) {
        if let Err(e) = self.node().destroy_player(&self.guild_id).await {
            warn!(guild_id = %self.guild_id, error = %e, "failed to destroy server-side player");
        }
        if let Err(e) = self.queue.reset().await {
            warn!(guild_id = %self.guild_id, error = %e, "failed to clear persisted queue");
        }
        self.disconnect();
        self.playing.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        *self.last_state.lock() = None;
        info!(guild_id = %self.guild_id, ?reason, "🗑️ Player destruido");
        self.bus.emit(ManagerEvent::PlayerDestroy {
            guild_id: self.guild_id.clone(),
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::queue::MemoryStore;
    use crate::track::test_support::track;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    fn test_session() -> (Arc<PlayerSession>, Arc<Mutex<Vec<serde_json::Value>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        let send_payload: SendGatewayPayload =
            Arc::new(move |_guild_id, payload| sink.lock().push(payload));

        let (tx, _rx) = mpsc::unbounded_channel();
        let node = Arc::new(
            NodeClient::new(NodeConfig::new("127.0.0.1", 2333, "pw"), "bot", tx).unwrap(),
        );

        let session = PlayerSession::new(PlayerContext {
            guild_id: "guild-1".to_string(),
            voice_channel_id: "vc-1".to_string(),
            text_channel_id: None,
            node,
            queue: Arc::new(Queue::new("guild-1", Arc::new(MemoryStore::new()))),
            bus: EventBus::default(),
            send_payload,
            volume: 100,
            self_deaf: true,
            self_mute: false,
            autoplay: false,
            no_replace_on_skip: false,
            volume_normalizer: Arc::new(ClampNormalizer),
        });
        (session, sent)
    }

    fn state_payload(channel: Option<&str>, session: Option<&str>) -> VoiceStatePayload {
        VoiceStatePayload {
            guild_id: "guild-1".to_string(),
            user_id: Some("bot".to_string()),
            session_id: session.map(str::to_string),
            channel_id: channel.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_voice_pair_completes_in_either_order() {
        let (session, _) = test_session();

        // State half alone is not enough.
        assert!(session
            .apply_voice_state(&state_payload(Some("vc-1"), Some("sess")))
            .is_none());

        let voice = session
            .apply_voice_server(&VoiceServerPayload {
                guild_id: "guild-1".to_string(),
                token: "tok".to_string(),
                endpoint: Some("us-west.example".to_string()),
            })
            .expect("pair should be complete");

        assert_eq!(voice.token, "tok");
        assert_eq!(voice.endpoint, "us-west.example");
        assert_eq!(voice.session_id, "sess");
    }

    #[tokio::test]
    async fn test_null_endpoint_defers_handshake() {
        let (session, _) = test_session();
        session.apply_voice_state(&state_payload(Some("vc-1"), Some("sess")));

        let outage = session.apply_voice_server(&VoiceServerPayload {
            guild_id: "guild-1".to_string(),
            token: "tok".to_string(),
            endpoint: None,
        });
        assert!(outage.is_none());

        // Follow-up update with a live endpoint completes the pair.
        let voice = session.apply_voice_server(&VoiceServerPayload {
            guild_id: "guild-1".to_string(),
            token: "tok2".to_string(),
            endpoint: Some("us-east.example".to_string()),
        });
        assert_eq!(voice.unwrap().token, "tok2");
    }

    #[tokio::test]
    async fn test_channel_none_resets_handshake() {
        let (session, _) = test_session();
        let bus = session.bus.clone();
        let mut events = bus.subscribe();

        session.apply_voice_state(&state_payload(Some("vc-1"), Some("sess")));
        session.apply_voice_state(&state_payload(None, None));

        assert!(!session.is_connected());
        assert!(session.voice_channel_id().is_none());
        match events.recv().await.unwrap() {
            ManagerEvent::PlayerDisconnect { channel, .. } => assert_eq!(channel, "vc-1"),
            other => panic!("unexpected event: {other:?}"),
        }

        // The stale session half must not complete a later pair by itself.
        let voice = session.apply_voice_server(&VoiceServerPayload {
            guild_id: "guild-1".to_string(),
            token: "tok".to_string(),
            endpoint: Some("ep".to_string()),
        });
        assert!(voice.is_none());
    }

    #[tokio::test]
    async fn test_channel_move_emits_event() {
        let (session, _) = test_session();
        let mut events = session.bus.subscribe();

        session.apply_voice_state(&state_payload(Some("vc-2"), Some("sess")));
        match events.recv().await.unwrap() {
            ManagerEvent::PlayerMove {
                old_channel,
                new_channel,
                ..
            } => {
                assert_eq!(old_channel, "vc-1");
                assert_eq!(new_channel, "vc-2");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(session.voice_channel_id().as_deref(), Some("vc-2"));
    }

    #[tokio::test]
    async fn test_connect_sends_gateway_frame() {
        let (session, sent) = test_session();
        session
            .connect(ConnectOptions {
                deaf: Some(true),
                mute: None,
            })
            .unwrap();

        let frames = sent.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["op"], 4);
        assert_eq!(frames[0]["d"]["channel_id"], "vc-1");
        assert_eq!(frames[0]["d"]["self_deaf"], true);
        // Connected is claimed right away; true readiness arrives async.
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_destroy_resets_playback_flags() {
        let (session, _) = test_session();
        session.record_track_start(track("t1", "T", "a"));
        session.paused.store(true, Ordering::SeqCst);
        session.handle_state_update(PlayerStateSnapshot {
            time: 0,
            position: 5_000,
            connected: true,
            ping: 10,
        });

        session.destroy(DestroyReason::Cleanup).await;

        assert!(!session.is_playing());
        assert!(!session.is_paused());
        assert!(!session.is_connected());
        assert_eq!(session.position(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_sends_null_channel() {
        let (session, sent) = test_session();
        session.disconnect();

        let frames = sent.lock();
        assert_eq!(frames[0]["d"]["channel_id"], serde_json::Value::Null);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_position_interpolates_only_while_playing() {
        let (session, _) = test_session();
        assert_eq!(session.position(), 0);

        session.handle_state_update(PlayerStateSnapshot {
            time: 0,
            position: 5_000,
            connected: true,
            ping: 10,
        });
        // Not playing, so the raw snapshot position is reported.
        assert_eq!(session.position(), 5_000);
        assert!(session.is_connected());
    }
}
