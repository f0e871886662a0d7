//! Orchestration layer: node registry, player registry, signal routing,
//! search and autoplay.
//!
//! The manager owns every [`NodeClient`] and [`PlayerSession`], consumes the
//! node signal channel on a background task and translates signals into
//! [`ManagerEvent`]s plus player state changes. Hosts interact with this type
//! almost exclusively.

pub mod autoplay;
pub mod search;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::{
    CreatePlayerOptions, ManagerOptions, NodeConfig, PlayOptions, PlayerDefaults, SearchSource,
    SendGatewayPayload, ValidationOptions,
};
use crate::error::{Error, Result};
use crate::events::{DestroyReason, EventBus, ManagerEvent};
use crate::node::{NodeClient, NodeSignal};
use crate::player::{ClampNormalizer, PlayerContext, PlayerSession, VolumeNormalizer};
use crate::protocol::{NodeEvent, VoiceServerPayload, VoiceStatePayload};
use crate::queue::{MemoryStore, Queue, QueueStore};
use crate::track::Track;

pub use autoplay::AutoplayHistory;
pub use search::SearchResult;

use crate::cache::SearchBackend;

pub struct Manager {
    send_payload: SendGatewayPayload,
    default_search_source: SearchSource,
    validation: ValidationOptions,
    player_defaults: PlayerDefaults,
    no_replace_on_skip: bool,
    volume_normalizer: Arc<dyn VolumeNormalizer>,

    node_configs: Vec<NodeConfig>,
    nodes: Mutex<Vec<Arc<NodeClient>>>,
    players: DashMap<String, Arc<PlayerSession>>,
    store: Arc<dyn QueueStore>,
    bus: EventBus,
    history: AutoplayHistory,

    user_id: Mutex<Option<String>>,
    initiated: AtomicBool,
}

impl Manager {
    /// Builds a manager with the default in-memory queue store.
    pub fn new(options: ManagerOptions) -> Result<Arc<Self>> {
        Self::with_store(options, Arc::new(MemoryStore::new()))
    }

    /// Builds a manager persisting queues through `store`.
    pub fn with_store(options: ManagerOptions, store: Arc<dyn QueueStore>) -> Result<Arc<Self>> {
        if options.nodes.is_empty() {
            return Err(Error::NoNodesConfigured);
        }
        Ok(Arc::new(Self {
            send_payload: options.send_payload,
            default_search_source: options.default_search_source,
            validation: options.validation,
            player_defaults: options.player_defaults,
            no_replace_on_skip: options.no_replace_on_skip,
            volume_normalizer: options
                .volume_normalizer
                .unwrap_or_else(|| Arc::new(ClampNormalizer)),
            node_configs: options.nodes,
            nodes: Mutex::new(Vec::new()),
            players: DashMap::new(),
            store,
            bus: EventBus::default(),
            history: AutoplayHistory::new(),
            user_id: Mutex::new(None),
            initiated: AtomicBool::new(false),
        }))
    }

    /// Connects every configured node and starts the signal routing task.
    ///
    /// A node that fails its first handshake only produces a `NodeError`
    /// event; it keeps retrying on its own and never fails the whole init.
    pub async fn init(self: &Arc<Self>, user_id: impl Into<String>) -> Result<()> {
        if self.initiated.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitiated);
        }
        let user_id = user_id.into();
        *self.user_id.lock() = Some(user_id.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut built = Vec::with_capacity(self.node_configs.len());
        for config in &self.node_configs {
            built.push(Arc::new(NodeClient::new(
                config.clone(),
                user_id.clone(),
                tx.clone(),
            )?));
        }
        *self.nodes.lock() = built.clone();

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let Some(manager) = weak.upgrade() else { break };
                manager.handle_signal(signal).await;
            }
        });

        for node in built {
            match node.connect().await {
                Ok(()) => self.bus.emit(ManagerEvent::NodeConnect {
                    node: node.identifier().to_string(),
                }),
                Err(e) => {
                    warn!(node = %node.identifier(), error = %e, "initial node connect failed");
                    self.bus.emit(ManagerEvent::NodeError {
                        node: node.identifier().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        info!(nodes = self.nodes.lock().len(), "🎛️ Manager iniciado");
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.bus.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn nodes(&self) -> Vec<Arc<NodeClient>> {
        self.nodes.lock().clone()
    }

    pub fn node(&self, identifier: &str) -> Option<Arc<NodeClient>> {
        self.nodes
            .lock()
            .iter()
            .find(|n| n.identifier() == identifier)
            .cloned()
    }

    /// Picks the node for new work.
    ///
    /// An explicitly preferred node wins while it is connected, regardless of
    /// load. Otherwise the connected node with the fewest players is chosen,
    /// ties broken by configuration order.
    pub fn best_node(&self, preferred: Option<&str>) -> Result<Arc<NodeClient>> {
        let nodes = self.nodes.lock();

        if let Some(id) = preferred {
            if let Some(node) = nodes.iter().find(|n| n.identifier() == id && n.connected()) {
                return Ok(node.clone());
            }
        }

        let mut best: Option<(&Arc<NodeClient>, u32)> = None;
        for node in nodes.iter().filter(|n| n.connected()) {
            let players = node.stats().map_or(0, |s| s.players);
            match best {
                Some((_, fewest)) if players >= fewest => {}
                _ => best = Some((node, players)),
            }
        }
        best.map(|(node, _)| node.clone())
            .ok_or(Error::NoAvailableNodes)
    }

    // --- Players ---

    /// Creates (or returns the existing) player session for a guild.
    pub fn create_player(&self, options: CreatePlayerOptions) -> Result<Arc<PlayerSession>> {
        if let Some(existing) = self.players.get(&options.guild_id) {
            return Ok(existing.clone());
        }

        let node = self.best_node(options.node.as_deref())?;
        let queue = Arc::new(Queue::new(options.guild_id.clone(), self.store.clone()));
        let defaults = &self.player_defaults;

        let session = PlayerSession::new(PlayerContext {
            guild_id: options.guild_id.clone(),
            voice_channel_id: options.voice_channel_id,
            text_channel_id: options.text_channel_id,
            node,
            queue,
            bus: self.bus.clone(),
            send_payload: self.send_payload.clone(),
            volume: options.volume.unwrap_or(defaults.volume),
            self_deaf: options.self_deaf.unwrap_or(defaults.self_deaf),
            self_mute: options.self_mute.unwrap_or(defaults.self_mute),
            autoplay: defaults.autoplay,
            no_replace_on_skip: self.no_replace_on_skip,
            volume_normalizer: self.volume_normalizer.clone(),
        });

        self.players.insert(options.guild_id.clone(), session.clone());
        self.bus.emit(ManagerEvent::PlayerCreate {
            guild_id: options.guild_id,
        });
        Ok(session)
    }

    pub fn get_player(&self, guild_id: &str) -> Option<Arc<PlayerSession>> {
        self.players.get(guild_id).map(|p| p.clone())
    }

    pub fn players(&self) -> usize {
        self.players.len()
    }

    /// Destroys a guild's session, its server-side player and its autoplay
    /// history.
    pub async fn destroy_player(&self, guild_id: &str, reason: DestroyReason) -> Result<()> {
        let (_, session) = self
            .players
            .remove(guild_id)
            .ok_or_else(|| Error::PlayerNotFound(guild_id.to_string()))?;
        self.history.forget(guild_id);
        session.destroy(reason).await;
        Ok(())
    }

    // --- Voice bridge ---

    /// Routes a gateway voice-state update; states of other users are ignored.
    pub async fn handle_voice_state_update(&self, payload: VoiceStatePayload) -> Result<()> {
        let bot = self.user_id.lock().clone();
        if payload.user_id.is_some() && payload.user_id != bot {
            return Ok(());
        }
        let Some(player) = self.get_player(&payload.guild_id) else {
            return Ok(());
        };
        player.handle_voice_state(&payload).await
    }

    /// Routes a gateway voice-server update to the guild's session.
    pub async fn handle_voice_server_update(&self, payload: VoiceServerPayload) -> Result<()> {
        let Some(player) = self.get_player(&payload.guild_id) else {
            return Ok(());
        };
        player.handle_voice_server(&payload).await
    }

    // --- Search ---

    /// Resolves a query (free text, prefixed query or URL) on the best node.
    pub async fn search(
        &self,
        query: &str,
        requester: Option<serde_json::Value>,
        source: Option<SearchSource>,
    ) -> Result<SearchResult> {
        let source = source.unwrap_or(self.default_search_source);
        let identifier = search::normalize_query(query, source, &self.validation)?;
        let node = self.best_node(None)?;
        let result = node.rest().load_tracks(&identifier).await?;
        search::validate_load_result(&result, &self.validation)?;
        search::into_search_result(result, requester)
    }

    // --- Signal routing ---

    async fn handle_signal(self: &Arc<Self>, signal: NodeSignal) {
        match signal {
            NodeSignal::Ready {
                node,
                session_id: _,
                resumed,
            } => {
                self.bus.emit(ManagerEvent::NodeReady { node, resumed });
            }
            NodeSignal::Stats { node, stats } => {
                self.bus.emit(ManagerEvent::NodeStats { node, stats });
            }
            NodeSignal::PlayerUpdate {
                node: _,
                guild_id,
                state,
            } => {
                if let Some(player) = self.get_player(&guild_id) {
                    player.handle_state_update(state);
                }
            }
            NodeSignal::Event { node, event } => {
                self.handle_node_event(&node, event).await;
            }
            NodeSignal::Disconnected { node, reason } => {
                self.bus.emit(ManagerEvent::NodeDisconnect { node, reason });
            }
            NodeSignal::ReconnectExhausted { node } => {
                self.bus.emit(ManagerEvent::NodeError {
                    node: node.clone(),
                    message: "reconnect attempts exhausted".to_string(),
                });
                self.drop_players_of_node(&node).await;
            }
            NodeSignal::Error { node, message } => {
                self.bus.emit(ManagerEvent::NodeError { node, message });
            }
        }
    }

    /// A node is gone for good; its sessions cannot play anymore.
    async fn drop_players_of_node(&self, node: &str) {
        let guilds: Vec<String> = self
            .players
            .iter()
            .filter(|entry| entry.value().node().identifier() == node)
            .map(|entry| entry.key().clone())
            .collect();
        for guild_id in guilds {
            if let Err(e) = self.destroy_player(&guild_id, DestroyReason::NodeDestroy).await {
                warn!(guild_id, error = %e, "failed to drop player of dead node");
            }
        }
    }

    async fn handle_node_event(self: &Arc<Self>, node: &str, event: NodeEvent) {
        let guild_id = event.guild_id().to_string();
        let Some(player) = self.get_player(&guild_id) else {
            debug!(node, guild_id, "event for unknown player");
            return;
        };

        match event {
            NodeEvent::TrackStart { track, .. } => {
                player.record_track_start(track.clone());
                self.bus.emit(ManagerEvent::TrackStart { guild_id, track });
            }
            NodeEvent::TrackEnd { track, reason, .. } => {
                player.record_track_end();
                self.bus.emit(ManagerEvent::TrackEnd {
                    guild_id,
                    track: track.clone(),
                    reason,
                });
                if reason.should_advance() {
                    self.advance(&player, Some(track)).await;
                }
            }
            NodeEvent::TrackException {
                track, exception, ..
            } => {
                player.record_track_end();
                self.bus.emit(ManagerEvent::TrackError {
                    guild_id,
                    track: track.clone(),
                    exception,
                });
                self.advance(&player, Some(track)).await;
            }
            NodeEvent::TrackStuck {
                track,
                threshold_ms,
                ..
            } => {
                player.record_track_end();
                self.bus.emit(ManagerEvent::TrackStuck {
                    guild_id,
                    track: track.clone(),
                    threshold_ms,
                });
                self.advance(&player, Some(track)).await;
            }
            NodeEvent::WebSocketClosed {
                code,
                reason,
                by_remote,
                ..
            } => {
                self.bus.emit(ManagerEvent::SocketClosed {
                    guild_id,
                    code,
                    reason,
                    by_remote,
                });
            }
        }
    }

    /// Moves a session forward after a track finished: next queued track,
    /// else autoplay seeded with `ended`, else queue end. Every failure
    /// degrades to queue end.
    async fn advance(&self, player: &Arc<PlayerSession>, ended: Option<Track>) {
        match player.queue().next().await {
            Ok(Some(track)) => {
                let options = PlayOptions {
                    no_replace: Some(self.no_replace_on_skip),
                    ..Default::default()
                };
                if let Err(e) = player.play(track, options).await {
                    warn!(guild_id = %player.guild_id(), error = %e, "advance play failed");
                    self.finish_queue(player);
                }
            }
            Ok(None) => {
                if player.autoplay_enabled() {
                    self.run_autoplay(player, ended).await;
                } else {
                    self.finish_queue(player);
                }
            }
            Err(e) => {
                warn!(guild_id = %player.guild_id(), error = %e, "queue advance failed");
                self.finish_queue(player);
            }
        }
    }

    fn finish_queue(&self, player: &Arc<PlayerSession>) {
        self.bus.emit(ManagerEvent::QueueEnd {
            guild_id: player.guild_id().to_string(),
        });
    }

    /// Seed for related-track discovery: the last track the node reported
    /// started, else the queue's current track, else the one that just ended.
    fn autoplay_seed(player: &Arc<PlayerSession>, ended: Option<Track>) -> Option<Track> {
        player
            .last_played()
            .or_else(|| player.queue().current())
            .or(ended)
    }

    /// Autoplay pipeline: pick a seed, run noise-stripped query variants
    /// sequentially, filter against the recent-play window and enqueue one
    /// uniformly-random candidate.
    async fn run_autoplay(&self, player: &Arc<PlayerSession>, ended: Option<Track>) {
        let guild_id = player.guild_id().to_string();
        let Some(seed) = Self::autoplay_seed(player, ended) else {
            self.finish_queue(player);
            return;
        };

        self.history.record(&guild_id, seed.identifier());
        let recent = self.history.recent(&guild_id);

        let mut candidates: Vec<Track> = Vec::new();
        for query in autoplay::build_queries(&seed) {
            match self.search(&query, seed.requester.clone(), None).await {
                Ok(result) => {
                    if autoplay::collect_candidates(
                        &mut candidates,
                        result.tracks(),
                        &seed,
                        &recent,
                    ) {
                        break;
                    }
                }
                Err(e) => {
                    debug!(guild_id, query, error = %e, "autoplay query failed");
                }
            }
        }

        if candidates.is_empty() {
            info!(guild_id, "autoplay found nothing related");
            self.finish_queue(player);
            return;
        }

        let pick = candidates[rand::thread_rng().gen_range(0..candidates.len())].clone();
        self.history.record(&guild_id, pick.identifier());

        let queued = match player.queue().add([pick.clone()]).await {
            Ok(()) => player.skip().await,
            Err(e) => Err(e),
        };
        match queued {
            Ok(Some(track)) => {
                info!(guild_id, title = %track.title(), "🔄 Autoplay");
                self.bus.emit(ManagerEvent::AutoplayTrack { guild_id, track });
            }
            Ok(None) | Err(_) => {
                warn!(guild_id, "autoplay playback failed");
                self.finish_queue(player);
            }
        }
    }
}

#[async_trait::async_trait]
impl SearchBackend for Manager {
    async fn search(&self, query: &str, source: SearchSource) -> Result<SearchResult> {
        Manager::search(self, query, None, Some(source)).await
    }
}
