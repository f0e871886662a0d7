//! wavelink - client runtime for Lavalink-compatible audio nodes (v4).
//!
//! The crate connects to one or more remote audio nodes over WebSocket + REST
//! and manages per-guild playback on top of them: persisted queues, voice
//! handshake bridging, search with validation and caching, and autoplay.
//!
//! The host application owns the gateway; wavelink only needs a callback to
//! emit voice frames and expects voice state/server updates to be forwarded
//! back in.
//!
//! ```no_run
//! use std::sync::Arc;
//! use wavelink::{Manager, ManagerOptions, NodeConfig, CreatePlayerOptions};
//!
//! # async fn run() -> wavelink::Result<()> {
//! let options = ManagerOptions::new(
//!     vec![NodeConfig::new("localhost", 2333, "youshallnotpass")],
//!     Arc::new(|guild_id, payload| {
//!         // hand `payload` to your gateway shard for `guild_id`
//!         let _ = (guild_id, payload);
//!     }),
//! );
//! let manager = Manager::new(options)?;
//! manager.init("my-bot-user-id").await?;
//!
//! let player = manager.create_player(CreatePlayerOptions::new("guild", "voice-channel"))?;
//! player.connect(Default::default())?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod node;
pub mod player;
pub mod protocol;
pub mod queue;
pub mod track;

pub use cache::{CacheStats, SearchBackend, SearchCache};
pub use config::{
    ConnectOptions, CreatePlayerOptions, ManagerOptions, NodeConfig, PlayOptions, PlayerDefaults,
    SearchSource, SendGatewayPayload, ValidationOptions,
};
pub use error::{Error, Result};
pub use events::{DestroyReason, EventBus, ManagerEvent};
pub use manager::{Manager, SearchResult};
pub use node::{NodeClient, NodeState};
pub use player::{FilterChain, PlayerSession, VolumeNormalizer, MAX_VOLUME};
pub use protocol::{LoadResult, NodeInfo, NodeStats, TrackEndReason};
pub use queue::{KeyValueBackend, KvStoreAdapter, MemoryStore, Queue, QueueSnapshot, QueueStore};
pub use track::{Track, TrackInfo};
