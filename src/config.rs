use std::sync::Arc;
use std::time::Duration;

use crate::player::VolumeNormalizer;

/// Callback used to hand voice-gateway frames to the host application.
///
/// The host owns the actual gateway transport; the runtime only produces the
/// opaque connect/disconnect frames and the guild they belong to.
pub type SendGatewayPayload = Arc<dyn Fn(&str, serde_json::Value) + Send + Sync>;

/// Configuración estática de un nodo de audio.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub secure: bool,
    /// Defaults to `host:port` when not set.
    pub identifier: Option<String>,
    /// Reconnect attempts per outage before the node is left down.
    pub retry_amount: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    /// Negotiate session resuming after a fresh (non-resumed) connect.
    pub resume: bool,
    /// Seconds the node keeps the session alive after a disconnect.
    pub resume_timeout: u64,
    /// Known session id to resume, if any.
    pub session_id: Option<String>,
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            secure: false,
            identifier: None,
            retry_amount: 5,
            retry_delay: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            resume: false,
            resume_timeout: 60,
            session_id: None,
        }
    }

    pub fn identifier(&self) -> String {
        self.identifier
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }
}

/// Search engines the node understands, mapped to identifier prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchSource {
    Youtube,
    YoutubeMusic,
    Soundcloud,
    Spotify,
    Deezer,
    AppleMusic,
    Yandex,
}

impl SearchSource {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Youtube => "ytsearch",
            Self::YoutubeMusic => "ytmsearch",
            Self::Soundcloud => "scsearch",
            Self::Spotify => "spsearch",
            Self::Deezer => "dzsearch",
            Self::AppleMusic => "amsearch",
            Self::Yandex => "ymsearch",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::YoutubeMusic => "youtubemusic",
            Self::Soundcloud => "soundcloud",
            Self::Spotify => "spotify",
            Self::Deezer => "deezer",
            Self::AppleMusic => "applemusic",
            Self::Yandex => "yandex",
        }
    }

    pub const ALL: [SearchSource; 7] = [
        Self::Youtube,
        Self::YoutubeMusic,
        Self::Soundcloud,
        Self::Spotify,
        Self::Deezer,
        Self::AppleMusic,
        Self::Yandex,
    ];
}

/// Límites de validación aplicados a los resultados de búsqueda.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub allowed_protocols: Vec<String>,
    /// Tracks longer than this only produce a warning.
    pub max_track_length_ms: u64,
    /// Playlists larger than this are rejected outright.
    pub max_playlist_size: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            allowed_protocols: vec!["http".to_string(), "https".to_string()],
            max_track_length_ms: 3_600_000,
            max_playlist_size: 1000,
        }
    }
}

/// Defaults applied to every player the manager creates.
#[derive(Debug, Clone)]
pub struct PlayerDefaults {
    pub volume: u16,
    pub self_deaf: bool,
    pub self_mute: bool,
    pub autoplay: bool,
}

impl Default for PlayerDefaults {
    fn default() -> Self {
        Self {
            volume: 100,
            self_deaf: true,
            self_mute: false,
            autoplay: false,
        }
    }
}

/// Opciones del manager.
#[derive(Clone)]
pub struct ManagerOptions {
    pub nodes: Vec<NodeConfig>,
    pub send_payload: SendGatewayPayload,
    pub default_search_source: SearchSource,
    pub validation: ValidationOptions,
    pub player_defaults: PlayerDefaults,
    /// Whether an automatic skip (queue advance / autoplay) asks the node not
    /// to replace a currently playing track. Explicit configuration, never
    /// inferred.
    pub no_replace_on_skip: bool,
    /// Custom volume curve; plain clamping when unset.
    pub volume_normalizer: Option<Arc<dyn VolumeNormalizer>>,
}

impl ManagerOptions {
    pub fn new(nodes: Vec<NodeConfig>, send_payload: SendGatewayPayload) -> Self {
        Self {
            nodes,
            send_payload,
            default_search_source: SearchSource::Youtube,
            validation: ValidationOptions::default(),
            player_defaults: PlayerDefaults::default(),
            no_replace_on_skip: false,
            volume_normalizer: None,
        }
    }
}

/// Options for `Manager::create_player`.
#[derive(Debug, Clone)]
pub struct CreatePlayerOptions {
    pub guild_id: String,
    pub voice_channel_id: String,
    pub text_channel_id: Option<String>,
    pub self_deaf: Option<bool>,
    pub self_mute: Option<bool>,
    pub volume: Option<u16>,
    /// Preferred node identifier; used only while that node is connected.
    pub node: Option<String>,
}

impl CreatePlayerOptions {
    pub fn new(guild_id: impl Into<String>, voice_channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            voice_channel_id: voice_channel_id.into(),
            text_channel_id: None,
            self_deaf: None,
            self_mute: None,
            volume: None,
            node: None,
        }
    }
}

/// Options for `PlayerSession::connect`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectOptions {
    pub deaf: Option<bool>,
    pub mute: Option<bool>,
}

/// Options for `PlayerSession::play`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayOptions {
    /// Start position in milliseconds.
    pub start_time: Option<u64>,
    /// End position in milliseconds.
    pub end_time: Option<u64>,
    pub no_replace: Option<bool>,
    pub pause: Option<bool>,
    pub volume: Option<u16>,
}
