use std::sync::Arc;

/// Resultado estándar del crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errores del runtime de audio.
///
/// The enum is `Clone` so results can travel through the search cache's
/// shared in-flight futures; non-clonable sources are wrapped in `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("node `{0}` is not connected")]
    NodeNotConnected(String),

    #[error("no available nodes")]
    NoAvailableNodes,

    #[error("node `{0}` has no session id")]
    NoSessionId(String),

    #[error("queue is empty")]
    QueueEmpty,

    #[error("no track is currently playing")]
    NothingPlaying,

    #[error("voice channel id is not set")]
    NoVoiceChannel,

    #[error("manager already initiated")]
    AlreadyInitiated,

    #[error("at least one node is required")]
    NoNodesConfigured,

    #[error("no player found for guild `{0}`")]
    PlayerNotFound(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("playlist size {size} exceeds maximum {max}")]
    PlaylistTooLarge { size: usize, max: usize },

    #[error("track load failed: {0}")]
    LoadFailed(String),

    #[error("queue store error: {0}")]
    Store(String),

    #[error("http request failed: {0}")]
    Http(#[source] Arc<reqwest::Error>),

    #[error("websocket error: {0}")]
    WebSocket(#[source] Arc<tokio_tungstenite::tungstenite::Error>),

    #[error("json error: {0}")]
    Json(#[source] Arc<serde_json::Error>),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(Arc::new(err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}
