use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A playable track: the node's opaque encoded payload plus metadata.
///
/// Value-like and cheap to clone. The `requester` annotation is attached at
/// search time and intentionally left out of persistence: it only makes sense
/// for the process that performed the search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub encoded: String,
    pub info: TrackInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_info: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<serde_json::Value>,
    #[serde(skip)]
    pub requester: Option<serde_json::Value>,
}

/// Metadata reported by the node for a track.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Track length in milliseconds.
    pub length: u64,
    pub is_stream: bool,
    #[serde(default)]
    pub position: u64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
    pub source_name: String,
}

impl Track {
    /// Attaches a requester annotation, returning the modified track.
    pub fn with_requester(mut self, requester: Option<serde_json::Value>) -> Self {
        self.requester = requester;
        self
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn author(&self) -> &str {
        &self.info.author
    }

    pub fn identifier(&self) -> &str {
        &self.info.identifier
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.info.length)
    }

    pub fn uri(&self) -> Option<&str> {
        self.info.uri.as_deref()
    }

    pub fn artwork_url(&self) -> Option<&str> {
        self.info.artwork_url.as_deref()
    }

    pub fn is_stream(&self) -> bool {
        self.info.is_stream
    }

    pub fn is_seekable(&self) -> bool {
        self.info.is_seekable
    }

    pub fn source_name(&self) -> &str {
        &self.info.source_name
    }
}
