//! Typed payloads for the node protocol (v4).
//!
//! Everything that crosses the wire lives here: inbound WebSocket messages,
//! REST request/response bodies and the filter object. Payloads are validated
//! at the deserialization boundary instead of being passed around as loose
//! JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::track::Track;

// ============================================================================
// Inbound WebSocket messages
// ============================================================================

/// A message received on the node WebSocket, dispatched by `op` code.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IncomingMessage {
    #[serde(rename_all = "camelCase")]
    Ready {
        session_id: String,
        #[serde(default)]
        resumed: bool,
    },
    Stats(NodeStats),
    #[serde(rename_all = "camelCase")]
    PlayerUpdate {
        guild_id: String,
        state: PlayerStateSnapshot,
    },
    Event(NodeEvent),
}

/// Per-guild playback event forwarded by the node.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    #[serde(rename = "TrackStartEvent", rename_all = "camelCase")]
    TrackStart { guild_id: String, track: Track },

    #[serde(rename = "TrackEndEvent", rename_all = "camelCase")]
    TrackEnd {
        guild_id: String,
        track: Track,
        reason: TrackEndReason,
    },

    #[serde(rename = "TrackExceptionEvent", rename_all = "camelCase")]
    TrackException {
        guild_id: String,
        track: Track,
        exception: TrackException,
    },

    #[serde(rename = "TrackStuckEvent", rename_all = "camelCase")]
    TrackStuck {
        guild_id: String,
        track: Track,
        threshold_ms: u64,
    },

    #[serde(rename = "WebSocketClosedEvent", rename_all = "camelCase")]
    WebSocketClosed {
        guild_id: String,
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

impl NodeEvent {
    /// The guild this event belongs to.
    pub fn guild_id(&self) -> &str {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::WebSocketClosed { guild_id, .. } => guild_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Whether playback should advance to the next track after this reason.
    pub fn should_advance(self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackException {
    #[serde(default)]
    pub message: Option<String>,
    pub severity: ExceptionSeverity,
    pub cause: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExceptionSeverity {
    Common,
    Suspicious,
    Fault,
}

/// Position/connection snapshot reported by the node in `playerUpdate` ops.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStateSnapshot {
    #[serde(default)]
    pub time: u64,
    #[serde(default)]
    pub position: u64,
    pub connected: bool,
    #[serde(default)]
    pub ping: i64,
}

// ============================================================================
// Node statistics / info
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub players: u32,
    pub playing_players: u32,
    pub uptime: u64,
    pub memory: MemoryStats,
    pub cpu: CpuStats,
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryStats {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

/// Capability report from `GET /info`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub version: NodeVersion,
    #[serde(default)]
    pub build_time: u64,
    pub jvm: String,
    pub lavaplayer: String,
    #[serde(default)]
    pub source_managers: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub plugins: Vec<PluginInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeVersion {
    pub semver: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
}

// ============================================================================
// REST requests
// ============================================================================

/// Partial player patch for `PATCH /sessions/{sessionId}/players/{guildId}`.
///
/// Only fields that are present are mutated server-side; everything else is
/// left untouched. `track.encoded: null` explicitly clears the active track,
/// which is why [`TrackPatch`] never skips its field.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceUpdateData>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackPatch {
    /// `Some` plays the given encoded track, `None` serializes as `null` and
    /// stops the current one.
    pub encoded: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceUpdateData {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

/// Body of `PATCH /sessions/{sessionId}` used to negotiate session resuming.
#[derive(Debug, Clone, Serialize)]
pub struct ResumeSession {
    pub resuming: bool,
    /// Seconds the node keeps the session alive after a disconnect.
    pub timeout: u64,
}

// ============================================================================
// Load results
// ============================================================================

/// Response of `GET /loadtracks`, discriminated by `loadType`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    Track(Track),
    Playlist(PlaylistData),
    Search(Vec<Track>),
    Empty(serde_json::Value),
    Error(LoadError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistData {
    pub info: PlaylistInfo,
    #[serde(default)]
    pub plugin_info: serde_json::Value,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    #[serde(default)]
    pub selected_track: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadError {
    #[serde(default)]
    pub message: Option<String>,
    pub severity: ExceptionSeverity,
    pub cause: String,
}

// ============================================================================
// Filters
// ============================================================================

/// Accumulated filter payload. The full object is sent on every change.
///
/// One generic string-keyed map (`plugin_filters`) is reserved for untyped
/// plugin filters so unknown filter kinds survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<Vec<EqualizerBand>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<KaraokeFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<TimescaleFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<TremoloFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<VibratoFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<DistortionFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_mix: Option<ChannelMixFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_pass: Option<LowPassFilter>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub plugin_filters: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqualizerBand {
    pub band: u8,
    pub gain: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KaraokeFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mono_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_band: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_width: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimescaleFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TremoloFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VibratoFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_hz: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistortionFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sin_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sin_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cos_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cos_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tan_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tan_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMixFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_to_left: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_to_right: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_to_left: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_to_right: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LowPassFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing: Option<f64>,
}

// ============================================================================
// Voice gateway payloads (host bridge, snake_case as delivered)
// ============================================================================

/// Raw voice-state-update forwarded by the host gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceStatePayload {
    pub guild_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// Raw voice-server-update forwarded by the host gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceServerPayload {
    pub guild_id: String,
    pub token: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_ready_op() {
        let msg: IncomingMessage = serde_json::from_str(
            r#"{"op":"ready","resumed":false,"sessionId":"la3kfltkdoowyvph"}"#,
        )
        .unwrap();
        match msg {
            IncomingMessage::Ready { session_id, resumed } => {
                assert_eq!(session_id, "la3kfltkdoowyvph");
                assert!(!resumed);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_stats_op() {
        let msg: IncomingMessage = serde_json::from_str(
            r#"{
                "op": "stats",
                "players": 3,
                "playingPlayers": 2,
                "uptime": 123456,
                "memory": {"free": 1, "used": 2, "allocated": 3, "reservable": 4},
                "cpu": {"cores": 4, "systemLoad": 0.5, "lavalinkLoad": 0.1}
            }"#,
        )
        .unwrap();
        match msg {
            IncomingMessage::Stats(stats) => {
                assert_eq!(stats.players, 3);
                assert_eq!(stats.cpu.cores, 4);
                assert!(stats.frame_stats.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_track_end_event() {
        let msg: IncomingMessage = serde_json::from_str(
            r#"{
                "op": "event",
                "type": "TrackEndEvent",
                "guildId": "123",
                "track": {
                    "encoded": "abc",
                    "info": {
                        "identifier": "id", "isSeekable": true, "author": "a",
                        "length": 100, "isStream": false, "position": 0,
                        "title": "t", "sourceName": "youtube"
                    }
                },
                "reason": "finished"
            }"#,
        )
        .unwrap();
        match msg {
            IncomingMessage::Event(NodeEvent::TrackEnd { guild_id, reason, .. }) => {
                assert_eq!(guild_id, "123");
                assert_eq!(reason, TrackEndReason::Finished);
                assert!(reason.should_advance());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_player_update_skips_absent_fields() {
        let update = PlayerUpdate {
            paused: Some(true),
            ..Default::default()
        };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"paused":true}"#);
    }

    #[test]
    fn test_stop_patch_serializes_null_track() {
        let update = PlayerUpdate {
            track: Some(TrackPatch { encoded: None }),
            ..Default::default()
        };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"track":{"encoded":null}}"#);
    }

    #[test]
    fn test_parse_search_load_result() {
        let result: LoadResult = serde_json::from_str(
            r#"{"loadType":"empty","data":{}}"#,
        )
        .unwrap();
        assert!(matches!(result, LoadResult::Empty(_)));
    }
}
