//! Query normalization and search-result validation.
//!
//! Raw user input falls into three shapes: a URL (passed through after
//! validation), an already-prefixed node query like `ytsearch:...` (passed
//! through untouched) and free text (prefixed with the configured source).

use tracing::warn;
use url::Url;

use crate::config::{SearchSource, ValidationOptions};
use crate::error::{Error, Result};
use crate::protocol::LoadResult;
use crate::track::Track;

/// Typed outcome of a search, with the requester already attached.
#[derive(Debug, Clone)]
pub enum SearchResult {
    /// A single directly-resolved track (URL loads).
    Track(Track),
    Playlist { name: String, tracks: Vec<Track> },
    /// Search hits, best match first.
    Search(Vec<Track>),
    Empty,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Track(_) => false,
            Self::Playlist { tracks, .. } | Self::Search(tracks) => tracks.is_empty(),
        }
    }

    /// All tracks of the result, in order.
    pub fn tracks(&self) -> Vec<Track> {
        match self {
            Self::Empty => Vec::new(),
            Self::Track(track) => vec![track.clone()],
            Self::Playlist { tracks, .. } | Self::Search(tracks) => tracks.clone(),
        }
    }

    /// The best single track of the result, if any.
    pub fn first_track(&self) -> Option<Track> {
        match self {
            Self::Empty => None,
            Self::Track(track) => Some(track.clone()),
            Self::Playlist { tracks, .. } | Self::Search(tracks) => tracks.first().cloned(),
        }
    }
}

/// Turns raw input into a node identifier.
pub fn normalize_query(
    query: &str,
    source: SearchSource,
    validation: &ValidationOptions,
) -> Result<String> {
    let query = query.trim();

    if has_search_prefix(query) {
        return Ok(query.to_string());
    }

    if let Ok(url) = Url::parse(query) {
        if url.has_host() {
            validate_url(&url, validation)?;
            return Ok(query.to_string());
        }
    }

    Ok(format!("{}:{}", source.prefix(), query))
}

fn has_search_prefix(query: &str) -> bool {
    match query.split_once(':') {
        Some((prefix, rest)) if !rest.is_empty() => SearchSource::ALL
            .iter()
            .any(|source| source.prefix() == prefix),
        _ => false,
    }
}

/// Protocol and domain checks from [`ValidationOptions`].
pub fn validate_url(url: &Url, validation: &ValidationOptions) -> Result<()> {
    if !validation
        .allowed_protocols
        .iter()
        .any(|p| p == url.scheme())
    {
        return Err(Error::InvalidUrl(format!(
            "protocol `{}` not allowed",
            url.scheme()
        )));
    }

    let Some(host) = url.host_str() else {
        return Err(Error::InvalidUrl("url has no host".to_string()));
    };

    if validation
        .blocked_domains
        .iter()
        .any(|domain| domain_matches(host, domain))
    {
        return Err(Error::InvalidUrl(format!("domain `{host}` is blocked")));
    }

    if !validation.allowed_domains.is_empty()
        && !validation
            .allowed_domains
            .iter()
            .any(|domain| domain_matches(host, domain))
    {
        return Err(Error::InvalidUrl(format!("domain `{host}` is not allowed")));
    }

    Ok(())
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Rejects oversized playlists; over-long tracks only produce a warning.
pub fn validate_load_result(result: &LoadResult, validation: &ValidationOptions) -> Result<()> {
    let tracks: &[Track] = match result {
        LoadResult::Playlist(playlist) => {
            if playlist.tracks.len() > validation.max_playlist_size {
                return Err(Error::PlaylistTooLarge {
                    size: playlist.tracks.len(),
                    max: validation.max_playlist_size,
                });
            }
            &playlist.tracks
        }
        LoadResult::Track(track) => std::slice::from_ref(track),
        LoadResult::Search(tracks) => tracks,
        LoadResult::Empty(_) | LoadResult::Error(_) => &[],
    };

    for track in tracks {
        if !track.is_stream() && track.info.length > validation.max_track_length_ms {
            warn!(
                title = %track.title(),
                length_ms = track.info.length,
                "track exceeds configured maximum length"
            );
        }
    }
    Ok(())
}

/// Converts the wire result into a [`SearchResult`], attaching the requester
/// to every track.
pub fn into_search_result(
    result: LoadResult,
    requester: Option<serde_json::Value>,
) -> Result<SearchResult> {
    let attach = |tracks: Vec<Track>| -> Vec<Track> {
        tracks
            .into_iter()
            .map(|t| t.with_requester(requester.clone()))
            .collect()
    };

    Ok(match result {
        LoadResult::Track(track) => SearchResult::Track(track.with_requester(requester)),
        LoadResult::Playlist(playlist) => SearchResult::Playlist {
            name: playlist.info.name,
            tracks: attach(playlist.tracks),
        },
        LoadResult::Search(tracks) => SearchResult::Search(attach(tracks)),
        LoadResult::Empty(_) => SearchResult::Empty,
        LoadResult::Error(error) => {
            return Err(Error::LoadFailed(
                error.message.unwrap_or(error.cause),
            ))
        }
    })
}
