//! REST surface of an audio node (v4 API).

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tracing::debug;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::protocol::{LoadResult, NodeInfo, PlayerUpdate, ResumeSession};

/// Thin typed wrapper over the node's HTTP API.
///
/// Session-scoped routes take the session id explicitly; the caller
/// ([`NodeClient`](super::NodeClient)) is responsible for knowing whether a
/// session exists at all.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let scheme = if config.secure { "https" } else { "http" };
        let base_url = format!("{}://{}:{}/v4", scheme, config.host, config.port);

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&config.password)
            .unwrap_or_else(|_| HeaderValue::from_static(""));
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Generic authenticated `GET` of any `/v4` route, deserializing the
    /// body. The typed endpoints below are built on top of this.
    pub async fn request<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let path = path.trim_start_matches('/');
        let value = self
            .http
            .get(format!("{}/{}", self.base_url, path))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(value)
    }

    /// `GET /v4/info` - capability report of the node.
    pub async fn fetch_info(&self) -> Result<NodeInfo> {
        self.request("info").await
    }

    /// `GET /v4/loadtracks` - resolve an identifier (URL or `prefix:query`).
    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        debug!(identifier, "loading tracks");
        self.request(&format!(
            "loadtracks?identifier={}",
            urlencoding::encode(identifier)
        ))
        .await
    }

    /// `PATCH /v4/sessions/{sessionId}/players/{guildId}` - partial update.
    ///
    /// With `no_replace` the node keeps an already playing track instead of
    /// replacing it.
    pub async fn update_player(
        &self,
        session_id: &str,
        guild_id: &str,
        update: &PlayerUpdate,
        no_replace: bool,
    ) -> Result<()> {
        self.http
            .patch(format!(
                "{}/sessions/{}/players/{}?noReplace={}",
                self.base_url, session_id, guild_id, no_replace
            ))
            .json(update)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// `DELETE /v4/sessions/{sessionId}/players/{guildId}`.
    pub async fn destroy_player(&self, session_id: &str, guild_id: &str) -> Result<()> {
        self.http
            .delete(format!(
                "{}/sessions/{}/players/{}",
                self.base_url, session_id, guild_id
            ))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// `PATCH /v4/sessions/{sessionId}` - negotiate session resuming.
    pub async fn configure_resuming(&self, session_id: &str, body: &ResumeSession) -> Result<()> {
        self.http
            .patch(format!("{}/sessions/{}", self.base_url, session_id))
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_base_url_respects_secure_flag() {
        let plain = RestClient::new(&NodeConfig::new("lava.example", 2333, "pw")).unwrap();
        assert_eq!(plain.base_url(), "http://lava.example:2333/v4");

        let secure = RestClient::new(&NodeConfig {
            secure: true,
            ..NodeConfig::new("lava.example", 443, "pw")
        })
        .unwrap();
        assert_eq!(secure.base_url(), "https://lava.example:443/v4");
    }

    #[tokio::test]
    async fn test_request_surfaces_transport_errors() {
        // Nothing listens on this port; the transport error comes back as-is.
        let rest = RestClient::new(&NodeConfig::new("127.0.0.1", 1, "pw")).unwrap();
        let result = rest.request::<serde_json::Value>("/info").await;
        assert!(matches!(result, Err(crate::error::Error::Http(_))));
    }
}
