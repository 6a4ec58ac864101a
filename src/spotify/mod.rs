//! Spotify Web API collaborator.
//!
//! Thin read-only wrapper: playlist metadata, playlist items (paging
//! handled internally), and full episode detail. Auth is either a direct
//! access token or a refresh-token exchange.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const API_BASE_URL: &str = "https://api.spotify.com/v1";
const ACCOUNTS_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
// Spotify's maximum page size for playlist items
const PAGE_LIMIT: usize = 50;

/// What the sync pass needs from the playlist platform.
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn playlist(&self, playlist_id: &str) -> Result<PlaylistInfo, String>;

    /// Every item of the playlist, all pages walked.
    async fn playlist_items(&self, playlist_id: &str) -> Result<Vec<PlaylistItem>, String>;

    async fn episode(&self, episode_id: &str) -> Result<EpisodeDetail, String>;
}

pub struct SpotifyClient {
    client: reqwest::Client,
    token: String,
}

impl SpotifyClient {
    pub fn new(access_token: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            token: access_token,
        }
    }

    /// Exchange a refresh token for a fresh access token.
    pub async fn from_refresh_token(
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let response = client
            .post(ACCOUNTS_TOKEN_URL)
            .basic_auth(client_id, Some(client_secret))
            .form(&params)
            .send()
            .await
            .map_err(|e| format!("Failed to call Spotify token endpoint: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Token refresh failed with {}: {}", status, body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse token response: {}", e))?;

        log::info!("Spotify access token refreshed");

        Ok(Self {
            client,
            token: token.access_token,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, String> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| format!("Request to {} failed: {}", url, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Spotify returned {} for {}: {}", status, url, body));
        }

        response
            .json()
            .await
            .map_err(|e| format!("Failed to parse response from {}: {}", url, e))
    }
}

#[async_trait]
impl PlaylistSource for SpotifyClient {
    async fn playlist(&self, playlist_id: &str) -> Result<PlaylistInfo, String> {
        let url = format!("{}/playlists/{}?fields=name", API_BASE_URL, playlist_id);
        self.get_json(&url).await
    }

    async fn playlist_items(&self, playlist_id: &str) -> Result<Vec<PlaylistItem>, String> {
        let mut items = Vec::new();
        let mut url = Some(format!(
            "{}/playlists/{}/tracks?limit={}&additional_types=track,episode",
            API_BASE_URL, playlist_id, PAGE_LIMIT
        ));

        while let Some(page_url) = url {
            let page: ItemsPage = self.get_json(&page_url).await?;
            items.extend(page.items);
            url = page.next;
        }

        Ok(items)
    }

    async fn episode(&self, episode_id: &str) -> Result<EpisodeDetail, String> {
        let url = format!("{}/episodes/{}", API_BASE_URL, episode_id);
        self.get_json(&url).await
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistInfo {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ItemsPage {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistItem {
    pub added_at: Option<String>,
    pub track: Option<PlaylistTrack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistTrack {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl PlaylistItem {
    /// The episode id, if this playlist item is an episode at all.
    /// Playlists mix tracks and episodes; tracks are skipped.
    pub fn episode_id(&self) -> Option<&str> {
        self.track
            .as_ref()
            .filter(|t| t.kind == "episode")
            .and_then(|t| t.id.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EpisodeDetail {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub html_description: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    #[serde(default)]
    pub show: ShowInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalUrls {
    pub spotify: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShowInfo {
    pub name: Option<String>,
}

impl EpisodeDetail {
    /// Plain description when present, HTML variant as fallback.
    pub fn best_description(&self) -> &str {
        if !self.description.is_empty() {
            &self.description
        } else {
            &self.html_description
        }
    }

    /// Duration in minutes, rounded to two decimals.
    pub fn duration_minutes(&self) -> f64 {
        (self.duration_ms as f64 / 60_000.0 * 100.0).round() / 100.0
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}
