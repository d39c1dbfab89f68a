use super::{send_throttled, Provider};
use crate::error::AdapterError;
use crate::models::{LikedSet, Playlist, Track};
use crate::throttle::Throttle;
use crate::util::extend_unique;
use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::env;

const ADD_CHUNK: usize = 100;

/// Spotify provider backed by the Spotify Web API.
/// The access token is supplied by the caller; the API base may be
/// overridden with SPOTIFY_API_BASE or `with_api_base` (useful for tests).
/// Every request goes through the provider's [`Throttle`], which is
/// unlimited with a single attempt until `with_throttle` replaces it.
pub struct SpotifyProvider {
    client: Client,
    access_token: String,
    api_base: String,
    search_limit: usize,
    market: Option<String>,
    throttle: Throttle,
    user_id: tokio::sync::Mutex<Option<String>>,
}

impl SpotifyProvider {
    pub fn new(access_token: String) -> Self {
        Self {
            client: Client::new(),
            access_token,
            api_base: env::var("SPOTIFY_API_BASE")
                .unwrap_or_else(|_| "https://api.spotify.com/v1".into()),
            search_limit: 10,
            market: None,
            throttle: Throttle::unlimited(),
            user_id: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    /// Catalog market; search results are restricted to it when set.
    pub fn with_country_code(mut self, market: Option<String>) -> Self {
        self.market = market
            .map(|m| m.trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty());
        self
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        if !api_base.is_empty() {
            self.api_base = api_base.trim_end_matches('/').to_string();
        }
        self
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit.max(1);
        self
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    async fn get_json(&self, url: &str, op: &str) -> Result<Value, AdapterError> {
        let resp = send_throttled(&self.throttle, "spotify", op, || {
            self.client
                .get(url)
                .header(AUTHORIZATION, self.bearer())
                .header(ACCEPT, "application/json")
        })
        .await?;
        Ok(resp.json().await?)
    }

    /// Follow `next` links and collect every `items` entry.
    async fn paged_items(&self, first: String, op: &str) -> Result<Vec<Value>, AdapterError> {
        let mut out = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next {
            let j = self.get_json(&url, op).await?;
            if let Some(items) = j["items"].as_array() {
                out.extend(items.iter().cloned());
            }
            next = j["next"].as_str().map(|s| s.to_string());
        }
        Ok(out)
    }

    async fn get_user_id(&self) -> Result<String, AdapterError> {
        let mut g = self.user_id.lock().await;
        if let Some(u) = g.as_ref() {
            return Ok(u.clone());
        }
        let url = format!("{}/me", self.api_base);
        let j = self.get_json(&url, "fetch /me").await?;
        let id = j["id"]
            .as_str()
            .ok_or_else(|| AdapterError::Invalid("/me response has no id".into()))?
            .to_string();
        *g = Some(id.clone());
        Ok(id)
    }

    /// Convert a Spotify track object. Local files have no id and are dropped.
    pub fn parse_track(v: &Value) -> Option<Track> {
        let id = v["id"].as_str()?;
        let title = v["name"].as_str().unwrap_or("");
        let mut t = Track::new(id, title).with_artists(
            v["artists"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|x| x["name"].as_str().map(|s| s.to_string()))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default(),
        );
        t.album = v["album"]["name"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        t.duration_ms = v["duration_ms"].as_u64();
        t.isrc = v["external_ids"]["isrc"].as_str().map(|s| s.to_string());
        Some(t)
    }

    fn parse_playlist(v: &Value) -> Option<Playlist> {
        let id = v["id"].as_str()?;
        let name = v["name"].as_str().unwrap_or("");
        let mut p = Playlist::new(id, name);
        p.owner = v["owner"]["id"].as_str().map(|s| s.to_string());
        Some(p)
    }

    async fn search_query(&self, q: &str) -> Result<Vec<Track>, AdapterError> {
        let mut url = format!(
            "{}/search?q={}&type=track&limit={}",
            self.api_base,
            urlencoding::encode(q),
            self.search_limit
        );
        if let Some(market) = &self.market {
            url.push_str(&format!("&market={}", market));
        }
        let j = self.get_json(&url, "search").await?;
        Ok(j["tracks"]["items"]
            .as_array()
            .map(|a| a.iter().filter_map(Self::parse_track).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Provider for SpotifyProvider {
    fn name(&self) -> &str {
        "spotify"
    }

    fn country_code(&self) -> Option<&str> {
        self.market.as_deref()
    }

    async fn list_playlists(&self, owner: Option<&str>) -> Result<Vec<Playlist>, AdapterError> {
        let url = format!("{}/me/playlists?limit=50", self.api_base);
        let items = self.paged_items(url, "list playlists").await?;
        Ok(items
            .iter()
            .filter_map(Self::parse_playlist)
            .filter(|p| owner.map_or(true, |o| p.is_owned_by(o)))
            .collect())
    }

    async fn get_or_create_playlist(&self, name: &str) -> Result<Playlist, AdapterError> {
        let user_id = self.get_user_id().await?;
        if let Some(existing) = self
            .list_playlists(Some(&user_id))
            .await?
            .into_iter()
            .find(|p| p.name == name)
        {
            return Ok(existing);
        }
        let url = format!(
            "{}/users/{}/playlists",
            self.api_base,
            url::form_urlencoded::byte_serialize(user_id.as_bytes()).collect::<String>()
        );
        let body = json!({
            "name": name,
            "description": "",
            "public": false
        });
        let resp = send_throttled(&self.throttle, "spotify", "create playlist", || {
            self.client
                .post(&url)
                .header(AUTHORIZATION, self.bearer())
                .header(CONTENT_TYPE, "application/json")
                .json(&body)
        })
        .await?;
        let j: Value = resp.json().await?;
        let id = j["id"]
            .as_str()
            .ok_or_else(|| AdapterError::Invalid("create playlist response has no id".into()))?;
        info!("Created Spotify playlist '{}' ({})", name, id);
        Ok(Playlist::new(id, name).with_owner(user_id))
    }

    async fn list_tracks(&self, playlist: &Playlist) -> Result<Vec<Track>, AdapterError> {
        let url = format!("{}/playlists/{}/tracks?limit=100", self.api_base, playlist.id);
        let items = self.paged_items(url, "list playlist tracks").await?;
        Ok(items
            .iter()
            .filter_map(|it| Self::parse_track(&it["track"]))
            .collect())
    }

    async fn add_tracks(&self, playlist: &Playlist, tracks: &[Track]) -> Result<(), AdapterError> {
        let mut seen: HashSet<String> = self
            .list_tracks(playlist)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        let uris: Vec<String> = tracks
            .iter()
            .filter(|t| seen.insert(t.id.clone()))
            .map(|t| format!("spotify:track:{}", t.id))
            .collect();
        if uris.is_empty() {
            debug!("Nothing new to add to Spotify playlist {}", playlist.id);
            return Ok(());
        }
        let url = format!("{}/playlists/{}/tracks", self.api_base, playlist.id);
        for chunk in uris.chunks(ADD_CHUNK) {
            send_throttled(&self.throttle, "spotify", "add tracks", || {
                self.client
                    .post(&url)
                    .header(AUTHORIZATION, self.bearer())
                    .json(&json!({ "uris": chunk }))
            })
            .await?;
            debug!("Added {} tracks to Spotify playlist {}", chunk.len(), playlist.id);
        }
        Ok(())
    }

    async fn search(&self, track: &Track) -> Result<Vec<Track>, AdapterError> {
        let mut candidates = Vec::new();
        if let Some(isrc) = track.normalized_isrc() {
            candidates = self.search_query(&format!("isrc:{}", isrc)).await?;
            if candidates
                .iter()
                .any(|c| c.normalized_isrc().as_deref() == Some(isrc.as_str()))
            {
                return Ok(candidates);
            }
        }
        let mut q = format!("track:{}", track.title.trim());
        if let Some(album) = track.album.as_deref().filter(|a| !a.trim().is_empty()) {
            q.push_str(&format!(" album:{}", album.trim()));
        }
        extend_unique(&mut candidates, self.search_query(&q).await?);
        Ok(candidates)
    }

    async fn get_likes(&self) -> Result<LikedSet, AdapterError> {
        let url = format!("{}/me/tracks?limit=50", self.api_base);
        let items = self.paged_items(url, "list liked tracks").await?;
        Ok(LikedSet::new(
            items
                .iter()
                .filter_map(|it| Self::parse_track(&it["track"]))
                .collect(),
        ))
    }

    async fn add_like(&self, track: &Track) -> Result<(), AdapterError> {
        let url = format!("{}/me/tracks?ids={}", self.api_base, urlencoding::encode(&track.id));
        send_throttled(&self.throttle, "spotify", "like track", || {
            self.client
                .put(&url)
                .header(AUTHORIZATION, self.bearer())
                .header(CONTENT_TYPE, "application/json")
        })
        .await?;
        Ok(())
    }
}
