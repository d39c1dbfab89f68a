use super::{send_throttled, Provider};
use crate::error::AdapterError;
use crate::models::{LikedSet, Playlist, Track};
use crate::throttle::Throttle;
use crate::util::extend_unique;
use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{AUTHORIZATION, ETAG, IF_NONE_MATCH};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashSet;

const PAGE_LIMIT: usize = 100;
// Larger favourite batches are answered with 500s.
const WRITE_CHUNK: usize = 100;

/// Tidal provider over the v1 REST API. Uses a base URL from `TIDAL_API_BASE`
/// (or `with_api_base`) for easier testing with mockito. Each request,
/// ETag lookups included, takes its own throttle token.
pub struct TidalProvider {
    client: Client,
    access_token: String,
    user_id: String,
    country_code: String,
    api_base: String,
    search_limit: usize,
    throttle: Throttle,
}

fn id_string(v: &Value) -> Option<String> {
    v.as_str()
        .map(|s| s.to_string())
        .or_else(|| v.as_i64().map(|n| n.to_string()))
}

impl TidalProvider {
    pub fn new(access_token: String, user_id: String, country_code: String) -> Self {
        Self {
            client: Client::new(),
            access_token,
            user_id,
            country_code: if country_code.is_empty() {
                "US".into()
            } else {
                country_code
            },
            api_base: std::env::var("TIDAL_API_BASE")
                .unwrap_or_else(|_| "https://api.tidal.com/v1".into()),
            search_limit: 10,
            throttle: Throttle::unlimited(),
        }
    }

    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
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

    async fn get_json(&self, url: &str, query: &[(&str, String)], op: &str) -> Result<Value, AdapterError> {
        let resp = send_throttled(&self.throttle, "tidal", op, || {
            self.client
                .get(url)
                .header(AUTHORIZATION, self.bearer())
                .query(&[("countryCode", self.country_code.as_str())])
                .query(query)
        })
        .await?;
        Ok(resp.json().await?)
    }

    /// Offset pagination: keep requesting until `totalNumberOfItems` is reached
    /// or a page comes back empty.
    async fn paged_items(&self, url: &str, op: &str) -> Result<Vec<Value>, AdapterError> {
        let mut out = Vec::new();
        let mut offset = 0usize;
        loop {
            let j = self
                .get_json(
                    url,
                    &[("limit", PAGE_LIMIT.to_string()), ("offset", offset.to_string())],
                    op,
                )
                .await?;
            let items = j["items"].as_array().cloned().unwrap_or_default();
            if items.is_empty() {
                break;
            }
            offset += items.len();
            out.extend(items);
            let total = j["totalNumberOfItems"].as_u64().unwrap_or(0) as usize;
            if offset >= total {
                break;
            }
        }
        Ok(out)
    }

    /// Convert a Tidal track object; durations arrive in seconds.
    pub fn parse_track(v: &Value) -> Option<Track> {
        let id = id_string(&v["id"])?;
        let title = v["title"].as_str().unwrap_or("");
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
        t.album = v["album"]["title"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        t.duration_ms = v["duration"].as_u64().map(|secs| secs * 1000);
        t.isrc = v["isrc"].as_str().map(|s| s.to_string());
        Some(t)
    }

    fn parse_playlist(v: &Value) -> Option<Playlist> {
        let id = v["uuid"].as_str()?;
        let mut p = Playlist::new(id, v["title"].as_str().unwrap_or(""));
        p.owner = id_string(&v["creator"]["id"]);
        Some(p)
    }

    /// Playlist items wrap the track in `item`; videos are skipped.
    fn parse_items(items: &[Value]) -> Vec<Track> {
        items
            .iter()
            .filter(|it| it["type"].as_str().map_or(true, |t| t == "track"))
            .filter_map(|it| Self::parse_track(&it["item"]))
            .collect()
    }

    async fn playlist_etag(&self, playlist: &Playlist) -> Result<String, AdapterError> {
        let url = format!("{}/playlists/{}", self.api_base, playlist.id);
        let resp = send_throttled(&self.throttle, "tidal", "fetch playlist etag", || {
            self.client
                .get(&url)
                .header(AUTHORIZATION, self.bearer())
                .query(&[("countryCode", self.country_code.as_str())])
        })
        .await?;
        resp.headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| AdapterError::Invalid("no ETag in Tidal playlist response".into()))
    }

    async fn post_form(&self, url: &str, form: &[(&str, String)], etag: Option<&str>, op: &str) -> Result<(), AdapterError> {
        send_throttled(&self.throttle, "tidal", op, || {
            let req = self
                .client
                .post(url)
                .header(AUTHORIZATION, self.bearer())
                .query(&[("countryCode", self.country_code.as_str())])
                .form(form);
            match etag {
                Some(tag) => req.header(IF_NONE_MATCH, tag),
                None => req,
            }
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Provider for TidalProvider {
    fn name(&self) -> &str {
        "tidal"
    }

    fn country_code(&self) -> Option<&str> {
        Some(&self.country_code)
    }

    async fn list_playlists(&self, owner: Option<&str>) -> Result<Vec<Playlist>, AdapterError> {
        let url = format!("{}/users/{}/playlists", self.api_base, self.user_id);
        let items = self.paged_items(&url, "list playlists").await?;
        // The endpoint is known to repeat playlists across pages.
        let mut seen = HashSet::new();
        Ok(items
            .iter()
            .filter_map(Self::parse_playlist)
            .filter(|p| seen.insert(p.id.clone()))
            .filter(|p| owner.map_or(true, |o| p.is_owned_by(o)))
            .collect())
    }

    async fn get_or_create_playlist(&self, name: &str) -> Result<Playlist, AdapterError> {
        if let Some(existing) = self
            .list_playlists(Some(&self.user_id))
            .await?
            .into_iter()
            .find(|p| p.name == name)
        {
            return Ok(existing);
        }
        let url = format!("{}/users/{}/playlists", self.api_base, self.user_id);
        let resp = send_throttled(&self.throttle, "tidal", "create playlist", || {
            self.client
                .post(&url)
                .header(AUTHORIZATION, self.bearer())
                .query(&[("countryCode", self.country_code.as_str())])
                .form(&[("title", name), ("description", "")])
        })
        .await?;
        let j: Value = resp.json().await?;
        let mut created = Self::parse_playlist(&j)
            .ok_or_else(|| AdapterError::Invalid("create playlist response has no uuid".into()))?;
        created.name = name.to_string();
        if created.owner.is_none() {
            created.owner = Some(self.user_id.clone());
        }
        info!("Created Tidal playlist '{}' ({})", name, created.id);
        Ok(created)
    }

    async fn list_tracks(&self, playlist: &Playlist) -> Result<Vec<Track>, AdapterError> {
        let url = format!("{}/playlists/{}/items", self.api_base, playlist.id);
        let items = self.paged_items(&url, "list playlist items").await?;
        Ok(Self::parse_items(&items))
    }

    async fn add_tracks(&self, playlist: &Playlist, tracks: &[Track]) -> Result<(), AdapterError> {
        let mut seen: HashSet<String> = self
            .list_tracks(playlist)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        let ids: Vec<&str> = tracks
            .iter()
            .filter(|t| seen.insert(t.id.clone()))
            .map(|t| t.id.as_str())
            .collect();
        if ids.is_empty() {
            debug!("Nothing new to add to Tidal playlist {}", playlist.id);
            return Ok(());
        }
        let url = format!("{}/playlists/{}/items", self.api_base, playlist.id);
        for chunk in ids.chunks(WRITE_CHUNK) {
            // Each write bumps the playlist version, so fetch a fresh ETag per chunk.
            let etag = self.playlist_etag(playlist).await?;
            self.post_form(
                &url,
                &[
                    ("trackIds", chunk.join(",")),
                    ("onDuplicate", "SKIP".to_string()),
                    ("onArtifactNotFound", "SKIP".to_string()),
                ],
                Some(&etag),
                "add playlist items",
            )
            .await?;
            debug!("Added {} tracks to Tidal playlist {}", chunk.len(), playlist.id);
        }
        Ok(())
    }

    async fn search(&self, track: &Track) -> Result<Vec<Track>, AdapterError> {
        let mut candidates = Vec::new();
        if let Some(isrc) = track.normalized_isrc() {
            let url = format!("{}/tracks", self.api_base);
            let j = self.get_json(&url, &[("isrc", isrc.clone())], "isrc lookup").await?;
            candidates = j["items"]
                .as_array()
                .map(|a| a.iter().filter_map(Self::parse_track).collect())
                .unwrap_or_default();
            if candidates
                .iter()
                .any(|c| c.normalized_isrc().as_deref() == Some(isrc.as_str()))
            {
                return Ok(candidates);
            }
        }
        let url = format!("{}/search/tracks", self.api_base);
        let j = self
            .get_json(
                &url,
                &[
                    ("query", track.search_text()),
                    ("limit", self.search_limit.to_string()),
                ],
                "search",
            )
            .await?;
        let found: Vec<Track> = j["items"]
            .as_array()
            .map(|a| a.iter().filter_map(Self::parse_track).collect())
            .unwrap_or_default();
        extend_unique(&mut candidates, found);
        Ok(candidates)
    }

    async fn get_likes(&self) -> Result<LikedSet, AdapterError> {
        let url = format!("{}/users/{}/favorites/tracks", self.api_base, self.user_id);
        let items = self.paged_items(&url, "list favorite tracks").await?;
        Ok(LikedSet::new(Self::parse_items(&items)))
    }

    async fn add_like(&self, track: &Track) -> Result<(), AdapterError> {
        let url = format!("{}/users/{}/favorites/tracks", self.api_base, self.user_id);
        self.post_form(
            &url,
            &[
                ("trackIds", track.id.clone()),
                ("onArtifactNotFound", "SKIP".to_string()),
            ],
            None,
            "add favorite track",
        )
        .await
    }
}
