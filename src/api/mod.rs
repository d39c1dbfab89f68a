pub mod file;
pub mod mock;
pub mod spotify;
pub mod tidal;

use crate::config::Config;
use crate::error::{AdapterError, SyncError};
use crate::models::{LikedSet, Playlist, PlatformKind, Track};
use crate::throttle::{Throttle, ThrottledProvider, TokenBucket, Unlimited};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::sync::Arc;
use std::time::Duration;

/// Provider trait: the capability surface the sync orchestrator drives.
/// Implementations: spotify::SpotifyProvider, tidal::TidalProvider,
/// file::FileProvider (read-only export archives) and mock::MockProvider.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Return the provider's name (for logging, reports and error context)
    fn name(&self) -> &str;

    /// Catalog country (ISO 3166 alpha-2) when the platform is region-bound.
    fn country_code(&self) -> Option<&str> {
        None
    }

    /// List the user's playlists, restricted to `owner` when given.
    async fn list_playlists(&self, owner: Option<&str>) -> Result<Vec<Playlist>, AdapterError>;

    /// Return the user's playlist called `name` unchanged, or create it empty.
    async fn get_or_create_playlist(&self, name: &str) -> Result<Playlist, AdapterError>;

    async fn list_tracks(&self, playlist: &Playlist) -> Result<Vec<Track>, AdapterError>;

    /// Append tracks. Must skip tracks whose native id is already in the playlist
    /// and must never reorder or remove existing entries.
    async fn add_tracks(&self, playlist: &Playlist, tracks: &[Track]) -> Result<(), AdapterError>;

    /// Candidate matches for `track`, in an order that is stable across identical calls.
    async fn search(&self, track: &Track) -> Result<Vec<Track>, AdapterError>;

    async fn get_likes(&self) -> Result<LikedSet, AdapterError> {
        Err(AdapterError::CapabilityAbsent("likes"))
    }

    async fn add_like(&self, _track: &Track) -> Result<(), AdapterError> {
        Err(AdapterError::CapabilityAbsent("likes"))
    }
}

/// Map a non-success HTTP status onto the adapter error taxonomy.
pub fn classify_status(status: u16, retry_after: Option<Duration>, detail: String) -> AdapterError {
    match status {
        401 => AdapterError::Unauthorized(detail),
        429 => AdapterError::RateLimited { retry_after },
        404 => AdapterError::NotFound(detail),
        408 | 500..=599 => AdapterError::Transient(detail),
        _ => AdapterError::Invalid(detail),
    }
}

/// `Retry-After` in its delta-seconds form.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Pass successful responses through; turn anything else into an [`AdapterError`].
pub(crate) async fn check_status(resp: reqwest::Response, op: &str) -> Result<reqwest::Response, AdapterError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = parse_retry_after(resp.headers());
    let txt = resp.text().await.unwrap_or_default();
    Err(classify_status(
        status.as_u16(),
        retry_after,
        format!("{} failed: {} => {}", op, status, txt),
    ))
}

/// Send one request through `throttle`: every attempt takes a limiter token
/// and rebuilds the request with `build`. Non-success statuses are mapped by
/// [`check_status`] before the retry policy sees them.
pub(crate) async fn send_throttled<F>(
    throttle: &Throttle,
    platform: &str,
    op: &str,
    build: F,
) -> Result<reqwest::Response, AdapterError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    throttle
        .run(platform, op, || {
            let req = build();
            async move {
                let resp = req.send().await?;
                check_status(resp, op).await
            }
        })
        .await
}

/// Build the adapter for `kind` from configuration. HTTP adapters throttle
/// each request themselves; the file adapter is wrapped in a [`ThrottledProvider`].
pub fn build_provider(kind: PlatformKind, cfg: &Config) -> Result<Arc<dyn Provider>, SyncError> {
    let retry = cfg.retry.to_policy();
    let search_limit = cfg.matching.search_limit;
    match kind {
        PlatformKind::Spotify => {
            let token = cfg.spotify.resolved_token().ok_or_else(|| {
                SyncError::ConfigurationInvalid("missing spotify access_token".into())
            })?;
            let throttle = Throttle::new(
                Arc::new(TokenBucket::per_second(cfg.spotify.requests_per_second)),
                retry,
            );
            let provider = spotify::SpotifyProvider::new(token)
                .with_api_base(&cfg.spotify.api_base)
                .with_search_limit(search_limit)
                .with_country_code(cfg.spotify.country_code.clone())
                .with_throttle(throttle);
            Ok(Arc::new(provider))
        }
        PlatformKind::Tidal => {
            let token = cfg.tidal.resolved_token().ok_or_else(|| {
                SyncError::ConfigurationInvalid("missing tidal access_token".into())
            })?;
            let user_id = cfg.tidal.resolved_user_id().ok_or_else(|| {
                SyncError::ConfigurationInvalid("missing tidal user_id".into())
            })?;
            let throttle = Throttle::new(
                Arc::new(TokenBucket::per_second(cfg.tidal.requests_per_second)),
                retry,
            );
            let provider = tidal::TidalProvider::new(token, user_id, cfg.tidal.country_code.clone())
                .with_api_base(&cfg.tidal.api_base)
                .with_search_limit(search_limit)
                .with_throttle(throttle);
            Ok(Arc::new(provider))
        }
        PlatformKind::File => {
            let path = cfg.file.path.as_ref().ok_or_else(|| {
                SyncError::ConfigurationInvalid("missing [file] path".into())
            })?;
            let provider = file::FileProvider::open(path)?;
            Ok(Arc::new(ThrottledProvider::new(Arc::new(provider), Arc::new(Unlimited), retry)))
        }
    }
}
