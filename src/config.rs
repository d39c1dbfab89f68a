use crate::error::SyncError;
use crate::matcher::{self, MatchOptions};
use crate::models::PlatformKind;
use crate::throttle::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: PlatformKind,
    pub destination: PlatformKind,

    /// Only sync source playlists owned by this user id.
    #[serde(default)]
    pub owner: Option<String>,
    /// Refuse to write into same-named destination playlists owned by anyone else.
    #[serde(default)]
    pub destination_owner: Option<String>,

    #[serde(default = "default_skip_playlists")]
    pub skip_playlists: Vec<String>,

    #[serde(default)]
    pub sync_likes: bool,
    /// Also like every track written to a destination playlist.
    #[serde(default)]
    pub like_all: bool,
    /// Sync between catalogs of different countries. Region-locked catalogs
    /// tend to produce wrong matches, so this is refused unless set.
    #[serde(default)]
    pub diff_country: bool,

    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_debug_dir")]
    pub debug_dir: PathBuf,
    /// Daily rolling log files go here when set; stdout otherwise only.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_max_batch")]
    pub max_batch_size: usize,

    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub spotify: SpotifyConfig,
    #[serde(default)]
    pub tidal: TidalConfig,
    #[serde(default)]
    pub file: FileConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_duration_tolerance")]
    pub duration_tolerance_ms: u64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_title_weight")]
    pub title_weight: f64,
    #[serde(default = "default_album_weight")]
    pub album_weight: f64,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpotifyConfig {
    /// Falls back to SPOTIFY_ACCESS_TOKEN when empty.
    #[serde(default)]
    pub access_token: String,
    /// Account market, e.g. "US". Restricts search results when set.
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default = "default_spotify_api_base")]
    pub api_base: String,
    #[serde(default = "default_spotify_rps")]
    pub requests_per_second: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TidalConfig {
    /// Falls back to TIDAL_ACCESS_TOKEN when empty.
    #[serde(default)]
    pub access_token: String,
    /// Falls back to TIDAL_USER_ID when empty.
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "default_country_code")]
    pub country_code: String,
    #[serde(default = "default_tidal_api_base")]
    pub api_base: String,
    #[serde(default = "default_tidal_rps")]
    pub requests_per_second: u32,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// Generated by the platforms themselves; syncing them only creates noise.
fn default_skip_playlists() -> Vec<String> {
    vec![
        "Liked Songs",
        "Discover Weekly",
        "Release Radar",
        "Your Likes",
        "My Supermix",
        "Daily Discovery",
        "My Mix 1",
        "My Mix 2",
        "My Mix 3",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_debug_dir() -> PathBuf { "debug".into() }
fn default_max_batch() -> usize { 100 }
fn default_duration_tolerance() -> u64 { matcher::DEFAULT_DURATION_TOLERANCE_MS }
fn default_threshold() -> f64 { matcher::DEFAULT_THRESHOLD }
fn default_title_weight() -> f64 { matcher::DEFAULT_TITLE_WEIGHT }
fn default_album_weight() -> f64 { matcher::DEFAULT_ALBUM_WEIGHT }
fn default_search_limit() -> usize { 10 }
fn default_max_attempts() -> u32 { 4 }
fn default_base_delay() -> u64 { 500 }
fn default_max_delay() -> u64 { 30_000 }
fn default_jitter() -> u64 { 250 }
fn default_spotify_api_base() -> String { "https://api.spotify.com/v1".into() }
fn default_spotify_rps() -> u32 { 10 }
fn default_tidal_api_base() -> String { "https://api.tidal.com/v1".into() }
fn default_tidal_rps() -> u32 { 4 }
fn default_country_code() -> String { "US".into() }

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            duration_tolerance_ms: default_duration_tolerance(),
            threshold: default_threshold(),
            title_weight: default_title_weight(),
            album_weight: default_album_weight(),
            search_limit: default_search_limit(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_ms: default_jitter(),
        }
    }
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            country_code: None,
            api_base: default_spotify_api_base(),
            requests_per_second: default_spotify_rps(),
        }
    }
}

impl Default for TidalConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            user_id: String::new(),
            country_code: default_country_code(),
            api_base: default_tidal_api_base(),
            requests_per_second: default_tidal_rps(),
        }
    }
}

fn non_empty_or_env(value: &str, var: &str) -> Option<String> {
    let v = value.trim();
    if !v.is_empty() {
        return Some(v.to_string());
    }
    std::env::var(var).ok().filter(|s| !s.trim().is_empty())
}

impl MatchingConfig {
    pub fn to_options(&self) -> MatchOptions {
        MatchOptions {
            duration_tolerance_ms: self.duration_tolerance_ms,
            threshold: self.threshold,
            title_weight: self.title_weight,
            album_weight: self.album_weight,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

impl SpotifyConfig {
    pub fn resolved_token(&self) -> Option<String> {
        non_empty_or_env(&self.access_token, "SPOTIFY_ACCESS_TOKEN")
    }
}

impl TidalConfig {
    pub fn resolved_token(&self) -> Option<String> {
        non_empty_or_env(&self.access_token, "TIDAL_ACCESS_TOKEN")
    }

    pub fn resolved_user_id(&self) -> Option<String> {
        non_empty_or_env(&self.user_id, "TIDAL_USER_ID")
    }
}

impl Config {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// `<config dir>/music-catalog-sync/config.toml`, e.g. ~/.config on Linux.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("music-catalog-sync").join("config.toml"))
    }

    /// Catalog country for `kind`, when it has one configured.
    pub fn country_code(&self, kind: PlatformKind) -> Option<&str> {
        let code = match kind {
            PlatformKind::Spotify => self.spotify.country_code.as_deref(),
            PlatformKind::Tidal => Some(self.tidal.country_code.as_str()),
            PlatformKind::File => None,
        };
        code.map(str::trim).filter(|c| !c.is_empty())
    }

    /// Debug dumps directory, only when debug output is enabled.
    pub fn debug_output(&self) -> Option<PathBuf> {
        self.debug.then(|| self.debug_dir.clone())
    }

    /// Reject settings a run cannot start with. Credentials are checked only
    /// for the two platforms this run touches.
    pub fn validate(&self) -> Result<(), SyncError> {
        let invalid = |msg: String| Err(SyncError::ConfigurationInvalid(msg));
        if self.source == self.destination {
            return invalid(format!(
                "source and destination must be different platforms (both are {})",
                self.source
            ));
        }
        if self.destination == PlatformKind::File {
            return invalid("the file platform can only be used as a source; use `export` to write archives".into());
        }
        if self.max_batch_size == 0 {
            return invalid("max_batch_size must be at least 1".into());
        }
        let m = &self.matching;
        if !(0.0..=1.0).contains(&m.threshold) {
            return invalid(format!("matching.threshold must be within [0, 1], got {}", m.threshold));
        }
        if !(m.title_weight > 0.0 && m.title_weight.is_finite())
            || !(m.album_weight >= 0.0 && m.album_weight.is_finite())
        {
            return invalid("matching.title_weight must be positive and album_weight non-negative".into());
        }
        if m.search_limit == 0 {
            return invalid("matching.search_limit must be at least 1".into());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".into());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.base_delay_ms must not exceed retry.max_delay_ms".into());
        }
        if !self.diff_country {
            if let (Some(src), Some(dst)) = (self.country_code(self.source), self.country_code(self.destination)) {
                if !src.eq_ignore_ascii_case(dst) {
                    return invalid(format!(
                        "{} and {} are configured for different countries ({} vs {}); set diff_country = true to sync anyway",
                        self.source, self.destination, src, dst
                    ));
                }
            }
        }
        for kind in [self.source, self.destination] {
            self.check_credentials(kind)?;
        }
        Ok(())
    }

    /// Credentials (or archive path) needed to talk to `kind`.
    pub fn check_credentials(&self, kind: PlatformKind) -> Result<(), SyncError> {
        let missing = |what: &str| {
            Err(SyncError::ConfigurationInvalid(format!("{} is required for {}", what, kind)))
        };
        match kind {
            PlatformKind::Spotify => {
                if self.spotify.resolved_token().is_none() {
                    return missing("spotify.access_token (or SPOTIFY_ACCESS_TOKEN)");
                }
            }
            PlatformKind::Tidal => {
                if self.tidal.resolved_token().is_none() {
                    return missing("tidal.access_token (or TIDAL_ACCESS_TOKEN)");
                }
                if self.tidal.resolved_user_id().is_none() {
                    return missing("tidal.user_id (or TIDAL_USER_ID)");
                }
            }
            PlatformKind::File => {
                if self.file.path.is_none() {
                    return missing("file.path");
                }
            }
        }
        Ok(())
    }
}
