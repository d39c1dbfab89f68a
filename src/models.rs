use serde::{Deserialize, Serialize};
use std::fmt;

/// Catalogs the sync engine knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Spotify,
    Tidal,
    /// A JSON export archive, used as a synthetic source platform.
    File,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Spotify => "spotify",
            PlatformKind::Tidal => "tidal",
            PlatformKind::File => "file",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A track as fetched from one catalog. `id` is the platform-native id.
///
/// `artists` is carried for display and export only; matching never looks at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub artists: Vec<String>,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            album: None,
            duration_ms: None,
            isrc: None,
            artists: Vec::new(),
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_isrc(mut self, isrc: impl Into<String>) -> Self {
        self.isrc = Some(isrc.into());
        self
    }

    pub fn with_artists<I, S>(mut self, artists: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artists = artists.into_iter().map(Into::into).collect();
        self
    }

    /// ISRC in canonical form (trimmed, upper-case), if present and non-empty.
    pub fn normalized_isrc(&self) -> Option<String> {
        self.isrc
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_uppercase())
    }

    /// Free-text query used by adapters for metadata search: title, then album when known.
    pub fn search_text(&self) -> String {
        match self.album.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
            Some(album) => format!("{} {}", self.title.trim(), album),
            None => self.title.trim().to_string(),
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title)?;
        if !self.artists.is_empty() {
            write!(f, " - {}", self.artists.join(", "))?;
        }
        if let Some(album) = &self.album {
            write!(f, " [{}]", album)?;
        }
        Ok(())
    }
}

/// An ordered playlist on one platform. During sync it only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    /// Platform-native playlist id.
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Playlist {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner: None,
            tracks: Vec::new(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_tracks(mut self, tracks: Vec<Track>) -> Self {
        self.tracks = tracks;
        self
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner.as_deref() == Some(owner)
    }
}

/// Liked tracks for one user on one platform. Membership only; order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LikedSet {
    tracks: Vec<Track>,
}

impl LikedSet {
    /// Build a set, keeping the first occurrence of each native id.
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks: crate::util::dedup_by_id(tracks),
        }
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.tracks.iter().any(|t| t.id == id)
    }

    pub fn insert(&mut self, track: Track) -> bool {
        if self.contains_id(&track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn into_tracks(self) -> Vec<Track> {
        self.tracks
    }
}
