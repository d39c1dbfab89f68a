//! JSON export archives: written by `export`, read back by the file adapter on `import`.

use crate::api::Provider;
use crate::error::{AdapterError, Location, SyncError};
use crate::models::{Playlist, Track};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

pub const ARCHIVE_VERSION: u32 = 1;

fn default_version() -> u32 {
    ARCHIVE_VERSION
}

/// A snapshot of one user's playlists (and optionally likes) on one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistArchive {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub exported_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: Option<String>,
    pub playlists: Vec<Playlist>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<Vec<Track>>,
}

/// On disk an archive is either the full object or a bare playlist array.
#[derive(Deserialize)]
#[serde(untagged)]
enum ArchiveRepr {
    Full(PlaylistArchive),
    Bare(Vec<Playlist>),
}

impl From<ArchiveRepr> for PlaylistArchive {
    fn from(r: ArchiveRepr) -> Self {
        match r {
            ArchiveRepr::Full(a) => a,
            ArchiveRepr::Bare(playlists) => PlaylistArchive {
                version: ARCHIVE_VERSION,
                exported_at: None,
                source: None,
                playlists,
                likes: None,
            },
        }
    }
}

impl PlaylistArchive {
    pub fn new(source: &str, playlists: Vec<Playlist>, likes: Option<Vec<Track>>) -> Self {
        Self {
            version: ARCHIVE_VERSION,
            exported_at: Some(Utc::now()),
            source: Some(source.to_string()),
            playlists,
            likes,
        }
    }

    pub fn from_json(s: &str) -> Result<Self, SyncError> {
        let repr: ArchiveRepr = serde_json::from_str(s)?;
        Ok(repr.into())
    }

    pub fn read(path: &Path) -> Result<Self, SyncError> {
        let reader = BufReader::new(File::open(path)?);
        let repr: ArchiveRepr = serde_json::from_reader(reader)?;
        Ok(repr.into())
    }

    pub fn write(&self, path: &Path, minify: bool) -> Result<(), SyncError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut w = BufWriter::new(File::create(path)?);
        if minify {
            serde_json::to_writer(&mut w, self)?;
        } else {
            serde_json::to_writer_pretty(&mut w, self)?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn track_count(&self) -> usize {
        self.playlists.iter().map(|p| p.tracks.len()).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub owner: Option<String>,
    pub skip_playlists: Vec<String>,
    pub include_likes: bool,
    pub minify: bool,
}

/// Fetch every playlist (with tracks) from `source` and write them to `path`.
pub async fn export_playlists(
    source: &dyn Provider,
    path: &Path,
    options: &ExportOptions,
) -> Result<PlaylistArchive, SyncError> {
    let platform = source.name().to_string();
    info!("Retrieving playlists from {}...", platform);
    let skip: HashSet<&str> = options.skip_playlists.iter().map(String::as_str).collect();
    let listed = source
        .list_playlists(options.owner.as_deref())
        .await
        .map_err(|e| SyncError::from_adapter(Location::platform(&platform), e))?;

    let mut playlists = Vec::with_capacity(listed.len());
    for mut pl in listed {
        if skip.contains(pl.name.as_str()) {
            info!("Skipping playlist {}", pl.name);
            continue;
        }
        pl.tracks = source
            .list_tracks(&pl)
            .await
            .map_err(|e| SyncError::from_adapter(Location::platform(&platform).playlist(&pl.name), e))?;
        playlists.push(pl);
    }

    let likes = if options.include_likes {
        match source.get_likes().await {
            Ok(set) => Some(set.into_tracks()),
            Err(AdapterError::CapabilityAbsent(_)) => {
                warn!("{} does not expose likes, exporting playlists only", platform);
                None
            }
            Err(e) => return Err(SyncError::from_adapter(Location::platform(&platform), e)),
        }
    } else {
        None
    };

    let archive = PlaylistArchive::new(&platform, playlists, likes);
    archive.write(path, options.minify)?;
    info!(
        "Exported {} playlists ({} tracks) to {}",
        archive.playlists.len(),
        archive.track_count(),
        path.display()
    );
    Ok(archive)
}
