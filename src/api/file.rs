use super::Provider;
use crate::error::{AdapterError, SyncError};
use crate::export::PlaylistArchive;
use crate::models::{LikedSet, Playlist, Track};
use async_trait::async_trait;
use log::info;
use std::path::Path;

/// Read-only source backed by a JSON export archive.
pub struct FileProvider {
    archive: PlaylistArchive,
}

impl FileProvider {
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        let archive = PlaylistArchive::read(path)?;
        info!(
            "Loaded {} playlists from {}",
            archive.playlists.len(),
            path.display()
        );
        Ok(Self::from_archive(archive))
    }

    pub fn from_archive(archive: PlaylistArchive) -> Self {
        Self { archive }
    }

    fn read_only(op: &str) -> AdapterError {
        AdapterError::Invalid(format!("{} is not supported on an export archive", op))
    }
}

#[async_trait]
impl Provider for FileProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn list_playlists(&self, owner: Option<&str>) -> Result<Vec<Playlist>, AdapterError> {
        Ok(self
            .archive
            .playlists
            .iter()
            .filter(|p| owner.map_or(true, |o| p.is_owned_by(o)))
            .cloned()
            .collect())
    }

    async fn get_or_create_playlist(&self, _name: &str) -> Result<Playlist, AdapterError> {
        Err(Self::read_only("creating playlists"))
    }

    /// Archives written without ids are looked up by name.
    async fn list_tracks(&self, playlist: &Playlist) -> Result<Vec<Track>, AdapterError> {
        self.archive
            .playlists
            .iter()
            .find(|p| {
                if playlist.id.is_empty() {
                    p.name == playlist.name
                } else {
                    p.id == playlist.id
                }
            })
            .map(|p| p.tracks.clone())
            .ok_or_else(|| AdapterError::NotFound(format!("playlist {}", playlist.name)))
    }

    async fn add_tracks(&self, _playlist: &Playlist, _tracks: &[Track]) -> Result<(), AdapterError> {
        Err(Self::read_only("adding tracks"))
    }

    async fn search(&self, _track: &Track) -> Result<Vec<Track>, AdapterError> {
        Err(AdapterError::CapabilityAbsent("search"))
    }

    async fn get_likes(&self) -> Result<LikedSet, AdapterError> {
        match &self.archive.likes {
            Some(likes) => Ok(LikedSet::new(likes.clone())),
            None => Err(AdapterError::CapabilityAbsent("likes")),
        }
    }

    async fn add_like(&self, _track: &Track) -> Result<(), AdapterError> {
        Err(Self::read_only("liking tracks"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive() -> PlaylistArchive {
        PlaylistArchive::new(
            "spotify",
            vec![
                Playlist::new("p1", "Roadtrip")
                    .with_owner("alice")
                    .with_tracks(vec![Track::new("t1", "Song A")]),
                Playlist::new("", "Unnamed id")
                    .with_owner("bob")
                    .with_tracks(vec![Track::new("t2", "Song B")]),
            ],
            None,
        )
    }

    #[tokio::test]
    async fn lists_and_filters_by_owner() {
        let p = FileProvider::from_archive(archive());
        assert_eq!(p.list_playlists(None).await.unwrap().len(), 2);
        let mine = p.list_playlists(Some("alice")).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].name, "Roadtrip");
    }

    #[tokio::test]
    async fn tracks_resolve_by_id_or_name() {
        let p = FileProvider::from_archive(archive());
        let t = p.list_tracks(&Playlist::new("p1", "x")).await.unwrap();
        assert_eq!(t[0].id, "t1");
        let t = p.list_tracks(&Playlist::new("", "Unnamed id")).await.unwrap();
        assert_eq!(t[0].id, "t2");
        assert!(matches!(
            p.list_tracks(&Playlist::new("nope", "nope")).await,
            Err(AdapterError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn writes_are_rejected_and_likes_absent() {
        let p = FileProvider::from_archive(archive());
        assert!(matches!(
            p.get_or_create_playlist("x").await,
            Err(AdapterError::Invalid(_))
        ));
        assert_eq!(p.get_likes().await, Err(AdapterError::CapabilityAbsent("likes")));
    }
}
