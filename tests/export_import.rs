use music_catalog_sync::api::file::FileProvider;
use music_catalog_sync::api::mock::MockProvider;
use music_catalog_sync::api::Provider;
use music_catalog_sync::error::AdapterError;
use music_catalog_sync::export::{export_playlists, ExportOptions, PlaylistArchive};
use music_catalog_sync::matcher::{MatchOptions, Matcher};
use music_catalog_sync::models::{Playlist, Track};
use music_catalog_sync::sync::{SyncOptions, SyncOrchestrator};
use std::sync::Arc;
use tempfile::tempdir;

fn song(id: &str, title: &str, isrc: &str) -> Track {
    Track::new(id, title)
        .with_album("Album")
        .with_duration_ms(200_000)
        .with_isrc(isrc)
}

fn spotify_like_source() -> MockProvider {
    MockProvider::new("spotify")
        .with_playlist(Playlist::new("p1", "Roadtrip").with_tracks(vec![
            song("s1", "First", "ISRC00000001"),
            song("s2", "Second", "ISRC00000002"),
        ]))
        .with_playlist(Playlist::new("p2", "Release Radar").with_tracks(vec![song("s3", "Third", "ISRC00000003")]))
        .with_likes(vec![song("s1", "First", "ISRC00000001")])
}

fn tidal_like_destination() -> Arc<MockProvider> {
    Arc::new(
        MockProvider::new("tidal")
            .with_catalog(vec![
                song("t1", "First", "ISRC00000001"),
                song("t2", "Second", "ISRC00000002"),
            ])
            .with_likes(vec![]),
    )
}

#[tokio::test]
async fn exported_archive_round_trips_through_import() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("export.json");
    let source = spotify_like_source();
    let options = ExportOptions {
        skip_playlists: vec!["Release Radar".into()],
        include_likes: true,
        ..ExportOptions::default()
    };

    let archive = export_playlists(&source, &path, &options).await.unwrap();
    assert_eq!(archive.playlists.len(), 1);
    assert_eq!(archive.track_count(), 2);
    assert_eq!(archive.source.as_deref(), Some("spotify"));
    assert_eq!(archive.likes.as_ref().map(Vec::len), Some(1));

    let file = Arc::new(FileProvider::open(&path).unwrap());
    let dst = tidal_like_destination();
    let mut orchestrator = SyncOrchestrator::new(
        file,
        dst.clone(),
        Matcher::new(MatchOptions::default()),
        SyncOptions {
            sync_likes: true,
            ..SyncOptions::default()
        },
    );
    let report = orchestrator.run().await.unwrap();

    let created = dst.playlist("Roadtrip").unwrap();
    let ids: Vec<&str> = created.tracks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "t2"]);
    assert_eq!(report.source, "file");
    assert_eq!(report.likes().unwrap().matched.len(), 1);
    assert!(dst.likes().unwrap().contains_id("t1"));
}

#[tokio::test]
async fn export_without_likes_capability_still_writes_playlists() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out").join("export.json");
    let source = MockProvider::new("spotify")
        .with_playlist(Playlist::new("p1", "Roadtrip").with_tracks(vec![song("s1", "First", "X")]));
    let options = ExportOptions {
        include_likes: true,
        minify: true,
        ..ExportOptions::default()
    };

    let archive = export_playlists(&source, &path, &options).await.unwrap();
    assert!(archive.likes.is_none());
    let reread = PlaylistArchive::read(&path).unwrap();
    assert_eq!(reread.playlists, archive.playlists);
}

#[tokio::test]
async fn export_aborts_when_source_rejects_credentials() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("export.json");
    let source = MockProvider::new("spotify").with_playlist(Playlist::new("p1", "Roadtrip"));
    source.fail_next("list_tracks", AdapterError::Unauthorized("expired".into()));

    let err = export_playlists(&source, &path, &ExportOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Roadtrip"), "{}", err);
    assert!(!path.exists());
}

#[tokio::test]
async fn bare_playlist_array_imports_by_name() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bare.json");
    std::fs::write(
        &path,
        r#"[{"id":"","name":"Old Mix","tracks":[{"id":"x1","title":"Second","isrc":"ISRC00000002"}]}]"#,
    )
    .unwrap();

    let file = FileProvider::open(&path).unwrap();
    assert_eq!(file.get_likes().await, Err(AdapterError::CapabilityAbsent("likes")));
    let listed = file.list_playlists(None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(file.list_tracks(&listed[0]).await.unwrap().len(), 1);

    let dst = tidal_like_destination();
    let mut orchestrator = SyncOrchestrator::new(
        Arc::new(file),
        dst.clone(),
        Matcher::new(MatchOptions::default()),
        SyncOptions::default(),
    );
    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.matched, 1);
    let ids: Vec<String> = dst
        .playlist("Old Mix")
        .unwrap()
        .tracks
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, vec!["t2"]);
}
