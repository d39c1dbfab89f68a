use music_catalog_sync::api::mock::MockProvider;
use music_catalog_sync::api::Provider;
use music_catalog_sync::error::{AdapterError, SyncError};
use music_catalog_sync::matcher::{MatchMethod, MatchOptions, Matcher};
use music_catalog_sync::models::{Playlist, Track};
use music_catalog_sync::report::{SkipReason, SyncReport};
use music_catalog_sync::sync::{CancelFlag, SyncOptions, SyncOrchestrator, SyncPhase};
use music_catalog_sync::throttle::{RetryPolicy, ThrottledProvider, Unlimited};
use std::sync::Arc;
use std::time::Duration;

fn song_a() -> Track {
    Track::new("sA", "Song A")
        .with_album("Album A")
        .with_duration_ms(200_000)
        .with_isrc("USRC10000001")
}

fn song_b() -> Track {
    Track::new("sB", "Song B").with_duration_ms(180_000)
}

fn obscure() -> Track {
    Track::new("sC", "Obscure").with_duration_ms(90_000)
}

fn catalog() -> Vec<Track> {
    vec![
        Track::new("dA", "Song A")
            .with_album("Album A")
            .with_duration_ms(200_500)
            .with_isrc("usrc10000001"),
        Track::new("dB", "Song B (Remastered 2011)")
            .with_album("Album B")
            .with_duration_ms(181_000),
        Track::new("dN", "Noise").with_duration_ms(60_000),
    ]
}

fn roadtrip() -> Playlist {
    Playlist::new("src-rt", "Roadtrip").with_tracks(vec![song_a(), song_b(), obscure()])
}

fn source() -> Arc<MockProvider> {
    Arc::new(MockProvider::new("src").with_playlist(roadtrip()))
}

fn destination() -> Arc<MockProvider> {
    Arc::new(MockProvider::new("dst").with_catalog(catalog()))
}

async fn run(src: &Arc<MockProvider>, dst: &Arc<MockProvider>, options: SyncOptions) -> Result<SyncReport, SyncError> {
    let mut o = SyncOrchestrator::new(
        src.clone(),
        dst.clone(),
        Matcher::new(MatchOptions::default()),
        options,
    );
    let res = o.run().await;
    if res.is_ok() {
        assert_eq!(o.phase(), SyncPhase::Done);
    }
    res
}

fn ids(p: &Playlist) -> Vec<&str> {
    p.tracks.iter().map(|t| t.id.as_str()).collect()
}

fn assert_totals_consistent(r: &SyncReport) {
    assert_eq!(
        r.total,
        r.matched + r.unmatched + r.already_present + r.skipped + r.failed,
        "{:?}",
        r.summary()
    );
}

#[tokio::test]
async fn roadtrip_is_created_and_filled_in_source_order() {
    let (src, dst) = (source(), destination());
    let report = run(&src, &dst, SyncOptions::default()).await.unwrap();

    let created = dst.playlist("Roadtrip").expect("playlist created");
    assert_eq!(ids(&created), vec!["dA", "dB"]);

    let s = report.section("Roadtrip").unwrap();
    assert_eq!(s.matched.len(), 2);
    assert_eq!(s.matched[0].method, MatchMethod::Isrc);
    assert!(matches!(s.matched[1].method, MatchMethod::Fuzzy { .. }));
    assert_eq!(s.unmatched, vec![obscure()]);
    assert_eq!(report.matched, 2);
    assert_eq!(report.unmatched, 1);
    assert!(!report.cancelled);
    assert_totals_consistent(&report);
}

#[tokio::test]
async fn second_run_adds_nothing() {
    let (src, dst) = (source(), destination());
    run(&src, &dst, SyncOptions::default()).await.unwrap();
    let searches_after_first = dst.calls("search");

    let report = run(&src, &dst, SyncOptions::default()).await.unwrap();
    assert_eq!(report.matched, 0);
    assert_eq!(report.already_present, 2);
    assert_eq!(report.unmatched, 1);
    assert_eq!(ids(&dst.playlist("Roadtrip").unwrap()), vec!["dA", "dB"]);
    // Only the unmatched track needs another search.
    assert_eq!(dst.calls("search"), searches_after_first + 1);
    assert_eq!(dst.playlists().len(), 1);
}

#[tokio::test]
async fn existing_destination_entries_are_kept_in_front() {
    let src = source();
    let dst = Arc::new(
        MockProvider::new("dst")
            .with_catalog(catalog())
            .with_playlist(
                Playlist::new("dst-rt", "Roadtrip")
                    .with_tracks(vec![Track::new("z", "Zed").with_duration_ms(1_000)]),
            ),
    );
    run(&src, &dst, SyncOptions::default()).await.unwrap();
    assert_eq!(ids(&dst.playlist("Roadtrip").unwrap()), vec!["z", "dA", "dB"]);
}

#[tokio::test]
async fn skip_list_is_exact_and_case_sensitive() {
    let src = Arc::new(
        MockProvider::new("src")
            .with_playlist(Playlist::new("p1", "Discover Weekly").with_tracks(vec![song_a()]))
            .with_playlist(Playlist::new("p2", "discover weekly").with_tracks(vec![song_b()])),
    );
    let dst = destination();
    let options = SyncOptions {
        skip_playlists: vec!["Discover Weekly".into()],
        ..SyncOptions::default()
    };
    let report = run(&src, &dst, options).await.unwrap();
    assert!(dst.playlist("Discover Weekly").is_none());
    assert!(dst.playlist("discover weekly").is_some());
    assert_eq!(report.skipped_playlists.len(), 1);
    assert_eq!(report.skipped_playlists[0].reason, SkipReason::SkipList);
    assert_totals_consistent(&report);
}

#[tokio::test]
async fn owner_filter_limits_source_playlists() {
    let src = Arc::new(
        MockProvider::new("src")
            .with_playlist(roadtrip().with_owner("alice"))
            .with_playlist(Playlist::new("p2", "Bob's").with_owner("bob").with_tracks(vec![song_b()])),
    );
    let dst = destination();
    let options = SyncOptions {
        owner: Some("alice".into()),
        ..SyncOptions::default()
    };
    run(&src, &dst, options).await.unwrap();
    let names: Vec<String> = dst.playlists().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["Roadtrip"]);
}

#[tokio::test]
async fn foreign_destination_playlist_is_not_written() {
    let src = source();
    let dst = Arc::new(
        MockProvider::new("dst")
            .with_catalog(catalog())
            .with_playlist(Playlist::new("theirs", "Roadtrip").with_owner("someone-else")),
    );
    let options = SyncOptions {
        destination_owner: Some("mock-user".into()),
        ..SyncOptions::default()
    };
    let report = run(&src, &dst, options).await.unwrap();
    assert_eq!(report.skipped_playlists[0].reason, SkipReason::DestinationNotOwned);
    assert_eq!(dst.playlists().len(), 1);
    assert_eq!(dst.calls("add_tracks"), 0);
}

#[tokio::test]
async fn empty_source_playlist_is_skipped() {
    let src = Arc::new(MockProvider::new("src").with_playlist(Playlist::new("e", "Empty")));
    let dst = destination();
    let report = run(&src, &dst, SyncOptions::default()).await.unwrap();
    assert_eq!(report.skipped_playlists[0].reason, SkipReason::Empty);
    assert!(dst.playlist("Empty").is_none());
}

#[tokio::test]
async fn unauthorized_search_aborts_with_context() {
    let (src, dst) = (source(), destination());
    dst.fail_next("search", AdapterError::Unauthorized("token expired".into()));
    let err = run(&src, &dst, SyncOptions::default()).await.unwrap_err();
    match err {
        SyncError::AuthFailure { location, .. } => {
            assert_eq!(location.platform, "dst");
            assert_eq!(location.playlist.as_deref(), Some("Roadtrip"));
            assert_eq!(location.track.as_deref(), Some("Song A"));
        }
        other => panic!("expected AuthFailure, got {:?}", other),
    }
    assert!(dst.playlist("Roadtrip").unwrap().tracks.is_empty());
}

#[tokio::test]
async fn unauthorized_source_listing_aborts() {
    let (src, dst) = (source(), destination());
    src.fail_next("list_playlists", AdapterError::Unauthorized("revoked".into()));
    let err = run(&src, &dst, SyncOptions::default()).await.unwrap_err();
    assert!(matches!(err, SyncError::AuthFailure { .. }));
    assert!(err.to_string().contains("src"));
}

#[tokio::test]
async fn failed_search_is_recorded_and_run_continues() {
    let (src, dst) = (source(), destination());
    dst.fail_next("search", AdapterError::Transient("503".into()));
    let report = run(&src, &dst, SyncOptions::default()).await.unwrap();
    let s = report.section("Roadtrip").unwrap();
    assert_eq!(s.failed.len(), 1);
    assert_eq!(s.failed[0].track.id, "sA");
    assert_eq!(ids(&dst.playlist("Roadtrip").unwrap()), vec!["dB"]);
    assert_totals_consistent(&report);
}

#[tokio::test]
async fn failed_batch_does_not_stop_later_batches() {
    let (src, dst) = (source(), destination());
    dst.fail_next("add_tracks", AdapterError::Transient("502".into()));
    let options = SyncOptions {
        max_batch_size: 1,
        ..SyncOptions::default()
    };
    let report = run(&src, &dst, options).await.unwrap();
    let s = report.section("Roadtrip").unwrap();
    assert_eq!(s.failed.len(), 1);
    assert!(s.failed[0].reason.starts_with("write failed"));
    assert_eq!(s.matched.len(), 1);
    assert_eq!(ids(&dst.playlist("Roadtrip").unwrap()), vec!["dB"]);
    assert_totals_consistent(&report);
}

#[tokio::test]
async fn source_playlist_failure_is_isolated() {
    let src = Arc::new(
        MockProvider::new("src")
            .with_playlist(Playlist::new("p1", "Broken").with_tracks(vec![song_a()]))
            .with_playlist(Playlist::new("p2", "Fine").with_tracks(vec![song_b()])),
    );
    let dst = destination();
    src.fail_next("list_tracks", AdapterError::NotFound("p1".into()));
    let report = run(&src, &dst, SyncOptions::default()).await.unwrap();
    assert!(report.section("Broken").unwrap().error.is_some());
    assert_eq!(ids(&dst.playlist("Fine").unwrap()), vec!["dB"]);
}

#[tokio::test]
async fn transient_search_errors_are_retried_by_the_throttle() {
    let src = source();
    let dst = destination();
    dst.fail_times("search", AdapterError::RateLimited { retry_after: None }, 2);
    let policy = RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: Duration::ZERO,
    };
    let throttled: Arc<dyn Provider> = Arc::new(ThrottledProvider::new(dst.clone(), Arc::new(Unlimited), policy));
    let mut o = SyncOrchestrator::new(src, throttled, Matcher::default(), SyncOptions::default());
    let report = o.run().await.unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(report.matched, 2);
    // Two rejected attempts plus one search per source track.
    assert_eq!(dst.calls("search"), 5);
}

#[tokio::test]
async fn likes_are_synced_when_both_sides_support_them() {
    let src = Arc::new(MockProvider::new("src").with_likes(vec![song_a(), obscure()]));
    let dst = Arc::new(MockProvider::new("dst").with_catalog(catalog()).with_likes(vec![]));
    let options = SyncOptions {
        sync_likes: true,
        ..SyncOptions::default()
    };
    let report = run(&src, &dst, options).await.unwrap();
    let likes = report.likes().unwrap();
    assert_eq!(likes.matched.len(), 1);
    assert_eq!(likes.unmatched.len(), 1);
    assert!(dst.likes().unwrap().contains_id("dA"));

    // Second pass: already liked.
    let report = run(&src, &dst, SyncOptions { sync_likes: true, ..SyncOptions::default() }).await.unwrap();
    assert_eq!(report.likes().unwrap().already_present, 1);
    assert_eq!(dst.likes().unwrap().len(), 1);
}

#[tokio::test]
async fn likes_capability_absent_is_skipped() {
    let src = Arc::new(MockProvider::new("src").with_likes(vec![song_a()]));
    let dst = destination();
    let options = SyncOptions {
        sync_likes: true,
        ..SyncOptions::default()
    };
    let report = run(&src, &dst, options).await.unwrap();
    assert!(report.likes().is_none());
    assert_eq!(dst.calls("add_like"), 0);
}

#[tokio::test]
async fn like_all_likes_every_written_track() {
    let src = source();
    let dst = Arc::new(MockProvider::new("dst").with_catalog(catalog()).with_likes(vec![]));
    let options = SyncOptions {
        like_all: true,
        ..SyncOptions::default()
    };
    let report = run(&src, &dst, options).await.unwrap();
    assert_eq!(report.section("Roadtrip").unwrap().liked, 2);
    let liked = dst.likes().unwrap();
    assert!(liked.contains_id("dA") && liked.contains_id("dB"));
}

#[tokio::test]
async fn cancelled_run_returns_partial_report_and_writes_nothing() {
    let (src, dst) = (source(), destination());
    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut o = SyncOrchestrator::new(src, dst.clone(), Matcher::default(), SyncOptions::default())
        .with_cancel_flag(cancel);
    let report = o.run().await.unwrap();
    assert!(report.cancelled);
    assert!(report.sections.is_empty());
    assert!(dst.playlists().is_empty());
}

#[tokio::test]
async fn debug_dumps_are_written_when_enabled() {
    let (src, dst) = (source(), destination());
    let dir = tempfile::tempdir().unwrap();
    let options = SyncOptions {
        debug_dir: Some(dir.path().to_path_buf()),
        ..SyncOptions::default()
    };
    run(&src, &dst, options).await.unwrap();
    for f in [
        "conversion_rate.json",
        "missing_songs.json",
        "new_songs.json",
        "songs_with_no_albums.json",
        "sync_report.json",
    ] {
        assert!(dir.path().join(f).exists(), "{} missing", f);
    }
    let read = |f: &str| -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(dir.path().join(f)).unwrap()).unwrap()
    };
    assert_eq!(read("missing_songs.json")["Roadtrip"][0]["title"], "Obscure");
    let no_album = read("songs_with_no_albums.json");
    let titles: Vec<&str> = no_album["Roadtrip"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Song B", "Obscure"]);
}

#[tokio::test]
async fn album_less_track_matches_on_title_and_duration() {
    let (src, dst) = (source(), destination());
    let report = run(&src, &dst, SyncOptions::default()).await.unwrap();
    let s = report.section("Roadtrip").unwrap();
    let pair = s.matched.iter().find(|p| p.source.id == "sB").unwrap();
    assert_eq!(pair.destination.id, "dB");
    assert!(s.no_album.iter().any(|t| t.id == "sB"));
}

#[tokio::test]
async fn similar_titles_already_present_are_still_synced() {
    let part1 = |id: &str| Track::new(id, "Part 1").with_duration_ms(200_000);
    let part2 = |id: &str| Track::new(id, "Part 2").with_duration_ms(202_000);
    let src = Arc::new(
        MockProvider::new("src")
            .with_playlist(Playlist::new("s-suite", "Suite").with_tracks(vec![part1("s1"), part2("s2")])),
    );
    let dst = Arc::new(
        MockProvider::new("dst")
            .with_catalog(vec![part1("d1"), part2("d2")])
            .with_playlist(Playlist::new("d-suite", "Suite").with_tracks(vec![part1("d1")])),
    );
    let report = run(&src, &dst, SyncOptions::default()).await.unwrap();
    assert_eq!(ids(&dst.playlist("Suite").unwrap()), vec!["d1", "d2"]);
    let s = report.section("Suite").unwrap();
    assert_eq!(s.already_present, 1);
    assert_eq!(s.matched.len(), 1);
    assert_eq!(dst.calls("search"), 1);
    assert_totals_consistent(&report);
}

#[tokio::test]
async fn abandoned_playlist_counts_its_tracks_as_failed() {
    let (src, dst) = (source(), destination());
    dst.fail_next("get_or_create_playlist", AdapterError::Invalid("name rejected".into()));
    let report = run(&src, &dst, SyncOptions::default()).await.unwrap();
    let s = report.section("Roadtrip").unwrap();
    assert!(s.error.as_deref().unwrap().contains("name rejected"));
    assert_eq!(s.total, 3);
    assert_eq!(s.failed.len(), 3);
    assert!(s.failed.iter().all(|f| f.reason.contains("name rejected")));
    assert!(dst.playlists().is_empty());
    assert_totals_consistent(&report);
}

#[tokio::test]
async fn like_all_still_likes_when_current_likes_cannot_be_read() {
    let src = source();
    let dst = Arc::new(MockProvider::new("dst").with_catalog(catalog()).with_likes(vec![]));
    dst.fail_next("get_likes", AdapterError::Transient("503".into()));
    let options = SyncOptions {
        like_all: true,
        ..SyncOptions::default()
    };
    let report = run(&src, &dst, options).await.unwrap();
    assert_eq!(report.section("Roadtrip").unwrap().liked, 2);
    assert_eq!(dst.calls("add_like"), 2);
    let liked = dst.likes().unwrap();
    assert!(liked.contains_id("dA") && liked.contains_id("dB"));
}

#[tokio::test]
async fn like_all_is_off_without_likes_capability() {
    let (src, dst) = (source(), destination());
    let options = SyncOptions {
        like_all: true,
        ..SyncOptions::default()
    };
    let report = run(&src, &dst, options).await.unwrap();
    assert_eq!(report.section("Roadtrip").unwrap().liked, 0);
    assert_eq!(dst.calls("add_like"), 0);
    assert_eq!(report.matched, 2);
}

#[tokio::test]
async fn catalogs_in_different_countries_are_refused() {
    let src = Arc::new(MockProvider::new("src").with_country("US").with_playlist(roadtrip()));
    let dst = Arc::new(MockProvider::new("dst").with_country("NO").with_catalog(catalog()));
    let err = run(&src, &dst, SyncOptions::default()).await.unwrap_err();
    match &err {
        SyncError::ConfigurationInvalid(msg) => assert!(msg.contains("US vs NO"), "{}", msg),
        other => panic!("expected ConfigurationInvalid, got {:?}", other),
    }
    assert_eq!(src.calls("list_playlists"), 0);

    let options = SyncOptions {
        diff_country: true,
        ..SyncOptions::default()
    };
    let report = run(&src, &dst, options).await.unwrap();
    assert_eq!(report.matched, 2);
}

#[tokio::test]
async fn search_hit_already_queued_still_counts_as_converted() {
    let echo = Track::new("sA2", "Song A").with_duration_ms(200_000);
    let src = Arc::new(
        MockProvider::new("src").with_playlist(Playlist::new("p", "Twice").with_tracks(vec![song_a(), echo])),
    );
    let dst = destination();
    let report = run(&src, &dst, SyncOptions::default()).await.unwrap();
    let s = report.section("Twice").unwrap();
    assert_eq!(s.matched.len(), 1);
    assert_eq!(s.already_present, 1);
    assert_eq!(s.resolved_present, 1);
    assert_eq!(s.attempted, 2);
    assert_eq!(s.conversion_rate(), 1.0);
    assert_eq!(ids(&dst.playlist("Twice").unwrap()), vec!["dA"]);
    assert_totals_consistent(&report);
}
