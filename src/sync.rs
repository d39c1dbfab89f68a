//! One-way synchronization of playlists and likes from a source platform to
//! a destination platform.
//!
//! The orchestrator only ever adds to the destination: it creates missing
//! playlists, appends matched tracks and adds likes. Nothing is removed or
//! reordered, so re-running after a partial run is safe.

use crate::api::Provider;
use crate::config::Config;
use crate::error::{AdapterError, Location, SyncError};
use crate::matcher::{MatchMethod, Matcher};
use crate::models::{LikedSet, Playlist, Track};
use crate::report::{
    DebugReportWriter, FailedTrack, MatchedPair, ReportBuilder, SectionKind, SectionReport, SkipReason,
    SyncReport,
};
use crate::util::dedup_in_place;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub owner: Option<String>,
    pub destination_owner: Option<String>,
    /// Exact, case-sensitive playlist names never synced.
    pub skip_playlists: Vec<String>,
    pub sync_likes: bool,
    pub like_all: bool,
    /// Allow platforms that report different catalog countries.
    pub diff_country: bool,
    pub max_batch_size: usize,
    pub debug_dir: Option<PathBuf>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            owner: None,
            destination_owner: None,
            skip_playlists: Vec::new(),
            sync_likes: false,
            like_all: false,
            diff_country: false,
            max_batch_size: 100,
            debug_dir: None,
        }
    }
}

impl SyncOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            owner: cfg.owner.clone(),
            destination_owner: cfg.destination_owner.clone(),
            skip_playlists: cfg.skip_playlists.clone(),
            sync_likes: cfg.sync_likes,
            like_all: cfg.like_all,
            diff_country: cfg.diff_country,
            max_batch_size: cfg.max_batch_size,
            debug_dir: cfg.debug_output(),
        }
    }
}

/// Cooperative cancellation shared with a signal handler. Checked between
/// tracks and between playlists.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Init,
    EnumeratingPlaylists,
    Fetching,
    Matching,
    Writing,
    SyncingLikes,
    Done,
}

/// Where one source track ended up after resolution against the destination.
enum Resolution {
    /// Same id, or an equivalent track, is already there.
    AlreadyPresent,
    /// The search found a track that is already present or already queued.
    Duplicate,
    Matched(Track, MatchMethod),
    Unmatched,
    Failed(String),
}

struct Filters {
    owner: Option<String>,
    destination_owner: Option<String>,
    skip: HashSet<String>,
}

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

pub struct SyncOrchestrator {
    source: Arc<dyn Provider>,
    destination: Arc<dyn Provider>,
    matcher: Matcher,
    options: SyncOptions,
    cancel: CancelFlag,
    phase: SyncPhase,
    /// Destination likes, loaded once per run when `like_all` or likes sync needs them.
    destination_likes: Option<LikedSet>,
    /// Cleared when the destination turns out not to support likes.
    like_all_active: bool,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn Provider>,
        destination: Arc<dyn Provider>,
        matcher: Matcher,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            destination,
            matcher,
            options,
            cancel: CancelFlag::new(),
            phase: SyncPhase::Init,
            destination_likes: None,
            like_all_active: false,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    fn enter(&mut self, phase: SyncPhase) {
        if self.phase != phase {
            debug!("phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn src_name(&self) -> String {
        self.source.name().to_string()
    }

    fn dst_name(&self) -> String {
        self.destination.name().to_string()
    }

    /// Run one full synchronization and return its report.
    ///
    /// Per-track and per-playlist failures are recorded in the report; only
    /// configuration errors, authentication failures and failures to list the
    /// source playlists end the run with an error.
    pub async fn run(&mut self) -> Result<SyncReport, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "sync",
            run = %run_id,
            source = %self.source.name(),
            destination = %self.destination.name()
        );
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&mut self, run_id: Uuid) -> Result<SyncReport, SyncError> {
        self.enter(SyncPhase::Init);
        let filters = self.init()?;
        let mut report = ReportBuilder::new(run_id, self.source.name(), self.destination.name());
        info!("Starting sync {} -> {}", self.source.name(), self.destination.name());

        self.enter(SyncPhase::EnumeratingPlaylists);
        let selected = self.select_playlists(&filters, &mut report).await?;
        info!("{} playlists to synchronize", selected.len());

        self.like_all_active = self.options.like_all;
        if self.like_all_active {
            self.load_destination_likes().await?;
        }

        for playlist in selected {
            if self.cancel.is_cancelled() {
                warn!("Sync cancelled before playlist {}", playlist.name);
                report.mark_cancelled();
                break;
            }
            let span = info_span!("playlist", name = %playlist.name);
            match self.sync_playlist(&playlist).instrument(span).await? {
                Some(section) => report.push_section(section),
                None => report.skip_playlist(&playlist, SkipReason::Empty),
            }
            if self.cancel.is_cancelled() {
                report.mark_cancelled();
            }
            self.write_debug(&report);
        }

        if self.options.sync_likes && !report.is_cancelled() {
            self.enter(SyncPhase::SyncingLikes);
            if let Some(section) = self.sync_likes().instrument(info_span!("likes")).await? {
                report.push_section(section);
            }
            if self.cancel.is_cancelled() {
                report.mark_cancelled();
            }
        }

        self.enter(SyncPhase::Done);
        let report = report.finish();
        if let Some(dir) = &self.options.debug_dir {
            if let Err(e) = DebugReportWriter::new(dir).write(&report) {
                warn!("Failed to write debug report to {}: {}", dir.display(), e);
            }
        }
        info!("Synchronization finished: {}", report.summary());
        Ok(report)
    }

    fn init(&self) -> Result<Filters, SyncError> {
        if self.source.name() == self.destination.name() {
            return Err(SyncError::ConfigurationInvalid(format!(
                "source and destination must be different platforms (both are {})",
                self.source.name()
            )));
        }
        if self.options.max_batch_size == 0 {
            return Err(SyncError::ConfigurationInvalid(
                "max_batch_size must be at least 1".into(),
            ));
        }
        if !self.options.diff_country {
            if let (Some(src), Some(dst)) = (self.source.country_code(), self.destination.country_code()) {
                if !src.eq_ignore_ascii_case(dst) {
                    return Err(SyncError::ConfigurationInvalid(format!(
                        "{} and {} catalogs are in different countries ({} vs {}); \
                         set diff_country to sync anyway, matches may be wrong",
                        self.source.name(),
                        self.destination.name(),
                        src,
                        dst
                    )));
                }
            }
        }
        Ok(Filters {
            owner: non_empty(&self.options.owner),
            destination_owner: non_empty(&self.options.destination_owner),
            skip: self.options.skip_playlists.iter().cloned().collect(),
        })
    }

    async fn select_playlists(
        &self,
        filters: &Filters,
        report: &mut ReportBuilder,
    ) -> Result<Vec<Playlist>, SyncError> {
        let playlists = self
            .source
            .list_playlists(filters.owner.as_deref())
            .await
            .map_err(|e| SyncError::from_adapter(Location::platform(self.src_name()), e))?;

        let destination_playlists = match &filters.destination_owner {
            Some(_) => self
                .destination
                .list_playlists(None)
                .await
                .map_err(|e| SyncError::from_adapter(Location::platform(self.dst_name()), e))?,
            None => Vec::new(),
        };

        let mut selected = Vec::new();
        for pl in playlists {
            if filters.skip.contains(&pl.name) {
                debug!("Skipping playlist {} (skip list)", pl.name);
                report.skip_playlist(&pl, SkipReason::SkipList);
                continue;
            }
            if let Some(owner) = &filters.owner {
                if !pl.is_owned_by(owner) {
                    debug!("Skipping playlist {} (owned by {:?})", pl.name, pl.owner);
                    report.skip_playlist(&pl, SkipReason::NotOwned);
                    continue;
                }
            }
            if let Some(dst_owner) = &filters.destination_owner {
                let same_name: Vec<&Playlist> = destination_playlists
                    .iter()
                    .filter(|d| d.name == pl.name)
                    .collect();
                if !same_name.is_empty() && !same_name.iter().any(|d| d.is_owned_by(dst_owner)) {
                    warn!(
                        "Skipping playlist {}: the destination playlist with that name is not owned by {}",
                        pl.name, dst_owner
                    );
                    report.skip_playlist(&pl, SkipReason::DestinationNotOwned);
                    continue;
                }
            }
            selected.push(pl);
        }
        Ok(selected)
    }

    /// Returns `None` for playlists skipped as empty. Per-playlist failures
    /// come back as a section with `error` set.
    async fn sync_playlist(&mut self, playlist: &Playlist) -> Result<Option<SectionReport>, SyncError> {
        let name = playlist.name.clone();
        let src_loc = Location::platform(self.src_name()).playlist(&name);
        let dst_loc = Location::platform(self.dst_name()).playlist(&name);
        let mut section = SectionReport::new(&name, SectionKind::Playlist);

        self.enter(SyncPhase::Fetching);
        let mut tracks = match self.source.list_tracks(playlist).await {
            Ok(t) => t,
            Err(e) => return self.abandon(section, src_loc, e, Vec::new()).map(Some),
        };
        if tracks.is_empty() {
            info!("Skipping empty playlist {}", name);
            return Ok(None);
        }
        let duplicates = dedup_in_place(&mut tracks);
        if duplicates > 0 {
            warn!("Playlist {} contains {} duplicate tracks", name, duplicates);
        }
        section.total = tracks.len() + duplicates;
        section.skipped = duplicates;

        let target = match self.destination.get_or_create_playlist(&name).await {
            Ok(p) => p,
            Err(e) => return self.abandon(section, dst_loc, e, tracks).map(Some),
        };
        let existing = match self.destination.list_tracks(&target).await {
            Ok(t) => t,
            Err(e) => return self.abandon(section, dst_loc, e, tracks).map(Some),
        };

        self.enter(SyncPhase::Matching);
        let mut pending: Vec<MatchedPair> = Vec::new();
        let mut considered = duplicates;
        for src in tracks {
            if self.cancel.is_cancelled() {
                warn!("Sync cancelled in playlist {}", name);
                break;
            }
            considered += 1;
            let resolution = self.resolve(&src, &existing, &pending, &dst_loc).await?;
            self.record(&mut section, &mut pending, src, resolution);
        }
        // Tracks never reached after a cancel are not part of this run.
        section.total = considered;

        self.enter(SyncPhase::Writing);
        let written = self.write_tracks(&target, pending, &mut section, &dst_loc).await?;

        if !written.is_empty() {
            self.like_written(&written, &mut section, &dst_loc).await?;
        }

        info!(
            "Playlist {}: {} added, {} unmatched, {} already present, {} failed",
            name,
            section.matched.len(),
            section.unmatched.len(),
            section.already_present,
            section.failed.len()
        );
        Ok(Some(section))
    }

    /// Fatal errors end the run; anything else abandons just this section.
    /// Source tracks already counted in `total` are recorded as failed.
    fn abandon(
        &self,
        mut section: SectionReport,
        loc: Location,
        err: AdapterError,
        remaining: Vec<Track>,
    ) -> Result<SectionReport, SyncError> {
        if err.is_fatal() {
            return Err(SyncError::from_adapter(loc, err));
        }
        warn!("Giving up on {}: {}", loc, err);
        let reason = format!("{}: {}", loc, err);
        section.failed.extend(remaining.into_iter().map(|track| FailedTrack {
            track,
            reason: reason.clone(),
        }));
        section.error = Some(reason);
        Ok(section)
    }

    fn record(&self, section: &mut SectionReport, pending: &mut Vec<MatchedPair>, src: Track, resolution: Resolution) {
        if !matches!(resolution, Resolution::AlreadyPresent) {
            section.attempted += 1;
            if src.album.is_none() {
                section.no_album.push(src.clone());
            }
        }
        match resolution {
            Resolution::AlreadyPresent => section.already_present += 1,
            Resolution::Duplicate => {
                section.already_present += 1;
                section.resolved_present += 1;
            }
            Resolution::Matched(destination, method) => pending.push(MatchedPair {
                source: src,
                destination,
                method,
            }),
            Resolution::Unmatched => {
                debug!("No match for {}", src);
                section.unmatched.push(src);
            }
            Resolution::Failed(reason) => section.failed.push(FailedTrack { track: src, reason }),
        }
    }

    /// Decide what to do with one source track against the tracks already at
    /// the destination and those queued for writing.
    async fn resolve(
        &self,
        src: &Track,
        present: &[Track],
        pending: &[MatchedPair],
        loc: &Location,
    ) -> Result<Resolution, SyncError> {
        if present.iter().any(|t| t.id == src.id) {
            return Ok(Resolution::AlreadyPresent);
        }
        if let Some(t) = present.iter().find(|t| self.matcher.same_recording(src, t)) {
            debug!("{} already present as {}", src, t.id);
            return Ok(Resolution::AlreadyPresent);
        }
        let candidates = match self.destination.search(src).await {
            Ok(c) => c,
            Err(e) if e.is_fatal() => {
                return Err(SyncError::from_adapter(loc.clone().track(&src.title), e))
            }
            Err(e) => {
                warn!("Search failed for {}: {}", src, e);
                return Ok(Resolution::Failed(format!("search failed: {}", e)));
            }
        };
        let result = self.matcher.find_match(src, &candidates);
        let (dest, method) = match (result.track(), result.method()) {
            (Some(dest), Some(method)) => (dest, method),
            _ => return Ok(Resolution::Unmatched),
        };
        let already_there = present.iter().any(|t| t.id == dest.id)
            || pending.iter().any(|p| p.destination.id == dest.id);
        if already_there {
            debug!("{} resolves to {} which is already present or queued", src, dest.id);
            return Ok(Resolution::Duplicate);
        }
        Ok(Resolution::Matched(dest.clone(), method))
    }

    /// Append in batches; a failed batch marks its tracks failed and the next
    /// batch still goes out. Returns the destination tracks actually written.
    async fn write_tracks(
        &self,
        target: &Playlist,
        pending: Vec<MatchedPair>,
        section: &mut SectionReport,
        loc: &Location,
    ) -> Result<Vec<Track>, SyncError> {
        let mut written = Vec::new();
        for chunk in pending.chunks(self.options.max_batch_size) {
            let tracks: Vec<Track> = chunk.iter().map(|p| p.destination.clone()).collect();
            match self.destination.add_tracks(target, &tracks).await {
                Ok(()) => {
                    debug!("Added batch of {} tracks to {}", tracks.len(), target.name);
                    section.matched.extend(chunk.iter().cloned());
                    written.extend(tracks);
                }
                Err(e) if e.is_fatal() => return Err(SyncError::from_adapter(loc.clone(), e)),
                Err(e) => {
                    warn!("Failed to add {} tracks to {}: {}", tracks.len(), target.name, e);
                    section.failed.extend(chunk.iter().map(|p| FailedTrack {
                        track: p.source.clone(),
                        reason: format!("write failed: {}", e),
                    }));
                }
            }
        }
        Ok(written)
    }

    /// Only a missing likes capability turns `like_all` off. When the current
    /// likes cannot be read, written tracks are liked without the already-liked filter.
    async fn load_destination_likes(&mut self) -> Result<(), SyncError> {
        match self.destination.get_likes().await {
            Ok(set) => self.destination_likes = Some(set),
            Err(AdapterError::CapabilityAbsent(_)) => {
                info!("{} does not support likes; like_all disabled", self.destination.name());
                self.like_all_active = false;
            }
            Err(e) if e.is_fatal() => {
                return Err(SyncError::from_adapter(Location::platform(self.dst_name()), e))
            }
            Err(e) => warn!(
                "Could not load {} likes, liking written tracks unfiltered: {}",
                self.destination.name(),
                e
            ),
        }
        Ok(())
    }

    async fn like_written(&mut self, written: &[Track], section: &mut SectionReport, loc: &Location) -> Result<(), SyncError> {
        if !self.like_all_active {
            return Ok(());
        }
        let mut likes = self.destination_likes.take();
        for t in written {
            if likes.as_ref().map_or(false, |l| l.contains_id(&t.id)) {
                continue;
            }
            match self.destination.add_like(t).await {
                Ok(()) => {
                    if let Some(l) = likes.as_mut() {
                        l.insert(t.clone());
                    }
                    section.liked += 1;
                }
                Err(AdapterError::CapabilityAbsent(_)) => {
                    info!("{} does not support likes; like_all disabled", self.destination.name());
                    self.like_all_active = false;
                    break;
                }
                Err(e) if e.is_fatal() => {
                    return Err(SyncError::from_adapter(loc.clone().track(&t.title), e))
                }
                Err(e) => warn!("Failed to like {}: {}", t, e),
            }
        }
        self.destination_likes = likes;
        Ok(())
    }

    async fn sync_likes(&mut self) -> Result<Option<SectionReport>, SyncError> {
        let src_loc = Location::platform(self.src_name()).playlist("likes");
        let dst_loc = Location::platform(self.dst_name()).playlist("likes");
        let mut section = SectionReport::new("likes", SectionKind::Likes);

        let source_likes = match self.source.get_likes().await {
            Ok(l) => l,
            Err(AdapterError::CapabilityAbsent(_)) => {
                info!("{} does not support likes, skipping likes sync", self.source.name());
                return Ok(None);
            }
            Err(e) => return self.abandon(section, src_loc, e, Vec::new()).map(Some),
        };
        let mut destination_likes = match self.destination_likes.take() {
            Some(l) => l,
            None => match self.destination.get_likes().await {
                Ok(l) => l,
                Err(AdapterError::CapabilityAbsent(_)) => {
                    info!("{} does not support likes, skipping likes sync", self.destination.name());
                    return Ok(None);
                }
                Err(e) => return self.abandon(section, dst_loc, e, Vec::new()).map(Some),
            },
        };

        let mut tracks = source_likes.into_tracks();
        let duplicates = dedup_in_place(&mut tracks);
        section.skipped = duplicates;
        let mut considered = duplicates;
        let mut pending: Vec<MatchedPair> = Vec::new();
        for src in tracks {
            if self.cancel.is_cancelled() {
                warn!("Sync cancelled during likes");
                break;
            }
            considered += 1;
            let resolution = self
                .resolve(&src, destination_likes.tracks(), &pending, &dst_loc)
                .await?;
            self.record(&mut section, &mut pending, src, resolution);
        }
        section.total = considered;

        for pair in pending {
            match self.destination.add_like(&pair.destination).await {
                Ok(()) => {
                    destination_likes.insert(pair.destination.clone());
                    section.matched.push(pair);
                }
                Err(e) if e.is_fatal() => {
                    return Err(SyncError::from_adapter(dst_loc.clone().track(&pair.source.title), e))
                }
                Err(e) => {
                    warn!("Failed to like {}: {}", pair.destination, e);
                    section.failed.push(FailedTrack {
                        track: pair.source,
                        reason: format!("write failed: {}", e),
                    });
                }
            }
        }
        self.destination_likes = Some(destination_likes);

        info!(
            "Likes: {} added, {} unmatched, {} already liked, {} failed",
            section.matched.len(),
            section.unmatched.len(),
            section.already_present,
            section.failed.len()
        );
        Ok(Some(section))
    }

    fn write_debug(&self, report: &ReportBuilder) {
        if let Some(dir) = &self.options.debug_dir {
            if let Err(e) = DebugReportWriter::new(dir).write(&report.snapshot()) {
                warn!("Failed to write debug report to {}: {}", dir.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockProvider;
    use crate::matcher::MatchOptions;

    fn orchestrator(src: MockProvider, dst: MockProvider) -> SyncOrchestrator {
        SyncOrchestrator::new(
            Arc::new(src),
            Arc::new(dst),
            Matcher::new(MatchOptions::default()),
            SyncOptions::default(),
        )
    }

    #[tokio::test]
    async fn identical_platform_names_are_rejected() {
        let mut o = orchestrator(MockProvider::new("same"), MockProvider::new("same"));
        let err = o.run().await.unwrap_err();
        assert!(matches!(err, SyncError::ConfigurationInvalid(_)));
        assert_eq!(o.phase(), SyncPhase::Init);
    }

    #[tokio::test]
    async fn empty_run_reaches_done() {
        let mut o = orchestrator(MockProvider::new("src"), MockProvider::new("dst"));
        let report = o.run().await.unwrap();
        assert_eq!(report.total, 0);
        assert!(report.sections.is_empty());
        assert_eq!(o.phase(), SyncPhase::Done);
    }

    #[tokio::test]
    async fn empty_playlists_are_skipped_without_creating_anything() {
        let src = MockProvider::new("src").with_playlist(Playlist::new("p", "Nothing here"));
        let dst = Arc::new(MockProvider::new("dst"));
        let mut o = SyncOrchestrator::new(
            Arc::new(src),
            dst.clone(),
            Matcher::default(),
            SyncOptions::default(),
        );
        let report = o.run().await.unwrap();
        assert!(report.sections.is_empty());
        assert!(dst.playlists().is_empty());
    }

    #[tokio::test]
    async fn duplicate_source_entries_count_as_skipped() {
        let t = Track::new("s1", "Song A").with_album("X").with_duration_ms(200_000);
        let src = MockProvider::new("src")
            .with_playlist(Playlist::new("p", "Mix").with_tracks(vec![t.clone(), t.clone()]));
        let dst = MockProvider::new("dst").with_catalog(vec![Track::new("d1", "Song A")
            .with_album("X")
            .with_duration_ms(200_000)]);
        let report = orchestrator(src, dst).run().await.unwrap();
        let s = report.section("Mix").unwrap();
        assert_eq!(s.total, 2);
        assert_eq!(s.skipped, 1);
        assert_eq!(s.matched.len(), 1);
    }
}
