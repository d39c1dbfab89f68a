//! Run reports: per-section outcomes, run totals and the debug JSON dumps.

use crate::error::SyncError;
use crate::matcher::MatchMethod;
use crate::models::{Playlist, Track};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A source track and the destination track it was written as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub source: Track,
    pub destination: Track,
    #[serde(flatten)]
    pub method: MatchMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTrack {
    pub track: Track,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Playlist,
    Likes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Named in `skip_playlists`.
    SkipList,
    /// Source playlist not owned by the configured owner.
    NotOwned,
    /// Same-named destination playlist belongs to somebody else.
    DestinationNotOwned,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedPlaylist {
    pub name: String,
    pub reason: SkipReason,
    pub tracks: usize,
}

/// Outcome of one playlist, or of the likes pass.
///
/// Every considered source track lands in exactly one of `matched`,
/// `unmatched`, `failed`, `already_present` or `skipped`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionReport {
    pub name: String,
    pub kind: SectionKind,
    /// Source tracks considered, duplicates included.
    pub total: usize,
    /// Tracks that reached a destination search.
    pub attempted: usize,
    pub already_present: usize,
    /// Searched tracks whose match was already present or queued. Also
    /// counted in `already_present`; a found track still converts.
    #[serde(default)]
    pub resolved_present: usize,
    /// Duplicate source entries collapsed before matching.
    pub skipped: usize,
    pub matched: Vec<MatchedPair>,
    pub unmatched: Vec<Track>,
    pub failed: Vec<FailedTrack>,
    /// Searched source tracks that carried no album name.
    pub no_album: Vec<Track>,
    /// Destination likes added by `like_all`.
    pub liked: usize,
    /// Set when the whole section was abandoned.
    pub error: Option<String>,
}

impl SectionReport {
    pub fn new(name: impl Into<String>, kind: SectionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            total: 0,
            attempted: 0,
            already_present: 0,
            resolved_present: 0,
            skipped: 0,
            matched: Vec::new(),
            unmatched: Vec::new(),
            failed: Vec::new(),
            no_album: Vec::new(),
            liked: 0,
            error: None,
        }
    }

    /// Searched tracks that found a destination track, whether newly written
    /// or already there.
    pub fn converted(&self) -> usize {
        self.matched.len() + self.resolved_present
    }

    /// Converted over attempted; 1.0 when nothing needed a search.
    pub fn conversion_rate(&self) -> f64 {
        if self.attempted == 0 {
            1.0
        } else {
            self.converted() as f64 / self.attempted as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub source: String,
    pub destination: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub skipped: usize,
    pub already_present: usize,
    pub failed: usize,
    pub sections: Vec<SectionReport>,
    pub skipped_playlists: Vec<SkippedPlaylist>,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn section(&self, name: &str) -> Option<&SectionReport> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn likes(&self) -> Option<&SectionReport> {
        self.sections.iter().find(|s| s.kind == SectionKind::Likes)
    }

    pub fn unmatched_tracks(&self) -> impl Iterator<Item = &Track> {
        self.sections.iter().flat_map(|s| s.unmatched.iter())
    }

    pub fn conversion_rate(&self) -> f64 {
        let attempted: usize = self.sections.iter().map(|s| s.attempted).sum();
        let converted: usize = self.sections.iter().map(SectionReport::converted).sum();
        if attempted == 0 {
            1.0
        } else {
            converted as f64 / attempted as f64
        }
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{} -> {}: {} tracks, {} matched, {} unmatched, {} already present, {} skipped, {} failed{}",
            self.source,
            self.destination,
            self.total,
            self.matched,
            self.unmatched,
            self.already_present,
            self.skipped,
            self.failed,
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

/// Accumulates sections during a run.
pub(crate) struct ReportBuilder {
    run_id: Uuid,
    source: String,
    destination: String,
    started_at: DateTime<Utc>,
    sections: Vec<SectionReport>,
    skipped_playlists: Vec<SkippedPlaylist>,
    cancelled: bool,
}

impl ReportBuilder {
    pub fn new(run_id: Uuid, source: &str, destination: &str) -> Self {
        Self {
            run_id,
            source: source.to_string(),
            destination: destination.to_string(),
            started_at: Utc::now(),
            sections: Vec::new(),
            skipped_playlists: Vec::new(),
            cancelled: false,
        }
    }

    pub fn skip_playlist(&mut self, playlist: &Playlist, reason: SkipReason) {
        self.skipped_playlists.push(SkippedPlaylist {
            name: playlist.name.clone(),
            reason,
            tracks: playlist.tracks.len(),
        });
    }

    pub fn push_section(&mut self, section: SectionReport) {
        self.sections.push(section);
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn snapshot(&self) -> SyncReport {
        let skipped_outside: usize = self.skipped_playlists.iter().map(|p| p.tracks).sum();
        let sum = |f: fn(&SectionReport) -> usize| self.sections.iter().map(f).sum::<usize>();
        let skipped = sum(|s| s.skipped) + skipped_outside;
        SyncReport {
            run_id: self.run_id,
            source: self.source.clone(),
            destination: self.destination.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            total: sum(|s| s.total) + skipped_outside,
            matched: sum(|s| s.matched.len()),
            unmatched: sum(|s| s.unmatched.len()),
            skipped,
            already_present: sum(|s| s.already_present),
            failed: sum(|s| s.failed.len()),
            sections: self.sections.clone(),
            skipped_playlists: self.skipped_playlists.clone(),
            cancelled: self.cancelled,
        }
    }

    pub fn finish(self) -> SyncReport {
        self.snapshot()
    }
}

/// Writes the per-run JSON dumps used to inspect matching quality.
pub struct DebugReportWriter {
    dir: PathBuf,
}

impl DebugReportWriter {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn dump(&self, file: &str, value: &Value) -> Result<(), SyncError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join(file), serde_json::to_string_pretty(value)?)?;
        Ok(())
    }

    pub fn write(&self, report: &SyncReport) -> Result<(), SyncError> {
        let mut rates = Map::new();
        let mut missing = Map::new();
        let mut new_songs = Map::new();
        let mut no_album = Map::new();
        for s in &report.sections {
            rates.insert(
                s.name.clone(),
                json!({
                    "percentage": s.conversion_rate(),
                    "number": format!("{}/{}", s.converted(), s.attempted),
                }),
            );
            if !s.unmatched.is_empty() {
                missing.insert(s.name.clone(), serde_json::to_value(&s.unmatched)?);
            }
            if !s.matched.is_empty() {
                new_songs.insert(s.name.clone(), serde_json::to_value(&s.matched)?);
            }
            if !s.no_album.is_empty() {
                no_album.insert(s.name.clone(), serde_json::to_value(&s.no_album)?);
            }
        }
        self.dump("conversion_rate.json", &Value::Object(rates))?;
        self.dump("missing_songs.json", &Value::Object(missing))?;
        self.dump("new_songs.json", &Value::Object(new_songs))?;
        self.dump("songs_with_no_albums.json", &Value::Object(no_album))?;
        self.dump("sync_report.json", &serde_json::to_value(report)?)?;
        Ok(())
    }
}
