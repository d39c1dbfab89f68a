use crate::models::Track;
use std::collections::HashSet;

/// Drop tracks whose native id was already seen, preserving first-seen order.
pub fn dedup_by_id(mut tracks: Vec<Track>) -> Vec<Track> {
    let mut seen = HashSet::new();
    tracks.retain(|t| seen.insert(t.id.clone()));
    tracks
}

/// Like [`dedup_by_id`] but in place; returns how many entries were removed.
pub fn dedup_in_place(tracks: &mut Vec<Track>) -> usize {
    let before = tracks.len();
    let mut seen = HashSet::new();
    tracks.retain(|t| seen.insert(t.id.clone()));
    before - tracks.len()
}

/// Append `extra` to `into`, skipping ids already present.
pub fn extend_unique(into: &mut Vec<Track>, extra: Vec<Track>) {
    let mut seen: HashSet<String> = into.iter().map(|t| t.id.clone()).collect();
    for t in extra {
        if seen.insert(t.id.clone()) {
            into.push(t);
        }
    }
}
