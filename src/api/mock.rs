use super::Provider;
use crate::error::AdapterError;
use crate::matcher::normalize;
use crate::models::{LikedSet, Playlist, Track};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

#[derive(Default)]
struct State {
    playlists: Vec<Playlist>,
    catalog: Vec<Track>,
    likes: Option<LikedSet>,
    failures: HashMap<String, VecDeque<AdapterError>>,
    calls: HashMap<String, usize>,
    created: usize,
}

/// In-memory catalog used by tests and dry runs.
///
/// Playlists and likes live behind a mutex so tests can inspect them after
/// a run; failures can be queued per operation name (`"search"`,
/// `"add_tracks"`, ...) and are returned before the operation touches state.
pub struct MockProvider {
    name: String,
    user: String,
    search_limit: usize,
    country: Option<String>,
    state: Mutex<State>,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            user: "mock-user".to_string(),
            search_limit: 10,
            country: None,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit;
        self
    }

    pub fn with_country(mut self, code: &str) -> Self {
        self.country = Some(code.to_string());
        self
    }

    /// Seed a playlist; an unset owner defaults to this provider's user.
    pub fn with_playlist(self, mut playlist: Playlist) -> Self {
        if playlist.owner.is_none() {
            playlist.owner = Some(self.user.clone());
        }
        self.lock().playlists.push(playlist);
        self
    }

    /// Tracks findable through `search`.
    pub fn with_catalog(self, tracks: Vec<Track>) -> Self {
        self.lock().catalog.extend(tracks);
        self
    }

    /// Enable the likes capability, seeded with `tracks`.
    pub fn with_likes(self, tracks: Vec<Track>) -> Self {
        self.lock().likes = Some(LikedSet::new(tracks));
        self
    }

    pub fn fail_next(&self, op: &str, err: AdapterError) {
        self.fail_times(op, err, 1);
    }

    pub fn fail_times(&self, op: &str, err: AdapterError, times: usize) {
        let mut st = self.lock();
        let q = st.failures.entry(op.to_string()).or_default();
        for _ in 0..times {
            q.push_back(err.clone());
        }
    }

    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn playlist(&self, name: &str) -> Option<Playlist> {
        self.lock().playlists.iter().find(|p| p.name == name).cloned()
    }

    pub fn playlists(&self) -> Vec<Playlist> {
        self.lock().playlists.clone()
    }

    pub fn likes(&self) -> Option<LikedSet> {
        self.lock().likes.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count the call and pop a queued failure for `op`, if any.
    fn enter(&self, op: &str) -> Result<MutexGuard<'_, State>, AdapterError> {
        let mut st = self.lock();
        *st.calls.entry(op.to_string()).or_default() += 1;
        if let Some(err) = st.failures.get_mut(op).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        Ok(st)
    }
}

fn loosely_equal(a: &str, b: &str) -> bool {
    let (a, b) = (normalize(a), normalize(b));
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn country_code(&self) -> Option<&str> {
        self.country.as_deref()
    }

    async fn list_playlists(&self, owner: Option<&str>) -> Result<Vec<Playlist>, AdapterError> {
        let st = self.enter("list_playlists")?;
        Ok(st
            .playlists
            .iter()
            .filter(|p| owner.map_or(true, |o| p.is_owned_by(o)))
            .cloned()
            .collect())
    }

    async fn get_or_create_playlist(&self, name: &str) -> Result<Playlist, AdapterError> {
        let mut st = self.enter("get_or_create_playlist")?;
        if let Some(p) = st
            .playlists
            .iter()
            .find(|p| p.name == name && p.is_owned_by(&self.user))
        {
            return Ok(p.clone());
        }
        st.created += 1;
        let p = Playlist::new(format!("{}-pl-{}", self.name, st.created), name).with_owner(&self.user);
        info!("MockProvider {}: created playlist {}", self.name, name);
        st.playlists.push(p.clone());
        Ok(p)
    }

    async fn list_tracks(&self, playlist: &Playlist) -> Result<Vec<Track>, AdapterError> {
        let st = self.enter("list_tracks")?;
        st.playlists
            .iter()
            .find(|p| p.id == playlist.id)
            .map(|p| p.tracks.clone())
            .ok_or_else(|| AdapterError::NotFound(format!("playlist {}", playlist.id)))
    }

    async fn add_tracks(&self, playlist: &Playlist, tracks: &[Track]) -> Result<(), AdapterError> {
        let mut st = self.enter("add_tracks")?;
        let target = st
            .playlists
            .iter_mut()
            .find(|p| p.id == playlist.id)
            .ok_or_else(|| AdapterError::NotFound(format!("playlist {}", playlist.id)))?;
        let before = target.tracks.len();
        crate::util::extend_unique(&mut target.tracks, tracks.to_vec());
        info!(
            "MockProvider {}: add_tracks {} -> {} new",
            self.name,
            playlist.name,
            target.tracks.len() - before
        );
        Ok(())
    }

    async fn search(&self, track: &Track) -> Result<Vec<Track>, AdapterError> {
        let st = self.enter("search")?;
        let isrc = track.normalized_isrc();
        Ok(st
            .catalog
            .iter()
            .filter(|c| {
                (isrc.is_some() && c.normalized_isrc() == isrc) || loosely_equal(&c.title, &track.title)
            })
            .take(self.search_limit)
            .cloned()
            .collect())
    }

    async fn get_likes(&self) -> Result<LikedSet, AdapterError> {
        let st = self.enter("get_likes")?;
        st.likes.clone().ok_or(AdapterError::CapabilityAbsent("likes"))
    }

    async fn add_like(&self, track: &Track) -> Result<(), AdapterError> {
        let mut st = self.enter("add_like")?;
        match st.likes.as_mut() {
            Some(likes) => {
                likes.insert(track.clone());
                Ok(())
            }
            None => Err(AdapterError::CapabilityAbsent("likes")),
        }
    }
}
