use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a platform adapter call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("capability not supported by this platform: {0}")]
    CapabilityAbsent(&'static str),
}

impl AdapterError {
    /// Rate limits and network/5xx failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::RateLimited { .. } | AdapterError::Transient(_))
    }

    /// Failures that end the run for the whole platform pairing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AdapterError::Unauthorized(_))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            AdapterError::Invalid(format!("unexpected response body: {}", e))
        } else {
            AdapterError::Transient(e.to_string())
        }
    }
}

/// Where in a run an error happened: platform, then optionally playlist and track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub platform: String,
    pub playlist: Option<String>,
    pub track: Option<String>,
}

impl Location {
    pub fn platform(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            playlist: None,
            track: None,
        }
    }

    pub fn playlist(mut self, playlist: impl Into<String>) -> Self {
        self.playlist = Some(playlist.into());
        self
    }

    pub fn track(mut self, track: impl Into<String>) -> Self {
        self.track = Some(track.into());
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "platform {}", self.platform)?;
        if let Some(p) = &self.playlist {
            write!(f, ", playlist \"{}\"", p)?;
        }
        if let Some(t) = &self.track {
            write!(f, ", track \"{}\"", t)?;
        }
        Ok(())
    }
}

/// Run-level failures surfaced to the caller of a sync, import or export.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("authentication failed ({location}): {source}")]
    AuthFailure {
        location: Location,
        #[source]
        source: AdapterError,
    },

    #[error("adapter call failed ({location}): {source}")]
    Adapter {
        location: Location,
        #[source]
        source: AdapterError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Wrap an adapter failure, routing auth failures to [`SyncError::AuthFailure`].
    pub fn from_adapter(location: Location, source: AdapterError) -> Self {
        if source.is_fatal() {
            SyncError::AuthFailure { location, source }
        } else {
            SyncError::Adapter { location, source }
        }
    }
}
