//! Core library for music-catalog-sync: one-way playlist and likes sync between streaming catalogs.
pub mod api;
pub mod config;
pub mod error;
pub mod export;
pub mod matcher;
pub mod models;
pub mod report;
pub mod sync;
pub mod throttle;
pub mod util;
