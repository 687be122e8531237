//! Offline caching of location data.
//!
//! `LocationCacheManager` drives the fetch-then-persist pipeline that makes a
//! location usable without connectivity: experiment details first, then the
//! plot list, then the persisted offline flag. It owns the in-memory mirror
//! of per-location offline state that screens read from.

pub mod manager;

pub use manager::{CacheOutcome, CacheStep, LocationCacheManager, ToggleOutcome};
