//! Fieldcache - offline caching and record submission for field trials.
//!
//! This library keeps a field agronomist's device usable without
//! connectivity: it proactively downloads a location's experiment metadata
//! and plot list, persists them locally, tracks per-location offline state,
//! and reliably submits collected trait observations later - including when
//! location services are toggled mid-operation. The UI layer is an external
//! collaborator wired in through the traits at each seam.

pub mod api;
pub mod cache;
pub mod config;
pub mod location;
pub mod models;
pub mod notify;
pub mod record;
pub mod store;

pub use api::{ApiError, DataGateway, HttpGateway};
pub use cache::{CacheOutcome, CacheStep, LocationCacheManager, ToggleOutcome};
pub use config::{Config, CoordinatePolicy};
pub use location::{DevicePlatform, GeolocationService};
pub use notify::{Notification, NotificationKind, NotificationSink};
pub use record::{SubmissionOutcome, SubmissionPipeline, SubmissionState};
pub use store::{FileStore, PersistenceStore};
