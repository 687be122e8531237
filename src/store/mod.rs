//! Local persistence for offline data.
//!
//! The `PersistenceStore` trait is the seam the cache manager writes through;
//! `FileStore` keeps everything as JSON files under a cache directory, each
//! payload wrapped with its cache timestamp.

pub mod file;

use std::collections::HashMap;

use anyhow::Result;

use crate::models::{ApiEnvelope, ExperimentDetails, LocationCacheKey, PlotList};

pub use file::{CachedData, FileStore};

/// Keyed reads and writes of cached payloads and offline flags.
#[allow(async_fn_in_trait)]
pub trait PersistenceStore: Send + Sync {
    /// Persist the offline flag for one (experiment, location) pair.
    async fn save_offline_location_state(
        &self,
        key: &LocationCacheKey,
        offline: bool,
    ) -> Result<()>;

    /// All persisted offline flags for one experiment, keyed by location id.
    async fn get_offline_location_states(&self, experiment_id: i64)
        -> Result<HashMap<i64, bool>>;

    /// Remove the cached details and plot list for one pair.
    async fn delete_offline_location_data(
        &self,
        experiment_id: i64,
        location_id: i64,
    ) -> Result<()>;

    async fn save_location_experiment_details(
        &self,
        experiment_id: i64,
        details: &ExperimentDetails,
    ) -> Result<()>;

    async fn save_location_plot_list(
        &self,
        location_id: i64,
        plots: &ApiEnvelope<PlotList>,
    ) -> Result<()>;

    async fn load_location_experiment_details(
        &self,
        experiment_id: i64,
    ) -> Result<Option<CachedData<ExperimentDetails>>>;

    async fn load_location_plot_list(
        &self,
        location_id: i64,
    ) -> Result<Option<CachedData<ApiEnvelope<PlotList>>>>;
}
