use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::models::{ApiEnvelope, ExperimentDetails, LocationCacheKey, PlotList};

use super::PersistenceStore;

/// Consider cached reference data stale after 1 hour.
/// Staleness is advisory only - offline screens keep working with stale data.
const CACHE_STALE_MINUTES: i64 = 60;

/// A persisted payload together with the moment it was cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() > CACHE_STALE_MINUTES
    }
}

/// One row of the per-experiment offline-state file. The experiment type and
/// crop id are stored alongside the flag so a later sync pass can rebuild the
/// cache key without the UI's help.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OfflineStateRow {
    offline: bool,
    experiment_type: String,
    crop_id: i64,
    updated_at: DateTime<Utc>,
}

/// JSON-file-backed persistence store.
pub struct FileStore {
    cache_dir: PathBuf,
}

impl FileStore {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", name))
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<CachedData<T>>> {
        let path = self.cache_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {}", name))?;

        let cached: CachedData<T> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache file: {}", name))?;

        Ok(Some(cached))
    }

    fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let cached = CachedData::new(data);
        let path = self.cache_path(name);
        let contents = serde_json::to_string_pretty(&cached)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write cache file: {}", name))?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let path = self.cache_path(name);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete cache file: {}", name))?;
        }
        Ok(())
    }

    fn details_key(experiment_id: i64) -> String {
        format!("experiment_details_{}", experiment_id)
    }

    fn plots_key(location_id: i64) -> String {
        format!("plot_list_{}", location_id)
    }

    fn state_key(experiment_id: i64) -> String {
        format!("offline_state_{}", experiment_id)
    }

    fn load_state_rows(&self, experiment_id: i64) -> Result<HashMap<i64, OfflineStateRow>> {
        Ok(self
            .load::<HashMap<i64, OfflineStateRow>>(&Self::state_key(experiment_id))?
            .map(|cached| cached.data)
            .unwrap_or_default())
    }
}

impl PersistenceStore for FileStore {
    async fn save_offline_location_state(
        &self,
        key: &LocationCacheKey,
        offline: bool,
    ) -> Result<()> {
        let mut rows = self.load_state_rows(key.experiment_id)?;
        rows.insert(
            key.location_id,
            OfflineStateRow {
                offline,
                experiment_type: key.experiment_type.clone(),
                crop_id: key.crop_id,
                updated_at: Utc::now(),
            },
        );
        self.save(&Self::state_key(key.experiment_id), &rows)
    }

    async fn get_offline_location_states(
        &self,
        experiment_id: i64,
    ) -> Result<HashMap<i64, bool>> {
        let rows = self.load_state_rows(experiment_id)?;
        Ok(rows
            .into_iter()
            .map(|(location_id, row)| (location_id, row.offline))
            .collect())
    }

    async fn delete_offline_location_data(
        &self,
        experiment_id: i64,
        location_id: i64,
    ) -> Result<()> {
        debug!(experiment_id, location_id, "Deleting cached location data");
        self.remove(&Self::plots_key(location_id))?;
        self.remove(&Self::details_key(experiment_id))?;
        Ok(())
    }

    async fn save_location_experiment_details(
        &self,
        experiment_id: i64,
        details: &ExperimentDetails,
    ) -> Result<()> {
        self.save(&Self::details_key(experiment_id), details)
    }

    async fn save_location_plot_list(
        &self,
        location_id: i64,
        plots: &ApiEnvelope<PlotList>,
    ) -> Result<()> {
        self.save(&Self::plots_key(location_id), plots)
    }

    async fn load_location_experiment_details(
        &self,
        experiment_id: i64,
    ) -> Result<Option<CachedData<ExperimentDetails>>> {
        self.load(&Self::details_key(experiment_id))
    }

    async fn load_location_plot_list(
        &self,
        location_id: i64,
    ) -> Result<Option<CachedData<ApiEnvelope<PlotList>>>> {
        self.load(&Self::plots_key(location_id))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(experiment_id: i64, location_id: i64) -> LocationCacheKey {
        LocationCacheKey {
            experiment_id,
            location_id,
            experiment_type: "line".into(),
            crop_id: 2,
        }
    }

    fn details(id: i64) -> ExperimentDetails {
        ExperimentDetails {
            id,
            name: Some("Wheat trial".into()),
            experiment_type: Some("line".into()),
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_cached_data_age_display_just_now() {
        let cached = CachedData::new(vec![1, 2, 3]);
        assert_eq!(cached.age_display(), "just now");
    }

    #[test]
    fn test_cached_data_is_stale() {
        let fresh = CachedData::new(vec![1]);
        assert!(!fresh.is_stale());

        let mut old = CachedData::new(vec![1]);
        old.cached_at = Utc::now() - Duration::minutes(61);
        assert!(old.is_stale());
        assert_eq!(old.age_display(), "1h ago");
    }

    #[tokio::test]
    async fn test_offline_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();

        store
            .save_offline_location_state(&key(10, 5), true)
            .await
            .unwrap();
        store
            .save_offline_location_state(&key(10, 6), false)
            .await
            .unwrap();

        let states = store.get_offline_location_states(10).await.unwrap();
        assert_eq!(states.get(&5), Some(&true));
        assert_eq!(states.get(&6), Some(&false));

        // Unknown experiment yields an empty map, not an error
        assert!(store.get_offline_location_states(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_details_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();

        store
            .save_location_experiment_details(10, &details(10))
            .await
            .unwrap();
        let loaded = store
            .load_location_experiment_details(10)
            .await
            .unwrap()
            .expect("details should be cached");
        assert_eq!(loaded.data.id, 10);
        assert!(!loaded.is_stale());

        store.delete_offline_location_data(10, 5).await.unwrap();
        assert!(store
            .load_location_experiment_details(10)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_plot_list_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();

        let envelope: ApiEnvelope<PlotList> = serde_json::from_str(
            r#"{"status_code": 200, "data": {"plotData": [{"id": 7, "plotNumber": 101}]}}"#,
        )
        .unwrap();
        store.save_location_plot_list(5, &envelope).await.unwrap();

        let loaded = store
            .load_location_plot_list(5)
            .await
            .unwrap()
            .expect("plot list should be cached");
        assert_eq!(loaded.data.data.unwrap().plots.len(), 1);
    }
}
