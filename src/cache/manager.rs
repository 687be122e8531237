use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::DataGateway;
use crate::models::LocationCacheKey;
use crate::notify::{Notification, NotificationSink};
use crate::store::PersistenceStore;

/// Where a caching attempt currently stands. Exactly one step is active per
/// manager instance at any time; observers watch transitions through
/// [`LocationCacheManager::subscribe_steps`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStep {
    Idle,
    FetchingExperimentDetails,
    SavingExperimentDetails,
    FetchingPlots,
    SavingPlots,
    Completed,
    Error,
}

/// Terminal result of one `cache_location` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Details and plots both cached, offline flag set.
    Completed,
    /// Details cached and offline flag set, but the plot fetch failed.
    /// The details cache alone is still useful offline.
    CompletedWithoutPlots,
    /// The attempt hit a fatal error; the offline flag was not set.
    Failed,
    /// Another caching attempt is in flight; this call did nothing.
    Busy,
}

/// Result of `toggle_location_offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Cached(CacheOutcome),
    Removed,
}

/// Orchestrates fetch-then-persist of experiment details and plot lists per
/// (experiment, location) key, and owns the offline-flag map.
///
/// At most one caching attempt runs at a time; a second `cache_location`
/// while busy returns [`CacheOutcome::Busy`]. Cache and delete operations on
/// the same key are serialized through a per-key lock.
pub struct LocationCacheManager<G, S, N> {
    gateway: G,
    store: S,
    sink: N,
    is_caching: AtomicBool,
    /// In-memory mirror of the persisted offline flags:
    /// experiment id -> location id -> offline.
    states: Mutex<HashMap<i64, HashMap<i64, bool>>>,
    step_tx: watch::Sender<CacheStep>,
    key_locks: Mutex<HashMap<(i64, i64), Arc<tokio::sync::Mutex<()>>>>,
}

impl<G, S, N> LocationCacheManager<G, S, N>
where
    G: DataGateway,
    S: PersistenceStore,
    N: NotificationSink,
{
    pub fn new(gateway: G, store: S, sink: N) -> Self {
        let (step_tx, _) = watch::channel(CacheStep::Idle);
        Self {
            gateway,
            store,
            sink,
            is_caching: AtomicBool::new(false),
            states: Mutex::new(HashMap::new()),
            step_tx,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a caching attempt is currently in flight.
    pub fn is_caching(&self) -> bool {
        self.is_caching.load(Ordering::SeqCst)
    }

    /// Observe step transitions of the caching state machine.
    pub fn subscribe_steps(&self) -> watch::Receiver<CacheStep> {
        self.step_tx.subscribe()
    }

    pub fn current_step(&self) -> CacheStep {
        *self.step_tx.borrow()
    }

    fn set_step(&self, step: CacheStep) {
        debug!(?step, "cache step");
        // send_replace notifies even when no receiver is subscribed
        self.step_tx.send_replace(step);
    }

    fn key_lock(&self, experiment_id: i64, location_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap();
        // Entries nobody holds anymore would otherwise accumulate for every
        // key ever touched
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry((experiment_id, location_id))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Download and persist everything needed to use a location offline.
    ///
    /// No-op returning `Busy` when another attempt is already in flight; the
    /// caller decides whether to surface or retry. A failed attempt is not
    /// retried automatically - a fresh call starts a new attempt.
    pub async fn cache_location(&self, key: LocationCacheKey) -> CacheOutcome {
        if self.is_caching.swap(true, Ordering::SeqCst) {
            debug!(
                experiment_id = key.experiment_id,
                location_id = key.location_id,
                "cache_location dropped: another attempt is in flight"
            );
            return CacheOutcome::Busy;
        }

        let lock = self.key_lock(key.experiment_id, key.location_id);
        let _guard = lock.lock().await;

        let outcome = self.run_cache_attempt(&key).await;
        self.is_caching.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run_cache_attempt(&self, key: &LocationCacheKey) -> CacheOutcome {
        self.set_step(CacheStep::FetchingExperimentDetails);
        let details = match self
            .gateway
            .get_experiment_details(key.experiment_id, &key.experiment_type)
            .await
        {
            Ok(envelope) => match (envelope.status_code, envelope.data) {
                (200, Some(details)) => details,
                (200, None) => {
                    return self.fail(key, "experiment details returned no data".into());
                }
                (status, _) => {
                    return self.fail(
                        key,
                        format!("experiment details request returned status {}", status),
                    );
                }
            },
            Err(e) => {
                return self.fail(key, format!("failed to fetch experiment details: {:#}", e));
            }
        };

        self.set_step(CacheStep::SavingExperimentDetails);
        if let Err(e) = self
            .store
            .save_location_experiment_details(key.experiment_id, &details)
            .await
        {
            return self.fail(key, format!("failed to save experiment details: {:#}", e));
        }

        self.set_step(CacheStep::FetchingPlots);
        let mut plots_missing = false;
        match self
            .gateway
            .get_plot_list(key.location_id, &key.experiment_type)
            .await
        {
            Ok(envelope) if envelope.has_data() => {
                self.set_step(CacheStep::SavingPlots);
                if let Err(e) = self
                    .store
                    .save_location_plot_list(key.location_id, &envelope)
                    .await
                {
                    return self.fail(key, format!("failed to save plots: {:#}", e));
                }
            }
            Ok(envelope) => {
                // Non-critical: the details cache alone is still useful
                warn!(
                    location_id = key.location_id,
                    status = envelope.status_code,
                    "plot list unavailable, completing without plots"
                );
                plots_missing = true;
            }
            Err(e) => {
                warn!(
                    location_id = key.location_id,
                    error = %e,
                    "plot list fetch failed, completing without plots"
                );
                plots_missing = true;
            }
        }

        self.set_step(CacheStep::Completed);
        if let Err(e) = self.store.save_offline_location_state(key, true).await {
            return self.fail(key, format!("failed to save offline state: {:#}", e));
        }
        self.set_state(key.experiment_id, key.location_id, true);

        if plots_missing {
            self.sink.emit(Notification::warning(
                "Location cached without plot list; experiment details are available offline",
            ));
        } else {
            self.sink.emit(Notification::success(
                "Location cached successfully for offline use",
            ));
        }

        self.set_step(CacheStep::Idle);
        if plots_missing {
            CacheOutcome::CompletedWithoutPlots
        } else {
            CacheOutcome::Completed
        }
    }

    fn fail(&self, key: &LocationCacheKey, reason: String) -> CacheOutcome {
        warn!(
            experiment_id = key.experiment_id,
            location_id = key.location_id,
            reason = %reason,
            "caching attempt failed"
        );
        self.set_step(CacheStep::Error);
        self.sink.emit(Notification::error(format!(
            "Failed to cache location {}: {}",
            key.location_id, reason
        )));
        CacheOutcome::Failed
    }

    /// Remove a location's cached data and clear its offline flag.
    ///
    /// Serialized against a caching attempt for the same key; independent of
    /// attempts on other keys.
    pub async fn delete_offline_location(&self, key: &LocationCacheKey) -> Result<()> {
        let lock = self.key_lock(key.experiment_id, key.location_id);
        let _guard = lock.lock().await;

        let result = async {
            self.store
                .delete_offline_location_data(key.experiment_id, key.location_id)
                .await?;
            self.store.save_offline_location_state(key, false).await
        }
        .await;

        match result {
            Ok(()) => {
                self.set_state(key.experiment_id, key.location_id, false);
                self.sink.emit(Notification::success(
                    "Location data removed from offline storage",
                ));
                Ok(())
            }
            Err(e) => {
                self.sink.emit(Notification::error(format!(
                    "Failed to remove location data: {:#}",
                    e
                )));
                Err(e)
            }
        }
    }

    /// Flip a location's offline state: cached locations are deleted,
    /// uncached ones are cached. Decides from the in-memory mirror.
    pub async fn toggle_location_offline(
        &self,
        key: LocationCacheKey,
    ) -> Result<ToggleOutcome> {
        if self.is_location_offline(key.experiment_id, key.location_id) {
            self.delete_offline_location(&key).await?;
            Ok(ToggleOutcome::Removed)
        } else {
            Ok(ToggleOutcome::Cached(self.cache_location(key).await))
        }
    }

    /// Whether a location is flagged available offline. Defaults to false for
    /// unknown keys.
    pub fn is_location_offline(&self, experiment_id: i64, location_id: i64) -> bool {
        self.states
            .lock()
            .unwrap()
            .get(&experiment_id)
            .and_then(|locations| locations.get(&location_id))
            .copied()
            .unwrap_or(false)
    }

    /// Location ids flagged offline for one experiment, ascending.
    pub fn get_experiment_offline_locations(&self, experiment_id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .states
            .lock()
            .unwrap()
            .get(&experiment_id)
            .map(|locations| {
                locations
                    .iter()
                    .filter(|(_, &offline)| offline)
                    .map(|(&location_id, _)| location_id)
                    .collect()
            })
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Snapshot of the full offline-flag mirror.
    pub fn offline_location_states(&self) -> HashMap<i64, HashMap<i64, bool>> {
        self.states.lock().unwrap().clone()
    }

    /// Rehydrate the in-memory mirror for one experiment from the store.
    /// Used after navigation or restart. A store failure leaves the mirror
    /// untouched and yields an empty map.
    pub async fn load_offline_states(&self, experiment_id: i64) -> HashMap<i64, bool> {
        match self.store.get_offline_location_states(experiment_id).await {
            Ok(states) => {
                self.states
                    .lock()
                    .unwrap()
                    .insert(experiment_id, states.clone());
                states
            }
            Err(e) => {
                warn!(experiment_id, error = %e, "failed to load offline states");
                HashMap::new()
            }
        }
    }

    fn set_state(&self, experiment_id: i64, location_id: i64, offline: bool) {
        self.states
            .lock()
            .unwrap()
            .entry(experiment_id)
            .or_default()
            .insert(location_id, offline);
    }
}

// ============================================================================
// Tests
// ============================================================================
