use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::Local;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::DataGateway;
use crate::config::CoordinatePolicy;
use crate::location::{AlertPresenter, DevicePlatform, GeolocationService};
use crate::models::{
    format_record_date, Coordinate, NextPlot, PendingObservation, PhenotypeEntry, Plot,
    PlotList, RecordDraft,
};
use crate::notify::{Notification, NotificationSink};

/// Where the pipeline gets the coordinate that tags a submission.
/// Implemented by [`GeolocationService`]; stubbed in tests.
#[allow(async_fn_in_trait)]
pub trait CoordinateSource: Send + Sync {
    /// `require` says whether a failure may surface remediation UX; with it
    /// unset the source resolves `None` quietly.
    async fn acquire(&self, require: bool) -> Option<Coordinate>;
}

impl<P, A, N> CoordinateSource for GeolocationService<P, A, N>
where
    P: DevicePlatform,
    A: AlertPresenter,
    N: NotificationSink,
{
    async fn acquire(&self, require: bool) -> Option<Coordinate> {
        self.validate_for_api(require).await
    }
}

/// Where a submission attempt currently stands. Terminal states stay visible
/// until the next attempt starts drafting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    Drafting,
    Validating,
    Rejected,
    Committing,
    Committed,
    CommitFailed,
}

/// Terminal result of one save call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// All entries committed. `advanced_to` carries the plot id the selection
    /// moved to when a next plot was requested and found.
    Committed { advanced_to: Option<i64> },
    /// The server rejected at least one entry; nothing was committed and the
    /// rejected values were cleared for re-entry.
    Rejected,
    /// Coordinate acquisition came back empty and the policy requires one.
    MissingCoordinate,
    /// A validate or commit call failed.
    Failed,
    /// There were no pending edits (or no plot selected) to submit.
    NothingToSubmit,
    /// Another submission is in flight; this call did nothing.
    Busy,
}

/// The selection and edit buffer the UI works against between saves.
#[derive(Debug, Default)]
struct EditBuffer {
    experiment_id: Option<i64>,
    experiment_type: String,
    plots: Vec<Plot>,
    active_plot_id: Option<i64>,
    /// Pending phenotype edits keyed by trait id. BTreeMap keeps draft
    /// assembly and warning order deterministic.
    pending: BTreeMap<i64, PendingObservation>,
    notes: Option<String>,
}

impl EditBuffer {
    fn active_plot(&self) -> Option<&Plot> {
        let id = self.active_plot_id?;
        self.plots.iter().find(|plot| plot.id == id)
    }
}

/// Validates then atomically commits a batch of trait observations.
///
/// One submission at a time; a second save while busy returns
/// [`SubmissionOutcome::Busy`]. No unvalidated entry ever reaches a commit
/// call.
pub struct SubmissionPipeline<G, C, N> {
    gateway: G,
    locations: C,
    sink: N,
    coordinate_policy: CoordinatePolicy,
    in_flight: AtomicBool,
    state_tx: watch::Sender<SubmissionState>,
    buffer: Mutex<EditBuffer>,
}

impl<G, C, N> SubmissionPipeline<G, C, N>
where
    G: DataGateway,
    C: CoordinateSource,
    N: NotificationSink,
{
    pub fn new(gateway: G, locations: C, sink: N) -> Self {
        let (state_tx, _) = watch::channel(SubmissionState::Idle);
        Self {
            gateway,
            locations,
            sink,
            coordinate_policy: CoordinatePolicy::default(),
            in_flight: AtomicBool::new(false),
            state_tx,
            buffer: Mutex::new(EditBuffer::default()),
        }
    }

    pub fn with_coordinate_policy(mut self, policy: CoordinatePolicy) -> Self {
        self.coordinate_policy = policy;
        self
    }

    // ------------------------------------------------------------------
    // Selection and edit buffer
    // ------------------------------------------------------------------

    /// Point the pipeline at an experiment. Clears the plot selection and any
    /// pending edits.
    pub fn select_experiment(&self, experiment_id: i64, experiment_type: impl Into<String>) {
        let mut buffer = self.lock_buffer();
        buffer.experiment_id = Some(experiment_id);
        buffer.experiment_type = experiment_type.into();
        buffer.plots.clear();
        buffer.active_plot_id = None;
        buffer.pending.clear();
        buffer.notes = None;
    }

    /// Load the plot list the selection navigates within.
    pub fn load_plot_list(&self, list: PlotList) {
        let mut buffer = self.lock_buffer();
        buffer.plots = list.plots;
        if let Some(id) = buffer.active_plot_id {
            if !buffer.plots.iter().any(|plot| plot.id == id) {
                buffer.active_plot_id = None;
            }
        }
    }

    /// Make a plot from the loaded list the active one. Pending edits are
    /// dropped - they belong to the previous plot.
    pub fn select_plot(&self, plot_id: i64) -> bool {
        let mut buffer = self.lock_buffer();
        if !buffer.plots.iter().any(|plot| plot.id == plot_id) {
            return false;
        }
        buffer.active_plot_id = Some(plot_id);
        buffer.pending.clear();
        buffer.notes = None;
        true
    }

    /// The currently selected plot, with its notes, images and trait lists.
    pub fn active_plot(&self) -> Option<Plot> {
        self.lock_buffer().active_plot().cloned()
    }

    /// Stage a value for one trait. `observation_id` is carried when the edit
    /// amends a value already recorded server-side.
    pub fn set_pending_value(
        &self,
        trait_id: i64,
        observation_id: Option<i64>,
        value: impl Into<String>,
    ) {
        self.lock_buffer().pending.insert(
            trait_id,
            PendingObservation {
                observation_id,
                trait_id,
                observed_value: value.into(),
            },
        );
    }

    /// Drop the staged value for one trait, forcing re-entry.
    pub fn clear_pending_value(&self, trait_id: i64) {
        self.lock_buffer().pending.remove(&trait_id);
    }

    /// Snapshot of the staged values, keyed by trait id.
    pub fn pending_values(&self) -> BTreeMap<i64, PendingObservation> {
        self.lock_buffer().pending.clone()
    }

    pub fn set_notes(&self, notes: Option<String>) {
        self.lock_buffer().notes = notes;
    }

    // ------------------------------------------------------------------
    // State observation
    // ------------------------------------------------------------------

    /// Observe state transitions of the submission machine.
    pub fn subscribe_states(&self) -> watch::Receiver<SubmissionState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> SubmissionState {
        *self.state_tx.borrow()
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Save the staged edits for the active plot.
    ///
    /// Acquires a coordinate, dry-runs the draft against the validate
    /// endpoint, then commits - first-time entries through a create call,
    /// amended ones through an update call, either or both. When
    /// `advance_to_next_plot` is set and the create response names a next
    /// plot present in the loaded list, the selection moves there without a
    /// refetch.
    pub async fn on_save_record(&self, advance_to_next_plot: bool) -> SubmissionOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("save dropped: another submission is in flight");
            return SubmissionOutcome::Busy;
        }
        let outcome = self.run_submission(advance_to_next_plot, false).await;
        self.in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    /// Update-only save for amending already recorded values. Same
    /// validate-then-partition path, but entries without a prior observation
    /// id are not eligible and no next-plot advance happens.
    pub async fn save_recorded_traits(&self) -> SubmissionOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("save dropped: another submission is in flight");
            return SubmissionOutcome::Busy;
        }
        let outcome = self.run_submission(false, true).await;
        self.in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run_submission(
        &self,
        advance_to_next_plot: bool,
        update_only: bool,
    ) -> SubmissionOutcome {
        self.set_state(SubmissionState::Drafting);

        let (mut draft, submitted_ids) = {
            let buffer = self.lock_buffer();
            let (Some(experiment_id), Some(plot_id)) =
                (buffer.experiment_id, buffer.active_plot_id)
            else {
                self.set_state(SubmissionState::Idle);
                return SubmissionOutcome::NothingToSubmit;
            };

            let entries: Vec<PhenotypeEntry> = buffer
                .pending
                .values()
                .filter(|pending| !update_only || pending.observation_id.is_some())
                .map(PhenotypeEntry::from_pending)
                .collect();
            if entries.is_empty() {
                self.set_state(SubmissionState::Idle);
                return SubmissionOutcome::NothingToSubmit;
            }
            let submitted_ids: Vec<i64> =
                entries.iter().map(|entry| entry.trait_id).collect();

            let draft = RecordDraft {
                plot_id,
                date: format_record_date(Local::now()),
                field_experiment_id: experiment_id,
                experiment_type: buffer.experiment_type.clone(),
                phenotypes: entries,
                notes: buffer.notes.clone(),
                applications: None,
                latitude: None,
                longitude: None,
            };
            (draft, submitted_ids)
        };

        let require = self.coordinate_policy == CoordinatePolicy::Require;
        match self.locations.acquire(require).await {
            Some(coordinate) => {
                draft.latitude = Some(coordinate.latitude);
                draft.longitude = Some(coordinate.longitude);
            }
            None => match self.coordinate_policy {
                CoordinatePolicy::Require => {
                    self.sink.emit(Notification::error(
                        "A location is required to save this record",
                    ));
                    self.set_state(SubmissionState::Idle);
                    return SubmissionOutcome::MissingCoordinate;
                }
                CoordinatePolicy::AllowMissing => {
                    debug!("saving record without a coordinate");
                }
            },
        }

        self.set_state(SubmissionState::Validating);
        let verdicts = match self.gateway.validate_traits(&draft).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "trait validation call failed");
                self.sink
                    .emit(Notification::error(format!("Failed to save record: {:#}", e)));
                self.set_state(SubmissionState::CommitFailed);
                return SubmissionOutcome::Failed;
            }
        };

        let (valid, invalid): (Vec<PhenotypeEntry>, Vec<PhenotypeEntry>) = draft
            .phenotypes
            .iter()
            .cloned()
            .partition(|entry| verdicts.status_for(entry.trait_id));

        if !invalid.is_empty() {
            // All-or-nothing: nothing reaches a commit call, and only the
            // rejected values are reset
            let mut buffer = self.lock_buffer();
            for entry in &invalid {
                self.sink.emit(Notification::warning(format!(
                    "Value \"{}\" was rejected and has been cleared",
                    entry.observed_value
                )));
                buffer.pending.remove(&entry.trait_id);
            }
            drop(buffer);
            debug!(rejected = invalid.len(), "submission rejected by validation");
            self.set_state(SubmissionState::Rejected);
            return SubmissionOutcome::Rejected;
        }

        let (updates, creates): (Vec<PhenotypeEntry>, Vec<PhenotypeEntry>) = valid
            .into_iter()
            .map(|mut entry| {
                entry.should_update = entry.observation_id.is_some();
                entry
            })
            .partition(|entry| entry.should_update);

        self.set_state(SubmissionState::Committing);
        let mut next_plot: Option<NextPlot> = None;

        if !creates.is_empty() {
            match self.gateway.create_traits(&draft.with_phenotypes(creates)).await {
                Ok(response) => next_plot = response.next_plot,
                Err(e) => {
                    warn!(error = %e, "create call failed");
                    self.sink
                        .emit(Notification::error(format!("Failed to save record: {:#}", e)));
                    self.set_state(SubmissionState::CommitFailed);
                    return SubmissionOutcome::Failed;
                }
            }
        }
        if !updates.is_empty() {
            if let Err(e) = self.gateway.update_traits(&draft.with_phenotypes(updates)).await {
                warn!(error = %e, "update call failed");
                self.sink
                    .emit(Notification::error(format!("Failed to save record: {:#}", e)));
                self.set_state(SubmissionState::CommitFailed);
                return SubmissionOutcome::Failed;
            }
        }

        let advanced_to = {
            let mut buffer = self.lock_buffer();
            for trait_id in &submitted_ids {
                buffer.pending.remove(trait_id);
            }
            if advance_to_next_plot {
                self.advance_selection(&mut buffer, next_plot)
            } else {
                None
            }
        };

        info!(plot_id = draft.plot_id, ?advanced_to, "record committed");
        self.sink
            .emit(Notification::success("Record saved successfully"));
        self.set_state(SubmissionState::Committed);
        SubmissionOutcome::Committed { advanced_to }
    }

    /// Move the selection to the server-named next plot when it exists in the
    /// loaded list. Its notes, images and unrecorded traits come along from
    /// the list - no refetch.
    fn advance_selection(
        &self,
        buffer: &mut EditBuffer,
        next_plot: Option<NextPlot>,
    ) -> Option<i64> {
        let next = next_plot?;
        let found = buffer
            .plots
            .iter()
            .any(|plot| plot.id == next.plot_id && plot.plot_number == next.plot_number);
        if !found {
            debug!(
                plot_id = next.plot_id,
                plot_number = next.plot_number,
                "next plot not in the loaded list, keeping selection"
            );
            return None;
        }
        buffer.active_plot_id = Some(next.plot_id);
        buffer.notes = None;
        Some(next.plot_id)
    }

    fn set_state(&self, state: SubmissionState) {
        debug!(?state, "submission state");
        self.state_tx.send_replace(state);
    }

    fn lock_buffer(&self) -> std::sync::MutexGuard<'_, EditBuffer> {
        self.buffer.lock().unwrap()
    }
}

// ============================================================================
// Tests
// ============================================================================
