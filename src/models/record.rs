use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// A device coordinate in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

/// One pending trait edit, keyed by trait id in the pipeline's edit buffer.
/// `observation_id` is present when the edit amends a prior recorded value.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingObservation {
    pub observation_id: Option<i64>,
    pub trait_id: i64,
    pub observed_value: String,
}

/// One phenotype line inside a record submission.
///
/// `should_update` is assigned exactly once, by the validation-splitting step:
/// entries carrying a prior `observation_id` take the update path, the rest
/// the create path. It never goes over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhenotypeEntry {
    pub observation_id: Option<i64>,
    pub trait_id: i64,
    pub observed_value: String,
    #[serde(skip)]
    pub should_update: bool,
}

impl PhenotypeEntry {
    pub fn from_pending(pending: &PendingObservation) -> Self {
        Self {
            observation_id: pending.observation_id,
            trait_id: pending.trait_id,
            observed_value: pending.observed_value.clone(),
            should_update: false,
        }
    }
}

/// The payload submitted to the validate/create/update endpoints.
/// Assembled per save action and discarded on terminal success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    pub plot_id: i64,
    pub date: String,
    pub field_experiment_id: i64,
    pub experiment_type: String,
    pub phenotypes: Vec<PhenotypeEntry>,
    #[serde(default)]
    pub notes: Option<String>,
    pub applications: Option<serde_json::Value>,
    #[serde(rename = "lat")]
    pub latitude: Option<f64>,
    #[serde(rename = "long")]
    pub longitude: Option<f64>,
}

impl RecordDraft {
    /// Copy of this draft carrying only the given phenotype subset.
    pub fn with_phenotypes(&self, phenotypes: Vec<PhenotypeEntry>) -> Self {
        Self {
            phenotypes,
            ..self.clone()
        }
    }
}

/// Per-entry verdict from the validate endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedPhenotype {
    pub trait_id: i64,
    #[serde(default)]
    pub observed_value: Option<String>,
    pub validation_status: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response body of the validate endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateResponse {
    #[serde(default)]
    pub phenotypes: Vec<ValidatedPhenotype>,
}

impl ValidateResponse {
    /// Verdict for one trait; a trait absent from the response is treated as
    /// valid (the server only reports on entries it inspected).
    pub fn status_for(&self, trait_id: i64) -> bool {
        self.phenotypes
            .iter()
            .find(|p| p.trait_id == trait_id)
            .map(|p| p.validation_status)
            .unwrap_or(true)
    }
}

/// Server pointer to the next plot to record, returned by the create call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextPlot {
    pub plot_id: i64,
    pub plot_number: i64,
}

/// Response body of the create/update commit endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResponse {
    pub status_code: u16,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "nextPlotObject", default)]
    pub next_plot: Option<NextPlot>,
}

/// Format a timestamp the way the record endpoints expect:
/// `2026-08-27 14:03:09.123`.
pub fn format_record_date(at: DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}
