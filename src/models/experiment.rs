use serde::{Deserialize, Serialize};

/// Default image-per-plot limit when the server omits `maxNoOfImages`.
const DEFAULT_MAX_IMAGES_PER_PLOT: u32 = 5;

/// Identifies one cacheable (experiment, location) unit.
///
/// Created per user action and discarded afterwards; the experiment type and
/// crop id travel along because the persistence layer stores them next to the
/// offline flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationCacheKey {
    pub experiment_id: i64,
    pub location_id: i64,
    pub experiment_type: String,
    pub crop_id: i64,
}

/// Uniform response wrapper used by every gateway endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub status_code: u16,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "none")]
    pub data: Option<T>,
}

fn none<T>() -> Option<T> {
    None
}

impl<T> ApiEnvelope<T> {
    /// A 200 response whose `data` field is actually populated.
    pub fn has_data(&self) -> bool {
        self.status_code == 200 && self.data.is_some()
    }
}

/// Experiment metadata payload, cached keyed by experiment id.
///
/// Only the identifying fields are lifted out; the rest of the (large,
/// server-defined) payload is carried opaquely so it survives a cache
/// round trip untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentDetails {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub experiment_type: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Plot list payload for one location, cached keyed by location id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotList {
    #[serde(rename = "plotData", default)]
    pub plots: Vec<Plot>,
    #[serde(
        rename = "maxNoOfImages",
        default = "default_max_images_per_plot"
    )]
    pub max_images_per_plot: u32,
}

fn default_max_images_per_plot() -> u32 {
    DEFAULT_MAX_IMAGES_PER_PLOT
}

/// One plot within a location, with the trait fields still to record and the
/// ones already recorded. Enough structure for the next-plot carry-over on
/// save: notes, images and the unrecorded-trait list move across without a
/// refetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plot {
    pub id: i64,
    pub plot_number: i64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(rename = "imageUrls", default)]
    pub image_urls: Vec<String>,
    #[serde(rename = "unrecordedTraitData", default)]
    pub unrecorded_traits: Vec<TraitField>,
    #[serde(rename = "recordedTraitData", default)]
    pub recorded_traits: Vec<TraitField>,
}

/// One trait column on a plot. `observation_id` is present once a value has
/// been recorded server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraitField {
    pub trait_id: i64,
    #[serde(default)]
    pub trait_name: Option<String>,
    #[serde(default)]
    pub observation_id: Option<i64>,
    #[serde(default)]
    pub data_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_has_data() {
        let ok = ApiEnvelope {
            status_code: 200,
            message: None,
            data: Some(1),
        };
        assert!(ok.has_data());

        let empty: ApiEnvelope<i32> = ApiEnvelope {
            status_code: 200,
            message: None,
            data: None,
        };
        assert!(!empty.has_data());

        let error = ApiEnvelope {
            status_code: 500,
            message: Some("server error".into()),
            data: Some(1),
        };
        assert!(!error.has_data());
    }

    #[test]
    fn test_plot_list_defaults() {
        let json = r#"{"plotData": [{"id": 7, "plotNumber": 101}]}"#;
        let list: PlotList = serde_json::from_str(json).unwrap();
        assert_eq!(list.plots.len(), 1);
        assert_eq!(list.plots[0].id, 7);
        assert_eq!(list.plots[0].plot_number, 101);
        assert!(list.plots[0].unrecorded_traits.is_empty());
        assert_eq!(list.max_images_per_plot, 5);
    }

    #[test]
    fn test_experiment_details_preserves_unknown_fields() {
        let json = r#"{"id": 10, "name": "Wheat trial", "experimentType": "line", "season": "rabi"}"#;
        let details: ExperimentDetails = serde_json::from_str(json).unwrap();
        assert_eq!(details.id, 10);
        assert_eq!(details.experiment_type.as_deref(), Some("line"));
        assert_eq!(details.extra["season"], "rabi");

        // Round trip keeps the opaque fields
        let back = serde_json::to_value(&details).unwrap();
        assert_eq!(back["season"], "rabi");
    }
}
