//! Domain and wire types for experiments, plots, and trait records.
//!
//! Wire types mirror the gateway's camelCase JSON contract; the
//! `ApiEnvelope` wrapper carries the `status_code`/`data` pair every
//! endpoint responds with.

pub mod experiment;
pub mod record;

pub use experiment::{
    ApiEnvelope, ExperimentDetails, LocationCacheKey, Plot, PlotList, TraitField,
};
pub use record::{
    format_record_date, CommitResponse, Coordinate, NextPlot, PendingObservation,
    PhenotypeEntry, RecordDraft, ValidateResponse, ValidatedPhenotype,
};
