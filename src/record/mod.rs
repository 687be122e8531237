//! Trait record submission.
//!
//! `SubmissionPipeline` assembles a record draft from the current selection
//! and pending edits, tags it with a coordinate, dry-runs it against the
//! validate endpoint, and only then commits - split into create and update
//! calls. Invalid entries reset locally and abort the whole attempt.

pub mod pipeline;

pub use pipeline::{
    CoordinateSource, SubmissionOutcome, SubmissionPipeline, SubmissionState,
};
