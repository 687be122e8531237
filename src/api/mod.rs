//! Remote data gateway.
//!
//! The `DataGateway` trait is the seam the cache manager and the submission
//! pipeline talk through; `HttpGateway` is the reqwest-backed implementation
//! for the field-trial REST API.
//!
//! Endpoints use JWT bearer token authentication supplied by the embedding
//! application's session layer.

pub mod error;
pub mod gateway;

pub use error::ApiError;
pub use gateway::{DataGateway, HttpGateway};
