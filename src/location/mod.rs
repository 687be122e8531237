//! Geolocation acquisition.
//!
//! `GeolocationService` turns the device's raw coordinate fetch into a
//! validated coordinate with bounded retries, exponential backoff, error
//! classification, and a resume-triggered retry for the "user went to
//! settings to turn location back on" flow.

pub mod platform;
pub mod service;

pub use platform::{
    AppLifecycle, DevicePlatform, RawLocationError, PERMISSION_DENIED_CODE,
    POSITION_UNAVAILABLE_CODE, SERVICES_DISABLED_CODE, TIMEOUT_CODE,
};
pub use service::{
    is_valid_location, AlertPresenter, GeolocationService, LocationAlert, LocationErrorKind,
    RemediationAction,
};
