use thiserror::Error;
use tokio::sync::watch;

use crate::models::Coordinate;

/// Platform error code: the user denied the location permission.
pub const PERMISSION_DENIED_CODE: i32 = 1;
/// Platform error code: no position could be determined.
pub const POSITION_UNAVAILABLE_CODE: i32 = 2;
/// Platform error code: the position request timed out.
pub const TIMEOUT_CODE: i32 = 3;
/// Platform error code: device location services are switched off.
pub const SERVICES_DISABLED_CODE: i32 = 4;

/// A raw failure from the device's positioning layer.
///
/// Codes are advisory - some providers only put the cause in the message, so
/// classification also inspects the text (see
/// [`LocationErrorKind::classify`](super::LocationErrorKind)).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RawLocationError {
    pub code: Option<i32>,
    pub message: String,
}

impl RawLocationError {
    pub fn new(code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn services_disabled() -> Self {
        Self::new(
            Some(SERVICES_DISABLED_CODE),
            "Location services are disabled. Please enable them to continue.",
        )
    }

    pub fn permission_denied() -> Self {
        Self::new(Some(PERMISSION_DENIED_CODE), "Location permission denied")
    }
}

/// Application lifecycle states, as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Active,
    Inactive,
    Background,
}

impl AppLifecycle {
    /// Whether a transition from this state to `Active` counts as a resume.
    pub fn is_resumable(self) -> bool {
        matches!(self, AppLifecycle::Inactive | AppLifecycle::Background)
    }
}

/// The device capabilities the geolocation service depends on. Implemented by
/// the host application's platform bindings.
#[allow(async_fn_in_trait)]
pub trait DevicePlatform: Send + Sync {
    /// One raw position fix from the device.
    async fn fetch_coordinate(&self) -> Result<Coordinate, RawLocationError>;

    /// Direct capability query for whether location services are on.
    /// `None` when the platform cannot answer (the service then falls back to
    /// a probe fix).
    async fn location_services_enabled(&self) -> Option<bool>;

    /// Current lifecycle state plus change notifications.
    fn lifecycle_events(&self) -> watch::Receiver<AppLifecycle>;

    /// Open the OS panel for this app's permissions.
    fn open_app_settings(&self);

    /// Open the OS panel for the device-wide location toggle.
    fn open_location_settings(&self);
}
