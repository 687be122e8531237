use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::models::Coordinate;
use crate::notify::{Notification, NotificationSink};

use super::platform::{
    AppLifecycle, DevicePlatform, RawLocationError, PERMISSION_DENIED_CODE,
    SERVICES_DISABLED_CODE,
};

/// Extra attempts after the first failed fix.
pub const DEFAULT_RETRY_COUNT: u32 = 2;
/// Backoff before retry N is `BACKOFF_BASE_MS << N` (1s, 2s, 4s, ...).
const BACKOFF_BASE_MS: u64 = 1000;
/// How long to wait for the user to come back from the settings screen.
const RESUME_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A coordinate is usable when both axes are finite, inside WGS84 bounds, and
/// not the (0, 0) null-island default some providers report before a real fix.
pub fn is_valid_location(coordinate: &Coordinate) -> bool {
    let Coordinate {
        latitude,
        longitude,
    } = *coordinate;
    if !latitude.is_finite() || !longitude.is_finite() {
        return false;
    }
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return false;
    }
    latitude != 0.0 || longitude != 0.0
}

/// Why a position fix failed, reduced to the categories the UI reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationErrorKind {
    ServicesDisabled,
    PermissionDenied,
    Unavailable,
}

impl LocationErrorKind {
    /// Codes win when present; otherwise fall back to sniffing the message,
    /// since some providers only report the cause as text.
    pub fn classify(error: &RawLocationError) -> Self {
        match error.code {
            Some(SERVICES_DISABLED_CODE) => return Self::ServicesDisabled,
            Some(PERMISSION_DENIED_CODE) => return Self::PermissionDenied,
            _ => {}
        }
        let message = error.message.to_lowercase();
        if message.contains("location services") || message.contains("disabled") {
            Self::ServicesDisabled
        } else if message.contains("permission") || message.contains("denied") {
            Self::PermissionDenied
        } else {
            Self::Unavailable
        }
    }
}

/// What the confirm button of a location alert does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationAction {
    OpenAppSettings,
    OpenLocationSettings,
    Dismiss,
}

/// A blocking dialog asking the user to fix their location setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationAlert {
    pub kind: LocationErrorKind,
    pub title: String,
    pub message: String,
    pub confirm_label: String,
    pub action: RemediationAction,
}

impl LocationAlert {
    pub fn for_kind(kind: LocationErrorKind) -> Self {
        match kind {
            LocationErrorKind::ServicesDisabled => Self {
                kind,
                title: "Enable Location Services".into(),
                message: "Location services are turned off. Enable them in settings, then \
                          return to the app to continue."
                    .into(),
                confirm_label: "Open Settings".into(),
                action: RemediationAction::OpenLocationSettings,
            },
            LocationErrorKind::PermissionDenied => Self {
                kind,
                title: "Location Permission Required".into(),
                message: "This app needs location access to record field data. Grant the \
                          permission in settings."
                    .into(),
                confirm_label: "Open Settings".into(),
                action: RemediationAction::OpenAppSettings,
            },
            LocationErrorKind::Unavailable => Self {
                kind,
                title: "Location Unavailable".into(),
                message: "Your position could not be determined. Move to an open area and \
                          try again."
                    .into(),
                confirm_label: "OK".into(),
                action: RemediationAction::Dismiss,
            },
        }
    }
}

/// Presents a [`LocationAlert`] to the user. Returns `true` when the user
/// chose the confirm action rather than dismissing.
pub trait AlertPresenter: Send + Sync {
    fn present(&self, alert: &LocationAlert) -> bool;
}

impl<T: AlertPresenter + ?Sized> AlertPresenter for std::sync::Arc<T> {
    fn present(&self, alert: &LocationAlert) -> bool {
        (**self).present(alert)
    }
}

/// Turns raw device fixes into validated coordinates.
///
/// Retries with exponential backoff, classifies failures, and supports one
/// resume-triggered retry after the user leaves for the settings screen and
/// comes back.
pub struct GeolocationService<P, A, N> {
    platform: P,
    alerts: A,
    sink: N,
    retry_count: u32,
    last_error: Mutex<Option<RawLocationError>>,
    /// The one outstanding resume waiter. Replacing the sender drops it,
    /// which wakes and cancels the previous waiter.
    pending_resume: Mutex<Option<(u64, oneshot::Sender<()>)>>,
    resume_generation: AtomicU64,
}

impl<P, A, N> GeolocationService<P, A, N>
where
    P: DevicePlatform,
    A: AlertPresenter,
    N: NotificationSink,
{
    pub fn new(platform: P, alerts: A, sink: N) -> Self {
        Self {
            platform,
            alerts,
            sink,
            retry_count: DEFAULT_RETRY_COUNT,
            last_error: Mutex::new(None),
            pending_resume: Mutex::new(None),
            resume_generation: AtomicU64::new(0),
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// The most recent failure, if the last acquisition did not succeed.
    pub fn last_error(&self) -> Option<RawLocationError> {
        self.last_error.lock().unwrap().clone()
    }

    fn last_error_kind(&self) -> Option<LocationErrorKind> {
        self.last_error().as_ref().map(LocationErrorKind::classify)
    }

    fn set_last_error(&self, error: Option<RawLocationError>) {
        *self.last_error.lock().unwrap() = error;
    }

    /// Fetch a coordinate, retrying up to `retries` extra times with
    /// exponential backoff. Returns `None` when every attempt failed or
    /// produced an invalid coordinate.
    ///
    /// A services-disabled failure aborts immediately: more attempts cannot
    /// succeed until the user flips the toggle.
    pub async fn get_validated_coordinate(&self, retries: u32) -> Option<Coordinate> {
        let attempts = retries + 1;
        for attempt in 0..attempts {
            match self.platform.fetch_coordinate().await {
                Ok(coordinate) if is_valid_location(&coordinate) => {
                    self.set_last_error(None);
                    return Some(coordinate);
                }
                Ok(coordinate) => {
                    debug!(
                        latitude = coordinate.latitude,
                        longitude = coordinate.longitude,
                        attempt,
                        "Discarding invalid coordinate"
                    );
                    self.set_last_error(Some(RawLocationError::new(
                        None,
                        format!(
                            "Invalid coordinate: {}, {}",
                            coordinate.latitude, coordinate.longitude
                        ),
                    )));
                }
                Err(error) => {
                    let kind = LocationErrorKind::classify(&error);
                    warn!(attempt, code = ?error.code, message = %error.message, "Position fix failed");
                    self.set_last_error(Some(error));
                    if kind == LocationErrorKind::ServicesDisabled {
                        return None;
                    }
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(Duration::from_millis(BACKOFF_BASE_MS << attempt)).await;
            }
        }
        None
    }

    /// Whether device location services are currently on.
    ///
    /// Prefers the platform's direct answer; when that is unavailable, probes
    /// with a single fix and treats only a disabled-classified failure as off.
    pub async fn check_location_services_enabled(&self) -> bool {
        if let Some(enabled) = self.platform.location_services_enabled().await {
            return enabled;
        }
        match self.platform.fetch_coordinate().await {
            Ok(_) => true,
            Err(error) => {
                LocationErrorKind::classify(&error) != LocationErrorKind::ServicesDisabled
            }
        }
    }

    /// Surface the last failure to the user and, if they confirm, open the
    /// relevant settings screen.
    pub fn show_location_error(&self) {
        let kind = self
            .last_error_kind()
            .unwrap_or(LocationErrorKind::Unavailable);
        let alert = LocationAlert::for_kind(kind);
        if self.alerts.present(&alert) {
            self.perform_remediation(alert.action);
        }
    }

    fn perform_remediation(&self, action: RemediationAction) {
        match action {
            RemediationAction::OpenAppSettings => self.platform.open_app_settings(),
            RemediationAction::OpenLocationSettings => self.platform.open_location_settings(),
            RemediationAction::Dismiss => {}
        }
    }

    /// Acquire a coordinate for a record submission.
    ///
    /// With `require` set, a failure surfaces one toast plus an alert, and
    /// when the cause is services-disabled the service waits up to five
    /// minutes for the app to come back to the foreground with services on,
    /// then makes exactly one more attempt. With `require` unset the
    /// coordinate is optional: a failure resolves to `None` quietly, with no
    /// toast, no alert, and no resume wait.
    pub async fn validate_for_api(&self, require: bool) -> Option<Coordinate> {
        if let Some(coordinate) = self.get_validated_coordinate(self.retry_count).await {
            return Some(coordinate);
        }
        if !require {
            debug!("coordinate unavailable, caller treats it as optional");
            return None;
        }

        let kind = self
            .last_error_kind()
            .unwrap_or(LocationErrorKind::Unavailable);
        self.sink.emit(Notification::error(failure_toast(kind)));
        self.show_location_error();

        if kind == LocationErrorKind::ServicesDisabled {
            return self.await_resume_retry().await;
        }
        None
    }

    /// Wait for an inactive/background -> active transition with location
    /// services back on, then retry once. A newer registration or the
    /// five-minute deadline cancels the wait.
    async fn await_resume_retry(&self) -> Option<Coordinate> {
        let generation = self.resume_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        {
            // Dropping the previous sender wakes its waiter with Err
            *self.pending_resume.lock().unwrap() = Some((generation, cancel_tx));
        }

        let mut lifecycle = self.platform.lifecycle_events();
        let mut previous = *lifecycle.borrow_and_update();
        let deadline = tokio::time::Instant::now() + RESUME_TIMEOUT;

        let result = loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    debug!("Resume retry superseded by a newer registration");
                    break None;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!("Resume retry timed out");
                    break None;
                }
                changed = lifecycle.changed() => {
                    if changed.is_err() {
                        break None;
                    }
                    let current = *lifecycle.borrow_and_update();
                    let resumed = previous.is_resumable() && current == AppLifecycle::Active;
                    previous = current;
                    if !resumed {
                        continue;
                    }
                    if self.check_location_services_enabled().await {
                        break self.get_validated_coordinate(0).await;
                    }
                    // Services still off, keep waiting for the next resume
                }
            }
        };

        let mut pending = self.pending_resume.lock().unwrap();
        if matches!(pending.as_ref(), Some((g, _)) if *g == generation) {
            *pending = None;
        }
        result
    }
}

fn failure_toast(kind: LocationErrorKind) -> &'static str {
    match kind {
        LocationErrorKind::ServicesDisabled => {
            "Please enable device location and return to the app."
        }
        LocationErrorKind::PermissionDenied => "Please grant location permission to continue.",
        LocationErrorKind::Unavailable => "Location access is required to record data",
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemorySink;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use tokio::sync::watch;

    fn coord(latitude: f64, longitude: f64) -> Coordinate {
        Coordinate {
            latitude,
            longitude,
        }
    }

    struct FakePlatform {
        responses: Mutex<VecDeque<Result<Coordinate, RawLocationError>>>,
        fetch_count: AtomicU32,
        services_enabled: Mutex<Option<bool>>,
        lifecycle_tx: watch::Sender<AppLifecycle>,
    }

    impl FakePlatform {
        fn new(responses: Vec<Result<Coordinate, RawLocationError>>) -> Self {
            let (lifecycle_tx, _) = watch::channel(AppLifecycle::Active);
            Self {
                responses: Mutex::new(responses.into()),
                fetch_count: AtomicU32::new(0),
                services_enabled: Mutex::new(None),
                lifecycle_tx,
            }
        }

        fn with_services(self, enabled: Option<bool>) -> Self {
            *self.services_enabled.lock().unwrap() = enabled;
            self
        }

        fn set_services(&self, enabled: Option<bool>) {
            *self.services_enabled.lock().unwrap() = enabled;
        }

        fn fetches(&self) -> u32 {
            self.fetch_count.load(Ordering::SeqCst)
        }

        fn set_lifecycle(&self, state: AppLifecycle) {
            self.lifecycle_tx.send(state).unwrap();
        }
    }

    impl DevicePlatform for &FakePlatform {
        async fn fetch_coordinate(&self) -> Result<Coordinate, RawLocationError> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RawLocationError::new(None, "no fix available")))
        }

        async fn location_services_enabled(&self) -> Option<bool> {
            *self.services_enabled.lock().unwrap()
        }

        fn lifecycle_events(&self) -> watch::Receiver<AppLifecycle> {
            self.lifecycle_tx.subscribe()
        }

        fn open_app_settings(&self) {}

        fn open_location_settings(&self) {}
    }

    struct RecordingPresenter {
        alerts: Mutex<Vec<LocationAlert>>,
        confirm: bool,
    }

    impl RecordingPresenter {
        fn new(confirm: bool) -> Self {
            Self {
                alerts: Mutex::new(Vec::new()),
                confirm,
            }
        }
    }

    impl AlertPresenter for &RecordingPresenter {
        fn present(&self, alert: &LocationAlert) -> bool {
            self.alerts.lock().unwrap().push(alert.clone());
            self.confirm
        }
    }

    fn service<'a>(
        platform: &'a FakePlatform,
        presenter: &'a RecordingPresenter,
        sink: Arc<MemorySink>,
    ) -> GeolocationService<&'a FakePlatform, &'a RecordingPresenter, Arc<MemorySink>> {
        GeolocationService::new(platform, presenter, sink)
    }

    #[test]
    fn test_is_valid_location() {
        assert!(is_valid_location(&coord(48.137, 11.575)));
        assert!(is_valid_location(&coord(-33.868, 151.209)));
        assert!(is_valid_location(&coord(0.0, 11.575)));

        // Null island
        assert!(!is_valid_location(&coord(0.0, 0.0)));
        // Out of bounds
        assert!(!is_valid_location(&coord(90.1, 0.0)));
        assert!(!is_valid_location(&coord(-91.0, 10.0)));
        assert!(!is_valid_location(&coord(10.0, 180.5)));
        assert!(!is_valid_location(&coord(10.0, -200.0)));
        // Non-finite
        assert!(!is_valid_location(&coord(f64::NAN, 10.0)));
        assert!(!is_valid_location(&coord(10.0, f64::INFINITY)));
    }

    #[test]
    fn test_classify_prefers_code_then_message() {
        assert_eq!(
            LocationErrorKind::classify(&RawLocationError::services_disabled()),
            LocationErrorKind::ServicesDisabled
        );
        assert_eq!(
            LocationErrorKind::classify(&RawLocationError::permission_denied()),
            LocationErrorKind::PermissionDenied
        );
        assert_eq!(
            LocationErrorKind::classify(&RawLocationError::new(
                None,
                "Location services are disabled"
            )),
            LocationErrorKind::ServicesDisabled
        );
        assert_eq!(
            LocationErrorKind::classify(&RawLocationError::new(None, "User denied access")),
            LocationErrorKind::PermissionDenied
        );
        assert_eq!(
            LocationErrorKind::classify(&RawLocationError::new(Some(3), "request timed out")),
            LocationErrorKind::Unavailable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_backoff_then_succeeds() {
        let platform = FakePlatform::new(vec![
            Ok(coord(0.0, 0.0)),
            Err(RawLocationError::new(None, "no fix")),
            Ok(coord(48.0, 11.0)),
        ]);
        let presenter = RecordingPresenter::new(false);
        let sink = Arc::new(MemorySink::new());
        let svc = service(&platform, &presenter, sink.clone());

        let started = tokio::time::Instant::now();
        let result = svc.get_validated_coordinate(2).await;

        assert_eq!(result, Some(coord(48.0, 11.0)));
        assert_eq!(platform.fetches(), 3);
        // 1s after the first failure, 2s after the second
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert!(svc.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_services_disabled_aborts_without_backoff() {
        let platform = FakePlatform::new(vec![Err(RawLocationError::services_disabled())]);
        let presenter = RecordingPresenter::new(false);
        let sink = Arc::new(MemorySink::new());
        let svc = service(&platform, &presenter, sink.clone());

        let started = tokio::time::Instant::now();
        let result = svc.get_validated_coordinate(2).await;

        assert!(result.is_none());
        assert_eq!(platform.fetches(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(
            svc.last_error_kind(),
            Some(LocationErrorKind::ServicesDisabled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_none() {
        let platform = FakePlatform::new(vec![
            Err(RawLocationError::new(None, "no fix")),
            Err(RawLocationError::new(None, "no fix")),
            Err(RawLocationError::new(None, "no fix")),
        ]);
        let presenter = RecordingPresenter::new(false);
        let sink = Arc::new(MemorySink::new());
        let svc = service(&platform, &presenter, sink.clone());

        assert!(svc.get_validated_coordinate(2).await.is_none());
        assert_eq!(platform.fetches(), 3);
    }

    #[tokio::test]
    async fn test_services_check_prefers_platform_answer() {
        let platform =
            FakePlatform::new(vec![Err(RawLocationError::services_disabled())])
                .with_services(Some(true));
        let presenter = RecordingPresenter::new(false);
        let sink = Arc::new(MemorySink::new());
        let svc = service(&platform, &presenter, sink.clone());

        assert!(svc.check_location_services_enabled().await);
        // The direct answer means no probe fix was spent
        assert_eq!(platform.fetches(), 0);
    }

    #[tokio::test]
    async fn test_services_check_probe_only_trusts_disabled_failures() {
        let platform = FakePlatform::new(vec![Err(RawLocationError::new(None, "no fix"))]);
        let presenter = RecordingPresenter::new(false);
        let sink = Arc::new(MemorySink::new());
        let svc = service(&platform, &presenter, sink.clone());

        // An unclassified failure is not proof that services are off
        assert!(svc.check_location_services_enabled().await);

        let platform = FakePlatform::new(vec![Err(RawLocationError::services_disabled())]);
        let svc = service(&platform, &presenter, sink);
        assert!(!svc.check_location_services_enabled().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_for_api_emits_one_toast_and_alert() {
        let platform = FakePlatform::new(vec![
            Err(RawLocationError::new(None, "no fix")),
            Err(RawLocationError::new(None, "no fix")),
            Err(RawLocationError::new(None, "no fix")),
        ]);
        let presenter = RecordingPresenter::new(false);
        let sink = Arc::new(MemorySink::new());
        let svc = service(&platform, &presenter, sink.clone());

        assert!(svc.validate_for_api(true).await.is_none());

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].message.contains("Location access is required"));

        let alerts = presenter.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, LocationErrorKind::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_optional_acquisition_fails_quietly() {
        let platform = FakePlatform::new(vec![
            Err(RawLocationError::services_disabled()),
        ]);
        let presenter = RecordingPresenter::new(false);
        let sink = Arc::new(MemorySink::new());
        let svc = service(&platform, &presenter, sink.clone());

        let started = tokio::time::Instant::now();
        let result = svc.validate_for_api(false).await;

        // No toast, no alert, and no resume wait even for the disabled cause
        assert!(result.is_none());
        assert!(sink.messages().is_empty());
        assert!(presenter.alerts.lock().unwrap().is_empty());
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(platform.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_retry_succeeds_after_settings_round_trip() {
        let platform: &'static FakePlatform = Box::leak(Box::new(
            FakePlatform::new(vec![
                Err(RawLocationError::services_disabled()),
                Ok(coord(48.0, 11.0)),
            ])
            .with_services(Some(false)),
        ));
        let presenter: &'static RecordingPresenter = Box::leak(Box::new(RecordingPresenter::new(true)));
        let sink = Arc::new(MemorySink::new());
        let svc: &'static GeolocationService<_, _, _> =
            Box::leak(Box::new(service(platform, presenter, sink.clone())));

        let handle = tokio::spawn(svc.validate_for_api(true));

        // Let the first attempt fail and the resume waiter register
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(platform.fetches(), 1);

        // The user goes to settings, enables location, and comes back
        platform.set_lifecycle(AppLifecycle::Background);
        tokio::time::sleep(Duration::from_millis(10)).await;
        platform.set_services(Some(true));
        platform.set_lifecycle(AppLifecycle::Active);

        let result = handle.await.unwrap();
        assert_eq!(result, Some(coord(48.0, 11.0)));
        assert_eq!(platform.fetches(), 2);
        assert_eq!(sink.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_retry_times_out() {
        let platform: &'static FakePlatform = Box::leak(Box::new(
            FakePlatform::new(vec![Err(RawLocationError::services_disabled())])
                .with_services(Some(false)),
        ));
        let presenter: &'static RecordingPresenter = Box::leak(Box::new(RecordingPresenter::new(false)));
        let sink = Arc::new(MemorySink::new());
        let svc: &'static GeolocationService<_, _, _> =
            Box::leak(Box::new(service(platform, presenter, sink.clone())));

        let handle = tokio::spawn(svc.validate_for_api(true));

        tokio::time::sleep(Duration::from_millis(10)).await;
        // Never resuming: the five-minute deadline fires
        tokio::time::sleep(Duration::from_secs(301)).await;

        assert!(handle.await.unwrap().is_none());
        assert_eq!(platform.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_registration_cancels_first_waiter() {
        let platform: &'static FakePlatform = Box::leak(Box::new(
            FakePlatform::new(vec![
                Err(RawLocationError::services_disabled()),
                Err(RawLocationError::services_disabled()),
                Ok(coord(48.0, 11.0)),
            ])
            .with_services(Some(false)),
        ));
        let presenter: &'static RecordingPresenter = Box::leak(Box::new(RecordingPresenter::new(false)));
        let sink = Arc::new(MemorySink::new());
        let svc: &'static GeolocationService<_, _, _> =
            Box::leak(Box::new(service(platform, presenter, sink.clone())));

        let first = tokio::spawn(svc.validate_for_api(true));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = tokio::spawn(svc.validate_for_api(true));
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The first waiter resolved with nothing as soon as it was replaced
        assert!(first.await.unwrap().is_none());

        platform.set_lifecycle(AppLifecycle::Background);
        tokio::time::sleep(Duration::from_millis(10)).await;
        platform.set_services(Some(true));
        platform.set_lifecycle(AppLifecycle::Active);

        assert_eq!(second.await.unwrap(), Some(coord(48.0, 11.0)));
    }
}
