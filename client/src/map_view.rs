//! The live globe: viewport, idle spin, marker overlay and change feed wired
//! together on a single-threaded executor.
//!
//! State lives behind one `RefCell` and is only borrowed from synchronous
//! code, so a reconcile pass can never interleave with a rotation tick or an
//! event handler. Background work (feed listener, reloads) holds a `Weak`
//! reference and silently stops once the view is gone.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use globe_shared::{
    CameraState, LocationRecord, LocationScope, ProfileMap, ProfileNumber, ProfileSummary,
    index_profiles,
};
use tracing::{debug, info, warn};

use crate::config::MapConfig;
use crate::error::{FetchError, InitializationError, SubscriptionError};
use crate::feed::{
    ChangeFeed, ChangeFeedSubscriber, ConnectionStatus, ReloadFollowUp, ReloadGate, ReloadTicket,
    SubscriptionHandle,
};
use crate::markers::{MarkerOverlay, ReconcileReport};
use crate::notices::{Notice, NoticeId, NoticeLevel, Notices};
use crate::spin::IdleSpinner;
use crate::store::LocationStore;
use crate::viewport::{MapEngine, MarkerId, ViewportController, ViewportEvent};

/// Counters for reload activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewStats {
    pub reload_requests: u64,
    pub reloads_started: u64,
    pub reloads_applied: u64,
    pub reloads_failed: u64,
    /// Results that arrived after teardown and were discarded.
    pub reloads_dropped: u64,
}

type ProfileCallback = Box<dyn FnMut(&ProfileSummary)>;

struct ViewState<E: MapEngine> {
    viewport: ViewportController<E>,
    spinner: IdleSpinner,
    overlay: MarkerOverlay,
    gate: ReloadGate,
    subscription: Option<SubscriptionHandle>,
    notices: Notices,
    stats: ViewStats,
    last_report: Option<ReconcileReport>,
    torn_down: bool,
}

struct Shared<E: MapEngine, S> {
    state: RefCell<ViewState<E>>,
    store: Rc<S>,
    on_profile_selected: RefCell<ProfileCallback>,
}

pub struct LiveMapView<E: MapEngine + 'static, S: LocationStore + 'static> {
    shared: Rc<Shared<E, S>>,
}

impl<E: MapEngine + 'static, S: LocationStore + 'static> LiveMapView<E, S> {
    /// Build the canvas and start syncing. Must run inside a `tokio::task::LocalSet`.
    ///
    /// An `InitializationError` is the only fatal outcome; nothing is started
    /// when it is returned.
    pub fn mount<F>(
        config: &MapConfig,
        store: Rc<S>,
        feed: &F,
        on_profile_selected: impl FnMut(&ProfileSummary) + 'static,
    ) -> Result<Self, InitializationError>
    where
        F: ChangeFeed + ?Sized,
    {
        let mut viewport = ViewportController::initialize(
            config.container.as_deref(),
            &config.access_token,
            config.initial_camera,
        )?;
        viewport.apply_fog(config.fog.clone());

        let shared = Rc::new(Shared {
            state: RefCell::new(ViewState {
                viewport,
                spinner: IdleSpinner::new(config.spin),
                overlay: MarkerOverlay::new(),
                gate: ReloadGate::default(),
                subscription: None,
                notices: Notices::default(),
                stats: ViewStats::default(),
                last_report: None,
                torn_down: false,
            }),
            store,
            on_profile_selected: RefCell::new(Box::new(on_profile_selected)),
        });

        let on_change = {
            let weak = Rc::downgrade(&shared);
            move || {
                if let Some(shared) = weak.upgrade() {
                    Shared::request_reload(&shared);
                }
            }
        };
        let on_warning = {
            let weak = Rc::downgrade(&shared);
            move |e: SubscriptionError| {
                if let Some(shared) = weak.upgrade() {
                    shared.warn_subscription(&e);
                }
            }
        };
        let subscription = ChangeFeedSubscriber::start(feed, on_change, on_warning);
        shared.state.borrow_mut().subscription = Some(subscription);

        Shared::request_reload(&shared);
        {
            let mut state = shared.state.borrow_mut();
            let state = &mut *state;
            state.spinner.tick(&mut state.viewport);
        }

        info!("live globe mounted");
        Ok(Self { shared })
    }

    /// Route one engine notification.
    pub fn handle_event(&self, event: ViewportEvent) {
        let selected = {
            let mut state = self.shared.state.borrow_mut();
            if state.torn_down {
                return;
            }
            let state = &mut *state;
            match event {
                ViewportEvent::StyleLoaded => {
                    state.viewport.on_style_loaded();
                    None
                }
                ViewportEvent::MarkerClick(handle) => {
                    let profile = state.overlay.profile_for(handle).cloned();
                    if profile.is_none() {
                        debug!(marker = handle.0, "click on a marker that is no longer live");
                    }
                    profile
                }
                other => {
                    state.spinner.handle(other, &mut state.viewport);
                    None
                }
            }
        };

        if let Some(profile) = selected {
            self.shared.select(&profile);
        }
    }

    /// Search by four-digit profile number and select the match.
    ///
    /// Bad input, a miss and lookup failures end up as notices. Returns the
    /// selected profile.
    pub async fn select_profile_by_number(&self, input: &str) -> Option<ProfileSummary> {
        if !self.is_live() {
            return None;
        }
        let number = match input.trim().parse::<ProfileNumber>() {
            Ok(number) => number,
            Err(e) => {
                debug!(error = %e, "rejecting profile search");
                self.shared.push_notice(NoticeLevel::Error, "Please enter a 4-digit number");
                return None;
            }
        };

        // The store is awaited with no state borrowed.
        let store = Rc::clone(&self.shared.store);
        match store.find_profile_by_number(&number).await {
            Ok(Some(profile)) => {
                if !self.is_live() {
                    return None;
                }
                info!(profile_id = %profile.id, %number, "profile found by number");
                self.shared.select(&profile);
                Some(profile)
            }
            Ok(None) => {
                debug!(%number, "no profile with this number");
                self.shared.push_notice(NoticeLevel::Error, "Profile not found");
                None
            }
            Err(e) => {
                warn!(error = %e, %number, "profile lookup failed");
                self.shared.push_notice(
                    NoticeLevel::Error,
                    format!("Could not look up profile: {e}"),
                );
                None
            }
        }
    }

    /// Ask for a full reload. `None` once torn down.
    pub fn request_reload(&self) -> Option<ReloadTicket> {
        Shared::request_reload(&self.shared)
    }

    pub fn set_spin_enabled(&self, enabled: bool) {
        let mut state = self.shared.state.borrow_mut();
        if state.torn_down {
            return;
        }
        let state = &mut *state;
        state.spinner.set_enabled(enabled, &mut state.viewport);
    }

    pub fn camera(&self) -> CameraState {
        self.shared.state.borrow().viewport.camera()
    }

    pub fn is_live(&self) -> bool {
        !self.shared.state.borrow().torn_down
    }

    pub fn live_marker_ids(&self) -> BTreeSet<String> {
        self.shared.state.borrow().overlay.live_ids()
    }

    pub fn marker_handle(&self, location_id: &str) -> Option<MarkerId> {
        self.shared.state.borrow().overlay.handle_of(location_id)
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.shared.state.borrow().notices.active().cloned().collect()
    }

    pub fn dismiss_notice(&self, id: NoticeId) -> bool {
        self.shared.state.borrow_mut().notices.dismiss(id)
    }

    pub fn stats(&self) -> ViewStats {
        self.shared.state.borrow().stats
    }

    pub fn last_report(&self) -> Option<ReconcileReport> {
        self.shared.state.borrow().last_report.clone()
    }

    pub fn feed_status(&self) -> Option<ConnectionStatus> {
        self.shared
            .state
            .borrow()
            .subscription
            .as_ref()
            .filter(|sub| sub.is_active())
            .map(SubscriptionHandle::status)
    }

    pub fn with_engine<R>(&self, f: impl FnOnce(&E) -> R) -> R {
        f(self.shared.state.borrow().viewport.engine())
    }

    /// Mutable engine access for hosts that drive it, e.g. to advance a clock.
    pub fn with_engine_mut<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        f(self.shared.state.borrow_mut().viewport.engine_mut())
    }

    /// Stop the feed, then rotation, then destroy markers, then release the
    /// canvas. Idempotent.
    pub fn teardown(&self) {
        let Ok(mut state) = self.shared.state.try_borrow_mut() else {
            warn!("teardown re-entered while the view was busy");
            return;
        };
        if state.torn_down {
            return;
        }
        state.torn_down = true;

        if let Some(subscription) = state.subscription.take() {
            subscription.stop();
        }
        state.spinner.stop();
        let state = &mut *state;
        let cleared = state.overlay.clear(&mut state.viewport);
        state.viewport.teardown();
        state.gate.reset();
        info!(markers = cleared, "live globe torn down");
    }
}

impl<E: MapEngine + 'static, S: LocationStore + 'static> Drop for LiveMapView<E, S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<E: MapEngine + 'static, S: LocationStore + 'static> Shared<E, S> {
    fn request_reload(this: &Rc<Self>) -> Option<ReloadTicket> {
        let ticket = {
            let mut state = this.state.borrow_mut();
            if state.torn_down {
                return None;
            }
            state.stats.reload_requests += 1;
            state.gate.request()
        };
        match ticket {
            ReloadTicket::Start => spawn_reload(Rc::downgrade(this), Rc::clone(&this.store)),
            ReloadTicket::Coalesced => debug!("reload already in flight; coalescing"),
        }
        Some(ticket)
    }

    fn apply_reload(
        &self,
        result: Result<(ProfileMap, Vec<LocationRecord>), FetchError>,
    ) -> ReloadFollowUp {
        let mut state = self.state.borrow_mut();
        if state.torn_down {
            state.stats.reloads_dropped += 1;
            debug!("discarding reload result after teardown");
            return ReloadFollowUp::Idle;
        }
        let state = &mut *state;
        match result {
            Ok((profiles, locations)) => {
                let report = state
                    .overlay
                    .reconcile(&locations, &profiles, &mut state.viewport);
                if !report.is_noop() {
                    info!(
                        created = report.created,
                        moved = report.moved,
                        replaced = report.replaced,
                        removed = report.removed,
                        orphaned = report.orphaned,
                        failed = report.failed.len(),
                        "markers reconciled"
                    );
                }
                state.stats.reloads_applied += 1;
                state.last_report = Some(report);
            }
            Err(e) => {
                warn!(error = %e, "reload failed; keeping current markers");
                state.stats.reloads_failed += 1;
                state.notices.push(
                    NoticeLevel::Error,
                    format!("Could not refresh locations: {e}"),
                );
            }
        }
        state.gate.finish()
    }

    /// Must be called with no state borrowed so the callback may query the view.
    fn select(&self, profile: &ProfileSummary) {
        match self.on_profile_selected.try_borrow_mut() {
            Ok(mut callback) => callback(profile),
            Err(_) => warn!(profile_id = %profile.id, "ignoring re-entrant profile selection"),
        }
    }

    fn push_notice(&self, level: NoticeLevel, message: impl Into<String>) {
        let mut state = self.state.borrow_mut();
        if !state.torn_down {
            state.notices.push(level, message);
        }
    }

    fn warn_subscription(&self, e: &SubscriptionError) {
        let message = match e {
            SubscriptionError::Lagged(_) => "Live updates fell behind; reloading".to_string(),
            _ => format!("Live updates interrupted: {e}"),
        };
        self.push_notice(NoticeLevel::Warning, message);
    }
}

fn spawn_reload<E, S>(view: Weak<Shared<E, S>>, store: Rc<S>)
where
    E: MapEngine + 'static,
    S: LocationStore + 'static,
{
    tokio::task::spawn_local(async move {
        loop {
            if let Some(shared) = view.upgrade() {
                shared.state.borrow_mut().stats.reloads_started += 1;
            } else {
                return;
            }

            let result = load_snapshot(&*store).await;

            let follow_up = match view.upgrade() {
                Some(shared) => shared.apply_reload(result),
                None => {
                    debug!("view dropped during reload");
                    return;
                }
            };
            if follow_up == ReloadFollowUp::Idle {
                return;
            }
            debug!("running trailing reload");
        }
    });
}

/// One full snapshot: every profile plus every location.
pub async fn load_snapshot<S: LocationStore + ?Sized>(
    store: &S,
) -> Result<(ProfileMap, Vec<LocationRecord>), FetchError> {
    let (profiles, locations) = futures::try_join!(
        store.fetch_profiles(),
        store.fetch_locations(&LocationScope::All)
    )?;
    Ok((index_profiles(profiles), locations))
}
