//! Autonomous globe rotation.
//!
//! There is no timer: every tick is a one-second linear transition, and the
//! next tick is issued from the `MoveEnd` that transition produces. At most one
//! autonomous transition is therefore ever in flight.

use globe_shared::{LngLat, wrap_longitude};
use tracing::trace;

use crate::animation::Easing;
use crate::viewport::{MapEngine, ViewportController, ViewportEvent};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpinConfig {
    pub seconds_per_revolution: f64,
    /// No rotation at or above this zoom.
    pub max_spin_zoom: f64,
    /// Above this zoom the rate falls linearly to zero at `max_spin_zoom`.
    pub slow_spin_zoom: f64,
    pub tick_duration_ms: f64,
}

impl Default for SpinConfig {
    fn default() -> Self {
        Self {
            seconds_per_revolution: 240.0,
            max_spin_zoom: 5.0,
            slow_spin_zoom: 3.0,
            tick_duration_ms: 1000.0,
        }
    }
}

impl SpinConfig {
    pub fn degrees_per_second(&self) -> f64 {
        360.0 / self.seconds_per_revolution
    }

    /// Westward step for one tick at `zoom`, or `None` when the globe should hold still.
    pub fn step_degrees(&self, zoom: f64) -> Option<f64> {
        if !zoom.is_finite() || zoom >= self.max_spin_zoom {
            return None;
        }
        let mut rate = self.degrees_per_second();
        if zoom > self.slow_spin_zoom {
            let span = self.max_spin_zoom - self.slow_spin_zoom;
            rate *= ((self.max_spin_zoom - zoom) / span).max(0.0);
        }
        Some(rate * self.tick_duration_ms / 1000.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinState {
    Idle,
    Interacting,
}

#[derive(Debug)]
pub struct IdleSpinner {
    config: SpinConfig,
    state: SpinState,
    enabled: bool,
    stopped: bool,
    ticks_issued: u64,
}

impl IdleSpinner {
    pub fn new(config: SpinConfig) -> Self {
        Self {
            config,
            state: SpinState::Idle,
            enabled: true,
            stopped: false,
            ticks_issued: 0,
        }
    }

    pub fn config(&self) -> &SpinConfig {
        &self.config
    }

    pub fn state(&self) -> SpinState {
        self.state
    }

    pub fn ticks_issued(&self) -> u64 {
        self.ticks_issued
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Route a viewport notification. Returns the step if a tick was issued.
    pub fn handle<E: MapEngine>(
        &mut self,
        event: ViewportEvent,
        viewport: &mut ViewportController<E>,
    ) -> Option<f64> {
        if event.is_interaction_start() {
            self.on_interaction_start();
            None
        } else if event.is_interaction_end() {
            self.on_interaction_end(viewport)
        } else if event == ViewportEvent::MoveEnd {
            self.on_settle(viewport)
        } else {
            None
        }
    }

    pub fn on_settle<E: MapEngine>(&mut self, viewport: &mut ViewportController<E>) -> Option<f64> {
        self.tick(viewport)
    }

    /// The user's own camera motion supersedes any running autonomous transition.
    pub fn on_interaction_start(&mut self) {
        if !self.stopped {
            self.state = SpinState::Interacting;
        }
    }

    /// Resume right away instead of waiting for the next settle.
    pub fn on_interaction_end<E: MapEngine>(
        &mut self,
        viewport: &mut ViewportController<E>,
    ) -> Option<f64> {
        if self.stopped {
            return None;
        }
        self.state = SpinState::Idle;
        self.tick(viewport)
    }

    /// Pause or resume rotation. Resuming issues one tick immediately.
    pub fn set_enabled<E: MapEngine>(
        &mut self,
        enabled: bool,
        viewport: &mut ViewportController<E>,
    ) -> Option<f64> {
        let resumed = enabled && !self.enabled;
        self.enabled = enabled;
        if resumed { self.tick(viewport) } else { None }
    }

    /// Stop re-arming for good. Nothing is issued after this.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn tick<E: MapEngine>(&mut self, viewport: &mut ViewportController<E>) -> Option<f64> {
        if self.stopped || !self.enabled || self.state == SpinState::Interacting {
            return None;
        }
        if !viewport.is_live() {
            return None;
        }

        let camera = viewport.camera();
        let step = self.config.step_degrees(camera.zoom)?;
        let target = LngLat::new(wrap_longitude(camera.center.lng - step), camera.center.lat);
        if !viewport.transition_camera(target, self.config.tick_duration_ms, Easing::Linear) {
            return None;
        }
        self.ticks_issued += 1;
        trace!(step, zoom = camera.zoom, lng = target.lng, "idle spin tick");
        Some(step)
    }
}
