//! A rendering engine without a screen.
//!
//! Implements the full [`MapEngine`] capability set in memory: camera
//! transitions advance on an explicit clock and report `MoveEnd` when they
//! settle, markers live in an ordered map. Used by the demo binary and tests.

use std::collections::BTreeMap;

use globe_shared::{CameraState, LngLat};
use tracing::trace;

use crate::animation::{CameraTransition, Easing};
use crate::error::{InitializationError, PlacementError};
use crate::viewport::{AccessToken, FogSettings, MapEngine, MarkerId, MarkerVisual, ViewportEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessMarker {
    pub visual: MarkerVisual,
    pub position: LngLat,
}

#[derive(Debug)]
pub struct HeadlessEngine {
    container: String,
    camera: CameraState,
    transition: Option<CameraTransition>,
    now_ms: f64,
    transitions_started: usize,
    markers: BTreeMap<MarkerId, HeadlessMarker>,
    next_marker: u64,
    markers_created: usize,
    markers_removed: usize,
    fog: Option<FogSettings>,
    fog_applications: usize,
    remove_calls: usize,
}

impl MapEngine for HeadlessEngine {
    fn mount(
        container: &str,
        token: &AccessToken,
        camera: CameraState,
    ) -> Result<Self, InitializationError> {
        // Secret tokens must never be shipped to a client-side renderer.
        if token.as_str().starts_with("sk.") {
            return Err(InitializationError::InvalidToken(
                "secret tokens are not accepted by the renderer".to_string(),
            ));
        }
        Ok(Self {
            container: container.to_string(),
            camera,
            transition: None,
            now_ms: 0.0,
            transitions_started: 0,
            markers: BTreeMap::new(),
            next_marker: 1,
            markers_created: 0,
            markers_removed: 0,
            fog: None,
            fog_applications: 0,
            remove_calls: 0,
        })
    }

    fn ease_to(&mut self, center: LngLat, duration_ms: f64, easing: Easing) {
        let from = self.current_center();
        self.camera.center = from;
        self.transition = Some(CameraTransition::new(
            from,
            center,
            self.now_ms,
            duration_ms,
            easing,
        ));
        self.transitions_started += 1;
    }

    fn camera(&self) -> CameraState {
        self.camera.with_center(self.current_center())
    }

    fn set_fog(&mut self, fog: &FogSettings) {
        self.fog = Some(fog.clone());
        self.fog_applications += 1;
    }

    fn add_marker(
        &mut self,
        visual: &MarkerVisual,
        at: LngLat,
    ) -> Result<MarkerId, PlacementError> {
        check_position(at)?;
        let id = MarkerId(self.next_marker);
        self.next_marker += 1;
        self.markers_created += 1;
        self.markers.insert(
            id,
            HeadlessMarker {
                visual: visual.clone(),
                position: at,
            },
        );
        trace!(marker = id.0, lng = at.lng, lat = at.lat, "marker added");
        Ok(id)
    }

    fn set_marker_position(&mut self, marker: MarkerId, at: LngLat) -> Result<(), PlacementError> {
        check_position(at)?;
        let entry = self
            .markers
            .get_mut(&marker)
            .ok_or(PlacementError::UnknownMarker(marker.0))?;
        entry.position = at;
        Ok(())
    }

    fn remove_marker(&mut self, marker: MarkerId) {
        if self.markers.remove(&marker).is_some() {
            self.markers_removed += 1;
        }
    }

    fn remove(&mut self) {
        self.remove_calls += 1;
        self.transition = None;
        self.markers.clear();
    }
}

fn check_position(at: LngLat) -> Result<(), PlacementError> {
    if at.is_valid() {
        Ok(())
    } else {
        Err(PlacementError::InvalidCoordinates {
            lng: at.lng,
            lat: at.lat,
        })
    }
}

impl HeadlessEngine {
    fn current_center(&self) -> LngLat {
        match &self.transition {
            Some(tr) => tr.position_at(self.now_ms),
            None => self.camera.center,
        }
    }

    /// Move the clock forward. Returns `MoveEnd` if the running transition settled.
    pub fn advance(&mut self, dt_ms: f64) -> Vec<ViewportEvent> {
        self.now_ms += dt_ms.max(0.0);
        let Some(tr) = &self.transition else {
            return Vec::new();
        };
        if !tr.is_complete(self.now_ms) {
            return Vec::new();
        }
        self.camera.center = tr.to;
        self.transition = None;
        vec![ViewportEvent::MoveEnd]
    }

    /// Direct manipulation: jump the camera, cancelling any animation.
    pub fn drag_to(&mut self, center: LngLat) {
        self.transition = None;
        self.camera.center = center;
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.camera.zoom = zoom;
    }

    pub fn is_animating(&self) -> bool {
        self.transition.is_some()
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn now(&self) -> f64 {
        self.now_ms
    }

    pub fn transitions_started(&self) -> usize {
        self.transitions_started
    }

    pub fn markers(&self) -> &BTreeMap<MarkerId, HeadlessMarker> {
        &self.markers
    }

    pub fn marker(&self, id: MarkerId) -> Option<&HeadlessMarker> {
        self.markers.get(&id)
    }

    /// Total markers ever created, including ones since removed.
    pub fn markers_created(&self) -> usize {
        self.markers_created
    }

    /// Markers removed one by one, not counting the sweep done by `remove`.
    pub fn markers_removed(&self) -> usize {
        self.markers_removed
    }

    pub fn fog(&self) -> Option<&FogSettings> {
        self.fog.as_ref()
    }

    pub fn fog_applications(&self) -> usize {
        self.fog_applications
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls
    }

    /// Click on a marker, if it is still on the canvas.
    pub fn click(&self, id: MarkerId) -> Option<ViewportEvent> {
        self.markers
            .contains_key(&id)
            .then_some(ViewportEvent::MarkerClick(id))
    }
}

#[cfg(test)]
mod tests {
    use super::HeadlessEngine;
    use crate::animation::Easing;
    use crate::error::PlacementError;
    use crate::viewport::{AccessToken, MapEngine, MarkerVisual};
    use globe_shared::{CameraState, LngLat, placeholder_gradient};

    fn engine() -> HeadlessEngine {
        HeadlessEngine::mount("globe", &AccessToken::new("pk.test"), CameraState::default())
            .expect("mount headless engine")
    }

    #[test]
    fn transition_settles_after_its_duration() {
        let mut engine = engine();
        engine.ease_to(LngLat::new(-1.5, 20.0), 1000.0, Easing::Linear);
        assert!(engine.advance(999.0).is_empty());
        assert!(engine.is_animating());
        assert_eq!(engine.advance(1.0).len(), 1);
        assert_eq!(engine.camera().center, LngLat::new(-1.5, 20.0));
    }

    #[test]
    fn drag_cancels_running_transition() {
        let mut engine = engine();
        engine.ease_to(LngLat::new(-1.5, 20.0), 1000.0, Easing::Linear);
        engine.drag_to(LngLat::new(40.0, 10.0));
        assert!(engine.advance(2000.0).is_empty());
        assert_eq!(engine.camera().center, LngLat::new(40.0, 10.0));
    }

    #[test]
    fn rejects_markers_outside_valid_range() {
        let mut engine = engine();
        let visual = MarkerVisual::Gradient(placeholder_gradient("p1"));
        let err = engine
            .add_marker(&visual, LngLat::new(200.0, 0.0))
            .expect_err("out of range marker should be rejected");
        assert!(matches!(err, PlacementError::InvalidCoordinates { .. }));
        assert!(engine.markers().is_empty());
    }
}
