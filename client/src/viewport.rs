//! Camera ownership for a single globe canvas.
//!
//! The rendering engine itself is a collaborator behind [`MapEngine`]; the
//! [`ViewportController`] adds the lifecycle rules on top: credentials are
//! checked before the engine is touched, fog waits for the base style,
//! transitions replace each other, and teardown happens exactly once.

use globe_shared::{CameraState, Gradient, LngLat, ProfileSummary, placeholder_gradient};
use tracing::{debug, info};

use crate::animation::Easing;
use crate::error::{InitializationError, PlacementError};

/// Renderer-owned marker handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub u64);

/// Face of a marker: the profile picture, or a generated gradient.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerVisual {
    Image { url: String },
    Gradient(Gradient),
}

impl MarkerVisual {
    pub fn for_profile(profile: &ProfileSummary) -> Self {
        match profile.image_url() {
            Some(url) => Self::Image {
                url: url.to_string(),
            },
            None => Self::Gradient(placeholder_gradient(&profile.id)),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Gradient(_))
    }

    /// CSS `background-image` value for DOM-backed engines.
    pub fn background_css(&self) -> String {
        match self {
            Self::Image { url } => format!("url({url})"),
            Self::Gradient(gradient) => gradient.css(),
        }
    }
}

/// Atmosphere around the globe.
#[derive(Debug, Clone, PartialEq)]
pub struct FogSettings {
    pub color: String,
    pub high_color: String,
    pub horizon_blend: f64,
}

impl Default for FogSettings {
    fn default() -> Self {
        Self {
            color: "rgb(10, 15, 20)".to_string(),
            high_color: "rgb(30, 40, 50)".to_string(),
            horizon_blend: 0.2,
        }
    }
}

/// Credential handed to the rendering engine.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject absent or obviously malformed tokens before the engine sees them.
    pub fn validate(&self) -> Result<(), InitializationError> {
        let token = self.0.trim();
        if token.is_empty() {
            return Err(InitializationError::MissingToken);
        }
        if token.len() != self.0.len() || token.chars().any(char::is_whitespace) {
            return Err(InitializationError::InvalidToken(
                "token contains whitespace".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

/// Notifications a host forwards from the rendering engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportEvent {
    StyleLoaded,
    /// Camera motion settled, including at the end of programmatic transitions.
    MoveEnd,
    MouseDown,
    DragStart,
    TouchStart,
    MouseUp,
    DragEnd,
    TouchEnd,
    MarkerClick(MarkerId),
}

impl ViewportEvent {
    pub fn is_interaction_start(self) -> bool {
        matches!(self, Self::MouseDown | Self::DragStart | Self::TouchStart)
    }

    pub fn is_interaction_end(self) -> bool {
        matches!(self, Self::MouseUp | Self::DragEnd | Self::TouchEnd)
    }
}

/// Capability set required of a rendering engine.
pub trait MapEngine: Sized {
    /// Build a canvas bound to `container`. Must fail fast on a rejected credential.
    fn mount(
        container: &str,
        token: &AccessToken,
        camera: CameraState,
    ) -> Result<Self, InitializationError>;

    /// Start an animated move. A call while another transition runs replaces it.
    fn ease_to(&mut self, center: LngLat, duration_ms: f64, easing: Easing);

    fn camera(&self) -> CameraState;

    fn set_fog(&mut self, fog: &FogSettings);

    fn add_marker(&mut self, visual: &MarkerVisual, at: LngLat)
    -> Result<MarkerId, PlacementError>;

    fn set_marker_position(&mut self, marker: MarkerId, at: LngLat)
    -> Result<(), PlacementError>;

    fn remove_marker(&mut self, marker: MarkerId);

    /// Release the canvas and every listener attached to it.
    fn remove(&mut self);
}

/// Owns the camera of one canvas. Only this type talks to the engine.
#[derive(Debug)]
pub struct ViewportController<E: MapEngine> {
    engine: E,
    live: bool,
    style_loaded: bool,
    fog: Option<FogSettings>,
    last_camera: CameraState,
}

impl<E: MapEngine> ViewportController<E> {
    pub fn initialize(
        container: Option<&str>,
        token: &AccessToken,
        initial: CameraState,
    ) -> Result<Self, InitializationError> {
        let container = container
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(InitializationError::MissingContainer)?;
        token.validate()?;

        let engine = E::mount(container, token, initial)?;
        info!(container, zoom = initial.zoom, "globe viewport initialized");
        Ok(Self {
            engine,
            live: true,
            style_loaded: false,
            fog: None,
            last_camera: initial,
        })
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Store fog settings; they reach the engine once the base style has loaded.
    pub fn apply_fog(&mut self, settings: FogSettings) {
        self.fog = Some(settings);
        self.push_fog();
    }

    /// The engine finished (re)loading its base style.
    pub fn on_style_loaded(&mut self) {
        self.style_loaded = true;
        self.push_fog();
    }

    fn push_fog(&mut self) {
        if !self.live || !self.style_loaded {
            return;
        }
        if let Some(fog) = &self.fog {
            self.engine.set_fog(fog);
        }
    }

    /// Returns `false` when the viewport is already torn down.
    pub fn transition_camera(&mut self, center: LngLat, duration_ms: f64, easing: Easing) -> bool {
        if !self.live {
            return false;
        }
        self.engine.ease_to(center, duration_ms, easing);
        true
    }

    pub fn camera(&self) -> CameraState {
        if self.live {
            self.engine.camera()
        } else {
            self.last_camera
        }
    }

    pub fn add_marker(
        &mut self,
        visual: &MarkerVisual,
        at: LngLat,
    ) -> Result<MarkerId, PlacementError> {
        if !self.live {
            return Err(PlacementError::Rejected("viewport torn down".to_string()));
        }
        self.engine.add_marker(visual, at)
    }

    pub fn set_marker_position(
        &mut self,
        marker: MarkerId,
        at: LngLat,
    ) -> Result<(), PlacementError> {
        if !self.live {
            return Err(PlacementError::Rejected("viewport torn down".to_string()));
        }
        self.engine.set_marker_position(marker, at)
    }

    pub fn remove_marker(&mut self, marker: MarkerId) {
        if self.live {
            self.engine.remove_marker(marker);
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Release the engine. Safe to call any number of times.
    pub fn teardown(&mut self) {
        if !self.live {
            return;
        }
        self.last_camera = self.engine.camera();
        self.live = false;
        self.engine.remove();
        debug!("globe viewport released");
    }
}
