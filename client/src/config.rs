use globe_shared::CameraState;

use crate::spin::SpinConfig;
use crate::viewport::{AccessToken, FogSettings};

pub const DEFAULT_CONTAINER: &str = "globe";
pub const DEFAULT_DEMO_LOCATIONS: usize = 24;

pub fn access_token() -> Option<String> {
    std::env::var("GLOBE_ACCESS_TOKEN")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Base URL of the reference server; `None` runs the demo offline.
pub fn api_base() -> Option<String> {
    std::env::var("GLOBE_API_BASE")
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
}

/// Profile number to select right after mount, like a `?profile=` link.
pub fn initial_profile() -> Option<String> {
    std::env::var("GLOBE_PROFILE")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn positive_f64(name: &str) -> Option<f64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
}

/// Falls back to the default rate, or both default zoom thresholds when the
/// configured ones are not ordered `slow < max`.
pub fn spin_config() -> SpinConfig {
    let defaults = SpinConfig::default();
    let seconds_per_revolution = positive_f64("GLOBE_SPIN_SECONDS_PER_REVOLUTION")
        .unwrap_or(defaults.seconds_per_revolution);
    let max_spin_zoom = positive_f64("GLOBE_MAX_SPIN_ZOOM").unwrap_or(defaults.max_spin_zoom);
    let slow_spin_zoom = positive_f64("GLOBE_SLOW_SPIN_ZOOM").unwrap_or(defaults.slow_spin_zoom);

    let (max_spin_zoom, slow_spin_zoom) = if slow_spin_zoom < max_spin_zoom {
        (max_spin_zoom, slow_spin_zoom)
    } else {
        (defaults.max_spin_zoom, defaults.slow_spin_zoom)
    };

    SpinConfig {
        seconds_per_revolution,
        max_spin_zoom,
        slow_spin_zoom,
        ..defaults
    }
}

pub fn demo_location_count() -> usize {
    std::env::var("GLOBE_DEMO_LOCATIONS")
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_DEMO_LOCATIONS)
}

/// Everything the live view needs to mount.
#[derive(Debug, Clone)]
pub struct MapConfig {
    pub container: Option<String>,
    pub access_token: AccessToken,
    pub initial_camera: CameraState,
    pub fog: FogSettings,
    pub spin: SpinConfig,
}

impl MapConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            container: Some(DEFAULT_CONTAINER.to_string()),
            access_token: AccessToken::new(access_token),
            initial_camera: CameraState::default(),
            fog: FogSettings::default(),
            spin: SpinConfig::default(),
        }
    }

    /// A missing token is kept empty so that mounting reports it.
    pub fn from_env() -> Self {
        Self {
            spin: spin_config(),
            ..Self::new(access_token().unwrap_or_default())
        }
    }
}
