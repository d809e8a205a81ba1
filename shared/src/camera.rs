use serde::{Deserialize, Serialize};

/// Longitude/latitude pair in degrees, ordered the way map engines take it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    pub fn is_valid(&self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lng)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

/// Camera of a single globe canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraState {
    pub center: LngLat,
    pub zoom: f64,
    pub pitch: f64,
    pub bearing: f64,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            center: LngLat::new(0.0, 20.0),
            zoom: 1.5,
            pitch: 45.0,
            bearing: 0.0,
        }
    }
}

impl CameraState {
    pub fn with_center(self, center: LngLat) -> Self {
        Self { center, ..self }
    }
}

/// Normalize a longitude into `[-180, 180)`.
pub fn wrap_longitude(lng: f64) -> f64 {
    (lng + 180.0).rem_euclid(360.0) - 180.0
}

/// Signed shortest angular distance `to - from`, in `[-180, 180)`.
pub fn longitude_delta(from: f64, to: f64) -> f64 {
    wrap_longitude(to - from)
}
