use globe_shared::{LngLat, longitude_delta, wrap_longitude};

/// Easing curve of a camera transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Easing {
    /// Constant angular speed; what the idle spin uses so consecutive ticks join seamlessly.
    #[default]
    Linear,
    CubicOut,
}

impl Easing {
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::CubicOut => cubic_ease_out(t),
        }
    }
}

/// An animated move of the camera center.
#[derive(Debug, Clone)]
pub struct CameraTransition {
    pub from: LngLat,
    pub to: LngLat,
    pub start_time: f64,
    pub duration: f64, // milliseconds
    pub easing: Easing,
}

impl CameraTransition {
    pub fn new(from: LngLat, to: LngLat, start_time: f64, duration: f64, easing: Easing) -> Self {
        Self {
            from,
            to,
            start_time,
            duration,
            easing,
        }
    }

    pub fn is_complete(&self, now: f64) -> bool {
        now - self.start_time >= self.duration
    }

    /// Center at `now`. Longitude travels the short way around the antimeridian.
    pub fn position_at(&self, now: f64) -> LngLat {
        if self.duration <= 0.0 || self.is_complete(now) {
            return self.to;
        }
        let t = self.easing.apply((now - self.start_time) / self.duration);
        let dlng = longitude_delta(self.from.lng, self.to.lng);
        LngLat::new(
            wrap_longitude(self.from.lng + dlng * t),
            self.from.lat + (self.to.lat - self.from.lat) * t,
        )
    }
}

/// Cubic ease-out: decelerating to zero velocity.
fn cubic_ease_out(t: f64) -> f64 {
    let t = t - 1.0;
    t * t * t + 1.0
}
