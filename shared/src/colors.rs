use serde::{Deserialize, Serialize};

/// Hue offset between the two stops of a placeholder gradient (cyan → magenta).
const PLACEHOLDER_HUE_SPREAD: f64 = 120.0;
const PLACEHOLDER_ALPHA: f64 = 0.3;
const PLACEHOLDER_ANGLE_DEG: f64 = 135.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    pub rgb: (u8, u8, u8),
    pub alpha: f64,
}

/// Two-stop linear gradient used as a marker face when a profile has no picture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gradient {
    pub angle_deg: f64,
    pub from: GradientStop,
    pub to: GradientStop,
}

impl Gradient {
    pub fn css(&self) -> String {
        let (fr, fg, fb) = self.from.rgb;
        let (tr, tg, tb) = self.to.rgb;
        format!(
            "linear-gradient({}deg, {}, {})",
            self.angle_deg,
            rgba_css(fr, fg, fb, self.from.alpha),
            rgba_css(tr, tg, tb, self.to.alpha)
        )
    }
}

/// Deterministic placeholder gradient via CRC32 hash of the seed (usually a profile id).
pub fn placeholder_gradient(seed: &str) -> Gradient {
    let hue = seed_hue(seed);
    let stop = |h: f64| GradientStop {
        rgb: hsl_to_rgb(h, 1.0, 0.5),
        alpha: PLACEHOLDER_ALPHA,
    };
    Gradient {
        angle_deg: PLACEHOLDER_ANGLE_DEG,
        from: stop(hue),
        to: stop((hue + PLACEHOLDER_HUE_SPREAD).rem_euclid(360.0)),
    }
}

fn seed_hue(seed: &str) -> f64 {
    (crc32fast::hash(seed.as_bytes()) % 360) as f64
}

/// Format RGBA as a CSS color string.
pub fn rgba_css(r: u8, g: u8, b: u8, a: f64) -> String {
    format!("rgba({r}, {g}, {b}, {a})")
}

/// Convert HSL to RGB. `h` in degrees, `s`/`l` in 0..1.
pub fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
    if s.abs() < f64::EPSILON {
        let v = (l * 255.0).round() as u8;
        return (v, v, v);
    }

    let q = if l < 0.5 {
        l * (1.0 + s)
    } else {
        l + s - l * s
    };
    let p = 2.0 * l - q;
    let h = h / 360.0;

    let r = hue_to_rgb(p, q, h + 1.0 / 3.0);
    let g = hue_to_rgb(p, q, h);
    let b = hue_to_rgb(p, q, h - 1.0 / 3.0);

    (
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    )
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 1.0 / 2.0 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}
