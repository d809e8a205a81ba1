use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::camera::LngLat;

/// A single pinned place owned by one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub id: String,
    pub profile_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl LocationRecord {
    pub fn lng_lat(&self) -> LngLat {
        LngLat::new(self.longitude, self.latitude)
    }

    /// Finite and inside the WGS84 lon/lat ranges.
    pub fn has_valid_coordinates(&self) -> bool {
        self.lng_lat().is_valid()
    }
}

/// Payload for creating a location; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLocation {
    pub profile_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl LocationPatch {
    pub fn apply(&self, record: &mut LocationRecord) {
        if let Some(profile_id) = &self.profile_id {
            record.profile_id.clone_from(profile_id);
        }
        if let Some(name) = &self.name {
            record.name.clone_from(name);
        }
        if let Some(latitude) = self.latitude {
            record.latitude = latitude;
        }
        if let Some(longitude) = self.longitude {
            record.longitude = longitude;
        }
    }
}

/// Which records a location query returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LocationScope {
    #[default]
    All,
    Profile(String),
}

impl LocationScope {
    pub fn matches(&self, record: &LocationRecord) -> bool {
        match self {
            Self::All => true,
            Self::Profile(profile_id) => record.profile_id == *profile_id,
        }
    }
}
