use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type ProfileMap = HashMap<String, ProfileSummary>;

/// Four-digit public display number of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProfileNumber(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("profile number must be exactly 4 digits, got {0:?}")]
pub struct InvalidProfileNumber(pub String);

impl ProfileNumber {
    pub const LEN: usize = 4;

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ProfileNumber {
    type Err = InvalidProfileNumber;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.len() == Self::LEN && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidProfileNumber(raw.to_string()))
        }
    }
}

impl TryFrom<String> for ProfileNumber {
    type Error = InvalidProfileNumber;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<ProfileNumber> for String {
    fn from(number: ProfileNumber) -> Self {
        number.0
    }
}

impl fmt::Display for ProfileNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only decoration data for markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: String,
    pub profile_number: ProfileNumber,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default)]
    pub qr_code_url: Option<String>,
}

impl ProfileSummary {
    /// Picture URL, treating blank strings as absent.
    pub fn image_url(&self) -> Option<&str> {
        self.profile_picture_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// Payload for creating a profile; the store assigns `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProfile {
    pub profile_number: ProfileNumber,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default)]
    pub qr_code_url: Option<String>,
}

/// Partial update; absent fields are left untouched and blank strings clear
/// an optional field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_number: Option<ProfileNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code_url: Option<String>,
}

impl ProfilePatch {
    pub fn apply(&self, profile: &mut ProfileSummary) {
        if let Some(number) = &self.profile_number {
            profile.profile_number = number.clone();
        }
        patch_optional(&mut profile.bio, self.bio.as_deref());
        patch_optional(
            &mut profile.profile_picture_url,
            self.profile_picture_url.as_deref(),
        );
        patch_optional(&mut profile.qr_code_url, self.qr_code_url.as_deref());
    }
}

fn patch_optional(field: &mut Option<String>, value: Option<&str>) {
    match value {
        None => {}
        Some(v) if v.trim().is_empty() => *field = None,
        Some(v) => *field = Some(v.to_string()),
    }
}

/// Key profiles by id. Later duplicates replace earlier ones.
pub fn index_profiles(profiles: impl IntoIterator<Item = ProfileSummary>) -> ProfileMap {
    profiles
        .into_iter()
        .map(|profile| (profile.id.clone(), profile))
        .collect()
}
