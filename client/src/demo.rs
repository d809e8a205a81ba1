//! Offline data for the demo binary: profiles pinned to random coordinates.

use std::future;

use futures::stream::{self, StreamExt};
use globe_shared::{LocationRecord, LocationScope, ProfileNumber, ProfileSummary};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::FetchError;
use crate::feed::{ChangeFeed, ChangeStream, FeedMessage};
use crate::store::LocationStore;

/// Latitudes are kept away from the poles, where markers crowd together.
const MIN_LAT: f64 = -60.0;
const MAX_LAT: f64 = 70.0;

#[derive(Debug, Clone)]
pub struct DemoStore {
    profiles: Vec<ProfileSummary>,
    locations: Vec<LocationRecord>,
}

impl DemoStore {
    /// `count` profiles, one location each, reproducible for a given `seed`.
    pub fn generate(count: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut profiles = Vec::with_capacity(count);
        let mut locations = Vec::with_capacity(count);

        for i in 0..count {
            let profile_id = format!("demo-{i}");
            let number = format!("{:04}", i % 10_000);
            let Ok(profile_number) = number.parse::<ProfileNumber>() else {
                continue;
            };
            // Every third profile has a picture; the rest exercise placeholders.
            let profile_picture_url = (i % 3 == 0)
                .then(|| format!("https://picsum.photos/seed/{profile_id}/96"));

            locations.push(LocationRecord {
                id: format!("demo-loc-{i}"),
                profile_id: profile_id.clone(),
                name: format!("Demo #{number}"),
                latitude: rng.gen_range(MIN_LAT..=MAX_LAT),
                longitude: rng.gen_range(-180.0..180.0),
                created_at: None,
            });
            profiles.push(ProfileSummary {
                id: profile_id,
                profile_number,
                bio: None,
                profile_picture_url,
                qr_code_url: None,
            });
        }

        Self {
            profiles,
            locations,
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

impl LocationStore for DemoStore {
    async fn fetch_locations(
        &self,
        scope: &LocationScope,
    ) -> Result<Vec<LocationRecord>, FetchError> {
        Ok(self
            .locations
            .iter()
            .filter(|record| scope.matches(record))
            .cloned()
            .collect())
    }

    async fn fetch_profiles(&self) -> Result<Vec<ProfileSummary>, FetchError> {
        Ok(self.profiles.clone())
    }

    async fn find_profile(&self, id: &str) -> Result<Option<ProfileSummary>, FetchError> {
        Ok(self.profiles.iter().find(|p| p.id == id).cloned())
    }

    async fn find_profile_by_number(
        &self,
        number: &ProfileNumber,
    ) -> Result<Option<ProfileSummary>, FetchError> {
        Ok(self
            .profiles
            .iter()
            .find(|p| &p.profile_number == number)
            .cloned())
    }
}

/// A feed that connects and then never reports a change.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticFeed;

impl ChangeFeed for StaticFeed {
    fn connect(&self) -> ChangeStream {
        Box::pin(stream::once(future::ready(FeedMessage::Connected)).chain(stream::pending()))
    }
}
