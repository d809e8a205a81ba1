use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use globe_shared::{
    ChangeKind, ChangeNotice, LocationPatch, LocationRecord, LocationScope, NewLocation,
    NewProfile, ProfileNumber, ProfilePatch, ProfileSummary, Table,
};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::sse_broadcast_buffer;

/// Change notice serialized once, shared by every SSE client.
#[derive(Debug, Clone)]
pub struct PreSerializedNotice {
    pub seq: u64,
    pub json: Arc<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    /// Another profile already holds this number.
    #[error("profile number {0} is already taken")]
    NumberTaken(ProfileNumber),
    #[error("{0}")]
    Invalid(String),
}

/// Initial content loaded from a seed file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub profiles: Vec<ProfileSummary>,
    #[serde(default)]
    pub locations: Vec<LocationRecord>,
}

#[derive(Clone)]
pub struct AppState {
    pub locations: Arc<DashMap<String, LocationRecord>>,
    pub profiles: Arc<DashMap<String, ProfileSummary>>,
    /// Profile number -> profile id; guards number uniqueness.
    profile_numbers: Arc<DashMap<ProfileNumber, String>>,
    pub next_seq: Arc<AtomicU64>,
    pub event_tx: broadcast::Sender<PreSerializedNotice>,
    pub observability: Arc<ObservabilityCounters>,
}

#[derive(Debug, Default)]
pub struct ObservabilityCounters {
    notices_emitted_total: AtomicU64,
    lagged_clients_total: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct ObservabilitySnapshot {
    pub notices_emitted_total: u64,
    pub lagged_clients_total: u64,
}

impl ObservabilityCounters {
    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            notices_emitted_total: self.notices_emitted_total.load(Ordering::Relaxed),
            lagged_clients_total: self.lagged_clients_total.load(Ordering::Relaxed),
        }
    }

    pub fn record_lagged_client(&self) {
        self.lagged_clients_total.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(sse_broadcast_buffer());
        Self {
            locations: Arc::new(DashMap::new()),
            profiles: Arc::new(DashMap::new()),
            profile_numbers: Arc::new(DashMap::new()),
            next_seq: Arc::new(AtomicU64::new(0)),
            event_tx,
            observability: Arc::new(ObservabilityCounters::default()),
        }
    }

    /// Load seed content without emitting notices. Profiles with a duplicate
    /// number are skipped.
    pub fn seed(&self, data: SeedData) -> (usize, usize) {
        let mut profiles = 0;
        for profile in data.profiles {
            match self.profile_numbers.entry(profile.profile_number.clone()) {
                Entry::Occupied(_) => {
                    warn!(
                        profile_id = %profile.id,
                        number = %profile.profile_number,
                        "skipping seed profile with duplicate number"
                    );
                }
                Entry::Vacant(slot) => {
                    slot.insert(profile.id.clone());
                    self.profiles.insert(profile.id.clone(), profile);
                    profiles += 1;
                }
            }
        }
        let mut locations = 0;
        for record in data.locations {
            if !record.has_valid_coordinates() {
                warn!(location_id = %record.id, "skipping seed location with invalid coordinates");
                continue;
            }
            self.locations.insert(record.id.clone(), record);
            locations += 1;
        }
        (profiles, locations)
    }

    pub fn current_seq(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed)
    }

    /// Serialize and broadcast one coarse change notice.
    pub fn notify(&self, table: Table, kind: ChangeKind) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let notice = ChangeNotice {
            seq,
            table,
            kind,
            timestamp: Utc::now().to_rfc3339(),
        };
        match serde_json::to_vec(&notice) {
            Ok(json) => {
                let receivers = self
                    .event_tx
                    .send(PreSerializedNotice {
                        seq,
                        json: Arc::new(Bytes::from(json)),
                    })
                    .unwrap_or(0);
                self.observability
                    .notices_emitted_total
                    .fetch_add(1, Ordering::Relaxed);
                debug!(seq, ?table, ?kind, receivers, "change notice broadcast");
            }
            Err(e) => warn!(seq, error = %e, "failed to serialize change notice"),
        }
        seq
    }

    pub fn list_locations(&self, scope: &LocationScope) -> Vec<LocationRecord> {
        let mut records: Vec<LocationRecord> = self
            .locations
            .iter()
            .filter(|entry| scope.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub fn create_location(&self, new: NewLocation) -> Result<LocationRecord, StoreError> {
        let record = LocationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            profile_id: new.profile_id,
            name: new.name,
            latitude: new.latitude,
            longitude: new.longitude,
            created_at: Some(Utc::now()),
        };
        if !record.has_valid_coordinates() {
            return Err(StoreError::Invalid(format!(
                "coordinates out of range: ({}, {})",
                record.longitude, record.latitude
            )));
        }
        if !self.profiles.contains_key(&record.profile_id) {
            return Err(StoreError::Invalid(format!(
                "unknown profile {}",
                record.profile_id
            )));
        }
        self.locations.insert(record.id.clone(), record.clone());
        self.notify(Table::Locations, ChangeKind::Insert);
        Ok(record)
    }

    pub fn update_location(
        &self,
        id: &str,
        patch: &LocationPatch,
    ) -> Result<LocationRecord, StoreError> {
        let updated = {
            let mut entry = self.locations.get_mut(id).ok_or(StoreError::NotFound)?;
            let mut candidate = entry.clone();
            patch.apply(&mut candidate);
            if !candidate.has_valid_coordinates() {
                return Err(StoreError::Invalid(format!(
                    "coordinates out of range: ({}, {})",
                    candidate.longitude, candidate.latitude
                )));
            }
            *entry = candidate.clone();
            candidate
        };
        self.notify(Table::Locations, ChangeKind::Update);
        Ok(updated)
    }

    pub fn delete_location(&self, id: &str) -> Result<(), StoreError> {
        self.locations.remove(id).ok_or(StoreError::NotFound)?;
        self.notify(Table::Locations, ChangeKind::Delete);
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<ProfileSummary> {
        let mut profiles: Vec<ProfileSummary> = self
            .profiles
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        profiles.sort_by(|a, b| a.profile_number.as_str().cmp(b.profile_number.as_str()));
        profiles
    }

    pub fn profile(&self, id: &str) -> Option<ProfileSummary> {
        self.profiles.get(id).map(|entry| entry.value().clone())
    }

    pub fn profile_by_number(&self, number: &ProfileNumber) -> Option<ProfileSummary> {
        let id = self.profile_numbers.get(number)?.value().clone();
        self.profile(&id)
    }

    pub fn create_profile(&self, new: NewProfile) -> Result<ProfileSummary, StoreError> {
        let profile = ProfileSummary {
            id: uuid::Uuid::new_v4().to_string(),
            profile_number: new.profile_number,
            bio: new.bio,
            profile_picture_url: new.profile_picture_url,
            qr_code_url: new.qr_code_url,
        };
        self.claim_number(&profile.profile_number, &profile.id)?;
        self.profiles.insert(profile.id.clone(), profile.clone());
        self.notify(Table::Profiles, ChangeKind::Insert);
        Ok(profile)
    }

    pub fn update_profile(
        &self,
        id: &str,
        patch: &ProfilePatch,
    ) -> Result<ProfileSummary, StoreError> {
        let updated = {
            let mut entry = self.profiles.get_mut(id).ok_or(StoreError::NotFound)?;
            if let Some(number) = &patch.profile_number
                && number != &entry.profile_number
            {
                self.claim_number(number, id)?;
                self.profile_numbers.remove(&entry.profile_number);
            }
            patch.apply(&mut entry);
            entry.clone()
        };
        self.notify(Table::Profiles, ChangeKind::Update);
        Ok(updated)
    }

    /// Locations of a deleted profile stay; readers skip them as orphans.
    pub fn delete_profile(&self, id: &str) -> Result<(), StoreError> {
        let (_, profile) = self.profiles.remove(id).ok_or(StoreError::NotFound)?;
        self.profile_numbers
            .remove_if(&profile.profile_number, |_, owner| owner == id);
        self.notify(Table::Profiles, ChangeKind::Delete);
        Ok(())
    }

    fn claim_number(&self, number: &ProfileNumber, id: &str) -> Result<(), StoreError> {
        match self.profile_numbers.entry(number.clone()) {
            Entry::Occupied(_) => Err(StoreError::NumberTaken(number.clone())),
            Entry::Vacant(slot) => {
                slot.insert(id.to_string());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use globe_shared::{
        ChangeKind, ChangeNotice, LocationPatch, LocationScope, NewLocation, NewProfile,
        ProfilePatch, Table,
    };

    use super::{AppState, SeedData, StoreError};

    fn new_profile(number: &str) -> NewProfile {
        NewProfile {
            profile_number: number.parse().expect("valid profile number"),
            bio: None,
            profile_picture_url: None,
            qr_code_url: None,
        }
    }

    fn new_location(profile_id: &str, lng: f64, lat: f64) -> NewLocation {
        NewLocation {
            profile_id: profile_id.to_string(),
            name: "somewhere".to_string(),
            latitude: lat,
            longitude: lng,
        }
    }

    #[test]
    fn every_mutation_broadcasts_a_sequenced_notice() {
        let state = AppState::new();
        let mut rx = state.event_tx.subscribe();

        let profile = state.create_profile(new_profile("0001")).expect("create profile");
        let location = state
            .create_location(new_location(&profile.id, 20.0, 10.0))
            .expect("create location");
        state.delete_location(&location.id).expect("delete location");

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            let notice: ChangeNotice =
                serde_json::from_slice(event.json.as_ref()).expect("notice json");
            assert_eq!(notice.seq, event.seq);
            seen.push((notice.seq, notice.table, notice.kind));
        }
        assert_eq!(
            seen,
            vec![
                (1, Table::Profiles, ChangeKind::Insert),
                (2, Table::Locations, ChangeKind::Insert),
                (3, Table::Locations, ChangeKind::Delete),
            ]
        );
        assert_eq!(state.current_seq(), 3);
        assert_eq!(state.observability.snapshot().notices_emitted_total, 3);
    }

    #[test]
    fn profile_numbers_are_unique() {
        let state = AppState::new();
        let first = state.create_profile(new_profile("0420")).expect("create");
        let dup = state.create_profile(new_profile("0420"));
        assert!(matches!(dup, Err(StoreError::NumberTaken(_))));
        assert_eq!(
            dup.expect_err("duplicate number").to_string(),
            "profile number 0420 is already taken"
        );

        let second = state.create_profile(new_profile("0421")).expect("create");
        let clash = state.update_profile(
            &second.id,
            &ProfilePatch {
                profile_number: Some("0420".parse().expect("valid profile number")),
                ..ProfilePatch::default()
            },
        );
        assert!(matches!(clash, Err(StoreError::NumberTaken(_))));

        state
            .update_profile(
                &first.id,
                &ProfilePatch {
                    profile_number: Some("0999".parse().expect("valid profile number")),
                    ..ProfilePatch::default()
                },
            )
            .expect("renumber");
        let freed = "0420".parse().expect("valid profile number");
        assert!(state.profile_by_number(&freed).is_none());
        assert!(state.create_profile(new_profile("0420")).is_ok());
    }

    #[test]
    fn invalid_locations_are_rejected_without_notice() {
        let state = AppState::new();
        let profile = state.create_profile(new_profile("0001")).expect("create");
        let seq = state.current_seq();

        assert!(matches!(
            state.create_location(new_location(&profile.id, 200.0, 0.0)),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            state.create_location(new_location("nobody", 0.0, 0.0)),
            Err(StoreError::Invalid(_))
        ));

        let record = state
            .create_location(new_location(&profile.id, 0.0, 0.0))
            .expect("create");
        let before = state.current_seq();
        assert_eq!(before, seq + 1);
        let bad_patch = LocationPatch {
            latitude: Some(95.0),
            ..LocationPatch::default()
        };
        assert!(matches!(
            state.update_location(&record.id, &bad_patch),
            Err(StoreError::Invalid(_))
        ));
        assert_eq!(state.current_seq(), before);
        assert_eq!(
            state.list_locations(&LocationScope::All)[0].latitude,
            0.0
        );
    }

    #[test]
    fn deleting_a_profile_leaves_its_locations() {
        let state = AppState::new();
        let profile = state.create_profile(new_profile("0001")).expect("create");
        state
            .create_location(new_location(&profile.id, 1.0, 1.0))
            .expect("create");
        state.delete_profile(&profile.id).expect("delete");

        assert_eq!(state.list_locations(&LocationScope::All).len(), 1);
        assert!(state.list_profiles().is_empty());
        assert_eq!(state.delete_profile(&profile.id), Err(StoreError::NotFound));
    }

    #[test]
    fn seed_skips_duplicates_and_bad_coordinates() {
        let state = AppState::new();
        let data: SeedData = serde_json::from_str(
            r#"{
                "profiles": [
                    {"id": "p1", "profile_number": "0001"},
                    {"id": "p2", "profile_number": "0001"}
                ],
                "locations": [
                    {"id": "a", "profile_id": "p1", "name": "A", "latitude": 10.0, "longitude": 20.0},
                    {"id": "b", "profile_id": "p1", "name": "B", "latitude": 100.0, "longitude": 20.0}
                ]
            }"#,
        )
        .expect("seed json");

        assert_eq!(state.seed(data), (1, 1));
        assert_eq!(state.current_seq(), 0);
    }
}
