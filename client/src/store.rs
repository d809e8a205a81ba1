//! The data-store collaborator.
//!
//! [`LocationStore`] is the query side the live view reloads from. The
//! in-process [`MemoryStore`] also acts as its own change feed, which makes it
//! the store of choice for tests and offline runs.

use std::cell::{Cell, RefCell};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use globe_shared::{
    ChangeKind, ChangeNotice, LocationPatch, LocationRecord, LocationScope, ProfileNumber,
    ProfileSummary, Table,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::debug;

use crate::error::FetchError;
use crate::feed::{ChangeFeed, ChangeStream, FeedMessage};

/// Read access to locations and their owning profiles.
#[allow(async_fn_in_trait)]
pub trait LocationStore {
    async fn fetch_locations(&self, scope: &LocationScope)
    -> Result<Vec<LocationRecord>, FetchError>;

    async fn fetch_profiles(&self) -> Result<Vec<ProfileSummary>, FetchError>;

    async fn find_profile(&self, id: &str) -> Result<Option<ProfileSummary>, FetchError>;

    async fn find_profile_by_number(
        &self,
        number: &ProfileNumber,
    ) -> Result<Option<ProfileSummary>, FetchError>;
}

const NOTICE_BUFFER: usize = 64;

#[derive(Debug)]
pub struct MemoryStore {
    locations: RefCell<Vec<LocationRecord>>,
    profiles: RefCell<Vec<ProfileSummary>>,
    tx: broadcast::Sender<ChangeNotice>,
    seq: Cell<u64>,
    fetches: Cell<u64>,
    pending_failure: RefCell<Option<FetchError>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_BUFFER);
        Self {
            locations: RefCell::new(Vec::new()),
            profiles: RefCell::new(Vec::new()),
            tx,
            seq: Cell::new(0),
            fetches: Cell::new(0),
            pending_failure: RefCell::new(None),
        }
    }

    /// Insert or replace by id.
    pub fn put_location(&self, record: LocationRecord) {
        let kind = {
            let mut locations = self.locations.borrow_mut();
            match locations.iter_mut().find(|existing| existing.id == record.id) {
                Some(existing) => {
                    *existing = record;
                    ChangeKind::Update
                }
                None => {
                    locations.push(record);
                    ChangeKind::Insert
                }
            }
        };
        self.notify(Table::Locations, kind);
    }

    pub fn update_location(&self, id: &str, patch: &LocationPatch) -> Option<LocationRecord> {
        let updated = {
            let mut locations = self.locations.borrow_mut();
            let record = locations.iter_mut().find(|record| record.id == id)?;
            patch.apply(record);
            record.clone()
        };
        self.notify(Table::Locations, ChangeKind::Update);
        Some(updated)
    }

    pub fn delete_location(&self, id: &str) -> bool {
        let removed = {
            let mut locations = self.locations.borrow_mut();
            let before = locations.len();
            locations.retain(|record| record.id != id);
            locations.len() != before
        };
        if removed {
            self.notify(Table::Locations, ChangeKind::Delete);
        }
        removed
    }

    /// Drop every location in one change.
    pub fn clear_locations(&self) {
        self.locations.borrow_mut().clear();
        self.notify(Table::Locations, ChangeKind::Delete);
    }

    pub fn put_profile(&self, profile: ProfileSummary) {
        let kind = {
            let mut profiles = self.profiles.borrow_mut();
            match profiles.iter_mut().find(|existing| existing.id == profile.id) {
                Some(existing) => {
                    *existing = profile;
                    ChangeKind::Update
                }
                None => {
                    profiles.push(profile);
                    ChangeKind::Insert
                }
            }
        };
        self.notify(Table::Profiles, kind);
    }

    pub fn delete_profile(&self, id: &str) -> bool {
        let removed = {
            let mut profiles = self.profiles.borrow_mut();
            let before = profiles.len();
            profiles.retain(|profile| profile.id != id);
            profiles.len() != before
        };
        if removed {
            self.notify(Table::Profiles, ChangeKind::Delete);
        }
        removed
    }

    /// The next `fetch_locations` call fails with `error`.
    pub fn fail_next_fetch(&self, error: FetchError) {
        *self.pending_failure.borrow_mut() = Some(error);
    }

    /// Number of `fetch_locations` calls served so far, failures included.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.get()
    }

    pub fn location_count(&self) -> usize {
        self.locations.borrow().len()
    }

    fn notify(&self, table: Table, kind: ChangeKind) {
        let seq = self.seq.get() + 1;
        self.seq.set(seq);
        let notice = ChangeNotice {
            seq,
            table,
            kind,
            timestamp: Utc::now().to_rfc3339(),
        };
        // No subscribers is fine; the notice is simply dropped.
        let receivers = self.tx.send(notice).unwrap_or(0);
        debug!(seq, ?table, ?kind, receivers, "change notice emitted");
    }
}

impl LocationStore for MemoryStore {
    async fn fetch_locations(
        &self,
        scope: &LocationScope,
    ) -> Result<Vec<LocationRecord>, FetchError> {
        self.fetches.set(self.fetches.get() + 1);
        if let Some(e) = self.pending_failure.borrow_mut().take() {
            return Err(e);
        }
        Ok(self
            .locations
            .borrow()
            .iter()
            .filter(|record| scope.matches(record))
            .cloned()
            .collect())
    }

    async fn fetch_profiles(&self) -> Result<Vec<ProfileSummary>, FetchError> {
        Ok(self.profiles.borrow().clone())
    }

    async fn find_profile(&self, id: &str) -> Result<Option<ProfileSummary>, FetchError> {
        Ok(self
            .profiles
            .borrow()
            .iter()
            .find(|profile| profile.id == id)
            .cloned())
    }

    async fn find_profile_by_number(
        &self,
        number: &ProfileNumber,
    ) -> Result<Option<ProfileSummary>, FetchError> {
        Ok(self
            .profiles
            .borrow()
            .iter()
            .find(|profile| &profile.profile_number == number)
            .cloned())
    }
}

impl ChangeFeed for MemoryStore {
    fn connect(&self) -> ChangeStream {
        let notices = BroadcastStream::new(self.tx.subscribe()).map(|item| match item {
            Ok(notice) => FeedMessage::Batch(vec![notice]),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => FeedMessage::Lagged(skipped),
        });
        Box::pin(stream::once(async { FeedMessage::Connected }).chain(notices))
    }
}
