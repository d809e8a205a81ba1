//! Marker overlay reconciliation.
//!
//! The overlay owns every marker handle on the canvas. Each reconcile pass
//! converges the live set to exactly the snapshot records whose profile
//! resolves, touching only what changed so unchanged markers never flicker.

use std::collections::{BTreeSet, HashMap};

use globe_shared::{LngLat, LocationRecord, ProfileMap, ProfileSummary};
use tracing::{debug, warn};

use crate::error::PlacementError;
use crate::viewport::{MapEngine, MarkerId, MarkerVisual, ViewportController};

#[derive(Debug, Clone)]
struct LiveMarker {
    handle: MarkerId,
    position: LngLat,
    visual: MarkerVisual,
    profile: ProfileSummary,
}

/// What one reconcile pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub created: usize,
    pub moved: usize,
    /// Recreated because the profile's face changed.
    pub replaced: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Records whose profile could not be resolved.
    pub orphaned: usize,
    pub failed: Vec<(String, PlacementError)>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created == 0
            && self.moved == 0
            && self.replaced == 0
            && self.removed == 0
            && self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct MarkerOverlay {
    live: HashMap<String, LiveMarker>,
    by_handle: HashMap<MarkerId, String>,
}

impl MarkerOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn live_ids(&self) -> BTreeSet<String> {
        self.live.keys().cloned().collect()
    }

    pub fn handle_of(&self, location_id: &str) -> Option<MarkerId> {
        self.live.get(location_id).map(|m| m.handle)
    }

    /// Profile bound to a marker's click target.
    pub fn profile_for(&self, handle: MarkerId) -> Option<&ProfileSummary> {
        let location_id = self.by_handle.get(&handle)?;
        self.live.get(location_id).map(|m| &m.profile)
    }

    pub fn reconcile<E: MapEngine>(
        &mut self,
        snapshot: &[LocationRecord],
        profiles: &ProfileMap,
        viewport: &mut ViewportController<E>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut previous = std::mem::take(&mut self.live);
        self.by_handle.clear();

        // Duplicate ids: the last occurrence wins.
        let last_seen: HashMap<&str, usize> = snapshot
            .iter()
            .enumerate()
            .map(|(i, record)| (record.id.as_str(), i))
            .collect();

        for (i, record) in snapshot.iter().enumerate() {
            if last_seen.get(record.id.as_str()) != Some(&i) {
                continue;
            }
            let Some(profile) = profiles.get(&record.profile_id) else {
                report.orphaned += 1;
                continue;
            };

            let visual = MarkerVisual::for_profile(profile);
            let position = record.lng_lat();

            match previous.remove(&record.id) {
                Some(mut existing) if existing.visual == visual => {
                    if existing.position == position {
                        report.unchanged += 1;
                    } else {
                        match viewport.set_marker_position(existing.handle, position) {
                            Ok(()) => {
                                existing.position = position;
                                report.moved += 1;
                            }
                            Err(e) => {
                                warn!(
                                    location_id = %record.id,
                                    error = %e,
                                    "failed to reposition marker; keeping last position"
                                );
                                report.failed.push((record.id.clone(), e));
                            }
                        }
                    }
                    existing.profile = profile.clone();
                    self.insert(record.id.clone(), existing);
                }
                Some(stale) => {
                    viewport.remove_marker(stale.handle);
                    if self.create(record, profile, visual, viewport, &mut report) {
                        report.replaced += 1;
                    }
                }
                None => {
                    if self.create(record, profile, visual, viewport, &mut report) {
                        report.created += 1;
                    }
                }
            }
        }

        for (location_id, stale) in previous {
            viewport.remove_marker(stale.handle);
            report.removed += 1;
            debug!(%location_id, "marker removed");
        }

        report
    }

    fn create<E: MapEngine>(
        &mut self,
        record: &LocationRecord,
        profile: &ProfileSummary,
        visual: MarkerVisual,
        viewport: &mut ViewportController<E>,
        report: &mut ReconcileReport,
    ) -> bool {
        let position = record.lng_lat();
        match viewport.add_marker(&visual, position) {
            Ok(handle) => {
                self.insert(
                    record.id.clone(),
                    LiveMarker {
                        handle,
                        position,
                        visual,
                        profile: profile.clone(),
                    },
                );
                true
            }
            Err(e) => {
                warn!(
                    location_id = %record.id,
                    error = %e,
                    "skipping marker the renderer rejected"
                );
                report.failed.push((record.id.clone(), e));
                false
            }
        }
    }

    fn insert(&mut self, location_id: String, marker: LiveMarker) {
        self.by_handle.insert(marker.handle, location_id.clone());
        self.live.insert(location_id, marker);
    }

    /// Destroy every live marker.
    pub fn clear<E: MapEngine>(&mut self, viewport: &mut ViewportController<E>) -> usize {
        let count = self.live.len();
        for (_, marker) in self.live.drain() {
            viewport.remove_marker(marker.handle);
        }
        self.by_handle.clear();
        count
    }
}
