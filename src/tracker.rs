//! Change tracking for properties the client has touched.
//!
//! The tracker remembers the last-known value of every property the client has
//! read or set, and [`ChangeTracker::reconcile`] re-queries those names to
//! surface values that moved *indirectly*, as a side effect of an unrelated
//! write (e.g. lowering `bit_depth` widening the valid `frame_rate` range and
//! clamping its value).
//!
//! Tracking is additive; it never shrinks automatically. To keep long sessions
//! from degrading `set_properties` latency, the tracked set is explicitly
//! client-managed: `untrack`/`untrack_all` on the device facade remove names
//! from the reconciliation pass. No silent LRU eviction is performed.

use std::collections::BTreeMap;

use crate::driver::CameraDriver;
use crate::error::CamResult;
use crate::property::{Property, PropertySet};
use crate::registry::PropertyRegistry;

/// Last-known snapshots of every tracked property.
#[derive(Default)]
pub struct ChangeTracker {
    tracked: BTreeMap<String, Property>,
}

impl ChangeTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fresh snapshot for a property the client just read or wrote.
    pub fn note(&mut self, property: Property) {
        self.tracked.insert(property.name.clone(), property);
    }

    /// Stops tracking one name. Returns true if it was tracked.
    pub fn untrack(&mut self, name: &str) -> bool {
        self.tracked.remove(name).is_some()
    }

    /// Clears the tracked set.
    pub fn untrack_all(&mut self) {
        self.tracked.clear();
    }

    /// Number of tracked properties.
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// True if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Snapshot of all tracked properties (used as the capture-time
    /// `camera_properties` metadata).
    pub fn properties(&self) -> PropertySet {
        let mut set = PropertySet::new();
        for property in self.tracked.values() {
            set.insert(property.clone());
        }
        set
    }

    /// Re-queries every tracked property and returns only those whose value
    /// differs from the stored snapshot, updating the snapshots afterwards.
    ///
    /// Names in `exclude` are skipped: a write's own effect on a property is
    /// reported via `applied`, not via reconciliation, even though the name
    /// remains tracked going forward. Calling `reconcile` twice without an
    /// intervening write yields an empty set the second time.
    pub async fn reconcile<D: CameraDriver>(
        &mut self,
        registry: &PropertyRegistry<D>,
        exclude: &[&str],
    ) -> CamResult<PropertySet> {
        let mut changed = PropertySet::new();
        let names: Vec<String> = self
            .tracked
            .keys()
            .filter(|n| !exclude.contains(&n.as_str()))
            .cloned()
            .collect();

        for name in names {
            let fresh = registry.snapshot(&name).await?;
            let moved = self
                .tracked
                .get(&name)
                .map(|old| old.value != fresh.value)
                .unwrap_or(true);
            if moved {
                changed.insert(fresh.clone());
            }
            self.tracked.insert(name, fresh);
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCamera;
    use crate::property::{names, PropertyValue};
    use std::sync::Arc;

    async fn setup() -> (PropertyRegistry<MockCamera>, ChangeTracker) {
        let driver = Arc::new(MockCamera::open("mock:0").await.unwrap());
        (PropertyRegistry::new(driver), ChangeTracker::new())
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let (registry, mut tracker) = setup().await;
        let set = registry
            .get(&[names::FRAME_RATE, names::EXPOSURE_TIME])
            .await
            .unwrap();
        for p in set {
            tracker.note(p);
        }

        // Nothing changed underneath: both passes are empty.
        assert!(tracker.reconcile(&registry, &[]).await.unwrap().is_empty());
        assert!(tracker.reconcile(&registry, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_reports_indirect_change_once() {
        let (registry, mut tracker) = setup().await;

        // Track frame_rate at a value only valid for 8-bit readout.
        let outcome = registry
            .set(&[
                (names::BIT_DEPTH, PropertyValue::Integer(8)),
                (names::FRAME_RATE, PropertyValue::Float(400.0)),
            ])
            .await
            .unwrap();
        for p in outcome.applied {
            tracker.note(p);
        }

        // Switching to 16-bit clamps frame_rate down as a side effect.
        let outcome = registry
            .set(&[(names::BIT_DEPTH, PropertyValue::Integer(16))])
            .await
            .unwrap();
        for p in outcome.applied.clone() {
            tracker.note(p);
        }

        let changed = tracker
            .reconcile(&registry, &[names::BIT_DEPTH])
            .await
            .unwrap();
        assert_eq!(
            changed.value(names::FRAME_RATE),
            Some(&PropertyValue::Float(250.0))
        );
        // The write's own property is excluded, not double-reported.
        assert!(!changed.contains(names::BIT_DEPTH));

        // And the follow-up pass is empty again.
        assert!(tracker.reconcile(&registry, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_untrack_removes_from_reconciliation() {
        let (registry, mut tracker) = setup().await;
        let set = registry.get(&[names::FRAME_RATE]).await.unwrap();
        for p in set {
            tracker.note(p);
        }
        assert_eq!(tracker.len(), 1);
        assert!(tracker.untrack(names::FRAME_RATE));
        assert!(tracker.is_empty());
        assert!(!tracker.untrack(names::FRAME_RATE));
    }
}
