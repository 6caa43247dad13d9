//! Session registry of images placed in the terminal.
//!
//! The registry lives for one process run. Entries are spread over
//! independently locked shards so lookups for one logical id never wait on
//! inserts for another.

use std::collections::HashMap;
use std::collections::hash_map::{Entry, RandomState};
use std::hash::BuildHasher;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::domain::entities::{DecodedImage, ImageId, PlacedImage, PlacementId};
use crate::domain::errors::{DisplayError, DisplayResult};

const SHARD_COUNT: usize = 16;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Monotonic placement id generator. Ids start at 1 and are never reused.
#[derive(Debug, Default)]
pub struct PlacementIdGenerator {
    last: AtomicI32,
}

impl PlacementIdGenerator {
    /// Returns the next id, or `None` once `PlacementId::MAX` has been issued.
    pub fn next_id(&self) -> Option<PlacementId> {
        self.last
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| last.checked_add(1))
            .ok()
            .map(|last| last + 1)
    }

    #[cfg(test)]
    fn starting_after(last: PlacementId) -> Self {
        Self {
            last: AtomicI32::new(last),
        }
    }

    /// Returns the most recently issued id, `0` if none.
    #[must_use]
    pub fn last_id(&self) -> PlacementId {
        self.last.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct RegistryEntry {
    placed: PlacedImage,
    last_used: Mutex<Instant>,
}

/// Concurrency-safe map from logical id to placed image.
pub struct PlacementRegistry {
    shards: Vec<RwLock<HashMap<ImageId, Arc<RegistryEntry>>>>,
    hasher: RandomState,
    ids: PlacementIdGenerator,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PlacementRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementRegistry")
            .field("len", &self.len())
            .field("last_id", &self.ids.last_id())
            .finish_non_exhaustive()
    }
}

impl Default for PlacementRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PlacementRegistry {
    /// Creates an empty registry using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty registry with a custom clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
            ids: PlacementIdGenerator::default(),
            clock,
        }
    }

    fn shard(&self, id: &ImageId) -> &RwLock<HashMap<ImageId, Arc<RegistryEntry>>> {
        #[allow(clippy::cast_possible_truncation)]
        let index = (self.hasher.hash_one(id) as usize) % SHARD_COUNT;
        &self.shards[index]
    }

    /// Returns the placed image for `id` and refreshes its last-used time.
    pub fn lookup_and_touch(&self, id: &ImageId) -> Option<PlacedImage> {
        let entry = self.shard(id).read().get(id).cloned()?;
        *entry.last_used.lock() = self.clock.now();
        trace!(id = %id, placement_id = entry.placed.placement_id, "Session placement hit");
        Some(entry.placed.clone())
    }

    /// Places `image` under a fresh placement id.
    ///
    /// If another caller placed the same logical id first, that placement is
    /// kept, touched and returned instead, and no id is consumed.
    ///
    /// # Errors
    /// Returns `PlacementIdsExhausted` when no unused id is left.
    pub fn insert(&self, id: &ImageId, image: DecodedImage) -> DisplayResult<PlacedImage> {
        let now = self.clock.now();
        let mut shard = self.shard(id).write();

        match shard.entry(id.clone()) {
            Entry::Occupied(existing) => {
                let entry = existing.get();
                *entry.last_used.lock() = now;
                Ok(entry.placed.clone())
            }
            Entry::Vacant(slot) => {
                let placement_id = self.ids.next_id().ok_or_else(|| {
                    warn!(id = %id, "No placement ids left");
                    DisplayError::PlacementIdsExhausted
                })?;
                let placed = PlacedImage { placement_id, image };
                debug!(id = %id, placement_id = placed.placement_id, "Placed image");
                slot.insert(Arc::new(RegistryEntry {
                    placed: placed.clone(),
                    last_used: Mutex::new(now),
                }));
                Ok(placed)
            }
        }
    }

    /// Removes entries unused for longer than `max_age` and returns their
    /// placement ids.
    ///
    /// Shards are swept one after another; entries inserted concurrently may
    /// or may not be seen.
    pub fn sweep(&self, max_age: Duration) -> Vec<PlacementId> {
        let now = self.clock.now();
        let mut evicted = Vec::new();

        for shard in &self.shards {
            shard.write().retain(|id, entry| {
                let idle = now.saturating_duration_since(*entry.last_used.lock());
                if idle > max_age {
                    trace!(id = %id, placement_id = entry.placed.placement_id, ?idle, "Evicting placement");
                    evicted.push(entry.placed.placement_id);
                    false
                } else {
                    true
                }
            });
        }

        evicted.sort_unstable();
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Swept idle placements");
        }
        evicted
    }

    /// Removes every entry. Issued ids stay retired.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
        debug!("Cleared placement registry");
    }

    /// Returns true if `id` is currently placed.
    #[must_use]
    pub fn contains(&self, id: &ImageId) -> bool {
        self.shard(id).read().contains_key(id)
    }

    /// Returns the number of placed images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Returns true if nothing is placed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


#[cfg(test)]
mod tests {
    use super::test_clock::ManualClock;
    use super::*;
    use crate::domain::entities::DecodedImageFrame;
    use proptest::prelude::*;

    fn image(cols: u32) -> DecodedImage {
        DecodedImage {
            column_span: cols,
            frames: vec![DecodedImageFrame {
                width_px: 10,
                height_px: 10,
                payload_ref: "cGF0aA==".to_string(),
                delay_ms: 0,
            }],
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let registry = PlacementRegistry::new();
        let id = ImageId::new("pepe");

        assert!(registry.lookup_and_touch(&id).is_none());

        let placed = registry.insert(&id, image(2)).unwrap();
        assert_eq!(placed.placement_id, 1);

        let found = registry.lookup_and_touch(&id).unwrap();
        assert_eq!(found, placed);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_strictly_increase() {
        let registry = PlacementRegistry::new();
        let ids: Vec<PlacementId> = (0..5)
            .map(|i| registry.insert(&ImageId::new(format!("e{i}")), image(1)).unwrap().placement_id)
            .collect();

        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_second_insert_keeps_first_placement() {
        let registry = PlacementRegistry::new();
        let id = ImageId::new("pepe");

        let first = registry.insert(&id, image(2)).unwrap();
        let second = registry.insert(&id, image(5)).unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        let next = registry.insert(&ImageId::new("other"), image(1)).unwrap();
        assert_eq!(next.placement_id, 2);
    }

    #[test]
    fn test_sweep_removes_only_idle_entries() {
        let clock = ManualClock::new();
        let registry = PlacementRegistry::with_clock(clock.clone());

        let old = registry.insert(&ImageId::new("old"), image(1)).unwrap();
        clock.advance(Duration::from_secs(3600 - 10));
        registry.insert(&ImageId::new("recent"), image(1)).unwrap();
        clock.advance(Duration::from_secs(10));

        let evicted = registry.sweep(Duration::from_secs(30 * 60));

        assert_eq!(evicted, vec![old.placement_id]);
        assert!(!registry.contains(&ImageId::new("old")));
        assert!(registry.lookup_and_touch(&ImageId::new("recent")).is_some());
    }

    #[test]
    fn test_touch_postpones_eviction() {
        let clock = ManualClock::new();
        let registry = PlacementRegistry::with_clock(clock.clone());
        let id = ImageId::new("pepe");

        registry.insert(&id, image(1)).unwrap();
        clock.advance(Duration::from_secs(25 * 60));
        registry.lookup_and_touch(&id);
        clock.advance(Duration::from_secs(25 * 60));

        assert!(registry.sweep(Duration::from_secs(30 * 60)).is_empty());
        assert!(registry.contains(&id));
    }

    #[test]
    fn test_ids_not_reused_after_eviction_or_clear() {
        let clock = ManualClock::new();
        let registry = PlacementRegistry::with_clock(clock.clone());
        let id = ImageId::new("pepe");

        registry.insert(&id, image(1)).unwrap();
        clock.advance(Duration::from_secs(120));
        assert_eq!(registry.sweep(Duration::from_secs(60)), vec![1]);

        assert_eq!(registry.insert(&id, image(1)).unwrap().placement_id, 2);
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.insert(&id, image(1)).unwrap().placement_id, 3);
    }

    #[test]
    fn test_concurrent_inserts_get_unique_ids() {
        let registry = PlacementRegistry::new();

        std::thread::scope(|scope| {
            for t in 0..8 {
                let registry = &registry;
                scope.spawn(move || {
                    for i in 0..50 {
                        registry.insert(&ImageId::new(format!("t{t}-{i}")), image(1)).unwrap();
                        registry.lookup_and_touch(&ImageId::new(format!("t{t}-{i}")));
                    }
                });
            }
        });

        let mut ids: Vec<PlacementId> = (0..8)
            .flat_map(|t| (0..50).map(move |i| format!("t{t}-{i}")))
            .map(|key| registry.lookup_and_touch(&ImageId::new(key)).unwrap().placement_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();

        assert_eq!(ids.len(), 400);
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&400));
    }

    #[test]
    fn test_generator_stops_at_max_instead_of_wrapping() {
        let ids = PlacementIdGenerator::starting_after(PlacementId::MAX - 2);

        assert_eq!(ids.next_id(), Some(PlacementId::MAX - 1));
        assert_eq!(ids.next_id(), Some(PlacementId::MAX));
        assert_eq!(ids.next_id(), None);
        assert_eq!(ids.next_id(), None);
        assert_eq!(ids.last_id(), PlacementId::MAX);
    }

    #[test]
    fn test_insert_fails_once_ids_are_exhausted() {
        let registry = PlacementRegistry {
            ids: PlacementIdGenerator::starting_after(PlacementId::MAX - 1),
            ..PlacementRegistry::new()
        };
        let last = ImageId::new("last");

        let placed = registry.insert(&last, image(1)).unwrap();
        assert_eq!(placed.placement_id, PlacementId::MAX);

        let err = registry.insert(&ImageId::new("overflow"), image(1)).unwrap_err();
        assert!(matches!(err, DisplayError::PlacementIdsExhausted));
        assert!(!registry.contains(&ImageId::new("overflow")));

        // Already placed ids still resolve without a new id.
        assert_eq!(registry.insert(&last, image(1)).unwrap(), placed);
        assert!(registry.lookup_and_touch(&last).is_some());
    }

    proptest! {
        #[test]
        fn prop_generator_is_strictly_increasing(count in 1usize..200) {
            let ids = PlacementIdGenerator::default();
            let issued: Vec<PlacementId> = (0..count).map(|_| ids.next_id().unwrap()).collect();
            prop_assert!(issued.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(ids.last_id(), issued[count - 1]);
        }
    }
}
