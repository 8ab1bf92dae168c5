//! A [BoundedPayloadCache] holds decoded payloads under a fixed area budget.
//!
//! Nothing here expires with time: items leave only when a truncation pass finds the cache over
//! budget, and then the least recently touched unheld items go first. Two kinds of item are held
//! against eviction no matter the budget: items pinned by a [ReservationId], and items whose
//! payload is still decoding. Request-only placeholders are never held.
//!
//! Recency is tracked with a monotonic stamp bumped on every touch, so the eviction order is a
//! total order and does not depend on a wall clock.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::Payload;

type ItemMap<P> = HashMap<String, Item<P>, ahash::RandomState>;

/// Token pinning an item against eviction. Minted by the caller; releasing an id unpins every
/// item that carries it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ReservationId(u64);

impl From<u64> for ReservationId {
    fn from(id: u64) -> ReservationId {
        ReservationId(id)
    }
}

struct Item<P> {
    payload: Arc<P>,
    last_touch: u64,
    reservation: Option<ReservationId>,
}

#[derive(Debug, Clone, derive_builder::Builder)]
pub struct BoundedCacheConfig {
    /// Combined decoded-area budget. Kept items subtract their `width * height` from it during
    /// truncation, held items included.
    #[builder(default = "10_000_000")]
    pub max_area: u64,
}

impl Default for BoundedCacheConfig {
    fn default() -> BoundedCacheConfig {
        BoundedCacheConfig {
            max_area: 10_000_000,
        }
    }
}

/// A size-budgeted cache for decodable payloads, with reservation pinning.
pub struct BoundedPayloadCache<P> {
    items: ItemMap<P>,
    config: BoundedCacheConfig,
    clock: u64,
}

impl<P: Payload> BoundedPayloadCache<P> {
    pub fn new(config: BoundedCacheConfig) -> BoundedPayloadCache<P> {
        BoundedPayloadCache {
            items: Default::default(),
            config,
            clock: 0,
        }
    }

    fn stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Cache a payload under `key`, replacing any previous item for the key (and its
    /// reservation). Runs a truncation pass immediately, so an unheld payload bigger than the
    /// whole budget is evicted by its own add.
    pub fn add(&mut self, key: impl Into<String>, payload: Arc<P>) {
        let stamp = self.stamp();
        self.items.insert(
            key.into(),
            Item {
                payload,
                last_touch: stamp,
                reservation: None,
            },
        );
        self.truncate();
    }

    /// Fetch a payload. A hit refreshes the item's touch stamp, so reads act as keep-alives.
    pub fn get(&mut self, key: &str) -> Option<Arc<P>> {
        let stamp = self.stamp();
        let item = self.items.get_mut(key)?;
        item.last_touch = stamp;
        Some(item.payload.clone())
    }

    /// Insert-if-absent, then pin the item for `key` under `id`. The payload argument is only
    /// used when the key is new; reserving an already-cached item pins the existing copy.
    pub fn reserve(&mut self, key: impl Into<String>, payload: Arc<P>, id: ReservationId) {
        let stamp = self.stamp();
        let item = self.items.entry(key.into()).or_insert_with(|| Item {
            payload,
            last_touch: stamp,
            reservation: None,
        });
        item.reservation = Some(id);
    }

    /// Unpin every item currently reserved under `id`. Later truncations may then evict them.
    pub fn release_reservation(&mut self, id: ReservationId) {
        for item in self.items.values_mut() {
            if item.reservation == Some(id) {
                item.reservation = None;
            }
        }
    }

    fn is_held(item: &Item<P>) -> bool {
        // Request-only placeholders are weak, always purgeable.
        if item.payload.is_request_only() {
            return false;
        }
        if item.reservation.is_some() {
            return true;
        }
        // A payload still decoding must stay so callers can keep polling is_ready.
        !item.payload.is_ready()
    }

    /// Walk the items most recently touched first, keeping while budget remains or the item is
    /// held. Kept items consume budget either way; unheld items past the budget are deleted.
    fn truncate(&mut self) {
        let mut order: Vec<(u64, String)> = self
            .items
            .iter()
            .map(|(key, item)| (item.last_touch, key.clone()))
            .collect();
        order.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        let mut budget_left = self.config.max_area;
        let mut evicted = 0usize;
        for (_, key) in order {
            let item = &self.items[&key];
            if budget_left > 0 || Self::is_held(item) {
                budget_left = budget_left.saturating_sub(item.payload.area());
            } else {
                trace!(key = %key, area = item.payload.area(), "truncating unheld payload");
                self.items.remove(&key);
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(evicted, remaining = self.items.len(), "truncation pass done");
        }
    }

    /// True when every item that represents a real load has finished decoding; vacuously true
    /// when empty. Request-only placeholders are ignored.
    pub fn is_ready(&self) -> bool {
        !self
            .items
            .values()
            .any(|item| !item.payload.is_request_only() && !item.payload.is_ready())
    }

    /// Some payload currently in the error state, if any. When several payloads are in error,
    /// which one comes back depends on map iteration order.
    pub fn error_payload(&self) -> Option<Arc<P>> {
        self.items
            .values()
            .find(|item| item.payload.is_error())
            .map(|item| item.payload.clone())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }
}

impl<P: Payload> Default for BoundedPayloadCache<P> {
    fn default() -> BoundedPayloadCache<P> {
        BoundedPayloadCache::new(BoundedCacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use lru::LruCache;
    use proptest::prelude::*;

    use super::*;

    /// A payload whose capabilities the test can flip after it is cached.
    struct TestPayload {
        width: u64,
        height: u64,
        ready: Cell<bool>,
        error: Cell<bool>,
        request_only: bool,
    }

    impl TestPayload {
        fn ready(width: u64, height: u64) -> Arc<TestPayload> {
            Arc::new(TestPayload {
                width,
                height,
                ready: Cell::new(true),
                error: Cell::new(false),
                request_only: false,
            })
        }

        fn decoding(width: u64, height: u64) -> Arc<TestPayload> {
            let p = TestPayload::ready(width, height);
            p.ready.set(false);
            p
        }

        fn request_only() -> Arc<TestPayload> {
            Arc::new(TestPayload {
                width: 0,
                height: 0,
                ready: Cell::new(false),
                error: Cell::new(false),
                request_only: true,
            })
        }
    }

    impl Payload for TestPayload {
        fn is_request_only(&self) -> bool {
            self.request_only
        }

        fn is_ready(&self) -> bool {
            self.ready.get()
        }

        fn is_error(&self) -> bool {
            self.error.get()
        }

        fn width(&self) -> u64 {
            self.width
        }

        fn height(&self) -> u64 {
            self.height
        }
    }

    fn cache_with_budget(max_area: u64) -> BoundedPayloadCache<TestPayload> {
        BoundedPayloadCache::new(
            BoundedCacheConfigBuilder::default()
                .max_area(max_area)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn keeps_recent_prefix_within_budget() {
        // Four 100-area items against a budget of 250: the two most recent fit, the third
        // crosses the budget and is kept, the fourth is evicted.
        let mut c = cache_with_budget(250);
        for key in &["a", "b", "c", "d"] {
            c.add(*key, TestPayload::ready(10, 10));
        }
        assert!(!c.contains("a"));
        assert!(c.contains("b"));
        assert!(c.contains("c"));
        assert!(c.contains("d"));
    }

    #[test]
    fn get_is_a_keep_alive() {
        let mut c = cache_with_budget(250);
        c.add("a", TestPayload::ready(10, 10));
        c.add("b", TestPayload::ready(10, 10));
        // Touch "a" so "b" becomes the stalest.
        assert!(c.get("a").is_some());
        c.add("c", TestPayload::ready(10, 10));
        c.add("d", TestPayload::ready(10, 10));
        assert!(c.contains("a"));
        assert!(!c.contains("b"));
    }

    #[test]
    fn oversized_item_evicts_on_its_own_add() {
        let mut c = BoundedPayloadCache::default();
        // 4000 x 3000 = 12 megapixels against the 10 megapixel default ceiling.
        c.add("x", TestPayload::ready(4000, 3000));
        assert!(!c.contains("x"));
        assert!(c.error_payload().is_none());
    }

    #[test]
    fn gigantic_area_exhausts_the_budget() {
        let mut c = cache_with_budget(100);
        c.add("old", TestPayload::ready(10, 10));
        // An area past any signed range must read as budget exhaustion, not credit.
        c.add("huge", TestPayload::ready(u64::MAX, 1));
        assert!(c.contains("huge"));
        assert!(!c.contains("old"));
    }

    #[test]
    fn reserved_item_survives_any_pressure() {
        let mut c = cache_with_budget(100);
        c.reserve("pinned", TestPayload::ready(100, 100), ReservationId::from(7));
        for i in 0..10 {
            c.add(format!("filler{}", i), TestPayload::ready(10, 10));
        }
        assert!(c.contains("pinned"));
    }

    #[test]
    fn release_makes_items_evictable_again() {
        let mut c = cache_with_budget(100);
        let id = ReservationId::from(7);
        c.reserve("pin1", TestPayload::ready(100, 100), id);
        c.reserve("pin2", TestPayload::ready(100, 100), id);
        c.add("other", TestPayload::ready(10, 10));
        assert_eq!(c.len(), 3);

        // Releasing clears the id from both carriers, and the next add purges them.
        c.release_reservation(id);
        c.add("fresh", TestPayload::ready(10, 10));
        assert!(!c.contains("pin1"));
        assert!(!c.contains("pin2"));
        assert!(c.contains("fresh"));
    }

    #[test]
    fn reserving_an_existing_item_pins_it() {
        let mut c = cache_with_budget(100);
        let cached = TestPayload::ready(100, 100);
        c.add("a", cached.clone());
        // The replacement payload must not displace the cached copy.
        c.reserve("a", TestPayload::ready(1, 1), ReservationId::from(1));
        c.add("filler", TestPayload::ready(10, 10));
        let got = c.get("a").unwrap();
        assert!(Arc::ptr_eq(&got, &cached));
    }

    #[test]
    fn add_replaces_item_and_drops_reservation() {
        let mut c = cache_with_budget(100);
        c.reserve("a", TestPayload::ready(100, 100), ReservationId::from(1));
        c.add("a", TestPayload::ready(100, 100));
        // The re-added item is unreserved, so pressure can now evict it.
        c.add("filler1", TestPayload::ready(10, 10));
        c.add("filler2", TestPayload::ready(10, 10));
        assert!(!c.contains("a"));
    }

    #[test]
    fn decoding_item_is_held_until_ready() {
        let mut c = cache_with_budget(100);
        let decoding = TestPayload::decoding(100, 100);
        c.add("slow", decoding.clone());
        c.add("filler1", TestPayload::ready(10, 10));
        c.add("filler2", TestPayload::ready(10, 10));
        assert!(c.contains("slow"));

        // Once it finishes decoding, it competes like everything else.
        decoding.ready.set(true);
        c.add("filler3", TestPayload::ready(10, 10));
        assert!(!c.contains("slow"));
    }

    #[test]
    fn request_only_placeholder_is_never_held() {
        let mut c = cache_with_budget(100);
        c.reserve("ph", TestPayload::request_only(), ReservationId::from(3));
        c.add("big1", TestPayload::ready(10, 10));
        c.add("big2", TestPayload::decoding(100, 100));
        c.add("big3", TestPayload::ready(10, 10));
        // Even reserved, a request-only placeholder is purgeable under pressure.
        assert!(!c.contains("ph"));
    }

    #[test]
    fn readiness_ignores_placeholders() {
        let mut c = cache_with_budget(1_000_000);
        assert!(c.is_ready());

        let slow = TestPayload::decoding(10, 10);
        c.add("slow", slow.clone());
        c.add("done", TestPayload::ready(10, 10));
        c.add("ph", TestPayload::request_only());
        assert!(!c.is_ready());

        slow.ready.set(true);
        assert!(c.is_ready());
    }

    #[test]
    fn error_payload_reports_some_erroring_item() {
        let mut c = cache_with_budget(1_000_000);
        let bad = TestPayload::ready(10, 10);
        bad.error.set(true);
        c.add("ok", TestPayload::ready(10, 10));
        assert!(c.error_payload().is_none());
        c.add("bad", bad.clone());
        let got = c.error_payload().unwrap();
        assert!(Arc::ptr_eq(&got, &bad));
    }

    /// One-area always-ready payloads under a ceiling of N make the truncation pass equivalent
    /// to a plain LRU of capacity N; check against the `lru` crate as the known-good oracle.
    #[derive(Copy, Clone, Debug)]
    enum CacheCommand {
        Put(u64, u64),
        Get(u64),
    }

    fn cache_command_strat(
        max_key: std::ops::Range<u64>,
    ) -> prop::strategy::BoxedStrategy<CacheCommand> {
        prop_oneof![
            max_key.clone().prop_map(CacheCommand::Get),
            (max_key, 0..10_000u64).prop_map(|(k, v)| CacheCommand::Put(k, v)),
        ]
        .boxed()
    }

    struct UnitPayload(u64);

    impl Payload for UnitPayload {
        fn is_request_only(&self) -> bool {
            false
        }

        fn is_ready(&self) -> bool {
            true
        }

        fn is_error(&self) -> bool {
            false
        }

        fn width(&self) -> u64 {
            1
        }

        fn height(&self) -> u64 {
            1
        }
    }

    proptest! {
        #[test]
        fn test_against_lru_cache_bounded(
            bound in 1..200u64,
            commands in prop::collection::vec(cache_command_strat(0..50), 0..2000)
        ) {
            let mut known_good = LruCache::<u64, u64>::new(bound as usize);
            let mut ours = BoundedPayloadCache::<UnitPayload>::new(
                BoundedCacheConfigBuilder::default().max_area(bound).build().unwrap(),
            );

            for c in commands {
                match c {
                    CacheCommand::Get(k) => {
                        let left = known_good.get(&k).copied();
                        let right = ours.get(&format!("{}", k)).map(|p| p.0);
                        prop_assert_eq!(left, right);
                    }
                    CacheCommand::Put(k, v) => {
                        known_good.put(k, v);
                        ours.add(format!("{}", k), Arc::new(UnitPayload(v)));
                    }
                }
            }
        }
    }
}
