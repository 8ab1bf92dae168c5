//! A [TtlCache] maps string keys (usually URLs) to payloads, and keeps each payload alive only
//! while it is touched often enough.
//!
//! Liveness runs on two independent axes, ticks and wall-clock seconds, both advanced by the host
//! loop through [TtlCache::update]. An entry with a non-zero TTL on an axis dies once that axis
//! has advanced past its last touch by more than the TTL; a TTL of zero disables the axis. The
//! sweep itself runs on a wall-clock cadence, not on every update call.
//!
//! Entries live in an arena owned by the cache and are addressed by [EntryId]. Handing out indices
//! instead of references keeps callers from holding aliases into storage that a sweep may evict:
//! operations on a stale id are no-ops, never dangling access.

use std::collections::HashMap;

use tracing::{debug, trace};

type KeyMap = HashMap<String, EntryId, ahash::RandomState>;

/// Handle to an entry in a [TtlCache]. Only meaningful to the cache that minted it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

/// Where an entry is in its lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum EntryState {
    /// Reachable through the key map.
    Active,
    /// Removed by the TTL sweep. A touch puts it back under its key.
    Evicted,
    /// Explicitly freed. Terminal.
    Gone,
}

#[derive(Debug)]
struct Entry<T> {
    key: String,
    /// Some while Active or Evicted; dropped on the Gone transition so a tombstone slot never
    /// keeps an expensive payload alive.
    payload: Option<T>,
    state: EntryState,
    touch_ticks: u64,
    touch_seconds: f64,
    /// 0 means no limit on this axis.
    ttl_ticks: u64,
    /// 0 means no limit on this axis.
    ttl_seconds: f64,
}

impl<T> Entry<T> {
    /// An entry survives the sweep while every axis with a non-zero TTL still satisfies
    /// `touch + ttl >= now`. Both axes at zero means immortal.
    fn is_still_alive(&self, now_ticks: u64, now_seconds: f64) -> bool {
        (self.ttl_ticks == 0 || self.touch_ticks.saturating_add(self.ttl_ticks) >= now_ticks)
            && (self.ttl_seconds == 0.0 || self.touch_seconds + self.ttl_seconds >= now_seconds)
    }
}

#[derive(Debug, Clone, derive_builder::Builder)]
pub struct TtlCacheConfig {
    /// Wall-clock time that must accumulate between TTL sweeps.
    #[builder(default = "100.0")]
    pub sweep_interval: f64,
}

impl Default for TtlCacheConfig {
    fn default() -> TtlCacheConfig {
        TtlCacheConfig {
            sweep_interval: 100.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// `set_item` found the key already active. Free the old entry first, or use
    /// [TtlCache::replace_item] to displace it explicitly.
    #[error("key {0:?} already holds a cached entry")]
    KeyOccupied(String),
}

/// A keyed cache with touch-based liveness, owned and driven by its host.
pub struct TtlCache<T> {
    entries: Vec<Entry<T>>,
    key_map: KeyMap,
    config: TtlCacheConfig,
    update_ticks: u64,
    update_seconds: f64,
    last_check: f64,
    /// Scratch list reused across sweeps.
    dead: Vec<EntryId>,
}

impl<T> TtlCache<T> {
    pub fn new(config: TtlCacheConfig) -> TtlCache<T> {
        TtlCache {
            entries: Vec::new(),
            key_map: Default::default(),
            config,
            update_ticks: 0,
            update_seconds: 0.0,
            last_check: 0.0,
            dead: Vec::new(),
        }
    }

    /// Cache a payload under `key` and return its handle, touched as of the current counters.
    ///
    /// An occupied key is an error: a silent overwrite would leave the old entry alive but
    /// unreachable, so displacing must be explicit.
    pub fn set_item(&mut self, key: impl Into<String>, payload: T) -> Result<EntryId, CacheError> {
        let key = key.into();
        if self.key_map.contains_key(&key) {
            return Err(CacheError::KeyOccupied(key));
        }
        Ok(self.install(key, payload))
    }

    /// Cache a payload under `key`, freeing whatever entry previously held the key. The displaced
    /// entry becomes permanently dead, not resurrectable.
    pub fn replace_item(&mut self, key: impl Into<String>, payload: T) -> EntryId {
        let key = key.into();
        if let Some(old) = self.key_map.remove(&key) {
            let entry = &mut self.entries[old.0];
            entry.state = EntryState::Gone;
            entry.payload = None;
        }
        self.install(key, payload)
    }

    fn install(&mut self, key: String, payload: T) -> EntryId {
        let id = EntryId(self.entries.len());
        self.entries.push(Entry {
            key: key.clone(),
            payload: Some(payload),
            state: EntryState::Active,
            touch_ticks: self.update_ticks,
            touch_seconds: self.update_seconds,
            ttl_ticks: 0,
            ttl_seconds: 0.0,
        });
        self.key_map.insert(key, id);
        id
    }

    /// Set the liveness window for an entry; 0 disables the limit on that axis. Returns the id so
    /// the call chains off `set_item`.
    pub fn set_time_to_live(&mut self, id: EntryId, ticks: u64, seconds: f64) -> EntryId {
        let entry = &mut self.entries[id.0];
        entry.ttl_ticks = ticks;
        entry.ttl_seconds = seconds;
        id
    }

    /// Fetch a payload by key. Does not refresh liveness; use [TtlCache::touch] for keep-alive.
    pub fn get_item(&self, key: &str) -> Option<&T> {
        let id = self.key_map.get(key)?;
        self.entries[id.0].payload.as_ref()
    }

    /// Keep an entry alive.
    ///
    /// Active entries get their touch counters refreshed. An entry the sweep evicted is
    /// reinserted under its original key, same identity, no counter refresh; if a newer entry
    /// took the key in the meantime the resurrection is abandoned and the newer entry wins.
    /// Freed entries stay dead.
    pub fn touch(&mut self, id: EntryId) {
        let now_ticks = self.update_ticks;
        let now_seconds = self.update_seconds;
        let entry = &mut self.entries[id.0];
        match entry.state {
            EntryState::Active => {
                entry.touch_ticks = now_ticks;
                entry.touch_seconds = now_seconds;
            }
            EntryState::Evicted => {
                if !self.key_map.contains_key(&entry.key) {
                    trace!(key = %entry.key, "resurrecting evicted entry");
                    entry.state = EntryState::Active;
                    self.key_map.insert(entry.key.clone(), id);
                }
            }
            EntryState::Gone => {}
        }
    }

    /// Explicitly free an entry. Idempotent; unlike a TTL eviction, a freed entry can not be
    /// brought back by a later touch.
    pub fn free(&mut self, id: EntryId) {
        let entry = &mut self.entries[id.0];
        if entry.state == EntryState::Active {
            self.key_map.remove(&entry.key);
        }
        entry.state = EntryState::Gone;
        entry.payload = None;
    }

    /// One sweep: evict every active entry whose liveness window has elapsed. Evicted entries
    /// remain resurrectable via [TtlCache::touch].
    pub fn check_ttl(&mut self) {
        let mut dead = std::mem::take(&mut self.dead);
        for &id in self.key_map.values() {
            if !self.entries[id.0].is_still_alive(self.update_ticks, self.update_seconds) {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            debug!(count = dead.len(), "ttl sweep evicting entries");
        }
        for id in dead.drain(..) {
            let entry = &mut self.entries[id.0];
            self.key_map.remove(&entry.key);
            entry.state = EntryState::Evicted;
        }
        self.dead = dead;
    }

    /// Advance the cache's clocks by `ticks` ticks and `delta` wall-clock time. Runs a sweep once
    /// enough wall-clock time has accumulated since the last one; the cadence is time-driven, not
    /// per-call.
    pub fn update(&mut self, ticks: u64, delta: f64) {
        self.update_ticks += ticks;
        self.update_seconds += delta;
        if self.update_seconds >= self.last_check + self.config.sweep_interval {
            self.last_check = self.update_seconds;
            self.check_ttl();
        }
    }

    /// Free every active entry unconditionally. Not TTL-driven, so nothing is resurrectable
    /// afterwards.
    pub fn clear(&mut self) {
        for (_, id) in self.key_map.drain() {
            let entry = &mut self.entries[id.0];
            entry.state = EntryState::Gone;
            entry.payload = None;
        }
    }

    /// Number of active entries.
    pub fn len(&self) -> usize {
        self.key_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_map.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_map.contains_key(key)
    }
}

impl<T> Default for TtlCache<T> {
    fn default() -> TtlCache<T> {
        TtlCache::new(TtlCacheConfig::default())
    }
}
