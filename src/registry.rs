use crate::{EngineError, HandleError, NativeId, OpenFlags};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// Registry key: `None` is the engine's unnamed main database.
pub(crate) type DbKey = Option<String>;

pub(crate) fn describe(key: &DbKey) -> &str {
    key.as_deref().unwrap_or("<main>")
}

/// Counters describing what the registry has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Native open calls issued (entry went from absent to open).
    pub native_opens: u64,
    /// Native close calls that succeeded (entry went back to absent).
    pub native_closes: u64,
    /// Opens served from an existing entry without a native call.
    pub shared_opens: u64,
    /// Releases that only dropped a reference.
    pub detached_releases: u64,
    /// Opens that reused a pooled instance slot.
    pub recycled_instances: u64,
    /// Entries currently open.
    pub open_entries: usize,
}

#[derive(Debug)]
struct Entry {
    native_id: NativeId,
    flags: OpenFlags,
    live: usize,
}

/// Deduplicates native handles by name and decides when one may be closed.
///
/// Callers serialize access; every method assumes it runs under the
/// environment lock.
#[derive(Debug, Default)]
pub(crate) struct HandleRegistry {
    by_name: HashMap<DbKey, Entry>,
    by_id: HashMap<NativeId, DbKey>,
    stats: RegistryStats,
}

impl HandleRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the native id for `key`, calling `open` only if no entry
    /// exists. A failed `open` leaves the registry untouched. An id the
    /// engine hands out that is already registered to another name is
    /// passed to `close` and rejected.
    pub(crate) fn acquire<F, C>(
        &mut self,
        key: &DbKey,
        flags: OpenFlags,
        open: F,
        close: C,
    ) -> Result<NativeId, HandleError>
    where
        F: FnOnce() -> Result<NativeId, EngineError>,
        C: FnOnce(NativeId) -> Result<(), EngineError>,
    {
        if let Some(entry) = self.by_name.get_mut(key) {
            if !entry.flags.is_compatible_with(flags) {
                warn!(
                    database = describe(key),
                    open_flags = ?entry.flags,
                    requested = ?flags,
                    "rejected reopen with incompatible flags"
                );
                return Err(HandleError::ProtocolViolation(format!(
                    "database '{}' is open with flags {:?}, requested {:?}",
                    describe(key),
                    entry.flags.layout(),
                    flags.layout()
                )));
            }
            entry.live += 1;
            self.stats.shared_opens += 1;
            trace!(database = describe(key), native_id = %entry.native_id, live = entry.live, "shared handle");
            return Ok(entry.native_id);
        }

        let native_id = open()?;
        if let Some(owner) = self.by_id.get(&native_id) {
            warn!(database = describe(key), native_id = %native_id, owner = describe(owner), "engine returned a registered id");
            if let Err(e) = close(native_id) {
                warn!(native_id = %native_id, error = %e, "failed to close colliding handle");
            }
            return Err(HandleError::ProtocolViolation(format!(
                "engine returned {} for '{}' but it is registered to '{}'",
                native_id,
                describe(key),
                describe(owner)
            )));
        }

        self.by_name.insert(
            key.clone(),
            Entry {
                native_id,
                flags,
                live: 1,
            },
        );
        self.by_id.insert(native_id, key.clone());
        self.stats.native_opens += 1;
        debug!(database = describe(key), native_id = %native_id, ?flags, "opened native handle");
        Ok(native_id)
    }

    /// Drops one reference to `native_id`. On the last one, `close` runs
    /// first and the entry is only removed once it succeeds, so a failed
    /// close can be retried. Returns whether the native handle was closed.
    pub(crate) fn release<F>(&mut self, native_id: NativeId, close: F) -> Result<bool, HandleError>
    where
        F: FnOnce(NativeId) -> Result<(), EngineError>,
    {
        let Some(key) = self.by_id.get(&native_id).cloned() else {
            warn!(native_id = %native_id, "release of unregistered handle");
            return Err(HandleError::ProtocolViolation(format!(
                "release of {} which is not registered",
                native_id
            )));
        };
        let Some(entry) = self.by_name.get_mut(&key) else {
            return Err(HandleError::ProtocolViolation(format!(
                "{} is indexed under '{}' but has no entry",
                native_id,
                describe(&key)
            )));
        };

        if entry.live > 1 {
            entry.live -= 1;
            self.stats.detached_releases += 1;
            trace!(database = describe(&key), native_id = %native_id, live = entry.live, "detached handle");
            return Ok(false);
        }

        close(native_id)?;
        self.by_name.remove(&key);
        self.by_id.remove(&native_id);
        self.stats.native_closes += 1;
        debug!(database = describe(&key), native_id = %native_id, "closed native handle");
        Ok(true)
    }

    /// Empties the registry, returning every native id still open.
    pub(crate) fn drain(&mut self) -> Vec<(DbKey, NativeId)> {
        self.by_id.clear();
        self.by_name
            .drain()
            .map(|(key, entry)| (key, entry.native_id))
            .collect()
    }

    pub(crate) fn native_id(&self, key: &DbKey) -> Option<NativeId> {
        self.by_name.get(key).map(|entry| entry.native_id)
    }

    pub(crate) fn reference_count(&self, key: &DbKey) -> usize {
        self.by_name.get(key).map_or(0, |entry| entry.live)
    }

    pub(crate) fn open_flags(&self, key: &DbKey) -> Option<OpenFlags> {
        self.by_name.get(key).map(|entry| entry.flags)
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &DbKey> {
        self.by_name.keys()
    }

    pub(crate) fn stats(&self) -> RegistryStats {
        RegistryStats {
            open_entries: self.by_name.len(),
            ..self.stats
        }
    }
}

/// Identifies one `DatabaseHandle` instance slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotId(pub(crate) u64);

/// Recycles instance slots of closed handles for later opens of the same
/// name. Independent from native reference counting.
#[derive(Debug)]
pub(crate) struct InstancePool {
    capacity: usize,
    next_slot: u64,
    live: HashMap<SlotId, DbKey>,
    free: HashMap<DbKey, Vec<SlotId>>,
    recycled: u64,
}

impl InstancePool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_slot: 0,
            live: HashMap::new(),
            free: HashMap::new(),
            recycled: 0,
        }
    }

    /// Hands out a slot for a new instance of `key`, preferring a pooled one.
    pub(crate) fn checkout(&mut self, key: &DbKey) -> SlotId {
        let pooled = match self.free.get_mut(key) {
            Some(free) => {
                let slot = free.pop();
                if free.is_empty() {
                    self.free.remove(key);
                }
                slot
            }
            None => None,
        };
        let slot = match pooled {
            Some(slot) => {
                self.recycled += 1;
                trace!(database = describe(key), slot = slot.0, "recycled instance slot");
                slot
            }
            None => {
                let slot = SlotId(self.next_slot);
                self.next_slot += 1;
                slot
            }
        };
        self.live.insert(slot, key.clone());
        slot
    }

    /// Marks the instance in `slot` as closed. Its slot goes back to the
    /// pool if there is room; returns `false` if the slot was not live.
    pub(crate) fn reuse_notify(&mut self, slot: SlotId) -> bool {
        let Some(key) = self.live.remove(&slot) else {
            return false;
        };
        if self.capacity == 0 {
            return true;
        }
        let free = self.free.entry(key).or_default();
        if free.len() < self.capacity {
            free.push(slot);
        }
        true
    }

    pub(crate) fn live_instances(&self, key: &DbKey) -> usize {
        self.live.values().filter(|k| *k == key).count()
    }

    pub(crate) fn recycled(&self) -> u64 {
        self.recycled
    }

    /// Names with at least one pooled slot.
    #[cfg(test)]
    pub(crate) fn pooled_names(&self) -> usize {
        self.free.len()
    }
}
