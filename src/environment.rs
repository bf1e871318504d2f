use crate::builder::DatabaseOpenOptions;
use crate::registry::{DbKey, HandleRegistry, InstancePool, RegistryStats, SlotId, describe};
use crate::{
    DatabaseHandle, Encoding, EnvironmentConfig, HandleError, NativeGateway, NativeId, OpenFlags,
    Transaction,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

/// Shared handle-lifecycle context for one engine environment.
///
/// Cloning is cheap and every clone refers to the same registry. The
/// registry and the instance pool sit behind one lock per environment, so
/// independent environments never contend.
///
/// When the last clone is dropped, native handles still registered are
/// closed once. Handles outliving their environment then close without
/// touching the engine.
pub struct Environment<G: NativeGateway> {
    shared: Arc<Shared<G>>,
}

pub(crate) struct Shared<G: NativeGateway> {
    pub(crate) gateway: G,
    pub(crate) config: EnvironmentConfig,
    state: Mutex<State>,
}

pub(crate) struct State {
    registry: HandleRegistry,
    pool: InstancePool,
}

impl State {
    /// Releases one instance's reference and recycles its slot.
    pub(crate) fn release<G: NativeGateway>(
        &mut self,
        gateway: &G,
        native_id: NativeId,
        slot: SlotId,
    ) -> Result<bool, HandleError> {
        let closed = self
            .registry
            .release(native_id, |id| gateway.close_handle(id))?;
        self.pool.reuse_notify(slot);
        Ok(closed)
    }
}

impl<G: NativeGateway> Shared<G> {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up or natively opens `key`, then assigns an instance slot.
    /// Returns the flags the native handle was opened with.
    pub(crate) fn acquire<T>(
        &self,
        key: &DbKey,
        flags: OpenFlags,
        txn: &mut T,
    ) -> Result<(NativeId, OpenFlags, SlotId), HandleError>
    where
        T: Transaction<Gateway = G>,
    {
        let mut state = self.lock();
        if let Some(live) = state.registry.native_id(key) {
            txn.check_shared(&self.gateway, live)?;
        }
        let native_id = state.registry.acquire(
            key,
            flags,
            || txn.request_open(&self.gateway, key.as_deref(), flags),
            |id| self.gateway.close_handle(id),
        )?;
        let open_flags = state.registry.open_flags(key).unwrap_or(flags);
        let slot = state.pool.checkout(key);
        Ok((native_id, open_flags, slot))
    }
}

impl<G: NativeGateway> Drop for Shared<G> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (key, native_id) in state.registry.drain() {
            debug!(database = describe(&key), native_id = %native_id, "closing handle at environment teardown");
            if let Err(e) = self.gateway.close_handle(native_id) {
                error!(database = describe(&key), native_id = %native_id, error = %e, "failed to close handle at teardown");
            }
        }
    }
}

impl<G: NativeGateway> Environment<G> {
    pub fn new(gateway: G, config: EnvironmentConfig) -> Self {
        let pool = InstancePool::new(config.pool_capacity);
        Self {
            shared: Arc::new(Shared {
                gateway,
                config,
                state: Mutex::new(State {
                    registry: HandleRegistry::new(),
                    pool,
                }),
            }),
        }
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.shared.config
    }

    pub fn gateway(&self) -> &G {
        &self.shared.gateway
    }

    /// Starts building a handle open with this environment's defaults.
    pub fn database_options(&self) -> DatabaseOpenOptions<'_, G> {
        DatabaseOpenOptions::new(self)
    }

    /// Opens (or shares) the database `name` inside `txn`.
    ///
    /// See [`DatabaseHandle::open`].
    pub fn open_database<T>(
        &self,
        txn: &mut T,
        name: Option<&str>,
        flags: Option<OpenFlags>,
        encoding: Option<Encoding>,
    ) -> Result<DatabaseHandle<G>, HandleError>
    where
        T: Transaction<Gateway = G>,
    {
        DatabaseHandle::open(self, txn, name, flags, encoding)
    }

    /// Live instances referencing the native handle for `name`; `0` if it
    /// is not open.
    pub fn reference_count(&self, name: Option<&str>) -> usize {
        self.shared.lock().registry.reference_count(&name.map(str::to_owned))
    }

    pub fn is_open(&self, name: Option<&str>) -> bool {
        self.reference_count(name) > 0
    }

    /// Flags the native handle for `name` was opened with, if it is open.
    pub fn open_flags(&self, name: Option<&str>) -> Option<OpenFlags> {
        self.shared.lock().registry.open_flags(&name.map(str::to_owned))
    }

    /// Names with an open native handle, sorted. `None` is the main database.
    pub fn open_names(&self) -> Vec<Option<String>> {
        let mut names: Vec<_> = self.shared.lock().registry.keys().cloned().collect();
        names.sort();
        names
    }

    /// Open instances of `name` tracked by the instance pool.
    pub fn live_instances(&self, name: Option<&str>) -> usize {
        self.shared.lock().pool.live_instances(&name.map(str::to_owned))
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.shared.lock();
        RegistryStats {
            recycled_instances: state.pool.recycled(),
            ..state.registry.stats()
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared<G>> {
        &self.shared
    }

    pub(crate) fn from_shared(shared: Arc<Shared<G>>) -> Self {
        Self { shared }
    }
}

impl<G: NativeGateway> Clone for Environment<G> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<G: NativeGateway> fmt::Debug for Environment<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}
