use crate::environment::Shared;
use crate::registry::{DbKey, SlotId};
use crate::{Encoding, Environment, HandleError, NativeGateway, NativeId, OpenFlags, Transaction};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, trace};

/// Lifecycle state of one [`DatabaseHandle`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Opened,
    Closed,
}

/// One logical reference to a database opened in an [`Environment`].
///
/// Several instances may share the same native handle; each carries its own
/// encoding and open/closed state. The native handle is closed when the last
/// instance referencing it closes.
///
/// Dropping an open instance closes it. Use [`close`](Self::close) or
/// [`dispose`](Self::dispose) to observe close errors, which `Drop` can only
/// log.
pub struct DatabaseHandle<G: NativeGateway> {
    env: Weak<Shared<G>>,
    native_id: NativeId,
    key: DbKey,
    name: String,
    encoding: Encoding,
    open_flags: OpenFlags,
    slot: SlotId,
    opened: AtomicBool,
    owns_native_resource: AtomicBool,
}

impl<G: NativeGateway> DatabaseHandle<G> {
    /// Opens the database `name` inside `txn`, or shares the native handle
    /// if the name is already open in `env`.
    ///
    /// `None` for `name` opens the engine's main database, reported under
    /// the environment's default name. `flags` and `encoding` fall back to
    /// the environment's defaults.
    ///
    /// # Errors
    ///
    /// - [`HandleError::InvalidArgument`] if `txn` is no longer active or
    ///   `name` is empty.
    /// - [`HandleError::Engine`] if the native open fails; nothing is
    ///   registered in that case. Also when `name` is already open but not
    ///   usable from `txn`, such as a handle whose opening transaction
    ///   aborted.
    /// - [`HandleError::ProtocolViolation`] if `name` is already open with
    ///   incompatible flags.
    pub fn open<T>(
        env: &Environment<G>,
        txn: &mut T,
        name: Option<&str>,
        flags: Option<OpenFlags>,
        encoding: Option<Encoding>,
    ) -> Result<Self, HandleError>
    where
        T: Transaction<Gateway = G>,
    {
        if !txn.is_active() {
            return Err(HandleError::InvalidArgument(
                "database handles can only be opened in an active transaction".into(),
            ));
        }
        if name == Some("") {
            return Err(HandleError::InvalidArgument(
                "empty database names are not allowed, use `None` for the main database".into(),
            ));
        }

        let config = env.config();
        let flags = flags.unwrap_or(config.default_flags);
        let encoding = encoding.unwrap_or(config.default_encoding);
        let key: DbKey = name.map(str::to_owned);

        let (native_id, open_flags, slot) = env.shared().acquire(&key, flags, txn)?;
        trace!(database = name.unwrap_or(&config.default_name), native_id = %native_id, slot = slot.0, "opened instance");

        Ok(Self {
            env: Arc::downgrade(env.shared()),
            native_id,
            name: name.unwrap_or(&config.default_name).to_string(),
            key,
            encoding,
            open_flags,
            slot,
            opened: AtomicBool::new(true),
            owns_native_resource: AtomicBool::new(true),
        })
    }

    /// Closes this instance.
    ///
    /// Releases its reference in the registry; the native handle is closed
    /// only if no other instance references it. Closing an already closed
    /// instance does nothing. If the native close fails the instance stays
    /// open and the close can be retried.
    pub fn close(&self) -> Result<(), HandleError> {
        let Some(shared) = self.env.upgrade() else {
            // the environment closed every native handle when it went away
            self.mark_closed();
            return Ok(());
        };

        let mut state = shared.lock();
        if !self.is_opened() {
            return Ok(());
        }
        state.release(&shared.gateway, self.native_id, self.slot)?;
        self.mark_closed();
        Ok(())
    }

    /// Closes this instance and consumes it, reporting any close error.
    ///
    /// Runs the close at most once even together with `Drop`.
    pub fn dispose(self) -> Result<(), HandleError> {
        if !self.owns_native_resource.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.close()
    }

    fn mark_closed(&self) {
        self.opened.store(false, Ordering::Release);
        self.owns_native_resource.store(false, Ordering::Release);
    }

    /// Database name; the environment's default name for the main database.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this instance refers to the unnamed main database.
    pub fn is_main(&self) -> bool {
        self.key.is_none()
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Flags the native handle was opened with.
    pub fn open_flags(&self) -> OpenFlags {
        self.open_flags
    }

    pub fn state(&self) -> HandleState {
        if self.is_opened() {
            HandleState::Opened
        } else {
            HandleState::Closed
        }
    }

    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// `true` once this instance no longer has a reference to release.
    pub fn is_released(&self) -> bool {
        !self.owns_native_resource.load(Ordering::Acquire)
    }

    /// The environment this handle was opened in, if it is still alive.
    pub fn environment(&self) -> Option<Environment<G>> {
        self.env.upgrade().map(Environment::from_shared)
    }

    /// Whether both instances wrap the same native handle.
    pub fn shares_native_with(&self, other: &DatabaseHandle<G>) -> bool {
        Weak::ptr_eq(&self.env, &other.env) && self.native_id == other.native_id
    }

    /// Identifier of the instance slot, recycled across closes of the same name.
    pub fn instance_slot(&self) -> u64 {
        self.slot.0
    }

    /// Encodes `text` with this instance's encoding.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, HandleError> {
        self.encoding.encode(text)
    }

    /// Decodes `bytes` with this instance's encoding.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, HandleError> {
        self.encoding.decode(bytes)
    }

    pub(crate) fn native_id(&self) -> NativeId {
        self.native_id
    }

    pub(crate) fn belongs_to(&self, env: &Environment<G>) -> bool {
        std::ptr::eq(self.env.as_ptr(), Arc::as_ptr(env.shared()))
    }
}

impl<G: NativeGateway> Drop for DatabaseHandle<G> {
    fn drop(&mut self) {
        if !self.owns_native_resource.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.close() {
            error!(database = %self.name, native_id = %self.native_id, error = %e, "failed to close database handle on drop");
        }
    }
}

impl<G: NativeGateway> fmt::Debug for DatabaseHandle<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("name", &self.name)
            .field("native_id", &self.native_id)
            .field("encoding", &self.encoding)
            .field("open_flags", &self.open_flags)
            .field("state", &self.state())
            .finish()
    }
}
