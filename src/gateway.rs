//! The native surface the handle registry is built on.
//!
//! LMDB ties database opens to a transaction (`mdb_dbi_open(txn, ..)`) and
//! database closes to the environment (`mdb_dbi_close(env, ..)`). The two
//! traits here keep that split: a [`Transaction`] is the only thing that can
//! open, a [`NativeGateway`] owned by the environment is the only thing that
//! can close.

use crate::{EngineError, OpenFlags};
use std::fmt;

/// Identifier of an open database in the engine's handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeId(pub u32);

impl fmt::Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dbi#{}", self.0)
    }
}

/// Environment-side native calls.
///
/// Implementations must be safe to call from any thread; the registry
/// guarantees `close_handle` is called at most once per opened id.
pub trait NativeGateway: Send + Sync {
    fn close_handle(&self, id: NativeId) -> Result<(), EngineError>;
}

/// An active engine transaction able to open database handles.
pub trait Transaction {
    type Gateway: NativeGateway;

    /// `false` once the transaction has been committed or aborted.
    fn is_active(&self) -> bool;

    /// Opens `name` (`None` for the main database) in the engine.
    ///
    /// Errors from the engine are returned as-is: not active, flags not
    /// allowed for this transaction, or handle table full.
    fn request_open(
        &mut self,
        gateway: &Self::Gateway,
        name: Option<&str>,
        flags: OpenFlags,
    ) -> Result<NativeId, EngineError>;

    /// Checks that this transaction may use `id`, a handle already open
    /// in the registry, before it is shared. Engines whose handles only
    /// become visible to other transactions on commit reject it here.
    fn check_shared(&self, _gateway: &Self::Gateway, _id: NativeId) -> Result<(), EngineError> {
        Ok(())
    }
}
