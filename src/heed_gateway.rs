//! Gateway over a heed (LMDB) environment.
//!
//! heed keeps LMDB database handles open for the life of the `Env` and has
//! no dbi close. [`HeedGateway`] therefore exposes a bounded table of opened
//! `heed::Database`s, sized like the environment's `max_dbs`; a [`NativeId`]
//! names a slot in that table and closing it frees the slot.
//!
//! LMDB discards a dbi opened in a transaction that does not commit. A slot
//! filled by a [`HeedTransaction`] is only visible to that transaction until
//! it commits; if it aborts, the slot turns stale and reports `BAD_DBI`
//! until every instance referencing it has closed.

use crate::{
    DatabaseHandle, EngineError, Environment, HandleError, NativeGateway, NativeId, OpenFlags,
    Transaction, status,
};
use heed::types::Bytes;
use heed::{Database as HeedDatabase, Env, RoTxn, RwTxn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Opened by the transaction with this token, not yet committed.
    Pending(u64),
    Committed,
    /// The opening transaction aborted; LMDB dropped the dbi.
    Aborted,
}

struct Slot {
    database: HeedDatabase<Bytes, Bytes>,
    state: SlotState,
}

type Slots = Vec<Option<Slot>>;

pub struct HeedGateway {
    env: Env,
    capacity: usize,
    slots: Mutex<Slots>,
    next_token: AtomicU64,
}

impl HeedGateway {
    /// Creates a gateway for `env` with room for `capacity` open databases.
    ///
    /// Should not exceed `EnvOpenOptions::max_dbs`: heed never closes an LMDB
    /// dbi, so a freed slot only frees room in this table.
    pub fn new(env: Env, capacity: u32) -> Self {
        Self {
            env,
            capacity: capacity as usize,
            slots: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Number of occupied slots, stale ones included.
    pub fn open_slots(&self) -> usize {
        self.slots().iter().filter(|slot| slot.is_some()).count()
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_free_slot(&self) -> Result<(), EngineError> {
        let slots = self.slots();
        if slots.len() < self.capacity || slots.iter().any(Option::is_none) {
            Ok(())
        } else {
            Err(self.table_full())
        }
    }

    fn table_full(&self) -> EngineError {
        EngineError::new(
            status::DBS_FULL,
            format!("database handle table is full ({} slots)", self.capacity),
        )
    }

    fn insert(&self, database: HeedDatabase<Bytes, Bytes>, token: u64) -> Result<NativeId, EngineError> {
        let mut slots = self.slots();
        let index = match slots.iter().position(Option::is_none) {
            Some(index) => index,
            None if slots.len() < self.capacity => {
                slots.push(None);
                slots.len() - 1
            }
            None => return Err(self.table_full()),
        };
        slots[index] = Some(Slot {
            database,
            state: SlotState::Pending(token),
        });
        Ok(NativeId(index as u32))
    }

    fn database(&self, id: NativeId) -> Result<HeedDatabase<Bytes, Bytes>, EngineError> {
        match self.slots().get(id.0 as usize) {
            Some(Some(slot)) if slot.state != SlotState::Aborted => Ok(slot.database),
            Some(Some(_)) => Err(aborted(id)),
            _ => Err(not_open(id)),
        }
    }

    /// Whether the transaction holding `token` may use the slot `id`.
    fn check_visible(&self, id: NativeId, token: u64) -> Result<(), EngineError> {
        match self.slots().get(id.0 as usize) {
            Some(Some(slot)) => match slot.state {
                SlotState::Committed => Ok(()),
                SlotState::Pending(owner) if owner == token => Ok(()),
                SlotState::Pending(_) => Err(EngineError::new(
                    status::BAD_DBI,
                    format!("{} was opened by a transaction that has not committed", id),
                )),
                SlotState::Aborted => Err(aborted(id)),
            },
            _ => Err(not_open(id)),
        }
    }

    fn begin(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Publishes or invalidates every slot opened under `token`.
    fn settle(&self, token: u64, committed: bool) {
        let state = if committed {
            SlotState::Committed
        } else {
            SlotState::Aborted
        };
        for (index, slot) in self.slots().iter_mut().enumerate() {
            if let Some(slot) = slot {
                if slot.state == SlotState::Pending(token) {
                    slot.state = state;
                    debug!(native_id = %NativeId(index as u32), committed, "settled database handle");
                }
            }
        }
    }
}

fn not_open(id: NativeId) -> EngineError {
    EngineError::new(status::BAD_DBI, format!("{} is not an open database handle", id))
}

fn aborted(id: NativeId) -> EngineError {
    EngineError::new(
        status::BAD_DBI,
        format!("{} was opened by a transaction that aborted", id),
    )
}

impl NativeGateway for HeedGateway {
    fn close_handle(&self, id: NativeId) -> Result<(), EngineError> {
        match self.slots().get_mut(id.0 as usize).and_then(Option::take) {
            Some(_) => Ok(()),
            None => Err(not_open(id)),
        }
    }
}

enum Txn<'g> {
    Write(RwTxn<'g>),
    Read(RoTxn<'g>),
}

/// Marks the opens of an unfinished transaction aborted when dropped.
struct PendingOpens<'g> {
    gateway: &'g HeedGateway,
    token: u64,
    settled: bool,
}

impl PendingOpens<'_> {
    fn settle(&mut self, committed: bool) {
        if !self.settled {
            self.settled = true;
            self.gateway.settle(self.token, committed);
        }
    }
}

impl Drop for PendingOpens<'_> {
    fn drop(&mut self) {
        self.settle(false);
    }
}

/// A heed transaction able to open database handles.
///
/// Handles opened through it become shareable with other transactions only
/// once [`commit`](Self::commit) succeeds. Dropping it, or calling
/// [`abort`](Self::abort), aborts the heed transaction and leaves those
/// handles stale. Opens with [`OpenFlags::CREATE`] need a write transaction.
pub struct HeedTransaction<'g> {
    // declared first so the heed transaction ends before its opens settle
    txn: Txn<'g>,
    pending: PendingOpens<'g>,
}

impl<'g> HeedTransaction<'g> {
    pub fn write(gateway: &'g HeedGateway) -> Result<Self, HandleError> {
        let txn = Txn::Write(gateway.env().write_txn()?);
        Ok(Self::with_txn(gateway, txn))
    }

    pub fn read(gateway: &'g HeedGateway) -> Result<Self, HandleError> {
        let txn = Txn::Read(gateway.env().read_txn()?);
        Ok(Self::with_txn(gateway, txn))
    }

    fn with_txn(gateway: &'g HeedGateway, txn: Txn<'g>) -> Self {
        Self {
            txn,
            pending: PendingOpens {
                gateway,
                token: gateway.begin(),
                settled: false,
            },
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.txn, Txn::Write(_))
    }

    /// The underlying write transaction, `None` for a read transaction.
    pub fn rw_txn(&mut self) -> Option<&mut RwTxn<'g>> {
        match &mut self.txn {
            Txn::Write(wtxn) => Some(wtxn),
            Txn::Read(_) => None,
        }
    }

    pub fn ro_txn(&self) -> &RoTxn<'g> {
        match &self.txn {
            Txn::Write(wtxn) => &**wtxn,
            Txn::Read(rtxn) => rtxn,
        }
    }

    /// Commits the heed transaction and publishes the handles it opened.
    pub fn commit(self) -> Result<(), HandleError> {
        let HeedTransaction { txn, mut pending } = self;
        let result = match txn {
            Txn::Write(wtxn) => wtxn.commit(),
            Txn::Read(rtxn) => rtxn.commit(),
        };
        pending.settle(result.is_ok());
        Ok(result?)
    }

    /// Aborts the heed transaction; handles it opened turn stale.
    pub fn abort(self) {
        drop(self);
    }
}

impl Transaction for HeedTransaction<'_> {
    type Gateway = HeedGateway;

    fn is_active(&self) -> bool {
        // commit and abort consume the transaction
        true
    }

    fn request_open(
        &mut self,
        gateway: &HeedGateway,
        name: Option<&str>,
        flags: OpenFlags,
    ) -> Result<NativeId, EngineError> {
        if !std::ptr::eq(gateway, self.pending.gateway) {
            return Err(EngineError::new(
                status::EINVAL,
                "transaction belongs to another environment",
            ));
        }
        gateway.ensure_free_slot()?;

        let mut options = gateway.env().database_options().types::<Bytes, Bytes>();
        if let Some(name) = name {
            options.name(name);
        }
        options.flags(flags.to_heed());

        let create = flags.contains(OpenFlags::CREATE);
        let database = match &mut self.txn {
            Txn::Write(wtxn) if create => Some(options.create(wtxn)?),
            Txn::Write(wtxn) => options.open(&**wtxn)?,
            Txn::Read(_) if create => {
                return Err(EngineError::new(
                    status::EACCES,
                    "creating a database requires a write transaction",
                ));
            }
            Txn::Read(rtxn) => options.open(&*rtxn)?,
        };
        let database = match database {
            Some(database) => database,
            None => {
                return Err(EngineError::new(
                    status::NOT_FOUND,
                    format!("database '{}' does not exist", name.unwrap_or("<main>")),
                ));
            }
        };

        gateway.insert(database, self.pending.token)
    }

    fn check_shared(&self, gateway: &HeedGateway, id: NativeId) -> Result<(), EngineError> {
        gateway.check_visible(id, self.pending.token)
    }
}

impl Environment<HeedGateway> {
    /// Starts a heed write transaction that can open handles in this
    /// environment.
    pub fn write_txn(&self) -> Result<HeedTransaction<'_>, HandleError> {
        HeedTransaction::write(self.gateway())
    }

    /// Starts a heed read transaction that can open handles in this
    /// environment.
    pub fn read_txn(&self) -> Result<HeedTransaction<'_>, HandleError> {
        HeedTransaction::read(self.gateway())
    }

    /// The byte-level heed database behind an open handle.
    ///
    /// Fails with `BAD_DBI` if the transaction that opened the handle
    /// aborted.
    pub fn database(
        &self,
        handle: &DatabaseHandle<HeedGateway>,
    ) -> Result<HeedDatabase<Bytes, Bytes>, HandleError> {
        if !handle.belongs_to(self) {
            return Err(HandleError::InvalidArgument(format!(
                "database '{}' was opened in another environment",
                handle.name()
            )));
        }
        if !handle.is_opened() {
            return Err(HandleError::InvalidArgument(format!(
                "database '{}' is closed",
                handle.name()
            )));
        }
        Ok(self.gateway().database(handle.native_id())?)
    }
}
