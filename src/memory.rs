//! In-process gateway that records every native call.
//!
//! Behaves like an LMDB handle table: a fixed capacity, a catalog of created
//! databases (the main database always exists), `CREATE` only inside write
//! transactions. Failures can be injected for the next open or close.

use crate::{EngineError, NativeGateway, NativeId, OpenFlags, Transaction, status};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

#[derive(Debug)]
struct TableState {
    next_id: u32,
    capacity: usize,
    open_delay: Option<Duration>,
    catalog: HashSet<String>,
    open: HashMap<NativeId, Option<String>>,
    open_calls: u64,
    close_calls: u64,
    closed: Vec<NativeId>,
    fail_next_open: Option<i32>,
    fail_next_close: Option<i32>,
}

/// Clones share one table, so a clone kept aside still observes the calls
/// made through the environment that owns the other.
#[derive(Debug, Clone)]
pub struct MemoryGateway {
    state: Arc<Mutex<TableState>>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    /// A gateway with 128 slots whose first handle id is 1.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TableState {
                next_id: 1,
                capacity: 128,
                open_delay: None,
                catalog: HashSet::new(),
                open: HashMap::new(),
                open_calls: 0,
                close_calls: 0,
                closed: Vec::new(),
                fail_next_open: None,
                fail_next_close: None,
            })),
        }
    }

    pub fn with_first_id(self, id: u32) -> Self {
        self.lock().next_id = id;
        self
    }

    pub fn with_capacity(self, capacity: usize) -> Self {
        self.lock().capacity = capacity;
        self
    }

    /// Sleep inside every native open, widening race windows in tests.
    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.lock().open_delay = Some(delay);
        self
    }

    /// Makes the next native open fail with `code`.
    pub fn fail_next_open(&self, code: i32) {
        self.lock().fail_next_open = Some(code);
    }

    /// Makes the next native close fail with `code`.
    pub fn fail_next_close(&self, code: i32) {
        self.lock().fail_next_close = Some(code);
    }

    /// Native open calls received, failed ones included.
    pub fn open_calls(&self) -> u64 {
        self.lock().open_calls
    }

    /// Native close calls received, failed ones included.
    pub fn close_calls(&self) -> u64 {
        self.lock().close_calls
    }

    /// Ids closed successfully, in order.
    pub fn closed_ids(&self) -> Vec<NativeId> {
        self.lock().closed.clone()
    }

    /// Handles currently open in the table.
    pub fn open_handles(&self) -> usize {
        self.lock().open.len()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_handle(
        &self,
        name: Option<&str>,
        flags: OpenFlags,
        writable: bool,
    ) -> Result<NativeId, EngineError> {
        let delay = {
            let mut state = self.lock();
            state.open_calls += 1;
            state.open_delay
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut state = self.lock();
        if let Some(code) = state.fail_next_open.take() {
            return Err(EngineError::new(code, "injected open failure"));
        }
        if let Some(name) = name {
            if !state.catalog.contains(name) {
                if !flags.contains(OpenFlags::CREATE) {
                    return Err(EngineError::new(
                        status::NOT_FOUND,
                        format!("database '{}' does not exist", name),
                    ));
                }
                if !writable {
                    return Err(EngineError::new(
                        status::EACCES,
                        "creating a database requires a write transaction",
                    ));
                }
            }
        }
        if state.open.len() >= state.capacity {
            return Err(EngineError::new(status::DBS_FULL, "database handle table is full"));
        }

        if let Some(name) = name {
            state.catalog.insert(name.to_string());
        }
        let id = NativeId(state.next_id);
        state.next_id += 1;
        state.open.insert(id, name.map(str::to_owned));
        Ok(id)
    }
}

impl NativeGateway for MemoryGateway {
    fn close_handle(&self, id: NativeId) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.close_calls += 1;
        if let Some(code) = state.fail_next_close.take() {
            return Err(EngineError::new(code, "injected close failure"));
        }
        if state.open.remove(&id).is_none() {
            return Err(EngineError::new(
                status::BAD_DBI,
                format!("{} is not an open database handle", id),
            ));
        }
        state.closed.push(id);
        Ok(())
    }
}

/// Transaction for a [`MemoryGateway`].
#[derive(Debug)]
pub struct MemoryTransaction {
    active: bool,
    writable: bool,
}

impl MemoryTransaction {
    pub fn write() -> Self {
        Self {
            active: true,
            writable: true,
        }
    }

    pub fn read() -> Self {
        Self {
            active: true,
            writable: false,
        }
    }

    pub fn commit(&mut self) {
        self.active = false;
    }

    pub fn abort(&mut self) {
        self.active = false;
    }
}

impl Transaction for MemoryTransaction {
    type Gateway = MemoryGateway;

    fn is_active(&self) -> bool {
        self.active
    }

    fn request_open(
        &mut self,
        gateway: &MemoryGateway,
        name: Option<&str>,
        flags: OpenFlags,
    ) -> Result<NativeId, EngineError> {
        if !self.active {
            return Err(EngineError::new(status::BAD_TXN, "transaction is not active"));
        }
        gateway.open_handle(name, flags, self.writable)
    }
}
