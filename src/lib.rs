//! Reference-counted lifecycle for LMDB database handles.
//!
//! An LMDB environment has a small, fixed table of named database handles.
//! Opening one needs an active transaction and closing one while another
//! transaction may still use it is undefined behavior. This crate puts a
//! per-environment registry in front of that table so that:
//!
//! - every name is opened natively at most once while it is in use,
//! - any number of [`DatabaseHandle`] instances can share that native handle,
//! - the native close happens exactly once, after the last instance closes.
//!
//! # Example
//!
//! ```rust,no_run
//! # use heed_handles::{Environment, EnvironmentConfig, HandleError, HeedGateway};
//! # use heed::EnvOpenOptions;
//! # fn main() -> Result<(), HandleError> {
//! # let heed_env = unsafe { EnvOpenOptions::new().map_size(10 * 1024 * 1024).max_dbs(8).open("./db")? };
//! let env = Environment::new(HeedGateway::new(heed_env, 8), EnvironmentConfig::default());
//!
//! let mut txn = env.write_txn()?;
//! let orders = env
//!     .database_options()
//!     .name("orders")
//!     .flags(heed_handles::OpenFlags::CREATE)
//!     .open(&mut txn)?;
//! let again = env.database_options().name("orders").open(&mut txn)?;
//! assert!(orders.shares_native_with(&again));
//! // other transactions can share the handle once this one commits
//! txn.commit()?;
//!
//! orders.close()?;
//! again.close()?; // last reference, the native handle is released here
//! # Ok(())
//! # }
//! ```

use std::error::Error as StdError;
use std::fmt;

pub mod builder;
pub mod config;
pub mod encoding;
pub mod environment;
pub mod flags;
pub mod gateway;
pub mod handle;
pub mod heed_gateway;
pub mod memory;
mod registry;

pub use builder::DatabaseOpenOptions;
pub use config::EnvironmentConfig;
pub use encoding::Encoding;
pub use environment::Environment;
pub use flags::OpenFlags;
pub use gateway::{NativeGateway, NativeId, Transaction};
pub use handle::{DatabaseHandle, HandleState};
pub use heed_gateway::{HeedGateway, HeedTransaction};
pub use memory::{MemoryGateway, MemoryTransaction};
pub use registry::RegistryStats;

/// Database name reported for handles opened without an explicit name.
pub const DEFAULT_DATABASE_NAME: &str = "master";

/// Native status codes as reported by LMDB.
pub mod status {
    pub const KEY_EXIST: i32 = -30799;
    pub const NOT_FOUND: i32 = -30798;
    pub const MAP_FULL: i32 = -30792;
    /// The environment's `max_dbs` handle table is exhausted.
    pub const DBS_FULL: i32 = -30791;
    /// Database was opened with flags incompatible with the stored ones.
    pub const INCOMPATIBLE: i32 = -30784;
    pub const BAD_TXN: i32 = -30782;
    pub const BAD_DBI: i32 = -30780;
    pub const EINVAL: i32 = 22;
    /// Write request (such as `CREATE`) in a read-only transaction.
    pub const EACCES: i32 = 13;
    pub const EIO: i32 = 5;
    /// Used when the engine failed without a status of its own.
    pub const UNKNOWN: i32 = -1;
}

/// A failure reported by the native engine, with its status preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl EngineError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {})", self.message, self.code)
    }
}

impl StdError for EngineError {}

impl From<heed::Error> for EngineError {
    fn from(error: heed::Error) -> Self {
        let code = match &error {
            heed::Error::Mdb(mdb) => match mdb {
                heed::MdbError::KeyExist => status::KEY_EXIST,
                heed::MdbError::NotFound => status::NOT_FOUND,
                heed::MdbError::MapFull => status::MAP_FULL,
                heed::MdbError::DbsFull => status::DBS_FULL,
                heed::MdbError::Incompatible => status::INCOMPATIBLE,
                heed::MdbError::BadTxn => status::BAD_TXN,
                heed::MdbError::BadDbi => status::BAD_DBI,
                heed::MdbError::Other(code) => *code,
                _ => status::UNKNOWN,
            },
            heed::Error::Io(io) => io.raw_os_error().unwrap_or(status::EIO),
            _ => status::UNKNOWN,
        };
        EngineError::new(code, error.to_string())
    }
}

/// Error type for handle lifecycle operations.
#[derive(Debug)]
pub enum HandleError {
    /// The caller passed something unusable, such as a finished transaction.
    InvalidArgument(String),
    /// The native engine refused an open or close.
    Engine(EngineError),
    /// Registry bookkeeping was asked to do something impossible: releasing
    /// an unknown native id, or reopening a live name with other flags.
    ProtocolViolation(String),
    /// Text could not be converted with the handle's encoding.
    Encoding(String),
}

impl HandleError {
    /// Native status code when the engine reported the failure.
    pub fn engine_code(&self) -> Option<i32> {
        match self {
            HandleError::Engine(e) => Some(e.code),
            _ => None,
        }
    }
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            HandleError::Engine(e) => write!(f, "Engine error: {}", e),
            HandleError::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
            HandleError::Encoding(msg) => write!(f, "Encoding error: {}", msg),
        }
    }
}

impl StdError for HandleError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            HandleError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineError> for HandleError {
    fn from(error: EngineError) -> Self {
        HandleError::Engine(error)
    }
}

impl From<heed::Error> for HandleError {
    fn from(error: heed::Error) -> Self {
        HandleError::Engine(error.into())
    }
}
