use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Flags used when opening a database handle.
    ///
    /// The values match the LMDB `MDB_*` database flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct OpenFlags: u32 {
        /// Keys are compared in reverse order, from the end of the key.
        const REVERSE_KEY = 0x02;
        /// Keys may hold several sorted data items.
        const DUP_SORT = 0x04;
        /// Keys are native byte order binary integers.
        const INTEGER_KEY = 0x08;
        /// With `DUP_SORT`, all data items have the same size.
        const DUP_FIXED = 0x10;
        /// With `DUP_SORT`, data items are native byte order integers.
        const INTEGER_DUP = 0x20;
        /// With `DUP_SORT`, data items are compared in reverse order.
        const REVERSE_DUP = 0x40;
        /// Create the database if it does not exist. Needs a write transaction.
        const CREATE = 0x4_0000;
    }
}

impl OpenFlags {
    /// The flags that describe the database itself, without open-time requests.
    pub fn layout(self) -> OpenFlags {
        self.difference(OpenFlags::CREATE)
    }

    /// Whether a handle opened with `self` can serve a request for `other`.
    ///
    /// `CREATE` only matters for the first open, so it is ignored here.
    pub fn is_compatible_with(self, other: OpenFlags) -> bool {
        self.layout() == other.layout()
    }

    pub(crate) fn to_heed(self) -> heed::DatabaseFlags {
        let mut flags = heed::DatabaseFlags::empty();
        let pairs = [
            (OpenFlags::REVERSE_KEY, heed::DatabaseFlags::REVERSE_KEY),
            (OpenFlags::DUP_SORT, heed::DatabaseFlags::DUP_SORT),
            (OpenFlags::INTEGER_KEY, heed::DatabaseFlags::INTEGER_KEY),
            (OpenFlags::DUP_FIXED, heed::DatabaseFlags::DUP_FIXED),
            (OpenFlags::INTEGER_DUP, heed::DatabaseFlags::INTEGER_DUP),
            (OpenFlags::REVERSE_DUP, heed::DatabaseFlags::REVERSE_DUP),
        ];
        for (ours, theirs) in pairs {
            if self.contains(ours) {
                flags |= theirs;
            }
        }
        flags
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags::empty()
    }
}
