//! Error kinds shared by every layer of the tree: codec, pager, jdisk, engine.
use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// `key_size <= 0` at create, or an `attach` target that doesn't exist.
    InvalidArgument(String),
    /// A sector read or write failed. The tree may be left in an inconsistent
    /// in-memory state and should be discarded.
    Io(std::io::Error),
    /// A decoded node violates an on-disk invariant (`nkeys > MAXKEY`, or an
    /// LBA outside `[1, first_free_lba)`).
    Corruption(String),
    /// `allocate_lba()` would exceed the disk's sector count.
    CapacityExhausted { lba: u64, num_lbas: u64 },
    /// `key_size` is chosen so small a node (or so that `MAXKEY < 1`.
    SectorTooSmall { key_size: u32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Corruption(msg) => write!(f, "corruption: {}", msg),
            Error::CapacityExhausted { lba, num_lbas } => write!(
                f,
                "capacity exhausted: lba {} would exceed {} sectors",
                lba, num_lbas
            ),
            Error::SectorTooSmall { key_size } => write!(
                f,
                "key_size {} leaves no room for a single key per sector (MAXKEY < 1)",
                key_size
            ),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

/// Build an `Error` variant from a format string, e.g. `err!(Corruption, "lba {} out of range", lba)`.
#[macro_export]
macro_rules! err {
    (InvalidArgument, $($arg:tt)*) => {
        $crate::error::Error::InvalidArgument(format!($($arg)*))
    };
    (Corruption, $($arg:tt)*) => {
        $crate::error::Error::Corruption(format!($($arg)*))
    };
}
