//! A disk-resident B-tree mapping fixed-size binary keys to 1024-byte
//! record payloads, persisted on top of a raw block device abstraction
//! ("jdisk") exposing fixed-size sectors addressed by logical block
//! address. Single index structure, single-threaded, no deletion, no
//! range scan, no free-space reclamation — see [`tree::Tree`].
#[macro_use]
pub mod error;

pub mod codec;
pub mod jdisk;
pub mod pager;
pub mod tree;

pub use error::Error;
pub use jdisk::{FileJDisk, JDisk, MemJDisk, SECTOR_SIZE};
pub use tree::Tree;
