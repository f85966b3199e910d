//! Translates tree-level node operations into sector reads and writes.
//!
//! This plays the role `storage::table::Pager` plays in the SQL ancestor of
//! this crate: the tree engine never calls `JDisk::read`/`write` directly,
//! it calls `Pager::load`/`store`, which own the codec and the allocator.
use tracing::trace;

use crate::codec::{self, Node, SuperBlock};
use crate::error::Error;
use crate::jdisk::JDisk;

/// LBA 0 is reserved for the superblock; the first node always lives at LBA 1.
pub const SUPER_LBA: u32 = 0;
pub const FIRST_NODE_LBA: u32 = 1;

pub struct Pager<D: JDisk> {
    disk: D,
    key_size: u32,
    maxkey: usize,
    first_free_lba: u64,
}

impl<D: JDisk> Pager<D> {
    /// Formats a fresh disk: writes the superblock and an empty root leaf at
    /// `FIRST_NODE_LBA`. Returns the pager together with that root's LBA.
    pub fn format(disk: D, key_size: u32) -> Result<(Self, u32), Error> {
        let maxkey = codec::max_keys(key_size)?;
        let root_lba = FIRST_NODE_LBA;
        let mut pager = Pager {
            disk,
            key_size,
            maxkey,
            first_free_lba: (root_lba + 1) as u64,
        };
        pager.store(root_lba, &Node::empty_leaf())?;
        pager.store_super(root_lba)?;
        Ok((pager, root_lba))
    }

    /// Reads the superblock off an existing disk and returns the pager
    /// together with its recorded root LBA.
    pub fn attach(mut disk: D) -> Result<(Self, u32), Error> {
        let mut buf = [0u8; crate::jdisk::SECTOR_SIZE];
        disk.read(SUPER_LBA, &mut buf)?;
        let sb = codec::decode_super(&buf);
        let maxkey = codec::max_keys(sb.key_size)?;
        let pager = Pager {
            disk,
            key_size: sb.key_size,
            maxkey,
            first_free_lba: sb.first_free_lba,
        };
        Ok((pager, sb.root_lba))
    }

    pub fn key_size(&self) -> u32 {
        self.key_size
    }

    pub fn maxkey(&self) -> usize {
        self.maxkey
    }

    pub fn load(&mut self, lba: u32) -> Result<Node, Error> {
        let mut buf = [0u8; crate::jdisk::SECTOR_SIZE];
        self.disk.read(lba, &mut buf)?;
        let node = codec::decode_node(&buf, self.key_size, self.maxkey)?;
        validate_lba_range(&node, self.first_free_lba)?;
        trace!(lba, nkeys = node.nkeys(), internal = node.internal, "Loaded node");
        Ok(node)
    }

    pub fn store(&mut self, lba: u32, node: &Node) -> Result<(), Error> {
        let buf = codec::encode_node(node, self.key_size, self.maxkey);
        self.disk.write(lba, &buf)?;
        trace!(lba, nkeys = node.nkeys(), internal = node.internal, "Stored node");
        Ok(())
    }

    /// Hands out the next unused LBA. Allocation is monotonic: there is no
    /// free list, and no LBA is ever reused even after the key it once held
    /// is overwritten elsewhere in the tree.
    pub fn allocate_lba(&mut self) -> u32 {
        let lba = self.first_free_lba as u32;
        self.first_free_lba += 1;
        lba
    }

    pub fn store_super(&mut self, root_lba: u32) -> Result<(), Error> {
        let sb = SuperBlock {
            key_size: self.key_size,
            root_lba,
            first_free_lba: self.first_free_lba,
        };
        let buf = codec::encode_super(&sb);
        self.disk.write(SUPER_LBA, &buf)?;
        Ok(())
    }

    /// Reads a payload sector directly, bypassing the node codec. Payload
    /// LBAs never hold an encoded node — they hold whatever bytes the
    /// caller handed to `insert`.
    pub fn read_payload(&mut self, lba: u32, buf: &mut [u8; crate::jdisk::SECTOR_SIZE]) -> Result<(), Error> {
        self.disk.read(lba, buf)
    }

    pub fn write_payload(&mut self, lba: u32, buf: &[u8; crate::jdisk::SECTOR_SIZE]) -> Result<(), Error> {
        self.disk.write(lba, buf)
    }

    pub fn disk_ref(&self) -> &D {
        &self.disk
    }

    pub fn disk_mut(&mut self) -> &mut D {
        &mut self.disk
    }

    pub fn into_disk(self) -> D {
        self.disk
    }
}

/// Enforces invariant 5 of the design (§3): `first_free_lba` strictly
/// exceeds every LBA referenced anywhere in the tree. A decoded node whose
/// LBAs fall outside `[1, first_free_lba)` didn't come from this engine —
/// surfaced as `Corruption` rather than trusted.
///
/// The one exception is an external node's trailing slot (index `nkeys`):
/// it is legitimately `0` ("unused") whenever this leaf has never lost a
/// key to a split; once it has, the slot holds a real payload LBA and is
/// checked like any other.
fn validate_lba_range(node: &Node, first_free_lba: u64) -> Result<(), Error> {
    let unused_trailing_slot = if node.internal { None } else { Some(node.nkeys()) };
    for (i, &lba) in node.lbas.iter().enumerate() {
        if Some(i) == unused_trailing_slot && lba == 0 {
            continue;
        }
        let lba = lba as u64;
        if lba < 1 || lba >= first_free_lba {
            return Err(err!(
                Corruption,
                "node lba slot {} holds {}, outside [1, {})",
                i,
                lba,
                first_free_lba
            ));
        }
    }
    Ok(())
}
