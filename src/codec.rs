//! Sector codec: pure, stateless encode/decode of the superblock and node
//! sectors. No I/O happens here — this module only knows about byte layout.
use crate::error::Error;
use crate::jdisk::SECTOR_SIZE;

/// Superblock field layout (sector 0). Multi-byte integers are little-endian;
/// the remainder of the sector is left zeroed.
const SUPER_KEY_SIZE_OFFSET: usize = 0;
const SUPER_ROOT_LBA_OFFSET: usize = 4;
const SUPER_FIRST_FREE_LBA_OFFSET: usize = 8;

/// Node header layout.
const NODE_INTERNAL_OFFSET: usize = 0;
const NODE_NKEYS_OFFSET: usize = 1;
const NODE_KEYS_OFFSET: usize = 2;

/// In-memory tree-global state, as persisted in the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub key_size: u32,
    pub root_lba: u32,
    pub first_free_lba: u64,
}

pub fn encode_super(sb: &SuperBlock) -> [u8; SECTOR_SIZE] {
    let mut buf = [0u8; SECTOR_SIZE];
    buf[SUPER_KEY_SIZE_OFFSET..SUPER_KEY_SIZE_OFFSET + 4].copy_from_slice(&sb.key_size.to_le_bytes());
    buf[SUPER_ROOT_LBA_OFFSET..SUPER_ROOT_LBA_OFFSET + 4].copy_from_slice(&sb.root_lba.to_le_bytes());
    buf[SUPER_FIRST_FREE_LBA_OFFSET..SUPER_FIRST_FREE_LBA_OFFSET + 8]
        .copy_from_slice(&sb.first_free_lba.to_le_bytes());
    buf
}

pub fn decode_super(bytes: &[u8; SECTOR_SIZE]) -> SuperBlock {
    let key_size = u32::from_le_bytes(
        bytes[SUPER_KEY_SIZE_OFFSET..SUPER_KEY_SIZE_OFFSET + 4]
            .try_into()
            .unwrap(),
    );
    let root_lba = u32::from_le_bytes(
        bytes[SUPER_ROOT_LBA_OFFSET..SUPER_ROOT_LBA_OFFSET + 4]
            .try_into()
            .unwrap(),
    );
    let first_free_lba = u64::from_le_bytes(
        bytes[SUPER_FIRST_FREE_LBA_OFFSET..SUPER_FIRST_FREE_LBA_OFFSET + 8]
            .try_into()
            .unwrap(),
    );
    SuperBlock {
        key_size,
        root_lba,
        first_free_lba,
    }
}

/// `MAXKEY = floor((1024 - 6) / (key_size + 4))`. Returns `SectorTooSmall`
/// if `key_size` leaves room for fewer than one key per node.
pub fn max_keys(key_size: u32) -> Result<usize, Error> {
    let maxkey = (SECTOR_SIZE - 6) / (key_size as usize + 4);
    if maxkey < 1 {
        return Err(Error::SectorTooSmall { key_size });
    }
    Ok(maxkey)
}

fn lba_array_offset(maxkey: usize) -> usize {
    SECTOR_SIZE - 4 * (maxkey + 1)
}

/// A materialized B-tree node.
///
/// `keys` holds `nkeys` raw `key_size`-byte keys in ascending order.
/// `lbas` holds `nkeys + 1` entries: for an internal node these are child
/// LBAs; for an external node, `lbas[0..nkeys)` are payload LBAs parallel to
/// `keys`, and `lbas[nkeys]` is the trailing slot — ordinarily zero, but
/// meaningful whenever this leaf is the rightmost descendant of a key that
/// was promoted out of it during a split (see §4.3.3/§4.3.5 of the design).
///
/// Both vectors may transiently hold `MAXKEY + 1` keys / `MAXKEY + 2` LBAs
/// between an overflowing insert and the split that resolves it; encoding
/// such a node is a programming error, not a recoverable one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub internal: bool,
    pub keys: Vec<Vec<u8>>,
    pub lbas: Vec<u32>,
}

impl Node {
    pub fn empty_leaf() -> Node {
        Node {
            internal: false,
            keys: Vec::new(),
            lbas: vec![0],
        }
    }

    pub fn nkeys(&self) -> usize {
        self.keys.len()
    }
}

/// Encodes `node` into a sector. Panics if `node.nkeys() > maxkey` — the
/// write path never sees an overflowed node; the split protocol resolves
/// the overflow before any `store` call reaches the codec.
pub fn encode_node(node: &Node, key_size: u32, maxkey: usize) -> [u8; SECTOR_SIZE] {
    assert!(
        node.nkeys() <= maxkey,
        "encode_node called with nkeys={} > MAXKEY={}; caller must split first",
        node.nkeys(),
        maxkey
    );
    assert_eq!(
        node.lbas.len(),
        node.nkeys() + 1,
        "node has {} keys but {} lbas; expected nkeys + 1",
        node.nkeys(),
        node.lbas.len()
    );

    let mut buf = [0u8; SECTOR_SIZE];
    buf[NODE_INTERNAL_OFFSET] = node.internal as u8;
    buf[NODE_NKEYS_OFFSET] = node.nkeys() as u8;

    let key_size = key_size as usize;
    for (i, key) in node.keys.iter().enumerate() {
        debug_assert_eq!(key.len(), key_size, "key {} has wrong length", i);
        let off = NODE_KEYS_OFFSET + i * key_size;
        buf[off..off + key_size].copy_from_slice(key);
    }

    let lba_off = lba_array_offset(maxkey);
    for (i, lba) in node.lbas.iter().enumerate() {
        let off = lba_off + i * 4;
        buf[off..off + 4].copy_from_slice(&lba.to_le_bytes());
    }

    buf
}

/// Decodes a sector into a [`Node`]. Returns `Corruption` if the decoded
/// `nkeys` exceeds `maxkey` — a sector this engine itself wrote can never
/// violate that bound, so seeing it here means the sector was never ours.
pub fn decode_node(bytes: &[u8; SECTOR_SIZE], key_size: u32, maxkey: usize) -> Result<Node, Error> {
    let internal = match bytes[NODE_INTERNAL_OFFSET] {
        0 => false,
        1 => true,
        other => {
            return Err(err!(
                Corruption,
                "node internal flag is {}, expected 0 or 1",
                other
            ))
        }
    };
    let nkeys = bytes[NODE_NKEYS_OFFSET] as usize;
    if nkeys > maxkey {
        return Err(err!(
            Corruption,
            "node has nkeys={} exceeding MAXKEY={}",
            nkeys,
            maxkey
        ));
    }

    let key_size = key_size as usize;
    let mut keys = Vec::with_capacity(nkeys);
    for i in 0..nkeys {
        let off = NODE_KEYS_OFFSET + i * key_size;
        keys.push(bytes[off..off + key_size].to_vec());
    }

    let lba_off = lba_array_offset(maxkey);
    let mut lbas = Vec::with_capacity(nkeys + 1);
    for i in 0..=nkeys {
        let off = lba_off + i * 4;
        lbas.push(u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()));
    }

    Ok(Node {
        internal,
        keys,
        lbas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_block_round_trips() {
        let sb = SuperBlock {
            key_size: 8,
            root_lba: 1,
            first_free_lba: 2,
        };
        let bytes = encode_super(&sb);
        assert_eq!(decode_super(&bytes), sb);
    }

    #[test]
    fn empty_leaf_round_trips() {
        let key_size = 8;
        let maxkey = max_keys(key_size).unwrap();
        let node = Node::empty_leaf();
        let bytes = encode_node(&node, key_size, maxkey);
        let back = decode_node(&bytes, key_size, maxkey).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn populated_leaf_round_trips() {
        let key_size = 8;
        let maxkey = max_keys(key_size).unwrap();
        let node = Node {
            internal: false,
            keys: vec![b"AAAAAAAA".to_vec(), b"BBBBBBBB".to_vec()],
            lbas: vec![2, 3, 0],
        };
        let bytes = encode_node(&node, key_size, maxkey);
        let back = decode_node(&bytes, key_size, maxkey).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn internal_node_round_trips() {
        let key_size = 8;
        let maxkey = max_keys(key_size).unwrap();
        let node = Node {
            internal: true,
            keys: vec![b"MMMMMMMM".to_vec()],
            lbas: vec![5, 6],
        };
        let bytes = encode_node(&node, key_size, maxkey);
        let back = decode_node(&bytes, key_size, maxkey).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    #[should_panic(expected = "caller must split first")]
    fn encode_panics_on_overflowed_node() {
        let key_size = 8;
        let maxkey = max_keys(key_size).unwrap();
        let mut keys = Vec::new();
        let mut lbas = Vec::new();
        for i in 0..=maxkey {
            keys.push(vec![i as u8; key_size as usize]);
            lbas.push(i as u32);
        }
        lbas.push(0);
        let node = Node {
            internal: false,
            keys,
            lbas,
        };
        encode_node(&node, key_size, maxkey);
    }

    #[test]
    fn decode_rejects_nkeys_above_maxkey() {
        let key_size = 8;
        let maxkey = max_keys(key_size).unwrap();
        let mut bytes = [0u8; SECTOR_SIZE];
        bytes[NODE_NKEYS_OFFSET] = (maxkey + 1) as u8;
        assert!(matches!(
            decode_node(&bytes, key_size, maxkey),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn max_keys_rejects_too_large_key_size() {
        assert!(matches!(
            max_keys(2000),
            Err(Error::SectorTooSmall { .. })
        ));
    }
}
