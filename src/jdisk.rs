//! The jdisk abstraction: a raw block device exposing fixed-size sectors
//! addressed by logical block address (LBA).
//!
//! The tree engine never touches a file directly — it only calls through
//! this trait, the way `storage::table::Pager` in the SQL ancestor of this
//! crate only ever called through its own page accessors. `FileJDisk` is the
//! production backing; `MemJDisk` is a plain in-memory stand-in used by
//! tests that want to force a small `MAXKEY` or probe capacity exhaustion
//! without touching the filesystem.
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, trace};

use crate::error::Error;

/// Sector size in bytes. Fixed by the spec; every node, superblock, and
/// payload occupies exactly one sector.
pub const SECTOR_SIZE: usize = 1024;

/// A raw block device of fixed-size sectors.
pub trait JDisk {
    fn read(&mut self, lba: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), Error>;
    fn write(&mut self, lba: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), Error>;
    /// Total number of sectors the disk was created with.
    fn num_sectors(&self) -> u64;
}

/// A jdisk backed by a single file on the host filesystem.
///
/// `create` pre-extends the file to `size` bytes via `set_len`; `attach`
/// opens an existing file and trusts its length. Sector I/O seeks to
/// `lba * SECTOR_SIZE` and does a synchronous `read_exact`/`write_all` —
/// there is no buffering layer, since every caller already batches its
/// writes per operation (§4.3.4 of the design).
pub struct FileJDisk {
    file: File,
    num_sectors: u64,
}

impl FileJDisk {
    pub fn create<P: AsRef<Path>>(path: P, size: i64) -> Result<Self, Error> {
        if size <= 0 {
            return Err(err!(InvalidArgument, "disk size must be positive, got {}", size));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(size as u64)?;
        let num_sectors = size as u64 / SECTOR_SIZE as u64;
        debug!(path = %path.as_ref().display(), size, num_sectors, "Created jdisk file");
        Ok(FileJDisk { file, num_sectors })
    }

    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    err!(InvalidArgument, "no such disk file: {}", path.as_ref().display())
                } else {
                    Error::Io(e)
                }
            })?;
        let len = file.metadata()?.len();
        let num_sectors = len / SECTOR_SIZE as u64;
        debug!(path = %path.as_ref().display(), num_sectors, "Attached jdisk file");
        Ok(FileJDisk { file, num_sectors })
    }
}

impl JDisk for FileJDisk {
    fn read(&mut self, lba: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), Error> {
        if lba as u64 >= self.num_sectors {
            return Err(Error::CapacityExhausted {
                lba: lba as u64,
                num_lbas: self.num_sectors,
            });
        }
        self.file.seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64))?;
        self.file.read_exact(buf)?;
        trace!(lba, "Read sector");
        Ok(())
    }

    fn write(&mut self, lba: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), Error> {
        if lba as u64 >= self.num_sectors {
            return Err(Error::CapacityExhausted {
                lba: lba as u64,
                num_lbas: self.num_sectors,
            });
        }
        self.file.seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64))?;
        self.file.write_all(buf)?;
        trace!(lba, "Wrote sector");
        Ok(())
    }

    fn num_sectors(&self) -> u64 {
        self.num_sectors
    }
}

/// An in-memory jdisk, for tests. Sectors are zero-filled on creation.
pub struct MemJDisk {
    sectors: Vec<[u8; SECTOR_SIZE]>,
}

impl MemJDisk {
    pub fn create(size: i64) -> Result<Self, Error> {
        if size <= 0 {
            return Err(err!(InvalidArgument, "disk size must be positive, got {}", size));
        }
        let num_sectors = size as usize / SECTOR_SIZE;
        Ok(MemJDisk {
            sectors: vec![[0u8; SECTOR_SIZE]; num_sectors],
        })
    }
}

impl JDisk for MemJDisk {
    fn read(&mut self, lba: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), Error> {
        let sector = self.sectors.get(lba as usize).ok_or(Error::CapacityExhausted {
            lba: lba as u64,
            num_lbas: self.sectors.len() as u64,
        })?;
        buf.copy_from_slice(sector);
        Ok(())
    }

    fn write(&mut self, lba: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), Error> {
        let sector = self
            .sectors
            .get_mut(lba as usize)
            .ok_or(Error::CapacityExhausted {
                lba: lba as u64,
                num_lbas: self.sectors.len() as u64,
            })?;
        sector.copy_from_slice(buf);
        Ok(())
    }

    fn num_sectors(&self) -> u64 {
        self.sectors.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_disk_round_trips_a_sector() {
        let mut disk = MemJDisk::create(4096).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0] = 7;
        disk.write(2, &buf).unwrap();
        let mut out = [0xffu8; SECTOR_SIZE];
        disk.read(2, &mut out).unwrap();
        assert_eq!(buf, out);
    }

    #[test]
    fn mem_disk_rejects_out_of_range_lba() {
        let mut disk = MemJDisk::create(1024).unwrap();
        let buf = [0u8; SECTOR_SIZE];
        assert!(matches!(
            disk.write(5, &buf),
            Err(Error::CapacityExhausted { .. })
        ));
    }

    #[test]
    fn file_disk_create_then_attach_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.jdisk");

        let mut disk = FileJDisk::create(&path, 4096).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        buf[10] = 42;
        disk.write(1, &buf).unwrap();
        drop(disk);

        let mut disk = FileJDisk::attach(&path).unwrap();
        let mut out = [0u8; SECTOR_SIZE];
        disk.read(1, &mut out).unwrap();
        assert_eq!(buf, out);
    }

    #[test]
    fn file_disk_attach_missing_file_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jdisk");
        assert!(matches!(
            FileJDisk::attach(&path),
            Err(Error::InvalidArgument(_))
        ));
    }
}
