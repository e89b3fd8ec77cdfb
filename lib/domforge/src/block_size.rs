// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Detecting the block sizes of disk backing storage.

use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

/// Logical and physical block sizes, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockSizes {
    pub logical: u32,
    pub physical: u32,
}

/// Reports the block sizes of a disk image or block device, so a guest disk
/// can present the same geometry as the storage behind it.
#[cfg_attr(test, mockall::automock)]
pub trait BlockSizeDetector: Send + Sync {
    fn file_block_sizes(&self, path: &Path) -> io::Result<BlockSizes>;
    fn device_block_sizes(&self, path: &Path) -> io::Result<BlockSizes>;
}

/// Reads block sizes from the host's filesystems and sysfs.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostBlockSizeDetector;

impl HostBlockSizeDetector {
    fn nonzero(size: u64, what: &Path) -> io::Result<u32> {
        u32::try_from(size).ok().filter(|s| *s != 0).ok_or_else(|| {
            io::Error::new(
                ErrorKind::InvalidData,
                format!("bad block size {size} for {}", what.display()),
            )
        })
    }

    fn read_size(path: &Path) -> io::Result<u32> {
        let raw = fs::read_to_string(path)?;
        let size = raw.trim().parse::<u64>().map_err(|e| {
            io::Error::new(
                ErrorKind::InvalidData,
                format!("{}: {e}", path.display()),
            )
        })?;
        Self::nonzero(size, path)
    }

    fn queue_dir(rdev: u64) -> PathBuf {
        let (major, minor) = (libc::major(rdev), libc::minor(rdev));
        PathBuf::from(format!("/sys/dev/block/{major}:{minor}/queue"))
    }
}

impl BlockSizeDetector for HostBlockSizeDetector {
    /// A file has no sector size of its own; the I/O block size of its
    /// filesystem is reported as both sizes.
    fn file_block_sizes(&self, path: &Path) -> io::Result<BlockSizes> {
        let size = Self::nonzero(fs::metadata(path)?.blksize(), path)?;
        Ok(BlockSizes { logical: size, physical: size })
    }

    fn device_block_sizes(&self, path: &Path) -> io::Result<BlockSizes> {
        let meta = fs::metadata(path)?;
        if !meta.file_type().is_block_device() {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} is not a block device", path.display()),
            ));
        }
        let queue = Self::queue_dir(meta.rdev());
        Ok(BlockSizes {
            logical: Self::read_size(&queue.join("logical_block_size"))?,
            physical: Self::read_size(&queue.join("physical_block_size"))?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn file_sizes_match_and_are_nonzero() {
        let sizes =
            HostBlockSizeDetector.file_block_sizes(Path::new("/")).unwrap();
        assert_ne!(sizes.logical, 0);
        assert_eq!(sizes.logical, sizes.physical);
    }

    #[test]
    fn empty_path_is_an_error() {
        assert!(HostBlockSizeDetector.file_block_sizes(Path::new("")).is_err());
        assert!(HostBlockSizeDetector
            .device_block_sizes(Path::new(""))
            .is_err());
    }

    #[test]
    fn regular_file_is_not_a_block_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        fs::write(&path, [0u8; 512]).unwrap();
        let err =
            HostBlockSizeDetector.device_block_sizes(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn unparsable_sysfs_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logical_block_size");
        fs::write(&path, "lots\n").unwrap();
        let err = HostBlockSizeDetector::read_size(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        fs::write(&path, "0\n").unwrap();
        assert!(HostBlockSizeDetector::read_size(&path).is_err());

        fs::write(&path, "4096\n").unwrap();
        assert_eq!(HostBlockSizeDetector::read_size(&path).unwrap(), 4096);
    }
}
