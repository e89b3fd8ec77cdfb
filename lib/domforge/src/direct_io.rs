// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Probing whether disk backing storage supports direct (uncached) I/O.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Answers whether a disk image or block device can be opened with
/// `O_DIRECT`.
///
/// `Ok(false)` means the storage was reachable but rejected direct I/O. Any
/// other failure is an `Err`, which callers treat as "unknown".
#[cfg_attr(test, mockall::automock)]
pub trait DirectIoChecker: Send + Sync {
    fn check_file(&self, path: &Path) -> io::Result<bool>;
    fn check_block_device(&self, path: &Path) -> io::Result<bool>;
}

/// Checks the host's filesystems directly.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostDirectIoChecker;

impl HostDirectIoChecker {
    fn open_direct(options: &mut OpenOptions, path: &Path) -> io::Result<bool> {
        match options.custom_flags(libc::O_DIRECT).open(path) {
            Ok(_) => Ok(true),
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl DirectIoChecker for HostDirectIoChecker {
    /// An existing image is opened in place. For an image that does not
    /// exist yet, a scratch file is created at `path` and removed again; this
    /// fails if the containing directory is missing.
    fn check_file(&self, path: &Path) -> io::Result<bool> {
        match fs::metadata(path) {
            Ok(_) => {
                Self::open_direct(OpenOptions::new().read(true), path)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let supported = Self::open_direct(
                    OpenOptions::new().read(true).write(true).create_new(true),
                    path,
                );
                match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
                supported
            }
            Err(e) => Err(e),
        }
    }

    fn check_block_device(&self, path: &Path) -> io::Result<bool> {
        Self::open_direct(OpenOptions::new().read(true), path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").join("disk.img");
        assert!(HostDirectIoChecker.check_file(&path).is_err());
    }

    #[test]
    fn scratch_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        // Whether O_DIRECT works depends on the filesystem backing tmpdir.
        let _ = HostDirectIoChecker.check_file(&path);
        assert!(!path.exists());
    }

    #[test]
    fn existing_file_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        fs::write(&path, [0u8; 512]).unwrap();
        assert!(HostDirectIoChecker.check_file(&path).is_ok());
        assert!(path.exists());
    }

    #[test]
    fn missing_block_device_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodev");
        assert!(HostDirectIoChecker.check_block_device(&path).is_err());
    }
}
