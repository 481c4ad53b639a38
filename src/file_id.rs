// SPDX-License-Identifier: Apache-2.0

//! Platform file identity (device + inode).
//!
//! Fingerprints decide whether two files carry the same stream. The file
//! identity is only used to recognise that two handles point at the very same
//! file, which happens when a log is truncated in place (copytruncate) rather
//! than moved away and recreated.

use std::fs::File;
use std::io;
use std::path::PathBuf;

/// Device ID + inode number of an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Create a FileId from an open file handle.
    #[cfg(unix)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = file.metadata()?;
        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    /// Create a FileId from an open file handle.
    #[cfg(not(unix))]
    pub fn from_file(_file: &File) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "file identity is only available on unix",
        ))
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// Returns true when both handles refer to the same file on disk.
/// Unknown identity is treated as "not the same file".
pub fn same_file(a: &File, b: &File) -> bool {
    match (FileId::from_file(a), FileId::from_file(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Get the current path of an open file handle.
///
/// Used to report where a rotated file went. If the file was deleted but the
/// handle is still open, this returns an error or a "(deleted)" path.
#[cfg(target_os = "linux")]
pub fn get_path_from_file(file: &File) -> io::Result<PathBuf> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let link_path = format!("/proc/self/fd/{}", fd);
    std::fs::read_link(&link_path)
}

/// Get the current path of an open file handle.
#[cfg(not(target_os = "linux"))]
pub fn get_path_from_file(_file: &File) -> io::Result<PathBuf> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "resolving the path of an open file is only supported on linux",
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_id_same_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let f1 = file.reopen().unwrap();
        let f2 = file.reopen().unwrap();

        assert_eq!(FileId::from_file(&f1).unwrap(), FileId::from_file(&f2).unwrap());
        assert!(same_file(&f1, &f2));
    }

    #[test]
    fn test_file_id_different_files() {
        let mut file1 = NamedTempFile::new().unwrap();
        let mut file2 = NamedTempFile::new().unwrap();

        file1.write_all(b"content 1").unwrap();
        file2.write_all(b"content 2").unwrap();

        let f1 = file1.reopen().unwrap();
        let f2 = file2.reopen().unwrap();

        assert_ne!(FileId::from_file(&f1).unwrap(), FileId::from_file(&f2).unwrap());
        assert!(!same_file(&f1, &f2));
    }

    #[test]
    fn test_file_id_stable_across_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "content").unwrap();

        let before = File::open(&path).unwrap();
        let rotated = dir.path().join("app.log.1");
        std::fs::rename(&path, &rotated).unwrap();
        let after = File::open(&rotated).unwrap();

        assert!(same_file(&before, &after));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_get_path_from_file_follows_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "content").unwrap();

        let f = File::open(&path).unwrap();
        let rotated = dir.path().join("old.log");
        std::fs::rename(&path, &rotated).unwrap();

        let resolved = get_path_from_file(&f).unwrap();
        assert_eq!(
            resolved.canonicalize().unwrap(),
            rotated.canonicalize().unwrap()
        );
    }

    #[test]
    fn test_file_id_display() {
        let id = FileId::new(123, 456);
        assert_eq!(format!("{}", id), "123:456");
    }
}
