// ABOUTME: Local filesystem capability used by lifecycle operations.
// ABOUTME: Covers existence, sizes, permissions, ownership and the moves and deletions around scratch files.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::process::Command;

pub trait LocalFs {
    fn exists(&self, path: &Path) -> bool;
    fn file_size(&self, path: &Path) -> io::Result<u64>;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;
    /// Hand the file to `account` (user and group of the same name).
    fn set_owner(&self, path: &Path, account: &str) -> io::Result<()>;
    /// Create an empty file, leaving an existing one untouched.
    fn touch(&self, path: &Path) -> io::Result<()>;
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;
    /// Move a file, falling back to copy and delete across devices.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
    /// Delete everything inside `path` but keep the directory itself.
    fn clear_dir(&self, path: &Path) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFs;

impl LocalFs for SystemFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    #[cfg(unix)]
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_readonly(mode & 0o200 == 0);
        fs::set_permissions(path, permissions)
    }

    fn set_owner(&self, path: &Path, account: &str) -> io::Result<()> {
        let status = Command::new("chown")
            .arg(format!("{account}:{account}"))
            .arg(path)
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!(
                "chown {account} {} exited with {status}",
                path.display()
            )))
        }
    }

    fn touch(&self, path: &Path) -> io::Result<()> {
        OpenOptions::new().create(true).append(true).open(path)?;
        Ok(())
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        fs::copy(from, to)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        match fs::rename(from, to) {
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                fs::copy(from, to)?;
                fs::remove_file(from)
            }
            other => other,
        }
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn clear_dir(&self, path: &Path) -> io::Result<()> {
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn clear_dir_keeps_the_directory() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(data.join("base/1")).unwrap();
        fs::write(data.join("PG_VERSION"), "17").unwrap();
        fs::write(data.join("base/1/123"), "x").unwrap();

        SystemFs.clear_dir(&data).unwrap();

        assert!(data.is_dir());
        assert_eq!(fs::read_dir(&data).unwrap().count(), 0);
    }

    #[test]
    fn touch_preserves_contents() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("recovery.signal");

        SystemFs.touch(&marker).unwrap();
        assert_eq!(SystemFs.file_size(&marker).unwrap(), 0);

        fs::write(&marker, "keep").unwrap();
        SystemFs.touch(&marker).unwrap();
        assert_eq!(fs::read_to_string(&marker).unwrap(), "keep");
    }

    #[cfg(unix)]
    #[test]
    fn set_mode_applies_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let key = dir.path().join("server.key");
        fs::write(&key, "k").unwrap();

        SystemFs.set_mode(&key, 0o400).unwrap();
        let mode = fs::metadata(&key).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o400);
    }

    #[test]
    fn rename_moves_the_file() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("a");
        let to = dir.path().join("b");
        fs::write(&from, "wal").unwrap();

        SystemFs.rename(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "wal");
    }
}
