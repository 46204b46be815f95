// Filesystem helpers for persisted records and container trees.

use crate::error::Result;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub struct FileSystemUtils;

impl FileSystemUtils {
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists()
    }

    pub fn create_dir_all<P: AsRef<Path>>(path: P) -> Result<()> {
        fs::create_dir_all(path.as_ref())?;
        Ok(())
    }

    /// Write a single trimmed line, the format used by all registry record
    /// files (cidr, iface, refcnt, per-container addresses).
    pub fn write_line<P: AsRef<Path>>(path: P, line: &str) -> Result<()> {
        fs::write(path.as_ref(), format!("{}\n", line.trim()))?;
        Ok(())
    }

    /// Read the first line of a record file, trimmed.
    pub fn read_line<P: AsRef<Path>>(path: P) -> Result<String> {
        let content = fs::read_to_string(path.as_ref())?;
        Ok(content.lines().next().unwrap_or("").trim().to_string())
    }

    pub fn write_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn remove_path<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(());
        }
        if path.is_dir() {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Names of the entries directly under `path`; empty when the
    /// directory does not exist.
    pub fn dir_entries<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    pub fn make_executable<P: AsRef<Path>>(path: P) -> Result<()> {
        let metadata = fs::metadata(path.as_ref())?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(permissions.mode() | 0o111);
        fs::set_permissions(path.as_ref(), permissions)?;
        Ok(())
    }
}
