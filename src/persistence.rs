//! Crash-safe file writes.
//!
//! Everything the trainer persists goes to a `.tmp` sibling first and is
//! renamed over the target only once fully written and synced, so readers
//! never observe a half-written checkpoint, dataset or config.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Temp sibling used while `path` is being written: `<name>.tmp`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Streams content through `write` into a temp file, then renames it into place.
/// Creates parent directories if they don't exist.
pub fn atomic_write_with<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = temp_path(path);
    let result = (|| {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        write(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, path)
}

pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    atomic_write_with(path, |w| w.write_all(data))
}

pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    atomic_write_with(path, |w| serde_json::to_writer_pretty(w, data).map_err(io::Error::other))
}
