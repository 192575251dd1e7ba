//! Atomic file persistence for cache indexes and listing entries

use std::fs;
use std::io;
use std::path::Path;

/// Write `bytes` to `path` atomically (temp file in the same directory, then
/// rename), so readers never observe a half-written index.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "out".to_string());
    let tmp = dir.join(format!(".{file_name}.tmp"));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
