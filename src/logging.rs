//! Log file for terminal sessions
//!
//! While the terminal renderer owns the screen, the tracing subscriber writes
//! to a file under the data directory instead of stderr so diagnostics do not
//! tear the progress bars.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Where session logs are appended
pub fn log_path() -> PathBuf {
    match dirs::data_dir() {
        Some(data_dir) => data_dir.join("converge").join("converge.log"),
        None => PathBuf::from("converge.log"),
    }
}

/// Open the session log for appending
pub fn open_log_file() -> std::io::Result<File> {
    open_at(&log_path())
}

/// Open `path` for appending, creating parent directories, and mark the
/// start of a new session.
pub fn open_at(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(file, "\n=== converge session started at {} ===\n", timestamp)?;
    Ok(file)
}
