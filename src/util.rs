//! Shared utility functions.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tokio::task::spawn_blocking;

use crate::{wlog_debug, Error, Result};

/// Run synchronous filesystem work off the async runtime.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

/// Replace `path` with `contents` so readers see either the old or the new file.
///
/// The previous file, if any, is kept next to it with `.bak` appended to its name.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            wlog_debug!("Creating directory: {}", parent.display());
            fs::create_dir_all(parent)?;
        }
    }

    if path.exists() {
        fs::copy(path, sibling_path(path, "bak"))?;
    }

    let temp_path = sibling_path(path, "tmp");
    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// `path` with `.suffix` appended to its full file name.
fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Lowercase, dash-separated form of a name, usable as a file stem.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("plan");
    }
    slug
}
