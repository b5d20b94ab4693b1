// Search-path resolution for bare executable names

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::debug;

use execport_core::constants::PATH_ENV;
use execport_core::port::executor::has_path_separator;
use execport_core::{ExecError, Result};

/// Resolve `file` against the caller's `PATH`
///
/// # Example
/// ```ignore
/// let sh = look_path("sh")?; // e.g. "/bin/sh"
/// ```
pub fn look_path(file: &str) -> Result<String> {
    look_path_in(file, std::env::var_os(PATH_ENV).as_deref())
}

/// Path a command for `name` should run, plus the lookup failure to report on start
///
/// Names with a path separator are used as given.
pub fn resolve(name: &str) -> (String, Option<ExecError>) {
    if has_path_separator(name) {
        return (name.to_string(), None);
    }
    match look_path(name) {
        Ok(path) => (path, None),
        Err(err) => {
            debug!(name = %name, error = %err, "Lookup failed, start will report it");
            (name.to_string(), Some(err))
        }
    }
}

/// Resolve `file` against an explicit search path
///
/// Names containing a path separator are checked as-is. An empty search
/// path entry means the current directory.
pub fn look_path_in(file: &str, search_path: Option<&OsStr>) -> Result<String> {
    if has_path_separator(file) {
        return if is_executable(Path::new(file)) {
            Ok(file.to_string())
        } else {
            Err(ExecError::not_found(file))
        };
    }

    let search_path = search_path.ok_or_else(|| ExecError::not_found(file))?;
    for dir in std::env::split_paths(search_path) {
        let dir = if dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            dir
        };

        for candidate in candidates(&dir, file) {
            if is_executable(&candidate) {
                let resolved = candidate.to_string_lossy().into_owned();
                debug!(file = %file, resolved = %resolved, "Executable resolved");
                return Ok(resolved);
            }
        }
    }

    Err(ExecError::not_found(file))
}

#[cfg(not(windows))]
fn candidates(dir: &Path, file: &str) -> Vec<PathBuf> {
    vec![dir.join(file)]
}

#[cfg(windows)]
fn candidates(dir: &Path, file: &str) -> Vec<PathBuf> {
    let base = dir.join(file);
    vec![base.clone(), base.with_extension("exe"), base.with_extension("bat")]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
