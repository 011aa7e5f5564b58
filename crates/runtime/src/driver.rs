//! Driver executable discovery.
//!
//! Locates the automation driver binary that the runtime spawns and talks to
//! over stdio.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::warn;

use crate::error::{Error, Result};

/// Environment variable pointing directly at the driver executable.
pub const DRIVER_ENV: &str = "DROVER_DRIVER";

#[cfg(not(windows))]
const DRIVER_BINARY: &str = "drover-driver";
#[cfg(windows)]
const DRIVER_BINARY: &str = "drover-driver.exe";

/// Returns the path to the driver executable.
///
/// Candidates are tried in order:
/// 1. `DROVER_DRIVER` environment variable (runtime override)
/// 2. A `drover-driver` binary next to the current executable
/// 3. `PATH` lookup
///
/// Each candidate is health-checked by running it with `--version`.
///
/// # Errors
///
/// Returns [`Error::ServerNotFound`] if no usable driver is located.
pub fn find_driver_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(DRIVER_ENV) {
        let candidate = PathBuf::from(path);
        if candidate.exists() && driver_is_usable(&candidate) {
            return Ok(candidate);
        }
        warn!(
            candidate = %candidate.display(),
            "{DRIVER_ENV} points at a missing or unrunnable driver; trying fallbacks"
        );
    }

    if let Some(candidate) = sibling_driver() {
        if driver_is_usable(&candidate) {
            return Ok(candidate);
        }
    }

    if let Some(candidate) = driver_on_path() {
        if driver_is_usable(&candidate) {
            return Ok(candidate);
        }
    }

    Err(Error::ServerNotFound)
}

/// A `drover-driver` binary in the same directory as the current executable.
fn sibling_driver() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let candidate = exe.parent()?.join(DRIVER_BINARY);
    candidate.exists().then_some(candidate)
}

/// `PATH` lookup via `which`/`where`.
fn driver_on_path() -> Option<PathBuf> {
    #[cfg(not(windows))]
    let which_cmd = "which";
    #[cfg(windows)]
    let which_cmd = "where";

    let output = Command::new(which_cmd).arg(DRIVER_BINARY).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    let path = PathBuf::from(first);
    path.exists().then_some(path)
}

fn driver_is_usable(path: &Path) -> bool {
    Command::new(path)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
