use crate::{DevtoolsError, Result};
use std::path::{Path, PathBuf};

/// Name looked up on `PATH` when neither an override nor an install location matches.
pub const DEFAULT_EXECUTABLE_NAME: &str = "code";

/// Install locations checked before falling back to `PATH`, most specific first.
pub fn well_known_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();

    if cfg!(target_os = "macos") {
        locations.push(PathBuf::from(
            "/Applications/Visual Studio Code.app/Contents/MacOS/Electron",
        ));
        if let Some(home) = dirs::home_dir() {
            locations.push(
                home.join("Applications/Visual Studio Code.app/Contents/MacOS/Electron"),
            );
        }
    } else if cfg!(target_os = "windows") {
        if let Some(local) = dirs::data_local_dir() {
            locations.push(local.join("Programs").join("Microsoft VS Code").join("Code.exe"));
        }
        locations.push(PathBuf::from(r"C:\Program Files\Microsoft VS Code\Code.exe"));
    } else {
        locations.push(PathBuf::from("/usr/share/code/code"));
        locations.push(PathBuf::from("/opt/visual-studio-code/code"));
        locations.push(PathBuf::from("/usr/bin/code"));
        locations.push(PathBuf::from("/snap/bin/code"));
        if let Some(home) = dirs::home_dir() {
            locations.push(home.join(".local/bin/code"));
        }
    }

    locations
}

/// Resolves the target executable: explicit override, then `candidates`, then `PATH`.
///
/// An override that does not exist is an error rather than a reason to keep searching,
/// except that a bare name (no path separators) is looked up on `PATH`.
pub fn resolve_executable(
    explicit: Option<&Path>,
    candidates: &[PathBuf],
    path_name: &str,
) -> Result<PathBuf> {
    if let Some(explicit) = explicit {
        if explicit.is_file() {
            return Ok(explicit.to_path_buf());
        }
        if explicit.components().count() == 1 {
            if let Ok(found) = which::which(explicit) {
                return Ok(found);
            }
        }
        return Err(DevtoolsError::launch(format!(
            "Executable override '{}' does not exist",
            explicit.display()
        )));
    }

    if let Some(found) = candidates.iter().find(|candidate| candidate.is_file()) {
        tracing::debug!("Using install location {}", found.display());
        return Ok(found.clone());
    }

    which::which(path_name).map_err(|e| {
        DevtoolsError::launch(format!(
            "No executable found: checked {} install location(s) and PATH for '{}' ({})",
            candidates.len(),
            path_name,
            e
        ))
    })
}
