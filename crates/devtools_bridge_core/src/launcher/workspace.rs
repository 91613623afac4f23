use crate::{DevtoolsError, Result};
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Scoped edit of a shared JSON settings file.
///
/// `apply` snapshots the file (or its absence) before writing the override; `restore` puts
/// the snapshot back and is a no-op after the first successful call. A failed restore
/// stays pending, and dropping an unrestored override tries again.
#[derive(Debug)]
pub struct WorkspaceOverride {
    path: PathBuf,
    original: Option<Vec<u8>>,
    restored: bool,
}

impl WorkspaceOverride {
    pub fn apply(path: &Path, key: &str, value: Value) -> Result<Self> {
        let original = match std::fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let mut settings = match &original {
            Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => {
                serde_json::from_slice::<Value>(bytes)?
            }
            _ => Value::Object(Map::new()),
        };
        let object = settings.as_object_mut().ok_or_else(|| {
            DevtoolsError::InvalidResponse(format!(
                "Settings file {} is not a JSON object",
                path.display()
            ))
        })?;
        object.insert(key.to_string(), value);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(&settings)?)?;

        tracing::info!(
            "Applied workspace override to {} (original {})",
            path.display(),
            if original.is_some() { "saved" } else { "absent" }
        );

        Ok(Self {
            path: path.to_path_buf(),
            original,
            restored: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }

    /// Returns `Ok(true)` when this call performed the restore.
    pub fn restore(&mut self) -> Result<bool> {
        if self.restored {
            return Ok(false);
        }

        match &self.original {
            Some(bytes) => std::fs::write(&self.path, bytes)?,
            None => match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }

        self.restored = true;
        tracing::info!("Restored settings file {}", self.path.display());
        Ok(true)
    }
}

impl Drop for WorkspaceOverride {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::warn!(
                "Failed to restore settings file {}: {}",
                self.path.display(),
                e
            );
        }
    }
}
