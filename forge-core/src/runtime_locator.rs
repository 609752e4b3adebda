// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! Locates a Python-compatible interpreter for a worker install.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{ConfigEntry, CONFIG_KEY_RUNTIME_PATH};
use crate::store::Store;

#[cfg(target_os = "windows")]
const INTERPRETER_NAME: &str = "python.exe";
#[cfg(not(target_os = "windows"))]
const INTERPRETER_NAME: &str = "python3";

#[cfg(target_os = "windows")]
const BIN_SUBDIR: &str = "Scripts";
#[cfg(not(target_os = "windows"))]
const BIN_SUBDIR: &str = "bin";

const VENV_DIR_NAMES: &[&str] = &["venv", ".venv", "env", ".env"];

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub version: Option<String>,
}

/// Invoke the candidate interpreter with a version flag and check for
/// "python" (case-insensitive) in its output.
pub fn validate(path: &Path) -> ValidationResult {
    match Command::new(path).arg("--version").output() {
        Ok(out) => {
            let mut text = String::from_utf8_lossy(&out.stdout).to_string();
            text.push_str(&String::from_utf8_lossy(&out.stderr));
            if text.to_lowercase().contains("python") {
                ValidationResult {
                    valid: true,
                    version: Some(text.trim().to_string()),
                }
            } else {
                ValidationResult {
                    valid: false,
                    version: None,
                }
            }
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "runtime candidate failed to execute");
            ValidationResult {
                valid: false,
                version: None,
            }
        }
    }
}

/// Scan `install_path` for a venv-style or conda-style interpreter,
/// returning the first that validates.
fn scan_install_path(install_path: &Path) -> Option<PathBuf> {
    for venv_name in VENV_DIR_NAMES {
        let candidate = install_path
            .join(venv_name)
            .join(BIN_SUBDIR)
            .join(INTERPRETER_NAME);
        if candidate.is_file() && validate(&candidate).valid {
            return Some(candidate);
        }
    }

    let conda_root = install_path.join("conda_env");
    if conda_root.is_dir() {
        if let Some(found) = find_in_conda_tree(&conda_root) {
            return Some(found);
        }
    }
    None
}

fn find_in_conda_tree(root: &Path) -> Option<PathBuf> {
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().map(|n| n == INTERPRETER_NAME).unwrap_or(false)
                && validate(&path).valid
            {
                return Some(path);
            }
        }
    }
    None
}

/// Whichever interpreter the OS path resolver finds, as a final fallback.
fn resolve_from_path() -> Option<PathBuf> {
    let which_cmd = if cfg!(target_os = "windows") {
        "where"
    } else {
        "which"
    };
    let output = Command::new(which_cmd).arg(INTERPRETER_NAME).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(PathBuf::from)
}

/// Finds a suitable interpreter for a worker install, with a
/// process-lifetime in-memory cache plus a persistent config-store
/// override keyed by the fixed `RUNTIME_PATH` key.
pub struct RuntimeLocator {
    store: Arc<Store>,
    cache: Mutex<HashMap<PathBuf, PathBuf>>,
}

impl RuntimeLocator {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn locate(&self, install_path: &Path) -> Result<PathBuf> {
        if let Some(cached) = self.cache.lock().unwrap().get(install_path).cloned() {
            return Ok(cached);
        }

        // 1. persistent override
        if let Some(entry) = self.store.get_config(CONFIG_KEY_RUNTIME_PATH)? {
            let candidate = PathBuf::from(&entry.value);
            if validate(&candidate).valid {
                self.cache
                    .lock()
                    .unwrap()
                    .insert(install_path.to_path_buf(), candidate.clone());
                return Ok(candidate);
            }
        }

        // 2. scan install path
        if let Some(found) = scan_install_path(install_path) {
            self.store.upsert_config(&ConfigEntry {
                key: CONFIG_KEY_RUNTIME_PATH.to_string(),
                value: found.to_string_lossy().to_string(),
                description: Some("Resolved worker interpreter path".to_string()),
            })?;
            self.cache
                .lock()
                .unwrap()
                .insert(install_path.to_path_buf(), found.clone());
            info!(path = %found.display(), "runtime locator resolved interpreter from install path");
            return Ok(found);
        }

        // 3. OS path resolver
        if let Some(found) = resolve_from_path() {
            self.cache
                .lock()
                .unwrap()
                .insert(install_path.to_path_buf(), found.clone());
            return Ok(found);
        }

        warn!(install_path = %install_path.display(), "no validated interpreter found");
        Err(crate::error::ForgeError::RuntimeNotFound(
            install_path.display().to_string(),
        ))
    }

    /// Empties the in-memory cache only; the persistent override is
    /// untouched.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[cfg(unix)]
    fn write_fake_interpreter(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = std::fs::File::create(path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "echo 'Python 3.11.4'").unwrap();
        drop(file);
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn locate_finds_venv_interpreter_and_caches_disk_scan() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = dir.path().join(".venv").join("bin").join(INTERPRETER_NAME);
        write_fake_interpreter(&interpreter);

        let store = Arc::new(Store::in_memory().unwrap());
        let locator = RuntimeLocator::new(store.clone());

        let first = locator.locate(dir.path()).unwrap();
        assert_eq!(first, interpreter);

        // Persisted for O(1) subsequent launches.
        let persisted = store.get_config(CONFIG_KEY_RUNTIME_PATH).unwrap().unwrap();
        assert_eq!(persisted.value, interpreter.to_string_lossy());

        // Second call hits the in-memory cache: even if the venv
        // directory were removed, the cached answer must still come back.
        std::fs::remove_dir_all(dir.path().join(".venv")).unwrap();
        let second = locator.locate(dir.path()).unwrap();
        assert_eq!(second, interpreter);
    }

    #[cfg(unix)]
    #[test]
    fn clear_cache_forces_a_fresh_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = dir.path().join("venv").join("bin").join(INTERPRETER_NAME);
        write_fake_interpreter(&interpreter);

        let store = Arc::new(Store::in_memory().unwrap());
        let locator = RuntimeLocator::new(store.clone());
        locator.locate(dir.path()).unwrap();
        locator.clear_cache();

        // Persistent override still resolves it after an in-memory cache
        // clear, without rescanning the install path: the interpreter must
        // still validate on disk for this to succeed.
        let resolved = locator.locate(dir.path()).unwrap();
        assert_eq!(resolved, interpreter);
    }
}
