//! Storage root: one subdirectory per world, replaced only by rename.
//!
//! An upload is built in a staging directory under the reserved prefix, then
//! swapped in:
//!
//! 1. the current world (if any) is renamed into a fresh retired directory;
//! 2. staging is renamed to the world's name;
//! 3. the retired directory is removed.
//!
//! If step 2 fails, the retired world is renamed back. A crash between 1 and
//! 2 leaves the old tree in the retired directory, and [`Storage::recover`]
//! puts it back on the next start. A world name therefore always names a
//! complete tree or, briefly, nothing.
//!
//! There is no locking. The daemon handles one connection at a time; a
//! concurrent server would need a per-world lock around [`Storage::commit`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::error::{Result, SyncError};
use crate::logger::Logger;
use crate::protocol::{RETIRED_PREFIX, STAGING_PREFIX};
use crate::protocol_core::ensure_directory;
use crate::world::WorldName;

pub struct Storage {
    root: PathBuf,
    logger: Arc<dyn Logger>,
}

/// An in-flight upload. Dropping it removes the directory; prefer
/// [`Storage::discard`], which reports a failed removal.
pub struct Staging {
    dir: TempDir,
    name: WorldName,
}

impl Staging {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn name(&self) -> &WorldName {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovered {
    /// A retired world was moved back because its name was missing.
    Restored(WorldName),
    /// A leftover staging or retired directory was deleted.
    Removed(PathBuf),
}

impl Storage {
    /// Open `root`, creating it if needed, and finish any commit a previous
    /// run left half done.
    pub fn open(root: &Path, logger: Arc<dyn Logger>) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| {
            SyncError::io(format!("failed to create storage root {}", root.display()), e)
        })?;
        ensure_directory(root)?;
        let root = root.canonicalize().map_err(|e| {
            SyncError::io(format!("failed to resolve storage root {}", root.display()), e)
        })?;
        let storage = Self { root, logger };
        for action in storage.recover()? {
            match &action {
                Recovered::Restored(world) => storage
                    .logger
                    .recovered("restored", &storage.world_path(world)),
                Recovered::Removed(path) => storage.logger.recovered("removed", path),
            }
        }
        Ok(storage)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn world_path(&self, name: &WorldName) -> PathBuf {
        self.root.join(name.as_str())
    }

    /// Path of a stored world, if one exists as a directory.
    pub fn locate(&self, name: &WorldName) -> Option<PathBuf> {
        let path = self.world_path(name);
        match fs::metadata(&path) {
            Ok(md) if md.is_dir() => Some(path),
            _ => None,
        }
    }

    /// Names of the stored worlds, in directory listing order.
    pub fn list(&self) -> Result<Vec<WorldName>> {
        let read_err = |e: std::io::Error| {
            SyncError::io(format!("failed to read storage root {}", self.root.display()), e)
        };
        let mut worlds = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            // Non-UTF-8 names, reserved directories and stray files are not worlds
            let Some(name) = entry.file_name().to_str().and_then(|s| WorldName::new(s).ok())
            else {
                continue;
            };
            if fs::metadata(entry.path()).map(|md| md.is_dir()).unwrap_or(false) {
                worlds.push(name);
            }
        }
        Ok(worlds)
    }

    /// Create a fresh staging directory for an upload of `name`.
    pub fn stage(&self, name: &WorldName) -> Result<Staging> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{STAGING_PREFIX}{name}-"))
            .tempdir_in(&self.root)
            .map_err(|e| {
                SyncError::io(format!("failed to create staging directory for {name}"), e)
            })?;
        Ok(Staging {
            dir,
            name: name.clone(),
        })
    }

    /// Remove an abandoned upload. A failed removal is logged as a leak.
    pub fn discard(&self, staging: Staging) {
        let path = staging.dir.path().to_path_buf();
        if let Err(e) = staging.dir.close() {
            self.logger.leak(&path, &e.to_string());
        }
    }

    /// Make a completed upload the current version of its world.
    pub fn commit(&self, staging: Staging) -> Result<PathBuf> {
        let target = self.world_path(&staging.name);

        let retired = match fs::symlink_metadata(&target) {
            Ok(_) => match self.retire(&target, &staging.name) {
                Ok(dir) => Some(dir),
                Err(e) => {
                    self.discard(staging);
                    return Err(e);
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                self.discard(staging);
                return Err(SyncError::io(format!("failed to inspect {}", target.display()), e));
            }
        };

        if let Err(e) = fs::rename(staging.path(), &target) {
            if let Some(dir) = &retired {
                self.restore(dir, &staging.name, &target);
            }
            self.discard(staging);
            return Err(SyncError::io(
                format!("failed to activate {}", target.display()),
                e,
            ));
        }
        // The staging path no longer exists; dropping the guard is a no-op
        drop(staging);

        if let Some(dir) = retired {
            if let Err(e) = fs::remove_dir_all(&dir) {
                self.logger.leak(&dir, &e.to_string());
            }
        }
        Ok(target)
    }

    /// Move `target` aside into a new retired directory and return that
    /// directory.
    fn retire(&self, target: &Path, name: &WorldName) -> Result<PathBuf> {
        let dir = self.unique_dir(RETIRED_PREFIX, name)?;
        if let Err(e) = fs::rename(target, dir.join(name.as_str())) {
            let _ = fs::remove_dir(&dir);
            return Err(SyncError::io(format!("failed to retire {}", target.display()), e));
        }
        Ok(dir)
    }

    fn restore(&self, retired: &Path, name: &WorldName, target: &Path) {
        match fs::rename(retired.join(name.as_str()), target) {
            Ok(()) => {
                if let Err(e) = fs::remove_dir(retired) {
                    self.logger.leak(retired, &e.to_string());
                }
            }
            // Left for recover() on the next start
            Err(e) => self.logger.error(
                &format!("restore {}", target.display()),
                &format!("previous version kept in {}: {}", retired.display(), e),
            ),
        }
    }

    fn unique_dir(&self, prefix: &str, name: &WorldName) -> Result<PathBuf> {
        let pid = std::process::id();
        for n in 0..u32::MAX {
            let dir = self.root.join(format!("{prefix}{name}-{pid}-{n}"));
            match fs::create_dir(&dir) {
                Ok(()) => return Ok(dir),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(SyncError::io(
                        format!("failed to create {}", dir.display()),
                        e,
                    ))
                }
            }
        }
        Err(SyncError::io(
            format!("no free {prefix}{name} directory in {}", self.root.display()),
            std::io::Error::from(ErrorKind::AlreadyExists),
        ))
    }

    /// Undo an interrupted commit and clear leftover staging directories.
    pub fn recover(&self) -> Result<Vec<Recovered>> {
        let read_err = |path: &Path, e: std::io::Error| {
            SyncError::io(format!("failed to read {}", path.display()), e)
        };
        let mut actions = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| read_err(&self.root, e))? {
            let entry = entry.map_err(|e| read_err(&self.root, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let path = entry.path();

            if file_name.starts_with(RETIRED_PREFIX) {
                for inner in fs::read_dir(&path).map_err(|e| read_err(&path, e))? {
                    let inner = inner.map_err(|e| read_err(&path, e))?;
                    let Some(world) = inner
                        .file_name()
                        .to_str()
                        .and_then(|s| WorldName::new(s).ok())
                    else {
                        continue;
                    };
                    let target = self.world_path(&world);
                    if fs::symlink_metadata(&target).is_err() {
                        fs::rename(inner.path(), &target).map_err(|e| {
                            SyncError::io(format!("failed to restore {}", target.display()), e)
                        })?;
                        actions.push(Recovered::Restored(world));
                    }
                }
            } else if !file_name.starts_with(STAGING_PREFIX) {
                continue;
            }

            fs::remove_dir_all(&path).map_err(|e| {
                SyncError::io(format!("failed to remove {}", path.display()), e)
            })?;
            actions.push(Recovered::Removed(path));
        }
        Ok(actions)
    }
}
