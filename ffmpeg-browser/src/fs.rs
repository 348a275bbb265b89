//! Virtual filesystem bridge: mounts and scratch-file lifecycle.

use crate::engine::VirtualFs;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of the persistent-storage mount attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MountState {
    /// Setup has not run.
    #[default]
    Unmounted,
    /// Origin-private storage is mounted; user files persist across sessions.
    PersistentMounted,
    /// Persistent storage was unavailable; everything lives in memory.
    MemoryFallback,
}

impl MountState {
    /// Whether user-visible files persist across sessions.
    pub fn is_persistent(&self) -> bool {
        matches!(self, MountState::PersistentMounted)
    }
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountState::Unmounted => write!(f, "unmounted"),
            MountState::PersistentMounted => write!(f, "persistent"),
            MountState::MemoryFallback => write!(f, "memory"),
        }
    }
}

/// Paths and naming for the engine's filesystem.
///
/// Scratch names combine a millisecond timestamp with a per-bridge sequence
/// number. They are unique only as long as one invocation runs at a time.
#[derive(Debug, Clone)]
pub struct FilesystemBridge {
    persistent_mount: String,
    scratch_dir: String,
    mount_state: MountState,
    sequence: u64,
}

impl FilesystemBridge {
    /// Create a bridge for the given mount point and scratch directory.
    pub fn new(persistent_mount: impl Into<String>, scratch_dir: impl Into<String>) -> Self {
        Self {
            persistent_mount: persistent_mount.into(),
            scratch_dir: scratch_dir.into(),
            mount_state: MountState::Unmounted,
            sequence: 0,
        }
    }

    /// Current mount state.
    pub fn mount_state(&self) -> MountState {
        self.mount_state
    }

    /// Scratch directory path.
    pub fn scratch_dir(&self) -> &str {
        &self.scratch_dir
    }

    /// Mount persistent storage (falling back to memory) and create the
    /// scratch directory. Runs once; later calls return the recorded state.
    pub fn setup<F: VirtualFs + ?Sized>(&mut self, fs: &mut F) -> MountState {
        if self.mount_state != MountState::Unmounted {
            return self.mount_state;
        }

        let mounted = fs
            .mkdir(&self.persistent_mount)
            .and_then(|()| fs.mount_persistent(&self.persistent_mount));
        self.mount_state = match mounted {
            Ok(()) => {
                tracing::info!(mount = %self.persistent_mount, "Persistent storage mounted");
                MountState::PersistentMounted
            }
            Err(err) => {
                tracing::warn!(error = %err, "Persistent storage unavailable, using memory filesystem");
                MountState::MemoryFallback
            }
        };

        // An existing directory is fine; anything else shows up on first write.
        if let Err(err) = fs.mkdir(&self.scratch_dir) {
            tracing::debug!(error = %err, "Scratch directory not created");
        }

        self.mount_state
    }

    /// Write input bytes to a fresh scratch file and return its path.
    pub fn write_input<F: VirtualFs + ?Sized>(
        &mut self,
        fs: &mut F,
        data: &[u8],
        unix_millis: u64,
    ) -> Result<String, crate::error::FsError> {
        let stamp = self.next_stamp(unix_millis);
        let path = format!("{}/input-{}", self.scratch_dir, stamp);
        fs.write_file(&path, data)?;
        tracing::debug!(path = %path, bytes = data.len(), "Wrote input file");
        Ok(path)
    }

    /// Reserve a scratch path for output in `format`.
    pub fn output_path(&mut self, format: &str, unix_millis: u64) -> String {
        let stamp = self.next_stamp(unix_millis);
        if format.is_empty() {
            format!("{}/output-{}", self.scratch_dir, stamp)
        } else {
            format!("{}/output-{}.{}", self.scratch_dir, stamp, format)
        }
    }

    /// Read an output file produced by the engine.
    pub fn read_output<F: VirtualFs + ?Sized>(
        &self,
        fs: &F,
        path: &str,
    ) -> Result<Vec<u8>, crate::error::FsError> {
        fs.read_file(path)
    }

    /// Remove a scratch file. Failures are logged and ignored.
    pub fn remove<F: VirtualFs + ?Sized>(&self, fs: &mut F, path: &str) {
        if let Err(err) = fs.unlink(path) {
            tracing::warn!(path = %path, error = %err, "Failed to clean up temporary file");
        }
    }

    /// Unmount persistent storage if it was mounted. Failures are ignored.
    pub fn unmount<F: VirtualFs + ?Sized>(&mut self, fs: &mut F) {
        if self.mount_state.is_persistent() {
            if let Err(err) = fs.unmount(&self.persistent_mount) {
                tracing::debug!(error = %err, "Ignoring unmount failure");
            }
        }
    }

    fn next_stamp(&mut self, unix_millis: u64) -> String {
        self.sequence += 1;
        format!("{}-{}", unix_millis, self.sequence)
    }
}
