/// Workspace Manager - per-request scratch directories
///
/// Every request gets its own directory `exec-<uuid>` under a shared scratch
/// root. Names come from a v4 UUID, so concurrent acquires never collide and
/// no locking is needed. A workspace is released exactly once: explicitly via
/// [`Workspace::release`], or by the drop guard if the request future is
/// cancelled or panics before it gets there.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    scratch_root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
        }
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Create a fresh, uniquely named workspace, creating the scratch root if absent
    pub async fn acquire(&self) -> io::Result<Workspace> {
        tokio::fs::create_dir_all(&self.scratch_root).await.map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to create scratch root {}: {}", self.scratch_root.display(), e),
            )
        })?;

        let id = Uuid::new_v4();
        let root_path = self.scratch_root.join(format!("exec-{}", id));

        // create_dir (not create_dir_all) so an impossible collision still fails loudly
        tokio::fs::create_dir(&root_path).await.map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to create workspace {}: {}", root_path.display(), e),
            )
        })?;

        debug!(workspace = %id, path = %root_path.display(), "Workspace acquired");

        Ok(Workspace {
            id,
            root_path,
            released: false,
        })
    }
}

/// Exclusive scratch directory owned by one in-flight request
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    root_path: PathBuf,
    released: bool,
}

impl Workspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.root_path
    }

    /// Path of a file inside the workspace
    pub fn file(&self, name: &str) -> PathBuf {
        self.root_path.join(name)
    }

    /// Remove the directory and everything in it.
    ///
    /// Failures are logged and swallowed: a leaked directory must never turn
    /// into a failed response.
    pub async fn release(mut self) {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.root_path).await {
            Ok(()) => debug!(workspace = %self.id, "Workspace released"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => error!(
                workspace = %self.id,
                path = %self.root_path.display(),
                error = %e,
                "Failed to remove workspace"
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!(workspace = %self.id, "Workspace dropped without release, cleaning up");
        let id = self.id;
        let path = self.root_path.clone();
        let remove = move || {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    error!(workspace = %id, path = %path.display(), error = %e, "Failed to remove workspace");
                }
            }
        };

        // Drop cannot be async; hand the removal to the blocking pool when a runtime exists
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(remove);
            }
            Err(_) => remove(),
        }
    }
}
