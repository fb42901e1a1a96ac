use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Scratch directory tree owned by a single conversion run.
///
/// Removed recursively when dropped, whatever the outcome of the run.
pub struct WorkArea {
    dir: Option<TempDir>,
    root: PathBuf,
}

impl WorkArea {
    /// Create `ovm-convert-XXXX` under `parent` with its layout and mount point dirs.
    pub fn create(parent: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("ovm-convert-")
            .tempdir_in(parent)?;
        let root = dir.path().to_path_buf();

        let area = Self {
            dir: Some(dir),
            root,
        };
        fs::create_dir_all(area.layout())?;
        fs::create_dir_all(area.bundle())?;
        fs::create_dir_all(area.mount_point())?;

        tracing::debug!(root = %area.root.display(), "created work area");
        Ok(area)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local OCI image layout written by the fetcher.
    pub fn layout(&self) -> PathBuf {
        self.root.join("oci-layout")
    }

    /// Runtime bundle written by the unpacker.
    pub fn bundle(&self) -> PathBuf {
        self.root.join("unpacked-rootfs")
    }

    pub fn rootfs(&self) -> PathBuf {
        self.bundle().join("rootfs")
    }

    pub fn image(&self) -> PathBuf {
        self.root.join("fs.img")
    }

    pub fn mount_point(&self) -> PathBuf {
        self.root.join("mnt")
    }
}

impl Drop for WorkArea {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => tracing::debug!(root = %self.root.display(), "removed work area"),
                Err(e) => tracing::warn!(
                    root = %self.root.display(),
                    error = %e,
                    "failed to remove work area"
                ),
            }
        }
    }
}
