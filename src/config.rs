use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;

use crate::error::ConvertError;

/// Extra space added on top of the measured rootfs, in MiB.
pub const DEFAULT_SIZE_BUFFER_MB: u64 = 50;

/// Extension of the primary raw block image.
pub const IMAGE_EXTENSION: &str = "img";

/// Extension of the optional compressed read-only image.
pub const SECONDARY_EXTENSION: &str = "squashfs";

/// Environment variable selecting the parent of the per-run work area.
pub const WORK_DIR_ENV: &str = "OVM_WORK_DIR";

/// Filesystem written into the raw image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FsKind {
    #[default]
    Ext4,
    Xfs,
    Btrfs,
}

impl FsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsKind::Ext4 => "ext4",
            FsKind::Xfs => "xfs",
            FsKind::Btrfs => "btrfs",
        }
    }

    /// Name of the formatter binary, e.g. `mkfs.ext4`.
    pub fn mkfs_tool(&self) -> String {
        format!("mkfs.{}", self.as_str())
    }

    /// Flag that makes the formatter overwrite whatever is in the file.
    pub fn force_flag(&self) -> &'static str {
        match self {
            FsKind::Ext4 => "-F",
            FsKind::Xfs | FsKind::Btrfs => "-f",
        }
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable input to one conversion run.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub reference: String,
    pub fs: FsKind,
    pub size_buffer_mb: u64,
    pub preallocate: bool,
    pub dual_output: bool,
    pub output: Option<PathBuf>,
}

impl ConversionRequest {
    /// Build a request with default flags, rejecting an empty reference.
    pub fn new(reference: impl Into<String>) -> Result<Self, ConvertError> {
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(ConvertError::Argument("missing <oci-ref>".to_string()));
        }
        Ok(Self {
            reference,
            fs: FsKind::default(),
            size_buffer_mb: DEFAULT_SIZE_BUFFER_MB,
            preallocate: false,
            dual_output: false,
            output: None,
        })
    }

    /// Where the primary image ends up.
    ///
    /// An explicit `--output` is used verbatim, otherwise the last `/`
    /// segment of the reference plus `.img`.
    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => default_output_name(&self.reference),
        }
    }
}

fn default_output_name(reference: &str) -> PathBuf {
    let name = reference.rsplit('/').next().unwrap_or(reference);
    PathBuf::from(format!("{name}.{IMAGE_EXTENSION}"))
}

/// Path of the secondary image next to the primary one.
pub fn secondary_path(primary: &Path) -> PathBuf {
    primary.with_extension(SECONDARY_EXTENSION)
}

/// Parent directory for the work area: explicit value, else the system temp dir.
pub fn work_root(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_uses_last_segment() {
        let req = ConversionRequest::new("library/ubuntu").unwrap();
        assert_eq!(req.output_path(), PathBuf::from("ubuntu.img"));

        let req = ConversionRequest::new("alpine").unwrap();
        assert_eq!(req.output_path(), PathBuf::from("alpine.img"));

        let req = ConversionRequest::new("registry:5000/team/app:1.2").unwrap();
        assert_eq!(req.output_path(), PathBuf::from("app:1.2.img"));
    }

    #[test]
    fn test_explicit_output_is_verbatim() {
        let mut req = ConversionRequest::new("library/ubuntu").unwrap();
        req.output = Some(PathBuf::from("out/custom.raw"));
        assert_eq!(req.output_path(), PathBuf::from("out/custom.raw"));
    }

    #[test]
    fn test_empty_reference_rejected() {
        assert!(matches!(
            ConversionRequest::new("  "),
            Err(ConvertError::Argument(_))
        ));
    }

    #[test]
    fn test_request_defaults() {
        let req = ConversionRequest::new("library/ubuntu").unwrap();
        assert_eq!(req.fs, FsKind::Ext4);
        assert_eq!(req.size_buffer_mb, 50);
        assert!(!req.preallocate);
        assert!(!req.dual_output);
    }

    #[test]
    fn test_secondary_path_replaces_extension() {
        assert_eq!(
            secondary_path(Path::new("custom.img")),
            PathBuf::from("custom.squashfs")
        );
        assert_eq!(
            secondary_path(Path::new("/data/ubuntu")),
            PathBuf::from("/data/ubuntu.squashfs")
        );
    }

    #[test]
    fn test_fs_kind_flags() {
        assert_eq!(FsKind::Ext4.force_flag(), "-F");
        assert_eq!(FsKind::Xfs.force_flag(), "-f");
        assert_eq!(FsKind::Btrfs.force_flag(), "-f");
        assert_eq!(FsKind::Btrfs.mkfs_tool(), "mkfs.btrfs");
    }
}
