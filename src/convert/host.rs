use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use oci_spec::image::ImageIndex;

use super::attach::LoopDevice;
use super::size::parse_du_output;
use super::{BlockAttacher, Fetcher, Formatter, Measurer, Populator, SquashfsBuilder, Unpacker};
use crate::config::FsKind;
use crate::error::{ConvertError, ToolError};

const SKOPEO: &str = "skopeo";
const UMOCI: &str = "umoci";
const MOUNT: &str = "mount";
const UMOUNT: &str = "umount";
const DU: &str = "du";
const CP: &str = "cp";
const LOSETUP: &str = "losetup";
const MKSQUASHFS: &str = "mksquashfs";

/// Tag the fetched image is stored under inside the local layout.
const LAYOUT_TAG: &str = "latest";

/// Collaborators backed by the host's command-line tools.
///
/// Every call runs the tool once and waits for it with no timeout, so a tool
/// that hangs also hangs the conversion.
pub struct HostTools;

impl Fetcher for HostTools {
    fn fetch(&self, reference: &str, layout: &Path) -> Result<(), ToolError> {
        let src = format!("docker://{reference}");
        let dest = format!("oci:{}:{LAYOUT_TAG}", layout.display());
        run(SKOPEO, ["copy", src.as_str(), dest.as_str()])?;
        verify_layout(layout)
    }
}

impl Unpacker for HostTools {
    fn unpack(&self, layout: &Path, bundle: &Path) -> Result<(), ToolError> {
        let image = format!("{}:{LAYOUT_TAG}", layout.display());
        run(
            UMOCI,
            [
                OsStr::new("unpack"),
                OsStr::new("--image"),
                OsStr::new(&image),
                bundle.as_os_str(),
            ],
        )?;
        Ok(())
    }
}

impl Measurer for HostTools {
    fn measure_kb(&self, dir: &Path) -> Result<u64, ToolError> {
        let out = run(DU, [OsStr::new("-sk"), dir.as_os_str()])?;
        parse_du_output(&out).map_err(|detail| ToolError::Output {
            tool: DU.to_string(),
            detail,
        })
    }
}

impl Formatter for HostTools {
    fn format(&self, fs: FsKind, image: &Path) -> Result<(), ToolError> {
        run(
            &fs.mkfs_tool(),
            [OsStr::new(fs.force_flag()), image.as_os_str()],
        )?;
        Ok(())
    }
}

impl BlockAttacher for HostTools {
    fn attach(&self, image: &Path) -> Result<LoopDevice, ToolError> {
        let out = run(
            LOSETUP,
            [OsStr::new("--find"), OsStr::new("--show"), image.as_os_str()],
        )?;
        let device = out.trim();
        if device.is_empty() {
            return Err(ToolError::Output {
                tool: LOSETUP.to_string(),
                detail: "no loop device reported".to_string(),
            });
        }
        Ok(LoopDevice::new(device))
    }

    fn mount(&self, device: &LoopDevice, mount_point: &Path) -> Result<(), ToolError> {
        run(MOUNT, [device.path().as_os_str(), mount_point.as_os_str()])?;
        Ok(())
    }

    fn unmount(&self, mount_point: &Path) -> Result<(), ToolError> {
        run(UMOUNT, [mount_point])?;
        Ok(())
    }

    fn detach(&self, device: &LoopDevice) -> Result<(), ToolError> {
        run(LOSETUP, [OsStr::new("-d"), device.path().as_os_str()])?;
        Ok(())
    }
}

impl Populator for HostTools {
    fn populate(&self, rootfs: &Path, mount_point: &Path) -> Result<(), ToolError> {
        // `<rootfs>/.` copies the children, not the directory itself
        let src = rootfs.join(".");
        run(
            CP,
            [OsStr::new("-a"), src.as_os_str(), mount_point.as_os_str()],
        )?;
        Ok(())
    }
}

impl SquashfsBuilder for HostTools {
    fn build(&self, rootfs: &Path, dest: &Path) -> Result<(), ToolError> {
        run(
            MKSQUASHFS,
            [rootfs.as_os_str(), dest.as_os_str(), OsStr::new("-noappend")],
        )?;
        Ok(())
    }
}

/// Run `tool` to completion and return its stdout.
fn run<I, S>(tool: &str, args: I) -> Result<String, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(tool);
    cmd.args(args);
    tracing::debug!(command = ?cmd, "running");

    let output = cmd.output().map_err(|source| ToolError::Spawn {
        tool: tool.to_string(),
        source,
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            status: output.status,
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Check that the fetched layout has an index listing at least one manifest.
fn verify_layout(layout: &Path) -> Result<(), ToolError> {
    let invalid = |detail: String| ToolError::Output {
        tool: SKOPEO.to_string(),
        detail,
    };

    let index = ImageIndex::from_file(layout.join("index.json"))
        .map_err(|e| invalid(format!("invalid OCI layout at {}: {e}", layout.display())))?;
    let manifest = index
        .manifests()
        .first()
        .ok_or_else(|| invalid(format!("OCI layout at {} has no manifests", layout.display())))?;

    tracing::info!(digest = %manifest.digest(), "fetched image manifest");
    Ok(())
}

/// Binaries a conversion will invoke, in the order they are checked.
pub fn required_tools(fs: FsKind, dual_output: bool) -> Vec<String> {
    let mut tools: Vec<String> = [SKOPEO, UMOCI, MOUNT, UMOUNT, DU, CP]
        .iter()
        .map(|t| t.to_string())
        .collect();
    tools.push(fs.mkfs_tool());
    tools.push(LOSETUP.to_string());
    if dual_output {
        tools.push(MKSQUASHFS.to_string());
    }
    tools
}

/// Fail with the first tool `is_available` rejects.
pub fn check_prerequisites(
    tools: &[String],
    is_available: impl Fn(&str) -> bool,
) -> Result<(), ConvertError> {
    match tools.iter().find(|t| !is_available(t)) {
        Some(tool) => Err(ConvertError::Prerequisite { tool: tool.clone() }),
        None => Ok(()),
    }
}

/// Locate an executable on `PATH`. A `tool` containing `/` is checked as
/// given.
pub fn find_in_path(tool: &str) -> Option<PathBuf> {
    if tool.contains('/') {
        let path = PathBuf::from(tool);
        return is_executable(&path).then_some(path);
    }

    search_path(tool, &std::env::var_os("PATH")?)
}

/// Empty entries are skipped rather than read as the current directory.
fn search_path(tool: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Loop devices and mounts need an effective uid of 0.
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}
