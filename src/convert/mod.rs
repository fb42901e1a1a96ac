pub mod attach;
pub mod host;
pub mod publish;
pub mod size;
pub mod workarea;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{self, ConversionRequest, FsKind};
use crate::error::{ConvertError, ToolError};
use attach::{BlockAttachment, LoopDevice};
use size::SizePlan;
use workarea::WorkArea;

/// Retrieves an image by reference into a local OCI layout.
pub trait Fetcher {
    fn fetch(&self, reference: &str, layout: &Path) -> Result<(), ToolError>;
}

/// Expands an OCI layout into a bundle whose `rootfs/` is a plain tree.
pub trait Unpacker {
    fn unpack(&self, layout: &Path, bundle: &Path) -> Result<(), ToolError>;
}

/// Reports allocated disk usage of a directory tree in KiB.
pub trait Measurer {
    fn measure_kb(&self, dir: &Path) -> Result<u64, ToolError>;
}

/// Writes an empty filesystem into a raw image file.
pub trait Formatter {
    fn format(&self, fs: FsKind, image: &Path) -> Result<(), ToolError>;
}

/// Loop device and mount primitives. Ordering is enforced by [`BlockAttachment`].
pub trait BlockAttacher {
    fn attach(&self, image: &Path) -> Result<LoopDevice, ToolError>;
    fn mount(&self, device: &LoopDevice, mount_point: &Path) -> Result<(), ToolError>;
    fn unmount(&self, mount_point: &Path) -> Result<(), ToolError>;
    fn detach(&self, device: &LoopDevice) -> Result<(), ToolError>;
}

/// Copies the children of `rootfs` into `mount_point`, preserving attributes.
pub trait Populator {
    fn populate(&self, rootfs: &Path, mount_point: &Path) -> Result<(), ToolError>;
}

/// Builds a compressed read-only image from a directory tree.
pub trait SquashfsBuilder {
    fn build(&self, rootfs: &Path, dest: &Path) -> Result<(), ToolError>;
}

/// Everything a conversion needs from the outside world.
pub trait Toolchain:
    Fetcher + Unpacker + Measurer + Formatter + BlockAttacher + Populator + SquashfsBuilder
{
}

impl<T> Toolchain for T where
    T: Fetcher + Unpacker + Measurer + Formatter + BlockAttacher + Populator + SquashfsBuilder
{
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Fetch,
    Unpack,
    Measure,
    Allocate,
    Format,
    Attach,
    Mount,
    Populate,
    Release,
    Publish,
    Secondary,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Prepare => "prepare",
            Stage::Fetch => "fetch",
            Stage::Unpack => "unpack",
            Stage::Measure => "measure",
            Stage::Allocate => "allocate",
            Stage::Format => "format",
            Stage::Attach => "attach",
            Stage::Mount => "mount",
            Stage::Populate => "populate",
            Stage::Release => "release",
            Stage::Publish => "publish",
            Stage::Secondary => "secondary image",
        };
        f.write_str(s)
    }
}

/// Optional callback invoked as each stage starts (for progress reporting).
pub type OnStage = Box<dyn FnMut(Stage)>;

/// Result of the optional compressed image step.
#[derive(Debug)]
pub enum SecondaryOutcome {
    NotRequested,
    Built(PathBuf),
    /// The primary image is still published; only this step failed.
    Failed(ConvertError),
}

/// A successfully published conversion.
#[derive(Debug)]
pub struct Conversion {
    pub image: PathBuf,
    pub fs: FsKind,
    pub plan: SizePlan,
    pub secondary: SecondaryOutcome,
}

/// Convert `request.reference` into a raw block image.
///
/// The work area is created under `work_root` and removed before this
/// returns. Any failure up to and including publish aborts the run after
/// unmounting, detaching and removing the work area, in that order; nothing
/// is left at the destination. A failing secondary image is reported in
/// [`Conversion::secondary`] instead.
pub fn convert<T: Toolchain>(
    request: &ConversionRequest,
    tools: &T,
    work_root: &Path,
    on_stage: &mut Option<OnStage>,
) -> Result<Conversion, ConvertError> {
    let mut notify = |stage: Stage| {
        tracing::debug!(%stage, "stage started");
        if let Some(cb) = on_stage.as_mut() {
            cb(stage);
        }
    };

    notify(Stage::Prepare);
    let work = WorkArea::create(work_root).map_err(ConvertError::WorkArea)?;
    tracing::info!(work_area = %work.root().display(), reference = %request.reference, "converting");

    notify(Stage::Fetch);
    tools
        .fetch(&request.reference, &work.layout())
        .map_err(ConvertError::Fetch)?;

    notify(Stage::Unpack);
    tools
        .unpack(&work.layout(), &work.bundle())
        .map_err(ConvertError::Unpack)?;

    notify(Stage::Measure);
    let measured_kb = tools
        .measure_kb(&work.rootfs())
        .map_err(ConvertError::Measurement)?;
    let plan = SizePlan::new(measured_kb, request.size_buffer_mb);
    tracing::info!(
        measured_kb,
        total_kb = ?plan.total_kb(),
        "sized image"
    );

    notify(Stage::Allocate);
    size::allocate_image(&work.image(), &plan, request.preallocate)?;

    notify(Stage::Format);
    tools
        .format(request.fs, &work.image())
        .map_err(|source| ConvertError::Format {
            fs: request.fs.to_string(),
            source,
        })?;

    notify(Stage::Attach);
    let mut attachment = BlockAttachment::attach(tools, &work.image())?;

    notify(Stage::Mount);
    attachment.mount(&work.mount_point())?;

    notify(Stage::Populate);
    tracing::debug!(device = %attachment.device(), "populating");
    tools
        .populate(&work.rootfs(), &work.mount_point())
        .map_err(ConvertError::Populate)?;

    notify(Stage::Release);
    attachment.release();

    notify(Stage::Publish);
    let image = publish::publish(&work.image(), &request.output_path())?;

    let secondary = if request.dual_output {
        notify(Stage::Secondary);
        let dest = config::secondary_path(&image);
        match tools.build(&work.rootfs(), &dest) {
            Ok(()) => {
                tracing::info!(dest = %dest.display(), "built secondary image");
                SecondaryOutcome::Built(dest)
            }
            Err(source) => {
                let err = ConvertError::SecondaryArtifact { path: dest, source };
                tracing::warn!(error = %err, "secondary image failed, primary image kept");
                SecondaryOutcome::Failed(err)
            }
        }
    } else {
        SecondaryOutcome::NotRequested
    };

    Ok(Conversion {
        image,
        fs: request.fs,
        plan,
        secondary,
    })
}
