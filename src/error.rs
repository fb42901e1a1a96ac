use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::convert::Stage;

/// Failure of a single external tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The binary could not be started at all.
    #[error("failed to run `{tool}`: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    /// The binary ran but exited unsuccessfully.
    #[error("`{tool}` exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },

    /// The binary succeeded but produced output we could not use.
    #[error("unexpected output from `{tool}`: {detail}")]
    Output { tool: String, detail: String },
}

/// Errors raised by the conversion pipeline and its entry checks.
///
/// Every variant maps to the [`Stage`] it originated from so the CLI can
/// report where a conversion stopped.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid arguments: {0}")]
    Argument(String),

    #[error("ovm convert requires root privileges for loop device and mount operations")]
    Privilege,

    #[error("missing required tool: {tool}")]
    Prerequisite { tool: String },

    #[error("failed to prepare work area: {0}")]
    WorkArea(#[source] io::Error),

    #[error("fetch failed: {0}")]
    Fetch(#[source] ToolError),

    #[error("unpack failed: {0}")]
    Unpack(#[source] ToolError),

    #[error("measuring rootfs failed: {0}")]
    Measurement(#[source] ToolError),

    #[error("allocating {} failed: {source}", path.display())]
    Allocation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("formatting as {fs} failed: {source}")]
    Format {
        fs: String,
        #[source]
        source: ToolError,
    },

    #[error("attaching loop device failed: {0}")]
    Attach(#[source] ToolError),

    #[error("mount failed: {0}")]
    Mount(#[source] ToolError),

    #[error("populating image failed: {0}")]
    Populate(#[source] ToolError),

    #[error("publishing {} to {} failed: {source}", from.display(), to.display())]
    Publish {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("building secondary image {} failed: {source}", path.display())]
    SecondaryArtifact {
        path: PathBuf,
        #[source]
        source: ToolError,
    },
}

impl ConvertError {
    /// The pipeline stage this error originated from.
    pub fn stage(&self) -> Stage {
        match self {
            ConvertError::Argument(_)
            | ConvertError::Privilege
            | ConvertError::Prerequisite { .. }
            | ConvertError::WorkArea(_) => Stage::Prepare,
            ConvertError::Fetch(_) => Stage::Fetch,
            ConvertError::Unpack(_) => Stage::Unpack,
            ConvertError::Measurement(_) => Stage::Measure,
            ConvertError::Allocation { .. } => Stage::Allocate,
            ConvertError::Format { .. } => Stage::Format,
            ConvertError::Attach(_) => Stage::Attach,
            ConvertError::Mount(_) => Stage::Mount,
            ConvertError::Populate(_) => Stage::Populate,
            ConvertError::Publish { .. } => Stage::Publish,
            ConvertError::SecondaryArtifact { .. } => Stage::Secondary,
        }
    }
}
