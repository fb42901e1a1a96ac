use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use crossterm::style::{self, Stylize};
use sha2::{Digest, Sha256};

use super::format_bytes;
use crate::config::{self, ConversionRequest, DEFAULT_SIZE_BUFFER_MB, FsKind};
use crate::convert::host::{self, HostTools};
use crate::convert::{self, Conversion, OnStage, SecondaryOutcome, Stage};
use crate::error::ConvertError;
use crate::manifest::DiskLayer;
use crate::progress::{self, Spinner};

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// OCI image reference (e.g. library/ubuntu, ghcr.io/org/app:1.0)
    #[arg(value_parser = clap::builder::NonEmptyStringValueParser::new())]
    pub reference: String,

    /// Filesystem written into the image
    #[arg(long = "fs", value_enum, default_value_t = FsKind::Ext4)]
    pub fs: FsKind,

    /// Free space added on top of the unpacked rootfs, in MiB
    #[arg(long, value_name = "MB", default_value_t = DEFAULT_SIZE_BUFFER_MB)]
    pub size_buffer: u64,

    /// Reserve all image blocks up front instead of creating a sparse file
    #[arg(long)]
    pub preallocate: bool,

    /// Also build a compressed read-only squashfs image next to the raw one
    #[arg(long)]
    pub dual_output: bool,

    /// Output path (default: last segment of the reference + .img)
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Directory for scratch files; use one on the output's filesystem
    #[arg(long, value_name = "DIR", env = config::WORK_DIR_ENV)]
    pub work_dir: Option<PathBuf>,

    /// Write diskLayers manifest entries for the produced images to this file
    #[arg(long, value_name = "PATH")]
    pub layers_json: Option<PathBuf>,
}

impl ConvertArgs {
    fn to_request(&self) -> Result<ConversionRequest, ConvertError> {
        let mut request = ConversionRequest::new(self.reference.clone())?;
        request.fs = self.fs;
        request.size_buffer_mb = self.size_buffer;
        request.preallocate = self.preallocate;
        request.dual_output = self.dual_output;
        request.output = self.output.clone();
        Ok(request)
    }
}

pub fn run(args: &ConvertArgs) -> Result<()> {
    let request = args.to_request()?;

    if !host::is_root() {
        return Err(ConvertError::Privilege.into());
    }

    let tools = host::required_tools(request.fs, request.dual_output);
    host::check_prerequisites(&tools, |t| host::find_in_path(t).is_some())?;

    let work_root = config::work_root(args.work_dir.as_deref());
    tracing::debug!(work_root = %work_root.display(), ?request, "starting conversion");

    let spinner = Spinner::new(format!("Converting {} ...", request.reference));
    let mut on_stage = stage_reporter(&spinner);

    let conversion = match convert::convert(&request, &HostTools, &work_root, &mut on_stage) {
        Ok(c) => c,
        Err(e) => {
            spinner.fail(format!("{} failed", e.stage()));
            return Err(e).with_context(|| format!("Failed to convert {}", request.reference));
        }
    };

    spinner.finish(format!(
        "Converted {} ({}, {})",
        style::style(&request.reference).cyan(),
        conversion.fs,
        conversion.plan.bytes().map(format_bytes).unwrap_or_default()
    ));
    println!("{}", conversion.image.display());

    if let Some(dest) = &args.layers_json {
        write_layers(&conversion, dest)?;
        eprintln!("{} Wrote {}", "✔".green(), dest.display());
    }

    match conversion.secondary {
        SecondaryOutcome::NotRequested => Ok(()),
        SecondaryOutcome::Built(path) => {
            eprintln!("{} Wrote {}", "✔".green(), style::style(path.display()).cyan());
            Ok(())
        }
        SecondaryOutcome::Failed(e) => Err(e).with_context(|| {
            format!(
                "Primary image {} was published, but the secondary image failed",
                conversion.image.display()
            )
        }),
    }
}

/// Drive the spinner from pipeline stage transitions.
fn stage_reporter(spinner: &Spinner) -> Option<OnStage> {
    let bar = spinner.clone_bar();
    let mut current: Option<Stage> = None;
    Some(Box::new(move |stage| {
        match current.replace(stage) {
            Some(prev) => progress::step(&bar, done_message(prev), running_message(stage)),
            None => bar.set_message(running_message(stage)),
        }
    }))
}

fn running_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Prepare => "Preparing work area ...",
        Stage::Fetch => "Fetching image ...",
        Stage::Unpack => "Unpacking rootfs ...",
        Stage::Measure => "Measuring rootfs ...",
        Stage::Allocate => "Allocating image ...",
        Stage::Format => "Formatting ...",
        Stage::Attach => "Attaching loop device ...",
        Stage::Mount => "Mounting ...",
        Stage::Populate => "Copying rootfs ...",
        Stage::Release => "Unmounting ...",
        Stage::Publish => "Publishing ...",
        Stage::Secondary => "Building squashfs ...",
    }
}

fn done_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Prepare => "Prepared work area",
        Stage::Fetch => "Fetched image",
        Stage::Unpack => "Unpacked rootfs",
        Stage::Measure => "Measured rootfs",
        Stage::Allocate => "Allocated image",
        Stage::Format => "Formatted",
        Stage::Attach => "Attached loop device",
        Stage::Mount => "Mounted",
        Stage::Populate => "Copied rootfs",
        Stage::Release => "Unmounted and detached",
        Stage::Publish => "Published",
        Stage::Secondary => "Built squashfs",
    }
}

fn write_layers(conversion: &Conversion, dest: &Path) -> Result<()> {
    let mut layers = vec![describe_layer(&conversion.image, "raw")?];
    if let SecondaryOutcome::Built(path) = &conversion.secondary {
        layers.push(describe_layer(path, config::SECONDARY_EXTENSION)?);
    }

    let json = serde_json::to_string_pretty(&layers)?;
    fs::write(dest, json).with_context(|| format!("Failed to write {}", dest.display()))?;
    Ok(())
}

/// Build a `diskLayers` entry by hashing the file's contents.
fn describe_layer(path: &Path, format: &str) -> Result<DiskLayer> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let size = file.metadata()?.len();

    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to hash {}", path.display()))?;

    Ok(DiskLayer {
        reference: format!("sha256:{:x}", hasher.finalize()),
        format: format.to_string(),
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_describe_layer_hashes_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.img");
        fs::write(&path, b"hello").unwrap();

        let layer = describe_layer(&path, "raw").unwrap();

        assert_eq!(
            layer.reference,
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(layer.format, "raw");
        assert_eq!(layer.size, 5);
    }

    #[test]
    fn test_args_map_to_request() {
        let args = ConvertArgs {
            reference: "library/ubuntu".to_string(),
            fs: FsKind::Btrfs,
            size_buffer: 0,
            preallocate: true,
            dual_output: true,
            output: Some(PathBuf::from("custom.img")),
            work_dir: None,
            layers_json: None,
        };
        let req = args.to_request().unwrap();
        assert_eq!(req.fs, FsKind::Btrfs);
        assert_eq!(req.size_buffer_mb, 0);
        assert!(req.preallocate && req.dual_output);
        assert_eq!(req.output_path(), PathBuf::from("custom.img"));
    }
}
