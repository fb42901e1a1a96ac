use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use crate::error::ConvertError;

/// Capacity of the raw image: measured rootfs usage plus the requested buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePlan {
    pub measured_kb: u64,
    pub buffer_mb: u64,
}

impl SizePlan {
    pub fn new(measured_kb: u64, buffer_mb: u64) -> Self {
        Self {
            measured_kb,
            buffer_mb,
        }
    }

    /// `None` if the capacity does not fit in a `u64`.
    pub fn total_kb(&self) -> Option<u64> {
        self.buffer_mb
            .checked_mul(1024)
            .and_then(|buffer_kb| buffer_kb.checked_add(self.measured_kb))
    }

    pub fn bytes(&self) -> Option<u64> {
        self.total_kb()?.checked_mul(1024)
    }
}

/// Parse `du -sk` output: a KiB count followed by whitespace-separated fields.
pub fn parse_du_output(output: &str) -> Result<u64, String> {
    let first = output
        .split_whitespace()
        .next()
        .ok_or_else(|| "empty output".to_string())?;
    first
        .parse::<u64>()
        .map_err(|_| format!("expected a size in KiB, got {first:?}"))
}

/// Create the raw image file at `path` with the planned apparent size.
///
/// Sparse mode only extends the file length so blocks are allocated lazily.
/// Preallocated mode reserves every block up front.
pub fn allocate_image(path: &Path, plan: &SizePlan, preallocate: bool) -> Result<(), ConvertError> {
    let err = |source: io::Error| ConvertError::Allocation {
        path: path.to_path_buf(),
        source,
    };

    let bytes = plan.bytes().ok_or_else(|| {
        err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "image size overflows: {} KiB measured plus {} MiB buffer",
                plan.measured_kb, plan.buffer_mb
            ),
        ))
    })?;
    if bytes == 0 {
        return Err(err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "computed image size is zero",
        )));
    }

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(err)?;

    if preallocate {
        reserve(&file, bytes).map_err(err)?;
    } else {
        file.set_len(bytes).map_err(err)?;
    }

    tracing::debug!(
        path = %path.display(),
        bytes,
        preallocate,
        "allocated raw image"
    );
    Ok(())
}

fn reserve(file: &File, bytes: u64) -> io::Result<()> {
    let len = libc::off_t::try_from(bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "image size too large"))?;
    // posix_fallocate returns the error number instead of setting errno
    let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, len) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}
