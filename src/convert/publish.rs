use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConvertError;

/// Move the finished image to `dest` with a single rename.
///
/// Readers either see no file or the complete image. A destination on a
/// different filesystem than the work area fails with `EXDEV` rather than
/// falling back to a copy.
pub fn publish(image: &Path, dest: &Path) -> Result<PathBuf, ConvertError> {
    fs::rename(image, dest).map_err(|source| ConvertError::Publish {
        from: image.to_path_buf(),
        to: dest.to_path_buf(),
        source,
    })?;
    tracing::info!(dest = %dest.display(), "published image");
    Ok(dest.to_path_buf())
}
