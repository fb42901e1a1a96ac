use std::fmt;
use std::path::{Path, PathBuf};

use super::BlockAttacher;
use crate::error::ConvertError;

/// A loop block device path such as `/dev/loop3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDevice(PathBuf);

impl LoopDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for LoopDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Lifecycle of a [`BlockAttachment`]. There is no unattached state: a
/// value only exists once the loop device is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Attached,
    Mounted,
    Unmounting,
    Detaching,
    Released,
}

/// A loop device bound to the raw image, optionally mounted.
///
/// Releasing unmounts (if mounted) and then detaches. Each release step runs
/// at most once; a failing step is logged and the next one is still
/// attempted. Dropping an unreleased attachment performs the same unwind, so
/// an early return anywhere after [`BlockAttachment::attach`] cannot leak the
/// mount or the loop device.
pub struct BlockAttachment<'a> {
    attacher: &'a dyn BlockAttacher,
    device: LoopDevice,
    mount_point: Option<PathBuf>,
    state: AttachState,
}

impl<'a> BlockAttachment<'a> {
    pub fn attach(attacher: &'a dyn BlockAttacher, image: &Path) -> Result<Self, ConvertError> {
        let device = attacher.attach(image).map_err(ConvertError::Attach)?;
        tracing::info!(device = %device, image = %image.display(), "attached loop device");
        Ok(Self {
            attacher,
            device,
            mount_point: None,
            state: AttachState::Attached,
        })
    }

    pub fn mount(&mut self, mount_point: &Path) -> Result<(), ConvertError> {
        debug_assert_eq!(self.state(), AttachState::Attached);
        self.attacher
            .mount(&self.device, mount_point)
            .map_err(ConvertError::Mount)?;
        tracing::info!(device = %self.device, mount_point = %mount_point.display(), "mounted");
        self.mount_point = Some(mount_point.to_path_buf());
        self.state = AttachState::Mounted;
        Ok(())
    }

    pub fn device(&self) -> &LoopDevice {
        &self.device
    }

    pub fn state(&self) -> AttachState {
        self.state
    }

    /// Unmount and detach now instead of at drop.
    pub fn release(mut self) {
        self.unwind();
    }

    fn unwind(&mut self) {
        if self.state == AttachState::Mounted {
            self.state = AttachState::Unmounting;
            if let Some(mount_point) = self.mount_point.take() {
                if let Err(e) = self.attacher.unmount(&mount_point) {
                    tracing::warn!(
                        mount_point = %mount_point.display(),
                        error = %e,
                        "failed to unmount"
                    );
                }
            }
        }

        if matches!(self.state, AttachState::Attached | AttachState::Unmounting) {
            self.state = AttachState::Detaching;
            if let Err(e) = self.attacher.detach(&self.device) {
                tracing::warn!(device = %self.device, error = %e, "failed to detach loop device");
            }
        }

        if self.state != AttachState::Released {
            tracing::debug!(device = %self.device, "released block attachment");
            self.state = AttachState::Released;
        }
    }
}

impl Drop for BlockAttachment<'_> {
    fn drop(&mut self) {
        self.unwind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::testing::{Call, FakeHost};

    #[test]
    fn test_release_unmounts_before_detaching() {
        let host = FakeHost::new();
        let mut att = BlockAttachment::attach(&host, Path::new("/w/fs.img")).unwrap();
        assert_eq!(att.state(), AttachState::Attached);
        att.mount(Path::new("/w/mnt")).unwrap();
        assert_eq!(att.state(), AttachState::Mounted);
        att.release();

        assert_eq!(
            host.calls(),
            vec![Call::Attach, Call::Mount, Call::Unmount, Call::Detach]
        );
    }

    #[test]
    fn test_drop_without_mount_only_detaches() {
        let host = FakeHost::new();
        {
            let _att = BlockAttachment::attach(&host, Path::new("/w/fs.img")).unwrap();
        }
        assert_eq!(host.calls(), vec![Call::Attach, Call::Detach]);
    }

    #[test]
    fn test_failed_mount_still_detaches() {
        let host = FakeHost::failing_at(Call::Mount);
        let mut att = BlockAttachment::attach(&host, Path::new("/w/fs.img")).unwrap();
        let err = att.mount(Path::new("/w/mnt")).unwrap_err();
        assert!(matches!(err, ConvertError::Mount(_)));
        assert_eq!(att.state(), AttachState::Attached);
        drop(att);

        assert_eq!(host.calls(), vec![Call::Attach, Call::Mount, Call::Detach]);
    }

    #[test]
    fn test_unmount_failure_does_not_skip_detach() {
        let host = FakeHost::failing_at(Call::Unmount);
        let mut att = BlockAttachment::attach(&host, Path::new("/w/fs.img")).unwrap();
        att.mount(Path::new("/w/mnt")).unwrap();
        att.release();

        assert_eq!(
            host.calls(),
            vec![Call::Attach, Call::Mount, Call::Unmount, Call::Detach]
        );
    }

    #[test]
    fn test_failed_attach_releases_nothing() {
        let host = FakeHost::failing_at(Call::Attach);
        let err = BlockAttachment::attach(&host, Path::new("/w/fs.img"))
            .err()
            .unwrap();
        assert!(matches!(err, ConvertError::Attach(_)));
        assert_eq!(host.calls(), vec![Call::Attach]);
    }
}
