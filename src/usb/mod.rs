use std::path::{Path, PathBuf};
#[cfg(feature = "usb-reset")]
use log::info;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResetError {
    #[error("Unable to open USB device {path:?}: {source}")]
    Open { path: PathBuf, source: std::io::Error },
    #[error("USBDEVFS_RESET on {path:?} failed: {errno}")]
    Ioctl { path: PathBuf, errno: nix::errno::Errno },
    #[error("USB reset support is not compiled in")]
    Unsupported,
}

/// Hardware level recovery of the receiver
pub trait DeviceReset {
    fn reset(&self, device: &Path) -> Result<(), ResetError>;
}

/// Resets a device below `/dev/bus/usb/` with the usbdevfs ioctl
pub struct UsbDeviceReset;

#[cfg(feature = "usb-reset")]
mod ioctl {
    /* _IO('U', 20) of linux/usbdevice_fs.h */
    nix::ioctl_none!(usbdevfs_reset, b'U', 20);
}

impl DeviceReset for UsbDeviceReset {
    #[cfg(feature = "usb-reset")]
    fn reset(&self, device: &Path) -> Result<(), ResetError> {
        use std::fs::OpenOptions;
        use std::os::fd::AsRawFd;

        info!("Resetting USB device {device:?}");
        let file = OpenOptions::new()
            .write(true)
            .open(device)
            .map_err(|source| ResetError::Open { path: device.to_path_buf(), source })?;

        /* the file is closed when it goes out of scope, also on error */
        unsafe { ioctl::usbdevfs_reset(file.as_raw_fd()) }
            .map_err(|errno| ResetError::Ioctl { path: device.to_path_buf(), errno })?;

        info!("USB device {device:?} reset");
        return Ok(());
    }

    #[cfg(not(feature = "usb-reset"))]
    fn reset(&self, device: &Path) -> Result<(), ResetError> {
        log::warn!("Not resetting {device:?}, USB reset support is disabled");
        return Err(ResetError::Unsupported);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device() {
        let err = UsbDeviceReset.reset(Path::new("/nonexistent/bus/usb/001/001")).unwrap_err();
        if cfg!(feature = "usb-reset") {
            assert!(matches!(err, ResetError::Open { .. }));
        } else {
            assert!(matches!(err, ResetError::Unsupported));
        }
    }

    #[cfg(feature = "usb-reset")]
    #[test]
    fn test_regular_file_is_not_a_usb_device() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = UsbDeviceReset.reset(file.path()).unwrap_err();
        assert!(matches!(err, ResetError::Ioctl { .. }));
    }
}
