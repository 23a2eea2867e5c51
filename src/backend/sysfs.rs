use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::GpioError;
use crate::gpio::SysfsBackend;

/// The kernel's sysfs GPIO interface.
///
/// Control files always exist once the pin is exported, so writes never create
/// files: a missing attribute is reported as an error instead of being masked
/// by a stray regular file.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sysfs;

impl SysfsBackend for Sysfs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), GpioError> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| GpioError::io(format!("open {}", path.display()), e))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| GpioError::io(format!("write {}", path.display()), e))
    }

    fn open_read(&self, path: &Path) -> Result<File, GpioError> {
        File::open(path).map_err(|e| GpioError::io(format!("open {}", path.display()), e))
    }
}
