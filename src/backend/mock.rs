use std::cell::RefCell;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::GpioError;
use crate::gpio::SysfsBackend;

/// Emulates the sysfs GPIO tree on an ordinary directory.
///
/// Writing a pin number to `export` creates `gpio<N>/` with its attribute and
/// value files, writing it to `unexport` removes the directory again. Every
/// successful write is recorded so tests can assert on the exact sequence of
/// control-file writes.
#[derive(Debug)]
pub struct MockSysfs {
    root: PathBuf,
    writes: RefCell<Vec<WriteRecord>>,
    failing_writes: RefCell<Option<String>>,
    failing_opens: RefCell<Option<String>>,
    failing_reads: RefCell<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub path: PathBuf,
    pub contents: String,
}

impl WriteRecord {
    /// Name of the written file, e.g. `"direction"` or `"export"`.
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

impl MockSysfs {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        fs::write(root.join("export"), "")?;
        fs::write(root.join("unexport"), "")?;

        Ok(Self {
            root,
            writes: RefCell::new(Vec::new()),
            failing_writes: RefCell::new(None),
            failing_opens: RefCell::new(None),
            failing_reads: RefCell::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    /// Claims `pin` behind the engine's back, as another process would.
    pub fn pre_export(&self, pin: u32) -> io::Result<()> {
        self.create_pin_dir(pin)
    }

    pub fn is_exported(&self, pin: u32) -> bool {
        self.pin_dir(pin).is_dir()
    }

    /// Simulates the kernel changing the pin level. Not recorded as a write.
    pub fn set_value(&self, pin: u32, contents: &str) -> io::Result<()> {
        fs::write(self.pin_dir(pin).join("value"), contents)
    }

    pub fn value(&self, pin: u32) -> io::Result<String> {
        fs::read_to_string(self.pin_dir(pin).join("value"))
    }

    /// Makes every subsequent write to a file named `file_name` fail with
    /// `PermissionDenied`.
    pub fn fail_writes_to(&self, file_name: &str) {
        *self.failing_writes.borrow_mut() = Some(file_name.to_string());
    }

    /// Makes every subsequent open of a file named `file_name` fail with
    /// `PermissionDenied`.
    pub fn fail_opens_to(&self, file_name: &str) {
        *self.failing_opens.borrow_mut() = Some(file_name.to_string());
    }

    /// Files named `file_name` still open, but every read from the returned
    /// handle fails, like a value file whose pin vanished underneath us.
    pub fn fail_reads_from(&self, file_name: &str) {
        *self.failing_reads.borrow_mut() = Some(file_name.to_string());
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.borrow().clone()
    }

    /// Writes whose file name is `file_name`, in order.
    pub fn writes_to(&self, file_name: &str) -> Vec<String> {
        self.writes
            .borrow()
            .iter()
            .filter(|w| w.file_name() == file_name)
            .map(|w| w.contents.clone())
            .collect()
    }

    pub fn clear_writes(&self) {
        self.writes.borrow_mut().clear();
    }

    fn create_pin_dir(&self, pin: u32) -> io::Result<()> {
        let dir = self.pin_dir(pin);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("direction"), "in\n")?;
        fs::write(dir.join("edge"), "none\n")?;
        fs::write(dir.join("active_low"), "0\n")?;
        fs::write(dir.join("value"), "0\n")
    }

    fn targets(slot: &RefCell<Option<String>>, path: &Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str());
        let failing = slot.borrow();
        failing.as_deref().is_some_and(|f| name == Some(f))
    }

    fn parse_pin(path: &Path, contents: &str) -> Result<u32, GpioError> {
        contents.trim().parse::<u32>().map_err(|_| {
            GpioError::io(
                format!("write {}", path.display()),
                io::Error::new(io::ErrorKind::InvalidInput, "invalid pin number"),
            )
        })
    }
}

impl SysfsBackend for MockSysfs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), GpioError> {
        let context = format!("write {}", path.display());
        if Self::targets(&self.failing_writes, path) {
            return Err(GpioError::io(
                context,
                io::Error::new(io::ErrorKind::PermissionDenied, "injected failure"),
            ));
        }

        if path == self.root.join("export") {
            let pin = Self::parse_pin(path, contents)?;
            if self.is_exported(pin) {
                return Err(GpioError::io(
                    context,
                    io::Error::new(io::ErrorKind::ResourceBusy, "pin already exported"),
                ));
            }
            self.create_pin_dir(pin)
                .map_err(|e| GpioError::io(context.clone(), e))?;
        } else if path == self.root.join("unexport") {
            let pin = Self::parse_pin(path, contents)?;
            fs::remove_dir_all(self.pin_dir(pin)).map_err(|e| GpioError::io(context.clone(), e))?;
        } else {
            // Like sysfs, refuse to write attributes of a pin that isn't exported.
            let parent_exists = path.parent().is_some_and(Path::is_dir);
            if !parent_exists {
                return Err(GpioError::io(
                    context,
                    io::Error::new(io::ErrorKind::NotFound, "no such pin directory"),
                ));
            }
            fs::write(path, contents).map_err(|e| GpioError::io(context.clone(), e))?;
        }

        self.writes.borrow_mut().push(WriteRecord {
            path: path.to_path_buf(),
            contents: contents.to_string(),
        });
        Ok(())
    }

    fn open_read(&self, path: &Path) -> Result<File, GpioError> {
        let context = format!("open {}", path.display());
        if Self::targets(&self.failing_opens, path) {
            return Err(GpioError::io(
                context,
                io::Error::new(io::ErrorKind::PermissionDenied, "injected failure"),
            ));
        }

        // A directory opens fine but refuses every read with EISDIR.
        let target = match path.parent() {
            Some(dir) if Self::targets(&self.failing_reads, path) => dir,
            _ => path,
        };
        File::open(target).map_err(|e| GpioError::io(context, e))
    }
}
