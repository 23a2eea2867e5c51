use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::{Attribute, Direction, Edge, PinConfig, PinSettings};
use crate::error::GpioError;
use crate::gpio::SysfsBackend;

/// Export/unexport bookkeeping and attribute configuration for one pin.
///
/// Whether the pin gets unexported is decided solely by `exported_by_us`,
/// never by what the control tree looks like at teardown time.
#[derive(Debug)]
pub struct PinLifecycle {
    control_root: PathBuf,
    pin: u32,
    pin_dir: PathBuf,
    exported_by_us: bool,
}

impl PinLifecycle {
    pub fn new(control_root: impl Into<PathBuf>, pin: u32) -> Self {
        let control_root = control_root.into();
        let pin_dir = control_root.join(format!("gpio{pin}"));
        Self {
            control_root,
            pin,
            pin_dir,
            exported_by_us: false,
        }
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn pin_dir(&self) -> &Path {
        &self.pin_dir
    }

    pub fn exported_by_us(&self) -> bool {
        self.exported_by_us
    }

    /// Exports the pin unless its directory already exists. Returns whether
    /// this call performed the export.
    pub fn ensure_exported<B: SysfsBackend>(&mut self, backend: &B) -> Result<bool, GpioError> {
        if backend.exists(&self.pin_dir) {
            debug!("gpio{} already exported, leaving claim as is", self.pin);
            return Ok(false);
        }

        backend.write(&self.control_root.join("export"), &self.pin.to_string())?;
        self.exported_by_us = true;
        info!("Exported gpio{}", self.pin);
        Ok(true)
    }

    /// Validates `value` against the attribute's allowed set and writes the
    /// normalized token to `<pin_dir>/<attribute>`.
    pub fn configure<B: SysfsBackend>(
        &self,
        backend: &B,
        attribute: Attribute,
        value: &str,
    ) -> Result<&'static str, GpioError> {
        let value = attribute.validate(value)?;
        backend.write(&self.pin_dir.join(attribute.file_name()), value)?;
        debug!("gpio{} {} = {value}", self.pin, attribute.file_name());
        Ok(value)
    }

    /// Configures direction, then edge and active_low for inputs. The kernel
    /// only exposes the latter two once the direction is `in`.
    ///
    /// On any failure the pin is unexported again (if we exported it) before
    /// the error is returned.
    pub fn apply<B: SysfsBackend>(
        &mut self,
        backend: &B,
        config: &PinConfig,
    ) -> Result<PinSettings, GpioError> {
        match self.configure_all(backend, config) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                if let Err(rollback) = self.unexport_if_owned(backend) {
                    warn!("gpio{}: rollback unexport failed: {rollback}", self.pin);
                }
                Err(e)
            }
        }
    }

    fn configure_all<B: SysfsBackend>(
        &self,
        backend: &B,
        config: &PinConfig,
    ) -> Result<PinSettings, GpioError> {
        let direction: Direction = self
            .configure(backend, Attribute::Direction, &config.direction)?
            .parse()?;

        if direction == Direction::Out {
            return Ok(PinSettings {
                direction,
                edge: None,
                active_low: None,
            });
        }

        let edge: Edge = self
            .configure(backend, Attribute::Edge, &config.edge)?
            .parse()?;
        let active_low = match &config.active_low {
            Some(value) => Some(self.configure(backend, Attribute::ActiveLow, value)? == "1"),
            None => None,
        };

        Ok(PinSettings {
            direction,
            edge: Some(edge),
            active_low,
        })
    }

    /// Releases the kernel claim if, and only if, this instance made it.
    /// The ownership flag is cleared first, so repeated calls are no-ops.
    pub fn unexport_if_owned<B: SysfsBackend>(&mut self, backend: &B) -> Result<(), GpioError> {
        if !std::mem::take(&mut self.exported_by_us) {
            return Ok(());
        }

        backend.write(&self.control_root.join("unexport"), &self.pin.to_string())?;
        info!("Unexported gpio{}", self.pin);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockSysfs;

    fn mock() -> (tempfile::TempDir, MockSysfs) {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockSysfs::new(dir.path().join("gpio")).unwrap();
        (dir, backend)
    }

    #[test]
    fn export_only_when_directory_is_missing() {
        let (_dir, backend) = mock();
        let mut lifecycle = PinLifecycle::new(backend.root(), 4);

        assert!(lifecycle.ensure_exported(&backend).unwrap());
        assert!(backend.is_exported(4));
        assert_eq!(backend.writes_to("export"), vec!["4"]);

        let mut second = PinLifecycle::new(backend.root(), 4);
        assert!(!second.ensure_exported(&backend).unwrap());
        assert!(!second.exported_by_us());
        assert_eq!(backend.writes_to("export").len(), 1);
    }

    #[test]
    fn configure_normalizes_case() {
        let (_dir, backend) = mock();
        backend.pre_export(9).unwrap();
        let lifecycle = PinLifecycle::new(backend.root(), 9);

        let value = lifecycle
            .configure(&backend, Attribute::Edge, "FALLING")
            .unwrap();
        assert_eq!(value, "falling");
        assert_eq!(backend.writes_to("edge"), vec!["falling"]);
    }

    #[test]
    fn failed_attribute_write_rolls_back_export() {
        let (_dir, backend) = mock();
        backend.fail_writes_to("edge");
        let mut lifecycle = PinLifecycle::new(backend.root(), 5);
        lifecycle.ensure_exported(&backend).unwrap();

        let config = PinConfig::input(5).with_control_root(backend.root());
        let err = lifecycle.apply(&backend, &config).unwrap_err();
        assert!(matches!(err, GpioError::Io { .. }));
        assert_eq!(backend.writes_to("unexport"), vec!["5"]);
        assert!(!backend.is_exported(5));
    }

    #[test]
    fn unexport_is_idempotent() {
        let (_dir, backend) = mock();
        let mut lifecycle = PinLifecycle::new(backend.root(), 2);
        lifecycle.ensure_exported(&backend).unwrap();

        lifecycle.unexport_if_owned(&backend).unwrap();
        lifecycle.unexport_if_owned(&backend).unwrap();
        assert_eq!(backend.writes_to("unexport"), vec!["2"]);
    }
}
