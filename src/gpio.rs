use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use log::{debug, info, warn};
use mio::event::Source;
use mio::{Interest, Registry, Token};

use crate::backend::Sysfs;
use crate::channel::{Channel, validate_level};
use crate::config::{Direction, PinConfig, PinSettings};
use crate::error::GpioError;
use crate::lifecycle::PinLifecycle;

/// Access to the GPIO control files.
pub trait SysfsBackend {
    fn exists(&self, path: &Path) -> bool;
    /// Opens `path`, writes `contents` and closes it again.
    fn write(&self, path: &Path, contents: &str) -> Result<(), GpioError>;
    fn open_read(&self, path: &Path) -> Result<File, GpioError>;
}

impl<B: SysfsBackend + ?Sized> SysfsBackend for &B {
    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), GpioError> {
        (**self).write(path, contents)
    }

    fn open_read(&self, path: &Path) -> Result<File, GpioError> {
        (**self).open_read(path)
    }
}

/// Receives what happens on a pin. Every method defaults to doing nothing.
pub trait Consumer {
    fn on_connected(&mut self) {}

    /// Current contents of an input pin's value file, whitespace stripped.
    /// May be empty after a spurious wakeup.
    fn on_data_received(&mut self, _data: &[u8]) {}

    fn on_disconnected(&mut self, _reason: &DisconnectReason) {}
}

#[derive(Debug)]
pub enum DisconnectReason {
    /// Orderly shutdown requested by the owner of the handle.
    Done,
    /// The pin failed underneath the handle.
    Failed(GpioError),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Done => f.write_str("connection done"),
            DisconnectReason::Failed(e) => write!(f, "connection lost: {e}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Uninitialized,
    Exporting,
    Configuring,
    Active,
    Closed,
}

impl HandleState {
    pub fn can_advance_to(self, next: HandleState) -> bool {
        use HandleState::*;
        matches!(
            (self, next),
            (Uninitialized, Exporting)
                | (Exporting, Configuring)
                | (Configuring, Active)
                | (Configuring, Closed)
                | (Active, Closed)
        )
    }
}

fn advance(state: &mut HandleState, next: HandleState, pin: u32) {
    debug_assert!(
        state.can_advance_to(next),
        "illegal transition {state:?} -> {next:?}"
    );
    debug!("gpio{pin}: {state:?} -> {next:?}");
    *state = next;
}

/// A single sysfs GPIO pin driven by a `mio` event loop.
///
/// Construction claims and configures the pin and registers it with the
/// loop under `token`. From then on the loop calls [`on_readable`] (input)
/// or [`on_writable`] (output) whenever the token fires. Dropping an active
/// handle disconnects it.
///
/// [`on_readable`]: GpioHandle::on_readable
/// [`on_writable`]: GpioHandle::on_writable
pub struct GpioHandle<C: Consumer, B: SysfsBackend = Sysfs> {
    lifecycle: PinLifecycle,
    settings: PinSettings,
    channel: Option<Channel>,
    pending: VecDeque<&'static str>,
    registry: Registry,
    token: Token,
    state: HandleState,
    consumer: C,
    backend: B,
}

impl<C: Consumer> GpioHandle<C, Sysfs> {
    pub fn new(
        config: &PinConfig,
        consumer: C,
        registry: &Registry,
        token: Token,
    ) -> Result<Self, GpioError> {
        Self::with_backend(Sysfs, config, consumer, registry, token)
    }
}

impl<C: Consumer, B: SysfsBackend> GpioHandle<C, B> {
    pub fn with_backend(
        backend: B,
        config: &PinConfig,
        mut consumer: C,
        registry: &Registry,
        token: Token,
    ) -> Result<Self, GpioError> {
        if !backend.exists(&config.control_root) {
            return Err(GpioError::UnsupportedSystem(format!(
                "{} not found, ensure that gpio sysfs is enabled in the kernel",
                config.control_root.display()
            )));
        }
        let registry = registry
            .try_clone()
            .map_err(|e| GpioError::io("clone event loop registry", e))?;

        let mut state = HandleState::Uninitialized;
        let mut lifecycle = PinLifecycle::new(&config.control_root, config.pin);

        advance(&mut state, HandleState::Exporting, config.pin);
        lifecycle.ensure_exported(&backend)?;

        advance(&mut state, HandleState::Configuring, config.pin);
        // apply() has already unexported on failure
        let settings = match lifecycle.apply(&backend, config) {
            Ok(settings) => settings,
            Err(e) => {
                advance(&mut state, HandleState::Closed, config.pin);
                return Err(e);
            }
        };

        let opened = open_channel(
            &backend,
            lifecycle.pin_dir(),
            settings.direction,
            &registry,
            token,
        );
        let channel = match opened {
            Ok(channel) => channel,
            Err(e) => {
                advance(&mut state, HandleState::Closed, config.pin);
                if let Err(rollback) = lifecycle.unexport_if_owned(&backend) {
                    warn!("gpio{}: rollback unexport failed: {rollback}", config.pin);
                }
                return Err(e);
            }
        };

        advance(&mut state, HandleState::Active, config.pin);
        info!(
            "gpio{} connected as {} (exported by us: {})",
            config.pin,
            settings.direction,
            lifecycle.exported_by_us()
        );
        consumer.on_connected();

        Ok(Self {
            lifecycle,
            settings,
            channel: Some(channel),
            pending: VecDeque::new(),
            registry,
            token,
            state,
            consumer,
            backend,
        })
    }

    pub fn pin(&self) -> u32 {
        self.lifecycle.pin()
    }

    pub fn direction(&self) -> Direction {
        self.settings.direction
    }

    pub fn settings(&self) -> &PinSettings {
        &self.settings
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == HandleState::Active
    }

    pub fn exported_by_us(&self) -> bool {
        self.lifecycle.exported_by_us()
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Descriptor the host loop polls: the edge notifier for inputs, the
    /// write beacon for outputs. `None` once closed.
    pub fn fileno(&self) -> Option<RawFd> {
        self.channel.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn consumer_mut(&mut self) -> &mut C {
        &mut self.consumer
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Queues a level for an output pin and asks the loop for a write
    /// callback. Only `"1"` and `"0"` are accepted; anything else is rejected
    /// here and never reaches the pin.
    pub fn write(&mut self, value: &str) -> Result<(), GpioError> {
        if !self.is_active() {
            return Err(GpioError::InvalidState(format!("gpio{} is closed", self.pin())));
        }
        if !matches!(self.channel, Some(Channel::Write(_))) {
            let pin = self.pin();
            return Err(GpioError::InvalidState(format!("gpio{pin} is not an output pin")));
        }
        let level = validate_level(value)?;

        self.pending.push_back(level);
        // mio is edge triggered and the beacon never stops being writable,
        // re-arming it is what produces the next write event.
        let rearmed = match self.channel.as_mut() {
            Some(channel) => channel.reregister(&self.registry, self.token, Interest::WRITABLE),
            None => Ok(()),
        };
        if let Err(e) = rearmed {
            let pin = self.pin();
            let reason = DisconnectReason::Failed(GpioError::io(format!("re-arm gpio{pin}"), e));
            self.disconnect(reason);
        }
        Ok(())
    }

    /// Read readiness callback. Reads the current level and hands it to the
    /// consumer; an I/O failure disconnects the handle.
    pub fn on_readable(&mut self) {
        let pin = self.pin();
        let Some(Channel::Read(channel)) = self.channel.as_mut() else {
            return;
        };

        let result = channel.poll().and_then(|readiness| {
            if readiness.is_empty() {
                debug!("gpio{pin}: readable without pending edge");
            }
            channel.read_value()
        });

        match result {
            Ok(data) => self.consumer.on_data_received(&data),
            Err(e) => self.disconnect(DisconnectReason::Failed(e)),
        }
    }

    /// Write readiness callback. Applies every queued level in order, each
    /// with its own open-write-close on the value file.
    pub fn on_writable(&mut self) {
        let Some(Channel::Write(channel)) = self.channel.as_ref() else {
            return;
        };

        let failure = loop {
            let Some(level) = self.pending.pop_front() else {
                break None;
            };
            match channel.write_value(&self.backend, level) {
                Ok(_) => {}
                Err(e) if e.is_invalid_argument() => {
                    warn!("gpio{}: dropping write: {e}", self.lifecycle.pin());
                }
                Err(e) => break Some(e),
            }
        };

        if let Some(e) = failure {
            self.disconnect(DisconnectReason::Failed(e));
        }
    }

    /// Tears the handle down: leaves the event loop, closes the channel,
    /// releases the pin if this handle exported it and finally tells the
    /// consumer. Calling it again is a no-op.
    pub fn disconnect(&mut self, reason: DisconnectReason) {
        if self.state == HandleState::Closed {
            return;
        }
        let pin = self.pin();
        advance(&mut self.state, HandleState::Closed, pin);

        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.deregister(&self.registry) {
                warn!("gpio{pin}: deregister failed: {e}");
            }
            channel.close();
        }
        if !self.pending.is_empty() {
            warn!("gpio{pin}: discarding {} queued writes", self.pending.len());
            self.pending.clear();
        }
        if let Err(e) = self.lifecycle.unexport_if_owned(&self.backend) {
            warn!("gpio{pin}: unexport failed: {e}");
        }

        info!("gpio{pin} disconnected: {reason}");
        self.consumer.on_disconnected(&reason);
    }
}

fn open_channel<B: SysfsBackend>(
    backend: &B,
    pin_dir: &Path,
    direction: Direction,
    registry: &Registry,
    token: Token,
) -> Result<Channel, GpioError> {
    let mut channel = Channel::open(backend, pin_dir, direction)?;
    let interest = channel.interest();
    channel
        .register(registry, token, interest)
        .map_err(|e| GpioError::io(format!("register {}", pin_dir.display()), e))?;
    Ok(channel)
}

impl<C: Consumer, B: SysfsBackend> Drop for GpioHandle<C, B> {
    fn drop(&mut self) {
        if self.is_active() {
            self.disconnect(DisconnectReason::Done);
        }
    }
}
