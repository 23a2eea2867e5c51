use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use mio::event::Source;
use mio::unix::SourceFd;
use mio::unix::pipe;
use mio::{Events, Interest, Poll, Registry, Token};

use crate::config::Direction;
use crate::error::GpioError;
use crate::gpio::SysfsBackend;

const VALUE_TOKEN: Token = Token(0);
const READ_CHANNEL_EVENT_CAPACITY: usize = 4;

/// Levels accepted by an output pin's value file.
pub const LEVELS: [&str; 2] = ["1", "0"];

pub fn validate_level(value: &str) -> Result<&'static str, GpioError> {
    LEVELS
        .iter()
        .copied()
        .find(|level| *level == value)
        .ok_or_else(|| {
            GpioError::InvalidArgument(format!("Invalid value {value}, it must be 1 or 0"))
        })
}

/// What the value file's multiplexer reported since the last drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub priority: bool,
    pub error: bool,
}

impl Readiness {
    pub fn is_empty(&self) -> bool {
        !self.priority && !self.error
    }
}

/// Edge notifications for an input pin.
///
/// sysfs signals level changes with `POLLPRI`/`POLLERR` on the value file,
/// never with plain readability. The file is therefore watched by a private
/// epoll instance (an inner [`Poll`]) whose own descriptor turns readable on
/// each edge, and that descriptor is what the host loop watches.
pub struct ReadChannel {
    notifier: Poll,
    events: Events,
    value: File,
    value_path: PathBuf,
    watched: bool,
}

impl ReadChannel {
    pub fn open<B: SysfsBackend>(backend: &B, pin_dir: &Path) -> Result<Self, GpioError> {
        let value_path = pin_dir.join("value");
        let value = backend.open_read(&value_path)?;
        let notifier = Poll::new().map_err(|e| GpioError::io("create edge notifier", e))?;

        // Errors are always reported by epoll, only priority needs asking for.
        let fd = value.as_raw_fd();
        let registered = notifier
            .registry()
            .register(&mut SourceFd(&fd), VALUE_TOKEN, Interest::PRIORITY);
        let watched = match registered {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(
                    "{} does not support edge notification, it is read only on explicit callbacks",
                    value_path.display()
                );
                false
            }
            Err(e) => {
                return Err(GpioError::io(format!("watch {}", value_path.display()), e));
            }
        };

        Ok(Self {
            notifier,
            events: Events::with_capacity(READ_CHANNEL_EVENT_CAPACITY),
            value,
            value_path,
            watched,
        })
    }

    pub fn is_watched(&self) -> bool {
        self.watched
    }

    /// Drains pending notifications without blocking, re-arming the inner
    /// multiplexer for the next edge.
    pub fn poll(&mut self) -> Result<Readiness, GpioError> {
        match self.notifier.poll(&mut self.events, Some(Duration::ZERO)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Readiness::default()),
            Err(e) => return Err(GpioError::io("poll edge notifier", e)),
        }

        Ok(self
            .events
            .iter()
            .fold(Readiness::default(), |acc, event| Readiness {
                priority: acc.priority || event.is_priority(),
                error: acc.error || event.is_error(),
            }))
    }

    /// Reads the whole value file from the start with surrounding whitespace
    /// stripped. The file offset does not reset on its own, so without the
    /// seek every read after the first would come back empty.
    pub fn read_value(&mut self) -> Result<Vec<u8>, GpioError> {
        self.value
            .seek(SeekFrom::Start(0))
            .map_err(|e| GpioError::io(format!("seek {}", self.value_path.display()), e))?;

        let mut buf = Vec::with_capacity(8);
        self.value
            .read_to_end(&mut buf)
            .map_err(|e| GpioError::io(format!("read {}", self.value_path.display()), e))?;

        Ok(buf.trim_ascii().to_vec())
    }

    pub fn close(self) {
        debug!("closing {}", self.value_path.display());
    }
}

impl AsRawFd for ReadChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.notifier.as_raw_fd()
    }
}

impl Source for ReadChannel {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        SourceFd(&self.notifier.as_raw_fd()).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        SourceFd(&self.notifier.as_raw_fd()).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        SourceFd(&self.notifier.as_raw_fd()).deregister(registry)
    }
}

/// Write path for an output pin.
///
/// A sysfs value file held open for writing always reports an error condition
/// to epoll, so it cannot be registered for write readiness. Instead the write
/// end of an otherwise unused pipe stands in as a readiness beacon, and each
/// value is written to the pin with its own open-write-close cycle.
pub struct WriteChannel {
    beacon: pipe::Sender,
    // Never read; held so the beacon stays a valid pipe end.
    _sink: pipe::Receiver,
    value_path: PathBuf,
}

impl WriteChannel {
    pub fn open(pin_dir: &Path) -> Result<Self, GpioError> {
        let (beacon, sink) = pipe::new().map_err(|e| GpioError::io("create write beacon", e))?;
        Ok(Self {
            beacon,
            _sink: sink,
            value_path: pin_dir.join("value"),
        })
    }

    /// Writes `value` to the pin and returns the number of bytes accepted.
    pub fn write_value<B: SysfsBackend>(
        &self,
        backend: &B,
        value: &str,
    ) -> Result<usize, GpioError> {
        let level = validate_level(value)?;
        backend.write(&self.value_path, level)?;
        debug!("{} <- {level}", self.value_path.display());
        Ok(level.len())
    }

    pub fn close(self) {
        debug!("closing write beacon for {}", self.value_path.display());
    }
}

impl AsRawFd for WriteChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.beacon.as_raw_fd()
    }
}

impl Source for WriteChannel {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.beacon.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.beacon.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.beacon.deregister(registry)
    }
}

/// The one live I/O resource of a handle, matching its direction.
pub enum Channel {
    Read(ReadChannel),
    Write(WriteChannel),
}

impl Channel {
    pub fn open<B: SysfsBackend>(
        backend: &B,
        pin_dir: &Path,
        direction: Direction,
    ) -> Result<Self, GpioError> {
        match direction {
            Direction::In => ReadChannel::open(backend, pin_dir).map(Channel::Read),
            Direction::Out => WriteChannel::open(pin_dir).map(Channel::Write),
        }
    }

    /// Interest the host loop registers the channel with.
    pub fn interest(&self) -> Interest {
        match self {
            Channel::Read(_) => Interest::READABLE,
            Channel::Write(_) => Interest::WRITABLE,
        }
    }

    pub fn close(self) {
        match self {
            Channel::Read(c) => c.close(),
            Channel::Write(c) => c.close(),
        }
    }
}

impl AsRawFd for Channel {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Channel::Read(c) => c.as_raw_fd(),
            Channel::Write(c) => c.as_raw_fd(),
        }
    }
}

impl Source for Channel {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self {
            Channel::Read(c) => c.register(registry, token, interests),
            Channel::Write(c) => c.register(registry, token, interests),
        }
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self {
            Channel::Read(c) => c.reregister(registry, token, interests),
            Channel::Write(c) => c.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Channel::Read(c) => c.deregister(registry),
            Channel::Write(c) => c.deregister(registry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_single_digit_levels_are_valid() {
        assert_eq!(validate_level("1").unwrap(), "1");
        assert_eq!(validate_level("0").unwrap(), "0");
        for bad in ["maybe", "", "10", " 1", "true", "high"] {
            assert!(validate_level(bad).unwrap_err().is_invalid_argument(), "{bad:?}");
        }
    }

    #[test]
    fn read_channel_seeks_before_every_read() {
        let dir = tempfile::tempdir().unwrap();
        let value = dir.path().join("value");
        std::fs::write(&value, "1\n").unwrap();

        let mut channel = ReadChannel::open(&crate::backend::Sysfs, dir.path()).unwrap();
        // Plain files are refused by epoll.
        assert!(!channel.is_watched());
        assert_eq!(channel.read_value().unwrap(), b"1");

        std::fs::write(&value, "0\n").unwrap();
        assert_eq!(channel.read_value().unwrap(), b"0");
        assert!(channel.poll().unwrap().is_empty());
    }
}
