pub mod backend;
pub mod channel;
pub mod config;
pub mod console;
mod error;
pub mod gpio;
pub mod lifecycle;

pub use backend::{MockSysfs, Sysfs, WriteRecord};
pub use channel::{Channel, ReadChannel, Readiness, WriteChannel};
pub use config::{Attribute, DEFAULT_CONTROL_ROOT, Direction, Edge, PinConfig, PinSettings};
pub use console::Console;
pub use error::GpioError;
pub use gpio::{Consumer, DisconnectReason, GpioHandle, HandleState, SysfsBackend};
pub use lifecycle::PinLifecycle;
