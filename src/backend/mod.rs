pub mod mock;
pub mod sysfs;

pub use mock::{MockSysfs, WriteRecord};
pub use sysfs::Sysfs;
