pub mod driver;
pub mod error;

pub use driver::{DeviceStatus, GemmDriver, Mmio, SimBus};
pub use error::{DriverError, Result};
