pub mod arch;
pub mod driver;
pub mod simulator;

pub use arch::gemm::{AccelParams, DataType, GemmAccel, GemmConfig};
pub use driver::{DeviceStatus, DriverError, GemmDriver, SimBus};
pub use simulator::utils::log;
