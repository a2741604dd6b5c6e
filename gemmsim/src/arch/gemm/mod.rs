pub mod accel;
pub mod arbiter;
pub mod decoder;
pub mod dram;
pub mod mac;
pub mod main;
pub mod model;
pub mod params;
pub mod regs;
pub mod sequencer;
pub mod spad;
pub mod tdma;

pub use accel::{pack_config_blocks, GemmAccel};
pub use dram::{Dram, ExtMem};
pub use main::{create_simulation, DramParams};
pub use params::{AccelParams, DataType};
pub use regs::GemmConfig;
pub use sequencer::StatusBits;
