pub mod config;
pub mod sim;
pub mod simulator;
pub mod utils;
pub mod verify;

pub use simulator::Simulator;
pub use utils::log;
