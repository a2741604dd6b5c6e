use thiserror::Error;

pub type Result<T> = std::result::Result<T, DriverError>;

/// Driver-level failures. None are retried; recovery is an explicit reset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
  #[error("invalid configuration: {reason}")]
  InvalidConfiguration { reason: String },

  #[error("device busy")]
  DeviceBusy,

  #[error("device reported an error")]
  DeviceError,

  #[error("timed out after {cycles} cycles")]
  Timeout { cycles: u64 },

  #[error("driver not initialized")]
  NotInitialized,
}
