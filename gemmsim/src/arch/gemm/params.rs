use serde::{Deserialize, Serialize};

// Accelerator parameters
pub const TILE: usize = 8;
pub const PIPE_DEPTH: usize = 3;
pub const MAX_DIM: usize = 128;
pub const MAX_BURST: usize = 16;
pub const NUM_CHANNELS: usize = 2;

// Working-memory layout, in words per region
pub const WM_WINDOW: usize = MAX_DIM * MAX_DIM;
pub const WM_A_BASE: usize = 0;
pub const WM_B_BASE: usize = WM_WINDOW;
pub const WM_C_BASE: usize = 2 * WM_WINDOW;
pub const WM_REGION_WORDS: usize = 3 * WM_WINDOW;

// Transfer channels used by the sequencer
pub const LOAD_CHANNEL: usize = 0;
pub const STORE_CHANNEL: usize = 1;

// Type aliases
pub type WordT = i32;
pub type AccT = i32;
pub type RegT = u64;

pub const ACC_BYTES: usize = std::mem::size_of::<AccT>();

/// Element width of the A and B operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
  #[default]
  Int8,
  Int16,
}

impl DataType {
  pub fn from_code(code: u32) -> Option<Self> {
    match code {
      0 => Some(DataType::Int8),
      1 => Some(DataType::Int16),
      _ => None,
    }
  }

  pub fn code(self) -> u32 {
    match self {
      DataType::Int8 => 0,
      DataType::Int16 => 1,
    }
  }

  pub fn bytes(self) -> usize {
    match self {
      DataType::Int8 => 1,
      DataType::Int16 => 2,
    }
  }

  pub fn bits(self) -> u32 {
    (self.bytes() * 8) as u32
  }

  pub fn min_value(self) -> i32 {
    match self {
      DataType::Int8 => i8::MIN as i32,
      DataType::Int16 => i16::MIN as i32,
    }
  }

  pub fn max_value(self) -> i32 {
    match self {
      DataType::Int8 => i8::MAX as i32,
      DataType::Int16 => i16::MAX as i32,
    }
  }

  /// Sign-extend the low `bits()` of `raw`.
  pub fn sign_extend(self, raw: u32) -> i32 {
    sign_extend(raw, self.bits())
  }
}

impl std::fmt::Display for DataType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      DataType::Int8 => write!(f, "int8"),
      DataType::Int16 => write!(f, "int16"),
    }
  }
}

pub fn sign_extend(raw: u32, bits: u32) -> i32 {
  if bits >= 32 {
    return raw as i32;
  }
  let shift = 32 - bits;
  ((raw << shift) as i32) >> shift
}

/// Tunable accelerator knobs; everything else is fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccelParams {
  pub max_burst: usize,
  pub pingpong: bool,
}

impl Default for AccelParams {
  fn default() -> Self {
    Self {
      max_burst: MAX_BURST,
      pingpong: false,
    }
  }
}
