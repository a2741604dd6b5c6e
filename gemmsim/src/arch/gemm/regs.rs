use serde::{Deserialize, Serialize};

use super::params::{DataType, MAX_DIM};
use crate::driver::DriverError;

// Register offsets
pub const REG_CTRL: u32 = 0x00;
pub const REG_STATUS: u32 = 0x04;
pub const REG_A_ADDR: u32 = 0x08;
pub const REG_B_ADDR: u32 = 0x0C;
pub const REG_C_ADDR: u32 = 0x10;
pub const REG_M_DIM: u32 = 0x14;
pub const REG_K_DIM: u32 = 0x18;
pub const REG_N_DIM: u32 = 0x1C;
pub const REG_DATA_TYPE: u32 = 0x20;
pub const REG_STRIDE_A: u32 = 0x24;
pub const REG_STRIDE_B: u32 = 0x28;
pub const REG_STRIDE_C: u32 = 0x2C;
pub const REG_CYCLES: u32 = 0x30;

// CTRL bits
pub const CTRL_START: u32 = 1 << 0;
pub const CTRL_RESET: u32 = 1 << 1;
pub const CTRL_IRQ_EN: u32 = 1 << 2;

// STATUS bits
pub const STATUS_BUSY: u32 = 1 << 0;
pub const STATUS_DONE: u32 = 1 << 1;
pub const STATUS_ERROR: u32 = 1 << 2;

/// One GEMM job: C[M x N] = A[M x K] * B[K x N], strides in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemmConfig {
  pub a_addr: u32,
  pub b_addr: u32,
  pub c_addr: u32,
  pub m: u16,
  pub k: u16,
  pub n: u16,
  pub data_type: DataType,
  pub stride_a: u16,
  pub stride_b: u16,
  pub stride_c: u16,
}

impl GemmConfig {
  /// Densely packed operands: every stride equals its row length.
  pub fn new(a_addr: u32, b_addr: u32, c_addr: u32, m: u16, k: u16, n: u16, data_type: DataType) -> Self {
    Self {
      a_addr,
      b_addr,
      c_addr,
      m,
      k,
      n,
      data_type,
      stride_a: k,
      stride_b: n,
      stride_c: n,
    }
  }

  pub fn with_strides(mut self, stride_a: u16, stride_b: u16, stride_c: u16) -> Self {
    self.stride_a = stride_a;
    self.stride_b = stride_b;
    self.stride_c = stride_c;
    self
  }

  pub fn validate(&self) -> Result<(), DriverError> {
    for (name, dim) in [("M", self.m), ("K", self.k), ("N", self.n)] {
      if dim == 0 || dim as usize > MAX_DIM {
        return Err(DriverError::InvalidConfiguration {
          reason: format!("{} = {} outside 1..={}", name, dim, MAX_DIM),
        });
      }
    }
    let strides = [
      ("stride_a", self.stride_a, self.k),
      ("stride_b", self.stride_b, self.n),
      ("stride_c", self.stride_c, self.n),
    ];
    for (name, stride, row) in strides {
      if stride < row {
        return Err(DriverError::InvalidConfiguration {
          reason: format!("{} = {} shorter than row length {}", name, stride, row),
        });
      }
    }
    Ok(())
  }

  /// Multiply and add count, 2*M*K*N.
  pub fn ops(&self) -> u64 {
    2 * self.m as u64 * self.k as u64 * self.n as u64
  }
}

/// Side effect of a CTRL write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CtrlAction {
  None,
  Start,
  Reset,
}

/// Host-visible configuration registers. STATUS and CYCLES are live and owned
/// by the sequencer, so they are not stored here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegFile {
  irq_enable: bool,
  a_addr: u32,
  b_addr: u32,
  c_addr: u32,
  m: u16,
  k: u16,
  n: u16,
  data_type: u8,
  stride_a: u16,
  stride_b: u16,
  stride_c: u16,
}

impl RegFile {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn irq_enable(&self) -> bool {
    self.irq_enable
  }

  /// Stored register value; unknown and live offsets read 0.
  pub fn read(&self, offset: u32) -> u32 {
    match offset {
      REG_CTRL => {
        if self.irq_enable {
          CTRL_IRQ_EN
        } else {
          0
        }
      },
      REG_A_ADDR => self.a_addr,
      REG_B_ADDR => self.b_addr,
      REG_C_ADDR => self.c_addr,
      REG_M_DIM => self.m as u32,
      REG_K_DIM => self.k as u32,
      REG_N_DIM => self.n as u32,
      REG_DATA_TYPE => self.data_type as u32,
      REG_STRIDE_A => self.stride_a as u32,
      REG_STRIDE_B => self.stride_b as u32,
      REG_STRIDE_C => self.stride_c as u32,
      _ => 0,
    }
  }

  /// Store `value` masked to the register width. Reset wins over start when
  /// both CTRL bits are written together.
  pub fn write(&mut self, offset: u32, value: u32) -> CtrlAction {
    match offset {
      REG_CTRL => {
        self.irq_enable = value & CTRL_IRQ_EN != 0;
        if value & CTRL_RESET != 0 {
          return CtrlAction::Reset;
        }
        if value & CTRL_START != 0 {
          return CtrlAction::Start;
        }
      },
      REG_A_ADDR => self.a_addr = value,
      REG_B_ADDR => self.b_addr = value,
      REG_C_ADDR => self.c_addr = value,
      REG_M_DIM => self.m = value as u16,
      REG_K_DIM => self.k = value as u16,
      REG_N_DIM => self.n = value as u16,
      REG_DATA_TYPE => self.data_type = value as u8,
      REG_STRIDE_A => self.stride_a = value as u16,
      REG_STRIDE_B => self.stride_b = value as u16,
      REG_STRIDE_C => self.stride_c = value as u16,
      _ => log::debug!("write to unmapped register {:#x} ignored", offset),
    }
    CtrlAction::None
  }

  /// Load every configuration register from `cfg`.
  pub fn program(&mut self, cfg: &GemmConfig) {
    self.a_addr = cfg.a_addr;
    self.b_addr = cfg.b_addr;
    self.c_addr = cfg.c_addr;
    self.m = cfg.m;
    self.k = cfg.k;
    self.n = cfg.n;
    self.data_type = cfg.data_type.code() as u8;
    self.stride_a = cfg.stride_a;
    self.stride_b = cfg.stride_b;
    self.stride_c = cfg.stride_c;
  }

  /// Decode the registers into a configuration the sequencer can run.
  pub fn config(&self) -> Result<GemmConfig, DriverError> {
    let data_type =
      DataType::from_code(self.data_type as u32).ok_or_else(|| DriverError::InvalidConfiguration {
        reason: format!("unknown data type code {}", self.data_type),
      })?;
    let cfg = GemmConfig {
      a_addr: self.a_addr,
      b_addr: self.b_addr,
      c_addr: self.c_addr,
      m: self.m,
      k: self.k,
      n: self.n,
      data_type,
      stride_a: self.stride_a,
      stride_b: self.stride_b,
      stride_c: self.stride_c,
    };
    cfg.validate()?;
    Ok(cfg)
  }

  /// Clears every register, irq-enable included.
  pub fn reset(&mut self) {
    *self = Self::default();
  }
}
