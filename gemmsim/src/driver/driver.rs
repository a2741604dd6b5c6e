// GEMM accelerator driver
// init/start/wait/status/reset over a memory-mapped register window.

use crate::arch::gemm::regs::*;
use crate::arch::gemm::{Dram, GemmAccel};

use super::error::{DriverError, Result};

/// Register window of one accelerator instance.
pub trait Mmio {
  fn read32(&self, offset: u32) -> u32;
  fn write32(&mut self, offset: u32, value: u32);
  /// Let the device run until STATUS changes or `max_cycles` pass. Returns the
  /// number of cycles that elapsed.
  fn wait_status_change(&mut self, max_cycles: u64) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
  Busy,
  Done,
  Error,
  Idle,
}

/// In-process bus: the accelerator and its external memory share one clock
/// that only advances inside `wait_status_change`.
pub struct SimBus {
  accel: GemmAccel,
  dram: Dram,
  on_irq: Option<Box<dyn FnMut(u64)>>,
  irq_count: u64,
}

impl SimBus {
  pub fn new(accel: GemmAccel, dram: Dram) -> Self {
    Self {
      accel,
      dram,
      on_irq: None,
      irq_count: 0,
    }
  }

  /// Called with the cycle number on every interrupt edge.
  pub fn with_irq_handler(mut self, handler: impl FnMut(u64) + 'static) -> Self {
    self.on_irq = Some(Box::new(handler));
    self
  }

  pub fn accel(&self) -> &GemmAccel {
    &self.accel
  }

  pub fn dram(&self) -> &Dram {
    &self.dram
  }

  pub fn dram_mut(&mut self) -> &mut Dram {
    &mut self.dram
  }

  pub fn irq_count(&self) -> u64 {
    self.irq_count
  }

  pub fn cycle(&self) -> u64 {
    self.accel.cycle()
  }

  fn dispatch_irq(&mut self) {
    if self.accel.take_irq() {
      self.irq_count += 1;
      let cycle = self.accel.cycle();
      if let Some(handler) = self.on_irq.as_mut() {
        handler(cycle);
      }
    }
  }
}

impl Mmio for SimBus {
  fn read32(&self, offset: u32) -> u32 {
    self.accel.mmio_read(offset)
  }

  fn write32(&mut self, offset: u32, value: u32) {
    self.accel.mmio_write(offset, value);
    self.dispatch_irq();
  }

  fn wait_status_change(&mut self, max_cycles: u64) -> u64 {
    let before = self.accel.mmio_read(REG_STATUS);
    let mut elapsed = 0;
    while elapsed < max_cycles {
      self.accel.tick(&mut self.dram);
      self.dispatch_irq();
      elapsed += 1;
      if self.accel.mmio_read(REG_STATUS) != before {
        break;
      }
    }
    elapsed
  }
}

pub struct GemmDriver<B: Mmio> {
  bus: B,
  initialized: bool,
  watchdog_cycles: u64,
}

impl<B: Mmio> GemmDriver<B> {
  pub fn new(bus: B, watchdog_cycles: u64) -> Self {
    Self {
      bus,
      initialized: false,
      watchdog_cycles,
    }
  }

  pub fn bus(&self) -> &B {
    &self.bus
  }

  pub fn bus_mut(&mut self) -> &mut B {
    &mut self.bus
  }

  pub fn is_initialized(&self) -> bool {
    self.initialized
  }

  /// Reset once and wait for idle. Later calls are no-ops.
  pub fn init(&mut self) -> Result<()> {
    if self.initialized {
      return Ok(());
    }
    self.reset()?;
    self.initialized = true;
    log::info!("gemm accelerator initialized");
    Ok(())
  }

  pub fn start(&mut self, cfg: &GemmConfig) -> Result<()> {
    if !self.initialized {
      return Err(DriverError::NotInitialized);
    }
    if self.is_busy() {
      return Err(DriverError::DeviceBusy);
    }
    cfg.validate()?;

    self.bus.write32(REG_A_ADDR, cfg.a_addr);
    self.bus.write32(REG_B_ADDR, cfg.b_addr);
    self.bus.write32(REG_C_ADDR, cfg.c_addr);
    self.bus.write32(REG_M_DIM, cfg.m as u32);
    self.bus.write32(REG_K_DIM, cfg.k as u32);
    self.bus.write32(REG_N_DIM, cfg.n as u32);
    self.bus.write32(REG_DATA_TYPE, cfg.data_type.code());
    self.bus.write32(REG_STRIDE_A, cfg.stride_a as u32);
    self.bus.write32(REG_STRIDE_B, cfg.stride_b as u32);
    self.bus.write32(REG_STRIDE_C, cfg.stride_c as u32);

    let ctrl = (self.bus.read32(REG_CTRL) & CTRL_IRQ_EN) | CTRL_START;
    self.bus.write32(REG_CTRL, ctrl);

    log::info!("gemm started: {}x{}x{}, type={}", cfg.m, cfg.k, cfg.n, cfg.data_type);
    Ok(())
  }

  // Condition-wait on STATUS until not busy, bounded by the watchdog.
  fn wait_idle(&mut self) -> Result<u64> {
    let mut spent = 0;
    while self.is_busy() {
      if spent >= self.watchdog_cycles {
        log::error!("gemm watchdog expired after {} cycles", spent);
        return Err(DriverError::Timeout { cycles: spent });
      }
      spent += self.bus.wait_status_change(self.watchdog_cycles - spent);
    }
    Ok(spent)
  }

  /// Block until the running operation finishes. Returns its cycle count.
  pub fn wait(&mut self) -> Result<u64> {
    if !self.initialized {
      return Err(DriverError::NotInitialized);
    }
    self.wait_idle()?;
    if self.has_error() {
      log::error!("gemm operation failed");
      return Err(DriverError::DeviceError);
    }

    let cycles = self.cycle_count();
    log::info!("gemm operation completed in {} cycles", cycles);
    Ok(cycles)
  }

  pub fn status(&self) -> DeviceStatus {
    let status = self.bus.read32(REG_STATUS);
    if status & STATUS_ERROR != 0 {
      DeviceStatus::Error
    } else if status & STATUS_DONE != 0 {
      DeviceStatus::Done
    } else if status & STATUS_BUSY != 0 {
      DeviceStatus::Busy
    } else {
      DeviceStatus::Idle
    }
  }

  /// Assert reset and wait until the device is no longer busy.
  pub fn reset(&mut self) -> Result<()> {
    self.bus.write32(REG_CTRL, CTRL_RESET);
    self.wait_idle()?;
    log::debug!("gemm accelerator reset");
    Ok(())
  }

  pub fn is_busy(&self) -> bool {
    self.bus.read32(REG_STATUS) & STATUS_BUSY != 0
  }

  pub fn is_done(&self) -> bool {
    self.bus.read32(REG_STATUS) & STATUS_DONE != 0
  }

  pub fn has_error(&self) -> bool {
    self.bus.read32(REG_STATUS) & STATUS_ERROR != 0
  }

  pub fn set_interrupt_enable(&mut self, enable: bool) {
    let ctrl = self.bus.read32(REG_CTRL);
    let ctrl = if enable {
      ctrl | CTRL_IRQ_EN
    } else {
      ctrl & !CTRL_IRQ_EN
    };
    // Only the enable bit is ever written here, never start or reset
    self.bus.write32(REG_CTRL, ctrl & CTRL_IRQ_EN);
  }

  pub fn cycle_count(&self) -> u64 {
    self.bus.read32(REG_CYCLES) as u64
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  // Register file that never leaves busy once started.
  #[derive(Default)]
  struct StuckDevice {
    regs: HashMap<u32, u32>,
    busy: bool,
    waited: u64,
  }

  impl Mmio for StuckDevice {
    fn read32(&self, offset: u32) -> u32 {
      match offset {
        REG_STATUS => {
          if self.busy {
            STATUS_BUSY
          } else {
            0
          }
        },
        _ => self.regs.get(&offset).copied().unwrap_or(0),
      }
    }

    fn write32(&mut self, offset: u32, value: u32) {
      if offset == REG_CTRL && value & CTRL_START != 0 {
        self.busy = true;
      }
      self.regs.insert(offset, value);
    }

    fn wait_status_change(&mut self, max_cycles: u64) -> u64 {
      let step = max_cycles.min(7);
      self.waited += step;
      step
    }
  }

  fn cfg() -> GemmConfig {
    GemmConfig::new(0, 0x100, 0x200, 8, 8, 8, crate::arch::gemm::DataType::Int8)
  }

  #[test]
  fn test_start_requires_init() {
    let mut drv = GemmDriver::new(StuckDevice::default(), 100);
    assert_eq!(drv.start(&cfg()), Err(DriverError::NotInitialized));
    assert_eq!(drv.wait(), Err(DriverError::NotInitialized));
  }

  #[test]
  fn test_watchdog_bounds_wait() {
    let mut drv = GemmDriver::new(StuckDevice::default(), 100);
    drv.init().expect("idle device initializes");
    drv.start(&cfg()).expect("start accepted");
    assert_eq!(drv.status(), DeviceStatus::Busy);
    assert_eq!(drv.wait(), Err(DriverError::Timeout { cycles: 100 }));
    assert_eq!(drv.bus().waited, 100);
  }

  #[test]
  fn test_busy_rejects_start() {
    let mut drv = GemmDriver::new(StuckDevice::default(), 100);
    drv.init().expect("idle device initializes");
    drv.start(&cfg()).expect("start accepted");
    let other = GemmConfig::new(0x40, 0x100, 0x200, 2, 2, 2, crate::arch::gemm::DataType::Int8);
    assert_eq!(drv.start(&other), Err(DriverError::DeviceBusy));
    assert_eq!(drv.bus().read32(REG_A_ADDR), 0);
    assert_eq!(drv.bus().read32(REG_M_DIM), 8);
  }

  #[test]
  fn test_start_preserves_irq_enable() {
    let mut drv = GemmDriver::new(StuckDevice::default(), 100);
    drv.init().expect("idle device initializes");
    drv.set_interrupt_enable(true);
    assert_eq!(drv.bus().read32(REG_CTRL), CTRL_IRQ_EN);
    drv.start(&cfg()).expect("start accepted");
    assert_eq!(drv.bus().read32(REG_CTRL), CTRL_IRQ_EN | CTRL_START);
  }
}
