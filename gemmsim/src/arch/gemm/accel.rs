// GEMM accelerator top
// Owns every unit and steps them in a fixed order once per clock.

use serde::{Deserialize, Serialize};

use super::decoder::GemmInst;
use super::dram::ExtMem;
use super::mac::MacPipeline;
use super::params::{AccelParams, RegT, NUM_CHANNELS};
use super::regs::*;
use super::sequencer::{SeqState, Sequencer, StatusBits};
use super::spad::WorkingMemory;
use super::tdma::TransferEngine;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GemmAccel {
  regs: RegFile,
  seq: Sequencer,
  tdma: TransferEngine,
  mac: MacPipeline,
  wm: WorkingMemory,
  irq_level: bool,
  irq_pending: bool,
  cycle: u64,
}

impl Default for GemmAccel {
  fn default() -> Self {
    Self::new(AccelParams::default())
  }
}

impl GemmAccel {
  pub fn new(params: AccelParams) -> Self {
    Self {
      regs: RegFile::new(),
      seq: Sequencer::new(params.pingpong),
      tdma: TransferEngine::new(NUM_CHANNELS, params.max_burst),
      mac: MacPipeline::default(),
      wm: WorkingMemory::default(),
      irq_level: false,
      irq_pending: false,
      cycle: 0,
    }
  }

  /// One clock: transfer engine, then sequencer (which drives the MAC), then
  /// the working-memory commit, then the interrupt line.
  pub fn tick(&mut self, mem: &mut dyn ExtMem) {
    let events = self.tdma.tick(mem, &mut self.wm);
    self.seq.tick(events, &mut self.tdma, &mut self.mac, &mut self.wm);
    self.wm.tick();
    self.update_irq();
    self.cycle += 1;
  }

  fn update_irq(&mut self) {
    let level = self.seq.status().done && self.regs.irq_enable();
    if level && !self.irq_level {
      log::debug!("accel: irq raised at cycle {}", self.cycle);
      self.irq_pending = true;
    }
    self.irq_level = level;
  }

  /// Collect a latched interrupt edge.
  pub fn take_irq(&mut self) -> bool {
    std::mem::take(&mut self.irq_pending)
  }

  pub fn mmio_read(&self, offset: u32) -> u32 {
    match offset {
      REG_STATUS => self.seq.status().bits(),
      REG_CYCLES => self.seq.cycles() as u32,
      _ => self.regs.read(offset),
    }
  }

  pub fn mmio_write(&mut self, offset: u32, value: u32) {
    match self.regs.write(offset, value) {
      CtrlAction::Start => {
        self.seq.start(&self.regs, &mut self.wm);
      },
      CtrlAction::Reset => self.reset(),
      CtrlAction::None => {},
    }
    self.update_irq();
  }

  /// Run the custom instruction: fetch both config blocks, program the
  /// registers and assert start. Returns the value written to rd.
  pub fn execute(&mut self, inst: &GemmInst, xs1: RegT, xs2: RegT, mem: &mut dyn ExtMem) -> RegT {
    let Some((b1, b2)) = fetch_config_blocks(mem, xs1, xs2) else {
      log::error!("accel: config block fetch failed for {:?} xs1={:#x} xs2={:#x}", inst, xs1, xs2);
      return 0;
    };

    let writes = [
      (REG_A_ADDR, b1[0]),
      (REG_B_ADDR, b1[1]),
      (REG_M_DIM, b1[2] & 0xffff),
      (REG_K_DIM, b1[2] >> 16),
      (REG_N_DIM, b1[3] & 0xffff),
      (REG_DATA_TYPE, b1[3] >> 16),
      (REG_C_ADDR, b2[0]),
      (REG_STRIDE_A, b2[1] & 0xffff),
      (REG_STRIDE_B, b2[1] >> 16),
      (REG_STRIDE_C, b2[2]),
    ];
    for (offset, value) in writes {
      self.regs.write(offset, value);
    }

    let ctrl = self.regs.read(REG_CTRL) | CTRL_START;
    self.mmio_write(REG_CTRL, ctrl);
    log::debug!("accel: {:?} started, rd <- {:#x}", inst, b2[0]);
    b2[0] as RegT
  }

  /// Every unit back to idle within the call. Working-memory contents stay.
  pub fn reset(&mut self) {
    self.regs.reset();
    self.seq.reset();
    self.tdma.reset();
    self.mac.reset();
    self.wm.reset();
    self.irq_level = false;
    self.irq_pending = false;
    log::debug!("accel: reset at cycle {}", self.cycle);
  }

  pub fn status(&self) -> StatusBits {
    self.seq.status()
  }

  pub fn is_busy(&self) -> bool {
    self.seq.status().busy
  }

  pub fn state(&self) -> SeqState {
    self.seq.state()
  }

  /// Free-running clock since construction.
  pub fn cycle(&self) -> u64 {
    self.cycle
  }

  pub fn working_memory(&self) -> &WorkingMemory {
    &self.wm
  }

  pub fn mac_count(&self) -> u64 {
    self.mac.mac_count()
  }

  pub fn words_moved(&self) -> u64 {
    self.tdma.words_moved()
  }
}

fn fetch_config_blocks(mem: &mut dyn ExtMem, xs1: RegT, xs2: RegT) -> Option<([u32; 4], [u32; 3])> {
  let mut word = |addr: RegT| mem.read(addr, 4);
  let b1 = [word(xs1)?, word(xs1 + 4)?, word(xs1 + 8)?, word(xs1 + 12)?];
  let b2 = [word(xs2)?, word(xs2 + 4)?, word(xs2 + 8)?];
  Some((b1, b2))
}

/// Lay out the two instruction config blocks for `cfg`.
pub fn pack_config_blocks(cfg: &GemmConfig) -> ([u32; 4], [u32; 3]) {
  (
    [
      cfg.a_addr,
      cfg.b_addr,
      cfg.m as u32 | (cfg.k as u32) << 16,
      cfg.n as u32 | cfg.data_type.code() << 16,
    ],
    [cfg.c_addr, cfg.stride_a as u32 | (cfg.stride_b as u32) << 16, cfg.stride_c as u32],
  )
}
