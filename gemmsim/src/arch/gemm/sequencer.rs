// Top-level sequencer
// Runs load A -> load B -> compute -> store C for one latched configuration.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::mac::{MacInput, MacPipeline};
use super::params::{WordT, ACC_BYTES, LOAD_CHANNEL, STORE_CHANNEL, TILE, WM_A_BASE, WM_B_BASE, WM_C_BASE, WM_WINDOW};
use super::regs::{GemmConfig, RegFile, STATUS_BUSY, STATUS_DONE, STATUS_ERROR};
use super::spad::{Port, WorkingMemory};
use super::tdma::{Direction, TdmaEvents, TransferDesc, TransferEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeqState {
  Idle,
  LoadA,
  LoadB,
  Compute,
  StoreC,
  Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusBits {
  pub busy: bool,
  pub done: bool,
  pub error: bool,
}

impl StatusBits {
  pub fn bits(&self) -> u32 {
    let mut bits = 0;
    if self.busy {
      bits |= STATUS_BUSY;
    }
    if self.done {
      bits |= STATUS_DONE;
    }
    if self.error {
      bits |= STATUS_ERROR;
    }
    bits
  }

  pub fn from_bits(bits: u32) -> Self {
    Self {
      busy: bits & STATUS_BUSY != 0,
      done: bits & STATUS_DONE != 0,
      error: bits & STATUS_ERROR != 0,
    }
  }
}

// Which tile a K slice read belongs to, so the MAC input can be zero-padded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct SliceTag {
  row0: usize,
  col0: usize,
  clear: bool,
  last: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ComputeCtx {
  next_tile: Option<(usize, usize)>,
  k: usize,
  pending: Option<SliceTag>,
  in_flight: VecDeque<(usize, usize)>,
  tiles_left: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequencer {
  state: SeqState,
  cfg: Option<GemmConfig>,
  issued: bool,
  done: bool,
  error: bool,
  pingpong: bool,
  cycles: u64,
  compute: ComputeCtx,
}

impl Default for Sequencer {
  fn default() -> Self {
    Self::new(false)
  }
}

impl Sequencer {
  pub fn new(pingpong: bool) -> Self {
    Self {
      state: SeqState::Idle,
      cfg: None,
      issued: false,
      done: false,
      error: false,
      pingpong,
      cycles: 0,
      compute: ComputeCtx::default(),
    }
  }

  pub fn state(&self) -> SeqState {
    self.state
  }

  pub fn config(&self) -> Option<&GemmConfig> {
    self.cfg.as_ref()
  }

  pub fn status(&self) -> StatusBits {
    StatusBits {
      busy: !matches!(self.state, SeqState::Idle | SeqState::Done),
      done: self.done,
      error: self.error,
    }
  }

  /// Ticks spent by the current or last operation.
  pub fn cycles(&self) -> u64 {
    self.cycles
  }

  /// Latch the registers and begin. Ignored while busy. Returns whether the
  /// operation was accepted.
  pub fn start(&mut self, regs: &RegFile, wm: &mut WorkingMemory) -> bool {
    if self.status().busy {
      log::warn!("sequencer: start ignored while {:?}", self.state);
      return false;
    }

    self.done = false;
    self.error = false;
    self.cycles = 0;

    let cfg = match regs.config() {
      Ok(cfg) => cfg,
      Err(e) => {
        log::error!("sequencer: rejected configuration: {}", e);
        self.error = true;
        self.state = SeqState::Idle;
        return false;
      },
    };

    if self.pingpong {
      wm.select(wm.selected() ^ 1);
    }

    log::info!(
      "sequencer: start {}x{}x{} {} (buffer {})",
      cfg.m,
      cfg.k,
      cfg.n,
      cfg.data_type,
      wm.selected()
    );
    self.cfg = Some(cfg);
    self.enter(SeqState::LoadA);
    true
  }

  fn enter(&mut self, state: SeqState) {
    log::debug!("sequencer: {:?} -> {:?}", self.state, state);
    self.state = state;
    self.issued = false;
  }

  fn fail(&mut self, what: &str) {
    log::error!("sequencer: {} failed, aborting", what);
    self.error = true;
    self.enter(SeqState::Idle);
  }

  /// One clock edge. `events` are the transfer engine outputs of this cycle.
  pub fn tick(
    &mut self,
    events: TdmaEvents,
    tdma: &mut TransferEngine,
    mac: &mut MacPipeline,
    wm: &mut WorkingMemory,
  ) {
    let Some(cfg) = self.cfg else {
      return;
    };
    if self.status().busy {
      self.cycles += 1;
    }

    match self.state {
      SeqState::Idle => {},
      SeqState::LoadA | SeqState::LoadB | SeqState::StoreC => {
        let channel = if self.state == SeqState::StoreC {
          STORE_CHANNEL
        } else {
          LOAD_CHANNEL
        };
        if !self.issued {
          let desc = self.descriptor(&cfg);
          if !tdma.start(channel, desc) {
            self.fail("descriptor issue");
            return;
          }
          self.issued = true;
        } else if events.error(channel) {
          self.fail("transfer");
        } else if events.done(channel) {
          match self.state {
            SeqState::LoadA => self.enter(SeqState::LoadB),
            SeqState::LoadB => self.begin_compute(&cfg, mac),
            _ => {
              self.done = true;
              self.enter(SeqState::Done);
              log::info!("sequencer: done in {} cycles", self.cycles);
            },
          }
        }
      },
      SeqState::Compute => self.compute_step(&cfg, mac, wm),
      SeqState::Done => self.enter(SeqState::Idle),
    }
  }

  fn descriptor(&self, cfg: &GemmConfig) -> TransferDesc {
    let (m, k, n) = (cfg.m as usize, cfg.k as usize, cfg.n as usize);
    let eb = cfg.data_type.bytes();
    let bits = cfg.data_type.bits();
    match self.state {
      SeqState::LoadA => TransferDesc {
        dir: Direction::Load,
        ext_addr: cfg.a_addr as u64,
        wm_addr: WM_A_BASE,
        length: m * k,
        row_len: k,
        stride: cfg.stride_a as usize,
        elem_bytes: eb,
        signed_width: bits,
      },
      SeqState::LoadB => TransferDesc {
        dir: Direction::Load,
        ext_addr: cfg.b_addr as u64,
        wm_addr: WM_B_BASE,
        length: k * n,
        row_len: n,
        stride: cfg.stride_b as usize,
        elem_bytes: eb,
        signed_width: bits,
      },
      _ => TransferDesc {
        dir: Direction::Store,
        ext_addr: cfg.c_addr as u64,
        wm_addr: WM_C_BASE,
        length: m * n,
        row_len: n,
        stride: cfg.stride_c as usize,
        elem_bytes: ACC_BYTES,
        signed_width: 32,
      },
    }
  }

  fn begin_compute(&mut self, cfg: &GemmConfig, mac: &mut MacPipeline) {
    let (m, n) = (cfg.m as usize, cfg.n as usize);
    debug_assert!(m * n <= WM_WINDOW);
    mac.reset();
    mac.set_data_type(cfg.data_type);
    self.compute = ComputeCtx {
      next_tile: Some((0, 0)),
      tiles_left: m.div_ceil(TILE) * n.div_ceil(TILE),
      ..ComputeCtx::default()
    };
    self.enter(SeqState::Compute);
  }

  // Row-major over M tiles, then N tiles.
  fn following_tile(cfg: &GemmConfig, (row0, col0): (usize, usize)) -> Option<(usize, usize)> {
    if col0 + TILE < cfg.n as usize {
      Some((row0, col0 + TILE))
    } else if row0 + TILE < cfg.m as usize {
      Some((row0 + TILE, 0))
    } else {
      None
    }
  }

  fn compute_step(&mut self, cfg: &GemmConfig, mac: &mut MacPipeline, wm: &mut WorkingMemory) {
    let (m, k, n) = (cfg.m as usize, cfg.k as usize, cfg.n as usize);

    // Slice read last cycle goes into the MAC now
    let input = self.compute.pending.take().map(|tag| {
      let data = wm.read_data(Port::Compute);
      let mut input = MacInput {
        a: [0; TILE],
        b: [0; TILE],
        clear: tag.clear,
        last: tag.last,
      };
      for i in 0..TILE {
        if tag.row0 + i < m {
          input.a[i] = data.get(i).copied().unwrap_or(0);
        }
        if tag.col0 + i < n {
          input.b[i] = data.get(TILE + i).copied().unwrap_or(0);
        }
      }
      input
    });

    let out = mac.tick(true, input);
    if out.valid && out.last {
      if let Some((row0, col0)) = self.compute.in_flight.pop_front() {
        for (r, row) in out.tile.iter().enumerate().filter(|(r, _)| row0 + r < m) {
          for (c, &acc) in row.iter().enumerate().filter(|(c, _)| col0 + c < n) {
            wm.issue_write(Port::Compute, WM_C_BASE + (row0 + r) * n + col0 + c, acc as WordT);
          }
        }
        log::trace!("sequencer: tile ({}, {}) written back", row0, col0);
      }
      self.compute.tiles_left = self.compute.tiles_left.saturating_sub(1);
    }

    // A new tile starts only once the previous one has retired with valid && last
    let tile_open = self.compute.k > 0 || self.compute.in_flight.is_empty();
    if let Some((row0, col0)) = self.compute.next_tile.filter(|_| tile_open) {
      let kk = self.compute.k;
      let addrs: Vec<usize> = (0..TILE)
        .map(|r| WM_A_BASE + (row0 + r) * k + kk)
        .chain((0..TILE).map(|c| WM_B_BASE + kk * n + col0 + c))
        .collect();
      wm.issue_read(Port::Compute, &addrs);
      self.compute.pending = Some(SliceTag {
        row0,
        col0,
        clear: kk == 0,
        last: kk + 1 == k,
      });
      if kk == 0 {
        self.compute.in_flight.push_back((row0, col0));
      }

      self.compute.k += 1;
      if self.compute.k == k {
        self.compute.k = 0;
        self.compute.next_tile = Self::following_tile(cfg, (row0, col0));
      }
    }

    if self.compute.tiles_left == 0 {
      self.enter(SeqState::StoreC);
    }
  }

  /// Back to Idle with every status bit clear.
  pub fn reset(&mut self) {
    let pingpong = self.pingpong;
    *self = Self::new(pingpong);
  }
}
