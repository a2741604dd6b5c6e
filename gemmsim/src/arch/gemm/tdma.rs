// Transfer engine
// Moves descriptors between external memory and working memory, one element per
// cycle, in bursts of at most `max_burst` words. Channels share the external port
// through the round-robin arbiter; the grantee holds the port for a whole burst.

use serde::{Deserialize, Serialize};

use super::arbiter::RoundRobinArbiter;
use super::dram::{BurstReq, ExtMem};
use super::params::{sign_extend, MAX_BURST};
use super::spad::{Port, WorkingMemory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
  /// External memory -> working memory
  Load,
  /// Working memory -> external memory
  Store,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDesc {
  pub dir: Direction,
  pub ext_addr: u64,
  pub wm_addr: usize,
  /// Words to move
  pub length: usize,
  /// Elements per external row
  pub row_len: usize,
  /// Elements between external row starts
  pub stride: usize,
  pub elem_bytes: usize,
  /// Loaded elements are sign-extended from this many bits
  pub signed_width: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
  Idle,
  ReadRequest,
  ReadData,
  WriteRequest,
  WriteData,
  Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Channel {
  state: ChannelState,
  desc: Option<TransferDesc>,
  moved: usize,
  burst_len: usize,
  burst_moved: usize,
  prefetched: usize,
  row_start: u64,
  col: usize,
  ext_addr: u64,
  wm_addr: usize,
  failed: bool,
}

impl Channel {
  fn idle() -> Self {
    Self {
      state: ChannelState::Idle,
      desc: None,
      moved: 0,
      burst_len: 0,
      burst_moved: 0,
      prefetched: 0,
      row_start: 0,
      col: 0,
      ext_addr: 0,
      wm_addr: 0,
      failed: false,
    }
  }

  fn requesting(&self) -> bool {
    matches!(self.state, ChannelState::ReadRequest | ChannelState::WriteRequest)
  }

  fn request_state(dir: Direction) -> ChannelState {
    match dir {
      Direction::Load => ChannelState::ReadRequest,
      Direction::Store => ChannelState::WriteRequest,
    }
  }

  /// Step both address counters past one element.
  fn advance(&mut self, desc: &TransferDesc) {
    self.moved += 1;
    self.burst_moved += 1;
    self.wm_addr += 1;
    self.col += 1;
    if self.col == desc.row_len {
      self.col = 0;
      self.row_start += (desc.stride * desc.elem_bytes) as u64;
      self.ext_addr = self.row_start;
    } else {
      self.ext_addr += desc.elem_bytes as u64;
    }
  }
}

/// Per-cycle outputs of the engine, one bit per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TdmaEvents {
  pub done: u32,
  pub error: u32,
}

impl TdmaEvents {
  pub fn done(&self, ch: usize) -> bool {
    self.done & (1 << ch) != 0
  }

  pub fn error(&self, ch: usize) -> bool {
    self.error & (1 << ch) != 0
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEngine {
  channels: Vec<Channel>,
  arbiter: RoundRobinArbiter,
  owner: Option<usize>,
  max_burst: usize,
  words_moved: u64,
}

impl TransferEngine {
  pub fn new(num_channels: usize, max_burst: usize) -> Self {
    Self {
      channels: (0..num_channels).map(|_| Channel::idle()).collect(),
      arbiter: RoundRobinArbiter::new(num_channels),
      owner: None,
      max_burst: max_burst.clamp(1, MAX_BURST),
      words_moved: 0,
    }
  }

  pub fn num_channels(&self) -> usize {
    self.channels.len()
  }

  pub fn max_burst(&self) -> usize {
    self.max_burst
  }

  pub fn state(&self, ch: usize) -> ChannelState {
    self.channels[ch].state
  }

  pub fn owner(&self) -> Option<usize> {
    self.owner
  }

  pub fn is_idle(&self) -> bool {
    self.channels.iter().all(|c| c.state == ChannelState::Idle)
  }

  pub fn words_moved(&self) -> u64 {
    self.words_moved
  }

  /// Hand a descriptor to an idle channel. Returns false if the channel is busy.
  pub fn start(&mut self, ch: usize, desc: TransferDesc) -> bool {
    let Some(channel) = self.channels.get_mut(ch) else {
      return false;
    };
    if channel.state != ChannelState::Idle {
      log::warn!("tdma ch{}: start while {:?}, dropped", ch, channel.state);
      return false;
    }

    *channel = Channel::idle();
    channel.desc = Some(desc);
    channel.row_start = desc.ext_addr;
    channel.ext_addr = desc.ext_addr;
    channel.wm_addr = desc.wm_addr;

    if desc.length == 0 || desc.row_len == 0 {
      channel.state = ChannelState::Done;
    } else {
      channel.burst_len = desc.length.min(self.max_burst);
      channel.state = Channel::request_state(desc.dir);
    }

    log::debug!(
      "tdma ch{}: {:?} ext={:#x} wm={:#x} len={}",
      ch,
      desc.dir,
      desc.ext_addr,
      desc.wm_addr,
      desc.length
    );
    true
  }

  pub fn tick(&mut self, mem: &mut dyn ExtMem, wm: &mut WorkingMemory) -> TdmaEvents {
    let mut events = TdmaEvents::default();

    // Done lasts exactly one cycle
    for (ch, channel) in self.channels.iter_mut().enumerate() {
      if channel.state == ChannelState::Done {
        if channel.failed {
          events.error |= 1 << ch;
        } else {
          events.done |= 1 << ch;
        }
        *channel = Channel::idle();
      }
    }

    if self.owner.is_none() {
      let requests: Vec<bool> = self.channels.iter().map(Channel::requesting).collect();
      self.owner = self.arbiter.arbitrate(&requests);
    }

    if let Some(ch) = self.owner {
      self.service(ch, mem, wm);
    }

    events
  }

  fn service(&mut self, ch: usize, mem: &mut dyn ExtMem, wm: &mut WorkingMemory) {
    let max_burst = self.max_burst;
    let channel = &mut self.channels[ch];
    let Some(desc) = channel.desc else {
      self.owner = None;
      return;
    };

    match channel.state {
      ChannelState::ReadRequest | ChannelState::WriteRequest => {
        let req = BurstReq {
          channel: ch,
          write: desc.dir == Direction::Store,
          addr: channel.ext_addr,
          words: channel.burst_len,
          elem_bytes: desc.elem_bytes,
        };
        // No ack keeps the channel parked here; the watchdog lives outside
        if mem.request(&req) {
          channel.burst_moved = 0;
          if desc.dir == Direction::Load {
            channel.state = ChannelState::ReadData;
          } else {
            channel.state = ChannelState::WriteData;
            wm.issue_read(Port::Transfer, &[channel.wm_addr]);
            channel.prefetched = 1;
          }
        }
      },
      ChannelState::ReadData => {
        match mem.read(channel.ext_addr, desc.elem_bytes) {
          Some(raw) => {
            wm.issue_write(Port::Transfer, channel.wm_addr, sign_extend(raw, desc.signed_width));
            channel.advance(&desc);
            self.words_moved += 1;
          },
          None => {
            log::error!("tdma ch{}: read fault at {:#x}", ch, channel.ext_addr);
            channel.failed = true;
          },
        }
        Self::finish_beat(channel, &desc, max_burst, &mut self.owner);
      },
      ChannelState::WriteData => {
        let value = wm.read_data(Port::Transfer).first().copied().unwrap_or(0);
        if mem.write(channel.ext_addr, desc.elem_bytes, value as u32) {
          channel.advance(&desc);
          self.words_moved += 1;
          if channel.prefetched < channel.burst_len {
            wm.issue_read(Port::Transfer, &[channel.wm_addr]);
            channel.prefetched += 1;
          }
        } else {
          log::error!("tdma ch{}: write fault at {:#x}", ch, channel.ext_addr);
          channel.failed = true;
        }
        Self::finish_beat(channel, &desc, max_burst, &mut self.owner);
      },
      ChannelState::Idle | ChannelState::Done => {
        self.owner = None;
      },
    }
  }

  // Close the burst if it is complete and release the port.
  fn finish_beat(channel: &mut Channel, desc: &TransferDesc, max_burst: usize, owner: &mut Option<usize>) {
    if channel.failed {
      channel.state = ChannelState::Done;
      *owner = None;
      return;
    }
    if channel.burst_moved < channel.burst_len {
      return;
    }

    *owner = None;
    if channel.moved >= desc.length {
      channel.state = ChannelState::Done;
    } else {
      channel.burst_len = (desc.length - channel.moved).min(max_burst);
      channel.prefetched = 0;
      channel.state = Channel::request_state(desc.dir);
    }
  }

  /// Abandon every channel immediately.
  pub fn reset(&mut self) {
    self.channels.iter_mut().for_each(|c| *c = Channel::idle());
    self.arbiter.reset();
    self.owner = None;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::gemm::dram::Dram;
  use crate::arch::gemm::params::DataType;

  fn load_desc(ext_addr: u64, wm_addr: usize, length: usize) -> TransferDesc {
    TransferDesc {
      dir: Direction::Load,
      ext_addr,
      wm_addr,
      length,
      row_len: length,
      stride: length,
      elem_bytes: 1,
      signed_width: 8,
    }
  }

  // Run until every channel is idle again, returning (cycle, events) for each non-empty event.
  fn run(
    engine: &mut TransferEngine,
    dram: &mut Dram,
    wm: &mut WorkingMemory,
    max_cycles: usize,
  ) -> Vec<(usize, TdmaEvents)> {
    let mut seen = Vec::new();
    for cycle in 0..max_cycles {
      let ev = engine.tick(dram, wm);
      wm.tick();
      if ev != TdmaEvents::default() {
        seen.push((cycle, ev));
      }
      if engine.is_idle() {
        break;
      }
    }
    seen
  }

  #[test]
  fn test_single_burst_load() {
    let mut dram = Dram::new(0x1000, 256);
    dram.load_matrix(0x1000, 1, 4, 4, DataType::Int8, &[1, -2, 3, -4]);
    let mut wm = WorkingMemory::new(64);
    let mut engine = TransferEngine::new(1, 16);

    assert!(engine.start(0, load_desc(0x1000, 10, 4)));
    let events = run(&mut engine, &mut dram, &mut wm, 100);

    // request, 4 data beats, then the done pulse
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, 5);
    assert!(events[0].1.done(0));
    assert_eq!((10..14).map(|a| wm.peek(0, a)).collect::<Vec<_>>(), vec![1, -2, 3, -4]);
    assert_eq!(engine.words_moved(), 4);
  }

  #[test]
  fn test_burst_split() {
    let mut dram = Dram::new(0, 256);
    let values: Vec<i32> = (0..10).collect();
    dram.load_matrix(0, 1, 10, 10, DataType::Int8, &values);
    let mut wm = WorkingMemory::new(64);
    let mut engine = TransferEngine::new(1, 4);

    engine.start(0, load_desc(0, 0, 10));
    run(&mut engine, &mut dram, &mut wm, 100);

    // 4 + 4 + 2
    assert_eq!(dram.burst_count(), 3);
    assert_eq!((0..10).map(|a| wm.peek(0, a)).collect::<Vec<_>>(), values);
  }

  #[test]
  fn test_done_pulses_once() {
    let mut dram = Dram::new(0, 64);
    let mut wm = WorkingMemory::new(64);
    let mut engine = TransferEngine::new(1, 16);
    engine.start(0, load_desc(0, 0, 2));

    let mut pulses = 0;
    for _ in 0..20 {
      if engine.tick(&mut dram, &mut wm).done(0) {
        pulses += 1;
      }
      wm.tick();
    }
    assert_eq!(pulses, 1);
    assert_eq!(engine.state(0), ChannelState::Idle);
  }

  #[test]
  fn test_strided_load() {
    // 2x3 int16 matrix with a pitch of 5 elements
    let mut dram = Dram::new(0, 256);
    dram.load_matrix(0x20, 2, 3, 5, DataType::Int16, &[1, 2, 3, -4, -5, -6]);
    let mut wm = WorkingMemory::new(64);
    let mut engine = TransferEngine::new(1, 16);

    engine.start(
      0,
      TransferDesc {
        dir: Direction::Load,
        ext_addr: 0x20,
        wm_addr: 0,
        length: 6,
        row_len: 3,
        stride: 5,
        elem_bytes: 2,
        signed_width: 16,
      },
    );
    run(&mut engine, &mut dram, &mut wm, 100);
    assert_eq!((0..6).map(|a| wm.peek(0, a)).collect::<Vec<_>>(), vec![1, 2, 3, -4, -5, -6]);
  }

  #[test]
  fn test_store_with_stride() {
    let mut dram = Dram::new(0, 256);
    let mut wm = WorkingMemory::new(64);
    for i in 0..4 {
      wm.poke(0, 8 + i, (i as i32 + 1) * -100);
    }
    let mut engine = TransferEngine::new(2, 3);

    engine.start(
      1,
      TransferDesc {
        dir: Direction::Store,
        ext_addr: 0x40,
        wm_addr: 8,
        length: 4,
        row_len: 2,
        stride: 4,
        elem_bytes: 4,
        signed_width: 32,
      },
    );
    let events = run(&mut engine, &mut dram, &mut wm, 100);
    assert!(events.iter().any(|(_, e)| e.done(1)));
    assert_eq!(dram.read_matrix_i32(0x40, 2, 2, 4), Some(vec![-100, -200, -300, -400]));
  }

  #[test]
  fn test_ack_latency_delays_data() {
    let mut fast = Dram::new(0, 64);
    let mut slow = Dram::new(0, 64).with_ack_latency(5);
    let mut wm = WorkingMemory::new(64);

    let mut engine = TransferEngine::new(1, 16);
    engine.start(0, load_desc(0, 0, 4));
    let t_fast = run(&mut engine, &mut fast, &mut wm, 100)[0].0;

    engine.start(0, load_desc(0, 0, 4));
    let t_slow = run(&mut engine, &mut slow, &mut wm, 100)[0].0;
    assert_eq!(t_slow, t_fast + 5);
  }

  #[test]
  fn test_unacknowledged_request_parks() {
    let mut dram = Dram::new(0, 64);
    dram.set_stalled(true);
    let mut wm = WorkingMemory::new(64);
    let mut engine = TransferEngine::new(1, 16);
    engine.start(0, load_desc(0, 0, 4));

    for _ in 0..1000 {
      assert_eq!(engine.tick(&mut dram, &mut wm), TdmaEvents::default());
      wm.tick();
    }
    assert_eq!(engine.state(0), ChannelState::ReadRequest);
  }

  #[test]
  fn test_read_fault_reports_error() {
    let mut dram = Dram::new(0x1000, 16);
    let mut wm = WorkingMemory::new(64);
    let mut engine = TransferEngine::new(1, 16);
    engine.start(0, load_desc(0x100c, 0, 8));

    let events = run(&mut engine, &mut dram, &mut wm, 100);
    assert_eq!(events.len(), 1);
    assert!(events[0].1.error(0));
    assert!(!events[0].1.done(0));
  }

  #[test]
  fn test_channels_share_port_fairly() {
    let mut dram = Dram::new(0, 1024);
    let mut wm = WorkingMemory::new(256);
    let mut engine = TransferEngine::new(3, 2);

    for ch in 0..3 {
      engine.start(ch, load_desc(0x100 * ch as u64, 64 * ch, 8));
    }

    let mut grant_order = Vec::new();
    let mut last_owner = None;
    for _ in 0..200 {
      engine.tick(&mut dram, &mut wm);
      wm.tick();
      if engine.owner() != last_owner {
        if let Some(o) = engine.owner() {
          grant_order.push(o);
        }
        last_owner = engine.owner();
      }
      if engine.is_idle() {
        break;
      }
    }

    // Four 2-word bursts per channel, interleaved round-robin
    assert_eq!(grant_order.len(), 12);
    for window in grant_order.windows(3) {
      let mut w = window.to_vec();
      w.sort();
      assert_eq!(w, vec![0, 1, 2]);
    }
  }

  #[test]
  fn test_reset_abandons_transfer() {
    let mut dram = Dram::new(0, 64);
    let mut wm = WorkingMemory::new(64);
    let mut engine = TransferEngine::new(1, 16);
    engine.start(0, load_desc(0, 0, 8));
    engine.tick(&mut dram, &mut wm);
    engine.tick(&mut dram, &mut wm);
    engine.reset();
    assert!(engine.is_idle());
    assert_eq!(engine.owner(), None);
    assert_eq!(engine.tick(&mut dram, &mut wm), TdmaEvents::default());
  }
}
