// External memory model
// Flat little-endian byte store behind a request/acknowledge handshake.

use serde::{Deserialize, Serialize};

use super::params::DataType;

/// One burst request presented on the shared external-memory port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstReq {
  pub channel: usize,
  pub write: bool,
  pub addr: u64,
  pub words: usize,
  pub elem_bytes: usize,
}

/// The external-memory collaborator seen by the transfer engine.
pub trait ExtMem {
  /// Called every cycle the request is asserted; returns the acknowledgment.
  fn request(&mut self, req: &BurstReq) -> bool;
  fn read(&mut self, addr: u64, bytes: usize) -> Option<u32>;
  fn write(&mut self, addr: u64, bytes: usize, value: u32) -> bool;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dram {
  base: u64,
  data: Vec<u8>,
  ack_latency: u32,
  waited: u32,
  stalled: bool,
  bursts: u64,
}

impl Dram {
  pub fn new(base: u64, size: usize) -> Self {
    Self {
      base,
      data: vec![0; size],
      ack_latency: 0,
      waited: 0,
      stalled: false,
      bursts: 0,
    }
  }

  pub fn with_ack_latency(mut self, cycles: u32) -> Self {
    self.ack_latency = cycles;
    self
  }

  pub fn base(&self) -> u64 {
    self.base
  }

  pub fn size(&self) -> usize {
    self.data.len()
  }

  /// A stalled memory never acknowledges a request.
  pub fn set_stalled(&mut self, stalled: bool) {
    self.stalled = stalled;
    self.waited = 0;
  }

  pub fn burst_count(&self) -> u64 {
    self.bursts
  }

  fn offset(&self, addr: u64, bytes: usize) -> Option<usize> {
    let off = addr.checked_sub(self.base)? as usize;
    let end = off.checked_add(bytes)?;
    (end <= self.data.len()).then_some(off)
  }

  pub fn read_u32(&self, addr: u64) -> Option<u32> {
    self.read_bytes(addr, 4)
  }

  pub fn write_u32(&mut self, addr: u64, value: u32) -> bool {
    self.write_bytes(addr, 4, value)
  }

  fn read_bytes(&self, addr: u64, bytes: usize) -> Option<u32> {
    let off = self.offset(addr, bytes)?;
    let value = self.data[off..off + bytes]
      .iter()
      .enumerate()
      .fold(0u32, |acc, (i, &b)| acc | (b as u32) << (8 * i));
    Some(value)
  }

  fn write_bytes(&mut self, addr: u64, bytes: usize, value: u32) -> bool {
    match self.offset(addr, bytes) {
      Some(off) => {
        for i in 0..bytes {
          self.data[off + i] = (value >> (8 * i)) as u8;
        }
        true
      },
      None => false,
    }
  }

  /// Store a row-major matrix of `data_type` elements with a row pitch of `stride` elements.
  pub fn load_matrix(
    &mut self,
    addr: u64,
    rows: usize,
    cols: usize,
    stride: usize,
    data_type: DataType,
    values: &[i32],
  ) -> bool {
    let eb = data_type.bytes();
    for r in 0..rows {
      for c in 0..cols {
        let a = addr + ((r * stride + c) * eb) as u64;
        let Some(&value) = values.get(r * cols + c) else {
          return false;
        };
        if !self.write_bytes(a, eb, value as u32) {
          return false;
        }
      }
    }
    true
  }

  /// Read back a row-major matrix of 32-bit results.
  pub fn read_matrix_i32(&self, addr: u64, rows: usize, cols: usize, stride: usize) -> Option<Vec<i32>> {
    let mut out = Vec::with_capacity(rows * cols);
    for r in 0..rows {
      for c in 0..cols {
        let a = addr + ((r * stride + c) * 4) as u64;
        out.push(self.read_u32(a)? as i32);
      }
    }
    Some(out)
  }
}

impl ExtMem for Dram {
  fn request(&mut self, req: &BurstReq) -> bool {
    if self.stalled {
      return false;
    }
    if self.waited < self.ack_latency {
      self.waited += 1;
      return false;
    }
    self.waited = 0;
    self.bursts += 1;
    log::trace!(
      "dram ack: ch={} {} addr={:#x} words={}",
      req.channel,
      if req.write { "write" } else { "read" },
      req.addr,
      req.words
    );
    true
  }

  fn read(&mut self, addr: u64, bytes: usize) -> Option<u32> {
    self.read_bytes(addr, bytes)
  }

  fn write(&mut self, addr: u64, bytes: usize, value: u32) -> bool {
    self.write_bytes(addr, bytes, value)
  }
}
