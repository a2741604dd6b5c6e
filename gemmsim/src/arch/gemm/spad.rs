// Double-buffered working memory
// Two symmetric regions; the buffer-select flag picks the one backing every port.

use serde::{Deserialize, Serialize};

use super::params::{WordT, WM_REGION_WORDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Port {
  Compute,
  Transfer,
}

impl Port {
  fn index(self) -> usize {
    match self {
      Port::Compute => 0,
      Port::Transfer => 1,
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PortState {
  read_req: Vec<usize>,
  write_req: Vec<(usize, WordT)>,
  read_data: Vec<WordT>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemory {
  regions: [Vec<WordT>; 2],
  select: usize,
  ports: [PortState; 2],
}

impl Default for WorkingMemory {
  fn default() -> Self {
    Self::new(WM_REGION_WORDS)
  }
}

impl WorkingMemory {
  pub fn new(region_words: usize) -> Self {
    Self {
      regions: [vec![0; region_words], vec![0; region_words]],
      select: 0,
      ports: [PortState::default(), PortState::default()],
    }
  }

  pub fn region_words(&self) -> usize {
    self.regions[0].len()
  }

  pub fn select(&mut self, buffer: usize) {
    self.select = buffer & 1;
  }

  pub fn selected(&self) -> usize {
    self.select
  }

  /// Queue reads for this cycle; the data shows up in `read_data` after `tick`.
  pub fn issue_read(&mut self, port: Port, addrs: &[usize]) {
    self.ports[port.index()].read_req.extend_from_slice(addrs);
  }

  pub fn issue_write(&mut self, port: Port, addr: usize, value: WordT) {
    self.ports[port.index()].write_req.push((addr, value));
  }

  /// Data for the reads issued on the previous cycle, in issue order.
  pub fn read_data(&self, port: Port) -> &[WordT] {
    &self.ports[port.index()].read_data
  }

  /// End of cycle: sample reads against the current contents, then commit writes.
  /// Out-of-range reads return 0 and out-of-range writes are dropped.
  pub fn tick(&mut self) {
    let region = &mut self.regions[self.select];

    for port in self.ports.iter_mut() {
      port.read_data = port
        .read_req
        .drain(..)
        .map(|addr| region.get(addr).copied().unwrap_or(0))
        .collect();
    }

    for port in self.ports.iter_mut() {
      for (addr, value) in port.write_req.drain(..) {
        match region.get_mut(addr) {
          Some(word) => *word = value,
          None => log::warn!("working memory write out of range: addr={:#x}", addr),
        }
      }
    }
  }

  pub fn peek(&self, buffer: usize, addr: usize) -> WordT {
    self.regions[buffer & 1].get(addr).copied().unwrap_or(0)
  }

  pub fn poke(&mut self, buffer: usize, addr: usize, value: WordT) {
    if let Some(word) = self.regions[buffer & 1].get_mut(addr) {
      *word = value;
    }
  }

  /// Drop any queued or returned port traffic; contents are kept.
  pub fn reset(&mut self) {
    self.ports = [PortState::default(), PortState::default()];
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_read_has_one_cycle_latency() {
    let mut wm = WorkingMemory::new(64);
    wm.poke(0, 5, 42);

    wm.issue_read(Port::Compute, &[5]);
    assert!(wm.read_data(Port::Compute).is_empty());
    wm.tick();
    assert_eq!(wm.read_data(Port::Compute), &[42]);

    // Nothing issued this cycle, so nothing comes back next cycle
    wm.tick();
    assert!(wm.read_data(Port::Compute).is_empty());
  }

  #[test]
  fn test_write_visible_next_cycle() {
    let mut wm = WorkingMemory::new(64);

    wm.issue_write(Port::Transfer, 3, 7);
    wm.issue_read(Port::Compute, &[3]);
    wm.tick();
    // Same-cycle read sees the old value
    assert_eq!(wm.read_data(Port::Compute), &[0]);

    wm.issue_read(Port::Compute, &[3]);
    wm.tick();
    assert_eq!(wm.read_data(Port::Compute), &[7]);
  }

  #[test]
  fn test_ports_are_independent() {
    let mut wm = WorkingMemory::new(64);
    wm.poke(0, 1, 11);
    wm.poke(0, 2, 22);

    wm.issue_read(Port::Compute, &[1, 2]);
    wm.issue_read(Port::Transfer, &[2]);
    wm.tick();

    assert_eq!(wm.read_data(Port::Compute), &[11, 22]);
    assert_eq!(wm.read_data(Port::Transfer), &[22]);
  }

  #[test]
  fn test_buffer_select() {
    let mut wm = WorkingMemory::new(16);
    wm.select(1);
    wm.issue_write(Port::Transfer, 0, 9);
    wm.tick();

    assert_eq!(wm.peek(1, 0), 9);
    assert_eq!(wm.peek(0, 0), 0);

    wm.select(0);
    wm.issue_read(Port::Compute, &[0]);
    wm.tick();
    assert_eq!(wm.read_data(Port::Compute), &[0]);
  }

  #[test]
  fn test_out_of_range_access() {
    let mut wm = WorkingMemory::new(4);
    wm.issue_write(Port::Transfer, 100, 1);
    wm.issue_read(Port::Compute, &[100]);
    wm.tick();
    assert_eq!(wm.read_data(Port::Compute), &[0]);
  }
}
