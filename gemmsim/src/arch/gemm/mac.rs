// Multiply-accumulate pipeline
// A TILE x TILE grid of accumulator cells fed with one outer-product step per cycle.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::params::{AccT, DataType, WordT, PIPE_DEPTH, TILE};

pub type Tile = [[AccT; TILE]; TILE];

/// One K slice: `a[r]` is A(row r, k) and `b[c]` is B(k, col c).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacInput {
  pub a: [WordT; TILE],
  pub b: [WordT; TILE],
  pub clear: bool,
  pub last: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MacOutput {
  pub valid: bool,
  pub last: bool,
  pub tile: Tile,
}

// Products are formed on entry and carried down the shift register.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StageEntry {
  products: [[i64; TILE]; TILE],
  clear: bool,
  last: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacPipeline {
  depth: usize,
  data_type: DataType,
  stages: VecDeque<Option<StageEntry>>,
  acc: Tile,
  macs: u64,
}

impl Default for MacPipeline {
  fn default() -> Self {
    Self::new(PIPE_DEPTH)
  }
}

impl MacPipeline {
  pub fn new(depth: usize) -> Self {
    let depth = depth.max(1);
    Self {
      depth,
      data_type: DataType::Int8,
      stages: (0..depth).map(|_| None).collect(),
      acc: [[0; TILE]; TILE],
      macs: 0,
    }
  }

  pub fn depth(&self) -> usize {
    self.depth
  }

  pub fn set_data_type(&mut self, data_type: DataType) {
    self.data_type = data_type;
  }

  /// Advance one cycle. With `enable` low the pipeline holds and nothing is accepted.
  pub fn tick(&mut self, enable: bool, input: Option<MacInput>) -> MacOutput {
    if !enable {
      return MacOutput::default();
    }

    let retired = self.stages.pop_back().flatten();
    let entry = input.map(|inp| self.multiply(&inp));
    self.stages.push_front(entry);

    match retired {
      Some(entry) => {
        self.accumulate(&entry);
        MacOutput {
          valid: true,
          last: entry.last,
          tile: self.acc,
        }
      },
      None => MacOutput::default(),
    }
  }

  fn multiply(&self, input: &MacInput) -> StageEntry {
    let mut products = [[0i64; TILE]; TILE];
    for (r, row) in products.iter_mut().enumerate() {
      let a = self.data_type.sign_extend(input.a[r] as u32) as i64;
      for (c, p) in row.iter_mut().enumerate() {
        let b = self.data_type.sign_extend(input.b[c] as u32) as i64;
        *p = a * b;
      }
    }
    StageEntry {
      products,
      clear: input.clear,
      last: input.last,
    }
  }

  fn accumulate(&mut self, entry: &StageEntry) {
    for r in 0..TILE {
      for c in 0..TILE {
        let prev = if entry.clear { 0 } else { self.acc[r][c] };
        self.acc[r][c] = saturating_mac(prev, entry.products[r][c]);
      }
    }
    self.macs += (TILE * TILE) as u64;
  }

  pub fn accumulators(&self) -> &Tile {
    &self.acc
  }

  /// True while any stage still holds an input.
  pub fn in_flight(&self) -> bool {
    self.stages.iter().any(|s| s.is_some())
  }

  pub fn mac_count(&self) -> u64 {
    self.macs
  }

  pub fn reset(&mut self) {
    self.stages.iter_mut().for_each(|s| *s = None);
    self.acc = [[0; TILE]; TILE];
  }
}

/// `acc + product`, clamped to the accumulator range.
pub fn saturating_mac(acc: AccT, product: i64) -> AccT {
  let sum = acc as i64 + product;
  sum.clamp(AccT::MIN as i64, AccT::MAX as i64) as AccT
}

#[cfg(test)]
mod tests {
  use super::*;

  fn splat(a: WordT, b: WordT, clear: bool, last: bool) -> MacInput {
    MacInput {
      a: [a; TILE],
      b: [b; TILE],
      clear,
      last,
    }
  }

  #[test]
  fn test_latency_is_exactly_pipe_depth() {
    let mut mac = MacPipeline::default();
    let mut valid_at = Vec::new();

    for cycle in 0..10 {
      let input = if cycle == 0 { Some(splat(3, 4, true, true)) } else { None };
      let out = mac.tick(true, input);
      if out.valid {
        valid_at.push(cycle);
        assert_eq!(out.tile[0][0], 12);
        assert!(out.last);
      }
    }

    assert_eq!(valid_at, vec![PIPE_DEPTH]);
  }

  #[test]
  fn test_fully_pipelined() {
    let mut mac = MacPipeline::default();
    let mut outputs = Vec::new();

    for cycle in 0..4 + PIPE_DEPTH {
      let input = if cycle < 4 {
        Some(splat(1, cycle as WordT + 1, cycle == 0, cycle == 3))
      } else {
        None
      };
      let out = mac.tick(true, input);
      if out.valid {
        outputs.push((cycle, out.tile[2][5], out.last));
      }
    }

    // 1, 1+2, 1+2+3, 1+2+3+4 on consecutive cycles
    assert_eq!(
      outputs,
      vec![
        (PIPE_DEPTH, 1, false),
        (PIPE_DEPTH + 1, 3, false),
        (PIPE_DEPTH + 2, 6, false),
        (PIPE_DEPTH + 3, 10, true),
      ]
    );
  }

  #[test]
  fn test_clear_restarts_accumulation() {
    let mut mac = MacPipeline::new(1);
    mac.tick(true, Some(splat(5, 5, true, false)));
    mac.tick(true, Some(splat(2, 2, true, true)));
    let out = mac.tick(true, None);
    assert!(out.valid);
    assert_eq!(out.tile[7][7], 4);
  }

  #[test]
  fn test_outer_product_cells_are_independent() {
    let mut mac = MacPipeline::new(1);
    let mut input = splat(0, 0, true, true);
    for i in 0..TILE {
      input.a[i] = i as WordT;
      input.b[i] = 10 * i as WordT;
    }
    mac.tick(true, Some(input));
    let out = mac.tick(true, None);
    for r in 0..TILE {
      for c in 0..TILE {
        assert_eq!(out.tile[r][c], (r * 10 * c) as AccT);
      }
    }
  }

  #[test]
  fn test_positive_saturation() {
    let mut mac = MacPipeline::new(PIPE_DEPTH);
    mac.set_data_type(DataType::Int16);
    let mut last = MacOutput::default();
    for cycle in 0..8 + PIPE_DEPTH {
      let input = if cycle < 8 {
        Some(splat(i16::MIN as WordT, i16::MIN as WordT, cycle == 0, cycle == 7))
      } else {
        None
      };
      let out = mac.tick(true, input);
      if out.valid {
        last = out;
      }
    }
    assert!(last.last);
    assert_eq!(last.tile[0][0], i32::MAX);
  }

  #[test]
  fn test_negative_saturation() {
    let mut mac = MacPipeline::new(PIPE_DEPTH);
    mac.set_data_type(DataType::Int16);
    let mut last = MacOutput::default();
    for cycle in 0..8 + PIPE_DEPTH {
      let input = if cycle < 8 {
        Some(splat(i16::MIN as WordT, i16::MAX as WordT, cycle == 0, cycle == 7))
      } else {
        None
      };
      let out = mac.tick(true, input);
      if out.valid {
        last = out;
      }
    }
    assert_eq!(last.tile[3][4], i32::MIN);
  }

  #[test]
  fn test_saturation_is_sticky_not_wrapping() {
    assert_eq!(saturating_mac(i32::MAX - 1, 1 << 30), i32::MAX);
    assert_eq!(saturating_mac(i32::MIN + 1, -(1 << 30)), i32::MIN);
    assert_eq!(saturating_mac(i32::MAX, -1), i32::MAX - 1);
  }

  #[test]
  fn test_int8_mode_sign_extends_operands() {
    let mut mac = MacPipeline::new(1);
    mac.set_data_type(DataType::Int8);
    // 0x1ff truncates to -1 in int8 mode
    mac.tick(true, Some(splat(0x1ff, 3, true, true)));
    let out = mac.tick(true, None);
    assert_eq!(out.tile[0][0], -3);
  }

  #[test]
  fn test_disable_holds_state() {
    let mut mac = MacPipeline::new(2);
    mac.tick(true, Some(splat(2, 3, true, true)));
    for _ in 0..5 {
      assert!(!mac.tick(false, None).valid);
    }
    assert!(!mac.tick(true, None).valid);
    let out = mac.tick(true, None);
    assert!(out.valid);
    assert_eq!(out.tile[1][1], 6);
  }

  #[test]
  fn test_reset_drops_in_flight() {
    let mut mac = MacPipeline::default();
    mac.tick(true, Some(splat(1, 1, true, true)));
    assert!(mac.in_flight());
    mac.reset();
    assert!(!mac.in_flight());
    for _ in 0..PIPE_DEPTH + 1 {
      assert!(!mac.tick(true, None).valid);
    }
  }
}
