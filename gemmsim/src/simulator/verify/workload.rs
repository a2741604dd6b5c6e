use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::arch::gemm::DataType;

/// Operands for one GEMM, both packed row-major.
#[derive(Debug, Clone)]
pub struct Workload {
  pub m: usize,
  pub k: usize,
  pub n: usize,
  pub data_type: DataType,
  pub a: Vec<i32>,
  pub b: Vec<i32>,
}

impl Workload {
  /// Uniform values over the full range of `data_type`. Same seed, same matrices.
  pub fn random(m: usize, k: usize, n: usize, data_type: DataType, seed: u64) -> Self {
    let mut rng = StdRng::seed_from_u64(seed);
    let lo = data_type.min_value();
    let hi = data_type.max_value();
    let a = (0..m * k).map(|_| rng.gen_range(lo..=hi)).collect();
    let b = (0..k * n).map(|_| rng.gen_range(lo..=hi)).collect();
    Self {
      m,
      k,
      n,
      data_type,
      a,
      b,
    }
  }

  pub fn ops(&self) -> u64 {
    2 * (self.m * self.k * self.n) as u64
  }
}
