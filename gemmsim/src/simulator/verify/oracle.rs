// Software oracle
// Golden GEMM the accelerator results are checked against.

/// Strided reference GEMM. `a` is M x K with pitch `stride_a`, `b` is K x N with
/// pitch `stride_b`; the result is packed M x N. Accumulation runs over ascending
/// K and clamps the running sum to the i32 range after every step.
pub fn reference_gemm(
  a: &[i32],
  b: &[i32],
  m: usize,
  k: usize,
  n: usize,
  stride_a: usize,
  stride_b: usize,
) -> Vec<i32> {
  let mut c = vec![0; m * n];
  for i in 0..m {
    for j in 0..n {
      let mut sum: i64 = 0;
      for x in 0..k {
        sum += a[i * stride_a + x] as i64 * b[x * stride_b + j] as i64;
        sum = sum.clamp(i32::MIN as i64, i32::MAX as i64);
      }
      c[i * n + j] = sum as i32;
    }
  }
  c
}

/// Index, hardware value and reference value of every mismatch.
pub fn compare_results(hw: &[i32], reference: &[i32]) -> Vec<(usize, i32, i32)> {
  let mut errors: Vec<(usize, i32, i32)> = hw
    .iter()
    .zip(reference)
    .enumerate()
    .filter(|(_, (h, r))| h != r)
    .map(|(i, (&h, &r))| (i, h, r))
    .collect();
  // A length mismatch counts every missing cell
  for i in hw.len().min(reference.len())..hw.len().max(reference.len()) {
    errors.push((i, hw.get(i).copied().unwrap_or(0), reference.get(i).copied().unwrap_or(0)));
  }
  errors
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_small_product() {
    // [1 2; 3 4] * [5 6; 7 8]
    let c = reference_gemm(&[1, 2, 3, 4], &[5, 6, 7, 8], 2, 2, 2, 2, 2);
    assert_eq!(c, vec![19, 22, 43, 50]);
  }

  #[test]
  fn test_strided_operands() {
    // A is 1x2 inside a pitch of 3, B is 2x1 inside a pitch of 2
    let c = reference_gemm(&[2, 3, 99], &[4, 99, 5, 99], 1, 2, 1, 3, 2);
    assert_eq!(c, vec![23]);
  }

  #[test]
  fn test_saturates_like_hardware() {
    let a = vec![i16::MIN as i32; 4];
    let b = vec![i16::MIN as i32; 4];
    assert_eq!(reference_gemm(&a, &b, 1, 4, 1, 4, 1), vec![i32::MAX]);
  }

  #[test]
  fn test_clamp_is_per_step() {
    // Saturates after three slices, then four negative products pull it back down
    let a = vec![i16::MAX as i32; 8];
    let b = [[i16::MAX as i32; 4], [i16::MIN as i32; 4]].concat();
    assert_eq!(reference_gemm(&a, &b, 1, 8, 1, 8, 1), vec![-2_147_352_577]);
    // Mirror image: pinned at i32::MIN, then climbs back
    let b = [[i16::MIN as i32; 4], [i16::MAX as i32; 4]].concat();
    assert_eq!(reference_gemm(&a, &b, 1, 8, 1, 8, 1), vec![2_147_221_508]);
  }

  #[test]
  fn test_compare_results() {
    assert!(compare_results(&[1, 2, 3], &[1, 2, 3]).is_empty());
    assert_eq!(compare_results(&[1, 5, 3], &[1, 2, 3]), vec![(1, 5, 2)]);
    assert_eq!(compare_results(&[1], &[1, 7]), vec![(1, 0, 7)]);
  }
}
