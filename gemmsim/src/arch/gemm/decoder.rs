use serde::{Deserialize, Serialize};

// custom-0 R-type encoding of the GEMM instruction
pub const GEMM_OPCODE: u32 = 0b000_1011;
pub const GEMM_FUNCT3: u32 = 0b000;
pub const GEMM_FUNCT7: u32 = 0b000_0001;

/// Decoded register operands. rs1 points at config block 1, rs2 at block 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemmInst {
  pub rd: u8,
  pub rs1: u8,
  pub rs2: u8,
}

impl GemmInst {
  pub fn new(rd: u8, rs1: u8, rs2: u8) -> Self {
    Self { rd, rs1, rs2 }
  }

  pub fn encode(&self) -> u32 {
    (GEMM_FUNCT7 << 25)
      | ((self.rs2 as u32 & 0x1f) << 20)
      | ((self.rs1 as u32 & 0x1f) << 15)
      | (GEMM_FUNCT3 << 12)
      | ((self.rd as u32 & 0x1f) << 7)
      | GEMM_OPCODE
  }
}

/// None unless `raw` matches the opcode, funct3 and funct7 pattern.
pub fn decode(raw: u32) -> Option<GemmInst> {
  let opcode = raw & 0x7f;
  let funct3 = (raw >> 12) & 0x7;
  let funct7 = raw >> 25;
  if opcode != GEMM_OPCODE || funct3 != GEMM_FUNCT3 || funct7 != GEMM_FUNCT7 {
    return None;
  }
  Some(GemmInst {
    rd: ((raw >> 7) & 0x1f) as u8,
    rs1: ((raw >> 15) & 0x1f) as u8,
    rs2: ((raw >> 20) & 0x1f) as u8,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_decode_fields() {
    // gemm x5, x10, x11
    let raw = 0x02b5_028b;
    assert_eq!(decode(raw), Some(GemmInst::new(5, 10, 11)));
    assert_eq!(GemmInst::new(5, 10, 11).encode(), raw);
  }

  #[test]
  fn test_rejects_other_patterns() {
    let raw = GemmInst::new(1, 2, 3).encode();
    assert!(decode(raw).is_some());
    // wrong opcode (custom-1)
    assert_eq!(decode((raw & !0x7f) | 0b010_1011), None);
    // wrong funct3
    assert_eq!(decode(raw | (1 << 12)), None);
    // wrong funct7
    assert_eq!(decode(raw | (1 << 26)), None);
  }
}
