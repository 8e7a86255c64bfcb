use crate::byte_iter::ByteIter;
use crate::bytecode::{op, Immediates};
use crate::error::*;
use crate::error_msg::*;
use crate::types::ValType;

use super::FuncValidator;

const V: ValType = ValType::V128;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shape {
    Unary,
    Binary,
    Ternary,
    Shift,
    Test,
    Splat(ValType),
}

fn shape(sub: u32) -> Option<Shape> {
    use Shape::*;
    Some(match sub {
        0x0e => Binary,
        0x0f..=0x11 => Splat(ValType::I32),
        0x12 => Splat(ValType::I64),
        0x13 => Splat(ValType::F32),
        0x14 => Splat(ValType::F64),
        0x23..=0x4c => Binary,
        0x4d => Unary,
        0x4e..=0x51 => Binary,
        0x52 => Ternary,
        0x53 => Test,
        0x5e..=0x62 => Unary,
        0x63 | 0x64 => Test,
        0x65 | 0x66 => Binary,
        0x67..=0x6a => Unary,
        0x6b..=0x6d => Shift,
        0x6e..=0x73 => Binary,
        0x74 | 0x75 => Unary,
        0x76..=0x79 => Binary,
        0x7a => Unary,
        0x7b => Binary,
        0x7c..=0x81 => Unary,
        0x82 => Binary,
        0x83 | 0x84 => Test,
        0x85 | 0x86 => Binary,
        0x87..=0x8a => Unary,
        0x8b..=0x8d => Shift,
        0x8e..=0x93 => Binary,
        0x94 => Unary,
        0x95..=0x99 => Binary,
        0x9b..=0x9f => Binary,
        0xa0 | 0xa1 => Unary,
        0xa3 | 0xa4 => Test,
        0xa7..=0xaa => Unary,
        0xab..=0xad => Shift,
        0xae | 0xb1 => Binary,
        0xb5..=0xba => Binary,
        0xbc..=0xbf => Binary,
        0xc0 | 0xc1 => Unary,
        0xc3 | 0xc4 => Test,
        0xc7..=0xca => Unary,
        0xcb..=0xcd => Shift,
        0xce | 0xd1 => Binary,
        0xd5..=0xdf => Binary,
        0xe0 | 0xe1 | 0xe3 => Unary,
        0xe4..=0xeb => Binary,
        0xec | 0xed | 0xef => Unary,
        0xf0..=0xf7 => Binary,
        0xf8..=0xff => Unary,
        // relaxed
        0x100 => Binary,
        0x101..=0x104 => Unary,
        0x105..=0x10c => Ternary,
        0x10d..=0x112 => Binary,
        0x113 => Ternary,
        _ => return None,
    })
}

/// Lane count and scalar type of the extract/replace lane operators.
fn lane_shape(sub: u32) -> (u8, ValType) {
    match sub {
        0x15..=0x17 => (16, ValType::I32),
        0x18..=0x1a => (8, ValType::I32),
        0x1b | 0x1c => (4, ValType::I32),
        0x1d | 0x1e => (2, ValType::I64),
        0x1f | 0x20 => (4, ValType::F32),
        _ => (2, ValType::F64),
    }
}

/// Natural alignment (log2) of the vector loads.
fn load_alignment(sub: u32) -> u32 {
    match sub {
        0x00 | 0x0b => 4,
        0x07 => 0,
        0x08 => 1,
        0x09 | 0x5c => 2,
        _ => 3,
    }
}

impl FuncValidator<'_> {
    pub(super) fn visit_simd(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let sub = it.read_u32()?;
        if sub >= 0x100 {
            self.require(self.features.relaxed_simd, "relaxed simd")?;
        } else {
            self.require(self.features.simd, "simd")?;
        }
        let mut imm = Immediates::new();
        match sub {
            0x00..=0x0a | 0x5c | 0x5d => {
                let (memory, offset, addr) = self.memarg(it, load_alignment(sub), false)?;
                self.pop(addr)?;
                self.push(V);
                imm.mem_access(memory, offset);
            }
            0x0b => {
                let (memory, offset, addr) = self.memarg(it, 4, false)?;
                self.pop_all(&[addr, V])?;
                imm.mem_access(memory, offset);
            }
            0x0c => {
                let v = it.read_v128()?;
                let idx = self.w.add_v128_constant(v);
                self.push(V);
                imm.u32(idx);
            }
            0x0d => {
                let lanes = it.read_bytes(16)?;
                if lanes.iter().any(|l| *l >= 32) { return validation(INVALID_LANE_INDEX); }
                self.pop_all(&[V, V])?;
                self.push(V);
                imm.bytes(lanes);
            }
            0x15..=0x22 => {
                let (lanes, scalar) = lane_shape(sub);
                let lane = it.read_u8()?;
                if lane >= lanes { return validation(INVALID_LANE_INDEX); }
                let replace = matches!(sub, 0x17 | 0x1a | 0x1c | 0x1e | 0x20 | 0x22);
                if replace {
                    self.pop_all(&[V, scalar])?;
                    self.push(V);
                } else {
                    self.pop(V)?;
                    self.push(scalar);
                }
                imm.u8(lane);
            }
            0x54..=0x5b => {
                let natural = (sub - 0x54) % 4;
                let (memory, offset, addr) = self.memarg(it, natural, false)?;
                let lane = it.read_u8()?;
                if lane as u32 >= 16 >> natural { return validation(INVALID_LANE_INDEX); }
                self.pop_all(&[addr, V])?;
                if sub < 0x58 { self.push(V); }
                imm.mem_access(memory, offset).u8(lane);
            }
            _ => {
                match shape(sub).ok_or(Error::Malformed(UNKNOWN_INSTRUCTION))? {
                    Shape::Unary => {
                        self.pop(V)?;
                    }
                    Shape::Binary => self.pop_all(&[V, V])?,
                    Shape::Ternary => self.pop_all(&[V, V, V])?,
                    Shape::Shift => self.pop_all(&[V, ValType::I32])?,
                    Shape::Test => {
                        self.pop(V)?;
                        self.push(ValType::I32);
                        self.w.add_prefixed(op::VECTOR, sub, &imm);
                        return Ok(());
                    }
                    Shape::Splat(t) => {
                        self.pop(t)?;
                    }
                }
                self.push(V);
            }
        }
        self.w.add_prefixed(op::VECTOR, sub, &imm);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_shapes() {
        assert_eq!(shape(0x6e), Some(Shape::Binary));
        assert_eq!(shape(0x6b), Some(Shape::Shift));
        assert_eq!(shape(0x53), Some(Shape::Test));
        assert_eq!(shape(0x11), Some(Shape::Splat(ValType::I32)));
        assert_eq!(shape(0x105), Some(Shape::Ternary));
        assert_eq!(shape(0x9a), None);
        assert_eq!(shape(0x114), None);
    }

    #[test]
    fn lanes() {
        assert_eq!(lane_shape(0x15), (16, ValType::I32));
        assert_eq!(lane_shape(0x1d), (2, ValType::I64));
        assert_eq!(lane_shape(0x22), (2, ValType::F64));
    }
}
