use crate::byte_iter::ByteIter;
use crate::bytecode::{op, Immediates};
use crate::error::*;
use crate::error_msg::*;
use crate::types::ValType;

use super::FuncValidator;

/// Value type and natural alignment of the seven access widths that repeat
/// through loads, stores, read-modify-write and compare-exchange.
const ACCESS: [(ValType, u32); 7] = [
    (ValType::I32, 2),
    (ValType::I64, 3),
    (ValType::I32, 0),
    (ValType::I32, 1),
    (ValType::I64, 0),
    (ValType::I64, 1),
    (ValType::I64, 2),
];

impl FuncValidator<'_> {
    pub(super) fn visit_atomic(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let sub = it.read_u32()?;
        let mut imm = Immediates::new();
        match sub {
            0x00 => {
                let (memory, offset, addr) = self.memarg(it, 2, true)?;
                self.pop_all(&[addr, ValType::I32])?;
                self.push(ValType::I32);
                imm.mem_access(memory, offset);
            }
            0x01 | 0x02 => {
                let t = if sub == 0x01 { ValType::I32 } else { ValType::I64 };
                let (memory, offset, addr) = self.memarg(it, if sub == 0x01 { 2 } else { 3 }, true)?;
                self.pop_all(&[addr, t, ValType::I64])?;
                self.push(ValType::I32);
                imm.mem_access(memory, offset);
            }
            0x03 => {
                if it.read_u8()? != 0 { return malformed(ZERO_BYTE_EXPECTED); }
            }
            0x10..=0x4e => {
                let (t, natural) = ACCESS[((sub - 0x10) % 7) as usize];
                let (memory, offset, addr) = self.memarg(it, natural, true)?;
                match sub {
                    0x10..=0x16 => {
                        self.pop(addr)?;
                        self.push(t);
                    }
                    0x17..=0x1d => self.pop_all(&[addr, t])?,
                    0x1e..=0x47 => {
                        self.pop_all(&[addr, t])?;
                        self.push(t);
                    }
                    _ => {
                        self.pop_all(&[addr, t, t])?;
                        self.push(t);
                    }
                }
                imm.mem_access(memory, offset);
            }
            _ => return malformed(UNKNOWN_INSTRUCTION),
        }
        self.w.add_prefixed(op::ATOMIC, sub, &imm);
        Ok(())
    }
}
