use crate::byte_iter::ByteIter;
use crate::bytecode::{op, Immediates, UNRESOLVED};
use crate::error::*;
use crate::error_msg::*;
use crate::types::*;

use super::FuncValidator;

#[inline]
fn concrete_ref(idx: u32, nullable: bool) -> ValType { ValType::reference(HeapType::concrete(idx), nullable) }

impl FuncValidator<'_> {
    fn field(&self, ty: u32, field: u32) -> Result<FieldType, Error> {
        self.symbols.struct_type(ty)?.get(field as usize).copied().ok_or(Error::Validation(UNKNOWN_FIELD))
    }

    fn check_elem_segment(&self, elem: u32, target: FieldType) -> Result<(), Error> {
        let seg = self.symbols.elem(elem)?;
        if !self.symbols.is_subtype(seg.elem_type, target.storage.unpacked()) { return validation(TYPE_MISMATCH); }
        Ok(())
    }

    /// Reference operand of a cast. It must share the hierarchy of `target`.
    fn pop_cast_operand(&mut self, target: HeapType) -> Result<ValType, Error> {
        let t = self.pop_ref()?;
        let ht = t.heap_type().unwrap_or(HeapType::BOTTOM);
        if ht != HeapType::BOTTOM && self.symbols.heap_top(ht) != self.symbols.heap_top(target) {
            return validation(TYPE_MISMATCH);
        }
        Ok(t)
    }

    pub(super) fn visit_gc(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let sub = it.read_u32()?;
        let mut imm = Immediates::new();
        let mut branch = None;
        match sub {
            0 | 1 => {
                let ty = it.read_u32()?;
                let fields = self.symbols.struct_type(ty)?;
                if sub == 0 {
                    let types: Vec<ValType> = fields.iter().map(|f| f.storage.unpacked()).collect();
                    self.pop_all(&types)?;
                } else if !fields.iter().all(|f| f.storage.is_defaultable()) {
                    return validation(NON_DEFAULTABLE);
                }
                self.push(concrete_ref(ty, false));
                imm.u32(ty);
            }
            2..=4 => {
                let ty = it.read_u32()?;
                let idx = it.read_u32()?;
                let field = self.field(ty, idx)?;
                match (sub, field.storage.is_packed()) {
                    (2, true) => return validation(PACKED_FIELD),
                    (3 | 4, false) => return validation(UNPACKED_FIELD),
                    _ => {}
                }
                self.pop(concrete_ref(ty, true))?;
                self.push(field.storage.unpacked());
                imm.u32(ty).u32(idx);
            }
            5 => {
                let ty = it.read_u32()?;
                let idx = it.read_u32()?;
                let field = self.field(ty, idx)?;
                if !field.mutable { return validation(FIELD_IS_IMMUTABLE); }
                self.pop_all(&[concrete_ref(ty, true), field.storage.unpacked()])?;
                imm.u32(ty).u32(idx);
            }
            6..=10 => {
                let ty = it.read_u32()?;
                let elem = self.symbols.array_type(ty)?;
                let t = elem.storage.unpacked();
                imm.u32(ty);
                match sub {
                    6 => self.pop_all(&[t, ValType::I32])?,
                    7 => {
                        if !elem.storage.is_defaultable() { return validation(NON_DEFAULTABLE); }
                        self.pop(ValType::I32)?;
                    }
                    8 => {
                        let n = it.read_u32()?;
                        // Past the frame base every pop yields the same result.
                        let operands = self.vals.len() - self.frame()?.height;
                        for _ in 0..(n as usize).min(operands + 1) {
                            self.pop(t)?;
                        }
                        imm.u32(n);
                    }
                    9 => {
                        let data = it.read_u32()?;
                        if t.is_reference() { return validation(TYPE_MISMATCH); }
                        self.symbols.check_data_index(data)?;
                        self.pop_all(&[ValType::I32, ValType::I32])?;
                        imm.u32(data);
                    }
                    _ => {
                        let seg = it.read_u32()?;
                        self.check_elem_segment(seg, elem)?;
                        self.pop_all(&[ValType::I32, ValType::I32])?;
                        imm.u32(seg);
                    }
                }
                self.push(concrete_ref(ty, false));
            }
            11..=13 => {
                let ty = it.read_u32()?;
                let elem = self.symbols.array_type(ty)?;
                match (sub, elem.storage.is_packed()) {
                    (11, true) => return validation(PACKED_FIELD),
                    (12 | 13, false) => return validation(UNPACKED_FIELD),
                    _ => {}
                }
                self.pop_all(&[concrete_ref(ty, true), ValType::I32])?;
                self.push(elem.storage.unpacked());
                imm.u32(ty);
            }
            14 | 16 | 18 | 19 => {
                let ty = it.read_u32()?;
                let elem = self.symbols.array_type(ty)?;
                if !elem.mutable { return validation(ARRAY_IS_IMMUTABLE); }
                let (r, t) = (concrete_ref(ty, true), elem.storage.unpacked());
                imm.u32(ty);
                match sub {
                    14 => self.pop_all(&[r, ValType::I32, t])?,
                    16 => self.pop_all(&[r, ValType::I32, t, ValType::I32])?,
                    18 => {
                        let data = it.read_u32()?;
                        if t.is_reference() { return validation(TYPE_MISMATCH); }
                        self.symbols.check_data_index(data)?;
                        self.pop_all(&[r, ValType::I32, ValType::I32, ValType::I32])?;
                        imm.u32(data);
                    }
                    _ => {
                        let seg = it.read_u32()?;
                        self.check_elem_segment(seg, elem)?;
                        self.pop_all(&[r, ValType::I32, ValType::I32, ValType::I32])?;
                        imm.u32(seg);
                    }
                }
            }
            15 => {
                self.pop(ValType::ARRAYREF)?;
                self.push(ValType::I32);
            }
            17 => {
                let dst = it.read_u32()?;
                let src = it.read_u32()?;
                let (d, s) = (self.symbols.array_type(dst)?, self.symbols.array_type(src)?);
                if !d.mutable { return validation(ARRAY_IS_IMMUTABLE); }
                let compatible = match (d.storage, s.storage) {
                    (StorageType::Val(dt), StorageType::Val(st)) => self.symbols.is_subtype(st, dt),
                    (ds, ss) => ds == ss,
                };
                if !compatible { return validation(TYPE_MISMATCH); }
                self.pop_all(&[concrete_ref(dst, true), ValType::I32, concrete_ref(src, true), ValType::I32, ValType::I32])?;
                imm.u32(dst).u32(src);
            }
            20..=23 => {
                let nullable = sub == 21 || sub == 23;
                let ht = self.heap_type(it)?;
                self.pop_cast_operand(ht)?;
                self.push(if sub <= 21 { ValType::I32 } else { ValType::reference(ht, nullable) });
                imm.u8(nullable as u8).i32(ht.raw());
            }
            24 | 25 => {
                let flags = it.read_u8()?;
                if flags > 3 { return malformed(INVALID_CASTS_FLAGS); }
                let depth = it.read_u32()?;
                let h1 = self.heap_type(it)?;
                let h2 = self.heap_type(it)?;
                let rt1 = ValType::reference(h1, flags & 1 != 0);
                let rt2 = ValType::reference(h2, flags & 2 != 0);
                if !self.symbols.is_subtype(rt2, rt1) { return validation(TYPE_MISMATCH); }
                // rt1 minus rt2: nullable only if rt2 cannot hold null.
                let diff = ValType::reference(h1, rt1.is_nullable() && !rt2.is_nullable());
                let (on_branch, fallthrough) = if sub == 24 { (rt2, diff) } else { (diff, rt2) };
                let lt = self.label_types(depth)?;
                let (last, rest) = lt.split_last().ok_or(Error::Validation(TYPE_MISMATCH))?;
                if !self.symbols.is_subtype(on_branch, *last) { return validation(TYPE_MISMATCH); }
                self.pop(rt1)?;
                self.pop_all(rest)?;
                self.push_all(rest);
                self.push(fallthrough);
                imm.u32(UNRESOLVED).u8(flags).i32(h1.raw()).i32(h2.raw());
                branch = Some(depth);
            }
            26 | 27 => {
                let (from, to) = if sub == 26 { (HeapType::EXTERN, HeapType::ANY) } else { (HeapType::ANY, HeapType::EXTERN) };
                let t = self.pop(ValType::reference(from, true))?;
                let nullable = t == ValType::BOTTOM || t.is_nullable();
                self.push(ValType::reference(to, nullable));
            }
            28 => {
                self.pop(ValType::I32)?;
                self.push(ValType::reference(HeapType::I31, false));
            }
            29 | 30 => {
                self.pop(ValType::I31REF)?;
                self.push(ValType::I32);
            }
            _ => return malformed(UNKNOWN_INSTRUCTION),
        }
        let pos = self.w.add_prefixed(op::AGGREGATE, sub, &imm);
        if let Some(depth) = branch { self.add_fixup(depth, pos)?; }
        Ok(())
    }
}
