use crate::error::*;
use crate::error_msg::*;
use crate::leb128::*;

#[derive(Clone, Copy)]
pub struct ByteIter<'a> {
    pub bytes: &'a [u8],
    pub idx: usize,
}

impl<'a> ByteIter<'a> {
    #[inline]
    pub fn new(bytes: &'a [u8], idx: usize) -> Self { Self { bytes, idx } }
    #[inline]
    pub fn empty(&self) -> bool { self.idx >= self.bytes.len() }
    #[inline]
    pub fn has_n_left(&self, n: usize) -> bool { self.idx.checked_add(n).is_some_and(|end| end <= self.bytes.len()) }
    #[inline]
    pub fn remaining(&self) -> usize { self.bytes.len().saturating_sub(self.idx) }
    #[inline]
    pub fn cur(&self) -> usize { self.idx }
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let b = *self.bytes.get(self.idx).ok_or(Error::Malformed(UNEXPECTED_END))?;
        self.idx += 1;
        Ok(b)
    }
    #[inline]
    pub fn peek_u8(&self) -> Result<u8, Error> {
        self.bytes.get(self.idx).copied().ok_or(Error::Malformed(UNEXPECTED_END))
    }
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let out = self.slice_from(self.idx, len)?;
        self.idx += len;
        Ok(out)
    }
    #[inline]
    pub fn slice_from(&self, start: usize, len: usize) -> Result<&'a [u8], Error> {
        let end = start.checked_add(len).ok_or(Error::Malformed(UNEXPECTED_END_SHORT))?;
        self.bytes.get(start..end).ok_or(Error::Malformed(UNEXPECTED_END_SHORT))
    }
    /// Narrows the cursor to the next `len` bytes, returning the sub-cursor and
    /// leaving `self` positioned after them.
    #[inline]
    pub fn split(&mut self, len: usize) -> Result<ByteIter<'a>, Error> {
        let start = self.idx;
        let end = start.checked_add(len).filter(|e| *e <= self.bytes.len()).ok_or(Error::Malformed(UNEXPECTED_END_SHORT))?;
        self.idx = end;
        Ok(ByteIter { bytes: &self.bytes[..end], idx: start })
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, Error> { Ok(safe_read_leb128(self.bytes, &mut self.idx, 32)? as u32) }
    #[inline]
    pub fn read_u64(&mut self) -> Result<u64, Error> { safe_read_leb128(self.bytes, &mut self.idx, 64) }
    #[inline]
    pub fn read_s32(&mut self) -> Result<i32, Error> { Ok(safe_read_sleb128(self.bytes, &mut self.idx, 32)? as i32) }
    #[inline]
    pub fn read_s33(&mut self) -> Result<i64, Error> { safe_read_sleb128(self.bytes, &mut self.idx, 33) }
    #[inline]
    pub fn read_s64(&mut self) -> Result<i64, Error> { safe_read_sleb128(self.bytes, &mut self.idx, 64) }

    #[inline]
    pub fn read_f32_bits(&mut self) -> Result<u32, Error> { self.read_fixed_u32() }
    #[inline]
    pub fn read_f64_bits(&mut self) -> Result<u64, Error> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }
    #[inline]
    pub fn read_fixed_u32(&mut self) -> Result<u32, Error> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
    #[inline]
    pub fn read_v128(&mut self) -> Result<u128, Error> {
        let b = self.read_bytes(16)?;
        let mut buf = [0u8; 16];
        buf.copy_from_slice(b);
        Ok(u128::from_le_bytes(buf))
    }

    /// Length-prefixed UTF-8 name.
    pub fn read_name(&mut self) -> Result<&'a str, Error> {
        let len = self.read_u32()? as usize;
        if !self.has_n_left(len) { return malformed(UNEXPECTED_END_SHORT); }
        let raw = self.read_bytes(len)?;
        std::str::from_utf8(raw).map_err(|_| Error::Malformed(INVALID_UTF8))
    }

    /// Element count of a vector, rejected early when it cannot possibly fit
    /// in the remaining bytes at `min_size` bytes per element.
    pub fn read_vec_len(&mut self, min_size: usize) -> Result<u32, Error> {
        let n = self.read_u32()?;
        if (n as usize).saturating_mul(min_size) > self.remaining() { return malformed(UNEXPECTED_END_SHORT); }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_past_end_fail() {
        let mut it = ByteIter::new(&[1, 2], 0);
        assert_eq!(it.read_u8(), Ok(1));
        assert_eq!(it.peek_u8(), Ok(2));
        assert_eq!(it.read_u8(), Ok(2));
        assert_eq!(it.read_u8(), Err(Error::Malformed(UNEXPECTED_END)));
        assert_eq!(it.read_bytes(1), Err(Error::Malformed(UNEXPECTED_END_SHORT)));
    }

    #[test]
    fn names() {
        let mut it = ByteIter::new(&[3, b'a', b'b', b'c', 2, 0xc3, 0x28], 0);
        assert_eq!(it.read_name(), Ok("abc"));
        assert_eq!(it.read_name(), Err(Error::Malformed(INVALID_UTF8)));
        let mut it = ByteIter::new(&[5, b'a'], 0);
        assert_eq!(it.read_name(), Err(Error::Malformed(UNEXPECTED_END_SHORT)));
    }

    #[test]
    fn split_bounds_the_sub_cursor() {
        let mut it = ByteIter::new(&[1, 2, 3, 4], 0);
        let mut sub = it.split(2).unwrap();
        assert_eq!(it.cur(), 2);
        assert_eq!(sub.read_u8(), Ok(1));
        assert_eq!(sub.read_u8(), Ok(2));
        assert!(sub.empty());
        assert!(it.split(3).is_err());
    }
}
