use crate::error::*;
use crate::error_msg::*;

/// Reads an unsigned LEB128 value of at most `bits` bits starting at `*pc`.
/// On success `*pc` is advanced past the encoding.
#[inline]
pub fn safe_read_leb128(bytes: &[u8], pc: &mut usize, bits: u32) -> Result<u64, Error> {
    let max_bytes = bits.div_ceil(7) as usize;
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    let mut end = *pc;
    loop {
        let byte = *bytes.get(end).ok_or(Error::Malformed(UNEXPECTED_END))?;
        end += 1;
        let consumed = end - *pc;
        if consumed == max_bytes {
            if byte & 0x80 != 0 { return malformed(INT_TOO_LONG); }
            let remaining = bits - shift;
            if remaining < 7 && (byte & 0x7f) >> remaining != 0 { return malformed(INT_TOO_LARGE); }
        }
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 { break; }
        shift += 7;
    }
    *pc = end;
    Ok(result)
}

/// Reads a signed LEB128 value of at most `bits` bits starting at `*pc`.
/// The unused high bits of the final byte must be a sign extension.
#[inline]
pub fn safe_read_sleb128(bytes: &[u8], pc: &mut usize, bits: u32) -> Result<i64, Error> {
    let max_bytes = bits.div_ceil(7) as usize;
    let mut result: i64 = 0;
    let mut shift: u32 = 0;
    let mut end = *pc;
    let mut byte;
    loop {
        byte = *bytes.get(end).ok_or(Error::Malformed(UNEXPECTED_END))?;
        end += 1;
        let consumed = end - *pc;
        if consumed == max_bytes {
            if byte & 0x80 != 0 { return malformed(INT_TOO_LONG); }
            let remaining = bits - shift;
            if remaining < 7 {
                let top = (byte & 0x7f) >> (remaining - 1);
                if top != 0 && top != (0x7f >> (remaining - 1)) { return malformed(INT_TOO_LARGE); }
            }
        }
        result |= ((byte & 0x7f) as i64) << shift;
        shift += 7;
        if byte & 0x80 == 0 { break; }
    }
    if shift < 64 && byte & 0x40 != 0 {
        result |= !0i64 << shift;
    }
    *pc = end;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_leb128(out: &mut Vec<u8>, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                return;
            }
            out.push(byte | 0x80);
        }
    }

    fn write_sleb128(out: &mut Vec<u8>, mut value: i64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
            if done {
                out.push(byte);
                return;
            }
            out.push(byte | 0x80);
        }
    }

    fn u32_of(bytes: &[u8]) -> Result<u64, Error> {
        let mut pc = 0;
        safe_read_leb128(bytes, &mut pc, 32)
    }

    fn s32_of(bytes: &[u8]) -> Result<i64, Error> {
        let mut pc = 0;
        safe_read_sleb128(bytes, &mut pc, 32)
    }

    #[test]
    fn unsigned_values() {
        assert_eq!(u32_of(&[0x00]), Ok(0));
        assert_eq!(u32_of(&[0xe5, 0x8e, 0x26]), Ok(624485));
        assert_eq!(u32_of(&[0xff, 0xff, 0xff, 0xff, 0x0f]), Ok(u32::MAX as u64));
        // padded encodings are fine while within the byte budget
        assert_eq!(u32_of(&[0x80, 0x80, 0x80, 0x80, 0x00]), Ok(0));
    }

    #[test]
    fn unsigned_overlong_and_overflow() {
        assert_eq!(u32_of(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00]), Err(Error::Malformed(INT_TOO_LONG)));
        assert_eq!(u32_of(&[0xff, 0xff, 0xff, 0xff, 0x1f]), Err(Error::Malformed(INT_TOO_LARGE)));
        assert_eq!(u32_of(&[0x80]), Err(Error::Malformed(UNEXPECTED_END)));
        let mut pc = 0;
        let bytes = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        assert_eq!(safe_read_leb128(&bytes, &mut pc, 64), Ok(u64::MAX));
        let mut pc = 0;
        let bytes = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02];
        assert_eq!(safe_read_leb128(&bytes, &mut pc, 64), Err(Error::Malformed(INT_TOO_LARGE)));
    }

    #[test]
    fn signed_values() {
        assert_eq!(s32_of(&[0x7f]), Ok(-1));
        assert_eq!(s32_of(&[0xc0, 0xbb, 0x78]), Ok(-123456));
        assert_eq!(s32_of(&[0xff, 0xff, 0xff, 0xff, 0x07]), Ok(i32::MAX as i64));
        assert_eq!(s32_of(&[0x80, 0x80, 0x80, 0x80, 0x78]), Ok(i32::MIN as i64));
        assert_eq!(s32_of(&[0xff, 0xff, 0xff, 0xff, 0x7f]), Ok(-1));
    }

    #[test]
    fn signed_bad_sign_extension() {
        assert_eq!(s32_of(&[0xff, 0xff, 0xff, 0xff, 0x0f]), Err(Error::Malformed(INT_TOO_LARGE)));
        assert_eq!(s32_of(&[0x80, 0x80, 0x80, 0x80, 0x70]), Err(Error::Malformed(INT_TOO_LARGE)));
        assert_eq!(s32_of(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x7f]), Err(Error::Malformed(INT_TOO_LONG)));
        let mut pc = 0;
        // s33 block type indices have one more payload bit
        assert_eq!(safe_read_sleb128(&[0xff, 0xff, 0xff, 0xff, 0x0f], &mut pc, 33), Ok(u32::MAX as i64));
    }

    #[test]
    fn writers_feed_readers() {
        for v in [0u64, 1, 127, 128, 300, u32::MAX as u64] {
            let mut out = Vec::new();
            write_leb128(&mut out, v);
            assert_eq!(u32_of(&out), Ok(v));
        }
        for v in [0i64, -1, 63, -64, 64, i32::MIN as i64] {
            let mut out = Vec::new();
            write_sleb128(&mut out, v);
            assert_eq!(s32_of(&out), Ok(v));
        }
    }
}
