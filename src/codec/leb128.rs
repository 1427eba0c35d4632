//! LEB128 variable-length integer encoding (§5.2.2 of the wasm spec).
//!
//! Readers return `(value, bytes_consumed)` so callers can advance an offset
//! by exactly the encoded width. Writers append to a caller-provided buffer,
//! with no intermediate allocation beyond the output itself.

use super::Error;

fn read_vu(bytes: &[u8], size: u32) -> Result<(u64, usize), Error> {
    let max_bytes = ((size + 6) / 7) as usize;
    let mut result: u64 = 0;
    let mut consumed = 0;
    loop {
        let b = match bytes.get(consumed) {
            Some(b) => *b,
            None => return Err(Error::UnexpectedEof(consumed)),
        };
        result |= u64::from(b & 0x7f) << (7 * consumed as u32);
        consumed += 1;
        if b & 0x80 == 0 {
            break;
        }
        if consumed == max_bytes {
            return Err(Error::VarintOverflow);
        }
    }
    Ok((result, consumed))
}

/// Decodes an unsigned LEB128 u32 (up to 5 bytes).
pub fn read_vu32(bytes: &[u8]) -> Result<(u32, usize), Error> {
    let (value, consumed) = read_vu(bytes, 32)?;
    Ok((value as u32, consumed))
}

/// Decodes an unsigned LEB128 u64 (up to 10 bytes).
pub fn read_vu64(bytes: &[u8]) -> Result<(u64, usize), Error> {
    read_vu(bytes, 64)
}

/// Decodes a signed LEB128 i64 (used for block-type immediates).
pub fn read_vs64(bytes: &[u8]) -> Result<(i64, usize), Error> {
    let mut result: i64 = 0;
    let mut shift = 0;
    let mut consumed = 0;
    loop {
        let b = match bytes.get(consumed) {
            Some(b) => *b,
            None => return Err(Error::UnexpectedEof(consumed)),
        };
        result |= i64::from(b & 0x7f) << shift;
        shift += 7;
        consumed += 1;
        if b & 0x80 == 0 {
            if shift < 64 && b & 0x40 != 0 {
                result |= -1i64 << shift;
            }
            break;
        }
        if consumed == 10 {
            return Err(Error::VarintOverflow);
        }
    }
    Ok((result, consumed))
}

fn write_vu(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Appends the minimal unsigned LEB128 encoding of `v`.
pub fn write_vu32(buf: &mut Vec<u8>, v: u32) {
    write_vu(buf, u64::from(v));
}

/// Appends an unsigned LEB128 encoding of `v` that is at least `pad_to`
/// bytes wide, padding with continuation bytes and a terminating zero.
///
/// This is the mechanism that lets a signature or call index be rewritten
/// in place without disturbing the byte offsets around it.
pub fn write_vu32_padded(buf: &mut Vec<u8>, v: u32, pad_to: usize) {
    let mut value = u64::from(v);
    let mut length = 0;
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        length += 1;
        if value != 0 || length < pad_to {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
    if length < pad_to {
        while length < pad_to - 1 {
            buf.push(0x80);
            length += 1;
        }
        buf.push(0x00);
    }
}

/// Appends the minimal signed LEB128 encoding of `v`.
pub fn write_vs32(buf: &mut Vec<u8>, v: i32) {
    let mut value = v as i64;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}
