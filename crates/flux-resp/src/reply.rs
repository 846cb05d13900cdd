//! RESP reply frame writers.
//!
//! Ported from `writeln`/`miniredis_write_*` in the C original: each writer
//! appends one frame to a [`Buf`] and sanitizes control bytes (`< 0x20`) in
//! string payloads to a space, matching `writeln`'s in-place byte scan.
//! Writers return `false` on allocation failure instead of aborting, so a
//! caller can latch the connection closed the way `rwrite` does.

use crate::buf::Buf;

fn try_extend(buf: &mut Buf, bytes: &[u8]) -> bool {
    buf.try_extend_from_slice(bytes)
}

fn writeln(buf: &mut Buf, prefix: u8, payload: &[u8]) -> bool {
    if !buf.try_push(prefix) {
        return false;
    }
    let mark = buf.len();
    if !try_extend(buf, payload) {
        return false;
    }
    buf.sanitize_control_bytes_from(mark);
    try_extend(buf, b"\r\n")
}

/// Writes a status reply: `+<s>\r\n`.
pub fn write_status(buf: &mut Buf, s: &str) -> bool {
    writeln(buf, b'+', s.as_bytes())
}

/// Writes an error reply: `-<s>\r\n`.
pub fn write_error(buf: &mut Buf, s: &str) -> bool {
    writeln(buf, b'-', s.as_bytes())
}

/// Writes a signed integer reply: `:<n>\r\n`.
pub fn write_int(buf: &mut Buf, value: i64) -> bool {
    let mut tmp = itoa_buf();
    let s = format_i64(value, &mut tmp);
    writeln(buf, b':', s)
}

/// Writes an unsigned integer reply: `:<n>\r\n`.
pub fn write_uint(buf: &mut Buf, value: u64) -> bool {
    let mut tmp = itoa_buf();
    let s = format_u64(value, &mut tmp);
    writeln(buf, b':', s)
}

/// Writes the null bulk reply: `$-1\r\n`.
pub fn write_null(buf: &mut Buf) -> bool {
    try_extend(buf, b"$-1\r\n")
}

/// Writes a bulk string reply: `$<len>\r\n<bytes>\r\n`. `None` writes the
/// null bulk reply instead.
pub fn write_bulk(buf: &mut Buf, data: Option<&[u8]>) -> bool {
    let Some(data) = data else {
        return write_null(buf);
    };
    let mut tmp = itoa_buf();
    let len_str = format_u64(data.len() as u64, &mut tmp);
    if !buf.try_push(b'$') {
        return false;
    }
    if !try_extend(buf, len_str) {
        return false;
    }
    if !try_extend(buf, b"\r\n") {
        return false;
    }
    if !try_extend(buf, data) {
        return false;
    }
    try_extend(buf, b"\r\n")
}

/// Writes an array header: `*<count>\r\n`. The caller writes `count`
/// elements with subsequent writer calls.
pub fn write_array(buf: &mut Buf, count: i64) -> bool {
    let mut tmp = itoa_buf();
    let s = format_i64(count, &mut tmp);
    writeln(buf, b'*', s)
}

/// Appends `data` verbatim, with no framing.
pub fn write_raw(buf: &mut Buf, data: &[u8]) -> bool {
    try_extend(buf, data)
}

fn itoa_buf() -> [u8; 24] {
    [0u8; 24]
}

fn format_u64(mut n: u64, tmp: &mut [u8; 24]) -> &[u8] {
    let mut i = tmp.len();
    loop {
        i -= 1;
        tmp[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    &tmp[i..]
}

fn format_i64(n: i64, tmp: &mut [u8; 24]) -> &[u8] {
    if n < 0 {
        let digit_count = format_u64(n.unsigned_abs(), tmp).len();
        let start = tmp.len() - digit_count - 1;
        tmp[start] = b'-';
        &tmp[start..]
    } else {
        format_u64(n as u64, tmp)
    }
}
