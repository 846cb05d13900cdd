//! Incremental RESP + inline (telnet) command parser.
//!
//! Ported from `resp_parse`/`telnet_parse` in the C original: pure over an
//! input slice, consumes as many complete commands as it can, and leaves any
//! trailing partial command for the caller to re-present once more bytes
//! arrive.

use std::borrow::Cow;

/// Maximum number of arguments in a single command.
pub const MAX_ARGS: usize = 1_048_575;
/// Maximum length, in bytes, of a single argument.
pub const MAX_ARG_LEN: usize = 536_870_912;

/// Result of attempting to parse one command out of the front of a buffer.
pub enum ParseOutcome {
    /// Not enough bytes yet for a complete command; re-present this slice
    /// with more data appended.
    NeedMoreData,
    /// A full command was parsed. `consumed` bytes should be dropped from
    /// the front of the buffer before parsing again.
    Complete { consumed: usize, args: Vec<Vec<u8>> },
    /// A protocol violation was detected. The caller should write `message`
    /// as a RESP error and close the connection; no further bytes should be
    /// consumed from this buffer.
    ProtocolError { message: Cow<'static, str> },
}

/// Parses one command from the front of `data`. Dispatches to RESP framing
/// when the first byte is `*`, otherwise to inline/telnet framing.
pub fn parse_command(data: &[u8]) -> ParseOutcome {
    if data.first() == Some(&b'*') {
        parse_resp(data)
    } else {
        parse_inline(data)
    }
}

fn find(data: &[u8], from: usize, byte: u8) -> Option<usize> {
    data[from..].iter().position(|&b| b == byte).map(|p| p + from)
}

/// Parses a decimal integer starting at `data[i]`, terminated by `\r\n`.
/// Returns `(value, bytes consumed including the CRLF)` or `None` if the
/// terminator isn't malformed but simply not present yet (need more data),
/// distinguished from `Some(Err(..))` which is a hard parse failure.
fn parse_decimal_line(data: &[u8], i: usize) -> Option<Result<(i64, usize), ()>> {
    let nl = find(data, i, b'\n')?;
    let line_end = nl; // position of '\n'
    if line_end == i || data[line_end - 1] != b'\r' {
        return Some(Err(()));
    }
    let digits = &data[i..line_end - 1];
    if digits.is_empty() {
        return Some(Err(()));
    }
    let mut neg = false;
    let mut rest = digits;
    if rest[0] == b'-' {
        neg = true;
        rest = &rest[1..];
    }
    if rest.is_empty() || !rest.iter().all(u8::is_ascii_digit) {
        return Some(Err(()));
    }
    let mut value: i64 = 0;
    for &b in rest {
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }
    if neg {
        value = -value;
    }
    Some(Ok((value, nl + 1 - i)))
}

fn parse_resp(data: &[u8]) -> ParseOutcome {
    debug_assert_eq!(data.first(), Some(&b'*'));
    let mut i = 1usize;
    if i == data.len() {
        return ParseOutcome::NeedMoreData;
    }
    let (nargs, consumed) = match parse_decimal_line(data, i) {
        None => return ParseOutcome::NeedMoreData,
        Some(Err(())) => {
            return ParseOutcome::ProtocolError {
                message: Cow::Borrowed("ERR Protocol error: invalid multibulk length"),
            };
        }
        Some(Ok(v)) => v,
    };
    if !(0..=MAX_ARGS as i64).contains(&nargs) {
        return ParseOutcome::ProtocolError {
            message: Cow::Borrowed("ERR Protocol error: invalid multibulk length"),
        };
    }
    i += consumed;

    let mut args = Vec::with_capacity(nargs as usize);
    for _ in 0..nargs {
        if i == data.len() {
            return ParseOutcome::NeedMoreData;
        }
        if data[i] != b'$' {
            return ParseOutcome::ProtocolError {
                message: expected_dollar_message(data[i]),
            };
        }
        i += 1;
        if i == data.len() {
            return ParseOutcome::NeedMoreData;
        }
        let (nbytes, consumed) = match parse_decimal_line(data, i) {
            None => return ParseOutcome::NeedMoreData,
            Some(Err(())) => {
                return ParseOutcome::ProtocolError {
                    message: Cow::Borrowed("ERR Protocol error: invalid bulk length"),
                };
            }
            Some(Ok(v)) => v,
        };
        if !(0..=MAX_ARG_LEN as i64).contains(&nbytes) {
            return ParseOutcome::ProtocolError {
                message: Cow::Borrowed("ERR Protocol error: invalid bulk length"),
            };
        }
        i += consumed;
        let nbytes = nbytes as usize;
        if i + nbytes + 2 > data.len() {
            return ParseOutcome::NeedMoreData;
        }
        args.push(data[i..i + nbytes].to_vec());
        i += nbytes + 2;
    }
    ParseOutcome::Complete { consumed: i, args }
}

/// `expected '$', got 'X'` names the offending byte, so unlike the other
/// protocol error messages this one can't be a static string.
fn expected_dollar_message(byte: u8) -> Cow<'static, str> {
    let ch = byte as char;
    Cow::Owned(format!("ERR Protocol error: expected '$', got '{ch}'"))
}

fn parse_inline(data: &[u8]) -> ParseOutcome {
    let mut args: Vec<Vec<u8>> = Vec::new();
    let mut arg: Vec<u8> = Vec::new();
    let mut in_arg = false;
    let mut quote: Option<u8> = None;

    let mut i = 0usize;
    while i < data.len() {
        let ch = data[i];
        if in_arg {
            if let Some(q) = quote {
                if ch == b'\n' {
                    return unbalanced_quotes();
                }
                if ch == q {
                    if let Some(err) = push_arg(&mut args, &arg) {
                        return err;
                    }
                    arg.clear();
                    i += 1;
                    if i == data.len() {
                        return ParseOutcome::NeedMoreData;
                    }
                    let next = data[i];
                    in_arg = false;
                    quote = None;
                    if next == b'\n' {
                        continue;
                    }
                    if !next.is_ascii_whitespace() {
                        return unbalanced_quotes();
                    }
                    i += 1;
                    continue;
                } else if ch == b'\\' {
                    i += 1;
                    if i == data.len() {
                        return ParseOutcome::NeedMoreData;
                    }
                    let escaped = match data[i] {
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        other => other,
                    };
                    arg.push(escaped);
                    if arg.len() > MAX_ARG_LEN {
                        return ParseOutcome::ProtocolError {
                            message: Cow::Borrowed("ERR Protocol error: invalid bulk length"),
                        };
                    }
                    i += 1;
                    continue;
                }
                arg.push(ch);
                if arg.len() > MAX_ARG_LEN {
                    return ParseOutcome::ProtocolError {
                        message: Cow::Borrowed("ERR Protocol error: invalid bulk length"),
                    };
                }
                i += 1;
            } else {
                if ch == b'"' || ch == b'\'' {
                    quote = Some(ch);
                    i += 1;
                    continue;
                }
                if ch.is_ascii_whitespace() {
                    if let Some(err) = push_arg(&mut args, &arg) {
                        return err;
                    }
                    arg.clear();
                    if ch == b'\n' {
                        return ParseOutcome::Complete { consumed: i + 1, args };
                    }
                    in_arg = false;
                    i += 1;
                    continue;
                }
                arg.push(ch);
                if arg.len() > MAX_ARG_LEN {
                    return ParseOutcome::ProtocolError {
                        message: Cow::Borrowed("ERR Protocol error: invalid bulk length"),
                    };
                }
                i += 1;
            }
        } else {
            if ch == b'\n' {
                return ParseOutcome::Complete { consumed: i + 1, args };
            }
            if ch.is_ascii_whitespace() {
                i += 1;
                continue;
            }
            in_arg = true;
            if ch == b'"' || ch == b'\'' {
                quote = Some(ch);
            } else {
                quote = None;
                arg.push(ch);
                if arg.len() > MAX_ARG_LEN {
                    return ParseOutcome::ProtocolError {
                        message: Cow::Borrowed("ERR Protocol error: invalid bulk length"),
                    };
                }
            }
            i += 1;
        }
    }
    ParseOutcome::NeedMoreData
}

fn unbalanced_quotes() -> ParseOutcome {
    ParseOutcome::ProtocolError { message: Cow::Borrowed("ERR Protocol error: unbalanced quotes in request") }
}

fn push_arg(args: &mut Vec<Vec<u8>>, arg: &[u8]) -> Option<ParseOutcome> {
    if args.len() >= MAX_ARGS {
        return Some(ParseOutcome::ProtocolError {
            message: Cow::Borrowed("ERR Protocol error: invalid multibulk length"),
        });
    }
    args.push(arg.to_vec());
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(data: &[u8]) -> (usize, Vec<Vec<u8>>) {
        match parse_command(data) {
            ParseOutcome::Complete { consumed, args } => (consumed, args),
            ParseOutcome::NeedMoreData => panic!("expected complete, got need-more-data"),
            ParseOutcome::ProtocolError { message } => panic!("expected complete, got error: {message}"),
        }
    }

    #[test]
    fn resp_dispatch() {
        let input = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n";
        let (consumed, args) = complete(input);
        assert_eq!(consumed, input.len());
        assert_eq!(args, vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]);
    }

    #[test]
    fn resp_needs_more_data_when_split_mid_command() {
        let input = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n";
        for split in 1..input.len() {
            let (first, second) = input.split_at(split);
            match parse_command(first) {
                ParseOutcome::NeedMoreData => {}
                ParseOutcome::Complete { .. } => continue, // some splits land on a boundary
                ParseOutcome::ProtocolError { message } => {
                    panic!("unexpected error at split {split}: {message}")
                }
            }
            let mut rejoined = first.to_vec();
            rejoined.extend_from_slice(second);
            let (consumed, args) = complete(&rejoined);
            assert_eq!(consumed, input.len());
            assert_eq!(args, vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]);
        }
    }

    #[test]
    fn resp_rejects_bad_type_byte() {
        let input = b"*2\r\n#3\r\nGET\r\n";
        match parse_command(input) {
            ParseOutcome::ProtocolError { message } => {
                assert_eq!(message, "ERR Protocol error: expected '$', got '#'");
            }
            _ => panic!("expected protocol error"),
        }
    }

    #[test]
    fn resp_rejects_negative_multibulk() {
        match parse_command(b"*-5\r\n") {
            ParseOutcome::ProtocolError { message } => {
                assert_eq!(message, "ERR Protocol error: invalid multibulk length");
            }
            _ => panic!("expected protocol error"),
        }
    }

    #[test]
    fn inline_simple_command() {
        let (consumed, args) = complete(b"set foo bar\n");
        assert_eq!(consumed, 12);
        assert_eq!(args, vec![b"set".to_vec(), b"foo".to_vec(), b"bar".to_vec()]);
    }

    #[test]
    fn inline_quoted_argument() {
        let (_, args) = complete(b"set \"foo bar\" baz\n");
        assert_eq!(args, vec![b"set".to_vec(), b"foo bar".to_vec(), b"baz".to_vec()]);
    }

    #[test]
    fn inline_empty_line_yields_no_vector() {
        let (consumed, args) = complete(b"\n");
        assert_eq!(consumed, 1);
        assert!(args.is_empty());
    }

    #[test]
    fn inline_unterminated_quote_is_protocol_error() {
        match parse_command(b"a\"b\n") {
            ParseOutcome::ProtocolError { message } => {
                assert_eq!(message, "ERR Protocol error: unbalanced quotes in request");
            }
            other => panic!("expected protocol error, got {}", matches!(other, ParseOutcome::Complete { .. })),
        }
    }

    #[test]
    fn inline_telnet_with_quotes_scenario() {
        let (_, args) = complete(b"set \"hello world\" 42\n");
        assert_eq!(args, vec![b"set".to_vec(), b"hello world".to_vec(), b"42".to_vec()]);
    }

    #[test]
    fn inline_needs_more_data_without_newline() {
        match parse_command(b"set foo") {
            ParseOutcome::NeedMoreData => {}
            _ => panic!("expected need-more-data"),
        }
    }
}
