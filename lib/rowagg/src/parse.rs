use crate::constants::KEY_DELIMITER;
use crate::error::{ParseError, ParseErrorKind};
use memchr::memchr;

/// One parsed line. `value` is fixed-point in tenths (`23.4` -> `234`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub key: &'a str,
    pub value: i64,
}

/// Parses `<key>:<integer>.<digit>` with the line terminator already stripped.
///
/// The key runs up to the first `:`. The integer part is one or more ASCII
/// digits with an optional leading `-`, which negates the whole value. Exactly
/// one digit must follow the `.`; nothing is rounded.
pub fn parse_line(line: &[u8]) -> Result<Record<'_>, ParseError> {
    let fail = |kind| ParseError::new(line, kind);

    let text = std::str::from_utf8(line).map_err(|_| fail(ParseErrorKind::InvalidEncoding))?;
    let split = memchr(KEY_DELIMITER, line).ok_or_else(|| fail(ParseErrorKind::MissingDelimiter))?;
    let (key, value) = (&text[..split], &line[split + 1..]);

    let n = value.len();
    if n < 2 || value[n - 2] != b'.' || !value[n - 1].is_ascii_digit() {
        return Err(fail(ParseErrorKind::InvalidFraction));
    }
    let tenths = i64::from(value[n - 1] - b'0');
    let whole = parse_integer(&value[..n - 2]).ok_or_else(|| fail(ParseErrorKind::InvalidInteger))?;

    let magnitude = whole
        .magnitude
        .checked_mul(10)
        .and_then(|v| v.checked_add(tenths))
        .ok_or_else(|| fail(ParseErrorKind::InvalidInteger))?;

    Ok(Record { key, value: if whole.negative { -magnitude } else { magnitude } })
}

struct Integer {
    negative: bool,
    magnitude: i64,
}

fn parse_integer(bytes: &[u8]) -> Option<Integer> {
    let (negative, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, bytes),
    };
    if digits.is_empty() {
        return None;
    }
    let mut magnitude: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        magnitude = magnitude.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
    }
    Some(Integer { negative, magnitude })
}
