//! Lexical helpers: identifier extraction and C-style number scanning.
//!
//! The grammar is line oriented and simple enough that the parser works
//! directly on byte slices; these two helpers are the only shared scanning
//! machinery.

/// Split off the first identifier of `buf`.
///
/// Skips leading ASCII whitespace, then takes the maximal run of
/// `[A-Za-z0-9_]`. Returns the number of bytes skipped and the identifier
/// slice (possibly empty) into `buf`; the remainder of the line starts at
/// `skipped + ident.len()`.
pub fn read_identifier(buf: &[u8]) -> (usize, &[u8]) {
    let skipped = buf
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();
    let rest = &buf[skipped..];
    let len = rest
        .iter()
        .take_while(|&&b| b.is_ascii_alphanumeric() || b == b'_')
        .count();
    (skipped, &rest[..len])
}

/// Scan a signed integer with C `%li` radix rules: optional sign, `0x`/`0X`
/// hex, a leading `0` selects octal, decimal otherwise.
///
/// Scanning stops at the first byte that is not a digit of the chosen radix;
/// trailing text is ignored, matching `sscanf`. Returns `None` when no digit
/// was consumed. Values wrap on overflow rather than failing.
pub fn parse_number(buf: &[u8]) -> Option<i64> {
    let mut rest = {
        let ws = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
        &buf[ws..]
    };

    let negative = match rest.first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };

    let radix: i64;
    if rest.starts_with(b"0x") || rest.starts_with(b"0X") {
        rest = &rest[2..];
        radix = 16;
    } else if rest.first() == Some(&b'0') {
        radix = 8;
    } else {
        radix = 10;
    }

    let mut value: i64 = 0;
    let mut digits = 0;
    for &byte in rest {
        let digit = match byte {
            b'0'..=b'9' => i64::from(byte - b'0'),
            b'a'..=b'f' => i64::from(byte - b'a') + 10,
            b'A'..=b'F' => i64::from(byte - b'A') + 10,
            _ => break,
        };
        if digit >= radix {
            break;
        }
        value = value.wrapping_mul(radix).wrapping_add(digit);
        digits += 1;
    }
    if digits == 0 {
        return None;
    }
    Some(if negative { value.wrapping_neg() } else { value })
}
