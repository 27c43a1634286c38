//! UTF-8 boundary analysis and char-class specifications.
//!
//! Streamed model output can end mid-codepoint, so the engine decodes
//! scalars directly from the byte buffer and distinguishes a truncated
//! sequence (more bytes may arrive) from a malformed one (no continuation
//! can repair it). The distinction is what lets a partial parse report
//! `NeedMoreInput` instead of `Fail` at the buffer edge.

/// Outcome of decoding one scalar at a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Utf8Step {
    /// A complete, well-formed scalar value occupying `len` bytes.
    Scalar { cp: u32, len: usize },
    /// A well-formed prefix cut short by the end of the buffer.
    Incomplete,
    /// A sequence no additional bytes can make valid.
    Malformed,
}

/// Decodes the scalar starting at `bytes[0]`.
///
/// Rejects overlong encodings, surrogate codepoints, and values above
/// U+10FFFF as `Malformed`. A truncated sequence is `Incomplete` only while
/// some continuation could still complete it; a prefix no continuation can
/// repair (`C0`, `ED A0`, `F4 90`, ...) is `Malformed` at the earliest
/// decisive byte. An empty slice is `Incomplete`.
pub fn decode(bytes: &[u8]) -> Utf8Step {
    let Some(&lead) = bytes.first() else {
        return Utf8Step::Incomplete;
    };
    // Each lead byte constrains the second byte to a window narrower than
    // the generic 0x80..=0xBF where overlongs, surrogates, or codepoints
    // past U+10FFFF would otherwise slip through.
    let (len, mut cp, second) = match lead {
        0x00..=0x7F => return Utf8Step::Scalar { cp: lead as u32, len: 1 },
        0xC2..=0xDF => (2, (lead & 0x1F) as u32, 0x80..=0xBF),
        0xE0 => (3, 0, 0xA0..=0xBF),
        0xE1..=0xEC | 0xEE..=0xEF => (3, (lead & 0x0F) as u32, 0x80..=0xBF),
        0xED => (3, 0x0D, 0x80..=0x9F),
        0xF0 => (4, 0, 0x90..=0xBF),
        0xF1..=0xF3 => (4, (lead & 0x07) as u32, 0x80..=0xBF),
        0xF4 => (4, 0x04, 0x80..=0x8F),
        // 0xC0/0xC1 can only encode overlongs; continuation bytes and
        // 0xF5..=0xFF cannot lead.
        _ => return Utf8Step::Malformed,
    };
    for i in 1..len {
        let Some(&b) = bytes.get(i) else {
            return Utf8Step::Incomplete;
        };
        let ok = if i == 1 { second.contains(&b) } else { b & 0xC0 == 0x80 };
        if !ok {
            return Utf8Step::Malformed;
        }
        cp = (cp << 6) | (b & 0x3F) as u32;
    }
    Utf8Step::Scalar { cp, len }
}

/// True when `cp` falls inside one of the inclusive `ranges`.
pub fn class_contains(ranges: &[(u32, u32)], cp: u32) -> bool {
    ranges.iter().any(|&(lo, hi)| lo <= cp && cp <= hi)
}

/// Parses a char-class specification like `[a-z0-9_]` into inclusive
/// codepoint ranges.
///
/// Brackets are optional. Escapes: `\n` `\t` `\r` `\\` `\-` `\[` `\]`,
/// `\uXXXX`, and `\UXXXXXXXX`. An unescaped `-` between two items forms a
/// range; a trailing `-` is a literal dash.
pub fn parse_class_spec(spec: &str) -> Result<Vec<(u32, u32)>, String> {
    let body = spec
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(spec);

    #[derive(Clone, Copy, PartialEq)]
    enum Token {
        Cp(u32),
        Dash,
    }

    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let esc = chars
                    .next()
                    .ok_or_else(|| format!("dangling escape in class spec '{spec}'"))?;
                let cp = match esc {
                    'n' => '\n' as u32,
                    't' => '\t' as u32,
                    'r' => '\r' as u32,
                    '\\' | '-' | '[' | ']' => esc as u32,
                    'u' => parse_hex_escape(&mut chars, 4, spec)?,
                    'U' => parse_hex_escape(&mut chars, 8, spec)?,
                    other => return Err(format!("unknown escape '\\{other}' in class spec '{spec}'")),
                };
                tokens.push(Token::Cp(cp));
            }
            '-' => tokens.push(Token::Dash),
            c => tokens.push(Token::Cp(c as u32)),
        }
    }

    let mut ranges = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            Token::Cp(lo) => {
                if tokens.get(i + 1) == Some(&Token::Dash)
                    && matches!(tokens.get(i + 2), Some(Token::Cp(_)))
                {
                    let Token::Cp(hi) = tokens[i + 2] else { unreachable!() };
                    if lo > hi {
                        return Err(format!("inverted range in class spec '{spec}'"));
                    }
                    ranges.push((lo, hi));
                    i += 3;
                } else {
                    ranges.push((lo, lo));
                    i += 1;
                }
            }
            // A dash not consumed by a range is a literal.
            Token::Dash => {
                ranges.push(('-' as u32, '-' as u32));
                i += 1;
            }
        }
    }
    if ranges.is_empty() {
        return Err(format!("empty class spec '{spec}'"));
    }
    Ok(ranges)
}

fn parse_hex_escape(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    digits: usize,
    spec: &str,
) -> Result<u32, String> {
    let mut cp = 0u32;
    for _ in 0..digits {
        let d = chars
            .next()
            .and_then(|c| c.to_digit(16))
            .ok_or_else(|| format!("truncated hex escape in class spec '{spec}'"))?;
        cp = (cp << 4) | d;
    }
    if cp > 0x10FFFF || (0xD800..=0xDFFF).contains(&cp) {
        return Err(format!("escape out of scalar range in class spec '{spec}'"));
    }
    Ok(cp)
}
