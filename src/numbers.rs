//! Fast number parsing over [`CharBuffer`] views
//!
//! Timer files consist almost entirely of plain non-negative decimal
//! integers, so the fast path accumulates ASCII digits directly. Anything
//! else (signs, exponents, whitespace, overflow, garbage) is handed to the
//! standard library parser applied to the full text, which keeps the results
//! and the errors identical to `str::parse`.

use std::str::FromStr;

use crate::buffer::CharBuffer;
use crate::error::NumberFormatError;

/// Digits accepted by the double fast path. Keeps the accumulated mantissa
/// exact in a `u64`.
const MAX_FAST_DOUBLE_DIGITS: usize = 18;

/// `MULTIPLIERS[k] == 10^-k`, indexed by the number of fractional digits.
const MULTIPLIERS: [f64; MAX_FAST_DOUBLE_DIGITS + 1] = [
    1.0, 1e-1, 1e-2, 1e-3, 1e-4, 1e-5, 1e-6, 1e-7, 1e-8, 1e-9, 1e-10, 1e-11, 1e-12, 1e-13, 1e-14,
    1e-15, 1e-16, 1e-17, 1e-18,
];

pub fn parse_int(text: &CharBuffer) -> Result<i32, NumberFormatError> {
    match accumulate_digits(text.as_chars()).and_then(|v| i32::try_from(v).ok()) {
        Some(value) => Ok(value),
        None => fallback(text),
    }
}

pub fn parse_long(text: &CharBuffer) -> Result<i64, NumberFormatError> {
    match accumulate_digits(text.as_chars()).and_then(|v| i64::try_from(v).ok()) {
        Some(value) => Ok(value),
        None => fallback(text),
    }
}

/// Parse a decimal double. The fast path handles digits with at most one
/// decimal point and is exact up to the rounding of the final scaling step.
pub fn parse_double(text: &CharBuffer) -> Result<f64, NumberFormatError> {
    match fast_double(text.as_chars()) {
        Some(value) => Ok(value),
        None => fallback(text),
    }
}

/// `true` for any capitalization of "true", `false` for everything else.
pub fn parse_bool(text: &CharBuffer) -> bool {
    let chars = text.as_chars();
    if chars.len() != 4 {
        return false;
    }
    if chars == ['t', 'r', 'u', 'e'] {
        return true;
    }
    chars
        .iter()
        .zip(['t', 'r', 'u', 'e'])
        .all(|(c, expected)| c.to_ascii_lowercase() == expected)
}

/// Digit-only accumulation. `None` means "use the fallback": empty input, a
/// non-digit, or `u64` overflow.
fn accumulate_digits(chars: &[char]) -> Option<u64> {
    if chars.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for &c in chars {
        if !c.is_ascii_digit() {
            return None;
        }
        let digit = c as u64 - '0' as u64;
        value = value.checked_mul(10)?.checked_add(digit)?;
    }
    Some(value)
}

fn fast_double(chars: &[char]) -> Option<f64> {
    match chars.first() {
        Some(c) if c.is_ascii_digit() => {}
        _ => return None,
    }

    let mut value: u64 = 0;
    let mut digits = 0;
    let mut dot: Option<usize> = None;

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_digit() {
            digits += 1;
            if digits > MAX_FAST_DOUBLE_DIGITS {
                return None;
            }
            value = value * 10 + (c as u64 - '0' as u64);
        } else if c == '.' && dot.is_none() {
            dot = Some(i);
        } else {
            return None;
        }
    }

    match dot {
        None => Some(value as f64),
        Some(pos) => Some(value as f64 * MULTIPLIERS[chars.len() - pos - 1]),
    }
}

fn fallback<T>(text: &CharBuffer) -> Result<T, NumberFormatError>
where
    T: FromStr,
    T::Err: ToString,
{
    let s = text.to_text();
    s.parse::<T>().map_err(|e| NumberFormatError::new(s, e))
}
