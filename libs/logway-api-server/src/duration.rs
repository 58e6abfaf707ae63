//! Duration strings: one or more `<number><unit>` pairs, e.g. `100ms`,
//! `1.5s`, `2h45m`.
//!
//! Units: `ns`, `us` (`µs`, `μs`), `ms`, `s`, `m`, `h`. Every number needs a
//! unit, `0` included. Negative values are rejected.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("negative duration {0:?}")]
    Negative(String),

    #[error("expected a number in {0:?}")]
    InvalidNumber(String),

    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("duration {0:?} out of range")]
    Overflow(String),
}

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Fraction digits past this precision cannot change the result.
const MAX_FRACTION_DIGITS: usize = 20;

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3600 * NANOS_PER_SEC),
        _ => None,
    }
}

fn leading_digits(s: &str) -> usize {
    s.bytes().take_while(u8::is_ascii_digit).count()
}

pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    if input.starts_with('-') {
        return Err(DurationError::Negative(input.to_string()));
    }
    let mut rest = input.strip_prefix('+').unwrap_or(input);
    if rest.is_empty() {
        return Err(DurationError::Empty);
    }

    let overflow = || DurationError::Overflow(input.to_string());
    let mut total: u128 = 0;

    while !rest.is_empty() {
        let (int_digits, tail) = rest.split_at(leading_digits(rest));
        let (frac_digits, tail) = match tail.strip_prefix('.') {
            Some(after_dot) => after_dot.split_at(leading_digits(after_dot)),
            None => ("", tail),
        };
        if int_digits.is_empty() && frac_digits.is_empty() {
            return Err(DurationError::InvalidNumber(input.to_string()));
        }

        let unit_len = tail
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        if unit.is_empty() {
            return Err(DurationError::MissingUnit(input.to_string()));
        }
        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;

        if !int_digits.is_empty() {
            let whole: u128 = int_digits.parse().map_err(|_| overflow())?;
            let nanos = whole.checked_mul(scale).ok_or_else(overflow)?;
            total = total.checked_add(nanos).ok_or_else(overflow)?;
        }

        let frac_digits = &frac_digits[..frac_digits.len().min(MAX_FRACTION_DIGITS)];
        if !frac_digits.is_empty() {
            let numerator: u128 = frac_digits.parse().map_err(|_| overflow())?;
            let denominator = 10u128.pow(frac_digits.len() as u32);
            total = total
                .checked_add(numerator * scale / denominator)
                .ok_or_else(overflow)?;
        }

        rest = tail;
    }

    let nanos = u64::try_from(total).map_err(|_| overflow())?;
    Ok(Duration::from_nanos(nanos))
}
