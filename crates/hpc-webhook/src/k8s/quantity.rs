//! Parsing of Kubernetes resource quantities (`500m`, `1.5`, `64Gi`, `1e3`).
//!
//! Values are computed with integer arithmetic and rounded up, which matches
//! what the API server reports through `Quantity.Value()` and
//! `Quantity.MilliValue()`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("Empty quantity")]
    Empty,
    #[error("Invalid numeric part in quantity: {0}")]
    InvalidNumber(String),
    #[error("Unsupported quantity suffix: {0}")]
    UnsupportedSuffix(String),
    #[error("Negative quantity: {0}")]
    Negative(String),
    #[error("Quantity out of range: {0}")]
    Overflow(String),
}

#[derive(Debug, Clone, Copy)]
enum Multiplier {
    /// 10^n, also covers `m` (n = -3) and explicit exponents
    Decimal(i32),
    /// 2^n
    Binary(u32),
}

#[derive(Debug)]
struct ParsedQuantity {
    mantissa: u128,
    fraction_digits: u32,
    multiplier: Multiplier,
}

/// Parse a quantity into its plain value, e.g. bytes for memory or a device
/// count for extended resources.
pub fn parse_value(value: &str) -> Result<u64, QuantityError> {
    parse(value)?.scaled(0, value)
}

/// Parse a quantity into thousandths, e.g. CPU millicores.
pub fn parse_milli_value(value: &str) -> Result<u64, QuantityError> {
    parse(value)?.scaled(3, value)
}

fn parse(value: &str) -> Result<ParsedQuantity, QuantityError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(QuantityError::Empty);
    }

    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);

    let multiplier =
        parse_suffix(suffix).ok_or_else(|| QuantityError::UnsupportedSuffix(value.to_string()))?;

    if number.starts_with('-') {
        return Err(QuantityError::Negative(value.to_string()));
    }
    let number = number.strip_prefix('+').unwrap_or(number);

    let (integer, fraction) = number.split_once('.').unwrap_or((number, ""));
    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (integer.is_empty() && fraction.is_empty()) || !is_digits(integer) || !is_digits(fraction) {
        return Err(QuantityError::InvalidNumber(value.to_string()));
    }

    let mantissa = format!("{integer}{fraction}")
        .parse::<u128>()
        .map_err(|_| QuantityError::Overflow(value.to_string()))?;

    Ok(ParsedQuantity {
        mantissa,
        fraction_digits: fraction.len() as u32,
        multiplier,
    })
}

fn parse_suffix(suffix: &str) -> Option<Multiplier> {
    let multiplier = match suffix {
        "" => Multiplier::Decimal(0),
        "m" => Multiplier::Decimal(-3),
        "k" => Multiplier::Decimal(3),
        "M" => Multiplier::Decimal(6),
        "G" => Multiplier::Decimal(9),
        "T" => Multiplier::Decimal(12),
        "P" => Multiplier::Decimal(15),
        "E" => Multiplier::Decimal(18),
        "Ki" => Multiplier::Binary(10),
        "Mi" => Multiplier::Binary(20),
        "Gi" => Multiplier::Binary(30),
        "Ti" => Multiplier::Binary(40),
        "Pi" => Multiplier::Binary(50),
        "Ei" => Multiplier::Binary(60),
        _ => {
            let exponent = suffix.strip_prefix(['e', 'E'])?;
            Multiplier::Decimal(exponent.parse::<i32>().ok()?)
        }
    };
    Some(multiplier)
}

impl ParsedQuantity {
    /// Value multiplied by `10^shift`, rounded up.
    fn scaled(&self, shift: i32, original: &str) -> Result<u64, QuantityError> {
        let overflow = || QuantityError::Overflow(original.to_string());

        let mut numerator = self.mantissa;
        let mut exponent = i32::try_from(self.fraction_digits)
            .ok()
            .and_then(|digits| shift.checked_sub(digits))
            .ok_or_else(overflow)?;
        match self.multiplier {
            Multiplier::Decimal(e) => {
                exponent = exponent.checked_add(e).ok_or_else(overflow)?;
            }
            Multiplier::Binary(bits) => {
                numerator = numerator.checked_mul(1u128 << bits).ok_or_else(overflow)?;
            }
        }

        let value = if exponent >= 0 {
            10u128
                .checked_pow(exponent as u32)
                .and_then(|factor| numerator.checked_mul(factor))
                .ok_or_else(overflow)?
        } else {
            match 10u128.checked_pow(exponent.unsigned_abs()) {
                Some(divisor) => numerator.div_ceil(divisor),
                // anything non-zero this small still rounds up to one unit
                None => u128::from(numerator > 0),
            }
        };

        u64::try_from(value).map_err(|_| overflow())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn parse_cpu_whole_and_fractional_cores() {
        assert_eq!(parse_milli_value("2").unwrap(), 2000);
        assert_eq!(parse_milli_value("1.5").unwrap(), 1500);
        assert_eq!(parse_milli_value("0.1").unwrap(), 100);
        assert_eq!(parse_milli_value(".5").unwrap(), 500);
    }

    #[test]
    fn parse_cpu_millicores() {
        assert_eq!(parse_milli_value("500m").unwrap(), 500);
        assert_eq!(parse_milli_value("7500m").unwrap(), 7500);
        assert_eq!(parse_value("500m").unwrap(), 1, "whole value rounds up");
    }

    #[test]
    fn parse_memory_binary_suffixes() {
        assert_eq!(parse_value("1Ki").unwrap(), 1024);
        assert_eq!(parse_value("128Mi").unwrap(), 128 * 1024 * 1024);
        assert_eq!(parse_value("64Gi").unwrap(), 64 * 1024 * 1024 * 1024);
        assert_eq!(parse_value("1.5Gi").unwrap(), 1_610_612_736);
        assert_eq!(parse_value("1Ti").unwrap(), 1024_u64.pow(4));
    }

    #[test]
    fn parse_memory_decimal_suffixes_and_exponents() {
        assert_eq!(parse_value("1k").unwrap(), 1_000);
        assert_eq!(parse_value("1G").unwrap(), 1_000_000_000);
        assert_eq!(parse_value("128974848").unwrap(), 128_974_848);
        assert_eq!(parse_value("129e6").unwrap(), 129_000_000);
        assert_eq!(parse_value("1E").unwrap(), 10_u64.pow(18));
        assert_eq!(parse_milli_value("1e-3").unwrap(), 1);
    }

    #[test]
    fn parse_gpu_counts() {
        assert_eq!(parse_value("0").unwrap(), 0);
        assert_eq!(parse_value("4").unwrap(), 4);
        assert_eq!(parse_value(" 2 ").unwrap(), 2);
    }

    #[test]
    fn parse_rejects_malformed_values() {
        assert_eq!(parse_value(""), Err(QuantityError::Empty));
        assert!(matches!(
            parse_value("abc"),
            Err(QuantityError::UnsupportedSuffix(_))
        ));
        assert!(matches!(
            parse_value("1Zi"),
            Err(QuantityError::UnsupportedSuffix(_))
        ));
        assert!(matches!(
            parse_value("1.2.3"),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(matches!(parse_value("."), Err(QuantityError::InvalidNumber(_))));
        assert!(matches!(parse_value("-1"), Err(QuantityError::Negative(_))));
    }

    #[test]
    fn parse_rejects_values_beyond_u64() {
        assert!(matches!(
            parse_value("100Ei"),
            Err(QuantityError::Overflow(_))
        ));
        assert!(matches!(
            parse_milli_value("1e30"),
            Err(QuantityError::Overflow(_))
        ));
    }

    #[test]
    fn parse_rejects_exponents_beyond_i32() {
        assert!(matches!(
            parse_milli_value("1e2147483647"),
            Err(QuantityError::Overflow(_))
        ));
        assert!(matches!(
            parse_value("0.5e-2147483648"),
            Err(QuantityError::Overflow(_))
        ));
    }
}
