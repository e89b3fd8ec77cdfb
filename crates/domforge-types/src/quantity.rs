// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resource quantities such as `"8192Ki"`, `"2200m"`, or `"2.3"`.
//!
//! A quantity is a signed decimal number with an optional suffix. Binary
//! suffixes (`Ki`, `Mi`, ... `Ei`) scale by powers of 1024, decimal SI
//! suffixes (`n`, `u`, `m`, `k`, `M`, ... `E`) by powers of 1000, and an
//! `e<N>`/`E<N>` exponent by 10^N. Values are held exactly in units of
//! 10^-9 so that comparisons and conversions never go through floating
//! point.

use std::cmp::Ordering;
use std::fmt::Display;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const NANOS_PER_UNIT: i128 = 1_000_000_000;
const BYTES_PER_MIB: u64 = 1024 * 1024;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("quantity {0:?} is not a valid quantity")]
    Invalid(String),

    #[error("quantity {0:?} has an unknown suffix {1:?}")]
    UnknownSuffix(String, String),

    #[error("quantity {0:?} is too large")]
    Overflow(String),

    #[error("quantity {0:?} must not be negative")]
    Negative(String),
}

#[derive(Clone, Copy)]
enum Scale {
    Binary(u32),
    Decimal(i32),
}

fn parse_suffix(s: &str, suffix: &str) -> Result<Scale, QuantityError> {
    let scale = match suffix {
        "" => Scale::Decimal(0),
        "Ki" => Scale::Binary(10),
        "Mi" => Scale::Binary(20),
        "Gi" => Scale::Binary(30),
        "Ti" => Scale::Binary(40),
        "Pi" => Scale::Binary(50),
        "Ei" => Scale::Binary(60),
        "n" => Scale::Decimal(-9),
        "u" => Scale::Decimal(-6),
        "m" => Scale::Decimal(-3),
        "k" => Scale::Decimal(3),
        "M" => Scale::Decimal(6),
        "G" => Scale::Decimal(9),
        "T" => Scale::Decimal(12),
        "P" => Scale::Decimal(15),
        "E" => Scale::Decimal(18),
        other => {
            let exp = other
                .strip_prefix('e')
                .or_else(|| other.strip_prefix('E'))
                .and_then(|e| e.parse::<i32>().ok())
                .ok_or_else(|| {
                    QuantityError::UnknownSuffix(s.to_owned(), other.to_owned())
                })?;
            Scale::Decimal(exp)
        }
    };
    Ok(scale)
}

/// A parsed resource quantity. The string it was parsed from is preserved
/// for display and serialization.
#[derive(Clone, Debug)]
pub struct Quantity {
    repr: String,
    nanos: i128,
}

impl Quantity {
    pub fn is_negative(&self) -> bool {
        self.nanos < 0
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// The value in whole base units, rounded up.
    pub fn value(&self) -> i64 {
        let units = self.nanos.div_euclid(NANOS_PER_UNIT)
            + i128::from(self.nanos.rem_euclid(NANOS_PER_UNIT) != 0);
        units.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// The value as a byte count, truncating any fractional byte.
    pub fn to_bytes(&self) -> Result<u64, QuantityError> {
        if self.is_negative() {
            return Err(QuantityError::Negative(self.repr.clone()));
        }
        u64::try_from(self.nanos / NANOS_PER_UNIT)
            .map_err(|_| QuantityError::Overflow(self.repr.clone()))
    }

    /// The value in mebibytes, rounded to the nearest whole mebibyte. Any
    /// nonzero value below one mebibyte counts as one.
    pub fn to_mebibytes(&self) -> Result<u64, QuantityError> {
        let bytes = self.to_bytes()?;
        Ok(match bytes {
            0 => 0,
            b if b <= BYTES_PER_MIB => 1,
            b => (b + BYTES_PER_MIB / 2) / BYTES_PER_MIB,
        })
    }

    /// Divides the quantity into `divisor` equal parts and rounds the result
    /// up to a whole number, e.g. the socket count needed to hold a CPU
    /// request given a per-socket core count.
    pub fn div_ceil(&self, divisor: u32) -> Result<u32, QuantityError> {
        if self.is_negative() {
            return Err(QuantityError::Negative(self.repr.clone()));
        }
        let denom = i128::from(divisor.max(1)) * NANOS_PER_UNIT;
        let quot = (self.nanos + denom - 1) / denom;
        u32::try_from(quot)
            .map_err(|_| QuantityError::Overflow(self.repr.clone()))
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || QuantityError::Invalid(s.to_owned());
        let overflow = || QuantityError::Overflow(s.to_owned());

        let (negative, body) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };

        let num_len = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (number, suffix) = body.split_at(num_len);

        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.contains('.') {
            return Err(invalid());
        }

        let digits = format!("{whole}{frac}");
        let mantissa: i128 = digits.parse().map_err(|_| overflow())?;
        let frac_digits = u32::try_from(frac.len()).map_err(|_| overflow())?;

        let scaled = match parse_suffix(s, suffix)? {
            Scale::Binary(bits) => mantissa
                .checked_mul(1i128 << bits)
                .and_then(|v| v.checked_mul(NANOS_PER_UNIT)),
            Scale::Decimal(exp) => {
                let shift = exp + 9;
                if shift >= 0 {
                    10i128
                        .checked_pow(shift as u32)
                        .and_then(|f| mantissa.checked_mul(f))
                } else {
                    10i128
                        .checked_pow(shift.unsigned_abs())
                        .map(|f| mantissa / f)
                }
            }
        }
        .ok_or_else(overflow)?;

        let nanos = 10i128
            .checked_pow(frac_digits)
            .map(|f| scaled / f)
            .ok_or_else(overflow)?;

        Ok(Self {
            repr: s.to_owned(),
            nanos: if negative { -nanos } else { nanos },
        })
    }
}

impl Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.repr)
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Serialize for Quantity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.repr)
    }
}

impl<'d> Deserialize<'d> for Quantity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'d>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

impl JsonSchema for Quantity {
    fn schema_name() -> String {
        "Quantity".to_owned()
    }

    fn json_schema(
        generator: &mut schemars::gen::SchemaGenerator,
    ) -> schemars::schema::Schema {
        String::json_schema(generator)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    #[test]
    fn parse_suffixes() {
        assert_eq!(q("8192Ki").to_bytes().unwrap(), 8_388_608);
        assert_eq!(q("123Mi").to_bytes().unwrap(), 128_974_848);
        assert_eq!(q("1Gi").to_bytes().unwrap(), 1 << 30);
        assert_eq!(q("2G").to_bytes().unwrap(), 2_000_000_000);
        assert_eq!(q("1e3").to_bytes().unwrap(), 1000);
        assert_eq!(q("64M").to_bytes().unwrap(), 64_000_000);
    }

    #[test]
    fn fractional_bytes_truncate() {
        assert_eq!(q("2222222200m").to_bytes().unwrap(), 2_222_222);
    }

    #[test]
    fn negative_quantities_are_rejected_for_bytes() {
        let neg = q("-1Mi");
        assert!(neg.is_negative());
        assert!(matches!(neg.to_bytes(), Err(QuantityError::Negative(_))));
    }

    #[test]
    fn invalid_quantities() {
        for input in ["", "Mi", "1.2.3", "1Qi", "abc", "1..0", "-"] {
            assert!(
                input.parse::<Quantity>().is_err(),
                "expected {input:?} to be rejected"
            );
        }
    }

    #[test]
    fn mebibyte_conversion() {
        let cases = [
            ("0", 0),
            ("1", 1),
            ("1M", 1),
            ("3M", 3),
            ("100M", 95),
            ("1Mi", 1),
            ("2G", 1907),
            ("2Gi", 2048),
            ("2780Gi", 2_846_720),
        ];
        for (input, expected) in cases {
            assert_eq!(q(input).to_mebibytes().unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn cpu_values_round_up() {
        assert_eq!(q("2200m").value(), 3);
        assert_eq!(q("2.3").value(), 3);
        assert_eq!(q("400m").value(), 1);
        assert_eq!(q("2200m").div_ceil(1).unwrap(), 3);
        assert_eq!(q("4").div_ceil(2).unwrap(), 2);
        assert_eq!(q("5").div_ceil(2).unwrap(), 3);
    }

    #[test]
    fn equality_ignores_representation() {
        assert_eq!(q("1Ki"), q("1024"));
        assert!(q("1Gi") > q("1G"));
        assert_eq!(q("1024").to_string(), "1024");
    }

    proptest! {
        #[test]
        fn whole_binary_units_are_exact(
            n in 0u64..1_000_000,
            shift in 0usize..4,
        ) {
            let suffix = ["", "Ki", "Mi", "Gi"][shift];
            let parsed: Quantity = format!("{n}{suffix}").parse().unwrap();
            prop_assert_eq!(parsed.to_bytes().unwrap(), n << (10 * shift));
        }
    }
}
