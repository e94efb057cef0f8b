//! Arbitrary precision numbers in the base-10000 wire form.
//!
//! A number is `sum(digits[i] * 10000^(weight - i))`, optionally negated.
//! `Decimal` additionally records `decimal_digits`, the number of decimal
//! (base-10) digits after the point.

use num_bigint::Sign;
use num_traits::{ToPrimitive, Zero};

use super::OutOfRangeError;

const BASE: u32 = 10000;

/// An integer of arbitrary magnitude (`std::bigint`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigInt {
    pub(crate) negative: bool,
    pub(crate) weight: i16,
    pub(crate) digits: Vec<u16>,
}

/// An arbitrary precision number (`std::decimal`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decimal {
    pub(crate) negative: bool,
    pub(crate) weight: i16,
    pub(crate) decimal_digits: u16,
    pub(crate) digits: Vec<u16>,
}

impl BigInt {
    pub(crate) fn normalize(mut self) -> BigInt {
        while let Some(0) = self.digits.last() {
            self.digits.pop();
        }
        while let Some(0) = self.digits.first() {
            self.digits.remove(0);
            self.weight -= 1;
        }
        if self.digits.is_empty() {
            self.weight = 0;
            self.negative = false;
        }
        self
    }
    pub fn is_negative(&self) -> bool {
        self.negative
    }
}

impl From<u64> for BigInt {
    fn from(value: u64) -> BigInt {
        let mut digits = Vec::new();
        let mut value = value;
        while value > 0 {
            digits.push((value % BASE as u64) as u16);
            value /= BASE as u64;
        }
        digits.reverse();
        BigInt {
            negative: false,
            weight: digits.len().saturating_sub(1) as i16,
            digits,
        }
        .normalize()
    }
}

impl From<i64> for BigInt {
    fn from(value: i64) -> BigInt {
        let mut result = BigInt::from(value.unsigned_abs());
        result.negative = value < 0;
        result.normalize()
    }
}

impl From<u32> for BigInt {
    fn from(value: u32) -> BigInt {
        BigInt::from(value as u64)
    }
}

impl From<i32> for BigInt {
    fn from(value: i32) -> BigInt {
        BigInt::from(value as i64)
    }
}

impl From<num_bigint::BigInt> for BigInt {
    fn from(value: num_bigint::BigInt) -> BigInt {
        let negative = value.sign() == Sign::Minus;
        let mut abs = value.magnitude().clone();
        let mut digits = Vec::new();
        let base = num_bigint::BigUint::from(BASE);
        while !abs.is_zero() {
            let group = (&abs % &base).to_u16().expect("mod 10000 fits u16");
            digits.push(group);
            abs /= &base;
        }
        digits.reverse();
        BigInt {
            negative,
            weight: digits.len().saturating_sub(1) as i16,
            digits,
        }
        .normalize()
    }
}

impl From<&BigInt> for num_bigint::BigInt {
    fn from(value: &BigInt) -> num_bigint::BigInt {
        let mut result = num_bigint::BigInt::from(0);
        let base = num_bigint::BigInt::from(BASE);
        for &digit in &value.digits {
            result = result * &base + digit;
        }
        // weight counts groups above the last stored one
        let extra = value.weight as i64 + 1 - value.digits.len() as i64;
        for _ in 0..extra.max(0) {
            result *= &base;
        }
        if value.negative {
            -result
        } else {
            result
        }
    }
}

impl From<BigInt> for num_bigint::BigInt {
    fn from(value: BigInt) -> num_bigint::BigInt {
        (&value).into()
    }
}

impl TryFrom<&BigInt> for i64 {
    type Error = OutOfRangeError;
    fn try_from(value: &BigInt) -> Result<i64, OutOfRangeError> {
        num_bigint::BigInt::from(value)
            .to_i64()
            .ok_or(OutOfRangeError)
    }
}

impl std::fmt::Display for BigInt {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", num_bigint::BigInt::from(self))
    }
}

impl Decimal {
    pub(crate) fn normalize(mut self) -> Decimal {
        while let Some(0) = self.digits.last() {
            self.digits.pop();
        }
        while let Some(0) = self.digits.first() {
            self.digits.remove(0);
            self.weight -= 1;
        }
        if self.digits.is_empty() {
            self.weight = 0;
            self.negative = false;
        }
        self
    }
    pub fn decimal_digits(&self) -> u16 {
        self.decimal_digits
    }
}

impl From<BigInt> for Decimal {
    fn from(value: BigInt) -> Decimal {
        Decimal {
            negative: value.negative,
            weight: value.weight,
            decimal_digits: 0,
            digits: value.digits,
        }
    }
}

impl From<bigdecimal::BigDecimal> for Decimal {
    fn from(value: bigdecimal::BigDecimal) -> Decimal {
        let (mut unscaled, mut scale) = value.into_bigint_and_exponent();
        if scale < 0 {
            // a negative exponent means a whole number scaled up
            unscaled *= num_bigint::BigInt::from(10u32).pow((-scale) as u32);
            scale = 0;
        }
        let decimal_digits = scale.min(u16::MAX as i64) as u16;
        // pad the fractional part to whole base-10000 groups
        let pad = ((4 - scale.rem_euclid(4)) % 4) as u32;
        if pad > 0 {
            unscaled *= num_bigint::BigInt::from(10u32).pow(pad);
        }
        let fractional_groups = ((scale + pad as i64) / 4) as i64;
        let negative = unscaled.sign() == Sign::Minus;
        let mut abs = unscaled.magnitude().clone();
        let mut digits = Vec::new();
        let base = num_bigint::BigUint::from(BASE);
        while !abs.is_zero() {
            let group = (&abs % &base).to_u16().expect("mod 10000 fits u16");
            digits.push(group);
            abs /= &base;
        }
        digits.reverse();
        let weight = (digits.len() as i64 - fractional_groups - 1) as i16;
        Decimal {
            negative,
            weight,
            decimal_digits,
            digits,
        }
        .normalize()
    }
}

impl From<&Decimal> for bigdecimal::BigDecimal {
    fn from(value: &Decimal) -> bigdecimal::BigDecimal {
        let mut unscaled = num_bigint::BigInt::from(0);
        let base = num_bigint::BigInt::from(BASE);
        for &digit in &value.digits {
            unscaled = unscaled * &base + digit;
        }
        if value.negative {
            unscaled = -unscaled;
        }
        // exponent of the least significant stored group, in decimal digits
        let exp10 = 4 * (value.weight as i64 + 1 - value.digits.len() as i64);
        let result = bigdecimal::BigDecimal::new(unscaled, -exp10);
        result.with_scale(value.decimal_digits as i64)
    }
}

impl From<Decimal> for bigdecimal::BigDecimal {
    fn from(value: Decimal) -> bigdecimal::BigDecimal {
        (&value).into()
    }
}

impl std::fmt::Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", bigdecimal::BigDecimal::from(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn bigint_zero() {
        let zero = BigInt::from(0i64);
        assert_eq!(zero.digits, Vec::<u16>::new());
        assert_eq!(zero.weight, 0);
        assert!(!zero.negative);
    }

    #[test]
    fn bigint_round_trip() {
        for value in [1i64, -1, 9999, 10000, -10001, 123_4567_8901, i64::MAX] {
            let wire = BigInt::from(value);
            assert_eq!(i64::try_from(&wire), Ok(value), "value {value}");
        }
    }

    #[test]
    fn bigint_groups() {
        let n = BigInt::from(123_4567_8901i64);
        assert_eq!(n.digits, vec![123, 4567, 8901]);
        assert_eq!(n.weight, 2);
    }

    #[test]
    fn bigint_trailing_zero_groups() {
        // 1_0000_0000 stores a single group with weight 2
        let n = BigInt::from(1_0000_0000i64);
        assert_eq!(n.digits, vec![1]);
        assert_eq!(n.weight, 2);
        assert_eq!(
            num_bigint::BigInt::from(&n),
            num_bigint::BigInt::from(1_0000_0000i64)
        );
    }

    #[test]
    fn decimal_round_trip() {
        for text in ["0", "1.5", "-1.5", "12345.6789", "0.00004", "10000.0000"] {
            let dec = bigdecimal::BigDecimal::from_str(text).unwrap();
            let wire = Decimal::from(dec.clone());
            assert_eq!(bigdecimal::BigDecimal::from(&wire), dec, "value {text}");
        }
    }

    #[test]
    fn decimal_scale() {
        let dec = bigdecimal::BigDecimal::from_str("1.5").unwrap();
        let wire = Decimal::from(dec);
        assert_eq!(wire.decimal_digits, 1);
        assert_eq!(wire.digits, vec![1, 5000]);
        assert_eq!(wire.weight, 0);
    }
}
