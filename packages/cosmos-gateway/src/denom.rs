//! Exact conversion between display amounts (`"1.5"`) and base amounts
//! (`"1500000uatom"`).
//!
//! Amounts are only ever handled as digit strings. Base unit magnitudes can
//! exceed what an `f64` represents exactly, and these values are signed into
//! transactions.

use std::str::FromStr;

use cosmos_sdk_proto::cosmos::base::v1beta1::Coin;

use crate::error::DenomError;

/// Convert a display amount into a base amount with the denom appended.
///
/// `from_display_to_base("0.01", 6, "uatom")` is `"10000uatom"`. Fractional
/// digits beyond `exponent` are dropped.
pub fn from_display_to_base(amount: &str, exponent: u32, denom: &str) -> Result<String, DenomError> {
    let digits = display_to_base_digits(amount, exponent)?;
    Ok(format!("{digits}{denom}"))
}

/// Same as [from_display_to_base], without the denom suffix.
pub fn display_to_base_digits(amount: &str, exponent: u32) -> Result<String, DenomError> {
    let invalid = || DenomError::InvalidAmount {
        amount: amount.to_owned(),
    };
    let (integer, fraction) = match amount.split_once('.') {
        None => (amount, ""),
        Some((_, fraction)) if fraction.contains('.') => return Err(invalid()),
        Some(pair) => pair,
    };
    if (integer.is_empty() && fraction.is_empty()) || !is_digits(integer) || !is_digits(fraction)
    {
        return Err(invalid());
    }

    let exponent = exponent as usize;
    let mut digits = String::with_capacity(integer.len() + exponent);
    digits.push_str(integer);
    digits.extend(
        fraction
            .chars()
            .chain(std::iter::repeat('0'))
            .take(exponent),
    );
    Ok(trim_leading_zeros(&digits).to_owned())
}

/// Convert a base amount (digits only, no denom) into its display form.
///
/// `from_base_to_display("10000", 6)` is `"0.01"`, and `"0"` stays `"0"`.
pub fn from_base_to_display(amount: &str, exponent: u32) -> Result<String, DenomError> {
    if amount.is_empty() || !is_digits(amount) {
        return Err(DenomError::InvalidAmount {
            amount: amount.to_owned(),
        });
    }
    let amount = trim_leading_zeros(amount);
    if amount == "0" {
        return Ok(amount.to_owned());
    }

    let exponent = exponent as usize;
    let padded = if amount.len() <= exponent {
        let mut padded = "0".repeat(exponent + 1 - amount.len());
        padded.push_str(amount);
        padded
    } else {
        amount.to_owned()
    };
    let (integer, fraction) = padded.split_at(padded.len() - exponent);
    let fraction = fraction.trim_end_matches('0');
    Ok(if fraction.is_empty() {
        integer.to_owned()
    } else {
        format!("{integer}.{fraction}")
    })
}

/// Add two base amounts without going through a fixed width integer.
pub fn add_amounts(left: &str, right: &str) -> Result<String, DenomError> {
    for amount in [left, right] {
        if amount.is_empty() || !is_digits(amount) {
            return Err(DenomError::InvalidAmount {
                amount: amount.to_owned(),
            });
        }
    }

    let mut left = left.bytes().rev();
    let mut right = right.bytes().rev();
    let mut carry = 0;
    let mut reversed = Vec::new();
    loop {
        let (l, r) = (left.next(), right.next());
        if l.is_none() && r.is_none() {
            break;
        }
        let sum = l.map_or(0, |b| b - b'0') + r.map_or(0, |b| b - b'0') + carry;
        reversed.push(b'0' + sum % 10);
        carry = sum / 10;
    }
    if carry > 0 {
        reversed.push(b'0' + carry);
    }
    let digits: String = reversed.into_iter().rev().map(char::from).collect();
    Ok(trim_leading_zeros(&digits).to_owned())
}

/// Multiply a base amount by a decimal factor, rounding half up to a whole
/// base amount.
///
/// The factor is taken at its shortest decimal form, so
/// `scale_amount("130000", 0.0025)` is exactly `"325"`.
pub fn scale_amount(amount: &str, factor: f64) -> Result<String, DenomError> {
    if !factor.is_finite() || factor < 0.0 {
        return Err(DenomError::InvalidAmount {
            amount: factor.to_string(),
        });
    }
    let factor = factor.to_string();
    let (integer, fraction) = factor.split_once('.').unwrap_or((&factor, ""));
    let product = mul_amounts(amount, &format!("{integer}{fraction}"))?;

    let scale = fraction.len();
    let padded = format!("{product:0>width$}", width = scale + 1);
    let (whole, dropped) = padded.split_at(padded.len() - scale);
    let whole = trim_leading_zeros(whole);
    if dropped.starts_with(['5', '6', '7', '8', '9']) {
        add_amounts(whole, "1")
    } else {
        Ok(whole.to_owned())
    }
}

fn mul_amounts(left: &str, right: &str) -> Result<String, DenomError> {
    for amount in [left, right] {
        if amount.is_empty() || !is_digits(amount) {
            return Err(DenomError::InvalidAmount {
                amount: amount.to_owned(),
            });
        }
    }

    let mut reversed = vec![0u32; left.len() + right.len()];
    for (i, l) in left.bytes().rev().enumerate() {
        let mut carry = 0;
        for (j, r) in right.bytes().rev().enumerate() {
            let value = reversed[i + j] + u32::from(l - b'0') * u32::from(r - b'0') + carry;
            reversed[i + j] = value % 10;
            carry = value / 10;
        }
        reversed[i + right.len()] += carry;
    }
    let digits: String = reversed
        .into_iter()
        .rev()
        .map(|digit| char::from(b'0' + digit as u8))
        .collect();
    Ok(trim_leading_zeros(&digits).to_owned())
}

/// A coin parsed from its `<amount><denom>` string form.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct ParsedCoin {
    pub denom: String,
    pub amount: String,
}

impl From<ParsedCoin> for Coin {
    fn from(ParsedCoin { denom, amount }: ParsedCoin) -> Self {
        Coin { denom, amount }
    }
}

impl FromStr for ParsedCoin {
    type Err = DenomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DenomError::InvalidCoin { coin: s.to_owned() };
        let idx = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        let (amount, denom) = s.split_at(idx);
        if amount.is_empty() || denom.is_empty() {
            return Err(invalid());
        }
        Ok(ParsedCoin {
            denom: denom.to_owned(),
            amount: trim_leading_zeros(amount).to_owned(),
        })
    }
}

fn is_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

fn trim_leading_zeros(digits: &str) -> &str {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0"
    } else {
        trimmed
    }
}
