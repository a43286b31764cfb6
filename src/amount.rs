//! Fixed-precision monetary amounts

use crate::error::ChainError;

/// Monetary value in base units. Consensus code never uses floating point.
pub type Amount = i64;

pub const COIN: Amount = 1_000_000;
pub const CENT: Amount = 10_000;
pub const MAX_MONEY: Amount = 2_000_000_000 * COIN;

/// True when `value` is a valid standalone amount.
pub fn money_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

/// Sums amounts, failing if any term or the running total leaves the money range.
pub fn checked_sum<I>(values: I) -> Option<Amount>
where
    I: IntoIterator<Item = Amount>,
{
    let mut total: Amount = 0;
    for value in values {
        if !money_range(value) {
            return None;
        }
        total = total.checked_add(value)?;
        if !money_range(total) {
            return None;
        }
    }
    Some(total)
}

/// Renders an amount as a decimal coin value, e.g. `12.500000`.
pub fn format_amount(value: Amount) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    let coin = COIN as u64;
    format!("{}{}.{:06}", sign, abs / coin, abs % coin)
}

/// Parses a decimal coin value with at most six fractional digits.
pub fn parse_amount(s: &str) -> Result<Amount, ChainError> {
    let s = s.trim();
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(ChainError::Malformed("empty amount".to_string()));
    }
    if frac.len() > 6 {
        return Err(ChainError::Malformed(format!(
            "amount {} has more than 6 decimal places",
            s
        )));
    }
    let parse = |part: &str| -> Result<i64, ChainError> {
        if part.is_empty() {
            return Ok(0);
        }
        if !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(ChainError::Malformed(format!("invalid amount: {}", s)));
        }
        part.parse::<i64>()
            .map_err(|e| ChainError::Malformed(format!("invalid amount {}: {}", s, e)))
    };
    let whole = parse(whole)?;
    let frac = parse(&format!("{:0<6}", frac))?;
    let value = whole
        .checked_mul(COIN)
        .and_then(|w| w.checked_add(frac))
        .filter(|v| money_range(*v))
        .ok_or_else(|| ChainError::Malformed(format!("amount {} out of range", s)))?;
    Ok(value)
}
