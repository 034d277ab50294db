//! Locale-aware value normalization.
//!
//! The portal renders money as `R$ 1.234.567,89` (dot thousands, comma
//! decimals) and dates as `d/m/Y`. Everything here is a pure total function:
//! unparseable input yields `None`, never an error.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::types::MoneyValue;

lazy_static! {
    // First run of digits mixed with separators, e.g. "1.234.567,89"
    static ref AMOUNT_RUN: Regex = Regex::new(r"\d[\d.,]*").unwrap();

    // Amounts shaped like "12,50" mark a cell as monetary even without "R$"
    static ref DECIMAL_COMMA: Regex = Regex::new(r"\d+,\d{2}(\D|$)").unwrap();

    // The portal's marker for withheld amounts
    static ref CONFIDENTIAL: Regex = Regex::new(r"(?i)sigiloso").unwrap();

    static ref DATE: Regex = Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4}|\d{2})$").unwrap();

    static ref INTEGER: Regex = Regex::new(r"\d+").unwrap();
}

/// Parses a Brazilian-formatted currency fragment into a decimal.
///
/// Separator rule: with a comma present, everything before the last comma is
/// thousands-grouped (dots dropped) and what follows is the fraction; without
/// a comma, dots are thousands separators.
pub fn parse_currency(text: &str) -> Option<Decimal> {
    let run = AMOUNT_RUN.find(text)?.as_str();

    let normalized = match run.rfind(',') {
        Some(pos) => {
            let (int_part, frac_part) = run.split_at(pos);
            let int_digits: String =
                int_part.chars().filter(|c| c.is_ascii_digit()).collect();
            let frac_digits: String = frac_part[1..]
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect();
            if frac_digits.is_empty() {
                int_digits
            } else {
                format!("{int_digits}.{frac_digits}")
            }
        }
        None => run.chars().filter(|c| c.is_ascii_digit()).collect(),
    };

    if normalized.is_empty() {
        return None;
    }
    Decimal::from_str(&normalized).ok()
}

/// Parses a monetary fragment, honoring the confidential marker.
pub fn parse_money(text: &str) -> Option<MoneyValue> {
    if CONFIDENTIAL.is_match(text) {
        return Some(MoneyValue::Confidential);
    }
    parse_currency(text).map(MoneyValue::Amount)
}

/// Parses a `d/m/Y` fragment (1-2 digit day/month, 2- or 4-digit year) into
/// an ISO calendar date. Two-digit years are 2000-based. Anything else,
/// including impossible calendar dates, is `None`.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let captures = DATE.captures(text.trim())?;
    let day: u32 = captures[1].parse().ok()?;
    let month: u32 = captures[2].parse().ok()?;
    let mut year: i32 = captures[3].parse().ok()?;
    if year < 100 {
        year += 2000;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// First standalone run of digits, used when scanning cells for a quantity.
pub fn first_integer(text: &str) -> Option<i64> {
    INTEGER.find(text)?.as_str().parse().ok()
}

/// True when a fragment carries a currency marker or a decimal-comma amount.
pub fn looks_like_currency(text: &str) -> bool {
    text.contains("R$") || text.contains("r$") || DECIMAL_COMMA.is_match(text)
}
