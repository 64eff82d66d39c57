//! Parsing and numeric helpers shared by the loader and the metrics engine.

use chrono::NaiveDate;

/// Computes the arithmetic mean of a slice of values. Returns `None` for empty input.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Rounds half away from zero to `digits` decimal places.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    (value * scale).round() / scale
}

/// `100 * part / whole`, undefined when the denominator is zero.
pub fn percentage(part: f64, whole: f64) -> Option<f64> {
    if whole == 0.0 {
        None
    } else {
        Some(100.0 * part / whole)
    }
}

/// Parses a non-negative count, tolerating thousands separators and a
/// trailing `.0` as written by spreadsheet exports.
pub fn parse_count(s: Option<&str>) -> Option<u64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    let s = s.replace(',', "");
    if let Ok(v) = s.parse::<u64>() {
        return Some(v);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 => Some(v as u64),
        _ => None,
    }
}

pub fn parse_age(s: Option<&str>) -> Option<u16> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<u16>().ok()
}

/// Report dates come as `YYYY-MM-DD`; some snapshots use `DD/MM/YYYY`.
pub fn parse_date(s: Option<&str>) -> Option<NaiveDate> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d/%m/%Y"))
        .ok()
}
