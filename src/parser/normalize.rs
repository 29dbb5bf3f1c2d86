use crate::schema::Normalize;

/// Canonical form of a raw slice, or `None` when it cannot be read under `rule`.
pub fn apply(rule: Normalize, raw: &str) -> Option<String> {
    match rule {
        Normalize::Integer => integer(raw),
        Normalize::Percentage => percentage(raw),
        Normalize::Decimal => decimal(raw),
    }
}

/// Drops thousands separators: `"1,234"` -> `"1234"`, `""` -> `"0"`.
pub fn integer(raw: &str) -> Option<String> {
    let digits: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if digits.is_empty() {
        return Some("0".to_string());
    }
    digits.parse::<i64>().ok().map(|n| n.to_string())
}

/// `"12.3%"` -> `"0.1230"`, `""` -> `"0.0"`. A value without its `%` is a miss.
pub fn percentage(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some("0.0".to_string());
    }
    let number = raw.strip_suffix('%')?.trim();
    let value = number.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(format!("{:.4}", value / 100.0))
}

/// Keeps the page's own digits (`"37.8"` stays `"37.8"`) once they parse as a finite number.
pub fn decimal(raw: &str) -> Option<String> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|_| cleaned)
}
