use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

fn strip_suffix_ci<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let cut = s.len().checked_sub(suffix.len())?;
    if s.is_char_boundary(cut) && s[cut..].eq_ignore_ascii_case(suffix) {
        Some(&s[..cut])
    } else {
        None
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

fn strip_sign(s: &str) -> (bool, &str) {
    if let Some(rest) = s.strip_prefix('-') {
        (true, rest.trim_start())
    } else if let Some(rest) = s.strip_prefix('+') {
        (false, rest.trim_start())
    } else {
        (false, s)
    }
}

/// Parse a statement amount into signed minor units (cents).
///
/// Accepts `R`/`ZAR` prefixes, space or comma thousands separators,
/// parenthesised negatives, trailing `Cr`/`Dr` markers and a lone decimal
/// comma (`1234,56`). Sub-cent precision is rejected rather than rounded.
pub fn parse_minor_units(raw: &str) -> Result<i64, String> {
    let original = raw;
    let mut s = raw.trim().trim_matches('"').trim();
    if s.is_empty() {
        return Err("empty amount".to_string());
    }

    let mut negative = false;
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        negative = true;
        s = inner.trim();
    }
    if let Some(rest) = strip_suffix_ci(s, "cr") {
        s = rest.trim_end();
    } else if let Some(rest) = strip_suffix_ci(s, "dr") {
        negative = true;
        s = rest.trim_end();
    }

    let (neg_outer, rest) = strip_sign(s);
    s = rest;
    if let Some(rest) = strip_prefix_ci(s, "zar").or_else(|| strip_prefix_ci(s, "r")) {
        s = rest.trim_start();
    }
    let (neg_inner, rest) = strip_sign(s);
    s = rest;
    negative ^= neg_outer ^ neg_inner;

    let mut digits: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    let commas = digits.matches(',').count();
    let lone_decimal_comma = commas == 1
        && !digits.contains('.')
        && digits.rsplit(',').next().map_or(false, |tail| tail.len() == 2);
    if lone_decimal_comma {
        digits = digits.replace(',', ".");
    } else {
        digits = digits.replace(',', "");
    }

    let value = Decimal::from_str(&digits)
        .map_err(|_| format!("unparseable amount '{}'", original.trim()))?;
    let cents = value
        .checked_mul(Decimal::from(100))
        .ok_or_else(|| format!("amount '{}' is out of range", original.trim()))?;
    if !cents.fract().is_zero() {
        return Err(format!("amount '{}' has sub-cent precision", original.trim()));
    }
    let cents = cents
        .to_i64()
        .ok_or_else(|| format!("amount '{}' is out of range", original.trim()))?;
    // i64::MIN is excluded so callers can take `abs()` freely.
    let signed = if negative { cents.checked_neg() } else { Some(cents) };
    match signed {
        Some(v) if v != i64::MIN => Ok(v),
        _ => Err(format!("amount '{}' is out of range", original.trim())),
    }
}

/// Format minor units for display: R1,234.56 / -R50.00
pub fn money(cents: i64) -> String {
    let negative = cents < 0;
    let abs = cents.unsigned_abs();
    let int_part = (abs / 100).to_string();
    let dec_part = abs % 100;

    let mut with_commas = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    let with_commas: String = with_commas.chars().rev().collect();

    if negative {
        format!("-R{with_commas}.{dec_part:02}")
    } else {
        format!("R{with_commas}.{dec_part:02}")
    }
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_amounts() {
        assert_eq!(parse_minor_units("50.00"), Ok(5000));
        assert_eq!(parse_minor_units("  -42.50  "), Ok(-4250));
        assert_eq!(parse_minor_units("0"), Ok(0));
        assert_eq!(parse_minor_units("200"), Ok(20000));
        assert_eq!(parse_minor_units("0.1"), Ok(10));
    }

    #[test]
    fn test_parse_thousands_separators() {
        assert_eq!(parse_minor_units("1,234.56"), Ok(123456));
        assert_eq!(parse_minor_units("\"2,000.00\""), Ok(200000));
        assert_eq!(parse_minor_units("12 345.67"), Ok(1234567));
        assert_eq!(parse_minor_units("12\u{a0}345.67"), Ok(1234567));
    }

    #[test]
    fn test_parse_decimal_comma() {
        assert_eq!(parse_minor_units("1234,56"), Ok(123456));
        assert_eq!(parse_minor_units("1,234"), Ok(123400));
    }

    #[test]
    fn test_parse_currency_prefix() {
        assert_eq!(parse_minor_units("R1,234.56"), Ok(123456));
        assert_eq!(parse_minor_units("-R50.00"), Ok(-5000));
        assert_eq!(parse_minor_units("R -50.00"), Ok(-5000));
        assert_eq!(parse_minor_units("ZAR 99.99"), Ok(9999));
    }

    #[test]
    fn test_parse_negative_markers() {
        assert_eq!(parse_minor_units("(500.00)"), Ok(-50000));
        assert_eq!(parse_minor_units("150.00 Dr"), Ok(-15000));
        assert_eq!(parse_minor_units("150.00Cr"), Ok(15000));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_minor_units("").is_err());
        assert!(parse_minor_units("not_a_number").is_err());
        assert!(parse_minor_units("1.005").unwrap_err().contains("sub-cent"));
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        let err = parse_minor_units("79228162514264337593543950335").unwrap_err();
        assert!(err.contains("out of range"));
        assert!(parse_minor_units("900000000000000000.00").unwrap_err().contains("out of range"));
        assert!(parse_minor_units("-92233720368547758.08").is_err());
    }

    #[test]
    fn test_no_float_drift() {
        assert_eq!(parse_minor_units("0.29"), Ok(29));
        assert_eq!(parse_minor_units("1.15"), Ok(115));
        assert_eq!(parse_minor_units("4.35"), Ok(435));
    }

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(123456), "R1,234.56");
        assert_eq!(money(-50000), "-R500.00");
        assert_eq!(money(0), "R0.00");
        assert_eq!(money(100000099), "R1,000,000.99");
        assert_eq!(money(4210), "R42.10");
        assert_eq!(money(-5), "-R0.05");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }
}
